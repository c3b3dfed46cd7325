//! Element types for kiln variables.
//!
//! Every variable in a compiled program carries one of these types. The
//! lowering stage uses them to size buffers and the source backends use
//! [`DType::c_style`] to spell them in generated code.


/// Element type of a variable's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(strum::EnumIter, strum::EnumString, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum DType {
    Bool,

    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,

    Float16,
    BFloat16,
    Float32,
    Float64,
}

impl DType {
    /// Size of a single element in bytes.
    pub const fn bytes(&self) -> usize {
        match self {
            Self::Bool | Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 | Self::Float16 | Self::BFloat16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
        }
    }

    pub const fn is_bool(&self) -> bool {
        matches!(self, Self::Bool)
    }

    pub const fn is_signed(&self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }

    pub const fn is_unsigned(&self) -> bool {
        matches!(self, Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64)
    }

    pub const fn is_int(&self) -> bool {
        self.is_signed() || self.is_unsigned()
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float16 | Self::BFloat16 | Self::Float32 | Self::Float64)
    }

    /// Number of bytes needed to hold `numel` elements.
    pub const fn size_of(&self, numel: usize) -> usize {
        self.bytes() * numel
    }

    /// C spelling used by the source backends.
    pub const fn c_style(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int8 => "signed char",
            Self::Int16 => "short",
            Self::Int32 => "int",
            Self::Int64 => "long long",
            Self::UInt8 => "unsigned char",
            Self::UInt16 => "unsigned short",
            Self::UInt32 => "unsigned int",
            Self::UInt64 => "unsigned long long",
            Self::Float16 => "half",
            Self::BFloat16 => "__bf16",
            Self::Float32 => "float",
            Self::Float64 => "double",
        }
    }

    /// Literal for the additive identity, used to seed reductions.
    pub const fn zero_literal(&self) -> &'static str {
        match self {
            Self::Bool => "false",
            Self::Float16 | Self::BFloat16 | Self::Float32 => "0.0f",
            Self::Float64 => "0.0",
            _ => "0",
        }
    }
}
