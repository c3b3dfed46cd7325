//! Program instructions.

use std::fmt;
use std::sync::Arc;

use kiln_codegen::CompiledKernel;
use kiln_ir::GroupId;
use smallvec::SmallVec;

pub type ArgList = SmallVec<[String; 4]>;

/// A kernel bound to concrete argument variables.
#[derive(Debug, Clone)]
pub struct KernelCall {
    /// Group the kernel was compiled from.
    pub group: GroupId,
    pub kernel: Arc<dyn CompiledKernel>,
    pub inputs: ArgList,
    /// Written variables: outputs, then temporaries.
    pub outputs: ArgList,
}

impl KernelCall {
    pub fn name(&self) -> &str {
        self.kernel.name()
    }

    /// Inputs followed by outputs.
    pub fn args(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().chain(&self.outputs).map(String::as_str)
    }
}

/// One step of a [`Program`](crate::Program).
#[derive(Debug, Clone)]
pub enum Instruction {
    Kernel(KernelCall),
    /// Allocate the listed variables before the next kernel.
    Malloc { vars: Vec<String> },
    /// Release the listed variables after the previous kernel.
    Free { vars: Vec<String> },
}

impl Instruction {
    pub fn as_kernel(&self) -> Option<&KernelCall> {
        match self {
            Self::Kernel(call) => Some(call),
            _ => None,
        }
    }

    pub fn is_kernel(&self) -> bool {
        matches!(self, Self::Kernel(_))
    }

    pub fn is_buffer_handler(&self) -> bool {
        matches!(self, Self::Malloc { .. } | Self::Free { .. })
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kernel(call) => {
                write!(f, "kernel {}({}) -> ({})", call.name(), call.inputs.join(", "), call.outputs.join(", "))
            }
            Self::Malloc { vars } => write!(f, "malloc [{}]", vars.join(", ")),
            Self::Free { vars } => write!(f, "free [{}]", vars.join(", ")),
        }
    }
}
