//! Types for code generation.

use std::fmt;
use std::sync::Arc;

use kiln_dtype::DType;

use crate::error::{FunctionNotFoundSnafu, Result};
use crate::traits::CompiledKernel;

/// A rendered kernel ready for compilation.
#[derive(Debug, Clone)]
pub struct RenderedKernel {
    /// The generated code (C, CUDA C).
    pub code: String,

    /// Entry point function name.
    pub entry_point: String,

    /// Buffer argument information, in signature order.
    pub buffer_args: Vec<BufferArg>,
}

/// Information about a buffer argument to the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferArg {
    /// Argument index.
    pub index: usize,

    /// Buffer name.
    pub name: String,

    /// Data type.
    pub dtype: DType,

    /// Whether the kernel writes this buffer.
    pub is_output: bool,
}

impl RenderedKernel {
    pub fn new(code: String, entry_point: String) -> Self {
        Self { code, entry_point, buffer_args: Vec::new() }
    }
}

/// Output of a backend for one group.
#[derive(Clone)]
pub struct CompiledModule {
    /// Emitted source text for every function of the group.
    pub source: String,

    /// Low-level device text (PTX) for accelerator targets.
    pub device_text: Option<String>,

    /// Loaded kernels, one per lowered function, in function order.
    pub kernels: Vec<Arc<dyn CompiledKernel>>,
}

impl CompiledModule {
    /// Look up a kernel by entry point name.
    pub fn kernel(&self, name: &str) -> Result<Arc<dyn CompiledKernel>> {
        self.kernels.iter().find(|k| k.name() == name).cloned().ok_or_else(|| FunctionNotFoundSnafu { name }.build())
    }
}

impl fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.kernels.iter().map(|k| k.name()).collect();
        f.debug_struct("CompiledModule")
            .field("kernels", &names)
            .field("source_len", &self.source.len())
            .field("has_device_text", &self.device_text.is_some())
            .finish()
    }
}
