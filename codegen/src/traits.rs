//! Core traits for code generation.

use std::fmt::Debug;

use kiln_device::DeviceSpec;
use kiln_ir::LoweredFunc;

use crate::{CompiledModule, Result};

/// Handle to a loaded kernel.
///
/// Running kernels belongs to the execution engine; the compiler only needs
/// to bind a handle to the instruction that will invoke it.
pub trait CompiledKernel: Send + Sync + Debug {
    /// Entry point name.
    fn name(&self) -> &str;
}

/// Device code generator plus JIT.
///
/// Implementers turn one group's lowered functions into a module holding a
/// kernel per function. Implementations must be callable from several
/// threads at once: groups may be compiled in parallel.
pub trait Backend: Send + Sync {
    /// Backend name (e.g. "c", "cuda").
    fn name(&self) -> &str;

    /// Whether the backend can emit code for `target`.
    fn supports(&self, target: &DeviceSpec) -> bool;

    /// Generate and load code for one group's lowered functions.
    fn compile(&self, funcs: &[LoweredFunc], target: &DeviceSpec) -> Result<CompiledModule>;

    /// Load a module from source text emitted by an earlier `compile`.
    fn load(&self, source: &str, target: &DeviceSpec) -> Result<CompiledModule>;
}
