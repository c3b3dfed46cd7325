//! Error types for code generation.

use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can occur during code generation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Backend cannot emit code for this device.
    #[snafu(display("backend '{backend}' does not support device {device}"))]
    UnsupportedTarget { backend: String, device: String },

    /// Lowered function is malformed.
    #[snafu(display("invalid function '{func}': {reason}"))]
    InvalidFunction { func: String, reason: String },

    /// Device assembly (e.g. source to PTX) failed.
    #[snafu(display("device assembly failed: {reason}"))]
    Assembly { reason: String },

    /// JIT compilation failed.
    #[snafu(display("JIT compilation failed: {reason}"))]
    JitCompilation { reason: String },

    /// Function not found in module.
    #[snafu(display("function '{name}' not found in module"))]
    FunctionNotFound { name: String },
}
