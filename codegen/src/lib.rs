//! Code generation for kiln lowered functions.
//!
//! This crate defines the boundary between the graph compiler and the
//! device-specific toolchains that turn lowered functions into loadable
//! kernels.
//!
//! # Architecture
//!
//! - **Traits**: backend-agnostic interfaces ([`Backend`], [`CompiledKernel`])
//! - **C**: C / CUDA C source rendering ([`c::CRenderer`])
//! - **Source backend**: a [`Backend`] that emits source text and hands
//!   device assembly (PTX) to an external assembler ([`SourceBackend`])

pub mod c;
pub mod error;
pub mod source;
pub mod traits;
pub mod types;


pub use error::*;
pub use source::{DeviceAssembler, SourceBackend, SourceKernel};
pub use traits::*;
pub use types::*;
