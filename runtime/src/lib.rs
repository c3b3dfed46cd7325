//! Graph compilation for kiln.
//!
//! Turns a fused graph (already partitioned into groups) into a
//! memory-planned [`Program`]: lowering, code generation through a
//! [`kiln_codegen::Backend`], instruction binding, and the variable
//! lifecycle passes that decide when each buffer is allocated and released.
//!
//! # Memory policies
//!
//! - **Eager** (`with_instantiate_variables`): every variable is allocated
//!   before execution and never freed.
//! - **Planned** (`with_buffer_handle_instruction_inserted`): liveness
//!   analysis places malloc/free instructions around first and last uses.
//!
//! Executing kernels is left to an external engine.

pub mod compiler;
pub mod context;
pub mod error;
pub mod instruction;
pub mod kernel_cache;
pub mod lifecycle;
pub mod liveness;
pub mod lowering;
pub mod program;
pub mod reuse;
pub mod scope;

#[cfg(test)]
pub mod test;

pub use compiler::{CompilationResult, CompileStage, GraphCompiler};
pub use context::{CompilationContext, CompileOptions};
pub use error::*;
pub use instruction::{ArgList, Instruction, KernelCall};
pub use kernel_cache::{ArtifactKey, KernelCache};
pub use lifecycle::{instantiate_variables, remove_invalid_variables};
pub use liveness::{LifetimePlan, LifetimePolicy, analyze_variable_lifetime, insert_buffer_handlers};
pub use lowering::{OpLoweringRegistry, OpStrategy};
pub use program::{MemoryStats, Program};
pub use reuse::{AliasMap, resolve_reuse_map};
pub use scope::{Scope, SharedScope, build_scope};
