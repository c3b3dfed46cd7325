//! Graph-level IR consumed and produced by the kiln compiler.
//!
//! # Module Organization
//!
//! - [`graph`] - Computation graph: operator nodes over named variables
//! - [`group`] - Fusion groups, each compiled into one kernel
//! - [`lowered`] - Lowered functions: kernel parameters and loop-level statements
//! - [`tuning`] - Externally computed tuning results
//! - [`error`] - Error types and result handling

pub mod error;
pub mod graph;
pub mod group;
pub mod lowered;
pub mod tuning;


pub use error::{Error, Result};
pub use graph::{Graph, Node, NodeId, VarInfo};
pub use group::{Group, GroupId, GroupInterface};
pub use lowered::{BinaryOp, Expr, LoweredFunc, Param, ParamRole, Stmt, UnaryOp};
pub use tuning::TuningResult;

pub use kiln_device::DeviceSpec;
pub use kiln_dtype::DType;
