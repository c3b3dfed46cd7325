//! Error types for graph compilation.

use kiln_ir::GroupId;
use snafu::Snafu;

/// Result type for compiler operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can occur while building a program.
///
/// Every variant names the group or variable needed to find the offending
/// node in the source graph.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// No lowering strategy for an operator on the target device.
    #[snafu(display("group {group}: no lowering for op '{op}' on {device}"))]
    Lowering { group: GroupId, op: String, device: String },

    /// A lowering strategy rejected its operands.
    #[snafu(display("group {group}: cannot lower '{op}': {reason}"))]
    InvalidOperands { group: GroupId, op: String, reason: String },

    /// The backend failed to compile or load a group.
    #[snafu(display("group {group}: code generation failed: {source}"))]
    Codegen { group: GroupId, source: kiln_codegen::Error },

    /// Attached source text could not be loaded.
    #[snafu(display("failed to load attached code: {source}"))]
    LoadCode { source: kiln_codegen::Error },

    /// An instruction references a variable that is missing or has no memory at that step.
    #[snafu(display("variable '{var}' is not available at step {step}"))]
    ScopeConsistency { var: String, step: usize },

    /// Invalid reuse-map entry.
    #[snafu(display("'{dst}' cannot reuse the buffer of '{src}': {reason}"))]
    AliasConflict { dst: String, src: String, reason: String },

    /// Lookup of a variable the scope does not hold.
    #[snafu(display("variable '{var}' is not in the scope"))]
    UnknownVariable { var: String },

    /// Pre-supplied lowered functions or a tuning result do not line up with the groups.
    #[snafu(display("{groups} groups but {funcs} lowered function lists"))]
    GroupMismatch { groups: usize, funcs: usize },

    /// Graph or group metadata is inconsistent.
    #[snafu(display("graph error: {source}"))]
    Graph { source: kiln_ir::Error },

    /// Buffer allocation failed.
    #[snafu(display("device error: {source}"))]
    Device { source: kiln_device::Error },
}
