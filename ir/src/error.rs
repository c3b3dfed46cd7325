use snafu::Snafu;

use crate::graph::NodeId;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Node references a variable that was never declared.
    #[snafu(display("unknown variable '{name}'"))]
    UnknownVariable { name: String },

    /// Variable redeclared with different metadata.
    #[snafu(display("variable '{name}' is already declared with a different dtype or shape"))]
    ConflictingVariable { name: String },

    /// A variable may have at most one producing node.
    #[snafu(display("variable '{name}' is produced by both node {first} and node {second}"))]
    MultipleProducers { name: String, first: NodeId, second: NodeId },

    /// Group references a node id not present in the graph.
    #[snafu(display("group {group} references unknown node {node}"))]
    UnknownNode { group: usize, node: NodeId },

    /// Group contains no nodes.
    #[snafu(display("group {group} is empty"))]
    EmptyGroup { group: usize },
}
