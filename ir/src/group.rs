//! Fusion groups.
//!
//! A group is an ordered set of graph nodes compiled together into one
//! kernel. Groups come from an external fusion pass and are immutable here.

use std::collections::{HashSet, hash_map::DefaultHasher};
use std::hash::{Hash, Hasher};

use kiln_device::DeviceSpec;

use crate::error::{EmptyGroupSnafu, Result, UnknownNodeSnafu};
use crate::graph::{Graph, Node, NodeId};

pub type GroupId = usize;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Group {
    id: GroupId,
    nodes: Vec<NodeId>,
    target: DeviceSpec,
}

/// Variables crossing a group's boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupInterface {
    /// Read by the group, produced elsewhere (or caller-provided), in first-use order.
    pub inputs: Vec<String>,
    /// Produced by the group and needed after it.
    pub outputs: Vec<String>,
    /// Produced and consumed only inside the group; fused away.
    pub internals: Vec<String>,
}

impl GroupInterface {
    pub fn is_exported(&self, name: &str) -> bool {
        self.outputs.iter().any(|o| o == name)
    }
}

impl Group {
    pub fn new(id: GroupId, nodes: Vec<NodeId>, target: DeviceSpec) -> Self {
        Self { id, nodes, target }
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn node_ids(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn target(&self) -> &DeviceSpec {
        &self.target
    }

    /// Member nodes in graph order.
    pub fn nodes<'g>(&self, graph: &'g Graph) -> Result<Vec<&'g Node>> {
        snafu::ensure!(!self.nodes.is_empty(), EmptyGroupSnafu { group: self.id });

        let mut ids = self.nodes.clone();
        ids.sort_unstable();
        ids.dedup();
        ids.into_iter()
            .map(|node| graph.node(node).ok_or_else(|| UnknownNodeSnafu { group: self.id, node }.build()))
            .collect()
    }

    /// Kernel function name, e.g. `fn_add_relu_3`.
    pub fn func_name(&self, graph: &Graph) -> String {
        let mut name = String::from("fn");
        let mut ids = self.nodes.clone();
        ids.sort_unstable();
        for node in ids.iter().filter_map(|&id| graph.node(id)) {
            name.push('_');
            name.push_str(&node.op);
        }
        format!("{name}_{}", self.id)
    }

    /// Compute which variables enter, leave, or stay inside the group.
    ///
    /// A produced variable is exported when a node outside the group reads it,
    /// when it is a graph output, or when it is listed in `keep`.
    pub fn interface(&self, graph: &Graph, keep: &HashSet<String>) -> Result<GroupInterface> {
        let nodes = self.nodes(graph)?;
        let members: HashSet<NodeId> = nodes.iter().map(|n| n.id).collect();

        let produced: HashSet<&str> = nodes.iter().flat_map(|n| n.outputs.iter().map(String::as_str)).collect();

        let mut interface = GroupInterface::default();
        for node in &nodes {
            for input in &node.inputs {
                if !produced.contains(input.as_str()) && !interface.inputs.contains(input) {
                    interface.inputs.push(input.clone());
                }
            }
        }

        for node in &nodes {
            for output in &node.outputs {
                let used_outside = graph.consumers(output).any(|consumer| !members.contains(&consumer.id));
                if used_outside || graph.is_output(output) || keep.contains(output) {
                    interface.outputs.push(output.clone());
                } else {
                    interface.internals.push(output.clone());
                }
            }
        }

        Ok(interface)
    }

    /// Content hash of the group: id, target, operators and operand metadata.
    ///
    /// Stable within a process. The id takes part because it names the
    /// emitted kernel function.
    pub fn fingerprint(&self, graph: &Graph) -> Result<u64> {
        let mut hasher = DefaultHasher::new();
        self.id.hash(&mut hasher);
        self.target.hash(&mut hasher);
        for node in self.nodes(graph)? {
            node.op.hash(&mut hasher);
            for name in node.inputs.iter().chain(&node.outputs) {
                graph.var(name)?.hash(&mut hasher);
            }
        }
        Ok(hasher.finish())
    }
}
