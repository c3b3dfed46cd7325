//! Computation graph.
//!
//! Nodes are operators reading and writing named variables. Variable
//! metadata (dtype and shape) is declared up front; the graph never owns
//! storage, that is the scope's job.

use std::collections::{BTreeMap, HashMap};

use kiln_dtype::DType;
use smallvec::SmallVec;

use crate::error::{ConflictingVariableSnafu, MultipleProducersSnafu, Result, UnknownVariableSnafu};

pub type NodeId = usize;

/// Declared metadata of a graph variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VarInfo {
    pub name: String,
    pub dtype: DType,
    pub shape: SmallVec<[usize; 4]>,
}

impl VarInfo {
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn size_in_bytes(&self) -> usize {
        self.dtype.size_of(self.numel())
    }
}

/// An operator application.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Node {
    pub id: NodeId,
    pub op: String,
    pub inputs: SmallVec<[String; 4]>,
    pub outputs: SmallVec<[String; 2]>,
}

#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    vars: BTreeMap<String, VarInfo>,
    producers: HashMap<String, NodeId>,
    outputs: Vec<String>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a variable. Redeclaring with identical metadata is allowed.
    pub fn declare_var(&mut self, name: &str, dtype: DType, shape: &[usize]) -> Result<()> {
        let info = VarInfo { name: name.to_string(), dtype, shape: SmallVec::from_slice(shape) };
        match self.vars.get(name) {
            Some(existing) if *existing == info => Ok(()),
            Some(_) => ConflictingVariableSnafu { name }.fail(),
            None => {
                self.vars.insert(name.to_string(), info);
                Ok(())
            }
        }
    }

    /// Append an operator node. All operands must already be declared.
    pub fn add_node(&mut self, op: &str, inputs: &[&str], outputs: &[&str]) -> Result<NodeId> {
        for name in inputs.iter().chain(outputs) {
            snafu::ensure!(self.vars.contains_key(*name), UnknownVariableSnafu { name: *name });
        }

        let id = self.nodes.len();
        for name in outputs {
            if let Some(&first) = self.producers.get(*name) {
                return MultipleProducersSnafu { name: *name, first, second: id }.fail();
            }
        }
        for name in outputs {
            self.producers.insert(name.to_string(), id);
        }

        self.nodes.push(Node {
            id,
            op: op.to_string(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
        });
        Ok(id)
    }

    /// Mark a variable as a graph output (kept alive and exported by its group).
    pub fn mark_output(&mut self, name: &str) -> Result<()> {
        snafu::ensure!(self.vars.contains_key(name), UnknownVariableSnafu { name });
        if !self.outputs.iter().any(|o| o == name) {
            self.outputs.push(name.to_string());
        }
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn var(&self, name: &str) -> Result<&VarInfo> {
        self.vars.get(name).ok_or_else(|| UnknownVariableSnafu { name }.build())
    }

    /// All declared variables in name order.
    pub fn vars(&self) -> impl Iterator<Item = &VarInfo> {
        self.vars.values()
    }

    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    pub fn is_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|o| o == name)
    }

    /// Node producing `name`, if any. Graph inputs and weights have none.
    pub fn producer(&self, name: &str) -> Option<NodeId> {
        self.producers.get(name).copied()
    }

    /// Nodes reading `name`, in node order.
    pub fn consumers<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.nodes.iter().filter(move |node| node.inputs.iter().any(|input| input == name))
    }
}
