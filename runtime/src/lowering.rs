//! Group lowering.
//!
//! Each operator is lowered through an [`OpStrategy`] looked up by
//! (op name, device kind). Elementwise strategies fuse: a value produced and
//! consumed inside one function is inlined into its consumers instead of
//! being stored. Opaque strategies (matmul) always get a function of their
//! own, so a group containing one splits into several functions.
//!
//! # Function layout
//!
//! Parameters are inputs (first-use order), then outputs (production order),
//! then temporaries. Reduction accumulators and materialized fused values
//! are temporaries.

use std::collections::{HashMap, HashSet};

use kiln_device::DeviceSpec;
use kiln_ir::{BinaryOp, Expr, Graph, Group, GroupId, LoweredFunc, Node, Param, ParamRole, Stmt, UnaryOp, VarInfo};
use parking_lot::RwLock;
use snafu::{OptionExt, ResultExt, ensure};
use tracing::{debug, trace};

use crate::error::{GraphSnafu, InvalidOperandsSnafu, LoweringSnafu, Result};

/// How one operator becomes loop-level statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpStrategy {
    Unary(UnaryOp),
    Binary(BinaryOp),
    /// Element copy; also covers reshapes.
    Copy,
    /// Sum over the innermost axis.
    ReduceSum,
    /// Row-major 2-D matrix product.
    Matmul,
}

impl OpStrategy {
    /// Opaque ops are never fused with neighbours.
    pub fn is_opaque(&self) -> bool {
        matches!(self, Self::Matmul)
    }

    pub fn is_elementwise(&self) -> bool {
        matches!(self, Self::Unary(_) | Self::Binary(_) | Self::Copy)
    }

    fn arity(&self) -> usize {
        match self {
            Self::Binary(_) | Self::Matmul => 2,
            _ => 1,
        }
    }
}

const BUILTIN_DEVICE_KINDS: [&str; 2] = ["CPU", "CUDA"];

/// Lowering strategies keyed by (op name, device kind).
#[derive(Debug, Default)]
pub struct OpLoweringRegistry {
    strategies: RwLock<HashMap<(String, String), OpStrategy>>,
}

impl OpLoweringRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in operators for every built-in device kind.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        let builtins = [
            ("add", OpStrategy::Binary(BinaryOp::Add)),
            ("sub", OpStrategy::Binary(BinaryOp::Sub)),
            ("mul", OpStrategy::Binary(BinaryOp::Mul)),
            ("div", OpStrategy::Binary(BinaryOp::Div)),
            ("neg", OpStrategy::Unary(UnaryOp::Neg)),
            ("exp", OpStrategy::Unary(UnaryOp::Exp)),
            ("relu", OpStrategy::Unary(UnaryOp::Relu)),
            ("identity", OpStrategy::Copy),
            ("reshape", OpStrategy::Copy),
            ("reduce_sum", OpStrategy::ReduceSum),
            ("matmul", OpStrategy::Matmul),
        ];
        for kind in BUILTIN_DEVICE_KINDS {
            for (op, strategy) in builtins {
                registry.register(op, kind, strategy);
            }
        }
        registry
    }

    /// Install (or replace) the strategy for `op` on devices of `device_kind`.
    pub fn register(&self, op: &str, device_kind: &str, strategy: OpStrategy) {
        self.strategies.write().insert((op.to_string(), device_kind.to_string()), strategy);
    }

    pub fn lookup(&self, op: &str, device: &DeviceSpec) -> Option<OpStrategy> {
        self.strategies.read().get(&(op.to_string(), device.kind().to_string())).copied()
    }

    /// Lower one group into one or more functions.
    ///
    /// `pinned` variables are stored even when only used inside the group.
    pub fn lower_group(&self, graph: &Graph, group: &Group, pinned: &HashSet<String>) -> Result<Vec<LoweredFunc>> {
        let nodes = group.nodes(graph).context(GraphSnafu)?;
        let device = group.target();

        let strategies = nodes
            .iter()
            .map(|node| {
                self.lookup(&node.op, device).context(LoweringSnafu {
                    group: group.id(),
                    op: &node.op,
                    device: device.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut segments: Vec<Vec<usize>> = Vec::new();
        let mut run = Vec::new();
        for (index, strategy) in strategies.iter().enumerate() {
            if strategy.is_opaque() {
                if !run.is_empty() {
                    segments.push(std::mem::take(&mut run));
                }
                segments.push(vec![index]);
            } else {
                run.push(index);
            }
        }
        if !run.is_empty() {
            segments.push(run);
        }

        let base = group.func_name(graph);
        let split = segments.len() > 1;
        let funcs = segments
            .iter()
            .enumerate()
            .map(|(part, members)| {
                let name = if split { format!("{base}_part{part}") } else { base.clone() };
                let segment = Group::new(group.id(), members.iter().map(|&i| nodes[i].id).collect(), device.clone());
                let interface = segment.interface(graph, pinned).context(GraphSnafu)?;

                let mut builder = FuncBuilder::new(graph, group.id(), name, interface.outputs);
                for name in &interface.inputs {
                    builder.add_param(name, ParamRole::Input)?;
                }
                for name in builder.exported.clone() {
                    builder.add_param(&name, ParamRole::Output)?;
                }
                for &i in members {
                    builder.lower_node(nodes[i], strategies[i])?;
                }
                Ok(builder.finish())
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(group = group.id(), device = %device, funcs = funcs.len(), "lowered group");
        Ok(funcs)
    }
}

struct FuncBuilder<'g> {
    graph: &'g Graph,
    group: GroupId,
    func: LoweredFunc,
    /// Variables stored by this function, in production order.
    exported: Vec<String>,
    /// Fused values, inlined at every use.
    inlined: HashMap<String, Expr>,
}

impl<'g> FuncBuilder<'g> {
    fn new(graph: &'g Graph, group: GroupId, name: String, exported: Vec<String>) -> Self {
        Self { graph, group, func: LoweredFunc::new(name), exported, inlined: HashMap::new() }
    }

    fn var(&self, name: &str) -> Result<&'g VarInfo> {
        self.graph.var(name).context(GraphSnafu)
    }

    fn add_param(&mut self, name: &str, role: ParamRole) -> Result<()> {
        if self.func.param(name).is_none() {
            let info = self.var(name)?;
            self.func.params.push(Param::new(name, role, info.dtype, &info.shape));
        }
        Ok(())
    }

    fn invalid<T>(&self, node: &Node, reason: impl Into<String>) -> Result<T> {
        InvalidOperandsSnafu { group: self.group, op: &node.op, reason }.fail()
    }

    fn lower_node(&mut self, node: &Node, strategy: OpStrategy) -> Result<()> {
        if node.inputs.len() != strategy.arity() || node.outputs.len() != 1 {
            return self.invalid(
                node,
                format!(
                    "expected {} inputs and 1 output, got {} and {}",
                    strategy.arity(),
                    node.inputs.len(),
                    node.outputs.len()
                ),
            );
        }
        let out = self.var(&node.outputs[0])?;
        for input in &node.inputs {
            if self.var(input)?.dtype != out.dtype {
                return self.invalid(node, format!("'{input}' is not {}", out.dtype));
            }
        }
        trace!(group = self.group, op = %node.op, out = %out.name, "lowering node");

        match strategy {
            OpStrategy::Unary(op) => {
                let src = self.operand(node, &node.inputs[0], out)?;
                self.define(out, Expr::unary(op, src));
            }
            OpStrategy::Binary(op) => {
                let lhs = self.operand(node, &node.inputs[0], out)?;
                let rhs = self.operand(node, &node.inputs[1], out)?;
                self.define(out, Expr::binary(op, lhs, rhs));
            }
            OpStrategy::Copy => {
                let input = self.var(&node.inputs[0])?;
                if input.numel() != out.numel() {
                    return self.invalid(node, format!("cannot copy {} elements into {}", input.numel(), out.numel()));
                }
                let src = self.fused_or_load(&input.name, false);
                self.define(out, src);
            }
            OpStrategy::ReduceSum => self.lower_reduce(node, out)?,
            OpStrategy::Matmul => self.lower_matmul(node, out)?,
        }
        Ok(())
    }

    /// Expression for `name` as an operand of an elementwise op writing `out`.
    fn operand(&mut self, node: &Node, name: &str, out: &VarInfo) -> Result<Expr> {
        let info = self.var(name)?;
        let broadcast = info.numel() == 1 && out.numel() > 1;
        if info.numel() != out.numel() && !broadcast {
            return self.invalid(node, format!("'{name}' has {} elements, expected {} or 1", info.numel(), out.numel()));
        }
        if broadcast && self.inlined.contains_key(name) {
            self.materialize(name)?;
        }
        Ok(self.fused_or_load(name, broadcast))
    }

    fn fused_or_load(&self, name: &str, broadcast: bool) -> Expr {
        match self.inlined.get(name) {
            Some(expr) => expr.clone(),
            None => Expr::Load { var: name.to_string(), broadcast },
        }
    }

    /// Bind an elementwise result: stored when exported, inlined otherwise.
    fn define(&mut self, out: &VarInfo, expr: Expr) {
        if self.exported.contains(&out.name) {
            self.func.body.push(Stmt::Elementwise { out: out.name.clone(), expr, numel: out.numel() });
        } else {
            self.inlined.insert(out.name.clone(), expr);
        }
    }

    /// Store a fused value into a temporary so non-elementwise consumers can read it.
    fn materialize(&mut self, name: &str) -> Result<()> {
        if let Some(expr) = self.inlined.remove(name) {
            let info = self.var(name)?;
            self.add_param(name, ParamRole::Temporary)?;
            self.func.body.push(Stmt::Elementwise { out: name.to_string(), expr, numel: info.numel() });
        }
        Ok(())
    }

    /// Non-elementwise results are always stored; internal ones in a temporary.
    fn store_target(&mut self, out: &VarInfo) -> Result<()> {
        if !self.exported.contains(&out.name) {
            self.add_param(&out.name, ParamRole::Temporary)?;
        }
        Ok(())
    }

    fn lower_reduce(&mut self, node: &Node, out: &VarInfo) -> Result<()> {
        let input = self.var(&node.inputs[0])?;
        let Some(&inner) = input.shape.last() else {
            return self.invalid(node, "cannot reduce a scalar");
        };
        let outer = input.numel() / inner.max(1);
        ensure!(
            out.numel() == outer,
            InvalidOperandsSnafu {
                group: self.group,
                op: &node.op,
                reason: format!("reducing {:?} over its last axis yields {outer} elements, not {}", input.shape.as_slice(), out.numel()),
            }
        );

        self.materialize(&input.name)?;
        self.store_target(out)?;

        let acc = format!("{}_acc", out.name);
        if self.func.param(&acc).is_none() {
            self.func.params.push(Param::new(&acc, ParamRole::Temporary, out.dtype, &[outer]));
        }
        self.func.body.push(Stmt::ReduceSum { out: out.name.clone(), input: input.name.clone(), acc, outer, inner });
        Ok(())
    }

    fn lower_matmul(&mut self, node: &Node, out: &VarInfo) -> Result<()> {
        let (lhs, rhs) = (self.var(&node.inputs[0])?, self.var(&node.inputs[1])?);
        let (&[m, k], &[k2, n], &[om, on]) = (lhs.shape.as_slice(), rhs.shape.as_slice(), out.shape.as_slice()) else {
            return self.invalid(node, "matmul expects 2-D operands and result");
        };
        if k != k2 || om != m || on != n {
            return self.invalid(
                node,
                format!("shapes [{m}, {k}] x [{k2}, {n}] do not produce [{om}, {on}]"),
            );
        }

        self.materialize(&lhs.name)?;
        self.materialize(&rhs.name)?;
        self.store_target(out)?;
        self.func.body.push(Stmt::Matmul {
            out: out.name.clone(),
            lhs: lhs.name.clone(),
            rhs: rhs.name.clone(),
            m,
            k,
            n,
        });
        Ok(())
    }

    fn finish(self) -> LoweredFunc {
        self.func
    }
}
