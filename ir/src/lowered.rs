//! Lowered functions.
//!
//! A [`LoweredFunc`] is the loop-level form of (part of) a group: a kernel
//! signature whose parameters are concrete variables with declared dtype and
//! shape, and a body of statements over flat element indices. Source
//! backends render this form directly.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use kiln_dtype::DType;
use smallvec::SmallVec;

/// How a kernel uses one of its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamRole {
    /// Read only.
    Input,
    /// Written by the kernel and needed afterwards.
    Output,
    /// Scratch storage, only meaningful for the duration of the kernel.
    Temporary,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Param {
    pub name: String,
    pub role: ParamRole,
    pub dtype: DType,
    pub shape: SmallVec<[usize; 4]>,
}

impl Param {
    pub fn new(name: impl Into<String>, role: ParamRole, dtype: DType, shape: &[usize]) -> Self {
        Self { name: name.into(), role, dtype, shape: SmallVec::from_slice(shape) }
    }

    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// Whether the kernel writes this parameter.
    pub fn is_written(&self) -> bool {
        matches!(self.role, ParamRole::Output | ParamRole::Temporary)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Exp,
    Relu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
        }
    }
}

/// Per-element expression. Fused producers are inlined into their consumers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    /// Element `i` of a parameter, or element 0 when `broadcast` is set.
    Load { var: String, broadcast: bool },
    Unary { op: UnaryOp, src: Box<Expr> },
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
}

impl Expr {
    pub fn load(var: impl Into<String>) -> Self {
        Self::Load { var: var.into(), broadcast: false }
    }

    pub fn unary(op: UnaryOp, src: Expr) -> Self {
        Self::Unary { op, src: Box::new(src) }
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Self::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
    }

    /// Variables read by this expression, in evaluation order.
    pub fn loads(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_loads(&mut out);
        out
    }

    fn collect_loads<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Load { var, .. } => out.push(var),
            Self::Unary { src, .. } => src.collect_loads(out),
            Self::Binary { lhs, rhs, .. } => {
                lhs.collect_loads(out);
                rhs.collect_loads(out);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Stmt {
    /// `out[i] = expr` for `i` in `0..numel`.
    Elementwise { out: String, expr: Expr, numel: usize },
    /// Sum over the innermost `inner` elements: `out[o] = sum(input[o * inner + j])`,
    /// accumulated through `acc`.
    ReduceSum { out: String, input: String, acc: String, outer: usize, inner: usize },
    /// Row-major `out[m, n] = lhs[m, k] * rhs[k, n]`.
    Matmul { out: String, lhs: String, rhs: String, m: usize, k: usize, n: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoweredFunc {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
}

impl LoweredFunc {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), params: Vec::new(), body: Vec::new() }
    }

    pub fn inputs(&self) -> impl Iterator<Item = &Param> {
        self.params.iter().filter(|p| p.role == ParamRole::Input)
    }

    /// Outputs followed by temporaries: everything the kernel writes.
    pub fn written(&self) -> impl Iterator<Item = &Param> {
        let outputs = self.params.iter().filter(|p| p.role == ParamRole::Output);
        let temps = self.params.iter().filter(|p| p.role == ParamRole::Temporary);
        outputs.chain(temps)
    }

    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Content hash of a group's function list.
    pub fn fingerprint(funcs: &[LoweredFunc]) -> u64 {
        let mut hasher = DefaultHasher::new();
        funcs.hash(&mut hasher);
        hasher.finish()
    }
}

impl fmt::Display for LoweredFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| format!("{:?} {}: {}{:?}", p.role, p.name, p.dtype, p.shape.as_slice()))
            .collect();
        writeln!(f, "function {}({}) {{", self.name, params.join(", "))?;
        for stmt in &self.body {
            writeln!(f, "  {stmt:?}")?;
        }
        write!(f, "}}")
    }
}
