//! C source code generation backend.
//!
//! Renders a [`LoweredFunc`] as one C function for CPU targets, or one
//! `__global__` CUDA C kernel for accelerator targets.
//!
//! # Kernel Signature
//!
//! ```c
//! void fn_add_relu_0(const float* restrict x, float* restrict y);
//! ```
//! Parameters appear in declaration order; inputs are `const`.

pub mod ops;

use kiln_device::DeviceSpec;
use kiln_ir::{LoweredFunc, Stmt};

use crate::error::{InvalidFunctionSnafu, Result};
use crate::{BufferArg, RenderedKernel};

use self::ops::{c_ident, render_expr};

/// Prologue shared by every translation unit.
pub const C_PRELUDE: &str = "#include <math.h>\n#include <stdbool.h>\n";
pub const CUDA_PRELUDE: &str = "#include <cuda_fp16.h>\n";

/// C source code renderer.
#[derive(Debug, Clone)]
pub struct CRenderer {
    cuda: bool,
}

impl CRenderer {
    pub fn new(target: &DeviceSpec) -> Self {
        Self { cuda: target.is_accelerator() }
    }

    pub fn prelude(&self) -> &'static str {
        if self.cuda { CUDA_PRELUDE } else { C_PRELUDE }
    }

    pub fn render(&self, func: &LoweredFunc) -> Result<RenderedKernel> {
        validate(func)?;

        let restrict = if self.cuda { "__restrict__" } else { "restrict" };
        let mut buffer_args = Vec::with_capacity(func.params.len());
        let mut params = Vec::with_capacity(func.params.len());
        for (index, param) in func.params.iter().enumerate() {
            let name = c_ident(&param.name);
            let qualifier = if param.is_written() { "" } else { "const " };
            params.push(format!("{qualifier}{}* {restrict} {name}", param.dtype.c_style()));
            buffer_args.push(BufferArg { index, name, dtype: param.dtype, is_output: param.is_written() });
        }

        let mut lines = Vec::new();
        let entry = c_ident(&func.name);
        if self.cuda {
            lines.push(format!("extern \"C\" __global__ void {entry}({}) {{", params.join(", ")));
            lines.push("  long long tid = blockIdx.x * (long long)blockDim.x + threadIdx.x;".to_string());
            lines.push("  long long stride = (long long)gridDim.x * blockDim.x;".to_string());
        } else {
            lines.push(format!("void {entry}({}) {{", params.join(", ")));
        }

        let (start, step) = if self.cuda { ("tid", "stride") } else { ("0", "1") };
        for stmt in &func.body {
            self.render_stmt(func, stmt, start, step, &mut lines)?;
        }

        lines.push("}".to_string());
        lines.push(String::new());

        let mut kernel = RenderedKernel::new(lines.join("\n"), entry);
        kernel.buffer_args = buffer_args;
        Ok(kernel)
    }

    fn render_stmt(
        &self,
        func: &LoweredFunc,
        stmt: &Stmt,
        start: &str,
        step: &str,
        lines: &mut Vec<String>,
    ) -> Result<()> {
        match stmt {
            Stmt::Elementwise { out, expr, numel } => {
                let dtype = param_dtype(func, out)?;
                lines.push(format!("  for (long long i = {start}; i < {numel}; i += {step}) {{"));
                lines.push(format!("    {}[i] = {};", c_ident(out), render_expr(expr, dtype)));
                lines.push("  }".to_string());
            }
            Stmt::ReduceSum { out, input, acc, outer, inner } => {
                let dtype = param_dtype(func, out)?;
                let (out, input, acc) = (c_ident(out), c_ident(input), c_ident(acc));
                lines.push(format!("  for (long long o = {start}; o < {outer}; o += {step}) {{"));
                lines.push(format!("    {acc}[o] = {};", dtype.zero_literal()));
                lines.push(format!("    for (long long j = 0; j < {inner}; ++j) {{"));
                lines.push(format!("      {acc}[o] += {input}[o * {inner} + j];"));
                lines.push("    }".to_string());
                lines.push(format!("    {out}[o] = {acc}[o];"));
                lines.push("  }".to_string());
            }
            Stmt::Matmul { out, lhs, rhs, m, k, n } => {
                let dtype = param_dtype(func, out)?;
                let (out, lhs, rhs) = (c_ident(out), c_ident(lhs), c_ident(rhs));
                lines.push(format!("  for (long long idx = {start}; idx < {}; idx += {step}) {{", m * n));
                lines.push(format!("    long long r = idx / {n}, c = idx % {n};"));
                lines.push(format!("    {} sum = {};", dtype.c_style(), dtype.zero_literal()));
                lines.push(format!("    for (long long p = 0; p < {k}; ++p) {{"));
                lines.push(format!("      sum += {lhs}[r * {k} + p] * {rhs}[p * {n} + c];"));
                lines.push("    }".to_string());
                lines.push(format!("    {out}[idx] = sum;"));
                lines.push("  }".to_string());
            }
        }
        Ok(())
    }
}

fn param_dtype(func: &LoweredFunc, name: &str) -> Result<kiln_dtype::DType> {
    func.param(name).map(|p| p.dtype).ok_or_else(|| {
        InvalidFunctionSnafu { func: func.name.clone(), reason: format!("'{name}' is not a parameter") }.build()
    })
}

/// Every variable a statement touches must be a parameter, and only
/// written parameters may be stored to.
fn validate(func: &LoweredFunc) -> Result<()> {
    let written = |name: &str| func.param(name).is_some_and(|p| p.is_written());
    let known = |name: &str| func.param(name).is_some();

    for stmt in &func.body {
        let (stores, loads): (Vec<&str>, Vec<&str>) = match stmt {
            Stmt::Elementwise { out, expr, .. } => (vec![out.as_str()], expr.loads()),
            Stmt::ReduceSum { out, input, acc, .. } => (vec![out.as_str(), acc.as_str()], vec![input.as_str()]),
            Stmt::Matmul { out, lhs, rhs, .. } => (vec![out.as_str()], vec![lhs.as_str(), rhs.as_str()]),
        };
        for name in stores {
            snafu::ensure!(
                written(name),
                InvalidFunctionSnafu { func: func.name.clone(), reason: format!("stores to non-output '{name}'") }
            );
        }
        for name in loads {
            snafu::ensure!(
                known(name),
                InvalidFunctionSnafu { func: func.name.clone(), reason: format!("'{name}' is not a parameter") }
            );
        }
    }
    Ok(())
}
