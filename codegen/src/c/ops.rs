//! Expression rendering for the C backend.

use kiln_dtype::DType;
use kiln_ir::{Expr, UnaryOp};

/// Make a variable name usable as a C identifier.
pub fn c_ident(name: &str) -> String {
    let mut ident: String = name.chars().map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' }).collect();
    if ident.chars().next().is_none_or(|c| c.is_ascii_digit()) {
        ident.insert(0, '_');
    }
    ident
}

/// Render an element expression evaluated at index `i`.
pub fn render_expr(expr: &Expr, dtype: DType) -> String {
    match expr {
        Expr::Load { var, broadcast: false } => format!("{}[i]", c_ident(var)),
        Expr::Load { var, broadcast: true } => format!("{}[0]", c_ident(var)),
        Expr::Unary { op, src } => {
            let src = render_expr(src, dtype);
            match op {
                UnaryOp::Neg => format!("(-{src})"),
                UnaryOp::Exp => format!("(({})exp((double){src}))", dtype.c_style()),
                UnaryOp::Relu => format!("({src} > 0 ? {src} : ({})0)", dtype.c_style()),
            }
        }
        Expr::Binary { op, lhs, rhs } => {
            format!("({} {} {})", render_expr(lhs, dtype), op.symbol(), render_expr(rhs, dtype))
        }
    }
}
