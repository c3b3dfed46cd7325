use std::collections::HashSet;

use kiln_device::DeviceSpec;
use kiln_dtype::DType;
use kiln_ir::{BinaryOp, Expr, Graph, Group, ParamRole, Stmt, UnaryOp};
use test_case::test_case;

use crate::{Error, OpLoweringRegistry, OpStrategy};

/// Graph with the given `(name, dtype, shape)` variables and one node, `out` a graph output.
fn single_op(vars: &[(&str, DType, &[usize])], op: &str, inputs: &[&str], outputs: &[&str]) -> (Graph, Group) {
    let mut graph = Graph::new();
    for (name, dtype, shape) in vars {
        graph.declare_var(name, *dtype, shape).unwrap();
    }
    let node = graph.add_node(op, inputs, outputs).unwrap();
    for out in outputs {
        graph.mark_output(out).unwrap();
    }
    (graph, Group::new(0, vec![node], DeviceSpec::Cpu))
}

fn lower(graph: &Graph, group: &Group) -> crate::Result<Vec<kiln_ir::LoweredFunc>> {
    OpLoweringRegistry::with_builtins().lower_group(graph, group, &HashSet::new())
}

#[test_case("add", DeviceSpec::Cpu, Some(OpStrategy::Binary(BinaryOp::Add)))]
#[test_case("relu", DeviceSpec::Cuda { device_id: 1 }, Some(OpStrategy::Unary(UnaryOp::Relu)))]
#[test_case("matmul", DeviceSpec::Cuda { device_id: 0 }, Some(OpStrategy::Matmul))]
#[test_case("reshape", DeviceSpec::Cpu, Some(OpStrategy::Copy))]
#[test_case("softmax", DeviceSpec::Cpu, None)]
fn test_builtin_lookup(op: &str, device: DeviceSpec, expected: Option<OpStrategy>) {
    assert_eq!(OpLoweringRegistry::with_builtins().lookup(op, &device), expected);
}

#[test]
fn test_register_custom_strategy() {
    let registry = OpLoweringRegistry::new();
    assert_eq!(registry.lookup("gelu", &DeviceSpec::Cpu), None);

    registry.register("gelu", "CPU", OpStrategy::Unary(UnaryOp::Exp));
    assert_eq!(registry.lookup("gelu", &DeviceSpec::Cpu), Some(OpStrategy::Unary(UnaryOp::Exp)));
    assert_eq!(registry.lookup("gelu", &DeviceSpec::Cuda { device_id: 0 }), None);
}

#[test]
fn test_strategy_kinds() {
    assert!(OpStrategy::Matmul.is_opaque());
    assert!(!OpStrategy::ReduceSum.is_opaque());
    assert!(!OpStrategy::ReduceSum.is_elementwise());
    assert!(OpStrategy::Copy.is_elementwise());
}

#[test]
fn test_unregistered_op() {
    let (graph, group) = single_op(&[("a", DType::Float32, &[4]), ("b", DType::Float32, &[4])], "softmax", &["a"], &["b"]);

    let err = lower(&graph, &group).unwrap_err();
    assert!(matches!(err, Error::Lowering { group: 0, ref op, ref device } if op == "softmax" && device == "CPU"));
}

#[test]
fn test_binary_layout() {
    let (graph, group) = single_op(
        &[("a", DType::Float32, &[4]), ("b", DType::Float32, &[4]), ("c", DType::Float32, &[4])],
        "add",
        &["a", "b"],
        &["c"],
    );

    let funcs = lower(&graph, &group).unwrap();
    assert_eq!(funcs.len(), 1);
    let func = &funcs[0];
    assert_eq!(func.name, "fn_add_0");
    let roles: Vec<_> = func.params.iter().map(|p| (p.name.as_str(), p.role)).collect();
    assert_eq!(roles, vec![("a", ParamRole::Input), ("b", ParamRole::Input), ("c", ParamRole::Output)]);
    assert_eq!(
        func.body,
        vec![Stmt::Elementwise {
            out: "c".into(),
            expr: Expr::binary(BinaryOp::Add, Expr::load("a"), Expr::load("b")),
            numel: 4,
        }]
    );
}

#[test]
fn test_scalar_operand_broadcasts() {
    let (graph, group) = single_op(
        &[("a", DType::Float32, &[2, 3]), ("s", DType::Float32, &[1]), ("c", DType::Float32, &[2, 3])],
        "mul",
        &["a", "s"],
        &["c"],
    );

    let funcs = lower(&graph, &group).unwrap();
    let Stmt::Elementwise { expr, numel, .. } = &funcs[0].body[0] else {
        panic!("expected elementwise statement");
    };
    assert_eq!(*numel, 6);
    assert_eq!(
        *expr,
        Expr::binary(BinaryOp::Mul, Expr::load("a"), Expr::Load { var: "s".into(), broadcast: true })
    );
}

#[test]
fn test_copy_keeps_element_count() {
    let (graph, group) =
        single_op(&[("a", DType::Float32, &[2, 3]), ("b", DType::Float32, &[6])], "reshape", &["a"], &["b"]);
    let funcs = lower(&graph, &group).unwrap();
    assert_eq!(funcs[0].body, vec![Stmt::Elementwise { out: "b".into(), expr: Expr::load("a"), numel: 6 }]);

    let (graph, group) =
        single_op(&[("a", DType::Float32, &[2, 3]), ("b", DType::Float32, &[4])], "reshape", &["a"], &["b"]);
    assert!(matches!(lower(&graph, &group), Err(Error::InvalidOperands { .. })));
}

#[test_case(&[4], &[3], DType::Float32 ; "element count mismatch")]
#[test_case(&[4], &[4], DType::Int32 ; "dtype mismatch")]
fn test_invalid_elementwise_operands(lhs: &[usize], rhs: &[usize], rhs_dtype: DType) {
    let (graph, group) = single_op(
        &[("a", DType::Float32, lhs), ("b", rhs_dtype, rhs), ("c", DType::Float32, &[4])],
        "sub",
        &["a", "b"],
        &["c"],
    );
    let err = lower(&graph, &group).unwrap_err();
    assert!(matches!(err, Error::InvalidOperands { group: 0, ref op, .. } if op == "sub"));
}

#[test]
fn test_wrong_arity() {
    let (graph, group) = single_op(&[("a", DType::Float32, &[4]), ("c", DType::Float32, &[4])], "add", &["a"], &["c"]);
    let err = lower(&graph, &group).unwrap_err();
    assert!(matches!(err, Error::InvalidOperands { ref reason, .. } if reason.contains("expected 2 inputs")));
}

#[test]
fn test_reduce_over_last_axis() {
    let (graph, group) =
        single_op(&[("a", DType::Float32, &[3, 5]), ("s", DType::Float32, &[3])], "reduce_sum", &["a"], &["s"]);

    let funcs = lower(&graph, &group).unwrap();
    let func = &funcs[0];
    assert_eq!(
        func.body,
        vec![Stmt::ReduceSum { out: "s".into(), input: "a".into(), acc: "s_acc".into(), outer: 3, inner: 5 }]
    );
    let acc = func.param("s_acc").unwrap();
    assert_eq!(acc.role, ParamRole::Temporary);
    assert_eq!(acc.shape.as_slice(), &[3]);
}

#[test_case(&[], &[1] ; "scalar input")]
#[test_case(&[3, 5], &[5] ; "wrong result size")]
fn test_invalid_reduce(input: &[usize], out: &[usize]) {
    let (graph, group) =
        single_op(&[("a", DType::Float32, input), ("s", DType::Float32, out)], "reduce_sum", &["a"], &["s"]);
    assert!(matches!(lower(&graph, &group), Err(Error::InvalidOperands { .. })));
}

#[test]
fn test_matmul() {
    let (graph, group) = single_op(
        &[("a", DType::Float32, &[2, 3]), ("b", DType::Float32, &[3, 4]), ("c", DType::Float32, &[2, 4])],
        "matmul",
        &["a", "b"],
        &["c"],
    );
    let funcs = lower(&graph, &group).unwrap();
    assert_eq!(
        funcs[0].body,
        vec![Stmt::Matmul { out: "c".into(), lhs: "a".into(), rhs: "b".into(), m: 2, k: 3, n: 4 }]
    );
}

#[test_case(&[2, 3], &[4, 4], &[2, 4] ; "inner dimension mismatch")]
#[test_case(&[2, 3], &[3, 4], &[4, 2] ; "wrong result shape")]
#[test_case(&[6], &[3, 4], &[2, 4] ; "one dimensional operand")]
fn test_invalid_matmul(lhs: &[usize], rhs: &[usize], out: &[usize]) {
    let (graph, group) = single_op(
        &[("a", DType::Float32, lhs), ("b", DType::Float32, rhs), ("c", DType::Float32, out)],
        "matmul",
        &["a", "b"],
        &["c"],
    );
    assert!(matches!(lower(&graph, &group), Err(Error::InvalidOperands { .. })));
}

#[test]
fn test_pinned_internal_is_stored() {
    let mut graph = Graph::new();
    for name in ["a", "x", "y"] {
        graph.declare_var(name, DType::Float32, &[4]).unwrap();
    }
    let relu = graph.add_node("relu", &["a"], &["x"]).unwrap();
    let exp = graph.add_node("exp", &["x"], &["y"]).unwrap();
    graph.mark_output("y").unwrap();
    let group = Group::new(0, vec![relu, exp], DeviceSpec::Cpu);

    let registry = OpLoweringRegistry::with_builtins();
    let fused = registry.lower_group(&graph, &group, &HashSet::new()).unwrap();
    assert_eq!(fused[0].body.len(), 1);
    assert!(fused[0].param("x").is_none());

    let pinned = registry.lower_group(&graph, &group, &HashSet::from(["x".to_string()])).unwrap();
    assert_eq!(pinned[0].body.len(), 2);
    assert_eq!(pinned[0].param("x").unwrap().role, ParamRole::Output);
}
