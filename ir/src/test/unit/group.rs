use std::collections::HashSet;

use kiln_device::DeviceSpec;
use kiln_dtype::DType;

use crate::{Error, Graph, Group};

/// x -> add(x, w) = t -> relu(t) = y -> exp(y) = z
fn graph() -> Graph {
    let mut graph = Graph::new();
    for name in ["x", "w", "t", "y", "z"] {
        graph.declare_var(name, DType::Float32, &[8]).unwrap();
    }
    graph.add_node("add", &["x", "w"], &["t"]).unwrap();
    graph.add_node("relu", &["t"], &["y"]).unwrap();
    graph.add_node("exp", &["y"], &["z"]).unwrap();
    graph.mark_output("z").unwrap();
    graph
}

#[test]
fn test_interface_splits_internal_and_exported() {
    let graph = graph();
    let group = Group::new(0, vec![1, 0], DeviceSpec::Cpu);

    let interface = group.interface(&graph, &HashSet::new()).unwrap();
    assert_eq!(interface.inputs, vec!["x", "w"]);
    assert_eq!(interface.outputs, vec!["y"]);
    assert_eq!(interface.internals, vec!["t"]);
}

#[test]
fn test_keep_set_exports_internal() {
    let graph = graph();
    let group = Group::new(0, vec![0, 1], DeviceSpec::Cpu);
    let keep: HashSet<String> = ["t".to_string()].into();

    let interface = group.interface(&graph, &keep).unwrap();
    assert_eq!(interface.outputs, vec!["t", "y"]);
    assert!(interface.internals.is_empty());
}

#[test]
fn test_graph_output_is_exported() {
    let graph = graph();
    let group = Group::new(1, vec![2], DeviceSpec::Cpu);
    let interface = group.interface(&graph, &HashSet::new()).unwrap();
    assert_eq!(interface.outputs, vec!["z"]);
}

#[test]
fn test_func_name_lists_ops_in_graph_order() {
    let graph = graph();
    let group = Group::new(4, vec![1, 0], DeviceSpec::Cpu);
    assert_eq!(group.func_name(&graph), "fn_add_relu_4");
}

#[test]
fn test_invalid_groups() {
    let graph = graph();
    assert_eq!(
        Group::new(2, vec![9], DeviceSpec::Cpu).nodes(&graph).unwrap_err(),
        Error::UnknownNode { group: 2, node: 9 }
    );
    assert_eq!(Group::new(3, vec![], DeviceSpec::Cpu).nodes(&graph).unwrap_err(), Error::EmptyGroup { group: 3 });
}

#[test]
fn test_fingerprint_tracks_content() {
    let graph = graph();
    let a = Group::new(0, vec![0, 1], DeviceSpec::Cpu).fingerprint(&graph).unwrap();
    let b = Group::new(0, vec![1, 0], DeviceSpec::Cpu).fingerprint(&graph).unwrap();
    let c = Group::new(0, vec![0, 1], DeviceSpec::Cuda { device_id: 0 }).fingerprint(&graph).unwrap();
    let d = Group::new(0, vec![0], DeviceSpec::Cpu).fingerprint(&graph).unwrap();

    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_ne!(a, d);
}
