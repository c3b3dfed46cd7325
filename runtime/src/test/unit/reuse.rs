use std::collections::HashMap;

use kiln_dtype::DType;
use kiln_ir::Graph;
use test_case::test_case;

use crate::test::fixtures::*;
use crate::{Error, Scope, resolve_reuse_map};

fn graph() -> Graph {
    let mut graph = Graph::new();
    for name in ["a", "b", "c", "d"] {
        graph.declare_var(name, DType::Float32, &[4]).unwrap();
    }
    graph.declare_var("small", DType::Float32, &[2]).unwrap();
    graph.declare_var("big", DType::Float32, &[8]).unwrap();
    graph
}

fn reuse(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs.iter().map(|(d, s)| (d.to_string(), s.to_string())).collect()
}

#[test]
fn test_chain_collapses_to_root() {
    let aliases = resolve_reuse_map(&reuse(&[("c", "b"), ("b", "a")]), &set(&[]), &cpu_scope(), &graph()).unwrap();

    assert_eq!(aliases.len(), 2);
    assert_eq!(aliases.resolve("c"), "a");
    assert_eq!(aliases.resolve("b"), "a");
    assert_eq!(aliases.resolve("a"), "a");
    assert!(aliases.is_destination("b"));
    assert!(!aliases.is_destination("a"));
}

#[test]
fn test_smaller_destination_fits() {
    let aliases = resolve_reuse_map(&reuse(&[("small", "a")]), &set(&[]), &cpu_scope(), &graph()).unwrap();
    assert_eq!(aliases.resolve("small"), "a");
}

#[test]
fn test_apply_to_scope() {
    let mut scope = scope_with(&["a", "b"]);
    let aliases = resolve_reuse_map(&reuse(&[("b", "a")]), &set(&[]), &scope, &graph()).unwrap();
    aliases.apply_to(&mut scope);

    assert_eq!(scope.resolve("b"), "a");
    assert_eq!(scope.names().collect::<Vec<_>>(), vec!["a"]);
}

#[test_case(&[("a", "a")], &[], "a" ; "self reuse")]
#[test_case(&[("a", "b"), ("b", "a")], &[], "a" ; "cycle")]
#[test_case(&[("a", "b"), ("b", "c"), ("c", "a")], &[], "a" ; "long cycle")]
#[test_case(&[("d", "a")], &["d"], "d" ; "fetch destination")]
#[test_case(&[("big", "a")], &[], "big" ; "destination larger than source")]
#[test_case(&[("a", "ghost")], &[], "a" ; "unknown source")]
fn test_conflicts(pairs: &[(&str, &str)], fetch: &[&str], expected_dst: &str) {
    let err = resolve_reuse_map(&reuse(pairs), &set(fetch), &cpu_scope(), &graph()).unwrap_err();
    assert!(matches!(err, Error::AliasConflict { ref dst, .. } if dst == expected_dst), "{err}");
}

#[test]
fn test_allocated_destination() {
    let mut scope: Scope = scope_with(&["a", "b"]);
    scope.allocate("b").unwrap();

    let err = resolve_reuse_map(&reuse(&[("b", "a")]), &set(&[]), &scope, &graph()).unwrap_err();
    assert!(matches!(err, Error::AliasConflict { ref dst, .. } if dst == "b"));
}

#[test]
fn test_existing_alias_to_same_root_accepted() {
    let mut scope = scope_with(&["a", "b"]);
    scope.alias("b", "a");
    scope.allocate("a").unwrap();

    let aliases = resolve_reuse_map(&reuse(&[("b", "a")]), &set(&[]), &scope, &graph()).unwrap();
    assert_eq!(aliases.resolve("b"), "a");
}

#[test]
fn test_existing_alias_to_other_root() {
    let mut scope = scope_with(&["a", "c"]);
    scope.alias("b", "c");

    let err = resolve_reuse_map(&reuse(&[("b", "a")]), &set(&[]), &scope, &graph()).unwrap_err();
    assert!(matches!(err, Error::AliasConflict { ref reason, .. } if reason.contains("'c'")), "{err}");
}
