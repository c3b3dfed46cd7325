//! Buffer reuse (aliasing).
//!
//! A reuse map entry `dst -> src` says `dst` is written into the buffer of
//! `src`. Chains collapse to a single representative, the root that reuses
//! nothing. Resolution happens once, before liveness analysis; afterwards
//! every pass only asks [`AliasMap::resolve`].

use std::collections::{BTreeMap, HashMap, HashSet};

use kiln_ir::Graph;
use snafu::ensure;
use tracing::debug;

use crate::error::{AliasConflictSnafu, Result};
use crate::scope::Scope;

/// Resolved reuse map: destination -> representative.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasMap {
    representative: BTreeMap<String, String>,
}

impl AliasMap {
    pub fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        self.representative.get(name).map(String::as_str).unwrap_or(name)
    }

    pub fn is_destination(&self, name: &str) -> bool {
        self.representative.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.representative.iter().map(|(dst, rep)| (dst.as_str(), rep.as_str()))
    }

    pub fn len(&self) -> usize {
        self.representative.len()
    }

    pub fn is_empty(&self) -> bool {
        self.representative.is_empty()
    }

    /// Record every alias in the scope.
    pub fn apply_to(&self, scope: &mut Scope) {
        for (dst, rep) in self.iter() {
            scope.alias(dst, rep);
        }
    }
}

/// Validate a reuse map and collapse its chains.
///
/// A destination may not reuse itself, be part of a cycle, be a fetch
/// variable, be already allocated by the caller, or need more bytes than
/// its representative holds. Aliases the scope already records are accepted
/// when they lead to the same representative.
pub fn resolve_reuse_map(
    reuse: &HashMap<String, String>,
    fetch_vars: &HashSet<String>,
    scope: &Scope,
    graph: &Graph,
) -> Result<AliasMap> {
    let conflict = |dst: &str, src: &str, reason: String| AliasConflictSnafu { dst, src, reason }.fail();

    let mut entries: Vec<_> = reuse.iter().collect();
    entries.sort();

    let mut map = AliasMap::default();
    for (dst, src) in entries {
        ensure!(dst != src, AliasConflictSnafu { dst, src, reason: "a variable cannot reuse itself" });
        ensure!(!fetch_vars.contains(dst), AliasConflictSnafu { dst, src, reason: "destination is a fetch variable" });

        let mut seen = HashSet::from([dst.as_str()]);
        let mut root = src.as_str();
        while let Some(next) = reuse.get(root) {
            if !seen.insert(root) {
                return conflict(dst, src, format!("reuse chain through '{root}' forms a cycle"));
            }
            root = next;
        }

        // A scope kept from an earlier build already holds this alias.
        let current = scope.resolve(dst);
        if current != dst.as_str() {
            ensure!(
                current == root,
                AliasConflictSnafu { dst, src, reason: format!("destination already shares the buffer of '{current}'") }
            );
        } else {
            ensure!(
                !scope.is_allocated(dst),
                AliasConflictSnafu { dst, src, reason: "destination is already allocated by the caller" }
            );
        }
        let size = |name: &str| {
            size_of(name, scope, graph)
                .ok_or_else(|| AliasConflictSnafu { dst, src, reason: format!("unknown variable '{name}'") }.build())
        };
        let (needed, available) = (size(dst)?, size(root)?);
        if needed > available {
            return conflict(dst, src, format!("needs {needed} bytes but '{root}' holds {available}"));
        }

        map.representative.insert(dst.clone(), root.to_string());
    }

    debug!(aliases = map.len(), "resolved reuse map");
    Ok(map)
}

fn size_of(name: &str, scope: &Scope, graph: &Graph) -> Option<usize> {
    scope.get(name).map(|b| b.size()).or_else(|| graph.var(name).ok().map(|v| v.size_in_bytes()))
}
