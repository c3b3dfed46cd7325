//! Scope maintenance passes run after instruction building.

use std::collections::{BTreeSet, HashSet};

use snafu::ensure;
use tracing::debug;

use crate::error::{Result, ScopeConsistencySnafu};
use crate::instruction::Instruction;
use crate::scope::Scope;

/// Allocate every kernel argument that has no memory yet.
///
/// Returns the number of buffers allocated; zero on a second run.
#[tracing::instrument(skip_all)]
pub fn instantiate_variables(instructions: &[Instruction], scope: &mut Scope) -> Result<usize> {
    let mut allocated = 0;
    for (step, call) in instructions.iter().enumerate().filter_map(|(s, i)| Some((s, i.as_kernel()?))) {
        for var in call.args() {
            ensure!(scope.contains(var), ScopeConsistencySnafu { var, step });
            if !scope.is_allocated(var) {
                scope.allocate(var)?;
                allocated += 1;
            }
        }
    }
    debug!(allocated, "instantiated variables");
    Ok(allocated)
}

/// Erase scope variables no instruction touches, except fetch variables.
///
/// Returns the erased names in order.
#[tracing::instrument(skip_all)]
pub fn remove_invalid_variables(
    instructions: &[Instruction],
    fetch_vars: &HashSet<String>,
    scope: &mut Scope,
) -> Vec<String> {
    let referenced: HashSet<String> = instructions
        .iter()
        .filter_map(Instruction::as_kernel)
        .flat_map(|call| call.args())
        .chain(fetch_vars.iter().map(String::as_str))
        .map(|var| scope.resolve(var).to_string())
        .collect();

    let dead: BTreeSet<String> = scope.names().filter(|name| !referenced.contains(*name)).map(str::to_string).collect();
    for name in &dead {
        scope.erase(name);
    }

    debug!(removed = dead.len(), remaining = scope.len(), "removed unused variables");
    dead.into_iter().collect()
}
