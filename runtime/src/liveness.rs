//! Variable liveness and buffer-handler insertion.
//!
//! Steps are instruction indices. For every managed variable the planner
//! finds the first and last step using it; the variable is allocated right
//! before its first step and released right after its last.
//!
//! # Managed variables
//!
//! - Fetch variables are never planned: they must outlive the program.
//! - Reuse destinations are never planned themselves; their uses count
//!   toward their representative.
//! - Caller-owned variables (not written by any kernel, or already allocated
//!   when planning starts) are never allocated by the plan and are freed
//!   only when listed as freeable.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, trace};

use crate::instruction::Instruction;
use crate::reuse::AliasMap;
use crate::scope::Scope;

/// Ownership rules consulted by [`analyze_variable_lifetime`].
#[derive(Debug, Clone, Copy)]
pub struct LifetimePolicy<'a> {
    pub fetch_vars: &'a HashSet<String>,
    pub freeable_vars: &'a HashSet<String>,
    pub aliases: &'a AliasMap,
}

/// Allocation and release points, keyed by step. Names are sorted within a step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LifetimePlan {
    pub step2malloc: BTreeMap<usize, Vec<String>>,
    pub step2free: BTreeMap<usize, Vec<String>>,
}

impl LifetimePlan {
    pub fn malloc_step(&self, var: &str) -> Option<usize> {
        find_step(&self.step2malloc, var)
    }

    pub fn free_step(&self, var: &str) -> Option<usize> {
        find_step(&self.step2free, var)
    }

    pub fn is_empty(&self) -> bool {
        self.step2malloc.is_empty() && self.step2free.is_empty()
    }
}

fn find_step(map: &BTreeMap<usize, Vec<String>>, var: &str) -> Option<usize> {
    map.iter().find(|(_, vars)| vars.iter().any(|v| v == var)).map(|(&step, _)| step)
}

#[derive(Debug, Clone, Copy)]
struct Interval {
    first: usize,
    last: usize,
    written: bool,
}

/// Compute the step at which each managed variable is allocated and freed.
#[tracing::instrument(skip_all, fields(instructions = instructions.len()))]
pub fn analyze_variable_lifetime(
    instructions: &[Instruction],
    scope: &Scope,
    policy: &LifetimePolicy<'_>,
) -> LifetimePlan {
    let mut intervals: BTreeMap<&str, Interval> = BTreeMap::new();

    for (step, call) in instructions.iter().enumerate().filter_map(|(s, i)| Some((s, i.as_kernel()?))) {
        let args = call.inputs.iter().map(|v| (v, false)).chain(call.outputs.iter().map(|v| (v, true)));
        for (name, written) in args {
            let rep = policy.aliases.resolve(name);
            if policy.fetch_vars.contains(rep) {
                continue;
            }
            intervals
                .entry(rep)
                .and_modify(|iv| {
                    iv.first = iv.first.min(step);
                    iv.last = iv.last.max(step);
                    iv.written |= written;
                })
                .or_insert(Interval { first: step, last: step, written });
        }
    }

    let mut plan = LifetimePlan::default();
    for (name, iv) in intervals {
        let caller_owned = !iv.written || scope.is_allocated(name);
        if caller_owned {
            if policy.freeable_vars.contains(name) {
                plan.step2free.entry(iv.last).or_default().push(name.to_string());
            }
            trace!(var = name, "caller-owned, not allocated by plan");
            continue;
        }
        trace!(var = name, first = iv.first, last = iv.last, "planned");
        plan.step2malloc.entry(iv.first).or_default().push(name.to_string());
        plan.step2free.entry(iv.last).or_default().push(name.to_string());
    }

    debug!(malloc_steps = plan.step2malloc.len(), free_steps = plan.step2free.len(), "analyzed variable lifetimes");
    plan
}

/// Interleave malloc/free instructions with the original sequence.
///
/// `plan` steps refer to positions in `instructions`; the original order is
/// kept and handlers are placed while rebuilding left to right.
pub fn insert_buffer_handlers(instructions: Vec<Instruction>, plan: &LifetimePlan) -> Vec<Instruction> {
    let handlers = plan.step2malloc.len() + plan.step2free.len();
    let mut out = Vec::with_capacity(instructions.len() + handlers);

    for (step, instruction) in instructions.into_iter().enumerate() {
        if let Some(vars) = plan.step2malloc.get(&step).filter(|v| !v.is_empty()) {
            out.push(Instruction::Malloc { vars: vars.clone() });
        }
        out.push(instruction);
        if let Some(vars) = plan.step2free.get(&step).filter(|v| !v.is_empty()) {
            out.push(Instruction::Free { vars: vars.clone() });
        }
    }

    debug!(total = out.len(), handlers, "inserted buffer handlers");
    out
}
