//! Property tests for lifetime planning and buffer-handler insertion.

use std::collections::{BTreeMap, HashMap, HashSet};

use proptest::prelude::*;

use kiln_dtype::DType;
use kiln_ir::Graph;

use crate::instruction::Instruction;
use crate::test::fixtures::{call, cpu_scope};
use crate::{
    AliasMap, LifetimePlan, LifetimePolicy, Program, Scope, analyze_variable_lifetime, insert_buffer_handlers,
    remove_invalid_variables, resolve_reuse_map,
};

const VARS: [&str; 8] = ["v0", "v1", "v2", "v3", "v4", "v5", "v6", "v7"];

// ============================================================================
// Generators
// ============================================================================

fn arb_var() -> impl Strategy<Value = &'static str> {
    prop::sample::select(VARS.to_vec())
}

fn arb_vars(max: usize) -> impl Strategy<Value = HashSet<&'static str>> {
    prop::collection::hash_set(arb_var(), 0..=max)
}

/// Kernel steps as (inputs, outputs); every step writes at least one variable.
fn arb_steps() -> impl Strategy<Value = Vec<(Vec<&'static str>, Vec<&'static str>)>> {
    let step = (prop::collection::vec(arb_var(), 0..=3), prop::collection::vec(arb_var(), 1..=2));
    prop::collection::vec(step, 0..=8)
}

fn arb_reuse() -> impl Strategy<Value = Vec<(&'static str, &'static str)>> {
    prop::collection::vec((arb_var(), arb_var()), 0..=3)
}

// ============================================================================
// Harness
// ============================================================================

struct Case {
    instructions: Vec<Instruction>,
    scope: Scope,
    fetch: HashSet<String>,
    freeable: HashSet<String>,
    aliases: AliasMap,
}

impl Case {
    fn new(
        steps: &[(Vec<&str>, Vec<&str>)],
        fetch: &HashSet<&str>,
        freeable: &HashSet<&str>,
        reuse: &[(&str, &str)],
    ) -> Self {
        let mut graph = Graph::new();
        let mut scope = cpu_scope();
        for name in VARS {
            graph.declare_var(name, DType::Float32, &[4]).unwrap();
            scope.declare(name, DType::Float32, &[4]);
        }

        let instructions = steps.iter().enumerate().map(|(group, (ins, outs))| call(group, ins, outs)).collect();
        let fetch: HashSet<String> = fetch.iter().map(|s| s.to_string()).collect();
        let freeable = freeable.iter().map(|s| s.to_string()).collect();

        // Conflicting reuse maps are a separate concern; plan without aliases then.
        let reuse: HashMap<String, String> = reuse.iter().map(|(d, s)| (d.to_string(), s.to_string())).collect();
        let aliases = resolve_reuse_map(&reuse, &fetch, &scope, &graph).unwrap_or_default();
        aliases.apply_to(&mut scope);

        Self { instructions, scope, fetch, freeable, aliases }
    }

    fn plan(&self) -> LifetimePlan {
        let policy = LifetimePolicy { fetch_vars: &self.fetch, freeable_vars: &self.freeable, aliases: &self.aliases };
        analyze_variable_lifetime(&self.instructions, &self.scope, &policy)
    }

    /// First and last step touching each representative.
    fn uses(&self) -> BTreeMap<String, (usize, usize)> {
        let mut uses = BTreeMap::new();
        for (step, call) in self.instructions.iter().enumerate().filter_map(|(s, i)| Some((s, i.as_kernel()?))) {
            for var in call.args() {
                let rep = self.aliases.resolve(var).to_string();
                let entry = uses.entry(rep).or_insert((step, step));
                entry.1 = step;
            }
        }
        uses
    }
}

fn occurrences(map: &BTreeMap<usize, Vec<String>>) -> HashMap<&str, usize> {
    let mut counts = HashMap::new();
    for var in map.values().flatten() {
        *counts.entry(var.as_str()).or_insert(0) += 1;
    }
    counts
}

// ============================================================================
// Lifetime Plan Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Every use of a planned variable lies between its malloc and its free.
    #[test]
    fn plan_covers_every_use(steps in arb_steps(), fetch in arb_vars(2), reuse in arb_reuse()) {
        let case = Case::new(&steps, &fetch, &HashSet::new(), &reuse);
        let plan = case.plan();

        for (var, (first, last)) in case.uses() {
            if let Some(malloc) = plan.malloc_step(&var) {
                prop_assert!(malloc <= first, "{var} allocated at {malloc} after use at {first}");
                let free = plan.free_step(&var);
                prop_assert_eq!(free, Some(last), "{} must be freed after its last use", var);
            }
            if let Some(free) = plan.free_step(&var) {
                prop_assert!(free >= last, "{var} freed at {free} before use at {last}");
            }
        }
    }

    /// A variable is allocated at most once and released at most once.
    #[test]
    fn plan_has_single_malloc_and_free(
        steps in arb_steps(),
        fetch in arb_vars(2),
        freeable in arb_vars(3),
        reuse in arb_reuse(),
    ) {
        let case = Case::new(&steps, &fetch, &freeable, &reuse);
        let plan = case.plan();

        prop_assert!(occurrences(&plan.step2malloc).values().all(|&n| n == 1));
        prop_assert!(occurrences(&plan.step2free).values().all(|&n| n == 1));
    }

    /// Fetch variables and reuse destinations never appear in the plan.
    #[test]
    fn plan_skips_fetch_and_alias_destinations(
        steps in arb_steps(),
        fetch in arb_vars(3),
        freeable in arb_vars(3),
        reuse in arb_reuse(),
    ) {
        let case = Case::new(&steps, &fetch, &freeable, &reuse);
        let plan = case.plan();

        for var in plan.step2malloc.values().chain(plan.step2free.values()).flatten() {
            prop_assert!(!case.fetch.contains(var), "fetch variable {} planned", var);
            prop_assert!(!case.aliases.is_destination(var), "reuse destination {} planned", var);
        }
    }

    /// Variables nobody writes are never allocated by the plan.
    #[test]
    fn plan_never_allocates_read_only(steps in arb_steps(), freeable in arb_vars(4)) {
        let case = Case::new(&steps, &HashSet::new(), &freeable, &[]);
        let plan = case.plan();

        let written: HashSet<&str> = steps.iter().flat_map(|(_, outs)| outs.iter().copied()).collect();
        for var in plan.step2malloc.values().flatten() {
            prop_assert!(written.contains(var.as_str()));
        }
        for var in plan.step2free.values().flatten() {
            prop_assert!(written.contains(var.as_str()) || case.freeable.contains(var));
        }
    }

    /// Inserting handlers keeps kernels in their original order.
    #[test]
    fn handlers_preserve_kernel_order(steps in arb_steps(), fetch in arb_vars(2), reuse in arb_reuse()) {
        let case = Case::new(&steps, &fetch, &HashSet::new(), &reuse);
        let plan = case.plan();
        let handlers = plan.step2malloc.len() + plan.step2free.len();

        let out = insert_buffer_handlers(case.instructions.clone(), &plan);
        prop_assert_eq!(out.len(), steps.len() + handlers);
        let groups: Vec<usize> = out.iter().filter_map(Instruction::as_kernel).map(|k| k.group).collect();
        prop_assert_eq!(groups, (0..steps.len()).collect::<Vec<_>>());
    }

    /// With caller-owned buffers allocated up front, replaying the handlers
    /// keeps every kernel argument live.
    #[test]
    fn replay_keeps_arguments_live(
        steps in arb_steps(),
        fetch in arb_vars(2),
        freeable in arb_vars(3),
        reuse in arb_reuse(),
    ) {
        let mut case = Case::new(&steps, &fetch, &freeable, &reuse);
        let plan = case.plan();

        let unplanned: Vec<String> =
            case.scope.names().filter(|v| plan.malloc_step(v).is_none()).map(str::to_string).collect();
        for var in &unplanned {
            case.scope.allocate(var).unwrap();
        }

        let instructions = insert_buffer_handlers(std::mem::take(&mut case.instructions), &plan);
        let program = Program::new(std::mem::replace(&mut case.scope, cpu_scope()).shared(), instructions);
        prop_assert!(program.replay_buffer_handlers().is_ok());
    }

    /// Removing unused variables twice changes nothing the second time.
    #[test]
    fn remove_invalid_is_idempotent(steps in arb_steps(), fetch in arb_vars(3), reuse in arb_reuse()) {
        let mut case = Case::new(&steps, &fetch, &HashSet::new(), &reuse);

        remove_invalid_variables(&case.instructions, &case.fetch, &mut case.scope);
        let remaining: Vec<String> = case.scope.names().map(str::to_string).collect();
        let second = remove_invalid_variables(&case.instructions, &case.fetch, &mut case.scope);

        prop_assert!(second.is_empty());
        prop_assert_eq!(case.scope.names().map(str::to_string).collect::<Vec<_>>(), remaining);
    }
}
