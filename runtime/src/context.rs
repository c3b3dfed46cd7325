//! Compilation inputs and policy.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bon::bon;
use kiln_device::DeviceSpec;
use kiln_ir::{Graph, Group, GroupId, LoweredFunc, TuningResult};
use snafu::ensure;
use tracing::debug;

use crate::error::{GroupMismatchSnafu, Result};
use crate::kernel_cache::KernelCache;
use crate::scope::SharedScope;

/// Memory and scheduling policy for one compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    /// Allocate every variable up front and never free during execution.
    pub with_instantiate_variables: bool,
    /// Plan variable lifetimes and interleave malloc/free instructions.
    pub with_buffer_handle_instruction_inserted: bool,
    /// Erase scope variables no instruction references.
    pub remove_unused_variables: bool,
    /// Lower and compile groups on the rayon pool.
    pub parallel_compile: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            with_instantiate_variables: false,
            with_buffer_handle_instruction_inserted: false,
            remove_unused_variables: true,
            parallel_compile: false,
        }
    }
}

#[bon]
impl CompileOptions {
    /// Create compile options with builder pattern.
    #[builder]
    pub fn new(
        #[builder(default = false)] with_instantiate_variables: bool,
        #[builder(default = false)] with_buffer_handle_instruction_inserted: bool,
        #[builder(default = true)] remove_unused_variables: bool,
        #[builder(default = false)] parallel_compile: bool,
    ) -> Self {
        Self {
            with_instantiate_variables,
            with_buffer_handle_instruction_inserted,
            remove_unused_variables,
            parallel_compile,
        }
    }

    /// Create options from environment variables.
    ///
    /// # Environment Variables
    ///
    /// * `KILN_INSTANTIATE_VARS` - Eagerly allocate every variable
    /// * `KILN_BUFFER_HANDLERS` - Insert malloc/free instructions
    /// * `KILN_KEEP_UNUSED_VARS` - Keep variables no instruction references
    /// * `KILN_PARALLEL_COMPILE` - Compile groups in parallel
    pub fn from_env() -> Self {
        Self {
            with_instantiate_variables: std::env::var("KILN_INSTANTIATE_VARS").is_ok(),
            with_buffer_handle_instruction_inserted: std::env::var("KILN_BUFFER_HANDLERS").is_ok(),
            remove_unused_variables: std::env::var("KILN_KEEP_UNUSED_VARS").is_err(),
            parallel_compile: std::env::var("KILN_PARALLEL_COMPILE").is_ok(),
        }
    }
}

/// Everything one compile request needs.
///
/// `lowered_funcs` is either empty or parallel to `groups`; an empty entry
/// means "lower this group from scratch". Tuning replaces `groups` and
/// `lowered_funcs` through [`CompilationContext::apply`], never while a
/// build is running (the compiler holds the context by shared reference).
#[derive(Debug)]
pub struct CompilationContext {
    pub target: DeviceSpec,
    pub graph: Arc<Graph>,
    pub scope: SharedScope,
    pub groups: Vec<Group>,
    pub lowered_funcs: Vec<Vec<LoweredFunc>>,
    /// Variables that must stay alive after the program ends.
    pub fetch_var_ids: HashSet<String>,
    /// Destination -> source buffer reuse.
    pub reuse_vars_map: HashMap<String, String>,
    /// Caller-owned variables the program may release after their last use.
    pub freeable_vars: HashSet<String>,
    pub options: CompileOptions,
    /// Previously emitted source; when set, lowering and codegen are skipped.
    pub attached_code: Option<String>,
    pub cache: Arc<KernelCache>,
}

#[bon]
impl CompilationContext {
    #[builder]
    pub fn new(
        target: DeviceSpec,
        graph: Arc<Graph>,
        scope: SharedScope,
        groups: Vec<Group>,
        #[builder(default)] lowered_funcs: Vec<Vec<LoweredFunc>>,
        #[builder(default)] fetch_var_ids: HashSet<String>,
        #[builder(default)] reuse_vars_map: HashMap<String, String>,
        #[builder(default)] freeable_vars: HashSet<String>,
        #[builder(default)] options: CompileOptions,
        attached_code: Option<String>,
        #[builder(default)] cache: Arc<KernelCache>,
    ) -> Self {
        Self {
            target,
            graph,
            scope,
            groups,
            lowered_funcs,
            fetch_var_ids,
            reuse_vars_map,
            freeable_vars,
            options,
            attached_code,
            cache,
        }
    }

    /// Pre-supplied lowered functions for group `index`, if any.
    pub fn supplied_funcs(&self, index: usize) -> Option<&[LoweredFunc]> {
        self.lowered_funcs.get(index).filter(|funcs| !funcs.is_empty()).map(Vec::as_slice)
    }

    /// `lowered_funcs` must be empty or parallel to `groups`.
    pub fn check_alignment(&self) -> Result<()> {
        let (groups, funcs) = (self.groups.len(), self.lowered_funcs.len());
        ensure!(funcs == 0 || funcs == groups, GroupMismatchSnafu { groups, funcs });
        Ok(())
    }

    /// Replace groups and lowered functions with a tuning result.
    ///
    /// Groups are matched by id. Cached artifacts of every group that was
    /// removed, added, or whose nodes or functions changed are evicted;
    /// groups that only moved keep theirs. Returns the ids of the changed
    /// groups.
    pub fn apply(&mut self, tuning: TuningResult) -> Result<Vec<GroupId>> {
        let (groups, funcs) = (tuning.groups.len(), tuning.lowered_funcs.len());
        ensure!(funcs == 0 || funcs == groups, GroupMismatchSnafu { groups, funcs });

        let previous: HashMap<GroupId, (&Group, &[LoweredFunc])> = self
            .groups
            .iter()
            .enumerate()
            .map(|(i, group)| (group.id(), (group, funcs_at(&self.lowered_funcs, i))))
            .collect();

        let mut changed = Vec::new();
        for (i, group) in tuning.groups.iter().enumerate() {
            let unchanged = previous
                .get(&group.id())
                .is_some_and(|&(old, old_funcs)| old == group && old_funcs == funcs_at(&tuning.lowered_funcs, i));
            if !unchanged && !changed.contains(&group.id()) {
                changed.push(group.id());
            }
        }
        let mut removed: Vec<GroupId> =
            previous.keys().copied().filter(|id| !tuning.groups.iter().any(|g| g.id() == *id)).collect();
        removed.sort_unstable();
        changed.extend(removed);

        for &group in &changed {
            let evicted = self.cache.invalidate_group(group);
            debug!(group, evicted, "invalidated cached artifacts");
        }

        self.groups = tuning.groups;
        self.lowered_funcs = tuning.lowered_funcs;
        debug!(groups = self.groups.len(), changed = ?changed, "applied tuning result");
        Ok(changed)
    }

    /// Variables that group interfaces must export even when only used inside a group.
    pub fn pinned_vars(&self) -> HashSet<String> {
        self.fetch_var_ids
            .iter()
            .chain(self.reuse_vars_map.keys())
            .chain(self.reuse_vars_map.values())
            .chain(self.freeable_vars.iter())
            .cloned()
            .collect()
    }
}

fn funcs_at(lists: &[Vec<LoweredFunc>], index: usize) -> &[LoweredFunc] {
    lists.get(index).map(Vec::as_slice).unwrap_or_default()
}
