//! Compiled artifact cache.
//!
//! Maps (group, content hash, device) to the module compiled for it, so a
//! recompile of an unchanged group reuses its source, device text and kernel
//! handles. Backed by papaya's lock-free HashMap: groups compiled in
//! parallel look up and insert without explicit synchronization.
//!
//! The content hash covers the group and its lowered functions, so a changed
//! group can never hit a stale entry. Tuning still evicts the old entries of
//! replaced groups through [`KernelCache::invalidate_group`] to keep the
//! cache from growing across tuning rounds.

use std::fmt;
use std::sync::Arc;

use kiln_codegen::CompiledModule;
use kiln_ir::GroupId;
use papaya::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub group: GroupId,
    pub content: u64,
    /// Canonical device string (e.g. "CPU", "CUDA:0").
    pub device: String,
}

#[derive(Default)]
pub struct KernelCache {
    entries: HashMap<ArtifactKey, Arc<CompiledModule>>,
}

impl KernelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ArtifactKey) -> Option<Arc<CompiledModule>> {
        let guard = self.entries.guard();
        self.entries.get(key, &guard).cloned()
    }

    /// Get or compile the module for `key`.
    ///
    /// If several threads race on the same key, the first insert wins and
    /// every caller receives that module.
    pub fn get_or_compile<F, E>(&self, key: ArtifactKey, compile_fn: F) -> Result<Arc<CompiledModule>, E>
    where
        F: FnOnce() -> Result<CompiledModule, E>,
    {
        let guard = self.entries.guard();

        if let Some(cached) = self.entries.get(&key, &guard) {
            return Ok(Arc::clone(cached));
        }

        let compiled = Arc::new(compile_fn()?);

        use papaya::{Compute, Operation};
        match self.entries.compute(
            key,
            |entry| match entry {
                Some((_, existing)) => Operation::Abort(Arc::clone(existing)),
                None => Operation::Insert(Arc::clone(&compiled)),
            },
            &guard,
        ) {
            Compute::Inserted(_, module) => Ok(Arc::clone(module)),
            Compute::Aborted(module) => Ok(module),
            _ => Ok(compiled),
        }
    }

    /// Drop every entry compiled for `group`. Returns how many were removed.
    pub fn invalidate_group(&self, group: GroupId) -> usize {
        let guard = self.entries.guard();
        let stale: Vec<ArtifactKey> =
            self.entries.iter(&guard).filter(|(key, _)| key.group == group).map(|(key, _)| key.clone()).collect();
        for key in &stale {
            self.entries.remove(key, &guard);
        }
        stale.len()
    }

    pub fn contains_group(&self, group: GroupId) -> bool {
        let guard = self.entries.guard();
        self.entries.iter(&guard).any(|(key, _)| key.group == group)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        let guard = self.entries.guard();
        self.entries.clear(&guard);
    }
}

impl fmt::Debug for KernelCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelCache").field("entries", &self.len()).finish()
    }
}
