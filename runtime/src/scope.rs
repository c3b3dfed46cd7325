//! Variable scope.
//!
//! The [`Scope`] is the symbol table of a compiled program: it owns one
//! [`Buffer`] descriptor per variable name. Descriptors exist before any
//! memory does; buffer-handler instructions (or eager instantiation) move
//! them between unallocated, allocated and freed.
//!
//! Reuse-map destinations never get a descriptor of their own. The scope
//! records them as aliases and every lookup resolves to the representative.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use kiln_device::{Allocator, Buffer, BufferOptions, BufferState, DeviceSpec, registry};
use kiln_dtype::DType;
use kiln_ir::Graph;
use parking_lot::RwLock;
use snafu::{OptionExt, ResultExt};
use tracing::{debug, trace};

use crate::error::{DeviceSnafu, Result, UnknownVariableSnafu};

/// Scope shared between the compiler, the program and the caller.
pub type SharedScope = Arc<RwLock<Scope>>;

#[derive(Debug)]
pub struct Scope {
    target: DeviceSpec,
    allocator: Arc<dyn Allocator>,
    vars: BTreeMap<String, Buffer>,
    /// Destination -> representative.
    aliases: HashMap<String, String>,
}

impl Scope {
    /// Empty scope using the registered allocator for `target`.
    pub fn new(target: DeviceSpec) -> Result<Self> {
        let allocator = registry().get(&target).context(DeviceSnafu)?;
        Ok(Self::with_allocator(target, allocator))
    }

    pub fn with_allocator(target: DeviceSpec, allocator: Arc<dyn Allocator>) -> Self {
        Self { target, allocator, vars: BTreeMap::new(), aliases: HashMap::new() }
    }

    pub fn shared(self) -> SharedScope {
        Arc::new(RwLock::new(self))
    }

    pub fn target(&self) -> &DeviceSpec {
        &self.target
    }

    /// Add an unallocated descriptor. Existing entries are kept untouched.
    ///
    /// Returns whether a new entry was created.
    pub fn declare(&mut self, name: &str, dtype: DType, shape: &[usize]) -> bool {
        if self.contains(name) {
            return false;
        }
        let buffer = Buffer::new(Arc::clone(&self.allocator), dtype, shape, BufferOptions::default());
        self.vars.insert(name.to_string(), buffer);
        trace!(var = name, %dtype, ?shape, "declared variable");
        true
    }

    /// Name whose buffer backs `name`.
    pub fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases.get(name).map(String::as_str).unwrap_or(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(self.resolve(name))
    }

    pub fn get(&self, name: &str) -> Option<&Buffer> {
        self.vars.get(self.resolve(name))
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Buffer> {
        let key = self.aliases.get(name).cloned().unwrap_or_else(|| name.to_string());
        self.vars.get_mut(&key)
    }

    pub fn state(&self, name: &str) -> Option<BufferState> {
        self.get(name).map(Buffer::state)
    }

    pub fn is_allocated(&self, name: &str) -> bool {
        self.get(name).is_some_and(Buffer::is_allocated)
    }

    /// Back a variable with memory. No-op when already allocated.
    pub fn allocate(&mut self, name: &str) -> Result<()> {
        let buffer = self.get_mut(name).context(UnknownVariableSnafu { var: name })?;
        buffer.allocate().context(DeviceSnafu)
    }

    /// Release a variable's memory, keeping its descriptor.
    pub fn free(&mut self, name: &str) -> Result<()> {
        let buffer = self.get_mut(name).context(UnknownVariableSnafu { var: name })?;
        buffer.free();
        Ok(())
    }

    /// Remove a variable. Its memory, if any, is released.
    pub fn erase(&mut self, name: &str) -> Option<Buffer> {
        let removed = self.vars.remove(name);
        if removed.is_some() {
            self.aliases.retain(|_, representative| representative != name);
        }
        removed
    }

    /// Make `dst` share the buffer of `representative`.
    ///
    /// Any descriptor `dst` had is dropped; callers must reject destinations
    /// that are already allocated.
    pub fn alias(&mut self, dst: &str, representative: &str) {
        if self.vars.remove(dst).is_some() {
            debug!(dst, representative, "dropped descriptor of aliased variable");
        }
        self.aliases.insert(dst.to_string(), representative.to_string());
    }

    pub fn aliases(&self) -> impl Iterator<Item = (&str, &str)> {
        self.aliases.iter().map(|(dst, src)| (dst.as_str(), src.as_str()))
    }

    /// Variable names in order. Aliases are not listed.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Number and total bytes of currently allocated buffers.
    pub fn live_usage(&self) -> (usize, usize) {
        self.vars.values().filter(|b| b.is_allocated()).fold((0, 0), |(n, bytes), b| (n + 1, bytes + b.size()))
    }
}

/// Declare every graph variable in `scope`, creating the scope when absent.
///
/// Variables already in the scope (for example caller-provided inputs) are
/// kept as they are.
pub fn build_scope(graph: &Graph, target: &DeviceSpec, scope: Option<SharedScope>) -> Result<SharedScope> {
    let scope = match scope {
        Some(scope) => scope,
        None => Scope::new(target.clone())?.shared(),
    };

    let declared = {
        let mut guard = scope.write();
        graph.vars().filter(|var| guard.declare(&var.name, var.dtype, &var.shape)).count()
    };
    debug!(device = %target, declared, "built scope");

    Ok(scope)
}
