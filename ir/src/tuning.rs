//! Tuning results produced outside the compiler.

use crate::group::Group;
use crate::lowered::LoweredFunc;

/// Replacement compilation inputs from an auto-tuner.
///
/// `lowered_funcs[i]` belongs to `groups[i]`; an empty entry asks the
/// compiler to lower that group itself.
#[derive(Debug, Clone, Default)]
pub struct TuningResult {
    pub groups: Vec<Group>,
    pub lowered_funcs: Vec<Vec<LoweredFunc>>,
}

impl TuningResult {
    pub fn new(groups: Vec<Group>, lowered_funcs: Vec<Vec<LoweredFunc>>) -> Self {
        Self { groups, lowered_funcs }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
