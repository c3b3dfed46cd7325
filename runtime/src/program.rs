//! Compiled programs.
//!
//! A [`Program`] is the ordered instruction sequence handed to an execution
//! engine, together with the scope holding its variables. Running kernels is
//! the engine's job; [`Program::replay_buffer_handlers`] only walks the
//! memory side of the program so a plan can be checked without one.

use std::fmt;

use snafu::ensure;
use tracing::{debug, trace};

use crate::error::{Result, ScopeConsistencySnafu};
use crate::instruction::Instruction;
use crate::scope::SharedScope;

/// Memory high-water marks observed while replaying a program.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub peak_live_buffers: usize,
    pub peak_live_bytes: usize,
}

pub struct Program {
    scope: SharedScope,
    instructions: Vec<Instruction>,
}

impl Program {
    pub fn new(scope: SharedScope, instructions: Vec<Instruction>) -> Self {
        Self { scope, instructions }
    }

    pub fn scope(&self) -> &SharedScope {
        &self.scope
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn into_instructions(self) -> Vec<Instruction> {
        self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn kernel_count(&self) -> usize {
        self.instructions.iter().filter(|i| i.is_kernel()).count()
    }

    /// Apply every malloc/free to the scope in program order.
    ///
    /// Fails with a scope-consistency error at the first kernel whose
    /// argument is missing from the scope or not allocated when reached.
    pub fn replay_buffer_handlers(&self) -> Result<MemoryStats> {
        let mut scope = self.scope.write();
        let mut stats = MemoryStats::default();
        let mut record = |usage: (usize, usize)| {
            stats.peak_live_buffers = stats.peak_live_buffers.max(usage.0);
            stats.peak_live_bytes = stats.peak_live_bytes.max(usage.1);
        };
        record(scope.live_usage());

        for (step, instruction) in self.instructions.iter().enumerate() {
            match instruction {
                Instruction::Malloc { vars } => {
                    for var in vars {
                        scope.allocate(var)?;
                    }
                    record(scope.live_usage());
                }
                Instruction::Free { vars } => {
                    for var in vars {
                        scope.free(var)?;
                    }
                }
                Instruction::Kernel(call) => {
                    for var in call.args() {
                        ensure!(scope.is_allocated(var), ScopeConsistencySnafu { var, step });
                    }
                    trace!(step, kernel = call.name(), "kernel arguments live");
                }
            }
        }

        debug!(
            instructions = self.instructions.len(),
            peak_buffers = stats.peak_live_buffers,
            peak_bytes = stats.peak_live_bytes,
            "replayed buffer handlers"
        );
        Ok(stats)
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("instructions", &self.instructions.len())
            .field("kernels", &self.kernel_count())
            .finish()
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for instruction in &self.instructions {
            writeln!(f, "{instruction}")?;
        }
        Ok(())
    }
}
