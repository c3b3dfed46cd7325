//! Graph compiler pipeline.
//!
//! ```text
//! CompilationContext
//!   → lowering          groups → lowered functions        (parallel per group)
//!   → codegen_and_jit   lowered functions → modules       (parallel per group, cached)
//!   → build_instruction modules → kernel instructions     (group order)
//!   → remove unused / instantiate / liveness + handlers
//!   → Program
//! ```
//!
//! Each stage returns a typed value consumed by the next; a stage either
//! succeeds for every group or fails as a whole. Parallel stages collect
//! their per-group results back into group order.

use std::collections::HashSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use kiln_codegen::{Backend, CompiledKernel, CompiledModule, UnsupportedTargetSnafu};
use kiln_dtype::DType;
use kiln_ir::{GroupId, LoweredFunc};
use rayon::prelude::*;
use snafu::{ResultExt, ensure};
use tracing::{debug, trace};

use crate::context::CompilationContext;
use crate::error::{CodegenSnafu, GraphSnafu, GroupMismatchSnafu, LoadCodeSnafu, Result, ScopeConsistencySnafu};
use crate::instruction::{ArgList, Instruction, KernelCall};
use crate::kernel_cache::ArtifactKey;
use crate::lifecycle::{instantiate_variables, remove_invalid_variables};
use crate::liveness::{LifetimePlan, LifetimePolicy, analyze_variable_lifetime, insert_buffer_handlers};
use crate::lowering::OpLoweringRegistry;
use crate::program::Program;
use crate::reuse::{AliasMap, resolve_reuse_map};
use crate::scope::Scope;

/// Where [`GraphCompiler::build`] stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CompileStage {
    /// Run every stage and produce a program.
    #[default]
    Default,
    Lowering,
    CodegenAndJit,
    BuildInstruction,
}

/// Output of one build. Fields a stopped build never reached stay empty.
#[derive(Debug, Default)]
pub struct CompilationResult {
    pub program: Option<Program>,
    /// `lowered_funcs[i]` belongs to group `i`.
    pub lowered_funcs: Vec<Vec<LoweredFunc>>,
    /// Emitted source per group.
    pub source_codes: Vec<String>,
    /// Device text (PTX) per group, for accelerator targets.
    pub source_ptxs: Vec<Option<String>>,
    /// Kernel instructions before buffer-handler insertion.
    pub instructions: Vec<Instruction>,
    pub lifetime_plan: Option<LifetimePlan>,
}

pub struct GraphCompiler {
    context: CompilationContext,
    backend: Arc<dyn Backend>,
    registry: Arc<OpLoweringRegistry>,
}

impl GraphCompiler {
    pub fn new(context: CompilationContext, backend: Arc<dyn Backend>) -> Self {
        Self { context, backend, registry: Arc::new(OpLoweringRegistry::with_builtins()) }
    }

    pub fn with_registry(mut self, registry: Arc<OpLoweringRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn context(&self) -> &CompilationContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut CompilationContext {
        &mut self.context
    }

    pub fn into_context(self) -> CompilationContext {
        self.context
    }

    pub fn registry(&self) -> &OpLoweringRegistry {
        &self.registry
    }

    /// Run the pipeline up to `stage`.
    ///
    /// Attached code in the context takes the fast path of
    /// [`GraphCompiler::build_from_code`].
    #[tracing::instrument(skip_all, fields(groups = self.context.groups.len(), stage = ?stage))]
    pub fn build(&self, stage: CompileStage) -> Result<CompilationResult> {
        if let Some(code) = self.context.attached_code.as_deref().filter(|c| !c.is_empty()) {
            return self.build_from_code(code);
        }

        self.context.check_alignment()?;
        let aliases = self.resolve_aliases()?;

        let lowered_funcs = self.lowering()?;
        if stage == CompileStage::Lowering {
            return Ok(CompilationResult { lowered_funcs, ..Default::default() });
        }

        let modules = self.codegen_and_jit(&lowered_funcs)?;
        let source_codes = modules.iter().map(|m| m.source.clone()).collect();
        let source_ptxs = modules.iter().map(|m| m.device_text.clone()).collect();
        if stage == CompileStage::CodegenAndJit {
            return Ok(CompilationResult { lowered_funcs, source_codes, source_ptxs, ..Default::default() });
        }

        let instructions = self.build_instruction(&lowered_funcs, &modules, &aliases)?;
        if stage == CompileStage::BuildInstruction {
            return Ok(CompilationResult { lowered_funcs, source_codes, source_ptxs, instructions, ..Default::default() });
        }

        let (program, lifetime_plan) = self.finalize(instructions.clone(), &aliases)?;
        debug!(instructions = program.len(), kernels = program.kernel_count(), "built program");
        Ok(CompilationResult {
            program: Some(program),
            lowered_funcs,
            source_codes,
            source_ptxs,
            instructions,
            lifetime_plan,
        })
    }

    /// Build from previously emitted source, skipping lowering and codegen.
    ///
    /// Each group binds to the kernel named after the group's function name,
    /// with the group's boundary variables as arguments.
    #[tracing::instrument(skip_all, fields(groups = self.context.groups.len(), code_len = code.len()))]
    pub fn build_from_code(&self, code: &str) -> Result<CompilationResult> {
        let ctx = &self.context;
        ctx.check_alignment()?;
        let aliases = self.resolve_aliases()?;

        let module = self.backend.load(code, &ctx.target).context(LoadCodeSnafu)?;
        let graph = &ctx.graph;
        let pinned = ctx.pinned_vars();

        let mut scope = ctx.scope.write();
        aliases.apply_to(&mut scope);
        let mut binder = Binder::new(&mut scope, ctx.options.with_instantiate_variables);
        for group in &ctx.groups {
            let interface = group.interface(graph, &pinned).context(GraphSnafu)?;
            let kernel = module.kernel(&group.func_name(graph)).context(CodegenSnafu { group: group.id() })?;
            let outputs = interface
                .outputs
                .iter()
                .map(|name| {
                    let var = graph.var(name).context(GraphSnafu)?;
                    Ok(Written { name, dtype: var.dtype, shape: &var.shape })
                })
                .collect::<Result<Vec<_>>>()?;
            binder.bind(group.id(), kernel, interface.inputs.iter().map(String::as_str), &outputs)?;
        }
        let instructions = binder.finish();
        drop(scope);

        let (program, lifetime_plan) = self.finalize(instructions.clone(), &aliases)?;
        debug!(instructions = program.len(), "built program from attached code");
        Ok(CompilationResult {
            program: Some(program),
            lowered_funcs: vec![Vec::new(); ctx.groups.len()],
            instructions,
            lifetime_plan,
            ..Default::default()
        })
    }

    /// Lower every group not carrying pre-supplied functions.
    #[tracing::instrument(skip_all)]
    pub fn lowering(&self) -> Result<Vec<Vec<LoweredFunc>>> {
        let ctx = &self.context;
        let pinned = ctx.pinned_vars();
        let lowered = self.per_group(|i| {
            if let Some(funcs) = ctx.supplied_funcs(i) {
                trace!(group = ctx.groups[i].id(), funcs = funcs.len(), "using supplied lowered functions");
                return Ok(funcs.to_vec());
            }
            self.registry.lower_group(&ctx.graph, &ctx.groups[i], &pinned)
        })?;
        debug!(funcs = lowered.iter().map(Vec::len).sum::<usize>(), "lowering complete");
        Ok(lowered)
    }

    /// Compile each group's functions into a module, reusing cached artifacts.
    #[tracing::instrument(skip_all)]
    pub fn codegen_and_jit(&self, lowered: &[Vec<LoweredFunc>]) -> Result<Vec<Arc<CompiledModule>>> {
        let ctx = &self.context;
        let (groups, funcs) = (ctx.groups.len(), lowered.len());
        ensure!(groups == funcs, GroupMismatchSnafu { groups, funcs });

        self.per_group(|i| {
            let group = &ctx.groups[i];
            let target = group.target();
            let funcs = &lowered[i];

            if !self.backend.supports(target) {
                return Err(UnsupportedTargetSnafu { backend: self.backend.name(), device: target.to_string() }.build())
                    .context(CodegenSnafu { group: group.id() });
            }

            let mut hasher = DefaultHasher::new();
            group.fingerprint(&ctx.graph).context(GraphSnafu)?.hash(&mut hasher);
            LoweredFunc::fingerprint(funcs).hash(&mut hasher);
            let key = ArtifactKey { group: group.id(), content: hasher.finish(), device: target.canonicalize() };

            ctx.cache
                .get_or_compile(key, || {
                    debug!(group = group.id(), backend = self.backend.name(), device = %target, "compiling group");
                    self.backend.compile(funcs, target)
                })
                .context(CodegenSnafu { group: group.id() })
        })
    }

    /// Bind each lowered function to its kernel, in group order.
    ///
    /// Outputs and temporaries missing from the scope are declared from
    /// their parameter. An input must be in the scope or written by an
    /// earlier instruction.
    #[tracing::instrument(skip_all)]
    pub fn build_instruction(
        &self,
        lowered: &[Vec<LoweredFunc>],
        modules: &[Arc<CompiledModule>],
        aliases: &AliasMap,
    ) -> Result<Vec<Instruction>> {
        let ctx = &self.context;
        let (groups, funcs) = (ctx.groups.len(), lowered.len().min(modules.len()));
        ensure!(groups == funcs, GroupMismatchSnafu { groups, funcs });

        let mut scope = ctx.scope.write();
        aliases.apply_to(&mut scope);
        let mut binder = Binder::new(&mut scope, ctx.options.with_instantiate_variables);
        for ((group, funcs), module) in ctx.groups.iter().zip(lowered).zip(modules) {
            for func in funcs {
                let kernel = module.kernel(&func.name).context(CodegenSnafu { group: group.id() })?;
                let outputs: Vec<_> =
                    func.written().map(|p| Written { name: &p.name, dtype: p.dtype, shape: &p.shape }).collect();
                binder.bind(group.id(), kernel, func.inputs().map(|p| p.name.as_str()), &outputs)?;
            }
        }
        Ok(binder.finish())
    }

    fn resolve_aliases(&self) -> Result<AliasMap> {
        let ctx = &self.context;
        let scope = ctx.scope.read();
        resolve_reuse_map(&ctx.reuse_vars_map, &ctx.fetch_var_ids, &scope, &ctx.graph)
    }

    /// Run the variable lifecycle passes selected by the options.
    fn finalize(&self, instructions: Vec<Instruction>, aliases: &AliasMap) -> Result<(Program, Option<LifetimePlan>)> {
        let ctx = &self.context;
        let options = ctx.options;
        let mut scope = ctx.scope.write();

        if options.remove_unused_variables {
            remove_invalid_variables(&instructions, &ctx.fetch_var_ids, &mut scope);
        }
        if options.with_instantiate_variables {
            instantiate_variables(&instructions, &mut scope)?;
        }

        let (instructions, plan) = if options.with_buffer_handle_instruction_inserted {
            let policy =
                LifetimePolicy { fetch_vars: &ctx.fetch_var_ids, freeable_vars: &ctx.freeable_vars, aliases };
            let plan = analyze_variable_lifetime(&instructions, &scope, &policy);

            // Fetch variables are outside the plan and live for the whole program.
            let mut fetch: Vec<_> = ctx.fetch_var_ids.iter().filter(|v| scope.contains(v)).collect();
            fetch.sort();
            for var in fetch {
                scope.allocate(var)?;
            }

            (insert_buffer_handlers(instructions, &plan), Some(plan))
        } else {
            (instructions, None)
        };
        drop(scope);

        Ok((Program::new(Arc::clone(&ctx.scope), instructions), plan))
    }

    /// Run `f` for every group index, in parallel when enabled, keeping group order.
    fn per_group<T, F>(&self, f: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(usize) -> Result<T> + Send + Sync,
    {
        let groups = self.context.groups.len();
        if self.context.options.parallel_compile {
            (0..groups).into_par_iter().map(f).collect()
        } else {
            (0..groups).map(f).collect()
        }
    }
}

/// A variable written by a kernel.
struct Written<'a> {
    name: &'a str,
    dtype: DType,
    shape: &'a [usize],
}

/// Turns bound kernels into instructions, tracking what earlier ones wrote.
struct Binder<'s> {
    scope: &'s mut Scope,
    eager: bool,
    produced: HashSet<String>,
    instructions: Vec<Instruction>,
}

impl<'s> Binder<'s> {
    fn new(scope: &'s mut Scope, eager: bool) -> Self {
        Self { scope, eager, produced: HashSet::new(), instructions: Vec::new() }
    }

    fn bind<'a>(
        &mut self,
        group: GroupId,
        kernel: Arc<dyn CompiledKernel>,
        inputs: impl Iterator<Item = &'a str>,
        outputs: &[Written<'_>],
    ) -> Result<()> {
        let step = self.instructions.len();

        let inputs: ArgList = inputs.map(str::to_string).collect();
        for var in &inputs {
            let known = self.produced.contains(self.scope.resolve(var)) || self.scope.contains(var);
            ensure!(known, ScopeConsistencySnafu { var, step });
        }

        for out in outputs {
            self.scope.declare(out.name, out.dtype, out.shape);
            if self.eager {
                self.scope.allocate(out.name)?;
            }
            self.produced.insert(self.scope.resolve(out.name).to_string());
        }

        trace!(step, group, kernel = kernel.name(), "bound instruction");
        self.instructions.push(Instruction::Kernel(KernelCall {
            group,
            kernel,
            inputs,
            outputs: outputs.iter().map(|w| w.name.to_string()).collect(),
        }));
        Ok(())
    }

    fn finish(self) -> Vec<Instruction> {
        self.instructions
    }
}
