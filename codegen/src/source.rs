//! Source-emitting backend.
//!
//! [`SourceBackend`] renders each lowered function with [`CRenderer`] and
//! returns handles naming the emitted entry points. For accelerator targets
//! the concatenated CUDA C is passed to a [`DeviceAssembler`] (an external
//! toolchain such as NVRTC) whose output becomes the module's device text.

use std::fmt;
use std::sync::Arc;

use kiln_device::DeviceSpec;
use kiln_ir::LoweredFunc;

use crate::c::CRenderer;
use crate::error::{InvalidFunctionSnafu, JitCompilationSnafu, Result};
use crate::{Backend, CompiledKernel, CompiledModule};

/// External toolchain turning accelerator source into device text (PTX).
pub type DeviceAssembler = Arc<dyn Fn(&str, &DeviceSpec) -> Result<String> + Send + Sync>;

/// Handle to an entry point in emitted source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceKernel {
    name: String,
    device: DeviceSpec,
}

impl SourceKernel {
    pub fn new(name: impl Into<String>, device: DeviceSpec) -> Self {
        Self { name: name.into(), device }
    }

    pub fn device(&self) -> &DeviceSpec {
        &self.device
    }
}

impl CompiledKernel for SourceKernel {
    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Clone, Default)]
pub struct SourceBackend {
    assembler: Option<DeviceAssembler>,
}

impl SourceBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_assembler(mut self, assembler: DeviceAssembler) -> Self {
        self.assembler = Some(assembler);
        self
    }

    fn assemble(&self, source: &str, target: &DeviceSpec) -> Result<Option<String>> {
        match (&self.assembler, target.is_accelerator()) {
            (Some(assembler), true) => assembler(source, target).map(Some),
            _ => Ok(None),
        }
    }

    fn module(&self, source: String, names: Vec<String>, target: &DeviceSpec) -> Result<CompiledModule> {
        let device_text = self.assemble(&source, target)?;
        let kernels = names
            .into_iter()
            .map(|name| Arc::new(SourceKernel::new(name, target.clone())) as Arc<dyn CompiledKernel>)
            .collect();
        Ok(CompiledModule { source, device_text, kernels })
    }
}

impl Backend for SourceBackend {
    fn name(&self) -> &str {
        "c"
    }

    fn supports(&self, _target: &DeviceSpec) -> bool {
        true
    }

    fn compile(&self, funcs: &[LoweredFunc], target: &DeviceSpec) -> Result<CompiledModule> {
        snafu::ensure!(
            !funcs.is_empty(),
            InvalidFunctionSnafu { func: "<module>", reason: "no functions to compile" }
        );

        let renderer = CRenderer::new(target);
        let mut source = String::from(renderer.prelude());
        let mut names = Vec::with_capacity(funcs.len());
        for func in funcs {
            let rendered = renderer.render(func)?;
            source.push('\n');
            source.push_str(&rendered.code);
            names.push(rendered.entry_point);
        }

        tracing::debug!(device = %target, kernels = ?names, source_len = source.len(), "source backend compiled group");
        self.module(source, names, target)
    }

    fn load(&self, source: &str, target: &DeviceSpec) -> Result<CompiledModule> {
        let names = entry_points(source);
        snafu::ensure!(!names.is_empty(), JitCompilationSnafu { reason: "no kernel definitions found in source" });

        tracing::debug!(device = %target, kernels = ?names, "source backend loaded cached source");
        self.module(source.to_string(), names, target)
    }
}

impl fmt::Debug for SourceBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceBackend").field("has_assembler", &self.assembler.is_some()).finish()
    }
}

/// Names of the functions defined in emitted source, in order.
fn entry_points(source: &str) -> Vec<String> {
    source
        .lines()
        .filter_map(|line| {
            let rest = line.strip_prefix("extern \"C\" __global__ void ").or_else(|| line.strip_prefix("void "))?;
            let (name, _) = rest.split_once('(')?;
            Some(name.trim().to_string())
        })
        .collect()
}
