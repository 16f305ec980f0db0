//! IR transformation stages and the sequencer that applies them
//!
//! A stage is a named pass with an ordered parameter set, rendered in the
//! textual pass-pipeline syntax understood by `air-opt`:
//!
//! ```text
//! air-to-aie{emit-while-loop=false row-offset=2 col-offset=7 output-prefix=build/}
//! func.func(air-renumber-dma)
//! ```

use std::fmt;
use std::path::Path;

use tracing::{debug, info};

use crate::error::{CompileError, CompileResult};
use crate::module::Module;
use crate::options::GridGeometry;
use crate::toolchain::{ToolCommand, ToolRunner};

/// One named, parameterized transformation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDescriptor {
    pub name: String,
    /// Parameters in the order they are rendered
    pub params: Vec<(String, String)>,
    /// Op the pass is nested under, e.g. `func.func`
    pub anchor: Option<String>,
}

impl StageDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            anchor: None,
        }
    }

    /// A pass that runs on every function
    pub fn on_functions(name: impl Into<String>) -> Self {
        Self::new(name).nested("func.func")
    }

    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((key.into(), value.to_string()));
        self
    }

    pub fn nested(mut self, anchor: impl Into<String>) -> Self {
        self.anchor = Some(anchor.into());
        self
    }

    /// Full pipeline text rooted at the module
    pub fn pipeline(&self) -> String {
        format!("builtin.module({})", self)
    }
}

impl fmt::Display for StageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(anchor) = &self.anchor {
            write!(f, "{}(", anchor)?;
        }
        write!(f, "{}", self.name)?;
        if !self.params.is_empty() {
            let rendered: Vec<String> = self
                .params
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            write!(f, "{{{}}}", rendered.join(" "))?;
        }
        if self.anchor.is_some() {
            write!(f, ")")?;
        }
        Ok(())
    }
}

/// A named, ordered list of stages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSequence {
    pub name: &'static str,
    pub stages: Vec<StageDescriptor>,
}

impl StageSequence {
    pub fn new(name: &'static str, stages: Vec<StageDescriptor>) -> Self {
        Self { name, stages }
    }

    pub fn pipeline(&self) -> String {
        let stages: Vec<String> = self.stages.iter().map(ToString::to_string).collect();
        format!("builtin.module({})", stages.join(","))
    }
}

/// Applies a single stage to a module
pub trait StageRunner {
    fn apply(&self, stage: &StageDescriptor, module: Module) -> CompileResult<Module>;
}

/// Runs stages by piping module text through `air-opt`
pub struct AirOptRunner<'a> {
    tools: &'a dyn ToolRunner,
    air_opt: String,
}

impl<'a> AirOptRunner<'a> {
    pub fn new(tools: &'a dyn ToolRunner, air_opt: impl Into<String>) -> Self {
        Self {
            tools,
            air_opt: air_opt.into(),
        }
    }

    pub fn command(&self, stage: &StageDescriptor, module: &Module) -> ToolCommand {
        ToolCommand::new(self.air_opt.clone())
            .arg(format!("--pass-pipeline={}", stage.pipeline()))
            .stdin(module.text())
    }
}

impl StageRunner for AirOptRunner<'_> {
    fn apply(&self, stage: &StageDescriptor, module: Module) -> CompileResult<Module> {
        let command = self.command(stage, &module);
        let output = self.tools.invoke_capture(&command)?;
        if !output.success() {
            let reason = output.stderr.trim();
            return Err(CompileError::stage(
                stage.to_string(),
                if reason.is_empty() {
                    format!("'{}' exited unsuccessfully", command)
                } else {
                    format!("'{}' exited unsuccessfully\n{}", command, reason)
                },
            ));
        }
        Module::parse(output.stdout)
            .map_err(|e| CompileError::stage(stage.to_string(), format!("produced {}", e)))
    }
}

/// Apply `sequence` to `module` in order, optionally snapshotting the result
///
/// Fails fast: the first failing stage ends the sequence and nothing is
/// written to `snapshot`.
pub fn run_sequence(
    runner: &dyn StageRunner,
    module: Module,
    sequence: &StageSequence,
    snapshot: Option<&Path>,
) -> CompileResult<Module> {
    info!(sequence = sequence.name, stages = sequence.stages.len(), "running stages");
    debug!(pipeline = %sequence.pipeline(), "pipeline");

    let mut module = module;
    for stage in &sequence.stages {
        debug!(stage = %stage, "applying");
        module = runner.apply(stage, module)?;
    }

    if let Some(path) = snapshot {
        module.write(path)?;
        debug!(path = %path.display(), "snapshot written");
    }
    Ok(module)
}

fn stages(names: &[&str]) -> Vec<StageDescriptor> {
    names.iter().map(|name| StageDescriptor::new(*name)).collect()
}

/// `air-place-herds` with the grid window
pub fn place_herds_stage(grid: &GridGeometry) -> StageDescriptor {
    StageDescriptor::new("air-place-herds")
        .param("num-rows", grid.num_rows)
        .param("num-cols", grid.num_cols)
        .param("row-anchor", grid.row_offset)
        .param("col-anchor", grid.col_offset)
}

/// `air-to-aie` in device-artifact or control-program mode
pub fn air_to_aie_stage(grid: &GridGeometry, emit_while_loop: bool, output_prefix: &str) -> StageDescriptor {
    StageDescriptor::new("air-to-aie")
        .param("emit-while-loop", emit_while_loop)
        .param("row-offset", grid.row_offset)
        .param("col-offset", grid.col_offset)
        .param("output-prefix", output_prefix)
}

/// General lowering, canonicalization and placement
pub fn placement_sequence(grid: &GridGeometry) -> StageSequence {
    StageSequence::new(
        "placement",
        vec![
            StageDescriptor::new("air-pipeline-to-affine").param("lowering-type", "getput"),
            StageDescriptor::new("canonicalize"),
            StageDescriptor::new("cse"),
            StageDescriptor::on_functions("air-renumber-dma"),
            StageDescriptor::on_functions("convert-linalg-to-loops"),
            place_herds_stage(grid),
        ],
    )
}

/// Emits `aie.<herd>.mlir` under `output_prefix` as a side effect
pub fn device_artifact_sequence(grid: &GridGeometry, output_prefix: &str) -> StageSequence {
    StageSequence::new("device-artifacts", vec![air_to_aie_stage(grid, false, output_prefix)])
}

/// Lowers the host control program to the airrt dialect
pub fn control_program_sequence(grid: &GridGeometry) -> StageSequence {
    let mut list = vec![air_to_aie_stage(grid, true, "/dev/null")];
    list.extend(stages(&[
        "convert-vector-to-llvm",
        "convert-math-to-llvm",
        "lower-affine",
        "air-to-std",
        "air-lower-linalg-tensors",
        "canonicalize",
        "cse",
    ]));
    StageSequence::new("control-program", list)
}

/// airrt to runtime calls and bufferized functions
pub fn control_lowering_sequence() -> StageSequence {
    StageSequence::new(
        "control",
        vec![
            StageDescriptor::new("airrt-to-llvm"),
            StageDescriptor::new("func-bufferize"),
            StageDescriptor::on_functions("finalizing-bufferize"),
        ],
    )
}

/// Reference lowering of the placed module without device code
pub fn refback_sequence() -> StageSequence {
    StageSequence::new(
        "refback",
        stages(&[
            "convert-vector-to-llvm",
            "convert-math-to-llvm",
            "lower-affine",
            "air-to-std",
            "air-lower-linalg-tensors",
            "canonicalize",
            "cse",
            "airrt-to-llvm",
            "canonicalize",
            "cse",
        ]),
    )
}

/// Control program down to the LLVM dialect
pub fn llvm_sequence() -> StageSequence {
    StageSequence::new(
        "llvm",
        stages(&[
            "expand-strided-metadata",
            "lower-affine",
            "convert-scf-to-cf",
            "convert-memref-to-llvm",
            "convert-func-to-llvm",
            "convert-cf-to-llvm",
            "canonicalize",
            "cse",
        ]),
    )
}
