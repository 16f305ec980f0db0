//! Top-level build sequencing
//!
//! ```text
//! Parsed -> Placed -> DeviceArtifactsEmitted -> ControlProgramLowered
//!        -> ControlCompiled -> HerdsBuilt -> Linked -> Copied
//! ```
//!
//! Each branch of the pipeline starts from a fresh copy of the placed
//! module. Any failure ends the build where it happened; nothing is retried
//! and the output file is only written by the final transition.

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use tracing::{error, info};

use crate::artifacts::{ArtifactSet, BuildReport};
use crate::error::{CompileError, CompileResult};
use crate::layout::BuildLayout;
use crate::metadata::enumerate_herds;
use crate::module::Module;
use crate::native::{install, NativeBuilder};
use crate::options::CompileOptions;
use crate::placement::PlacementResolver;
use crate::stages::{
    control_lowering_sequence, control_program_sequence, device_artifact_sequence, llvm_sequence,
    refback_sequence, run_sequence, AirOptRunner,
};
use crate::toolchain::{ToolRunner, Toolchain};

/// Everything one build needs, passed explicitly
pub struct BuildContext<'a> {
    pub options: &'a CompileOptions,
    pub layout: BuildLayout,
    pub tools: &'a dyn ToolRunner,
    pub toolchain: Toolchain,
    pub runtime_dir: PathBuf,
}

impl<'a> BuildContext<'a> {
    pub fn new(
        options: &'a CompileOptions,
        tools: &'a dyn ToolRunner,
        toolchain: Toolchain,
        runtime_dir: PathBuf,
    ) -> CompileResult<Self> {
        let layout = BuildLayout::new(options.tmpdir.clone(), options.module_file_name()?);
        Ok(Self {
            options,
            layout,
            tools,
            toolchain,
            runtime_dir,
        })
    }
}

/// `runtime_lib` next to the install prefix of the running binary
pub fn default_runtime_dir() -> CompileResult<PathBuf> {
    let exe = std::env::current_exe()
        .map_err(|e| CompileError::config(format!("cannot locate the aircc binary: {}", e)))?;
    let bin_dir = exe
        .parent()
        .ok_or_else(|| CompileError::config("the aircc binary has no parent directory"))?;
    Ok(bin_dir.join("..").join("runtime_lib"))
}

/// Progress of a build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Configured,
    Parsed,
    Placed,
    DeviceArtifactsEmitted,
    ControlProgramLowered,
    ControlCompiled,
    HerdsBuilt,
    Linked,
    Copied,
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildState::Configured => "configured",
            BuildState::Parsed => "parsed",
            BuildState::Placed => "placed",
            BuildState::DeviceArtifactsEmitted => "device artifacts emitted",
            BuildState::ControlProgramLowered => "control program lowered",
            BuildState::ControlCompiled => "control program compiled",
            BuildState::HerdsBuilt => "herds built",
            BuildState::Linked => "linked",
            BuildState::Copied => "copied",
        };
        f.write_str(name)
    }
}

pub struct Compiler<'a> {
    ctx: BuildContext<'a>,
    state: BuildState,
}

impl<'a> Compiler<'a> {
    pub fn new(ctx: BuildContext<'a>) -> Self {
        Self {
            ctx,
            state: BuildState::Configured,
        }
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    /// Run the whole build
    pub fn run(&mut self) -> CompileResult<BuildReport> {
        self.drive().map_err(|e| {
            error!(state = %self.state, kind = e.kind(), "build failed: {}", e);
            e
        })
    }

    fn advance(&mut self, next: BuildState) {
        info!(from = %self.state, to = %next, "build progressed");
        self.state = next;
    }

    fn drive(&mut self) -> CompileResult<BuildReport> {
        let opts = self.ctx.options;
        opts.validate()?;

        let layout = self.ctx.layout.clone();
        let toolchain = self.ctx.toolchain.clone();
        let tools = self.ctx.tools;
        let native = NativeBuilder::new(tools, &toolchain, opts, &layout, &self.ctx.runtime_dir)?;

        fs::create_dir_all(layout.tmpdir()).map_err(|e| CompileError::io(layout.tmpdir(), e))?;
        info!(input = %opts.air_mlir_file.display(), target = native.target(), "compiling");

        let module = Module::read(&opts.air_mlir_file)?;
        self.advance(BuildState::Parsed);

        let stages = AirOptRunner::new(tools, toolchain.air_opt.clone());
        let resolver = PlacementResolver::new(opts.grid);
        let (placed, placements) = resolver.place(&stages, module, Some(&layout.placed()))?;
        self.advance(BuildState::Placed);

        run_sequence(
            &stages,
            placed.reparse()?,
            &device_artifact_sequence(&opts.grid, &layout.output_prefix()),
            None,
        )?;
        self.advance(BuildState::DeviceArtifactsEmitted);

        let airrt = run_sequence(
            &stages,
            placed.reparse()?,
            &control_program_sequence(&opts.grid),
            Some(&layout.airrt()),
        )?;
        let control = run_sequence(&stages, airrt, &control_lowering_sequence(), Some(&layout.aie_ctrl()))?;
        run_sequence(&stages, placed.reparse()?, &refback_sequence(), Some(&layout.refback()))?;
        run_sequence(&stages, control, &llvm_sequence(), Some(&layout.llvm()))?;
        self.advance(BuildState::ControlProgramLowered);

        let control_object = native.compile_control_object()?;
        self.advance(BuildState::ControlCompiled);

        let metadata = enumerate_herds(tools, &toolchain.air_translate, &layout.airrt())?;
        metadata.ensure_covers(&placed.outline())?;
        info!(herds = metadata.len(), jobs = opts.jobs, "building herds");

        let herd_objects = build_herds(&native, metadata.names(), opts.jobs)?;
        let mut artifacts = ArtifactSet::new(control_object);
        for object in herd_objects {
            artifacts.push(object);
        }
        self.advance(BuildState::HerdsBuilt);

        let objects: Vec<PathBuf> = artifacts.iter().map(PathBuf::from).collect();
        let library = native.link(artifacts)?;
        self.advance(BuildState::Linked);

        if let Some(output) = &opts.output_file {
            install(&library, output)?;
            self.advance(BuildState::Copied);
        }

        Ok(BuildReport {
            input: opts.air_mlir_file.clone(),
            grid: opts.grid,
            link_mode: opts.link_mode,
            placements,
            herds: metadata.names().to_vec(),
            objects,
            library,
            output: opts.output_file.clone(),
        })
    }
}

/// Build every herd on a pool of `jobs` workers
///
/// Objects come back in `herds` order. Once a herd fails no further herd is
/// started; herds already running are left to finish.
fn build_herds(native: &NativeBuilder<'_>, herds: &[String], jobs: usize) -> CompileResult<Vec<PathBuf>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .build()
        .map_err(|e| CompileError::config(format!("cannot start {} build workers: {}", jobs, e)))?;
    let failed = AtomicBool::new(false);

    let objects: Vec<Option<PathBuf>> = pool.install(|| {
        herds
            .par_iter()
            .map(|herd| {
                if failed.load(Ordering::SeqCst) {
                    return Ok(None);
                }
                native.build_herd(herd).map(Some).map_err(|e| {
                    failed.store(true, Ordering::SeqCst);
                    e
                })
            })
            .collect::<CompileResult<Vec<_>>>()
    })?;

    // Skips only happen after a failure, which the collect above reports.
    Ok(objects.into_iter().flatten().collect())
}
