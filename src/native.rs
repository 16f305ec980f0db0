//! Native compilation, per-herd backend builds and the final link
//!
//! Tool invocations follow the layout in `layout.rs`; every one of them is
//! fatal on failure. The output path is only touched by `install`, the last
//! step of a build.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use crate::artifacts::ArtifactSet;
use crate::codegen::stage_herd_sources;
use crate::error::{CompileError, CompileResult};
use crate::layout::BuildLayout;
use crate::options::{CompileOptions, LinkMode};
use crate::toolchain::{ToolCommand, ToolRunner, Toolchain};

/// Architecture families with AIE runtime headers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchFamily {
    X86_64,
    Aarch64,
}

impl ArchFamily {
    /// Match a target triple against the known families
    pub fn from_target(target: &str) -> Option<Self> {
        if target.contains("x86_64") {
            Some(ArchFamily::X86_64)
        } else if target.contains("aarch64") {
            Some(ArchFamily::Aarch64)
        } else {
            None
        }
    }

    pub fn runtime_dir_name(self) -> &'static str {
        match self {
            ArchFamily::X86_64 => "x86_64",
            ArchFamily::Aarch64 => "aarch64",
        }
    }
}

/// Target handed to the device backend: the explicit host target, else a
/// default for the machine the driver runs on
pub fn backend_target(host_target: Option<&str>) -> String {
    match host_target {
        Some(target) => target.to_string(),
        None if std::env::consts::ARCH == "x86_64" => "x86_64-amd-linux-gnu".to_string(),
        None => "aarch64-linux-gnu".to_string(),
    }
}

/// Drives the native toolchain for one build
pub struct NativeBuilder<'a> {
    tools: &'a dyn ToolRunner,
    toolchain: &'a Toolchain,
    options: &'a CompileOptions,
    layout: &'a BuildLayout,
    target: String,
    arch: ArchFamily,
    runtime_include: PathBuf,
}

impl<'a> NativeBuilder<'a> {
    /// Resolve the backend target up front so a bad triple fails before
    /// any stage runs
    pub fn new(
        tools: &'a dyn ToolRunner,
        toolchain: &'a Toolchain,
        options: &'a CompileOptions,
        layout: &'a BuildLayout,
        runtime_dir: &Path,
    ) -> CompileResult<Self> {
        let target = backend_target(options.host_target.as_deref());
        let arch = ArchFamily::from_target(&target).ok_or_else(|| {
            CompileError::config(format!(
                "no AIE runtime for target '{}'; expected an x86_64 or aarch64 triple",
                target
            ))
        })?;
        Ok(Self {
            tools,
            toolchain,
            options,
            layout,
            target,
            arch,
            runtime_include: runtime_dir.join("airhost").join("include"),
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// LLVM dialect → LLVM IR → optimized IR → object
    pub fn compile_control_object(&self) -> CompileResult<PathBuf> {
        let tc = self.toolchain;
        let layout = self.layout;

        self.tools.invoke(
            &ToolCommand::new(tc.aie_translate.clone())
                .arg("--mlir-to-llvmir")
                .path_arg(&layout.llvm())
                .arg("-o")
                .path_arg(&layout.llvm_ir()),
        )?;
        self.tools.invoke(
            &ToolCommand::new(tc.opt.clone())
                .arg("-O3")
                .path_arg(&layout.llvm_ir())
                .arg("-o")
                .path_arg(&layout.opt_bitcode()),
        )?;
        self.tools.invoke(
            &ToolCommand::new(tc.llvm_dis.clone())
                .path_arg(&layout.opt_bitcode())
                .arg("-o")
                .path_arg(&layout.opt_ir()),
        )?;

        let object = layout.control_object();
        let mut cmd = ToolCommand::new(tc.clang.clone()).args(["-O3", "-Wno-override-module", "-fPIC"]);
        if let Some(target) = &self.options.host_target {
            cmd = cmd.arg("-target").arg(target.clone());
        }
        cmd = cmd.arg("-c").path_arg(&layout.opt_ir()).arg("-o").path_arg(&object);
        self.tools.invoke(&cmd)?;

        info!(object = %object.display(), "control program compiled");
        Ok(object)
    }

    /// Backend, wrapper and object for one herd
    #[instrument(skip(self), fields(target = %self.target))]
    pub fn build_herd(&self, herd: &str) -> CompileResult<PathBuf> {
        let paths = self.layout.herd(herd);

        self.tools.invoke(&self.lower_herd_command(herd))?;
        self.tools.invoke(&self.backend_command(herd))?;
        debug!("backend finished");

        stage_herd_sources(herd, &paths)?;
        self.tools.invoke(&self.wrapper_command(herd))?;

        info!(object = %paths.object.display(), "herd compiled");
        Ok(paths.object)
    }

    pub fn lower_herd_command(&self, herd: &str) -> ToolCommand {
        let paths = self.layout.herd(herd);
        ToolCommand::new(self.toolchain.air_opt.clone())
            .path_arg(&paths.aie_module)
            .args(["-air-lower-linalg-tensors", "-lower-affine", "-cse", "-o"])
            .path_arg(&paths.aiecc_module)
    }

    pub fn backend_command(&self, herd: &str) -> ToolCommand {
        let paths = self.layout.herd(herd);
        let opts = self.options;

        let mut cmd = ToolCommand::new(self.toolchain.aiecc.clone());
        if opts.verbose {
            cmd = cmd.arg("-v");
        }
        cmd = match &opts.sysroot {
            Some(sysroot) => cmd.arg("--sysroot").path_arg(sysroot),
            None => cmd.arg("--sysroot=/"),
        };
        cmd.arg("--host-target")
            .arg(self.target.clone())
            .arg("--tmpdir")
            .path_arg(&paths.backend_dir)
            .arg("--no-aiesim")
            .arg(if opts.xbridge { "--xbridge" } else { "--no-xbridge" })
            .arg(if opts.xchesscc { "--xchesscc" } else { "--no-xchesscc" })
            .path_arg(&paths.aiecc_module)
    }

    pub fn wrapper_command(&self, herd: &str) -> ToolCommand {
        let paths = self.layout.herd(herd);
        let opts = self.options;

        let mut cmd = ToolCommand::new(self.toolchain.cc.clone()).args(["-std=c++11", "-g", "-I."]);

        // cross-compilation
        if let Some(sysroot) = &opts.sysroot {
            cmd = cmd.arg(format!("--sysroot={}", sysroot.display()));
            if opts
                .host_target
                .as_deref()
                .is_some_and(|t| t.contains("aarch64-linux-gnu"))
            {
                cmd = cmd.arg(format!("--gcc-toolchain={}/usr", sysroot.display()));
            }
        }
        if let Some(target) = &opts.host_target {
            cmd = cmd.arg(format!("--target={}", target));
        }

        let sysroot = opts
            .sysroot
            .as_deref()
            .unwrap_or_else(|| Path::new("/"));
        let aie_runtime = self
            .toolchain
            .aiecc_root
            .join("runtime_lib")
            .join(self.arch.runtime_dir_name())
            .join("test_lib")
            .join("include");
        let libxaie = sysroot.join("opt").join("xaienginev2").join("include");

        cmd.arg(format!("-I{}", self.runtime_include.display()))
            .arg(format!("-I{}", aie_runtime.display()))
            .arg(format!("-I{}", libxaie.display()))
            .args(["-DLIBXAIENGINEV2", "-DAIE_LIBXAIE_ENABLE", "-fPIC", "-c", "-o"])
            .path_arg(&paths.object)
            .path_arg(&paths.wrapper)
    }

    /// Combine every object into the library in the work directory
    pub fn link(&self, artifacts: ArtifactSet) -> CompileResult<PathBuf> {
        let library = self.layout.library(self.options.link_mode);
        debug!(
            control = %artifacts.control_object().display(),
            herds = artifacts.herd_objects().len(),
            "linking"
        );
        let objects = artifacts.into_link_inputs();

        // `llvm-ar rc` adds to an existing archive; start from scratch.
        if library.exists() {
            fs::remove_file(&library).map_err(|e| CompileError::io(&library, e))?;
        }

        self.tools.invoke(&self.link_command(&library, &objects))?;
        info!(library = %library.display(), objects = objects.len(), "linked");
        Ok(library)
    }

    pub fn link_command(&self, library: &Path, objects: &[PathBuf]) -> ToolCommand {
        let opts = self.options;
        let mut cmd = match opts.link_mode {
            LinkMode::Shared => {
                let mut cmd = ToolCommand::new(self.toolchain.clang.clone()).arg("-shared");
                if let Some(sysroot) = &opts.sysroot {
                    cmd = cmd.arg("--sysroot").path_arg(sysroot);
                }
                if let Some(target) = &opts.host_target {
                    cmd = cmd.arg("-target").arg(target.clone());
                }
                cmd.arg("-fuse-ld=lld").arg("-o").path_arg(library)
            }
            LinkMode::Static => ToolCommand::new(self.toolchain.llvm_ar.clone())
                .arg("rc")
                .path_arg(library),
        };
        for object in objects {
            cmd = cmd.path_arg(object);
        }
        cmd
    }
}

/// Copy the library to `output` without ever leaving a partial file there
pub fn install(library: &Path, output: &Path) -> CompileResult<()> {
    let file_name = output
        .file_name()
        .ok_or_else(|| CompileError::config(format!("output path '{}' has no file name", output.display())))?;
    let staging = output.with_file_name(format!(".{}.partial", file_name.to_string_lossy()));

    if let Err(e) = fs::copy(library, &staging) {
        let _ = fs::remove_file(&staging);
        return Err(CompileError::io(library, e));
    }
    if let Err(e) = fs::rename(&staging, output) {
        let _ = fs::remove_file(&staging);
        return Err(CompileError::io(output, e));
    }
    info!(output = %output.display(), "installed");
    Ok(())
}
