//! AIR Compilation Driver
//!
//! This library takes an AIR module describing herds of compute tiles and
//! turns it into a host library that configures and launches them. The
//! module is lowered and placed on a rectangular window of the device grid,
//! a backend build runs for every placed herd, and the host control program
//! is compiled and linked together with one generated wrapper per herd.
//!
//! # Example
//!
//! ```no_run
//! use aircc::{compile, CompileOptions, GridGeometry};
//!
//! let mut options = CompileOptions::new("add.mlir");
//! options.grid = GridGeometry::new(1, 1, 2, 7);
//! options.output_file = Some("libadd.a".into());
//! let report = compile(&options).unwrap();
//! println!("{}", report);
//! ```

pub mod artifacts;
pub mod codegen;
pub mod compiler;
pub mod error;
pub mod layout;
pub mod lexer;
pub mod metadata;
pub mod module;
pub mod native;
pub mod options;
pub mod outline;
pub mod placement;
pub mod stages;
pub mod toolchain;

pub use artifacts::{ArtifactSet, BuildReport};
pub use compiler::{default_runtime_dir, BuildContext, BuildState, Compiler};
pub use error::{CompileError, CompileResult};
pub use module::Module;
pub use options::{CompileOptions, ConfigFile, GridGeometry, LinkMode};
pub use placement::{PlacedHerd, PlacementResolver};
pub use toolchain::{SystemRunner, ToolRunner, Toolchain};

/// Compile with the tools found on `PATH`
pub fn compile(options: &CompileOptions) -> CompileResult<BuildReport> {
    options.validate()?;

    let toolchain = Toolchain::discover(&options.cc, options.link_mode == LinkMode::Static)?;
    let runtime_dir = match &options.runtime_dir {
        Some(dir) => dir.clone(),
        None => default_runtime_dir()?,
    };
    let runner = SystemRunner::new(options.verbose);

    let ctx = BuildContext::new(options, &runner, toolchain, runtime_dir)?;
    Compiler::new(ctx).run()
}
