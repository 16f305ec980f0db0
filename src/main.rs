//! AIR Compilation Driver CLI
//!
//! Usage:
//!   aircc add.mlir -o libadd.a
//!   aircc add.mlir --shared -o libadd.so --num-rows 2 --num-cols 2
//!   aircc add.mlir --sysroot /sysroots/vck190 --host-target aarch64-linux-gnu -o libadd.a

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use colored::Colorize;
use tracing_subscriber::{fmt, EnvFilter};

use aircc::{compile, CompileError, CompileOptions, CompileResult, ConfigFile, GridGeometry, LinkMode};

#[derive(Parser, Debug)]
#[command(name = "aircc")]
#[command(author = "AIR Team")]
#[command(version = "0.1.0")]
#[command(about = "AIR compiler driver: builds a host library from an AIR module")]
struct Args {
    /// AIR module to compile
    #[arg(value_name = "FILE")]
    air_mlir_file: PathBuf,

    /// Directory for intermediate files
    #[arg(long = "tmpdir")]
    tmpdir: Option<PathBuf>,

    /// Where to write the final library
    #[arg(short = 'o', long = "output-file")]
    output_file: Option<PathBuf>,

    /// Rows in the placement window
    #[arg(long = "num-rows")]
    num_rows: Option<u32>,

    /// Columns in the placement window
    #[arg(long = "num-cols")]
    num_cols: Option<u32>,

    /// First row of the placement window
    #[arg(long = "row-offset")]
    row_offset: Option<u32>,

    /// First column of the placement window
    #[arg(long = "col-offset")]
    col_offset: Option<u32>,

    /// Target triple for host code
    #[arg(long = "host-target")]
    host_target: Option<String>,

    /// Sysroot for cross-compilation
    #[arg(long = "sysroot")]
    sysroot: Option<PathBuf>,

    /// Compiler for the generated wrappers
    #[arg(long = "cc")]
    cc: Option<String>,

    /// Link a shared library instead of a static archive
    #[arg(long = "shared")]
    shared: bool,

    /// Use the Vitis bridge linker in the backend
    #[arg(long = "xbridge")]
    xbridge: bool,

    /// Use xchesscc in the backend
    #[arg(long = "xchesscc")]
    xchesscc: bool,

    /// Verbose output
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// JSON file supplying defaults for the options above
    #[arg(long = "config", value_name = "JSON")]
    config: Option<PathBuf>,

    /// Herds built concurrently
    #[arg(short = 'j', long = "jobs")]
    jobs: Option<usize>,

    /// Root of the AIR runtime library
    #[arg(long = "air-runtime-dir", env = "AIR_RUNTIME_DIR")]
    air_runtime_dir: Option<PathBuf>,

    /// Write a JSON build report here
    #[arg(long = "report", value_name = "JSON")]
    report: Option<PathBuf>,
}

impl Args {
    /// Flags win; the config file fills in the rest
    fn into_options(self, config: ConfigFile) -> CompileOptions {
        let mut options = CompileOptions::new(self.air_mlir_file);
        let grid = GridGeometry::default();

        if let Some(tmpdir) = self.tmpdir.or(config.tmpdir) {
            options.tmpdir = tmpdir;
        }
        options.output_file = self.output_file.or(config.output_file);
        options.grid = GridGeometry::new(
            self.num_rows.or(config.num_rows).unwrap_or(grid.num_rows),
            self.num_cols.or(config.num_cols).unwrap_or(grid.num_cols),
            self.row_offset.or(config.row_offset).unwrap_or(grid.row_offset),
            self.col_offset.or(config.col_offset).unwrap_or(grid.col_offset),
        );
        options.host_target = self.host_target.or(config.host_target);
        options.sysroot = self.sysroot.or(config.sysroot);
        if let Some(cc) = self.cc.or(config.cc) {
            options.cc = cc;
        }
        if self.shared || config.shared.unwrap_or(false) {
            options.link_mode = LinkMode::Shared;
        }
        options.xbridge = self.xbridge || config.xbridge.unwrap_or(false);
        options.xchesscc = self.xchesscc || config.xchesscc.unwrap_or(false);
        options.verbose = self.verbose;
        if let Some(jobs) = self.jobs.or(config.jobs) {
            options.jobs = jobs;
        }
        options.runtime_dir = self.air_runtime_dir.or(config.runtime_dir);
        options
    }
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: Args) -> CompileResult<()> {
    let config = match &args.config {
        Some(path) => ConfigFile::load(path)?,
        None => ConfigFile::default(),
    };
    let report_path = args.report.clone();
    let options = args.into_options(config);

    if options.verbose {
        println!("{}", "AIR Compilation Driver".bold().blue());
        println!("{}: {}", "Input".green(), options.air_mlir_file.display());
        println!(
            "{}: {}x{} at row {}, col {}",
            "Grid".green(),
            options.grid.num_rows,
            options.grid.num_cols,
            options.grid.row_offset,
            options.grid.col_offset
        );
        println!();
    }

    let report = compile(&options)?;

    if let Some(path) = report_path {
        let json = report
            .to_json()
            .map_err(|e| CompileError::config(format!("cannot serialize build report: {}", e)))?;
        fs::write(&path, json).map_err(|e| CompileError::io(&path, e))?;
    }
    if options.verbose {
        println!();
        print!("{}", report);
    }
    Ok(())
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Err(e) = run(args) {
        eprintln!("{}: {}", "Error".red(), e);
        std::process::exit(1);
    }
}
