//! Compile options and device grid geometry
//!
//! Options are resolved once before any stage runs and are passed explicitly
//! to every component; nothing reads them from global state.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CompileError, CompileResult};

/// Geometry of the physical tile grid available to placement
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct GridGeometry {
    /// Number of rows available to herds
    pub num_rows: u32,
    /// Number of columns available to herds
    pub num_cols: u32,
    /// First usable row
    pub row_offset: u32,
    /// First usable column
    pub col_offset: u32,
}

impl GridGeometry {
    pub fn new(num_rows: u32, num_cols: u32, row_offset: u32, col_offset: u32) -> Self {
        Self {
            num_rows,
            num_cols,
            row_offset,
            col_offset,
        }
    }

    /// Total number of tiles in the placement window
    pub fn area(&self) -> u64 {
        u64::from(self.num_rows) * u64::from(self.num_cols)
    }

    /// Half-open row range `[row_offset, row_offset + num_rows)`
    pub fn rows(&self) -> std::ops::Range<u64> {
        let start = u64::from(self.row_offset);
        start..start + u64::from(self.num_rows)
    }

    /// Half-open column range `[col_offset, col_offset + num_cols)`
    pub fn cols(&self) -> std::ops::Range<u64> {
        let start = u64::from(self.col_offset);
        start..start + u64::from(self.num_cols)
    }
}

impl Default for GridGeometry {
    /// Placement window used when no geometry flags are given
    fn default() -> Self {
        Self::new(8, 10, 2, 7)
    }
}

/// How the final library is produced
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LinkMode {
    /// `clang -shared` into a `.so`
    Shared,
    /// `llvm-ar` into a `.a`
    #[default]
    Static,
}

impl LinkMode {
    pub fn extension(self) -> &'static str {
        match self {
            LinkMode::Shared => "so",
            LinkMode::Static => "a",
        }
    }
}

/// Fully resolved configuration for one build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileOptions {
    /// Input module path
    pub air_mlir_file: PathBuf,
    /// Work directory for every intermediate file
    pub tmpdir: PathBuf,
    /// Where the final library is copied
    pub output_file: Option<PathBuf>,
    pub grid: GridGeometry,
    /// Target triple for host-side code
    pub host_target: Option<String>,
    /// Sysroot for cross-compilation
    pub sysroot: Option<PathBuf>,
    /// Compiler used for the generated wrapper sources
    pub cc: String,
    pub link_mode: LinkMode,
    /// Use the Vitis bridge linker in the device backend
    pub xbridge: bool,
    /// Use xchesscc in the device backend
    pub xchesscc: bool,
    pub verbose: bool,
    /// Number of herds built concurrently
    pub jobs: usize,
    /// Root of the AIR runtime library (`<dir>/airhost/include`)
    pub runtime_dir: Option<PathBuf>,
}

impl CompileOptions {
    pub fn new(air_mlir_file: impl Into<PathBuf>) -> Self {
        Self {
            air_mlir_file: air_mlir_file.into(),
            tmpdir: PathBuf::from("air_project"),
            output_file: None,
            grid: GridGeometry::default(),
            host_target: None,
            sysroot: None,
            cc: "clang".to_string(),
            link_mode: LinkMode::default(),
            xbridge: false,
            xchesscc: false,
            verbose: false,
            jobs: 1,
            runtime_dir: None,
        }
    }

    /// Basename of the input module, the key of every generated file name
    pub fn module_file_name(&self) -> CompileResult<String> {
        self.air_mlir_file
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .ok_or_else(|| {
                CompileError::config(format!(
                    "input path '{}' has no usable file name",
                    self.air_mlir_file.display()
                ))
            })
    }

    /// Reject option combinations that cannot produce a build
    pub fn validate(&self) -> CompileResult<()> {
        if self.grid.num_rows == 0 || self.grid.num_cols == 0 {
            return Err(CompileError::config(format!(
                "grid must be non-empty, got {}x{}",
                self.grid.num_rows, self.grid.num_cols
            )));
        }
        if self.jobs == 0 {
            return Err(CompileError::config("jobs must be at least 1"));
        }
        if self.cc.trim().is_empty() {
            return Err(CompileError::config("no C++ compiler selected"));
        }
        if let Some(target) = &self.host_target {
            if target.trim().is_empty() {
                return Err(CompileError::config("host target must not be empty"));
            }
        }
        if let Some(sysroot) = &self.sysroot {
            if !sysroot.is_dir() {
                return Err(CompileError::config(format!(
                    "sysroot '{}' is not a directory",
                    sysroot.display()
                )));
            }
            if self.host_target.is_none() {
                return Err(CompileError::config(
                    "a sysroot requires an explicit host target",
                ));
            }
        }
        self.module_file_name()?;
        Ok(())
    }
}

/// Optional JSON configuration file; every field is a fallback for the
/// matching command-line flag
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub tmpdir: Option<PathBuf>,
    pub output_file: Option<PathBuf>,
    pub num_rows: Option<u32>,
    pub num_cols: Option<u32>,
    pub row_offset: Option<u32>,
    pub col_offset: Option<u32>,
    pub host_target: Option<String>,
    pub sysroot: Option<PathBuf>,
    pub cc: Option<String>,
    pub shared: Option<bool>,
    pub xbridge: Option<bool>,
    pub xchesscc: Option<bool>,
    pub jobs: Option<usize>,
    pub runtime_dir: Option<PathBuf>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> CompileResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| CompileError::io(path, e))?;
        Self::from_json(&text).map_err(|e| {
            CompileError::config(format!("invalid config file '{}': {}", path.display(), e))
        })
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_window() {
        let grid = GridGeometry::new(2, 3, 1, 4);
        assert_eq!(grid.area(), 6);
        assert_eq!(grid.rows(), 1..3);
        assert_eq!(grid.cols(), 4..7);
    }

    #[test]
    fn test_module_file_name_is_basename() {
        let opts = CompileOptions::new("/some/dir/add.mlir");
        assert_eq!(opts.module_file_name().unwrap(), "add.mlir");
    }

    #[test]
    fn test_validate_rejects_empty_grid() {
        let mut opts = CompileOptions::new("add.mlir");
        opts.grid = GridGeometry::new(0, 4, 0, 0);
        assert!(matches!(opts.validate(), Err(CompileError::Config { .. })));
    }

    #[test]
    fn test_validate_rejects_sysroot_without_target() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = CompileOptions::new("add.mlir");
        opts.sysroot = Some(dir.path().to_path_buf());
        assert!(matches!(opts.validate(), Err(CompileError::Config { .. })));

        opts.host_target = Some("aarch64-linux-gnu".to_string());
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_sysroot() {
        let mut opts = CompileOptions::new("add.mlir");
        opts.host_target = Some("aarch64-linux-gnu".to_string());
        opts.sysroot = Some(PathBuf::from("/definitely/not/a/sysroot"));
        assert!(matches!(opts.validate(), Err(CompileError::Config { .. })));
    }

    #[test]
    fn test_config_file_fields() {
        let config = ConfigFile::from_json(
            r#"{ "num_rows": 4, "num_cols": 4, "shared": true, "cc": "clang++" }"#,
        )
        .unwrap();
        assert_eq!(config.num_rows, Some(4));
        assert_eq!(config.shared, Some(true));
        assert_eq!(config.cc.as_deref(), Some("clang++"));
        assert_eq!(config.tmpdir, None);
    }

    #[test]
    fn test_config_file_rejects_unknown_keys() {
        assert!(ConfigFile::from_json(r#"{ "num_rowz": 4 }"#).is_err());
    }

    #[test]
    fn test_link_mode_extension() {
        assert_eq!(LinkMode::Shared.extension(), "so");
        assert_eq!(LinkMode::Static.extension(), "a");
    }
}
