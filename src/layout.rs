//! Deterministic file layout of a build directory
//!
//! Every intermediate file is named from the work directory and the input
//! module's basename `<f>`; per-herd files also carry the herd name.

use std::path::{Path, PathBuf};

use crate::options::LinkMode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildLayout {
    tmpdir: PathBuf,
    file: String,
}

/// Files belonging to one herd build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HerdPaths {
    /// `aie.<herd>.mlir`, written by the device-artifact stage
    pub aie_module: PathBuf,
    /// `aiecc.<herd>.mlir`
    pub aiecc_module: PathBuf,
    /// `<herd>/`, the backend work directory
    pub backend_dir: PathBuf,
    /// `<herd>/aie_inc.cpp`, produced by the backend
    pub backend_include: PathBuf,
    /// `<f>.<herd>.inc`
    pub include: PathBuf,
    /// `<f>.<herd>.cpp`
    pub wrapper: PathBuf,
    /// `<f>.<herd>.o`
    pub object: PathBuf,
}

impl BuildLayout {
    pub fn new(tmpdir: impl Into<PathBuf>, file: impl Into<String>) -> Self {
        Self {
            tmpdir: tmpdir.into(),
            file: file.into(),
        }
    }

    pub fn tmpdir(&self) -> &Path {
        &self.tmpdir
    }

    pub fn file_name(&self) -> &str {
        &self.file
    }

    fn prefixed(&self, prefix: &str) -> PathBuf {
        self.tmpdir.join(format!("{}.{}", prefix, self.file))
    }

    fn suffixed(&self, suffix: &str) -> PathBuf {
        self.tmpdir.join(format!("{}.{}", self.file, suffix))
    }

    /// `output-prefix` for the device-artifact stage
    pub fn output_prefix(&self) -> String {
        format!("{}/", self.tmpdir.display())
    }

    pub fn placed(&self) -> PathBuf {
        self.prefixed("placed")
    }

    pub fn airrt(&self) -> PathBuf {
        self.prefixed("airrt")
    }

    pub fn aie_ctrl(&self) -> PathBuf {
        self.prefixed("aie_ctrl")
    }

    pub fn refback(&self) -> PathBuf {
        self.prefixed("refback")
    }

    pub fn llvm(&self) -> PathBuf {
        self.prefixed("llvm")
    }

    pub fn llvm_ir(&self) -> PathBuf {
        self.suffixed("ll")
    }

    pub fn opt_bitcode(&self) -> PathBuf {
        self.suffixed("opt.bc")
    }

    pub fn opt_ir(&self) -> PathBuf {
        self.suffixed("opt.ll")
    }

    pub fn control_object(&self) -> PathBuf {
        self.suffixed("o")
    }

    pub fn library(&self, mode: LinkMode) -> PathBuf {
        self.suffixed(mode.extension())
    }

    pub fn herd(&self, herd: &str) -> HerdPaths {
        let backend_dir = self.tmpdir.join(herd);
        HerdPaths {
            aie_module: self.tmpdir.join(format!("aie.{}.mlir", herd)),
            aiecc_module: self.tmpdir.join(format!("aiecc.{}.mlir", herd)),
            backend_include: backend_dir.join("aie_inc.cpp"),
            backend_dir,
            include: self.suffixed(&format!("{}.inc", herd)),
            wrapper: self.suffixed(&format!("{}.cpp", herd)),
            object: self.suffixed(&format!("{}.o", herd)),
        }
    }
}
