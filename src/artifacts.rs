//! Object files awaiting the final link, and the build report

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::options::{GridGeometry, LinkMode};
use crate::placement::PlacedHerd;

/// Append-only list of objects: the control object first, then one per herd
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSet {
    objects: Vec<PathBuf>,
}

impl ArtifactSet {
    pub fn new(control_object: impl Into<PathBuf>) -> Self {
        Self {
            objects: vec![control_object.into()],
        }
    }

    pub fn push(&mut self, object: impl Into<PathBuf>) {
        self.objects.push(object.into());
    }

    pub fn control_object(&self) -> &Path {
        &self.objects[0]
    }

    /// Per-herd objects in build order
    pub fn herd_objects(&self) -> &[PathBuf] {
        &self.objects[1..]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.objects.iter().map(PathBuf::as_path)
    }

    /// Hand the objects to the linker
    pub fn into_link_inputs(self) -> Vec<PathBuf> {
        self.objects
    }
}

/// Summary of a finished build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildReport {
    pub input: PathBuf,
    pub grid: GridGeometry,
    pub link_mode: LinkMode,
    pub placements: Vec<PlacedHerd>,
    /// Build units in link order
    pub herds: Vec<String>,
    /// Every linked object, control object first
    pub objects: Vec<PathBuf>,
    pub library: PathBuf,
    pub output: Option<PathBuf>,
}

impl BuildReport {
    /// Export to JSON format
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl std::fmt::Display for BuildReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Build Report")?;
        writeln!(f, "============")?;
        writeln!(f, "Input: {}", self.input.display())?;
        writeln!(
            f,
            "Grid: {}x{} at row {}, col {}",
            self.grid.num_rows, self.grid.num_cols, self.grid.row_offset, self.grid.col_offset
        )?;
        writeln!(f, "Herds: {}", self.herds.len())?;
        for placed in &self.placements {
            writeln!(
                f,
                "  {}/{}: cols {}..{}, rows {}..{}",
                placed.segment.as_deref().unwrap_or("-"),
                placed.name.as_deref().unwrap_or("-"),
                placed.tiles.col,
                placed.tiles.col_end(),
                placed.tiles.row,
                placed.tiles.row_end()
            )?;
        }
        writeln!(f, "Objects: {}", self.objects.len())?;
        for object in &self.objects {
            writeln!(f, "  {}", object.display())?;
        }
        writeln!(f, "Library: {}", self.library.display())?;
        if let Some(output) = &self.output {
            writeln!(f, "Output: {}", output.display())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::TileRect;

    #[test]
    fn test_control_object_stays_first() {
        let mut set = ArtifactSet::new("b/f.o");
        set.push("b/f.h0.o");
        set.push("b/f.h1.o");
        assert_eq!(set.iter().count(), 3);
        assert_eq!(set.control_object(), Path::new("b/f.o"));
        assert_eq!(
            set.herd_objects(),
            &[PathBuf::from("b/f.h0.o"), PathBuf::from("b/f.h1.o")]
        );
        assert_eq!(set.into_link_inputs()[0], PathBuf::from("b/f.o"));
    }

    #[test]
    fn test_report_json_lists_objects() {
        let report = BuildReport {
            input: PathBuf::from("add.mlir"),
            grid: GridGeometry::new(1, 1, 0, 0),
            link_mode: LinkMode::Static,
            placements: vec![PlacedHerd {
                segment: Some("seg".to_string()),
                name: Some("h".to_string()),
                tiles: TileRect::new(0, 0, 1, 1),
            }],
            herds: vec!["h".to_string()],
            objects: vec![PathBuf::from("b/add.mlir.o"), PathBuf::from("b/add.mlir.h.o")],
            library: PathBuf::from("b/add.mlir.a"),
            output: Some(PathBuf::from("libadd.a")),
        };
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["objects"].as_array().unwrap().len(), 2);
        assert_eq!(json["link_mode"], "static");
        assert!(report.to_string().contains("seg/h: cols 0..1, rows 0..1"));
    }
}
