//! Herd placement on the device grid
//!
//! The placement policy itself belongs to the `air-place-herds` stage. This
//! module supplies its geometry and enforces the contract around it:
//! - before placement, every segment's herds must fit the grid window
//! - after placement, every herd has a location inside the window and no
//!   two herds of a segment share a tile
//!
//! Either failure stops the build before any per-tile work begins.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{CompileError, CompileResult};
use crate::module::Module;
use crate::options::GridGeometry;
use crate::outline::{HerdOutline, ModuleOutline, SegmentOutline};
use crate::stages::{placement_sequence, run_sequence, StageRunner};

/// A rectangle of tiles, half-open on both axes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TileRect {
    pub col: u64,
    pub row: u64,
    pub cols: u64,
    pub rows: u64,
}

impl TileRect {
    pub fn new(col: u64, row: u64, cols: u64, rows: u64) -> Self {
        Self {
            col,
            row,
            cols,
            rows,
        }
    }

    pub fn col_end(&self) -> u64 {
        self.col + self.cols
    }

    pub fn row_end(&self) -> u64 {
        self.row + self.rows
    }

    pub fn area(&self) -> u64 {
        self.cols * self.rows
    }

    pub fn overlaps(&self, other: &TileRect) -> bool {
        self.col < other.col_end()
            && other.col < self.col_end()
            && self.row < other.row_end()
            && other.row < self.row_end()
    }

    pub fn within(&self, grid: &GridGeometry) -> bool {
        let cols = grid.cols();
        let rows = grid.rows();
        self.col >= cols.start
            && self.col_end() <= cols.end
            && self.row >= rows.start
            && self.row_end() <= rows.end
    }
}

/// A herd bound to physical tiles
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlacedHerd {
    pub segment: Option<String>,
    pub name: Option<String>,
    pub tiles: TileRect,
}

/// Binds herds to grid coordinates for one build
pub struct PlacementResolver {
    grid: GridGeometry,
}

impl PlacementResolver {
    pub fn new(grid: GridGeometry) -> Self {
        Self { grid }
    }

    /// Lower and place `module`, then verify the result
    pub fn place(
        &self,
        runner: &dyn StageRunner,
        module: Module,
        snapshot: Option<&std::path::Path>,
    ) -> CompileResult<(Module, Vec<PlacedHerd>)> {
        self.check_capacity(&module.outline())?;
        let placed = run_sequence(runner, module, &placement_sequence(&self.grid), snapshot)?;
        let herds = self.verify(&placed.outline())?;
        info!(herds = herds.len(), "placement verified");
        Ok((placed, herds))
    }

    /// Reject herd sets that cannot fit the window at all
    ///
    /// Sizes that only become constants after canonicalization are skipped
    /// here; `verify` checks them once the module is placed.
    pub fn check_capacity(&self, outline: &ModuleOutline) -> CompileResult<()> {
        let window = self.grid.area();
        for segment in &outline.segments {
            let mut used = 0u64;
            for herd in &segment.herds {
                if herd.size.is_none() {
                    debug!(herd = herd.display_name(), "size not yet constant");
                    continue;
                }
                let (cols, rows) = herd_size(segment, herd)?;
                if cols > u64::from(self.grid.num_cols) || rows > u64::from(self.grid.num_rows) {
                    return Err(CompileError::placement(format!(
                        "herd {} in segment {} is {}x{} but the grid is {}x{}",
                        herd.display_name(),
                        segment.display_name(),
                        cols,
                        rows,
                        self.grid.num_cols,
                        self.grid.num_rows
                    )));
                }
                used += cols * rows;
            }
            if used > window {
                return Err(CompileError::placement(format!(
                    "segment {} needs {} tiles but the {}x{} grid at ({}, {}) has {}",
                    segment.display_name(),
                    used,
                    self.grid.num_cols,
                    self.grid.num_rows,
                    self.grid.col_offset,
                    self.grid.row_offset,
                    window
                )));
            }
        }
        Ok(())
    }

    /// Check the placement recorded in a placed module
    pub fn verify(&self, outline: &ModuleOutline) -> CompileResult<Vec<PlacedHerd>> {
        let mut placed = Vec::with_capacity(outline.herd_count());

        for segment in &outline.segments {
            let mut taken: Vec<(&HerdOutline, TileRect)> = Vec::new();
            for herd in &segment.herds {
                let (cols, rows) = herd_size(segment, herd)?;
                let (col, row) = herd.location.ok_or_else(|| {
                    CompileError::placement(format!(
                        "herd {} in segment {} was not placed",
                        herd.display_name(),
                        segment.display_name()
                    ))
                })?;
                let tiles = TileRect::new(col, row, cols, rows);

                if !tiles.within(&self.grid) {
                    return Err(CompileError::placement(format!(
                        "herd {} at ({}, {}) size {}x{} lies outside columns {:?} and rows {:?}",
                        herd.display_name(),
                        col,
                        row,
                        cols,
                        rows,
                        self.grid.cols(),
                        self.grid.rows()
                    )));
                }
                if let Some((other, _)) = taken.iter().find(|(_, rect)| rect.overlaps(&tiles)) {
                    return Err(CompileError::placement(format!(
                        "herds {} and {} overlap in segment {}",
                        other.display_name(),
                        herd.display_name(),
                        segment.display_name()
                    )));
                }

                debug!(herd = herd.display_name(), col, row, cols, rows, "placed");
                taken.push((herd, tiles));
                placed.push(PlacedHerd {
                    segment: segment.name.clone(),
                    name: herd.name.clone(),
                    tiles,
                });
            }
        }
        Ok(placed)
    }
}

fn herd_size(segment: &SegmentOutline, herd: &HerdOutline) -> CompileResult<(u64, u64)> {
    match herd.size {
        Some((cols, rows)) if cols > 0 && rows > 0 => Ok((cols, rows)),
        Some((cols, rows)) => Err(CompileError::placement(format!(
            "herd {} in segment {} has empty size {}x{}",
            herd.display_name(),
            segment.display_name(),
            cols,
            rows
        ))),
        None => Err(CompileError::placement(format!(
            "size of herd {} in segment {} is not a constant",
            herd.display_name(),
            segment.display_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::StageDescriptor;
    use std::cell::Cell;

    fn herd(name: &str, size: (u64, u64), location: Option<(u64, u64)>) -> HerdOutline {
        HerdOutline {
            name: Some(name.to_string()),
            size: Some(size),
            location,
        }
    }

    fn outline(herds: Vec<HerdOutline>) -> ModuleOutline {
        ModuleOutline {
            functions: vec!["forward".to_string()],
            channels: Vec::new(),
            segments: vec![SegmentOutline {
                name: Some("seg".to_string()),
                herds,
            }],
        }
    }

    #[test]
    fn test_rect_overlap() {
        let a = TileRect::new(0, 0, 2, 1);
        assert!(a.overlaps(&TileRect::new(1, 0, 1, 1)));
        assert!(!a.overlaps(&TileRect::new(2, 0, 1, 1)));
        assert!(!a.overlaps(&TileRect::new(0, 1, 2, 1)));
    }

    #[test]
    fn test_capacity_accepts_exact_fit() {
        let resolver = PlacementResolver::new(GridGeometry::new(2, 2, 0, 0));
        let herds = outline(vec![herd("a", (2, 1), None), herd("b", (2, 1), None)]);
        assert!(resolver.check_capacity(&herds).is_ok());
    }

    #[test]
    fn test_capacity_rejects_oversubscribed_grid() {
        let resolver = PlacementResolver::new(GridGeometry::new(1, 1, 0, 0));
        let herds = outline(vec![herd("a", (1, 1), None), herd("b", (1, 1), None)]);
        let err = resolver.check_capacity(&herds).unwrap_err();
        assert!(matches!(err, CompileError::Placement { .. }));
        assert!(err.to_string().contains("needs 2 tiles"));
    }

    #[test]
    fn test_capacity_rejects_herd_wider_than_grid() {
        let resolver = PlacementResolver::new(GridGeometry::new(4, 2, 0, 0));
        let herds = outline(vec![herd("wide", (3, 1), None)]);
        assert!(resolver.check_capacity(&herds).is_err());
    }

    #[test]
    fn test_unknown_size_is_left_to_verify() {
        let resolver = PlacementResolver::new(GridGeometry::new(4, 4, 0, 0));
        let mut unknown = herd("h", (1, 1), Some((0, 0)));
        unknown.size = None;
        let herds = outline(vec![unknown]);
        assert!(resolver.check_capacity(&herds).is_ok());
        let err = resolver.verify(&herds).unwrap_err();
        assert!(err.to_string().contains("is not a constant"));
    }

    #[test]
    fn test_verify_two_herds_in_two_by_two() {
        let resolver = PlacementResolver::new(GridGeometry::new(2, 2, 0, 0));
        let placed = resolver
            .verify(&outline(vec![
                herd("a", (1, 1), Some((0, 0))),
                herd("b", (1, 1), Some((1, 0))),
            ]))
            .unwrap();
        assert_eq!(placed.len(), 2);
        assert!(!placed[0].tiles.overlaps(&placed[1].tiles));
        assert_eq!(placed[1].segment.as_deref(), Some("seg"));
    }

    #[test]
    fn test_verify_rejects_overlap() {
        let resolver = PlacementResolver::new(GridGeometry::new(2, 2, 0, 0));
        let err = resolver
            .verify(&outline(vec![
                herd("a", (2, 1), Some((0, 0))),
                herd("b", (1, 1), Some((1, 0))),
            ]))
            .unwrap_err();
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn test_verify_respects_anchor() {
        let resolver = PlacementResolver::new(GridGeometry::new(2, 2, 2, 7));
        assert!(resolver
            .verify(&outline(vec![herd("a", (2, 2), Some((7, 2)))]))
            .is_ok());
        assert!(resolver
            .verify(&outline(vec![herd("a", (1, 1), Some((6, 2)))]))
            .is_err());
        assert!(resolver
            .verify(&outline(vec![herd("a", (1, 2), Some((8, 3)))]))
            .is_err());
    }

    #[test]
    fn test_verify_rejects_unplaced_herd() {
        let resolver = PlacementResolver::new(GridGeometry::new(2, 2, 0, 0));
        let err = resolver.verify(&outline(vec![herd("a", (1, 1), None)])).unwrap_err();
        assert!(err.to_string().contains("was not placed"));
    }

    /// Stands in for `air-place-herds`: stamps every herd at the anchor column
    /// by column. `canonicalize` folds the one product used below.
    struct FirstFitPlacer {
        calls: Cell<usize>,
    }

    impl StageRunner for FirstFitPlacer {
        fn apply(&self, stage: &StageDescriptor, module: Module) -> CompileResult<Module> {
            self.calls.set(self.calls.get() + 1);
            if stage.name == "canonicalize" {
                return Module::parse(
                    module
                        .text()
                        .replace("arith.muli %c2, %c1 : index", "arith.constant 2 : index"),
                );
            }
            if stage.name != "air-place-herds" {
                return Ok(module);
            }
            let col: u64 = stage.params[3].1.parse().unwrap();
            let row: u64 = stage.params[2].1.parse().unwrap();
            let mut next = col;
            let text = module
                .text()
                .lines()
                .map(|line| {
                    if line.trim_start().starts_with("air.herd @") {
                        let stamped = line.replacen(
                            " {",
                            &format!(" attributes {{x_loc = {} : i64, y_loc = {} : i64}} {{", next, row),
                            1,
                        );
                        next += 1;
                        stamped
                    } else {
                        line.to_string()
                    }
                })
                .collect::<Vec<_>>()
                .join("\n");
            Module::parse(text)
        }
    }

    const SOURCE: &str = r#"module {
  func.func @forward() {
    %c1 = arith.constant 1 : index
    air.segment @seg {
      air.herd @a tile (%x, %y) in (%sx=%c1, %sy=%c1) {
      }
      air.herd @b tile (%x, %y) in (%sx=%c1, %sy=%c1) {
      }
    }
    return
  }
}"#;

    #[test]
    fn test_place_runs_full_sequence_and_verifies() {
        let runner = FirstFitPlacer { calls: Cell::new(0) };
        let resolver = PlacementResolver::new(GridGeometry::new(2, 2, 0, 0));
        let (module, herds) = resolver
            .place(&runner, Module::parse(SOURCE).unwrap(), None)
            .unwrap();
        assert_eq!(runner.calls.get(), 6);
        assert!(module.text().contains("x_loc = 1 : i64"));
        assert_eq!(herds[0].tiles, TileRect::new(0, 0, 1, 1));
        assert_eq!(herds[1].tiles, TileRect::new(1, 0, 1, 1));
    }

    #[test]
    fn test_place_accepts_size_folded_by_canonicalize() {
        let source = r#"module {
  func.func @forward() {
    %c1 = arith.constant 1 : index
    %c2 = arith.constant 2 : index
    %n = arith.muli %c2, %c1 : index
    air.segment @seg {
      air.herd @h tile (%x, %y) in (%sx=%n, %sy=%c1) {
      }
    }
    return
  }
}"#;
        let runner = FirstFitPlacer { calls: Cell::new(0) };
        let resolver = PlacementResolver::new(GridGeometry::new(4, 4, 0, 0));
        let (_, herds) = resolver.place(&runner, Module::parse(source).unwrap(), None).unwrap();
        assert_eq!(herds[0].tiles, TileRect::new(0, 0, 2, 1));
    }

    #[test]
    fn test_place_is_idempotent() {
        let runner = FirstFitPlacer { calls: Cell::new(0) };
        let resolver = PlacementResolver::new(GridGeometry::new(2, 2, 0, 0));
        let (first, _) = resolver.place(&runner, Module::parse(SOURCE).unwrap(), None).unwrap();
        let (second, _) = resolver.place(&runner, Module::parse(SOURCE).unwrap(), None).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_place_fails_before_running_stages_when_grid_too_small() {
        let runner = FirstFitPlacer { calls: Cell::new(0) };
        let resolver = PlacementResolver::new(GridGeometry::new(1, 1, 0, 0));
        let result = resolver.place(&runner, Module::parse(SOURCE).unwrap(), None);
        assert!(matches!(result, Err(CompileError::Placement { .. })));
        assert_eq!(runner.calls.get(), 0);
    }
}
