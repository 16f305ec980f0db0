//! Herd enumeration from the lowered control program
//!
//! `air-translate --airrt-generate-json` describes the build units of a
//! module on stdout. The output must be a JSON object whose values are
//! records with a string `sym_name`:
//!
//! ```json
//! { "herd_0": { "sym_name": "herd_0" }, "herd_1": { "sym_name": "herd_1" } }
//! ```
//!
//! Anything else is an error; an unexpected shape never degrades into an
//! empty or shortened herd list.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::codegen::validate_herd_name;
use crate::error::{CompileError, CompileResult};
use crate::outline::ModuleOutline;
use crate::toolchain::{ToolCommand, ToolRunner};

/// One record of the enumeration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HerdRecord {
    pub sym_name: String,
}

/// Build units discovered after control-program lowering, in stable order
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HerdMetadata {
    names: Vec<String>,
}

impl HerdMetadata {
    /// Decode and validate enumeration output
    pub fn from_json(text: &str) -> CompileResult<Self> {
        // BTreeMap keeps the key order stable across runs.
        let records: BTreeMap<String, HerdRecord> = serde_json::from_str(text.trim())
            .map_err(|e| CompileError::metadata(format!("malformed herd description: {}", e)))?;

        let mut seen = BTreeSet::new();
        let mut names = Vec::with_capacity(records.len());
        for (key, record) in records {
            if record.sym_name.is_empty() {
                return Err(CompileError::metadata(format!(
                    "record '{}' has an empty sym_name",
                    key
                )));
            }
            validate_herd_name(&record.sym_name).map_err(|_| {
                CompileError::metadata(format!(
                    "record '{}' names herd '{}', which is not a C identifier",
                    key, record.sym_name
                ))
            })?;
            if !seen.insert(record.sym_name.clone()) {
                return Err(CompileError::metadata(format!(
                    "herd '{}' is described more than once",
                    record.sym_name
                )));
            }
            names.push(record.sym_name);
        }
        Ok(Self { names })
    }

    #[cfg(test)]
    pub(crate) fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Every herd of the placed module must be built by some unit
    ///
    /// A unit covers a herd when it carries the herd's name or the name of
    /// the segment that contains it.
    pub fn ensure_covers(&self, outline: &ModuleOutline) -> CompileResult<()> {
        if outline.herd_count() > 0 && self.is_empty() {
            return Err(CompileError::metadata(format!(
                "module declares {} herd(s) but none were reported",
                outline.herd_count()
            )));
        }
        for (segment, herd) in outline.herds() {
            let by_herd = herd.name.as_deref().is_some_and(|n| self.contains(n));
            let by_segment = segment.name.as_deref().is_some_and(|n| self.contains(n));
            let anonymous = herd.name.is_none() && segment.name.is_none();
            if !(by_herd || by_segment || anonymous) {
                return Err(CompileError::metadata(format!(
                    "herd {} in segment {} was not reported; reported: [{}]",
                    herd.display_name(),
                    segment.display_name(),
                    self.names.join(", ")
                )));
            }
        }
        Ok(())
    }
}

/// Run `air-translate --airrt-generate-json` on the airrt module
pub fn enumerate_herds(
    tools: &dyn ToolRunner,
    air_translate: &str,
    airrt_module: &Path,
) -> CompileResult<HerdMetadata> {
    let command = ToolCommand::new(air_translate)
        .arg("--airrt-generate-json")
        .path_arg(airrt_module);
    let output = tools.invoke_capture(&command)?.check(&command)?;

    let metadata = HerdMetadata::from_json(&output.stdout)?;
    debug!(herds = ?metadata.names(), "herds enumerated");
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outline::{HerdOutline, SegmentOutline};
    use crate::toolchain::ToolOutput;

    fn outline(segment: Option<&str>, herds: &[&str]) -> ModuleOutline {
        ModuleOutline {
            functions: Vec::new(),
            channels: Vec::new(),
            segments: vec![SegmentOutline {
                name: segment.map(str::to_string),
                herds: herds
                    .iter()
                    .map(|name| HerdOutline {
                        name: Some(name.to_string()),
                        size: Some((1, 1)),
                        location: Some((0, 0)),
                    })
                    .collect(),
            }],
        }
    }

    #[test]
    fn test_decode_sorted_names() {
        let meta = HerdMetadata::from_json(
            r#"{ "herd_1": { "sym_name": "herd_1", "loc": [1, 0] }, "herd_0": { "sym_name": "herd_0" } }"#,
        )
        .unwrap();
        assert_eq!(meta.names(), &["herd_0".to_string(), "herd_1".to_string()]);
    }

    #[test]
    fn test_decode_empty_object() {
        assert!(HerdMetadata::from_json("{}").unwrap().is_empty());
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        assert!(HerdMetadata::from_json("").is_err());
        assert!(HerdMetadata::from_json(r#"["herd_0"]"#).is_err());
        assert!(HerdMetadata::from_json(r#"{ "herd_0": { "name": "herd_0" } }"#).is_err());
        assert!(HerdMetadata::from_json(r#"{ "herd_0": { "sym_name": 3 } }"#).is_err());
        assert!(HerdMetadata::from_json(r#"{ 'herd_0': { 'sym_name': 'herd_0' } }"#).is_err());
    }

    #[test]
    fn test_decode_rejects_duplicates_and_empty_names() {
        assert!(HerdMetadata::from_json(
            r#"{ "a": { "sym_name": "h" }, "b": { "sym_name": "h" } }"#
        )
        .is_err());
        assert!(HerdMetadata::from_json(r#"{ "a": { "sym_name": "" } }"#).is_err());
    }

    #[test]
    fn test_coverage_by_herd_or_segment_name() {
        let placed = outline(Some("seg"), &["a", "b"]);
        assert!(HerdMetadata::from_names(["a", "b"]).ensure_covers(&placed).is_ok());
        assert!(HerdMetadata::from_names(["seg"]).ensure_covers(&placed).is_ok());
    }

    #[test]
    fn test_coverage_fails_when_a_herd_is_missing() {
        let placed = outline(Some("seg"), &["a", "b"]);
        let err = HerdMetadata::from_names(["a"]).ensure_covers(&placed).unwrap_err();
        assert!(err.to_string().contains("herd b in segment seg was not reported"));
    }

    #[test]
    fn test_coverage_fails_on_empty_report() {
        let placed = outline(None, &["a"]);
        assert!(HerdMetadata::default().ensure_covers(&placed).is_err());
        assert!(HerdMetadata::default()
            .ensure_covers(&ModuleOutline::default())
            .is_ok());
    }

    struct Canned(ToolOutput);

    impl ToolRunner for Canned {
        fn invoke(&self, _: &ToolCommand) -> CompileResult<()> {
            Ok(())
        }
        fn invoke_capture(&self, _: &ToolCommand) -> CompileResult<ToolOutput> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_enumerate_failing_tool_with_garbage_is_tool_error() {
        let tools = Canned(ToolOutput {
            stdout: "Segmentation fault".to_string(),
            stderr: "crash".to_string(),
            exit_code: Some(139),
        });
        let err = enumerate_herds(&tools, "air-translate", Path::new("airrt.x.mlir")).unwrap_err();
        assert!(matches!(err, CompileError::ToolFailed { .. }));
        assert!(err
            .to_string()
            .contains("air-translate --airrt-generate-json airrt.x.mlir"));
    }

    #[test]
    fn test_enumerate_failing_tool_with_valid_json_is_tool_error() {
        let tools = Canned(ToolOutput {
            stdout: r#"{ "h": { "sym_name": "h" } }"#.to_string(),
            stderr: String::new(),
            exit_code: Some(1),
        });
        let err = enumerate_herds(&tools, "air-translate", Path::new("airrt.x.mlir")).unwrap_err();
        assert!(matches!(err, CompileError::ToolFailed { .. }));
    }

    #[test]
    fn test_decode_rejects_names_unusable_as_paths() {
        let err = HerdMetadata::from_json(r#"{ "x": { "sym_name": "../x" } }"#).unwrap_err();
        assert!(matches!(err, CompileError::Metadata { .. }));
        assert!(HerdMetadata::from_json(r#"{ "x": { "sym_name": "herd-0" } }"#).is_err());
    }

    #[test]
    fn test_enumerate_malformed_output_is_metadata_error() {
        let tools = Canned(ToolOutput {
            stdout: "{ herd_0 }".to_string(),
            stderr: String::new(),
            exit_code: Some(0),
        });
        let err = enumerate_herds(&tools, "air-translate", Path::new("airrt.x.mlir")).unwrap_err();
        assert!(matches!(err, CompileError::Metadata { .. }));
    }
}
