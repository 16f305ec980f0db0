//! Host wrapper generation for placed herds
//!
//! Each herd's backend emits the same set of configuration routines
//! (`mlir_aie_configure_cores`, ...). The wrapper includes the herd's copy
//! inside its own namespace and publishes a single function table,
//! `__airrt_<herd>_aie_functions`, that the AIR runtime looks up by name.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::{CompileError, CompileResult};
use crate::layout::HerdPaths;

/// Lifecycle entry points, in table order: (field, routine)
pub const LIFECYCLE_ENTRY_POINTS: [(&str, &str); 5] = [
    ("configure_cores", "mlir_aie_configure_cores"),
    ("configure_switchboxes", "mlir_aie_configure_switchboxes"),
    ("initialize_locks", "mlir_aie_initialize_locks"),
    ("configure_dmas", "mlir_aie_configure_dmas"),
    ("start_cores", "mlir_aie_start_cores"),
];

/// Name of the exported function table for `herd`
pub fn function_table_symbol(herd: &str) -> String {
    format!("__airrt_{}_aie_functions", herd)
}

/// Herd names become C++ namespaces and symbol names
pub fn validate_herd_name(herd: &str) -> CompileResult<()> {
    let mut chars = herd.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(CompileError::codegen(format!(
            "herd name '{}' is not a valid C identifier",
            herd
        )))
    }
}

/// Render the wrapper translation unit for `herd`
///
/// Pure: identical inputs always give byte-identical output.
pub fn emit_wrapper(herd: &str, include: &str) -> String {
    let mut out = String::new();

    out.push_str("// generated by aircc, do not edit\n");
    out.push_str("#include \"stdio.h\"\n");
    out.push_str("#include \"assert.h\"\n");
    out.push_str("#include \"air_host.h\"\n");
    out.push_str("#include \"air_host_impl.h\"\n");
    out.push('\n');
    out.push_str("namespace air {\n");
    out.push_str("namespace segments {\n");
    out.push_str(&format!("namespace {} {{\n", herd));
    out.push_str(&format!("#include \"{}\"\n", include));
    out.push_str("}\n}\n}\n");
    out.push_str(&format!("using namespace air::segments::{};\n", herd));
    out.push_str("extern \"C\" {\n");
    out.push_str(&format!("air_rt_aie_functions_t {} {{\n", function_table_symbol(herd)));
    for (i, (field, routine)) in LIFECYCLE_ENTRY_POINTS.iter().enumerate() {
        let sep = if i + 1 < LIFECYCLE_ENTRY_POINTS.len() { "," } else { "" };
        out.push_str(&format!("  .{} = &{}{}\n", field, routine, sep));
    }
    out.push_str("};\n");
    out.push_str("}\n");

    out
}

/// Copy the backend's include next to the wrapper and write the wrapper
pub fn stage_herd_sources(herd: &str, paths: &HerdPaths) -> CompileResult<()> {
    validate_herd_name(herd)?;

    fs::copy(&paths.backend_include, &paths.include)
        .map_err(|e| CompileError::io(&paths.backend_include, e))?;

    let wrapper = emit_wrapper(herd, &path_text(&paths.include));
    fs::write(&paths.wrapper, wrapper).map_err(|e| CompileError::io(&paths.wrapper, e))?;

    debug!(herd, wrapper = %paths.wrapper.display(), "wrapper generated");
    Ok(())
}

fn path_text(path: &Path) -> String {
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::BuildLayout;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_wrapper_text() {
        let expected = r#"// generated by aircc, do not edit
#include "stdio.h"
#include "assert.h"
#include "air_host.h"
#include "air_host_impl.h"

namespace air {
namespace segments {
namespace herdA {
#include "x.inc"
}
}
}
using namespace air::segments::herdA;
extern "C" {
air_rt_aie_functions_t __airrt_herdA_aie_functions {
  .configure_cores = &mlir_aie_configure_cores,
  .configure_switchboxes = &mlir_aie_configure_switchboxes,
  .initialize_locks = &mlir_aie_initialize_locks,
  .configure_dmas = &mlir_aie_configure_dmas,
  .start_cores = &mlir_aie_start_cores
};
}
"#;
        assert_eq!(emit_wrapper("herdA", "x.inc"), expected);
    }

    #[test]
    fn test_wrapper_is_deterministic() {
        assert_eq!(emit_wrapper("herdA", "x.inc"), emit_wrapper("herdA", "x.inc"));
        assert_eq!(function_table_symbol("herdA"), "__airrt_herdA_aie_functions");
    }

    #[test]
    fn test_distinct_herds_get_distinct_symbols() {
        let a = emit_wrapper("a", "f.a.inc");
        let b = emit_wrapper("b", "f.b.inc");
        assert!(a.contains("__airrt_a_aie_functions"));
        assert!(!a.contains("__airrt_b_aie_functions"));
        assert!(b.contains("namespace b {"));
    }

    #[test]
    fn test_herd_name_validation() {
        assert!(validate_herd_name("herd_0").is_ok());
        assert!(validate_herd_name("_h").is_ok());
        assert!(validate_herd_name("").is_err());
        assert!(validate_herd_name("0herd").is_err());
        assert!(validate_herd_name("herd-0").is_err());
        assert!(validate_herd_name("a.b").is_err());
    }

    #[test]
    fn test_stage_herd_sources() {
        let dir = tempfile::tempdir().unwrap();
        let layout = BuildLayout::new(dir.path(), "add.mlir");
        let paths = layout.herd("herd_0");
        fs::create_dir_all(&paths.backend_dir).unwrap();
        fs::write(&paths.backend_include, "void mlir_aie_start_cores() {}\n").unwrap();

        stage_herd_sources("herd_0", &paths).unwrap();

        assert_eq!(
            fs::read_to_string(&paths.include).unwrap(),
            "void mlir_aie_start_cores() {}\n"
        );
        let wrapper = fs::read_to_string(&paths.wrapper).unwrap();
        assert_eq!(wrapper, emit_wrapper("herd_0", &paths.include.display().to_string()));
    }

    #[test]
    fn test_stage_herd_sources_requires_backend_output() {
        let dir = tempfile::tempdir().unwrap();
        let paths = BuildLayout::new(dir.path(), "add.mlir").herd("herd_0");
        let err = stage_herd_sources("herd_0", &paths).unwrap_err();
        assert!(matches!(err, CompileError::Io { .. }));
        assert!(!paths.wrapper.exists());
    }
}
