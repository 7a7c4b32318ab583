//! DSL workload loading: compile a `.sr` file into a definition.

use std::path::Path;

use sr_domain::error::{Error, Result};
use sr_dsl::DslCompiler;

use crate::definition::{DefinitionBody, WorkloadDefinition};
use crate::metadata::{SourceFormat, WorkloadMetadata};

/// Compile a DSL source file into a workload definition.
///
/// The logical name is the file stem; compile diagnostics surface as a
/// load failure carrying every rendered diagnostic.
pub fn load_dsl_file(compiler: &DslCompiler, path: &Path, source: &str) -> Result<WorkloadDefinition> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("workflow.sr")
        .to_owned();
    let name = path
        .file_stem()
        .and_then(|n| n.to_str())
        .unwrap_or("workflow")
        .to_owned();

    let output = compiler.compile(source, &file_name).map_err(|e| {
        Error::Compile(
            e.diagnostics
                .iter()
                .map(|d| sr_dsl::errors::render_excerpt(d, source))
                .collect(),
        )
    })?;
    for warning in &output.warnings {
        tracing::warn!(diagnostic = %warning, "compile warning");
    }

    let description = format!(
        "DSL workflow {} ({} flow{}, {} agent{})",
        output.program.class_name,
        output.program.flows.len(),
        if output.program.flows.len() == 1 { "" } else { "s" },
        output.program.agents.len(),
        if output.program.agents.len() == 1 { "" } else { "s" },
    );

    Ok(WorkloadDefinition {
        metadata: WorkloadMetadata {
            name,
            description,
            source_path: Some(path.to_path_buf()),
            format: SourceFormat::Dsl,
        },
        body: DefinitionBody::Dsl { program: output.program, mappings: output.mappings },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn load_compiles_and_names_from_stem() {
        let compiler = DslCompiler::default();
        let src = "streetrace v1\nflow main:\n    log \"hi\"\n";
        let def = load_dsl_file(&compiler, &PathBuf::from("agents/review.sr"), src).unwrap();
        assert_eq!(def.metadata.name, "review");
        assert_eq!(def.metadata.format, SourceFormat::Dsl);
        let DefinitionBody::Dsl { program, .. } = &def.body else {
            panic!("expected dsl body");
        };
        assert_eq!(program.class_name, "ReviewWorkflow");
    }

    #[test]
    fn compile_errors_surface_as_load_failure() {
        let compiler = DslCompiler::default();
        let src = "streetrace v1\nagent broken:\n    tools missing\n";
        let err = load_dsl_file(&compiler, &PathBuf::from("bad.sr"), src).unwrap_err();
        let Error::Compile(diags) = err else { panic!("expected compile error") };
        assert!(diags.iter().any(|d| d.contains("E0010") || d.contains("E0001")));
    }
}
