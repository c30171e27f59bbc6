// crates/climate-eval-providers/src/command.rs
// ============================================================================
// Module: Command Provider
// Description: Subprocess provider invoking external diagnostics.
// Purpose: Run provider executables in isolated processes with JSON handoff.
// Dependencies: climate-eval-core, serde, serde_json
// ============================================================================

//! ## Overview
//! The command provider wraps external diagnostic executables. Each
//! configured diagnostic declares its slug, facets, and data requirements;
//! at run time the definition is serialized to `definition.json` inside the
//! execution's scratch directory and the executable is invoked with that
//! path as its final argument. Stdout and stderr are appended to the
//! execution log; a non-zero exit is an execution failure. The executable is
//! expected to write `output.json` and `diagnostic.json` into the output
//! directory, which `build_execution_result` reads back.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::fs;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

use climate_eval_core::DataRequirement;
use climate_eval_core::Diagnostic;
use climate_eval_core::DiagnosticError;
use climate_eval_core::DiagnosticProvider;
use climate_eval_core::DiagnosticSlug;
use climate_eval_core::ExecutionDefinition;
use climate_eval_core::ExecutionResult;
use climate_eval_core::METRIC_BUNDLE_FILENAME;
use climate_eval_core::MetricBundle;
use climate_eval_core::OUTPUT_BUNDLE_FILENAME;
use climate_eval_core::OutputBundle;
use climate_eval_core::ProviderSlug;
use serde::Deserialize;
use serde_json::Value;

use crate::registry::RegistryError;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Configuration of the command provider.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandProviderConfig {
    /// Provider slug the diagnostics are registered under.
    pub slug: String,
    /// Provider version reported to the registry.
    #[serde(default)]
    pub version: Option<String>,
    /// Configured diagnostics.
    pub diagnostics: Vec<CommandDiagnosticConfig>,
}

/// Configuration of one subprocess diagnostic.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandDiagnosticConfig {
    /// Diagnostic slug.
    pub slug: String,
    /// Executable invoked for each execution.
    pub executable: PathBuf,
    /// Arguments inserted before the definition path.
    #[serde(default)]
    pub args: Vec<String>,
    /// Facet names emitted on metric values.
    pub facets: BTreeSet<String>,
    /// Declared dataset requirements.
    pub data_requirements: Vec<DataRequirement>,
}

// ============================================================================
// SECTION: Provider
// ============================================================================

/// Provider wrapping external diagnostic executables.
pub struct CommandProvider {
    /// Provider slug.
    slug: ProviderSlug,
    /// Reported version.
    version: String,
    /// Configured diagnostics.
    diagnostics: Vec<Arc<dyn Diagnostic>>,
}

impl std::fmt::Debug for CommandProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandProvider")
            .field("slug", &self.slug)
            .field("version", &self.version)
            .field("diagnostics_count", &self.diagnostics.len())
            .finish()
    }
}

impl CommandProvider {
    /// Builds the provider from a JSON configuration value.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidConfig`] when the value does not
    /// deserialize or declares no diagnostics.
    pub fn from_config(config: &Value) -> Result<Self, RegistryError> {
        let config: CommandProviderConfig = serde_json::from_value(config.clone())
            .map_err(|err| RegistryError::InvalidConfig(err.to_string()))?;
        if config.diagnostics.is_empty() {
            return Err(RegistryError::InvalidConfig(
                "command provider declares no diagnostics".to_string(),
            ));
        }
        let diagnostics: Vec<Arc<dyn Diagnostic>> = config
            .diagnostics
            .into_iter()
            .map(|diagnostic| Arc::new(CommandDiagnostic {
                config: diagnostic,
            }) as Arc<dyn Diagnostic>)
            .collect();
        Ok(Self {
            slug: ProviderSlug::new(config.slug),
            version: config.version.unwrap_or_else(|| "unversioned".to_string()),
            diagnostics,
        })
    }
}

impl DiagnosticProvider for CommandProvider {
    fn slug(&self) -> ProviderSlug {
        self.slug.clone()
    }

    fn version(&self) -> String {
        self.version.clone()
    }

    fn diagnostics(&self) -> Vec<Arc<dyn Diagnostic>> {
        self.diagnostics.clone()
    }
}

// ============================================================================
// SECTION: Diagnostic
// ============================================================================

/// One subprocess diagnostic.
struct CommandDiagnostic {
    /// Diagnostic configuration.
    config: CommandDiagnosticConfig,
}

impl Diagnostic for CommandDiagnostic {
    fn slug(&self) -> DiagnosticSlug {
        DiagnosticSlug::new(self.config.slug.clone())
    }

    fn data_requirements(&self) -> Vec<DataRequirement> {
        self.config.data_requirements.clone()
    }

    fn facets(&self) -> BTreeSet<String> {
        self.config.facets.clone()
    }

    fn execute(&self, definition: &ExecutionDefinition) -> Result<(), DiagnosticError> {
        let definition_path = definition.scratch_directory.join("definition.json");
        let payload = serde_json::to_vec_pretty(definition)
            .map_err(|err| DiagnosticError::Execution(err.to_string()))?;
        fs::write(&definition_path, payload)
            .map_err(|err| DiagnosticError::Execution(err.to_string()))?;

        let output = Command::new(&self.config.executable)
            .args(&self.config.args)
            .arg(&definition_path)
            .current_dir(&definition.scratch_directory)
            .output()
            .map_err(|err| {
                DiagnosticError::Execution(format!(
                    "failed to spawn {}: {err}",
                    self.config.executable.display()
                ))
            })?;

        append_log(definition, &output.stdout, &output.stderr)?;
        if !output.status.success() {
            return Err(DiagnosticError::Execution(format!(
                "diagnostic exited with {}",
                output.status
            )));
        }
        Ok(())
    }

    fn build_execution_result(
        &self,
        definition: &ExecutionDefinition,
    ) -> Result<ExecutionResult, DiagnosticError> {
        let output_text = fs::read_to_string(
            definition.output_directory.join(OUTPUT_BUNDLE_FILENAME),
        )
        .map_err(|err| DiagnosticError::Result(format!("missing output bundle: {err}")))?;
        let output_bundle = OutputBundle::from_json(&output_text)
            .map_err(|err| DiagnosticError::Result(err.to_string()))?;
        let metric_text = fs::read_to_string(
            definition.output_directory.join(METRIC_BUNDLE_FILENAME),
        )
        .map_err(|err| DiagnosticError::Result(format!("missing metric bundle: {err}")))?;
        let metric_bundle = MetricBundle::from_json(&metric_text)
            .map_err(|err| DiagnosticError::Result(err.to_string()))?;
        Ok(ExecutionResult {
            output_bundle,
            metric_bundle,
        })
    }
}

/// Appends captured process output to the execution log.
fn append_log(
    definition: &ExecutionDefinition,
    stdout: &[u8],
    stderr: &[u8],
) -> Result<(), DiagnosticError> {
    let mut log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&definition.log_path)
        .map_err(|err| DiagnosticError::Execution(err.to_string()))?;
    log.write_all(stdout).map_err(|err| DiagnosticError::Execution(err.to_string()))?;
    log.write_all(stderr).map_err(|err| DiagnosticError::Execution(err.to_string()))?;
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::missing_docs_in_private_items,
        clippy::unwrap_used,
        reason = "Test-only assertions and helpers are permitted."
    )]

    use serde_json::json;

    use super::*;

    #[test]
    fn config_requires_at_least_one_diagnostic() {
        let err = CommandProvider::from_config(&json!({
            "slug": "empty",
            "diagnostics": []
        }))
        .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidConfig(_)));
    }

    #[test]
    fn configured_diagnostics_expose_their_requirements() {
        let provider = CommandProvider::from_config(&json!({
            "slug": "pmp",
            "version": "3.1.2",
            "diagnostics": [{
                "slug": "variability-modes",
                "executable": "/opt/pmp/bin/variability-modes",
                "facets": ["region", "mode"],
                "data_requirements": [{
                    "source_type": "cmip6",
                    "filters": [{"facets": {"variable_id": "ts"}, "keep": true}],
                    "group_by": ["source_id", "member_id"],
                    "constraints": []
                }]
            }]
        }))
        .unwrap();
        let diagnostics = provider.diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].slug().as_str(), "variability-modes");
        let requirements = diagnostics[0].data_requirements();
        assert_eq!(requirements[0].group_by, vec!["source_id", "member_id"]);
    }
}
