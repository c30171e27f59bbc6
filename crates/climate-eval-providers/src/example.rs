// crates/climate-eval-providers/src/example.rs
// ============================================================================
// Module: Example Provider
// Description: In-process provider exercising the full execution contract.
// Purpose: Smoke-test and test-suite provider with no scientific payload.
// Dependencies: climate-eval-core, serde, serde_json
// ============================================================================

//! ## Overview
//! The example provider runs fully in process and computes nothing
//! scientific: its diagnostic summarizes the inputs it was handed (dataset
//! and file counts) into a CMEC metric bundle and writes a small CSV
//! manifest of the staged files. It exists so the whole pipeline (solve,
//! execute, record, inspect) can run end to end without any external
//! provider environment.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs;
use std::sync::Arc;

use climate_eval_core::DataRequirement;
use climate_eval_core::Diagnostic;
use climate_eval_core::DiagnosticError;
use climate_eval_core::DiagnosticProvider;
use climate_eval_core::DiagnosticSlug;
use climate_eval_core::ExecutionDefinition;
use climate_eval_core::ExecutionResult;
use climate_eval_core::FacetFilter;
use climate_eval_core::FacetMatch;
use climate_eval_core::MetricBundle;
use climate_eval_core::MetricDimensions;
use climate_eval_core::OutputBundle;
use climate_eval_core::OutputFileReference;
use climate_eval_core::Provenance;
use climate_eval_core::ProviderSlug;
use climate_eval_core::SourceType;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;

use crate::registry::RegistryError;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Configuration of the example provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExampleProviderConfig {
    /// Variables the diagnostic accepts.
    pub variables: Vec<String>,
}

impl Default for ExampleProviderConfig {
    fn default() -> Self {
        Self {
            variables: vec!["tas".to_string()],
        }
    }
}

// ============================================================================
// SECTION: Provider
// ============================================================================

/// In-process example provider.
pub struct ExampleProvider {
    /// Diagnostics declared by this provider.
    diagnostics: Vec<Arc<dyn Diagnostic>>,
}

impl ExampleProvider {
    /// Builds the provider from a JSON configuration value.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidConfig`] when the value does not
    /// deserialize.
    pub fn from_config(config: &Value) -> Result<Self, RegistryError> {
        let config: ExampleProviderConfig = serde_json::from_value(config.clone())
            .map_err(|err| RegistryError::InvalidConfig(err.to_string()))?;
        Ok(Self {
            diagnostics: vec![Arc::new(InputSummaryDiagnostic {
                config,
            })],
        })
    }
}

impl DiagnosticProvider for ExampleProvider {
    fn slug(&self) -> ProviderSlug {
        ProviderSlug::new("example")
    }

    fn version(&self) -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }

    fn diagnostics(&self) -> Vec<Arc<dyn Diagnostic>> {
        self.diagnostics.clone()
    }
}

// ============================================================================
// SECTION: Diagnostic
// ============================================================================

/// Diagnostic summarizing its staged inputs.
struct InputSummaryDiagnostic {
    /// Provider configuration.
    config: ExampleProviderConfig,
}

impl Diagnostic for InputSummaryDiagnostic {
    fn slug(&self) -> DiagnosticSlug {
        DiagnosticSlug::new("input-summary")
    }

    fn data_requirements(&self) -> Vec<DataRequirement> {
        let variables = if self.config.variables.len() == 1 {
            FacetMatch::Single(self.config.variables[0].clone())
        } else {
            FacetMatch::AnyOf(self.config.variables.clone())
        };
        vec![DataRequirement {
            source_type: SourceType::cmip6(),
            filters: vec![FacetFilter::keep([("variable_id", variables)])],
            group_by: vec![
                "source_id".to_string(),
                "experiment_id".to_string(),
                "variable_id".to_string(),
                "member_id".to_string(),
            ],
            constraints: Vec::new(),
        }]
    }

    fn facets(&self) -> BTreeSet<String> {
        ["region", "metric", "statistic"].iter().map(ToString::to_string).collect()
    }

    fn execute(&self, definition: &ExecutionDefinition) -> Result<(), DiagnosticError> {
        let mut manifest = String::from("source_type,instance_id,path\n");
        for (source_type, datasets) in &definition.datasets_by_source_type {
            for dataset in datasets {
                for file in &dataset.files {
                    let _ = writeln!(
                        manifest,
                        "{},{},{}",
                        source_type,
                        dataset.dataset.record.instance_id,
                        file.record.path.display()
                    );
                }
            }
        }
        fs::write(definition.output_directory.join("inputs.csv"), manifest)
            .map_err(|err| DiagnosticError::Execution(err.to_string()))?;
        fs::write(&definition.log_path, b"input-summary: staged inputs enumerated\n")
            .map_err(|err| DiagnosticError::Execution(err.to_string()))?;
        Ok(())
    }

    fn build_execution_result(
        &self,
        definition: &ExecutionDefinition,
    ) -> Result<ExecutionResult, DiagnosticError> {
        let dataset_count: usize =
            definition.datasets_by_source_type.values().map(Vec::len).sum();
        let file_count: usize = definition
            .datasets_by_source_type
            .values()
            .flatten()
            .map(|dataset| dataset.files.len())
            .sum();

        let output_bundle = OutputBundle {
            provenance: Provenance {
                log: "out.log".to_string(),
                ..Provenance::default()
            },
            data: [("inputs".to_string(), OutputFileReference::new("inputs.csv"))]
                .into_iter()
                .collect(),
            ..OutputBundle::default()
        };

        let metric_bundle = MetricBundle {
            dimensions: MetricDimensions {
                json_structure: vec![
                    "region".to_string(),
                    "metric".to_string(),
                    "statistic".to_string(),
                ],
                entries: [
                    (
                        "region".to_string(),
                        [("global".to_string(), json!({}))].into_iter().collect(),
                    ),
                    (
                        "metric".to_string(),
                        [("coverage".to_string(), json!({}))].into_iter().collect(),
                    ),
                    (
                        "statistic".to_string(),
                        [
                            ("input_datasets".to_string(), json!({})),
                            ("input_files".to_string(), json!({})),
                        ]
                        .into_iter()
                        .collect(),
                    ),
                ]
                .into_iter()
                .collect(),
            },
            results: json!({
                "global": {
                    "coverage": {
                        "input_datasets": dataset_count,
                        "input_files": file_count,
                    }
                }
            }),
        };
        Ok(ExecutionResult {
            output_bundle,
            metric_bundle,
        })
    }
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
    fn default_config_accepts_tas() {
        let provider = ExampleProvider::from_config(&json!({})).unwrap();
        let diagnostics = provider.diagnostics();
        assert_eq!(diagnostics.len(), 1);
        let requirements = diagnostics[0].data_requirements();
        assert_eq!(requirements.len(), 1);
        assert_eq!(requirements[0].source_type, SourceType::cmip6());
    }

    #[test]
    fn metric_bundle_validates_against_declared_facets() {
        let provider = ExampleProvider::from_config(&json!({})).unwrap();
        let diagnostic = &provider.diagnostics()[0];
        let tmp = tempfile::tempdir().unwrap();
        let definition = ExecutionDefinition {
            execution_id: climate_eval_core::ExecutionId::from_raw(1).unwrap(),
            group_id: climate_eval_core::ExecutionGroupId::from_raw(1).unwrap(),
            provider_slug: ProviderSlug::new("example"),
            diagnostic_slug: diagnostic.slug(),
            group_key: climate_eval_core::GroupKey::new([]),
            datasets_by_source_type: std::collections::BTreeMap::new(),
            output_directory: tmp.path().to_path_buf(),
            scratch_directory: tmp.path().to_path_buf(),
            log_path: tmp.path().join("out.log"),
        };
        let result = diagnostic.build_execution_result(&definition).unwrap();
        result.metric_bundle.validate(&diagnostic.facets()).unwrap();
        let values = result.metric_bundle.scalar_values().unwrap();
        assert_eq!(values.len(), 2);
    }
}
