// crates/climate-eval-core/src/core/cmec.rs
// ============================================================================
// Module: Climate Eval CMEC Bundles
// Description: CMEC-compatible output and metric bundle models.
// Purpose: Serialize, validate, and flatten diagnostic result bundles.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Diagnostics report results as a pair of CMEC-compatible JSON envelopes:
//! the output bundle (`output.json`) indexing produced files, and the metric
//! bundle (`diagnostic.json`) carrying dimensioned numeric results. The
//! metric bundle's `DIMENSIONS.json_structure` names the facet order of the
//! nested `RESULTS` mapping; the deepest level must be a scalar. Keys with
//! null values are omitted on serialization and skipped on extraction, which
//! keeps write/read round trips lossless for everything else.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

use crate::core::execution::MetricValue;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Filename of the output bundle inside an execution's output directory.
pub const OUTPUT_BUNDLE_FILENAME: &str = "output.json";
/// Filename of the metric bundle inside an execution's output directory.
pub const METRIC_BUNDLE_FILENAME: &str = "diagnostic.json";

// ============================================================================
// SECTION: Output Bundle
// ============================================================================

/// Provenance block of an output bundle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// Execution environment description (package versions, platform).
    #[serde(default)]
    pub environment: Map<String, Value>,
    /// Model input datasets consumed by the diagnostic.
    #[serde(default)]
    pub modeldata: Vec<Value>,
    /// Observational input datasets consumed by the diagnostic.
    #[serde(default)]
    pub obsdata: Map<String, Value>,
    /// Relative path of the captured execution log.
    #[serde(default)]
    pub log: String,
}

/// Reference to one produced file in an output bundle section.
///
/// # Invariants
/// - `filename` is relative to the execution output directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFileReference {
    /// Output-directory-relative filename.
    pub filename: String,
    /// Optional short description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Optional descriptive long name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_name: Option<String>,
}

impl OutputFileReference {
    /// Creates a reference with no description fields.
    #[must_use]
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            description: None,
            long_name: None,
        }
    }
}

/// CMEC-compatible output bundle written to `output.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputBundle {
    /// Provenance of the execution.
    #[serde(default)]
    pub provenance: Provenance,
    /// Optional entry-point HTML page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    /// Produced data files keyed by a bundle-local name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, OutputFileReference>,
    /// Produced plot files keyed by a bundle-local name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub plots: BTreeMap<String, OutputFileReference>,
    /// Produced HTML files keyed by a bundle-local name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub html: BTreeMap<String, OutputFileReference>,
    /// Produced metric files keyed by a bundle-local name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, OutputFileReference>,
}

impl OutputBundle {
    /// Iterates all file references across the bundle sections.
    pub fn file_references(&self) -> impl Iterator<Item = &OutputFileReference> {
        self.data
            .values()
            .chain(self.plots.values())
            .chain(self.html.values())
            .chain(self.metrics.values())
    }

    /// Validates that every referenced filename is relative.
    ///
    /// # Errors
    ///
    /// Returns [`BundleError::AbsolutePath`] when a reference is absolute.
    pub fn validate(&self) -> Result<(), BundleError> {
        for reference in self.file_references() {
            if std::path::Path::new(&reference.filename).is_absolute() {
                return Err(BundleError::AbsolutePath {
                    path: reference.filename.clone(),
                });
            }
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Metric Bundle
// ============================================================================

/// Dimension declaration of a metric bundle.
///
/// # Invariants
/// - `json_structure` names the nesting order of `RESULTS`.
/// - Every facet in `json_structure` has a value listing in `entries`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricDimensions {
    /// Facet order of the nested results mapping.
    pub json_structure: Vec<String>,
    /// Per-facet value listings; values map to annotation objects.
    #[serde(flatten)]
    pub entries: BTreeMap<String, BTreeMap<String, Value>>,
}

/// CMEC-compatible metric bundle written to `diagnostic.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricBundle {
    /// Dimension declaration.
    #[serde(rename = "DIMENSIONS")]
    pub dimensions: MetricDimensions,
    /// Nested results keyed by the dimension order; leaves are numbers.
    #[serde(rename = "RESULTS")]
    pub results: Value,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Bundle validation and serialization errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BundleError {
    /// Bundle JSON failed to parse or serialize.
    #[error("bundle serialization failure: {0}")]
    Serialization(String),
    /// An output reference used an absolute path.
    #[error("bundle references absolute path: {path}")]
    AbsolutePath {
        /// Offending path.
        path: String,
    },
    /// `json_structure` is empty.
    #[error("metric bundle declares an empty json_structure")]
    EmptyStructure,
    /// A declared diagnostic facet is missing from `json_structure`.
    #[error("metric bundle is missing declared facet: {facet}")]
    MissingFacet {
        /// Missing facet name.
        facet: String,
    },
    /// `json_structure` names a facet the diagnostic did not declare.
    #[error("metric bundle names unknown facet: {facet}")]
    UnknownFacet {
        /// Unknown facet name.
        facet: String,
    },
    /// A `json_structure` facet has no value listing under `DIMENSIONS`.
    #[error("metric bundle has no dimension listing for facet: {facet}")]
    MissingDimension {
        /// Facet without a listing.
        facet: String,
    },
    /// A results key is absent from its facet's dimension listing.
    #[error("results key {value} is not listed under dimension {facet}")]
    UnlistedDimensionValue {
        /// Facet name.
        facet: String,
        /// Offending key.
        value: String,
    },
    /// A results node above the deepest level is not an object.
    #[error("results node at {path} is not an object")]
    ShallowLeaf {
        /// Slash-joined key path of the node.
        path: String,
    },
    /// A results leaf at the deepest level is not a scalar number.
    #[error("results leaf at {path} is not a scalar")]
    LeafNotScalar {
        /// Slash-joined key path of the leaf.
        path: String,
    },
}

// ============================================================================
// SECTION: Serialization
// ============================================================================

impl MetricBundle {
    /// Serializes the bundle to pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns [`BundleError::Serialization`] when encoding fails.
    pub fn to_json(&self) -> Result<String, BundleError> {
        serde_json::to_string_pretty(self).map_err(|err| BundleError::Serialization(err.to_string()))
    }

    /// Parses a bundle from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`BundleError::Serialization`] when decoding fails.
    pub fn from_json(text: &str) -> Result<Self, BundleError> {
        serde_json::from_str(text).map_err(|err| BundleError::Serialization(err.to_string()))
    }

    /// Validates the bundle against the diagnostic's declared facets.
    ///
    /// Checks, in order: non-empty `json_structure`; set equality between
    /// `json_structure` and the declared facets; a dimension listing per
    /// facet; structural nesting of `RESULTS` (objects above the deepest
    /// level, scalars at it, every key listed under its dimension). Keys
    /// bound to `null` are tolerated anywhere and skipped.
    ///
    /// # Errors
    ///
    /// Returns the first [`BundleError`] violation encountered.
    pub fn validate(&self, declared_facets: &BTreeSet<String>) -> Result<(), BundleError> {
        if self.dimensions.json_structure.is_empty() {
            return Err(BundleError::EmptyStructure);
        }
        let structure: BTreeSet<String> =
            self.dimensions.json_structure.iter().cloned().collect();
        for facet in declared_facets {
            if !structure.contains(facet) {
                return Err(BundleError::MissingFacet {
                    facet: facet.clone(),
                });
            }
        }
        for facet in &structure {
            if !declared_facets.contains(facet) {
                return Err(BundleError::UnknownFacet {
                    facet: facet.clone(),
                });
            }
            if !self.dimensions.entries.contains_key(facet) {
                return Err(BundleError::MissingDimension {
                    facet: facet.clone(),
                });
            }
        }
        self.walk_results(&self.results, 0, &mut Vec::new(), &mut |_, _| {})
    }

    /// Flattens `RESULTS` into scalar metric values with facet maps.
    ///
    /// Null leaves are omitted, matching the serialization rule for `None`
    /// values.
    ///
    /// # Errors
    ///
    /// Returns a [`BundleError`] when the nesting is malformed.
    pub fn scalar_values(&self) -> Result<Vec<MetricValue>, BundleError> {
        let mut values = Vec::new();
        self.walk_results(&self.results, 0, &mut Vec::new(), &mut |path, number| {
            let facets: BTreeMap<String, String> = self
                .dimensions
                .json_structure
                .iter()
                .cloned()
                .zip(path.iter().cloned())
                .collect();
            values.push(MetricValue {
                facets,
                value: number,
            });
        })?;
        Ok(values)
    }

    /// Walks `RESULTS` depth-first, invoking `visit` at each scalar leaf.
    fn walk_results(
        &self,
        node: &Value,
        depth: usize,
        path: &mut Vec<String>,
        visit: &mut impl FnMut(&[String], f64),
    ) -> Result<(), BundleError> {
        if node.is_null() {
            return Ok(());
        }
        if depth == self.dimensions.json_structure.len() {
            let Some(number) = node.as_f64() else {
                return Err(BundleError::LeafNotScalar {
                    path: path.join("/"),
                });
            };
            visit(path, number);
            return Ok(());
        }
        let Some(object) = node.as_object() else {
            return Err(BundleError::ShallowLeaf {
                path: path.join("/"),
            });
        };
        let facet = &self.dimensions.json_structure[depth];
        for (key, child) in object {
            if let Some(listing) = self.dimensions.entries.get(facet)
                && !listing.contains_key(key)
            {
                return Err(BundleError::UnlistedDimensionValue {
                    facet: facet.clone(),
                    value: key.clone(),
                });
            }
            path.push(key.clone());
            self.walk_results(child, depth + 1, path, visit)?;
            path.pop();
        }
        Ok(())
    }
}

impl OutputBundle {
    /// Serializes the bundle to pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns [`BundleError::Serialization`] when encoding fails.
    pub fn to_json(&self) -> Result<String, BundleError> {
        serde_json::to_string_pretty(self).map_err(|err| BundleError::Serialization(err.to_string()))
    }

    /// Parses a bundle from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`BundleError::Serialization`] when decoding fails.
    pub fn from_json(text: &str) -> Result<Self, BundleError> {
        serde_json::from_str(text).map_err(|err| BundleError::Serialization(err.to_string()))
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

    fn declared() -> BTreeSet<String> {
        ["region", "metric", "statistic"].iter().map(ToString::to_string).collect()
    }

    fn sample_bundle() -> MetricBundle {
        let mut entries = BTreeMap::new();
        entries.insert(
            "region".to_string(),
            BTreeMap::from([("global".to_string(), json!({}))]),
        );
        entries.insert(
            "metric".to_string(),
            BTreeMap::from([("bias".to_string(), json!({}))]),
        );
        entries.insert(
            "statistic".to_string(),
            BTreeMap::from([("rmse".to_string(), json!({})), ("mean".to_string(), json!({}))]),
        );
        MetricBundle {
            dimensions: MetricDimensions {
                json_structure: vec![
                    "region".to_string(),
                    "metric".to_string(),
                    "statistic".to_string(),
                ],
                entries,
            },
            results: json!({
                "global": { "bias": { "rmse": 1.25, "mean": 0.5 } }
            }),
        }
    }

    #[test]
    fn valid_bundle_passes_validation() {
        sample_bundle().validate(&declared()).unwrap();
    }

    #[test]
    fn object_leaves_at_full_depth_are_rejected() {
        let mut bundle = sample_bundle();
        bundle.results = json!({
            "global": { "bias": { "rmse": { "extra": 1.0 } } }
        });
        let err = bundle.validate(&declared()).unwrap_err();
        assert_eq!(
            err,
            BundleError::LeafNotScalar {
                path: "global/bias/rmse".to_string()
            }
        );
    }

    #[test]
    fn shallow_scalars_are_rejected() {
        let mut bundle = sample_bundle();
        bundle.results = json!({ "global": 3.0 });
        let err = bundle.validate(&declared()).unwrap_err();
        assert_eq!(
            err,
            BundleError::ShallowLeaf {
                path: "global".to_string()
            }
        );
    }

    #[test]
    fn missing_declared_facet_is_rejected() {
        let mut bundle = sample_bundle();
        bundle.dimensions.json_structure = vec!["region".to_string(), "metric".to_string()];
        let err = bundle.validate(&declared()).unwrap_err();
        assert_eq!(
            err,
            BundleError::MissingFacet {
                facet: "statistic".to_string()
            }
        );
    }

    #[test]
    fn undeclared_facet_is_rejected() {
        let bundle = sample_bundle();
        let fewer: BTreeSet<String> =
            ["region", "metric"].iter().map(ToString::to_string).collect();
        let err = bundle.validate(&fewer).unwrap_err();
        assert_eq!(
            err,
            BundleError::UnknownFacet {
                facet: "statistic".to_string()
            }
        );
    }

    #[test]
    fn unlisted_dimension_value_is_rejected() {
        let mut bundle = sample_bundle();
        bundle.results = json!({
            "tropics": { "bias": { "rmse": 1.0 } }
        });
        let err = bundle.validate(&declared()).unwrap_err();
        assert_eq!(
            err,
            BundleError::UnlistedDimensionValue {
                facet: "region".to_string(),
                value: "tropics".to_string()
            }
        );
    }

    #[test]
    fn scalar_values_flatten_with_facets() {
        let values = sample_bundle().scalar_values().unwrap();
        assert_eq!(values.len(), 2);
        let rmse = values.iter().find(|value| value.facets["statistic"] == "rmse").unwrap();
        assert!((rmse.value - 1.25).abs() < f64::EPSILON);
        assert_eq!(rmse.facets["region"], "global");
        assert_eq!(rmse.facets["metric"], "bias");
    }

    #[test]
    fn null_leaves_are_skipped() {
        let mut bundle = sample_bundle();
        bundle.results = json!({
            "global": { "bias": { "rmse": 1.0, "mean": null } }
        });
        bundle.validate(&declared()).unwrap();
        let values = bundle.scalar_values().unwrap();
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn metric_bundle_round_trips_through_json() {
        let bundle = sample_bundle();
        let text = bundle.to_json().unwrap();
        let reread = MetricBundle::from_json(&text).unwrap();
        assert_eq!(bundle, reread);
    }

    #[test]
    fn output_bundle_round_trips_and_omits_none() {
        let bundle = OutputBundle {
            provenance: Provenance {
                log: "out.log".to_string(),
                ..Provenance::default()
            },
            index: Some("index.html".to_string()),
            plots: [("bias-map".to_string(), OutputFileReference::new("plots/bias.png"))]
                .into_iter()
                .collect(),
            ..OutputBundle::default()
        };
        let text = bundle.to_json().unwrap();
        assert!(!text.contains("description"));
        let reread = OutputBundle::from_json(&text).unwrap();
        assert_eq!(bundle, reread);
    }

    #[test]
    fn output_bundle_rejects_absolute_paths() {
        let bundle = OutputBundle {
            data: [("bad".to_string(), OutputFileReference::new("/etc/passwd"))]
                .into_iter()
                .collect(),
            ..OutputBundle::default()
        };
        assert!(matches!(bundle.validate(), Err(BundleError::AbsolutePath { .. })));
    }
}
