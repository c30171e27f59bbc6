// crates/climate-eval-catalog/src/query.rs
// ============================================================================
// Module: Catalog Queries
// Description: Filtered tabular queries and projections over the catalog.
// Purpose: Answer catalog queries as result tables for the resolver and CLI.
// Dependencies: climate-eval-core
// ============================================================================

//! ## Overview
//! Query results are tabular: one row per active dataset with every facet as
//! a column plus the dataset surrogate key and identity columns. Filters are
//! the same clauses the resolver uses: keep clauses are conjunctive, exclude
//! clauses remove a row only when all their facets match. `list` is a
//! deduplicated projection across every source type in the catalog.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use climate_eval_core::DatasetId;
use climate_eval_core::EvaluationStore;
use climate_eval_core::FacetFilter;
use climate_eval_core::ResolvedDataset;
use climate_eval_core::SourceType;
use climate_eval_core::StoreError;

// ============================================================================
// SECTION: Table Types
// ============================================================================

/// One row of a catalog query result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRow {
    /// Dataset surrogate key.
    pub dataset_id: DatasetId,
    /// Column values: every facet plus the identity columns.
    pub values: BTreeMap<String, String>,
}

/// Tabular catalog query result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogTable {
    /// Result rows in deterministic (instance id) order.
    pub rows: Vec<CatalogRow>,
}

impl CatalogTable {
    /// Returns the sorted union of column names across rows.
    #[must_use]
    pub fn columns(&self) -> Vec<String> {
        let mut columns: BTreeSet<String> = BTreeSet::new();
        for row in &self.rows {
            columns.extend(row.values.keys().cloned());
        }
        columns.into_iter().collect()
    }
}

// ============================================================================
// SECTION: Query
// ============================================================================

/// Runs a filtered query over one source type's active datasets.
///
/// # Errors
///
/// Returns [`StoreError`] when the catalog cannot be read.
pub fn query(
    store: &dyn EvaluationStore,
    source_type: &SourceType,
    filters: &[FacetFilter],
) -> Result<CatalogTable, StoreError> {
    let mut datasets = store.active_datasets(source_type)?;
    datasets.sort_by(|a, b| a.dataset.record.instance_id.cmp(&b.dataset.record.instance_id));
    let rows = datasets
        .iter()
        .filter(|dataset| passes(filters, dataset))
        .map(|dataset| CatalogRow {
            dataset_id: dataset.dataset.id,
            values: row_values(dataset),
        })
        .collect();
    Ok(CatalogTable {
        rows,
    })
}

/// Returns true when a dataset satisfies every keep filter and no exclude
/// filter.
fn passes(filters: &[FacetFilter], dataset: &ResolvedDataset) -> bool {
    let lookup = |name: &str| dataset.facet(name).map(ToString::to_string);
    filters.iter().all(|filter| {
        if filter.keep {
            filter.matches(lookup)
        } else {
            !filter.matches(lookup)
        }
    })
}

/// Builds the column values for one dataset row.
fn row_values(dataset: &ResolvedDataset) -> BTreeMap<String, String> {
    let record = &dataset.dataset.record;
    let mut values = record.facets.clone();
    values.insert("source_type".to_string(), record.source_type.as_str().to_string());
    values.insert("instance_id".to_string(), record.instance_id.as_str().to_string());
    values.insert("version".to_string(), record.version.as_str().to_string());
    values
}

// ============================================================================
// SECTION: List
// ============================================================================

/// Deduplicated projection of the requested columns over all active
/// datasets, truncated to `limit` rows when given.
///
/// # Errors
///
/// Returns [`StoreError`] when the catalog cannot be read.
pub fn list(
    store: &dyn EvaluationStore,
    columns: &[String],
    limit: Option<usize>,
) -> Result<Vec<BTreeMap<String, String>>, StoreError> {
    let mut projected: BTreeSet<BTreeMap<String, String>> = BTreeSet::new();
    for source_type in store.source_types()? {
        for dataset in store.active_datasets(&source_type)? {
            let values = row_values(&dataset);
            let row: BTreeMap<String, String> = columns
                .iter()
                .filter_map(|column| {
                    values.get(column).map(|value| (column.clone(), value.clone()))
                })
                .collect();
            if !row.is_empty() {
                projected.insert(row);
            }
        }
    }
    let mut rows: Vec<BTreeMap<String, String>> = projected.into_iter().collect();
    if let Some(limit) = limit {
        rows.truncate(limit);
    }
    Ok(rows)
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

    use climate_eval_core::DatasetRecord;
    use climate_eval_core::DatasetVersion;
    use climate_eval_core::FacetMap;
    use climate_eval_core::FacetMatch;
    use climate_eval_core::InMemoryEvaluationStore;
    use climate_eval_core::InstanceId;
    use climate_eval_core::Timestamp;

    use super::*;

    fn seed(store: &InMemoryEvaluationStore, variable: &str, experiment: &str) {
        let mut facets = FacetMap::new();
        facets.insert("variable_id".to_string(), variable.to_string());
        facets.insert("experiment_id".to_string(), experiment.to_string());
        store
            .upsert_dataset(
                &DatasetRecord {
                    source_type: SourceType::cmip6(),
                    instance_id: InstanceId::new(format!("CMIP6.{experiment}.{variable}")),
                    version: DatasetVersion::new("v1"),
                    facets,
                },
                &[],
                Timestamp::from_unix_seconds(0),
            )
            .unwrap();
    }

    #[test]
    fn keep_filters_are_conjunctive() {
        let store = InMemoryEvaluationStore::new();
        seed(&store, "tas", "historical");
        seed(&store, "pr", "historical");
        seed(&store, "tas", "ssp119");

        let filters = vec![FacetFilter::keep([
            ("variable_id", FacetMatch::from("tas")),
            ("experiment_id", FacetMatch::from("historical")),
        ])];
        let table = query(&store, &SourceType::cmip6(), &filters).unwrap();
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0].values["instance_id"], "CMIP6.historical.tas");
    }

    #[test]
    fn exclude_filters_require_all_facets_to_match() {
        let store = InMemoryEvaluationStore::new();
        seed(&store, "tas", "historical");
        seed(&store, "tas", "ssp119");

        let filters = vec![FacetFilter::exclude([
            ("variable_id", FacetMatch::from("tas")),
            ("experiment_id", FacetMatch::from("ssp119")),
        ])];
        let table = query(&store, &SourceType::cmip6(), &filters).unwrap();
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0].values["experiment_id"], "historical");
    }

    #[test]
    fn table_columns_include_identity_and_facets() {
        let store = InMemoryEvaluationStore::new();
        seed(&store, "tas", "historical");
        let table = query(&store, &SourceType::cmip6(), &[]).unwrap();
        let columns = table.columns();
        for expected in ["experiment_id", "instance_id", "source_type", "variable_id", "version"] {
            assert!(columns.iter().any(|column| column == expected), "missing {expected}");
        }
    }

    #[test]
    fn list_deduplicates_projected_rows() {
        let store = InMemoryEvaluationStore::new();
        seed(&store, "tas", "historical");
        seed(&store, "tas", "ssp119");

        let rows = list(&store, &["variable_id".to_string()], None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["variable_id"], "tas");
    }

    #[test]
    fn list_honors_the_limit() {
        let store = InMemoryEvaluationStore::new();
        seed(&store, "tas", "historical");
        seed(&store, "pr", "historical");
        seed(&store, "ts", "historical");

        let rows = list(&store, &["variable_id".to_string()], Some(2)).unwrap();
        assert_eq!(rows.len(), 2);
    }
}
