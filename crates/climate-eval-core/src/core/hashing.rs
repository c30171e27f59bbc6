// crates/climate-eval-core/src/core/hashing.rs
// ============================================================================
// Module: Climate Eval Dataset Hashing
// Description: Canonical dataset-set hashing for execution identity.
// Purpose: Provide reproducible digests over input dataset version sets.
// Dependencies: sha2
// ============================================================================

//! ## Overview
//! An execution is identified within its group by the hash of its input
//! dataset versions. The canonical form is a contract, not an implementation
//! detail: one line `"{source_type}\t{instance_id}\t{version}\n"` per input
//! dataset, concatenated in (source_type asc, instance_id asc) order, hashed
//! with SHA-256 over UTF-8 bytes and rendered as lowercase hex. Identical
//! inputs yield bit-identical digests across processes, endiannesses, and
//! insertion orders.

// ============================================================================
// SECTION: Imports
// ============================================================================

use sha2::Digest;
use sha2::Sha256;

use crate::core::identifiers::DatasetVersion;
use crate::core::identifiers::InstanceId;
use crate::core::identifiers::SourceType;

// ============================================================================
// SECTION: Dataset Hash
// ============================================================================

/// One input dataset coordinate contributing to an execution's identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DatasetCoordinate {
    /// Source type of the dataset.
    pub source_type: SourceType,
    /// Instance identifier of the dataset.
    pub instance_id: InstanceId,
    /// Version of the dataset.
    pub version: DatasetVersion,
}

/// Returns the canonical byte string for a set of input datasets.
///
/// The input order is irrelevant; coordinates are sorted by
/// (source_type asc, instance_id asc) before concatenation.
#[must_use]
pub fn canonical_dataset_lines(coordinates: &[DatasetCoordinate]) -> String {
    let mut sorted: Vec<&DatasetCoordinate> = coordinates.iter().collect();
    sorted.sort_by(|a, b| {
        (&a.source_type, &a.instance_id).cmp(&(&b.source_type, &b.instance_id))
    });
    let mut out = String::new();
    for coordinate in sorted {
        out.push_str(coordinate.source_type.as_str());
        out.push('\t');
        out.push_str(coordinate.instance_id.as_str());
        out.push('\t');
        out.push_str(coordinate.version.as_str());
        out.push('\n');
    }
    out
}

/// Hashes a set of input datasets into the execution `dataset_hash`.
#[must_use]
pub fn dataset_hash(coordinates: &[DatasetCoordinate]) -> String {
    let canonical = canonical_dataset_lines(coordinates);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex_encode(&hasher.finalize())
}

/// Hashes raw bytes with SHA-256, rendered as lowercase hex.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

// ============================================================================
// SECTION: Hex Encoding
// ============================================================================

/// Encodes bytes as a lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
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

    use proptest::prelude::*;

    use super::*;

    fn coordinate(source: &str, instance: &str, version: &str) -> DatasetCoordinate {
        DatasetCoordinate {
            source_type: SourceType::new(source),
            instance_id: InstanceId::new(instance),
            version: DatasetVersion::new(version),
        }
    }

    #[test]
    fn canonical_lines_sort_by_source_then_instance() {
        let lines = canonical_dataset_lines(&[
            coordinate("obs4mips", "OBS.ts", "v1"),
            coordinate("cmip6", "CMIP6.b", "v2"),
            coordinate("cmip6", "CMIP6.a", "v1"),
        ]);
        assert_eq!(lines, "cmip6\tCMIP6.a\tv1\ncmip6\tCMIP6.b\tv2\nobs4mips\tOBS.ts\tv1\n");
    }

    #[test]
    fn hash_is_insertion_order_independent() {
        let forward = dataset_hash(&[
            coordinate("cmip6", "CMIP6.a", "v1"),
            coordinate("cmip6", "CMIP6.b", "v2"),
        ]);
        let reverse = dataset_hash(&[
            coordinate("cmip6", "CMIP6.b", "v2"),
            coordinate("cmip6", "CMIP6.a", "v1"),
        ]);
        assert_eq!(forward, reverse);
    }

    #[test]
    fn hash_changes_with_version() {
        let old = dataset_hash(&[coordinate("cmip6", "CMIP6.a", "v20190101")]);
        let new = dataset_hash(&[coordinate("cmip6", "CMIP6.a", "v20210101")]);
        assert_ne!(old, new);
    }

    #[test]
    fn hash_matches_contract_digest() {
        // SHA-256 of "cmip6\tCMIP6.a\tv1\n", independently computed.
        let digest = dataset_hash(&[coordinate("cmip6", "CMIP6.a", "v1")]);
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, sha256_hex(b"cmip6\tCMIP6.a\tv1\n"));
    }

    proptest! {
        #[test]
        fn hash_is_permutation_invariant(mut entries in proptest::collection::vec(
            ("[a-z]{1,8}", "[A-Za-z0-9.]{1,16}", "v[0-9]{1,8}"), 1..6)
        ) {
            let coordinates: Vec<DatasetCoordinate> = entries
                .iter()
                .map(|(s, i, v)| coordinate(s, i, v))
                .collect();
            let baseline = dataset_hash(&coordinates);
            entries.reverse();
            let reversed: Vec<DatasetCoordinate> = entries
                .iter()
                .map(|(s, i, v)| coordinate(s, i, v))
                .collect();
            prop_assert_eq!(baseline, dataset_hash(&reversed));
        }
    }
}
