// crates/climate-eval-core/src/core/identifiers.rs
// ============================================================================
// Module: Climate Eval Identifiers
// Description: Canonical opaque identifiers for datasets, diagnostics, and runs.
// Purpose: Provide strongly typed, serializable identifiers with stable wire forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! This module defines the canonical identifiers used throughout Climate Eval.
//! Identifiers are opaque and serialize as numbers or strings on the wire.
//! Numeric identifiers are surrogate row keys and enforce non-zero, 1-based
//! invariants at construction boundaries; in-memory references hold surrogate
//! keys only, never live row pointers.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::num::NonZeroU64;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Surrogate Row Identifiers
// ============================================================================

/// Surrogate identifier for a dataset row.
///
/// # Invariants
/// - Always >= 1 (non-zero, 1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetId(NonZeroU64);

impl DatasetId {
    /// Creates a new dataset identifier from a non-zero value.
    #[must_use]
    pub const fn new(id: NonZeroU64) -> Self {
        Self(id)
    }

    /// Creates a dataset identifier from a raw value (returns `None` if zero).
    #[must_use]
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    /// Returns the raw identifier value (always >= 1).
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.get().fmt(f)
    }
}

/// Surrogate identifier for a file row.
///
/// # Invariants
/// - Always >= 1 (non-zero, 1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(NonZeroU64);

impl FileId {
    /// Creates a new file identifier from a non-zero value.
    #[must_use]
    pub const fn new(id: NonZeroU64) -> Self {
        Self(id)
    }

    /// Creates a file identifier from a raw value (returns `None` if zero).
    #[must_use]
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    /// Returns the raw identifier value (always >= 1).
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.get().fmt(f)
    }
}

/// Surrogate identifier for an execution group row.
///
/// # Invariants
/// - Always >= 1 (non-zero, 1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionGroupId(NonZeroU64);

impl ExecutionGroupId {
    /// Creates a new group identifier from a non-zero value.
    #[must_use]
    pub const fn new(id: NonZeroU64) -> Self {
        Self(id)
    }

    /// Creates a group identifier from a raw value (returns `None` if zero).
    #[must_use]
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    /// Returns the raw identifier value (always >= 1).
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for ExecutionGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.get().fmt(f)
    }
}

/// Surrogate identifier for an execution row.
///
/// # Invariants
/// - Always >= 1 (non-zero, 1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(NonZeroU64);

impl ExecutionId {
    /// Creates a new execution identifier from a non-zero value.
    #[must_use]
    pub const fn new(id: NonZeroU64) -> Self {
        Self(id)
    }

    /// Creates an execution identifier from a raw value (returns `None` if zero).
    #[must_use]
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    /// Returns the raw identifier value (always >= 1).
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.get().fmt(f)
    }
}

// ============================================================================
// SECTION: Source Type
// ============================================================================

/// Dataset source type selecting a catalog view and its metadata adapter.
///
/// # Invariants
/// - Opaque lowercase UTF-8 string; new source types are introduced by
///   registering an adapter, never by enumerating here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceType(String);

impl SourceType {
    /// CMOR-compliant CMIP6 model output.
    pub const CMIP6: &'static str = "cmip6";
    /// obs4MIPs observational reference datasets.
    pub const OBS4MIPS: &'static str = "obs4mips";
    /// PMP climatology reference datasets.
    pub const PMP_CLIMATOLOGY: &'static str = "pmp-climatology";

    /// Creates a new source type, normalizing to lowercase.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().to_ascii_lowercase())
    }

    /// Returns the source type as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the CMIP6 source type.
    #[must_use]
    pub fn cmip6() -> Self {
        Self::new(Self::CMIP6)
    }

    /// Returns the obs4MIPs source type.
    #[must_use]
    pub fn obs4mips() -> Self {
        Self::new(Self::OBS4MIPS)
    }

    /// Returns the PMP climatology source type.
    #[must_use]
    pub fn pmp_climatology() -> Self {
        Self::new(Self::PMP_CLIMATOLOGY)
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for SourceType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SourceType {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// SECTION: String Identifiers
// ============================================================================

/// Stable, content-derived dataset identifier independent of version.
///
/// # Invariants
/// - Opaque UTF-8 string; unique within a source type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// Creates a new instance identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for InstanceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for InstanceId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Dataset version identifier.
///
/// # Invariants
/// - Opaque UTF-8 string; versions of one instance order lexicographically
///   (the CMIP convention `vYYYYMMDD` satisfies this).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetVersion(String);

impl DatasetVersion {
    /// Creates a new dataset version.
    #[must_use]
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    /// Returns the version as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for DatasetVersion {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DatasetVersion {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Provider slug naming a diagnostic provider plugin.
///
/// # Invariants
/// - Opaque UTF-8 string; unique within the provider registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderSlug(String);

impl ProviderSlug {
    /// Creates a new provider slug.
    #[must_use]
    pub fn new(slug: impl Into<String>) -> Self {
        Self(slug.into())
    }

    /// Returns the slug as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for ProviderSlug {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ProviderSlug {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Diagnostic slug naming a diagnostic within a provider.
///
/// # Invariants
/// - Opaque UTF-8 string; unique within one provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiagnosticSlug(String);

impl DiagnosticSlug {
    /// Creates a new diagnostic slug.
    #[must_use]
    pub fn new(slug: impl Into<String>) -> Self {
        Self(slug.into())
    }

    /// Returns the slug as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DiagnosticSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for DiagnosticSlug {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DiagnosticSlug {
    fn from(value: String) -> Self {
        Self::new(value)
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

    use super::*;

    #[test]
    fn surrogate_ids_reject_zero() {
        assert!(DatasetId::from_raw(0).is_none());
        assert!(ExecutionGroupId::from_raw(0).is_none());
        assert!(ExecutionId::from_raw(0).is_none());
        assert_eq!(DatasetId::from_raw(7).unwrap().get(), 7);
    }

    #[test]
    fn source_type_normalizes_to_lowercase() {
        assert_eq!(SourceType::new("CMIP6").as_str(), "cmip6");
        assert_eq!(SourceType::cmip6(), SourceType::new("cmip6"));
    }

    #[test]
    fn dataset_versions_order_lexicographically() {
        let older = DatasetVersion::new("v20190101");
        let newer = DatasetVersion::new("v20210101");
        assert!(older < newer);
    }
}
