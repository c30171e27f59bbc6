// crates/climate-eval-providers/src/registry.rs
// ============================================================================
// Module: Provider Registry
// Description: Registry for built-in and configured diagnostic providers.
// Purpose: Resolve diagnostics by slug with static, no-dynamic-import wiring.
// Dependencies: climate-eval-core, serde_json
// ============================================================================

//! ## Overview
//! Providers register by slug at process start; the registry resolves
//! fully-qualified provider names from configuration against a static table
//! of constructors, avoiding any runtime code loading. Duplicate
//! registrations are rejected. The registry implements
//! [`climate_eval_core::DiagnosticLookup`] so the solver and executors stay
//! decoupled from concrete providers.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use climate_eval_core::Diagnostic;
use climate_eval_core::DiagnosticLookup;
use climate_eval_core::DiagnosticProvider;
use climate_eval_core::DiagnosticSlug;
use climate_eval_core::DiagnosticSummary;
use climate_eval_core::ProviderSlug;
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::command::CommandProvider;
use crate::example::ExampleProvider;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Fully-qualified name of the built-in example provider.
pub const EXAMPLE_PROVIDER_NAME: &str = "climate_eval_providers::example::ExampleProvider";
/// Fully-qualified name of the subprocess command provider.
pub const COMMAND_PROVIDER_NAME: &str = "climate_eval_providers::command::CommandProvider";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Provider registry errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A provider slug was registered twice.
    #[error("provider already registered: {0}")]
    Duplicate(ProviderSlug),
    /// A configured provider name has no static constructor.
    #[error("unknown provider entry point: {0}")]
    UnknownProvider(String),
    /// A provider rejected its configuration.
    #[error("provider configuration invalid: {0}")]
    InvalidConfig(String),
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Diagnostic provider registry.
///
/// # Invariants
/// - Provider slugs are unique within the registry.
/// - Registered providers are `Send + Sync` behind trait objects.
#[derive(Default)]
pub struct ProviderRegistry {
    /// Provider implementations keyed by slug.
    providers: BTreeMap<ProviderSlug, Arc<dyn DiagnosticProvider>>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] when the slug is taken.
    pub fn register(&mut self, provider: Arc<dyn DiagnosticProvider>) -> Result<(), RegistryError> {
        let slug = provider.slug();
        if self.providers.contains_key(&slug) {
            return Err(RegistryError::Duplicate(slug));
        }
        info!(provider = %slug, version = %provider.version(), "registered diagnostic provider");
        self.providers.insert(slug, provider);
        Ok(())
    }

    /// Resolves one configured entry point against the static constructor
    /// table and registers the result.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] for unknown names, invalid configuration,
    /// or duplicate slugs.
    pub fn register_entry_point(
        &mut self,
        entry_point: &str,
        config: &Value,
    ) -> Result<(), RegistryError> {
        let provider: Arc<dyn DiagnosticProvider> = match entry_point {
            EXAMPLE_PROVIDER_NAME => Arc::new(ExampleProvider::from_config(config)?),
            COMMAND_PROVIDER_NAME => Arc::new(CommandProvider::from_config(config)?),
            other => return Err(RegistryError::UnknownProvider(other.to_string())),
        };
        self.register(provider)
    }

    /// Returns the registered provider slugs.
    #[must_use]
    pub fn provider_slugs(&self) -> Vec<ProviderSlug> {
        self.providers.keys().cloned().collect()
    }

    /// Returns the registered `(provider, diagnostic)` pairs.
    #[must_use]
    pub fn registered_pairs(&self) -> Vec<(ProviderSlug, DiagnosticSlug)> {
        self.summaries()
            .into_iter()
            .map(|summary| (summary.provider_slug, summary.diagnostic_slug))
            .collect()
    }
}

impl DiagnosticLookup for ProviderRegistry {
    fn diagnostic(
        &self,
        provider: &ProviderSlug,
        diagnostic: &DiagnosticSlug,
    ) -> Option<Arc<dyn Diagnostic>> {
        self.providers
            .get(provider)?
            .diagnostics()
            .into_iter()
            .find(|candidate| candidate.slug() == *diagnostic)
    }

    fn summaries(&self) -> Vec<DiagnosticSummary> {
        let mut summaries = Vec::new();
        for (slug, provider) in &self.providers {
            for diagnostic in provider.diagnostics() {
                summaries.push(DiagnosticSummary {
                    provider_slug: slug.clone(),
                    diagnostic_slug: diagnostic.slug(),
                    data_requirements: diagnostic.data_requirements(),
                    facets: diagnostic.facets(),
                });
            }
        }
        summaries
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
    fn duplicate_registration_is_rejected() {
        let mut registry = ProviderRegistry::new();
        registry.register_entry_point(EXAMPLE_PROVIDER_NAME, &json!({})).unwrap();
        let err = registry.register_entry_point(EXAMPLE_PROVIDER_NAME, &json!({})).unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(_)));
    }

    #[test]
    fn unknown_entry_points_are_rejected() {
        let mut registry = ProviderRegistry::new();
        let err = registry.register_entry_point("nonexistent::Provider", &json!({})).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownProvider(_)));
    }

    #[test]
    fn summaries_cover_all_registered_diagnostics() {
        let mut registry = ProviderRegistry::new();
        registry.register_entry_point(EXAMPLE_PROVIDER_NAME, &json!({})).unwrap();
        let summaries = registry.summaries();
        assert!(!summaries.is_empty());
        let first = &summaries[0];
        assert!(
            registry.diagnostic(&first.provider_slug, &first.diagnostic_slug).is_some(),
            "summary must resolve back to its diagnostic"
        );
    }
}
