//! The keys lookup contract.
//!
//! A concrete peril model implements [`KeysLookup`]; everything else in the
//! service (validation, batching, ordering, transcoding) is model-agnostic and
//! only talks to this trait.

use crate::errors::LookupError;
use crate::models::{CoverageTypeId, KeyResult, LocationRecord, ModelInfo, PerilId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Lazy, single-pass sequence of key rows produced by a lookup.
///
/// An `Err` item is an infrastructure fault and ends the batch; match
/// failures are ordinary `Ok` rows with `Fail`/`NoMatch` status.
pub type KeyStream<'a> = Box<dyn Iterator<Item = Result<KeyResult, LookupError>> + Send + 'a>;

/// Resolves locations into model keys.
///
/// Implementations must be deterministic: the same locations and configuration
/// always produce the same rows. Rows for a location should cover every pair in
/// [`LookupConfiguration::applicable_pairs`] exactly once.
pub trait KeysLookup: Send + Sync {
    fn resolve<'a>(
        &'a self,
        locations: Vec<LocationRecord>,
        config: &'a LookupConfiguration,
    ) -> KeyStream<'a>;

    /// Checks that the reference data behind this lookup is reachable.
    /// Only called by the health check when probing is enabled.
    fn probe(&self, _config: &LookupConfiguration) -> Result<(), LookupError> {
        Ok(())
    }

    /// Whether rows depend only on a location's attributes, never on its id.
    ///
    /// Only then may the resolver answer a location with rows cached for
    /// another location carrying the same attributes. Messages count too: a
    /// lookup that mentions the id in a message must keep this `false`.
    fn cacheable_by_attributes(&self) -> bool {
        false
    }
}

// ============ Attribute Schema ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeKind {
    Number,
    Text,
}

/// Declares how one location attribute must look for this model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSpec {
    /// Lower-cased attribute name.
    pub name: String,
    pub kind: AttributeKind,
    /// Whether the attribute must be present on every location.
    #[serde(default)]
    pub required: bool,
    /// Inclusive lower bound for numeric attributes.
    #[serde(default)]
    pub min: Option<f64>,
    /// Inclusive upper bound for numeric attributes.
    #[serde(default)]
    pub max: Option<f64>,
}

impl AttributeSpec {
    pub fn number(name: &str) -> Self {
        Self {
            name: name.to_lowercase(),
            kind: AttributeKind::Number,
            required: false,
            min: None,
            max: None,
        }
    }

    pub fn text(name: &str) -> Self {
        Self {
            name: name.to_lowercase(),
            kind: AttributeKind::Text,
            required: false,
            min: None,
            max: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }
}

/// Model-defined set of typed attributes. Attributes not listed pass through
/// validation untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeSchema {
    pub attributes: Vec<AttributeSpec>,
}

impl AttributeSchema {
    pub fn new(attributes: Vec<AttributeSpec>) -> Self {
        Self { attributes }
    }

    pub fn get(&self, name: &str) -> Option<&AttributeSpec> {
        self.attributes.iter().find(|spec| spec.name == name)
    }
}

// ============ Lookup Configuration ============

/// Process-wide, read-only description of what a model resolves.
///
/// Built once from static reference data and shared behind an `Arc`; never
/// mutated after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupConfiguration {
    pub model: ModelInfo,
    perils: Vec<PerilId>,
    coverage_types: Vec<CoverageTypeId>,
    pub schema: AttributeSchema,
    /// Directory the reference data was read from, if any.
    pub keys_data_path: Option<PathBuf>,
}

impl LookupConfiguration {
    /// Perils and coverage types are sorted and de-duplicated so that
    /// `applicable_pairs` is already in output order.
    pub fn new(
        model: ModelInfo,
        perils: Vec<PerilId>,
        coverage_types: Vec<CoverageTypeId>,
        schema: AttributeSchema,
    ) -> Result<Self, LookupError> {
        let mut perils = perils;
        perils.sort();
        perils.dedup();
        let mut coverage_types = coverage_types;
        coverage_types.sort();
        coverage_types.dedup();

        if perils.is_empty() {
            return Err(LookupError::InvalidConfiguration(
                "at least one peril must be active".to_string(),
            ));
        }
        if coverage_types.is_empty() {
            return Err(LookupError::InvalidConfiguration(
                "at least one coverage type must be active".to_string(),
            ));
        }
        if let Some(unknown) = coverage_types.iter().find(|c| !c.is_known()) {
            return Err(LookupError::InvalidConfiguration(format!(
                "unknown coverage type {}",
                unknown
            )));
        }

        Ok(Self {
            model,
            perils,
            coverage_types,
            schema,
            keys_data_path: None,
        })
    }

    pub fn with_keys_data_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.keys_data_path = Some(path.into());
        self
    }

    pub fn perils(&self) -> &[PerilId] {
        &self.perils
    }

    pub fn coverage_types(&self) -> &[CoverageTypeId] {
        &self.coverage_types
    }

    /// Every (peril, coverage) pair a location is resolved for, ascending.
    pub fn applicable_pairs(&self) -> Vec<(PerilId, CoverageTypeId)> {
        self.perils
            .iter()
            .flat_map(|peril| {
                self.coverage_types
                    .iter()
                    .map(move |coverage| (peril.clone(), *coverage))
            })
            .collect()
    }
}

// ============ Snapshot ============

/// A consistent pairing of configuration and lookup.
///
/// The service swaps whole snapshots on reload, so a batch that started on
/// one snapshot finishes on it.
pub struct LookupSnapshot {
    pub config: Arc<LookupConfiguration>,
    pub lookup: Arc<dyn KeysLookup>,
    /// Increases with every reload; part of result cache keys.
    pub generation: u64,
    pub loaded_at: DateTime<Utc>,
}

impl LookupSnapshot {
    pub fn new(config: LookupConfiguration, lookup: Arc<dyn KeysLookup>, generation: u64) -> Self {
        Self {
            config: Arc::new(config),
            lookup,
            generation,
            loaded_at: Utc::now(),
        }
    }
}

impl std::fmt::Debug for LookupSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LookupSnapshot")
            .field("model", &self.config.model)
            .field("generation", &self.generation)
            .field("loaded_at", &self.loaded_at)
            .finish()
    }
}
