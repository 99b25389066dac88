use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============ Location Models ============

/// A single scalar attribute value carried by a location row.
///
/// `Missing` is explicit: an absent attribute reads as it and it is never
/// coerced into `0` or an empty string. Decoded and validated attribute maps
/// leave such attributes out instead of storing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// Numeric value (coordinates, codes given as numbers, values).
    Number(f64),
    /// Free text value.
    Text(String),
    /// No value supplied.
    Missing,
}

impl AttributeValue {
    /// Returns the numeric value, if this is a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            AttributeValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the text value, if this is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, AttributeValue::Missing)
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Number(n) => write!(f, "{}", n),
            AttributeValue::Text(s) => write!(f, "{}", s),
            AttributeValue::Missing => Ok(()),
        }
    }
}

static MISSING: AttributeValue = AttributeValue::Missing;

/// A decoded location row that has not been validated yet.
///
/// Produced by the transcoding layer. The identifier may be absent here; the
/// batch resolver turns such rows into `Fail` results instead of aborting.
#[derive(Debug, Clone, PartialEq)]
pub struct RawLocation {
    /// 1-based position of the row in the submitted payload.
    pub row: usize,
    /// Caller-assigned identifier, if one was supplied.
    pub location_id: Option<String>,
    /// Attribute values keyed by lower-cased field name.
    pub attributes: BTreeMap<String, AttributeValue>,
    /// Problem found while decoding this record alone, e.g. a JSON array where
    /// a scalar was expected. Such a record is rejected during validation.
    pub invalid: Option<String>,
}

impl From<LocationRecord> for RawLocation {
    fn from(record: LocationRecord) -> Self {
        Self {
            row: 0,
            location_id: Some(record.location_id),
            attributes: record.attributes,
            invalid: None,
        }
    }
}

/// A structurally valid location, ready to be handed to a lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    /// Caller-assigned identifier, unique within a batch and never empty.
    pub location_id: String,
    /// Normalized attribute values keyed by lower-cased field name.
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl LocationRecord {
    pub fn new(location_id: impl Into<String>) -> Self {
        Self {
            location_id: location_id.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style attribute setter, mostly useful in tests and tools.
    pub fn with(mut self, name: &str, value: AttributeValue) -> Self {
        self.attributes.insert(name.to_lowercase(), value);
        self
    }

    /// Returns the attribute, treating an absent key as `Missing`.
    pub fn get(&self, name: &str) -> &AttributeValue {
        self.attributes.get(name).unwrap_or(&MISSING)
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.get(name).as_number()
    }

    /// Returns a trimmed, non-empty text attribute.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name)
            .as_text()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

// ============ Key Models ============

/// Hazard type code, e.g. `QEQ` or `WTC`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PerilId(pub String);

impl PerilId {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PerilId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Insured component a key applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoverageTypeId(pub u8);

impl CoverageTypeId {
    pub const BUILDINGS: CoverageTypeId = CoverageTypeId(1);
    pub const OTHER: CoverageTypeId = CoverageTypeId(2);
    pub const CONTENTS: CoverageTypeId = CoverageTypeId(3);
    pub const BI: CoverageTypeId = CoverageTypeId(4);

    /// Whether this is one of the standard coverage codes.
    pub fn is_known(&self) -> bool {
        (1..=4).contains(&self.0)
    }
}

impl fmt::Display for CoverageTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub type AreaPerilId = u64;
pub type VulnerabilityId = u64;

/// Outcome of a lookup for one location/peril/coverage triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Success,
    Fail,
    #[serde(rename = "nomatch")]
    NoMatch,
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyStatus::Success => f.write_str("success"),
            KeyStatus::Fail => f.write_str("fail"),
            KeyStatus::NoMatch => f.write_str("nomatch"),
        }
    }
}

/// One output row, keyed by `(location_id, peril_id, coverage_type)`.
///
/// Use the `success`, `no_match` and `fail` constructors: they keep the ids
/// present only for successful rows and always attach a reason otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyResult {
    /// Location identifier. `None` only for rows synthesized for records that
    /// arrived without an identifier.
    pub location_id: Option<String>,
    /// Peril the key applies to.
    pub peril_id: PerilId,
    /// Coverage type the key applies to.
    pub coverage_type: CoverageTypeId,
    /// Lookup outcome.
    pub status: KeyStatus,
    /// Area peril id, present iff `status == Success`.
    pub area_peril_id: Option<AreaPerilId>,
    /// Vulnerability id, present iff `status == Success`.
    pub vulnerability_id: Option<VulnerabilityId>,
    /// Human-readable reason; always set for non-success rows.
    pub message: String,
}

impl KeyResult {
    pub fn success(
        location_id: impl Into<String>,
        peril_id: PerilId,
        coverage_type: CoverageTypeId,
        area_peril_id: AreaPerilId,
        vulnerability_id: VulnerabilityId,
        message: impl Into<String>,
    ) -> Self {
        Self {
            location_id: Some(location_id.into()),
            peril_id,
            coverage_type,
            status: KeyStatus::Success,
            area_peril_id: Some(area_peril_id),
            vulnerability_id: Some(vulnerability_id),
            message: message.into(),
        }
    }

    pub fn no_match(
        location_id: impl Into<String>,
        peril_id: PerilId,
        coverage_type: CoverageTypeId,
        message: impl Into<String>,
    ) -> Self {
        Self::unresolved(
            Some(location_id.into()),
            peril_id,
            coverage_type,
            KeyStatus::NoMatch,
            message.into(),
        )
    }

    pub fn fail(
        location_id: Option<String>,
        peril_id: PerilId,
        coverage_type: CoverageTypeId,
        message: impl Into<String>,
    ) -> Self {
        Self::unresolved(
            location_id,
            peril_id,
            coverage_type,
            KeyStatus::Fail,
            message.into(),
        )
    }

    fn unresolved(
        location_id: Option<String>,
        peril_id: PerilId,
        coverage_type: CoverageTypeId,
        status: KeyStatus,
        message: String,
    ) -> Self {
        let message = if message.trim().is_empty() {
            format!("{} without further detail", status)
        } else {
            message
        };
        Self {
            location_id,
            peril_id,
            coverage_type,
            status,
            area_peril_id: None,
            vulnerability_id: None,
            message,
        }
    }

    /// Ordering key used for rows belonging to the same location.
    pub fn pair(&self) -> (&PerilId, CoverageTypeId) {
        (&self.peril_id, self.coverage_type)
    }
}

/// Per-status counters for one resolved batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Records submitted in the batch.
    pub locations_received: usize,
    /// Records rejected by structural validation.
    pub locations_rejected: usize,
    /// Locations whose lookup exceeded the per-location timeout.
    pub locations_timed_out: usize,
    /// Locations answered from the result cache.
    pub cache_hits: usize,
    /// Rows with `Success` status.
    pub success: usize,
    /// Rows with `Fail` status.
    pub fail: usize,
    /// Rows with `NoMatch` status.
    pub no_match: usize,
}

impl BatchSummary {
    pub fn record(&mut self, result: &KeyResult) {
        match result.status {
            KeyStatus::Success => self.success += 1,
            KeyStatus::Fail => self.fail += 1,
            KeyStatus::NoMatch => self.no_match += 1,
        }
    }

    pub fn total_rows(&self) -> usize {
        self.success + self.fail + self.no_match
    }
}

// ============ Model Metadata ============

/// Identity of the model served by this process, read from `ModelVersion.csv`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model supplier identifier.
    pub supplier_id: String,
    /// Model identifier.
    pub model_id: String,
    /// Model version string.
    pub model_version: String,
}

impl ModelInfo {
    /// URL prefix under which the keys endpoints are served.
    pub fn base_path(&self) -> String {
        format!(
            "/{}/{}/{}",
            self.supplier_id, self.model_id, self.model_version
        )
    }
}

impl fmt::Display for ModelInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.supplier_id, self.model_id, self.model_version
        )
    }
}
