//! Loading of static reference data from the keys data directory.
//!
//! Layout:
//! - `ModelVersion.csv`: one header-less row `supplier,model,version`
//! - `lookup.json`: active perils/coverages, attribute schema and table paths
//! - the area-peril and vulnerability dictionaries named in `lookup.json`

use crate::errors::LookupError;
use crate::lookup::{AttributeSpec, LookupConfiguration};
use crate::models::{AreaPerilId, CoverageTypeId, ModelInfo, PerilId, VulnerabilityId};
use crate::reference_lookup::{ReferenceTableLookup, ReferenceTables};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const MODEL_VERSION_FILE: &str = "ModelVersion.csv";
pub const LOOKUP_CONFIG_FILE: &str = "lookup.json";
pub const KEYS_DATA_PATH_PLACEHOLDER: &str = "%KEYS_DATA_PATH%";

fn default_max_distance_km() -> f64 {
    15.0
}

/// Contents of `lookup.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct LookupSettings {
    pub perils: Vec<PerilId>,
    pub coverage_types: Vec<CoverageTypeId>,
    /// Attribute schema; the built-in schema is used when empty.
    #[serde(default)]
    pub attributes: Vec<AttributeSpec>,
    pub area_peril: AreaPerilSettings,
    pub vulnerability: VulnerabilitySettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AreaPerilSettings {
    pub file_path: String,
    /// Coordinates farther than this from every point area do not match.
    #[serde(default = "default_max_distance_km")]
    pub max_distance_km: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VulnerabilitySettings {
    pub file_path: String,
}

/// Granularity of an area-peril dictionary row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AreaLevel {
    Point,
    City,
    State,
    Country,
}

/// One row of the area-peril dictionary.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AreaRecord {
    pub area_peril_id: AreaPerilId,
    pub peril_id: PerilId,
    pub level: AreaLevel,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub country: String,
    pub state: Option<String>,
    pub city: Option<String>,
}

/// One row of the vulnerability dictionary. `*` in a code column matches any value.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VulnerabilityRecord {
    pub vulnerability_id: VulnerabilityId,
    pub peril_id: PerilId,
    pub coverage_type: CoverageTypeId,
    pub occupancy_code: String,
    pub construction_code: String,
}

/// Configuration and lookup built from one read of the keys data directory.
pub struct LoadedModel {
    pub config: LookupConfiguration,
    pub lookup: ReferenceTableLookup,
}

/// Replaces the `%KEYS_DATA_PATH%` placeholder and anchors relative paths in
/// the keys data directory.
pub fn expand_path(template: &str, keys_data_path: &Path) -> PathBuf {
    let expanded = template.replace(
        KEYS_DATA_PATH_PLACEHOLDER,
        &keys_data_path.to_string_lossy(),
    );
    let path = PathBuf::from(expanded);
    if path.is_absolute() {
        path
    } else {
        keys_data_path.join(path)
    }
}

fn unavailable(path: &Path, err: impl std::fmt::Display) -> LookupError {
    LookupError::ReferenceDataUnavailable(format!("{}: {}", path.display(), err))
}

fn invalid(path: &Path, err: impl std::fmt::Display) -> LookupError {
    LookupError::InvalidConfiguration(format!("{}: {}", path.display(), err))
}

/// Reads supplier, model and version from `ModelVersion.csv`.
pub fn read_model_version(path: &Path) -> Result<ModelInfo, LookupError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| unavailable(path, e))?;

    let record = reader
        .records()
        .next()
        .ok_or_else(|| invalid(path, "file is empty"))?
        .map_err(|e| invalid(path, e))?;

    if record.len() < 3 || record.iter().take(3).any(|field| field.is_empty()) {
        return Err(invalid(
            path,
            "expected a row of the form supplier,model,version",
        ));
    }

    Ok(ModelInfo {
        supplier_id: record[0].to_string(),
        model_id: record[1].to_string(),
        model_version: record[2].to_string(),
    })
}

pub fn read_lookup_settings(path: &Path) -> Result<LookupSettings, LookupError> {
    let content = std::fs::read_to_string(path).map_err(|e| unavailable(path, e))?;
    serde_json::from_str(&content).map_err(|e| invalid(path, e))
}

fn read_table<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>, LookupError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| unavailable(path, e))?;

    reader
        .deserialize()
        .enumerate()
        .map(|(idx, row)| row.map_err(|e| invalid(path, format!("row {}: {}", idx + 1, e))))
        .collect()
}

pub fn read_areas(path: &Path) -> Result<Vec<AreaRecord>, LookupError> {
    let areas: Vec<AreaRecord> = read_table(path)?;
    for area in &areas {
        if area.level == AreaLevel::Point && (area.latitude.is_none() || area.longitude.is_none()) {
            return Err(invalid(
                path,
                format!("point area {} has no coordinates", area.area_peril_id),
            ));
        }
        let name = match area.level {
            AreaLevel::City => area.city.as_deref(),
            AreaLevel::State => area.state.as_deref(),
            _ => Some(area.country.as_str()),
        };
        if name.map_or(true, |n| n.trim().is_empty()) {
            return Err(invalid(
                path,
                format!("area {} has no name for its level", area.area_peril_id),
            ));
        }
    }
    Ok(areas)
}

pub fn read_vulnerabilities(path: &Path) -> Result<Vec<VulnerabilityRecord>, LookupError> {
    let rows: Vec<VulnerabilityRecord> = read_table(path)?;
    if let Some(row) = rows.iter().find(|r| !r.coverage_type.is_known()) {
        return Err(invalid(
            path,
            format!(
                "vulnerability {} has unknown coverage type {}",
                row.vulnerability_id, row.coverage_type
            ),
        ));
    }
    Ok(rows)
}

/// Reads the whole model from the keys data directory.
pub fn load_model(keys_data_path: &Path, lookup_config_file: &Path) -> Result<LoadedModel, LookupError> {
    if !keys_data_path.is_dir() {
        return Err(LookupError::ReferenceDataUnavailable(format!(
            "keys data directory not found: {}",
            keys_data_path.display()
        )));
    }

    let model = read_model_version(&keys_data_path.join(MODEL_VERSION_FILE))?;
    tracing::info!("Supplier: {}", model.supplier_id);
    tracing::info!("Model ID: {}", model.model_id);
    tracing::info!("Model version: {}", model.model_version);

    tracing::info!("Loading lookup config from {}", lookup_config_file.display());
    let settings = read_lookup_settings(lookup_config_file)?;

    let areas_path = expand_path(&settings.area_peril.file_path, keys_data_path);
    let vulnerabilities_path = expand_path(&settings.vulnerability.file_path, keys_data_path);
    let areas = read_areas(&areas_path)?;
    let vulnerabilities = read_vulnerabilities(&vulnerabilities_path)?;
    tracing::info!(
        "Loaded {} area peril rows from {} and {} vulnerability rows from {}",
        areas.len(),
        areas_path.display(),
        vulnerabilities.len(),
        vulnerabilities_path.display()
    );

    if let Some(peril) = settings
        .perils
        .iter()
        .find(|peril| !areas.iter().any(|a| &a.peril_id == *peril))
    {
        return Err(invalid(
            &areas_path,
            format!("active peril {} has no area peril rows", peril),
        ));
    }
    if !(settings.area_peril.max_distance_km > 0.0) {
        return Err(invalid(lookup_config_file, "max_distance_km must be positive"));
    }

    let schema = if settings.attributes.is_empty() {
        ReferenceTableLookup::default_schema()
    } else {
        crate::lookup::AttributeSchema::new(
            settings
                .attributes
                .into_iter()
                .map(|mut spec| {
                    spec.name = spec.name.trim().to_lowercase();
                    spec
                })
                .collect(),
        )
    };

    let config = LookupConfiguration::new(model, settings.perils, settings.coverage_types, schema)?
        .with_keys_data_path(keys_data_path);
    let tables = ReferenceTables::build(areas, vulnerabilities);
    let lookup = ReferenceTableLookup::new(tables, settings.area_peril.max_distance_km);

    Ok(LoadedModel { config, lookup })
}
