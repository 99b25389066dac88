//! Built-in lookup over area-peril and vulnerability dictionaries.
//!
//! Area perils are matched from the most precise level down: nearest point
//! area within the configured distance, then city, state and finally country.
//! Vulnerabilities are matched on (peril, coverage, occupancy, construction)
//! with `*` wildcards, most specific first.

use crate::errors::LookupError;
use crate::lookup::{AttributeSchema, AttributeSpec, KeyStream, KeysLookup, LookupConfiguration};
use crate::models::{AreaPerilId, CoverageTypeId, KeyResult, LocationRecord, PerilId, VulnerabilityId};
use crate::reference_data::{AreaLevel, AreaRecord, VulnerabilityRecord};
use std::collections::HashMap;

pub const COUNTRY: &str = "countrycode";
pub const STATE: &str = "state";
pub const CITY: &str = "city";
pub const LATITUDE: &str = "latitude";
pub const LONGITUDE: &str = "longitude";
pub const OCCUPANCY: &str = "occupancycode";
pub const CONSTRUCTION: &str = "constructioncode";
pub const WILDCARD: &str = "*";

/// WGS84 equatorial radius.
pub const EARTH_RADIUS_KM: f64 = 6378.137;

/// Great-circle distance between two coordinates, in kilometres.
pub fn great_circle_distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lon1, lat2, lon2) = (
        lat1.to_radians(),
        lon1.to_radians(),
        lat2.to_radians(),
        lon2.to_radians(),
    );
    let dx = lat2.cos() * lon2.cos() - lat1.cos() * lon1.cos();
    let dy = lat2.cos() * lon2.sin() - lat1.cos() * lon1.sin();
    let dz = lat2.sin() - lat1.sin();
    let chord = (dx * dx + dy * dy + dz * dz).sqrt();
    2.0 * (chord / 2.0).clamp(-1.0, 1.0).asin() * EARTH_RADIUS_KM
}

fn normalize_name(name: &str) -> String {
    name.trim().to_uppercase()
}

// ============ Tables ============

#[derive(Debug, Clone)]
struct PointArea {
    id: AreaPerilId,
    latitude: f64,
    longitude: f64,
    country: String,
}

#[derive(Debug, Clone)]
struct NamedArea {
    id: AreaPerilId,
    country: String,
}

#[derive(Debug, Default)]
struct PerilAreas {
    points: Vec<PointArea>,
    cities: HashMap<String, Vec<NamedArea>>,
    states: HashMap<String, Vec<NamedArea>>,
    countries: HashMap<String, AreaPerilId>,
}

type VulnerabilityKey = (PerilId, CoverageTypeId, String, String);

/// Indexed reference dictionaries. Ties are broken by the lowest id.
#[derive(Debug, Default)]
pub struct ReferenceTables {
    areas: HashMap<PerilId, PerilAreas>,
    vulnerabilities: HashMap<VulnerabilityKey, VulnerabilityId>,
}

impl ReferenceTables {
    pub fn build(mut areas: Vec<AreaRecord>, mut vulnerabilities: Vec<VulnerabilityRecord>) -> Self {
        areas.sort_by_key(|a| a.area_peril_id);
        vulnerabilities.sort_by_key(|v| v.vulnerability_id);

        let mut tables = ReferenceTables::default();

        for area in areas {
            let country = normalize_name(&area.country);
            let index = tables.areas.entry(area.peril_id.clone()).or_default();
            match area.level {
                AreaLevel::Point => {
                    if let (Some(latitude), Some(longitude)) = (area.latitude, area.longitude) {
                        index.points.push(PointArea {
                            id: area.area_peril_id,
                            latitude,
                            longitude,
                            country,
                        });
                    }
                }
                AreaLevel::City => {
                    if let Some(city) = area.city.as_deref() {
                        index
                            .cities
                            .entry(normalize_name(city))
                            .or_default()
                            .push(NamedArea {
                                id: area.area_peril_id,
                                country,
                            });
                    }
                }
                AreaLevel::State => {
                    if let Some(state) = area.state.as_deref() {
                        index
                            .states
                            .entry(normalize_name(state))
                            .or_default()
                            .push(NamedArea {
                                id: area.area_peril_id,
                                country,
                            });
                    }
                }
                AreaLevel::Country => {
                    index.countries.entry(country).or_insert(area.area_peril_id);
                }
            }
        }

        for row in vulnerabilities {
            let key = (
                row.peril_id,
                row.coverage_type,
                normalize_name(&row.occupancy_code),
                normalize_name(&row.construction_code),
            );
            tables.vulnerabilities.entry(key).or_insert(row.vulnerability_id);
        }

        tables
    }

    pub fn area_count(&self) -> usize {
        self.areas
            .values()
            .map(|a| a.points.len() + a.cities.len() + a.states.len() + a.countries.len())
            .sum()
    }

    pub fn vulnerability_count(&self) -> usize {
        self.vulnerabilities.len()
    }
}

// ============ Lookup ============

pub struct ReferenceTableLookup {
    tables: ReferenceTables,
    max_distance_km: f64,
}

impl ReferenceTableLookup {
    pub fn new(tables: ReferenceTables, max_distance_km: f64) -> Self {
        Self {
            tables,
            max_distance_km,
        }
    }

    /// Attributes this lookup reads, used when `lookup.json` declares none.
    pub fn default_schema() -> AttributeSchema {
        AttributeSchema::new(vec![
            AttributeSpec::text(COUNTRY).required(),
            AttributeSpec::text(STATE),
            AttributeSpec::text(CITY),
            AttributeSpec::number(LATITUDE).range(-90.0, 90.0),
            AttributeSpec::number(LONGITUDE).range(-180.0, 180.0),
            AttributeSpec::text(OCCUPANCY),
            AttributeSpec::text(CONSTRUCTION),
        ])
    }

    pub fn tables(&self) -> &ReferenceTables {
        &self.tables
    }

    fn area_peril(&self, location: &LocationRecord, peril: &PerilId) -> Result<AreaPerilId, String> {
        let country = location
            .text(COUNTRY)
            .map(normalize_name)
            .ok_or_else(|| "missing country code".to_string())?;
        let index = self
            .tables
            .areas
            .get(peril)
            .ok_or_else(|| format!("no area perils defined for peril {}", peril))?;

        if let (Some(lat), Some(lon)) = (location.number(LATITUDE), location.number(LONGITUDE)) {
            let nearest = index
                .points
                .iter()
                .map(|p| (p, great_circle_distance_km(lat, lon, p.latitude, p.longitude)))
                .fold(None::<(&PointArea, f64)>, |best, (p, d)| match best {
                    Some((_, best_d)) if best_d <= d => best,
                    _ => Some((p, d)),
                });

            if let Some((point, distance)) = nearest {
                if distance <= self.max_distance_km {
                    if point.country != country {
                        return Err(format!(
                            "nearest area peril {} lies in {}, location country is {}",
                            point.id, point.country, country
                        ));
                    }
                    return Ok(point.id);
                }
            }
        }

        let mut elsewhere = Vec::new();
        for (attribute, names) in [(CITY, &index.cities), (STATE, &index.states)] {
            let Some(name) = location.text(attribute).map(normalize_name) else {
                continue;
            };
            if let Some(candidates) = names.get(&name) {
                if let Some(area) = candidates.iter().find(|a| a.country == country) {
                    return Ok(area.id);
                }
                elsewhere.push(format!("{} {} exists only outside {}", attribute, name, country));
            }
        }

        if let Some(id) = index.countries.get(&country) {
            return Ok(*id);
        }

        let mut message = format!("no area peril found for {} in {}", peril, country);
        for note in elsewhere {
            message.push_str("; ");
            message.push_str(&note);
        }
        Err(message)
    }

    fn vulnerability(
        &self,
        location: &LocationRecord,
        peril: &PerilId,
        coverage: CoverageTypeId,
    ) -> Result<VulnerabilityId, String> {
        let occupancy = location
            .text(OCCUPANCY)
            .map(normalize_name)
            .unwrap_or_else(|| WILDCARD.to_string());
        let construction = location
            .text(CONSTRUCTION)
            .map(normalize_name)
            .unwrap_or_else(|| WILDCARD.to_string());

        let candidates = [
            (occupancy.as_str(), construction.as_str()),
            (occupancy.as_str(), WILDCARD),
            (WILDCARD, construction.as_str()),
            (WILDCARD, WILDCARD),
        ];
        candidates
            .iter()
            .find_map(|(occ, con)| {
                self.tables.vulnerabilities.get(&(
                    peril.clone(),
                    coverage,
                    occ.to_string(),
                    con.to_string(),
                ))
            })
            .copied()
            .ok_or_else(|| {
                format!(
                    "no vulnerability for {} coverage {} (occupancy {}, construction {})",
                    peril, coverage, occupancy, construction
                )
            })
    }

    fn keys_for(&self, location: &LocationRecord, config: &LookupConfiguration) -> Vec<KeyResult> {
        let mut rows = Vec::with_capacity(config.perils().len() * config.coverage_types().len());

        for peril in config.perils() {
            let area = self.area_peril(location, peril);
            for coverage in config.coverage_types() {
                let vulnerability = self.vulnerability(location, peril, *coverage);
                let row = match (&area, vulnerability) {
                    (Ok(area_id), Ok(vulnerability_id)) => KeyResult::success(
                        location.location_id.clone(),
                        peril.clone(),
                        *coverage,
                        *area_id,
                        vulnerability_id,
                        "",
                    ),
                    (area, vulnerability) => {
                        let reasons: Vec<&str> = [area.as_ref().err(), vulnerability.as_ref().err()]
                            .into_iter()
                            .flatten()
                            .map(String::as_str)
                            .collect();
                        KeyResult::no_match(
                            location.location_id.clone(),
                            peril.clone(),
                            *coverage,
                            reasons.join("; "),
                        )
                    }
                };
                rows.push(row);
            }
        }

        rows
    }
}

impl KeysLookup for ReferenceTableLookup {
    fn resolve<'a>(
        &'a self,
        locations: Vec<LocationRecord>,
        config: &'a LookupConfiguration,
    ) -> KeyStream<'a> {
        Box::new(
            locations
                .into_iter()
                .flat_map(move |location| self.keys_for(&location, config))
                .map(Ok::<KeyResult, LookupError>),
        )
    }

    fn probe(&self, config: &LookupConfiguration) -> Result<(), LookupError> {
        match &config.keys_data_path {
            Some(path) => std::fs::read_dir(path).map(|_| ()).map_err(|e| {
                LookupError::ReferenceDataUnavailable(format!("{}: {}", path.display(), e))
            }),
            None => Ok(()),
        }
    }

    fn cacheable_by_attributes(&self) -> bool {
        true
    }
}
