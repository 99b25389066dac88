//! Wire formats for locations and key results.
//!
//! Two formats are supported: delimited text (`text/csv`) and JSON
//! (`application/json`). Decoding never types CSV cells: they stay text until
//! validation applies the model schema.

use crate::errors::TranscodingError;
use crate::models::{AttributeValue, KeyResult, LocationRecord, RawLocation};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::str::FromStr;

pub const MIME_CSV: &str = "text/csv";
pub const MIME_JSON: &str = "application/json";

/// Header names accepted as the location identifier, in priority order.
pub const LOCATION_ID_FIELDS: [&str; 4] = ["location_id", "locationid", "loc_id", "id"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Csv,
    Json,
}

impl Format {
    /// Parses a media type, ignoring parameters such as `charset`.
    pub fn from_mime(mime: &str) -> Result<Self, TranscodingError> {
        let essence = mime
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            MIME_CSV => Ok(Format::Csv),
            MIME_JSON => Ok(Format::Json),
            _ => Err(TranscodingError::UnsupportedFormat(mime.to_string())),
        }
    }

    /// Picks a format from a file extension (`.csv`, `.json`).
    pub fn from_extension(path: &Path) -> Result<Self, TranscodingError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        ext.parse()
    }

    pub fn mime(&self) -> &'static str {
        match self {
            Format::Csv => "text/csv; charset=utf-8",
            Format::Json => "application/json; charset=utf-8",
        }
    }
}

impl FromStr for Format {
    type Err = TranscodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Format::Csv),
            "json" => Ok(Format::Json),
            other => Err(TranscodingError::UnsupportedFormat(other.to_string())),
        }
    }
}

// ============ Decoding ============

/// Decodes a location payload. Rows keep their input order.
///
/// Empty CSV cells and JSON `null` leave the attribute out. A bad value in one
/// JSON record marks that record invalid instead of failing the payload.
pub fn decode_locations(bytes: &[u8], format: Format) -> Result<Vec<RawLocation>, TranscodingError> {
    match format {
        Format::Csv => decode_csv(bytes),
        Format::Json => decode_json(bytes),
    }
}

fn decode_csv(bytes: &[u8]) -> Result<Vec<RawLocation>, TranscodingError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().trim_start_matches('\u{feff}').to_lowercase())
        .collect();

    if headers.iter().all(|h| h.is_empty()) {
        return Err(TranscodingError::MalformedInput(
            "missing header row".to_string(),
        ));
    }

    let mut unique = BTreeSet::new();
    for header in &headers {
        if header.is_empty() {
            return Err(TranscodingError::MalformedInput(
                "empty column name in header".to_string(),
            ));
        }
        if !unique.insert(header.as_str()) {
            return Err(TranscodingError::MalformedInput(format!(
                "duplicate column '{}'",
                header
            )));
        }
    }

    let id_column = LOCATION_ID_FIELDS
        .iter()
        .find_map(|name| headers.iter().position(|h| h == name))
        .ok_or_else(|| {
            TranscodingError::MalformedInput(format!(
                "missing location id column (expected one of {})",
                LOCATION_ID_FIELDS.join(", ")
            ))
        })?;

    let mut locations = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let row = idx + 1;
        let record = record
            .map_err(|e| TranscodingError::MalformedInput(format!("row {}: {}", row, e)))?;

        // Only the id is trimmed; attribute cells are kept verbatim.
        let mut location_id = None;
        let mut attributes = BTreeMap::new();
        for (col, cell) in record.iter().enumerate() {
            if col == id_column {
                location_id = Some(cell.trim().to_string()).filter(|s| !s.is_empty());
            } else if !cell.is_empty() {
                attributes.insert(headers[col].clone(), AttributeValue::Text(cell.to_string()));
            }
        }

        locations.push(RawLocation {
            row,
            location_id,
            attributes,
            invalid: None,
        });
    }

    Ok(locations)
}

fn decode_json(bytes: &[u8]) -> Result<Vec<RawLocation>, TranscodingError> {
    let value: Value = serde_json::from_slice(bytes)?;
    let items = match value {
        Value::Array(items) => items,
        _ => {
            return Err(TranscodingError::MalformedInput(
                "expected a JSON array of location objects".to_string(),
            ))
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(idx, item)| {
            let row = idx + 1;
            match item {
                Value::Object(fields) => decode_json_object(row, fields),
                _ => Err(TranscodingError::MalformedInput(format!(
                    "row {}: expected an object",
                    row
                ))),
            }
        })
        .collect()
}

fn decode_json_object(row: usize, fields: Map<String, Value>) -> Result<RawLocation, TranscodingError> {
    let mut normalized: BTreeMap<String, Value> = BTreeMap::new();
    for (key, value) in fields {
        let name = key.trim().to_lowercase();
        if normalized.insert(name.clone(), value).is_some() {
            return Err(TranscodingError::MalformedInput(format!(
                "row {}: duplicate field '{}'",
                row, name
            )));
        }
    }
    let mut fields = normalized;

    let id_key = LOCATION_ID_FIELDS
        .iter()
        .find(|name| fields.contains_key(**name))
        .map(|name| name.to_string());

    // A bad value only invalidates this record; the first problem is kept.
    let mut invalid = None;

    let location_id = match id_key.and_then(|key| fields.remove(&key)) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(other) => {
            invalid = Some(format!(
                "malformed location id: expected a string or number, got {}",
                other
            ));
            None
        }
    };

    let mut attributes = BTreeMap::new();
    for (name, value) in fields {
        let value = match value {
            Value::Null => continue,
            Value::String(s) => AttributeValue::Text(s),
            Value::Number(n) => match n.as_f64() {
                Some(f) => AttributeValue::Number(f),
                None => AttributeValue::Text(n.to_string()),
            },
            other => {
                if invalid.is_none() {
                    invalid = Some(format!(
                        "malformed {}: expected a scalar, got {}",
                        name, other
                    ));
                }
                continue;
            }
        };
        attributes.insert(name, value);
    }

    Ok(RawLocation {
        row,
        location_id,
        attributes,
        invalid,
    })
}

// ============ Encoding ============

#[derive(Serialize)]
struct KeysEnvelope<'a> {
    status: &'static str,
    items: &'a [KeyResult],
}

/// Encodes key rows. Errors can only come from the underlying writer.
pub fn encode_results(results: &[KeyResult], format: Format) -> Result<Vec<u8>, TranscodingError> {
    match format {
        Format::Json => serde_json::to_vec(&KeysEnvelope {
            status: "success",
            items: results,
        })
        .map_err(|e| TranscodingError::Encoding(e.to_string())),
        Format::Csv => encode_results_csv(results).map_err(|e| TranscodingError::Encoding(e.to_string())),
    }
}

fn encode_results_csv(results: &[KeyResult]) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([
        "location_id",
        "peril_id",
        "coverage_type",
        "status",
        "area_peril_id",
        "vulnerability_id",
        "message",
    ])?;
    for result in results {
        writer.write_record([
            result.location_id.clone().unwrap_or_default(),
            result.peril_id.to_string(),
            result.coverage_type.to_string(),
            result.status.to_string(),
            result.area_peril_id.map(|id| id.to_string()).unwrap_or_default(),
            result
                .vulnerability_id
                .map(|id| id.to_string())
                .unwrap_or_default(),
            result.message.clone(),
        ])?;
    }
    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}

/// Encodes validated locations; the inverse of [`decode_locations`].
pub fn encode_locations(locations: &[LocationRecord], format: Format) -> Result<Vec<u8>, TranscodingError> {
    match format {
        Format::Json => {
            let items: Vec<Value> = locations
                .iter()
                .map(|location| {
                    let mut object = Map::new();
                    object.insert(
                        LOCATION_ID_FIELDS[0].to_string(),
                        Value::String(location.location_id.clone()),
                    );
                    for (name, value) in &location.attributes {
                        object.insert(name.clone(), attribute_to_json(value));
                    }
                    Value::Object(object)
                })
                .collect();
            serde_json::to_vec(&items).map_err(|e| TranscodingError::Encoding(e.to_string()))
        }
        Format::Csv => {
            encode_locations_csv(locations).map_err(|e| TranscodingError::Encoding(e.to_string()))
        }
    }
}

fn attribute_to_json(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::Number(n) => serde_json::Number::from_f64(*n)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        AttributeValue::Text(s) => Value::String(s.clone()),
        AttributeValue::Missing => Value::Null,
    }
}

fn encode_locations_csv(locations: &[LocationRecord]) -> Result<Vec<u8>, csv::Error> {
    let columns: BTreeSet<&str> = locations
        .iter()
        .flat_map(|l| l.attributes.keys().map(String::as_str))
        .collect();

    let mut writer = csv::Writer::from_writer(Vec::new());
    let mut header = vec![LOCATION_ID_FIELDS[0]];
    header.extend(columns.iter().copied());
    writer.write_record(&header)?;

    for location in locations {
        let mut record = vec![location.location_id.clone()];
        record.extend(columns.iter().map(|c| location.get(c).to_string()));
        writer.write_record(&record)?;
    }

    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}
