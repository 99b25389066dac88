use crate::errors::ValidationError;
use crate::lookup::{AttributeKind, AttributeSchema, AttributeSpec};
use crate::models::{AttributeValue, LocationRecord, RawLocation};

pub const MISSING_LOCATION_ID: &str = "missing locationId";

/// Validates a decoded row against the model schema.
///
/// Numeric attributes supplied as text are parsed; numbers supplied for text
/// attributes are rendered as text (integral values without a fraction, so a
/// JSON `1050` and a CSV `1050` normalize identically). Blank values are
/// dropped, so the record only holds attributes that carry a value.
pub fn validate_location(
    raw: RawLocation,
    schema: &AttributeSchema,
) -> Result<LocationRecord, ValidationError> {
    if let Some(problem) = raw.invalid {
        return Err(ValidationError::new(problem));
    }

    let location_id = raw
        .location_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ValidationError::new(MISSING_LOCATION_ID))?
        .to_string();

    let mut attributes = raw.attributes;

    for spec in &schema.attributes {
        let value = attributes
            .remove(&spec.name)
            .unwrap_or(AttributeValue::Missing);
        let normalized = normalize(spec, value)?;
        if !normalized.is_missing() {
            attributes.insert(spec.name.clone(), normalized);
        }
    }
    attributes.retain(|_, value| !is_blank(value));

    Ok(LocationRecord {
        location_id,
        attributes,
    })
}

fn is_blank(value: &AttributeValue) -> bool {
    match value {
        AttributeValue::Missing => true,
        AttributeValue::Text(s) => s.trim().is_empty(),
        AttributeValue::Number(_) => false,
    }
}

fn normalize(spec: &AttributeSpec, value: AttributeValue) -> Result<AttributeValue, ValidationError> {
    if is_blank(&value) {
        if spec.required {
            return Err(ValidationError::new(format!("missing {}", spec.name)));
        }
        return Ok(AttributeValue::Missing);
    }

    match spec.kind {
        AttributeKind::Number => {
            let number = match &value {
                AttributeValue::Text(s) => s.trim().parse::<f64>().map_err(|_| {
                    ValidationError::new(format!(
                        "malformed {}: expected a number, got '{}'",
                        spec.name, s
                    ))
                })?,
                AttributeValue::Number(n) => *n,
                AttributeValue::Missing => return Ok(AttributeValue::Missing),
            };
            if !number.is_finite() {
                return Err(ValidationError::new(format!(
                    "malformed {}: value is not finite",
                    spec.name
                )));
            }
            if spec.min.is_some_and(|min| number < min) || spec.max.is_some_and(|max| number > max)
            {
                return Err(ValidationError::new(format!(
                    "malformed {}: {} is outside [{}, {}]",
                    spec.name,
                    number,
                    spec.min.map(|v| v.to_string()).unwrap_or_else(|| "-inf".into()),
                    spec.max.map(|v| v.to_string()).unwrap_or_else(|| "inf".into()),
                )));
            }
            Ok(AttributeValue::Number(number))
        }
        AttributeKind::Text => match value {
            AttributeValue::Number(n) => Ok(AttributeValue::Text(number_to_text(n))),
            other => Ok(other),
        },
    }
}

fn number_to_text(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}
