//! Incoming reading schema. Devices send numbers, older firmware sends
//! numeric strings; both are accepted.

use serde_json::{Map, Value};

use crate::error::ApiError;

/// A validated reading, ready to store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReading {
    pub temperature: f64,
    pub humidity: f64,
    pub ldr_value: f64,
    pub roof_status: Option<String>,
    pub mode: Option<String>,
}

impl NewReading {
    /// Validate a JSON body. Every missing or malformed field is reported in
    /// one message.
    pub fn from_json(body: &Value) -> Result<Self, ApiError> {
        let Some(obj) = body.as_object() else {
            return Err(ApiError::Validation(
                "Incomplete data: expected a JSON object".to_string(),
            ));
        };

        let mut errors = Vec::new();
        let temperature = number(obj, &["temperature"], &mut errors);
        let humidity = number(obj, &["humidity"], &mut errors);
        let ldr_value = number(obj, &["ldr_value", "light"], &mut errors);
        let roof_status = text(obj, "roof_status", &mut errors);
        let mode = text(obj, "mode", &mut errors);

        match (temperature, humidity, ldr_value) {
            (Some(temperature), Some(humidity), Some(ldr_value)) if errors.is_empty() => Ok(Self {
                temperature,
                humidity,
                ldr_value,
                roof_status,
                mode,
            }),
            _ => Err(ApiError::Validation(format!(
                "Incomplete data: {}",
                errors.join("; ")
            ))),
        }
    }
}

/// First present key of `keys` wins; the first key names the field in errors.
fn number(obj: &Map<String, Value>, keys: &[&str], errors: &mut Vec<String>) -> Option<f64> {
    let name = keys[0];
    let Some(value) = keys.iter().find_map(|k| obj.get(*k)) else {
        errors.push(format!("missing field '{name}'"));
        return None;
    };
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() => Some(v),
        _ => {
            errors.push(format!("field '{name}' is not numeric"));
            None
        }
    }
}

fn text(obj: &Map<String, Value>, key: &str, errors: &mut Vec<String>) -> Option<String> {
    match obj.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            errors.push(format!("field '{key}' must be a string"));
            None
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
