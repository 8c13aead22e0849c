//! Parameter accessors that tolerate the loose shapes callers send.
//!
//! CLI users pass `level=50` and `cpus=0,1`, profiles carry real TOML
//! numbers and arrays. Accessors accept both.

use serde_json::Value;

use crate::error::ValidationError;
use crate::types::Parameters;

/// A string parameter. Numbers and booleans are stringified.
pub fn get_str(params: &Parameters, name: &str) -> Option<String> {
    match params.get(name)? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// A non-negative integer parameter. `Ok(None)` when absent.
pub fn get_u64(params: &Parameters, name: &'static str) -> Result<Option<u64>, ValidationError> {
    let Some(value) = params.get(name) else {
        return Ok(None);
    };
    to_u64(value)
        .map(Some)
        .ok_or_else(|| ValidationError::InvalidParameter {
            name,
            reason: format!("expected a non-negative integer, got {}", value),
        })
}

/// A list of indices: a JSON array, a comma-separated string, or a single
/// integer. `Ok(None)` when absent.
pub fn get_index_list(
    params: &Parameters,
    name: &'static str,
) -> Result<Option<Vec<usize>>, ValidationError> {
    let Some(value) = params.get(name) else {
        return Ok(None);
    };
    let invalid = || ValidationError::InvalidParameter {
        name,
        reason: format!("expected a list of non-negative integers, got {}", value),
    };

    let items: Vec<u64> = match value {
        Value::Array(items) => items
            .iter()
            .map(to_u64)
            .collect::<Option<Vec<_>>>()
            .ok_or_else(invalid)?,
        Value::String(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<u64>().ok())
            .collect::<Option<Vec<_>>>()
            .ok_or_else(invalid)?,
        other => vec![to_u64(other).ok_or_else(invalid)?],
    };

    Ok(Some(items.into_iter().map(|i| i as usize).collect()))
}

/// Parse `key=value` assignments into parameters.
///
/// Values that parse as JSON (numbers, arrays, booleans) keep that type;
/// anything else is stored as a string.
pub fn parse_assignments<S: AsRef<str>>(pairs: &[S]) -> Result<Parameters, String> {
    let mut params = Parameters::new();
    for pair in pairs {
        let pair = pair.as_ref();
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| format!("Expected key=value, got '{}'", pair))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("Empty parameter name in '{}'", pair));
        }
        let raw = raw.trim();
        let value = match serde_json::from_str::<Value>(raw) {
            Ok(v @ (Value::Number(_) | Value::Bool(_) | Value::Array(_))) => v,
            _ => Value::String(raw.to_string()),
        };
        params.insert(key.to_string(), value);
    }
    Ok(params)
}

fn to_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
