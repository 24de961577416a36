//! String-to-typed value coercion for filter leaves.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde_json::{Number, Value};

use crate::query::params::parse_flag_token;
use crate::schema::ScalarType;

/// A filter value that does not parse as its field's declared type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{value}' is not a valid {expected}")]
pub struct CoercionError {
    pub value: String,
    pub expected: &'static str,
}

impl CoercionError {
    fn new(value: &str, expected: &'static str) -> Self {
        Self {
            value: value.to_string(),
            expected,
        }
    }
}

/// Coerces a raw string to the JSON value stored for `ty`.
///
/// Booleans never fail: anything outside the true-token set is `false`.
pub fn coerce(ty: ScalarType, raw: &str) -> Result<Value, CoercionError> {
    match ty {
        ScalarType::String => Ok(Value::String(raw.to_string())),
        ScalarType::Int => raw
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| CoercionError::new(raw, "integer")),
        ScalarType::Float => raw
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| CoercionError::new(raw, "number")),
        ScalarType::Boolean => Ok(Value::Bool(parse_flag_token(raw))),
        ScalarType::DateTime => parse_datetime(raw)
            .map(|dt| Value::String(format_timestamp(dt)))
            .ok_or_else(|| CoercionError::new(raw, "date")),
        ScalarType::Json => Ok(serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))),
    }
}

/// Accepts RFC 3339 timestamps and bare `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Canonical stored form of a timestamp: RFC 3339, millisecond precision, `Z`.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}
