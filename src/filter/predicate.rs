//! Predicate tree produced from query parameters and consumed by the stores.

use crate::config::{ColumnRef, ValueKind};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

/// A parsed, typed filter operand.
#[derive(Clone, Debug, PartialEq)]
pub enum FilterValue {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    Text(String),
}

impl FilterValue {
    /// Parse a raw query-string value as `kind`. The error is a message for the client.
    pub fn parse(kind: ValueKind, raw: &str) -> Result<Self, String> {
        let s = raw.trim();
        match kind {
            ValueKind::Integer => s
                .parse::<i64>()
                .map(FilterValue::Integer)
                .map_err(|_| format!("'{}' is not a valid integer", raw)),
            ValueKind::Float => match s.parse::<f64>() {
                Ok(f) if f.is_finite() => Ok(FilterValue::Float(f)),
                _ => Err(format!("'{}' is not a valid number", raw)),
            },
            ValueKind::Boolean => match s.to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(FilterValue::Boolean(true)),
                "false" | "0" => Ok(FilterValue::Boolean(false)),
                _ => Err(format!("'{}' is not a valid boolean", raw)),
            },
            ValueKind::Timestamp => parse_timestamp(s)
                .map(FilterValue::Timestamp)
                .ok_or_else(|| format!("'{}' is not a valid ISO-8601 date or timestamp", raw)),
            ValueKind::Text => Ok(FilterValue::Text(raw.to_string())),
        }
    }

    /// JSON form used as a bind parameter.
    pub fn to_json(&self) -> Value {
        match self {
            FilterValue::Integer(n) => Value::Number((*n).into()),
            FilterValue::Float(f) => serde_json::Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
            FilterValue::Boolean(b) => Value::Bool(*b),
            FilterValue::Timestamp(t) => Value::String(t.to_rfc3339()),
            FilterValue::Text(s) => Value::String(s.clone()),
        }
    }
}

/// Accepts RFC 3339, naive date-times (taken as UTC) and bare dates (midnight UTC).
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let attempt = |s: &str| -> Option<DateTime<Utc>> {
        if let Ok(t) = DateTime::parse_from_rfc3339(s) {
            return Some(t.with_timezone(&Utc));
        }
        for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
            if let Ok(t) = NaiveDateTime::parse_from_str(s, fmt) {
                return Some(t.and_utc());
            }
        }
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|t| t.and_utc())
    };
    // a '+' offset arrives as a space after query-string decoding
    attempt(s).or_else(|| attempt(&s.replace(' ', "+")))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Gte,
    Lte,
    /// Case-insensitive match anchored at the start of the string.
    StartsWith,
}

/// Left-hand side of a comparison.
#[derive(Clone, Debug, PartialEq)]
pub enum Field {
    Column(String),
    /// `column` on the row that `via` references.
    Joined { via: String, target: ColumnRef, column: String },
}

#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    Always,
    Compare { field: Field, op: CompareOp, value: FilterValue },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn column(column: impl Into<String>, op: CompareOp, value: FilterValue) -> Self {
        Predicate::Compare {
            field: Field::Column(column.into()),
            op,
            value,
        }
    }

    pub fn and(mut parts: Vec<Predicate>) -> Self {
        parts.retain(|p| *p != Predicate::Always);
        match parts.len() {
            0 => Predicate::Always,
            1 => parts.remove(0),
            _ => Predicate::And(parts),
        }
    }

    pub fn or(mut parts: Vec<Predicate>) -> Self {
        if parts.iter().any(|p| *p == Predicate::Always) {
            return Predicate::Always;
        }
        match parts.len() {
            0 => Predicate::Always,
            1 => parts.remove(0),
            _ => Predicate::Or(parts),
        }
    }
}
