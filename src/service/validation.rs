//! Request body validation from config rules.

use crate::config::{ResolvedEntity, ValidationRule, ValueKind};
use crate::error::AppError;
use crate::filter::parse_timestamp;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

pub struct RequestValidator;

impl RequestValidator {
    /// Keep only writable columns and bring each value to its column's type.
    /// Numeric strings become numbers, timestamps are normalised to RFC 3339.
    /// Column constraints that the store would reject (NOT NULL, `varchar(n)`) are checked here.
    pub fn coerce(entity: &ResolvedEntity, body: &mut HashMap<String, Value>) -> Result<(), AppError> {
        body.retain(|k, _| *k != entity.pk_column && entity.column(k).is_some());
        let mut cols: Vec<String> = body.keys().cloned().collect();
        cols.sort();
        for col in cols {
            let (Some(info), Some(v)) = (entity.column(&col), body.get_mut(&col)) else { continue };
            if v.is_null() {
                if !info.nullable {
                    return Err(AppError::validation(&col, "this field may not be null"));
                }
                continue;
            }
            *v = coerce_value(&col, info.kind, v)?;
            if let (Some(max), Some(s)) = (info.max_chars, v.as_str()) {
                if s.chars().count() > max {
                    return Err(AppError::validation(
                        &col,
                        format!("ensure this field has no more than {} characters", max),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Validate body against per-column rules. All required fields must be present.
    pub fn validate(body: &HashMap<String, Value>, rules: &HashMap<String, ValidationRule>) -> Result<(), AppError> {
        // sorted so the reported field does not depend on map order
        let mut cols: Vec<&String> = rules.keys().collect();
        cols.sort();
        for col in cols {
            let rule = &rules[col];
            let val = body.get(col);
            if rule.required == Some(true) && val.map(Value::is_null).unwrap_or(true) {
                return Err(AppError::validation(col, "this field is required"));
            }
            if let Some(v) = val {
                validate_field(col, v, rule)?;
            }
        }
        Ok(())
    }

    /// Validate only the fields present in body (for PATCH). Required fields may be
    /// omitted but not cleared.
    pub fn validate_partial(body: &HashMap<String, Value>, rules: &HashMap<String, ValidationRule>) -> Result<(), AppError> {
        let mut cols: Vec<&String> = body.keys().collect();
        cols.sort();
        for col in cols {
            let Some(rule) = rules.get(col) else { continue };
            let v = &body[col];
            if rule.required == Some(true) && v.is_null() {
                return Err(AppError::validation(col, "this field may not be null"));
            }
            validate_field(col, v, rule)?;
        }
        Ok(())
    }
}

fn coerce_value(col: &str, kind: ValueKind, v: &Value) -> Result<Value, AppError> {
    let invalid = |what: &str| AppError::validation(col, format!("a valid {} is required", what));
    match kind {
        ValueKind::Integer => match v {
            Value::Number(n) if n.is_i64() => Ok(v.clone()),
            Value::String(s) => s.trim().parse::<i64>().map(Value::from).map_err(|_| invalid("integer")),
            _ => Err(invalid("integer")),
        },
        ValueKind::Float => match v {
            Value::Number(_) => Ok(v.clone()),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| invalid("number")),
            _ => Err(invalid("number")),
        },
        ValueKind::Boolean => match v {
            Value::Bool(_) => Ok(v.clone()),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(invalid("boolean")),
            },
            _ => Err(invalid("boolean")),
        },
        ValueKind::Timestamp => v
            .as_str()
            .and_then(parse_timestamp)
            .map(|t| Value::String(t.to_rfc3339()))
            .ok_or_else(|| AppError::validation(col, "datetime has wrong format; use ISO 8601")),
        ValueKind::Text => match v {
            Value::String(_) => Ok(v.clone()),
            Value::Number(_) | Value::Bool(_) => Ok(Value::String(v.to_string())),
            _ => Err(invalid("string")),
        },
    }
}

fn validate_field(col: &str, v: &Value, rule: &ValidationRule) -> Result<(), AppError> {
    if v.is_null() {
        return Ok(());
    }
    if let Some(format) = &rule.format {
        validate_format(col, v, format)?;
    }
    if let (Some(max), Some(s)) = (rule.max_length, v.as_str()) {
        if s.chars().count() > max as usize {
            return Err(AppError::validation(
                col,
                format!("ensure this field has no more than {} characters", max),
            ));
        }
    }
    if let (Some(min), Some(s)) = (rule.min_length, v.as_str()) {
        if s.chars().count() < min as usize {
            return Err(AppError::validation(
                col,
                format!("ensure this field has at least {} characters", min),
            ));
        }
    }
    if let (Some(pattern), Some(s)) = (rule.pattern.as_deref(), v.as_str()) {
        let re = Regex::new(pattern).map_err(|_| AppError::validation(col, "invalid pattern in config"))?;
        if !re.is_match(s) {
            return Err(AppError::validation(col, "does not match required pattern"));
        }
    }
    if let Some(allowed) = &rule.allowed {
        if !allowed.iter().any(|a| value_eq(v, a)) {
            let choices: Vec<String> = allowed.iter().map(|a| a.to_string()).collect();
            return Err(AppError::validation(
                col,
                format!("{} is not a valid choice; expected one of {}", v, choices.join(", ")),
            ));
        }
    }
    if let (Some(min), Some(n)) = (rule.minimum, v.as_f64()) {
        if n < min {
            return Err(AppError::validation(col, format!("must be at least {}", min)));
        }
    }
    if let (Some(max), Some(n)) = (rule.maximum, v.as_f64()) {
        if n > max {
            return Err(AppError::validation(col, format!("must be at most {}", max)));
        }
    }
    Ok(())
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        _ => a == b,
    }
}

fn validate_format(col: &str, v: &Value, format: &str) -> Result<(), AppError> {
    let Some(s) = v.as_str() else { return Ok(()) };
    match format.to_lowercase().as_str() {
        "datetime" | "date-time" if parse_timestamp(s).is_none() => {
            Err(AppError::validation(col, "datetime has wrong format; use ISO 8601"))
        }
        "email" if !s.contains('@') || s.len() < 3 => Err(AppError::validation(col, "enter a valid email address")),
        _ => Ok(()),
    }
}
