//! Convert serde_json::Value to types that sqlx can bind.

use serde_json::Value;
use sqlx::encode::{Encode, IsNull};
use sqlx::postgres::{PgTypeInfo, Postgres};
use sqlx::{Database, Type};

/// A value that can be bound to a PostgreSQL query. Converts from serde_json::Value.
#[derive(Clone, Debug, PartialEq)]
pub enum PgBindValue {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
    Json(Value),
}

impl PgBindValue {
    pub fn from_json(v: &Value) -> Self {
        match v {
            Value::Null => PgBindValue::Null,
            Value::Bool(b) => PgBindValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => PgBindValue::I64(i),
                None => PgBindValue::F64(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => PgBindValue::String(s.clone()),
            Value::Array(_) | Value::Object(_) => PgBindValue::Json(v.clone()),
        }
    }
}

impl<'q> Encode<'q, Postgres> for PgBindValue {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync>> {
        Ok(match self {
            PgBindValue::Null => <Option<String> as Encode<Postgres>>::encode_by_ref(&None, buf)?,
            PgBindValue::Bool(b) => <bool as Encode<Postgres>>::encode_by_ref(b, buf)?,
            PgBindValue::I64(n) => <i64 as Encode<Postgres>>::encode_by_ref(n, buf)?,
            PgBindValue::F64(n) => <f64 as Encode<Postgres>>::encode_by_ref(n, buf)?,
            PgBindValue::String(s) => <&str as Encode<Postgres>>::encode_by_ref(&s.as_str(), buf)?,
            PgBindValue::Json(v) => <Value as Encode<Postgres>>::encode_by_ref(v, buf)?,
        })
    }

    // the declared parameter type has to match the bytes written above
    fn produces(&self) -> Option<PgTypeInfo> {
        Some(match self {
            PgBindValue::Null | PgBindValue::String(_) => <String as Type<Postgres>>::type_info(),
            PgBindValue::Bool(_) => <bool as Type<Postgres>>::type_info(),
            PgBindValue::I64(_) => <i64 as Type<Postgres>>::type_info(),
            PgBindValue::F64(_) => <f64 as Type<Postgres>>::type_info(),
            PgBindValue::Json(_) => <Value as Type<Postgres>>::type_info(),
        })
    }
}

impl Type<Postgres> for PgBindValue {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("TEXT")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numbers_keep_integer_precision() {
        assert_eq!(PgBindValue::from_json(&json!(9_007_199_254_740_993i64)), PgBindValue::I64(9_007_199_254_740_993));
        assert_eq!(PgBindValue::from_json(&json!(1.5)), PgBindValue::F64(1.5));
    }

    #[test]
    fn strings_stay_text() {
        // timestamps are bound as text and cast in SQL
        assert_eq!(
            PgBindValue::from_json(&json!("2024-03-01T00:00:00Z")),
            PgBindValue::String("2024-03-01T00:00:00Z".into())
        );
        assert_eq!(PgBindValue::from_json(&Value::Null), PgBindValue::Null);
    }
}
