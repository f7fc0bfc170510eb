//! Conversion of result rows into JSON objects.

use std::error::Error;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::{Map, Number, Value};
use tokio_postgres::Row;
use tokio_postgres::types::{FromSql, Kind, Type};
use uuid::Uuid;

use crate::error::PgMcpError;
use crate::numeric;

type BoxError = Box<dyn Error + Sync + Send>;

/// One column value, decoded from whatever type the server sent.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonCell(pub Value);

impl<'a> FromSql<'a> for JsonCell {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        decode(ty, raw).map(JsonCell)
    }

    fn from_sql_null(_ty: &Type) -> Result<Self, BoxError> {
        Ok(JsonCell(Value::Null))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// Convert a row into a column-name to value mapping, keeping column order.
pub fn row_to_json(row: &Row) -> Result<Map<String, Value>, PgMcpError> {
    let mut object = Map::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let cell: JsonCell = row.try_get(idx)?;
        object.insert(column.name().to_string(), cell.0);
    }
    Ok(object)
}

fn decode(ty: &Type, raw: &[u8]) -> Result<Value, BoxError> {
    match ty.kind() {
        Kind::Domain(base) => return decode(base, raw),
        Kind::Array(_) => {
            let items = Vec::<JsonCell>::from_sql(ty, raw)?;
            return Ok(Value::Array(items.into_iter().map(|c| c.0).collect()));
        }
        Kind::Enum(_) => return Ok(Value::String(<&str>::from_sql(ty, raw)?.to_string())),
        _ => {}
    }

    let value = match *ty {
        Type::BOOL => Value::Bool(bool::from_sql(ty, raw)?),
        Type::CHAR => Value::from(i8::from_sql(ty, raw)?),
        Type::INT2 => Value::from(i16::from_sql(ty, raw)?),
        Type::INT4 => Value::from(i32::from_sql(ty, raw)?),
        Type::INT8 => Value::from(i64::from_sql(ty, raw)?),
        Type::OID => Value::from(u32::from_sql(ty, raw)?),
        Type::FLOAT4 => float(f32::from_sql(ty, raw)? as f64),
        Type::FLOAT8 => float(f64::from_sql(ty, raw)?),
        Type::NUMERIC => Value::String(numeric::decode(raw)?),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            Value::String(String::from_sql(ty, raw)?)
        }
        Type::JSON | Type::JSONB => Value::from_sql(ty, raw)?,
        Type::TIMESTAMP => Value::String(
            NaiveDateTime::from_sql(ty, raw)?
                .format("%Y-%m-%dT%H:%M:%S%.f")
                .to_string(),
        ),
        Type::TIMESTAMPTZ => Value::String(DateTime::<Utc>::from_sql(ty, raw)?.to_rfc3339()),
        Type::DATE => Value::String(NaiveDate::from_sql(ty, raw)?.to_string()),
        Type::TIME => Value::String(NaiveTime::from_sql(ty, raw)?.to_string()),
        Type::UUID => Value::String(Uuid::from_sql(ty, raw)?.to_string()),
        Type::BYTEA => Value::String(format!("\\x{}", hex::encode(raw))),
        _ if ty.name() == "citext" => Value::String(<&str>::from_sql(ty, raw)?.to_string()),
        _ => {
            return Err(PgMcpError::UnsupportedType(format!(
                "cannot convert a column of type {ty} to JSON; cast it in the query, e.g. col::text"
            ))
            .into());
        }
    };
    Ok(value)
}

/// JSON has no NaN or infinities; those are reported as strings.
fn float(f: f64) -> Value {
    match Number::from_f64(f) {
        Some(n) => Value::Number(n),
        None if f.is_nan() => Value::String("NaN".into()),
        None if f > 0.0 => Value::String("Infinity".into()),
        None => Value::String("-Infinity".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cell(ty: &Type, raw: &[u8]) -> Value {
        JsonCell::from_sql(ty, raw).unwrap().0
    }

    #[test]
    fn test_scalars() {
        assert_eq!(cell(&Type::BOOL, &[1]), json!(true));
        assert_eq!(cell(&Type::INT2, &[0xff, 0xfe]), json!(-2));
        assert_eq!(cell(&Type::INT4, &[0, 0, 0, 42]), json!(42));
        assert_eq!(cell(&Type::INT8, &[0, 0, 0, 0, 0, 0, 1, 0]), json!(256));
        assert_eq!(cell(&Type::FLOAT8, &1.5f64.to_be_bytes()), json!(1.5));
        assert_eq!(cell(&Type::TEXT, b"hello"), json!("hello"));
        assert_eq!(
            JsonCell::from_sql_null(&Type::INT4).unwrap(),
            JsonCell(Value::Null)
        );
    }

    #[test]
    fn test_non_finite_floats() {
        assert_eq!(cell(&Type::FLOAT8, &f64::NAN.to_be_bytes()), json!("NaN"));
        assert_eq!(
            cell(&Type::FLOAT4, &f32::NEG_INFINITY.to_be_bytes()),
            json!("-Infinity")
        );
    }

    #[test]
    fn test_numeric_and_bytea() {
        // 12.5: ndigits=2 weight=0 sign=+ dscale=1, digits 12 5000
        let raw = [0, 2, 0, 0, 0, 0, 0, 1, 0, 12, 0x13, 0x88];
        assert_eq!(cell(&Type::NUMERIC, &raw), json!("12.5"));
        assert_eq!(cell(&Type::BYTEA, &[0xca, 0xfe]), json!("\\xcafe"));
    }

    #[test]
    fn test_json_columns() {
        assert_eq!(cell(&Type::JSON, br#"{"a":[1,2]}"#), json!({"a": [1, 2]}));
        let mut jsonb = vec![1u8];
        jsonb.extend_from_slice(b"[true]");
        assert_eq!(cell(&Type::JSONB, &jsonb), json!([true]));
    }

    #[test]
    fn test_temporal_and_uuid() {
        // 2000-01-02 is one day after the PostgreSQL epoch.
        assert_eq!(cell(&Type::DATE, &[0, 0, 0, 1]), json!("2000-01-02"));
        let one_hour: i64 = 3_600_000_000;
        assert_eq!(
            cell(&Type::TIMESTAMP, &one_hour.to_be_bytes()),
            json!("2000-01-01T01:00:00")
        );
        assert_eq!(
            cell(&Type::TIMESTAMPTZ, &one_hour.to_be_bytes()),
            json!("2000-01-01T01:00:00+00:00")
        );
        let id = Uuid::parse_str("67e55044-10b1-426f-9247-bb680e5fe0c8").unwrap();
        assert_eq!(
            cell(&Type::UUID, id.as_bytes()),
            json!("67e55044-10b1-426f-9247-bb680e5fe0c8")
        );
    }

    #[test]
    fn test_int_array_with_null() {
        let mut raw = Vec::new();
        for word in [1i32, 1, 23, 2, 1] {
            // ndim, has_null, element oid, length, lower bound
            raw.extend_from_slice(&word.to_be_bytes());
        }
        raw.extend_from_slice(&4i32.to_be_bytes());
        raw.extend_from_slice(&7i32.to_be_bytes());
        raw.extend_from_slice(&(-1i32).to_be_bytes());
        assert_eq!(cell(&Type::INT4_ARRAY, &raw), json!([7, null]));
    }

    #[test]
    fn test_unsupported_column() {
        let err = JsonCell::from_sql(&Type::POINT, &[0; 16]).unwrap_err();
        assert!(err.to_string().contains("cast it in the query"));
    }
}
