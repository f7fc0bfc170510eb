//! Decoding of caller-supplied `params` and binding of the decoded values to
//! statement placeholders.

use std::error::Error;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::{Map, Value};
use tokio_postgres::types::{IsNull, Kind, ToSql, Type, to_sql_checked};
use tokio_util::bytes::BytesMut;
use uuid::Uuid;

use crate::error::PgMcpError;
use crate::numeric;

type BoxError = Box<dyn Error + Sync + Send>;

/// The shapes a `params` payload can take once parsed.
#[derive(Debug, Clone, PartialEq)]
pub enum RawParams {
    Absent,
    Sequence(Vec<Value>),
    Mapping(Map<String, Value>),
}

impl RawParams {
    /// Parse a payload given either as JSON text or as an already-structured
    /// JSON value. Empty text counts as absent.
    pub fn parse(raw: Option<&Value>) -> Result<Self, PgMcpError> {
        match raw {
            None | Some(Value::Null) => Ok(RawParams::Absent),
            Some(Value::String(text)) if text.trim().is_empty() => Ok(RawParams::Absent),
            Some(Value::String(text)) => {
                let parsed: Value = serde_json::from_str(text).map_err(|e| {
                    PgMcpError::InvalidParams(format!("params is not valid JSON: {e}"))
                })?;
                Self::classify(parsed)
            }
            Some(other) => Self::classify(other.clone()),
        }
    }

    fn classify(value: Value) -> Result<Self, PgMcpError> {
        match value {
            Value::Null => Ok(RawParams::Absent),
            Value::Array(items) => Ok(RawParams::Sequence(items)),
            Value::Object(map) => Ok(RawParams::Mapping(map)),
            scalar => Err(PgMcpError::InvalidParams(format!(
                "params must be a JSON array, got {scalar}"
            ))),
        }
    }

    /// Turn the payload into positional arguments for `$1, $2, ...`.
    ///
    /// Only the array form can be bound; a keyed mapping has no defined order
    /// and is refused.
    pub fn into_args(self) -> Result<Vec<SqlArg>, PgMcpError> {
        match self {
            RawParams::Absent => Ok(Vec::new()),
            RawParams::Sequence(items) => Ok(items.into_iter().map(SqlArg).collect()),
            RawParams::Mapping(map) => Err(PgMcpError::InvalidParams(format!(
                "named parameters are not supported (got keys: {}); pass a JSON array \
                 whose elements bind to $1, $2, ... in order",
                map.keys().cloned().collect::<Vec<_>>().join(", ")
            ))),
        }
    }
}

/// Decode `params` straight to positional arguments.
pub fn decode(raw: Option<&Value>) -> Result<Vec<SqlArg>, PgMcpError> {
    RawParams::parse(raw)?.into_args()
}

/// A JSON value bound to a statement parameter.
///
/// The server infers each placeholder's type when the statement is prepared;
/// the value is converted to that type at bind time.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlArg(pub Value);

impl SqlArg {
    pub fn as_param(&self) -> &(dyn ToSql + Sync) {
        self
    }
}

impl ToSql for SqlArg {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        bind(&self.0, ty, out)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn bind(value: &Value, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    if value.is_null() {
        return Ok(IsNull::Yes);
    }

    match ty.kind() {
        Kind::Domain(base) => return bind(value, base, out),
        Kind::Array(_) => {
            let Value::Array(items) = value else {
                return Err(mismatch(value, ty));
            };
            let items: Vec<SqlArg> = items.iter().cloned().map(SqlArg).collect();
            return items.to_sql(ty, out);
        }
        Kind::Enum(_) => return text(value).as_str().to_sql(ty, out),
        _ => {}
    }

    match *ty {
        Type::BOOL => match value {
            Value::Bool(b) => b.to_sql(ty, out),
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "t" => true.to_sql(ty, out),
                "false" | "f" => false.to_sql(ty, out),
                _ => Err(mismatch(value, ty)),
            },
            _ => Err(mismatch(value, ty)),
        },
        Type::INT2 => {
            let n = integer(value, ty)?;
            i16::try_from(n)
                .map_err(|_| out_of_range(n, ty))?
                .to_sql(ty, out)
        }
        Type::INT4 => {
            let n = integer(value, ty)?;
            i32::try_from(n)
                .map_err(|_| out_of_range(n, ty))?
                .to_sql(ty, out)
        }
        Type::INT8 => integer(value, ty)?.to_sql(ty, out),
        Type::OID => {
            let n = integer(value, ty)?;
            u32::try_from(n)
                .map_err(|_| out_of_range(n, ty))?
                .to_sql(ty, out)
        }
        Type::FLOAT4 => (float(value, ty)? as f32).to_sql(ty, out),
        Type::FLOAT8 => float(value, ty)?.to_sql(ty, out),
        Type::NUMERIC => {
            let decimal = match value {
                Value::Number(n) => match n.as_f64() {
                    Some(f) if n.is_f64() => format!("{f}"),
                    _ => n.to_string(),
                },
                Value::String(s) => s.clone(),
                _ => return Err(mismatch(value, ty)),
            };
            numeric::encode(&decimal, out)?;
            Ok(IsNull::No)
        }
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            text(value).as_str().to_sql(ty, out)
        }
        Type::JSON | Type::JSONB => value.to_sql(ty, out),
        Type::TIMESTAMP => parse_timestamp(string(value, ty)?)?.to_sql(ty, out),
        Type::TIMESTAMPTZ => parse_timestamptz(string(value, ty)?)?.to_sql(ty, out),
        Type::DATE => NaiveDate::parse_from_str(string(value, ty)?.trim(), "%Y-%m-%d")?
            .to_sql(ty, out),
        Type::TIME => parse_time(string(value, ty)?)?.to_sql(ty, out),
        Type::UUID => Uuid::parse_str(string(value, ty)?.trim())?.to_sql(ty, out),
        Type::BYTEA => {
            let s = string(value, ty)?;
            let digits = s
                .strip_prefix("\\x")
                .or_else(|| s.strip_prefix("0x"))
                .unwrap_or(s);
            hex::decode(digits)?.to_sql(ty, out)
        }
        _ if ty.name() == "citext" => text(value).as_str().to_sql(ty, out),
        _ => Err(PgMcpError::UnsupportedType(format!(
            "cannot bind a JSON value to a parameter of type {ty}; cast the placeholder, e.g. $1::text"
        ))
        .into()),
    }
}

fn mismatch(value: &Value, ty: &Type) -> BoxError {
    let kind = match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    format!("cannot bind JSON {kind} {value} to a parameter of type {ty}").into()
}

fn out_of_range(n: i64, ty: &Type) -> BoxError {
    format!("{n} is out of range for type {ty}").into()
}

fn integer(value: &Value, ty: &Type) -> Result<i64, BoxError> {
    match value {
        Value::Number(n) => n.as_i64().ok_or_else(|| mismatch(value, ty)),
        Value::String(s) => s.trim().parse().map_err(|_| mismatch(value, ty)),
        _ => Err(mismatch(value, ty)),
    }
}

fn float(value: &Value, ty: &Type) -> Result<f64, BoxError> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| mismatch(value, ty)),
        Value::String(s) => s.trim().parse().map_err(|_| mismatch(value, ty)),
        _ => Err(mismatch(value, ty)),
    }
}

fn string<'a>(value: &'a Value, ty: &Type) -> Result<&'a str, BoxError> {
    value.as_str().ok_or_else(|| mismatch(value, ty))
}

/// Text rendering used for text-like targets: strings as-is, everything else
/// as its JSON form.
fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

fn parse_timestamp(s: &str) -> Result<NaiveDateTime, BoxError> {
    let s = s.trim();
    for fmt in NAIVE_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(ts);
        }
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.naive_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN));
    }
    Err(format!("'{s}' is not an ISO-8601 timestamp").into())
}

fn parse_timestamptz(s: &str) -> Result<DateTime<Utc>, BoxError> {
    let s = s.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Ok(ts.with_timezone(&Utc));
    }
    // Without an offset the value is taken as UTC.
    parse_timestamp(s).map(|naive| naive.and_utc())
}

fn parse_time(s: &str) -> Result<NaiveTime, BoxError> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|_| format!("'{s}' is not a time of day").into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bound(value: Value, ty: &Type) -> Result<Vec<u8>, BoxError> {
        let mut buf = BytesMut::new();
        match SqlArg(value).to_sql(ty, &mut buf)? {
            IsNull::Yes => Ok(Vec::new()),
            IsNull::No => Ok(buf.to_vec()),
        }
    }

    #[test]
    fn test_absent_params() {
        assert!(decode(None).unwrap().is_empty());
        assert!(decode(Some(&Value::Null)).unwrap().is_empty());
        assert!(decode(Some(&json!(""))).unwrap().is_empty());
        assert!(decode(Some(&json!("null"))).unwrap().is_empty());
    }

    #[test]
    fn test_array_text_binds_in_order() {
        let args = decode(Some(&json!(r#"[1, "two", null, 3.5]"#))).unwrap();
        assert_eq!(
            args,
            vec![
                SqlArg(json!(1)),
                SqlArg(json!("two")),
                SqlArg(Value::Null),
                SqlArg(json!(3.5)),
            ]
        );
    }

    #[test]
    fn test_structured_array_used_as_is() {
        let args = decode(Some(&json!([true, {"k": 1}]))).unwrap();
        assert_eq!(args, vec![SqlArg(json!(true)), SqlArg(json!({"k": 1}))]);
    }

    #[test]
    fn test_malformed_json_is_reported() {
        let err = decode(Some(&json!("{"))).unwrap_err();
        assert!(matches!(err, PgMcpError::InvalidParams(_)));
        assert!(err.to_string().contains("not valid JSON"));
    }

    #[test]
    fn test_mapping_is_refused() {
        let raw = json!(r#"{"id": 1}"#);
        assert!(matches!(
            RawParams::parse(Some(&raw)).unwrap(),
            RawParams::Mapping(_)
        ));
        let err = decode(Some(&raw)).unwrap_err();
        assert!(err.to_string().contains("named parameters are not supported"));
        assert!(err.to_string().contains("id"));
    }

    #[test]
    fn test_scalar_is_refused() {
        assert!(decode(Some(&json!("42"))).is_err());
        assert!(decode(Some(&json!(42))).is_err());
    }

    #[test]
    fn test_bind_integers() {
        assert_eq!(bound(json!(5), &Type::INT4).unwrap(), vec![0, 0, 0, 5]);
        assert_eq!(bound(json!("7"), &Type::INT2).unwrap(), vec![0, 7]);
        assert_eq!(bound(json!(-1), &Type::INT8).unwrap(), vec![0xff; 8]);
        assert!(bound(json!(70000), &Type::INT2).is_err());
        assert!(bound(json!(1.5), &Type::INT4).is_err());
        assert!(bound(json!("abc"), &Type::INT4).is_err());
    }

    #[test]
    fn test_bind_null_for_any_type() {
        assert!(bound(Value::Null, &Type::INT4).unwrap().is_empty());
        assert!(bound(Value::Null, &Type::UUID).unwrap().is_empty());
    }

    #[test]
    fn test_bind_text_and_bool() {
        assert_eq!(bound(json!("hi"), &Type::TEXT).unwrap(), b"hi".to_vec());
        assert_eq!(bound(json!(42), &Type::VARCHAR).unwrap(), b"42".to_vec());
        assert_eq!(bound(json!(true), &Type::BOOL).unwrap(), vec![1]);
        assert_eq!(bound(json!("f"), &Type::BOOL).unwrap(), vec![0]);
        assert!(bound(json!(1), &Type::BOOL).is_err());
    }

    #[test]
    fn test_bind_jsonb_prefixes_version() {
        let bytes = bound(json!({"a": 1}), &Type::JSONB).unwrap();
        assert_eq!(bytes[0], 1);
        assert_eq!(&bytes[1..], br#"{"a":1}"#);
    }

    #[test]
    fn test_bind_numeric() {
        let from_number = bound(json!(12.5), &Type::NUMERIC).unwrap();
        let from_string = bound(json!("12.5"), &Type::NUMERIC).unwrap();
        assert_eq!(from_number, from_string);
        assert!(bound(json!("twelve"), &Type::NUMERIC).is_err());
    }

    #[test]
    fn test_bind_temporal_and_uuid() {
        assert_eq!(bound(json!("2024-01-02"), &Type::DATE).unwrap().len(), 4);
        assert_eq!(
            bound(json!("2024-01-02T03:04:05"), &Type::TIMESTAMP).unwrap().len(),
            8
        );
        assert_eq!(
            bound(json!("2024-01-02T03:04:05+02:00"), &Type::TIMESTAMPTZ)
                .unwrap()
                .len(),
            8
        );
        assert_eq!(bound(json!("12:30"), &Type::TIME).unwrap().len(), 8);
        assert_eq!(
            bound(json!("67e55044-10b1-426f-9247-bb680e5fe0c8"), &Type::UUID)
                .unwrap()
                .len(),
            16
        );
        assert!(bound(json!("yesterday"), &Type::DATE).is_err());
    }

    #[test]
    fn test_bind_bytea() {
        assert_eq!(
            bound(json!("\\xdeadbeef"), &Type::BYTEA).unwrap(),
            vec![0xde, 0xad, 0xbe, 0xef]
        );
        assert!(bound(json!("zz"), &Type::BYTEA).is_err());
    }

    #[test]
    fn test_bind_array() {
        let bytes = bound(json!([1, 2, null]), &Type::INT4_ARRAY).unwrap();
        // ndim=1, has_null=1, element oid=23
        assert_eq!(&bytes[..12], &[0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 23]);
        assert!(bound(json!(1), &Type::INT4_ARRAY).is_err());
    }

    #[test]
    fn test_bind_unsupported_type() {
        let err = bound(json!("(0,0)"), &Type::POINT).unwrap_err();
        assert!(err.to_string().contains("point"));
    }
}
