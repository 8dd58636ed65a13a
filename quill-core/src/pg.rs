//! PostgreSQL wire conversions for `Value`.
//!
//! `Value` accepts every declared parameter type at the trait level, then
//! checks the held variant against the concrete parameter type before
//! encoding. A mismatched bind fails with the driver's `WrongType` error
//! rather than being reinterpreted as raw bytes.
//!
//! Columns without a dedicated variant decode to their text form: NUMERIC
//! (as `Int` when it has no fractional digits and fits), DATE, TIME,
//! INTERVAL (ISO 8601) and BYTEA (`\x` hex). One-dimensional arrays decode
//! to a JSON array. Anything else fails with `ValueError::UnsupportedType`.

use std::error::Error;

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use postgres_types::{to_sql_checked, FromSql, IsNull, Kind, ToSql, Type, WrongType};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::ValueError;
use crate::value::Value;

type BoxError = Box<dyn Error + Sync + Send>;

/// Encode through `T`, refusing parameter types `T` does not accept.
fn encode<T: ToSql>(value: &T, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    if !T::accepts(ty) {
        return Err(Box::new(WrongType::new::<T>(ty.clone())));
    }
    value.to_sql(ty, out)
}

impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(v) => encode(v, ty, out),
            Value::Int(v) => {
                if *ty == Type::INT2 {
                    encode(&i16::try_from(*v)?, ty, out)
                } else if *ty == Type::INT4 {
                    encode(&i32::try_from(*v)?, ty, out)
                } else if *ty == Type::FLOAT8 {
                    encode(&(*v as f64), ty, out)
                } else {
                    encode(v, ty, out)
                }
            }
            Value::Float(v) => {
                if *ty == Type::FLOAT4 {
                    encode(&(*v as f32), ty, out)
                } else {
                    encode(v, ty, out)
                }
            }
            Value::Text(v) => encode(v, ty, out),
            Value::Json(v) => encode(v, ty, out),
            Value::Timestamp(v) => {
                if *ty == Type::TIMESTAMP {
                    encode(&v.naive_utc(), ty, out)
                } else {
                    encode(v, ty, out)
                }
            }
            Value::Uuid(v) => encode(v, ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

// ============================================================================
// DECODING
// ============================================================================

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

fn read_u16(raw: &[u8], at: usize) -> Result<u16, BoxError> {
    raw.get(at..at + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| "truncated numeric value".into())
}

/// NUMERIC arrives as base-10000 digit groups with a weight and a display
/// scale. Rebuild the decimal text PostgreSQL itself would print.
fn decode_numeric(raw: &[u8]) -> Result<Value, BoxError> {
    let ndigits = usize::from(read_u16(raw, 0)?);
    let weight = i32::from(read_u16(raw, 2)? as i16);
    let sign = read_u16(raw, 4)?;
    let dscale = usize::from(read_u16(raw, 6)?);
    if raw.len() != 8 + 2 * ndigits {
        return Err("malformed numeric value".into());
    }
    let digits: Vec<u16> = raw[8..]
        .chunks_exact(2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .collect();
    let digit = |idx: i32| {
        usize::try_from(idx)
            .ok()
            .and_then(|i| digits.get(i))
            .copied()
            .unwrap_or(0)
    };

    let mut text = match sign {
        NUMERIC_POS => String::new(),
        NUMERIC_NEG => String::from("-"),
        NUMERIC_NAN => return Ok(Value::Text("NaN".into())),
        NUMERIC_PINF => return Ok(Value::Text("Infinity".into())),
        NUMERIC_NINF => return Ok(Value::Text("-Infinity".into())),
        other => return Err(format!("invalid numeric sign: {other:#06x}").into()),
    };

    if weight < 0 {
        text.push('0');
    } else {
        text.push_str(&digit(0).to_string());
        for idx in 1..=weight {
            text.push_str(&format!("{:04}", digit(idx)));
        }
    }

    if dscale == 0 {
        return Ok(match text.parse::<i64>() {
            Ok(v) => Value::Int(v),
            Err(_) => Value::Text(text),
        });
    }

    let mut fraction = String::with_capacity(dscale + 4);
    let mut idx = weight + 1;
    while fraction.len() < dscale {
        fraction.push_str(&format!("{:04}", digit(idx)));
        idx += 1;
    }
    fraction.truncate(dscale);
    text.push('.');
    text.push_str(&fraction);
    Ok(Value::Text(text))
}

/// INTERVAL is microseconds, days and months. Rendered as an ISO 8601
/// duration so callers can parse it without PostgreSQL's interval styles.
fn decode_interval(raw: &[u8]) -> Result<Value, BoxError> {
    if raw.len() != 16 {
        return Err("malformed interval value".into());
    }
    let micros = i64::from_be_bytes(raw[0..8].try_into()?);
    let days = i32::from_be_bytes(raw[8..12].try_into()?);
    let months = i32::from_be_bytes(raw[12..16].try_into()?);

    let sign = if micros < 0 { "-" } else { "" };
    let magnitude = micros.unsigned_abs();
    let mut seconds = format!("{}", magnitude / 1_000_000);
    let fraction = magnitude % 1_000_000;
    if fraction != 0 {
        let digits = format!("{fraction:06}");
        seconds.push('.');
        seconds.push_str(digits.trim_end_matches('0'));
    }
    Ok(Value::Text(format!("P{months}M{days}DT{sign}{seconds}S")))
}

/// Array elements travel as JSON, so non-JSON variants become strings.
fn into_json(value: Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Bool(v) => JsonValue::Bool(v),
        Value::Int(v) => JsonValue::from(v),
        Value::Float(v) => serde_json::Number::from_f64(v)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Value::Text(v) => JsonValue::String(v),
        Value::Json(v) => v,
        Value::Timestamp(v) => JsonValue::String(v.to_rfc3339()),
        Value::Uuid(v) => JsonValue::String(v.to_string()),
    }
}

impl<'a> FromSql<'a> for Value {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        let value = if *ty == Type::BOOL {
            Value::Bool(bool::from_sql(ty, raw)?)
        } else if *ty == Type::INT2 {
            Value::Int(i16::from_sql(ty, raw)?.into())
        } else if *ty == Type::INT4 {
            Value::Int(i32::from_sql(ty, raw)?.into())
        } else if *ty == Type::INT8 {
            Value::Int(i64::from_sql(ty, raw)?)
        } else if *ty == Type::OID {
            Value::Int(u32::from_sql(ty, raw)?.into())
        } else if *ty == Type::FLOAT4 {
            Value::Float(f32::from_sql(ty, raw)?.into())
        } else if *ty == Type::FLOAT8 {
            Value::Float(f64::from_sql(ty, raw)?)
        } else if *ty == Type::NUMERIC {
            decode_numeric(raw)?
        } else if *ty == Type::JSON || *ty == Type::JSONB {
            Value::Json(JsonValue::from_sql(ty, raw)?)
        } else if *ty == Type::TIMESTAMPTZ {
            Value::Timestamp(DateTime::<Utc>::from_sql(ty, raw)?)
        } else if *ty == Type::TIMESTAMP {
            Value::Timestamp(NaiveDateTime::from_sql(ty, raw)?.and_utc())
        } else if *ty == Type::DATE {
            Value::Text(NaiveDate::from_sql(ty, raw)?.format("%Y-%m-%d").to_string())
        } else if *ty == Type::TIME {
            Value::Text(NaiveTime::from_sql(ty, raw)?.format("%H:%M:%S%.f").to_string())
        } else if *ty == Type::INTERVAL {
            decode_interval(raw)?
        } else if *ty == Type::UUID {
            Value::Uuid(Uuid::from_sql(ty, raw)?)
        } else if *ty == Type::BYTEA {
            let bytes = <&[u8] as FromSql>::from_sql(ty, raw)?;
            Value::Text(format!("\\x{}", hex::encode(bytes)))
        } else if matches!(ty.kind(), Kind::Array(_)) {
            let items = <Vec<Value> as FromSql>::from_sql(ty, raw)?;
            Value::Json(JsonValue::Array(items.into_iter().map(into_json).collect()))
        } else if <String as FromSql>::accepts(ty) {
            Value::Text(String::from_sql(ty, raw)?)
        } else {
            return Err(Box::new(ValueError::UnsupportedType {
                type_name: ty.name().to_string(),
            }));
        };
        Ok(value)
    }

    fn from_sql_null(_ty: &Type) -> Result<Self, BoxError> {
        Ok(Value::Null)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}
