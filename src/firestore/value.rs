//! Conversion between Firestore's typed values and `serde_json::Value`.

use super::models::{ArrayValue, MapValue, Value, ValueType};
use super::FirestoreError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Number, Value as Json};
use std::collections::HashMap;

pub(crate) fn decode_fields(fields: HashMap<String, Value>) -> Result<Json, FirestoreError> {
    fields
        .into_iter()
        .map(|(key, value)| Ok((key, decode(value)?)))
        .collect::<Result<Map<String, Json>, FirestoreError>>()
        .map(Json::Object)
}

pub(crate) fn decode(value: Value) -> Result<Json, FirestoreError> {
    Ok(match value.value_type {
        ValueType::NullValue(()) => Json::Null,
        ValueType::BooleanValue(b) => Json::Bool(b),
        ValueType::IntegerValue(digits) => {
            let n: i64 = digits.parse().map_err(|e| {
                FirestoreError::ApiError(format!("invalid integer value '{}': {}", digits, e))
            })?;
            Json::Number(n.into())
        }
        ValueType::DoubleValue(d) => Number::from_f64(d)
            .map(Json::Number)
            .ok_or_else(|| FirestoreError::ApiError(format!("non-finite double value {}", d)))?,
        ValueType::TimestampValue(s)
        | ValueType::StringValue(s)
        | ValueType::BytesValue(s)
        | ValueType::ReferenceValue(s) => Json::String(s),
        ValueType::GeoPointValue(point) => {
            json!({ "latitude": point.latitude, "longitude": point.longitude })
        }
        ValueType::ArrayValue(array) => Json::Array(
            array
                .values
                .into_iter()
                .map(decode)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        ValueType::MapValue(map) => decode_fields(map.fields)?,
    })
}

pub(crate) fn encode(value: Json) -> Value {
    let value_type = match value {
        Json::Null => ValueType::NullValue(()),
        Json::Bool(b) => ValueType::BooleanValue(b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => ValueType::IntegerValue(i.to_string()),
            // u64 above i64::MAX, or a float; serde_json numbers are always finite.
            None => ValueType::DoubleValue(n.as_f64().unwrap_or_default()),
        },
        Json::String(s) => ValueType::StringValue(s),
        Json::Array(items) => ValueType::ArrayValue(ArrayValue {
            values: items.into_iter().map(encode).collect(),
        }),
        Json::Object(map) => ValueType::MapValue(MapValue {
            fields: encode_map(map),
        }),
    };
    Value { value_type }
}

fn encode_map(map: Map<String, Json>) -> HashMap<String, Value> {
    map.into_iter().map(|(k, v)| (k, encode(v))).collect()
}

/// Encodes a struct (or any JSON object) as document fields.
pub(crate) fn to_fields<T: Serialize>(value: &T) -> Result<HashMap<String, Value>, FirestoreError> {
    match serde_json::to_value(value)? {
        Json::Object(map) => Ok(encode_map(map)),
        other => Err(FirestoreError::ApiError(format!(
            "documents must be objects, got {}",
            other
        ))),
    }
}

pub(crate) fn from_fields<T: DeserializeOwned>(
    fields: HashMap<String, Value>,
) -> Result<T, FirestoreError> {
    Ok(serde_json::from_value(decode_fields(fields)?)?)
}
