//! Decoding of JSON-encoded grid responses into typed values.
//!
//! The server answers grid requests with JSON grids whose cells use a mix
//! of spellings for the same Haystack type. Refs arrive as `{"val": id}`,
//! `{"_kind": "ref", "val": id}`, or a bare `"@id"` string; markers as
//! `"m:"` or `{"_kind": "marker"}`; timestamps as
//! `{"val": "<iso> <zone>", "tz": "<zone>"}`.

use std::collections::BTreeMap;

use chrono::DateTime;
use serde_json::{Map, Number, Value as Json, json};

use super::value::{MARKER_SENTINEL, Ref, Value, ZonedDateTime, format_number};
use crate::error::ClientError;

/// A decoded grid row.
pub type Dict = BTreeMap<String, Value>;

/// Fallback zone when a timestamp names none.
const DEFAULT_ZONE: &str = "UTC";

/// Decode a single JSON cell.
///
/// Shapes that have no [`Value`] counterpart are stringified into
/// [`Value::Str`].
#[must_use]
pub fn decode_value(json: &Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => n
            .as_f64()
            .map_or_else(|| Value::Str(n.to_string()), Value::Number),
        Json::String(s) => Value::infer(s),
        Json::Object(map) => decode_object(map, json),
        Json::Array(_) => Value::Str(json.to_string()),
    }
}

fn decode_object(map: &Map<String, Json>, json: &Json) -> Value {
    let val = map.get("val");
    match map.get("_kind").and_then(Json::as_str) {
        Some("marker") => Value::Marker,
        Some("ref") => val
            .and_then(Json::as_str)
            .and_then(|s| Ref::new(s).ok())
            .map_or_else(|| Value::Str(json.to_string()), Value::Ref),
        Some("dateTime") => decode_datetime(map)
            .map_or_else(|_| Value::Str(json.to_string()), Value::DateTime),
        Some("number") => val
            .and_then(|v| match v {
                Json::Number(n) => n.as_f64(),
                Json::String(s) => s.parse().ok(),
                _ => None,
            })
            .map_or_else(|| Value::Str(json.to_string()), Value::Number),
        Some(_) => Value::Str(json.to_string()),
        None => {
            if let Ok(dt) = decode_datetime(map) {
                return Value::DateTime(dt);
            }
            val.and_then(Json::as_str)
                .and_then(|s| Ref::new(s).ok())
                .map_or_else(|| Value::Str(json.to_string()), Value::Ref)
        }
    }
}

/// Decode a `{"val": "<iso> <zone>", "tz": "<zone>"}` timestamp dict.
///
/// The `tz` field wins when present; otherwise the zone name trailing the
/// ISO text is used, and `UTC` when neither exists.
///
/// # Errors
///
/// Returns [`ClientError::Decode`] when `val` is missing or its ISO part
/// does not parse with an offset.
pub fn decode_datetime(map: &Map<String, Json>) -> Result<ZonedDateTime, ClientError> {
    let text = map
        .get("val")
        .and_then(Json::as_str)
        .ok_or_else(|| ClientError::Decode("datetime dict has no string val".to_owned()))?;
    let (iso, trailing) = match text.split_once(' ') {
        Some((iso, zone)) => (iso, Some(zone.trim())),
        None => (text, None),
    };
    let zone = map
        .get("tz")
        .and_then(Json::as_str)
        .filter(|z| !z.is_empty())
        .or(trailing.filter(|z| !z.is_empty()))
        .unwrap_or(DEFAULT_ZONE);
    let instant = DateTime::parse_from_rfc3339(iso)
        .map_err(|e| ClientError::Decode(format!("bad datetime {text:?}: {e}")))?;
    ZonedDateTime::new(instant, zone).map_err(|e| ClientError::Decode(e.to_string()))
}

/// Decode one JSON row object into a [`Dict`].
#[must_use]
pub fn decode_dict(row: &Map<String, Json>) -> Dict {
    row.iter()
        .map(|(name, cell)| (name.clone(), decode_value(cell)))
        .collect()
}

/// Decode the `rows` array of a JSON grid response. Non-object rows are
/// skipped.
#[must_use]
pub fn decode_rows(response: &Json) -> Vec<Dict> {
    response
        .get("rows")
        .and_then(Json::as_array)
        .map(|rows| rows.iter().filter_map(Json::as_object).map(decode_dict).collect())
        .unwrap_or_default()
}

fn is_truthy(json: &Json) -> bool {
    match json {
        Json::Null => false,
        Json::Bool(b) => *b,
        Json::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Json::String(s) => !s.is_empty(),
        Json::Array(a) => !a.is_empty(),
        Json::Object(o) => !o.is_empty(),
    }
}

/// Extract a server-reported error from a grid response's metadata.
///
/// Returns the `meta.dis` message (or `"Unknown error"`) when `meta.err` is
/// set.
#[must_use]
pub fn response_error(response: &Json) -> Option<String> {
    let meta = response.get("meta")?;
    if !meta.get("err").is_some_and(is_truthy) {
        return None;
    }
    Some(
        meta.get("dis")
            .and_then(Json::as_str)
            .unwrap_or("Unknown error")
            .to_owned(),
    )
}

/// Render a value in the JSON spellings the server uses.
///
/// Numbers JSON cannot hold (`NaN`, infinities) become their Zinc text.
#[must_use]
pub fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Marker => Json::String(MARKER_SENTINEL.to_owned()),
        Value::Ref(r) => Json::String(r.to_string()),
        Value::Bool(b) => Json::Bool(*b),
        Value::Number(n) => {
            Number::from_f64(*n).map_or_else(|| Json::String(format_number(*n)), Json::Number)
        }
        Value::Str(s) => Json::String(s.clone()),
        Value::DateTime(dt) => json!({ "_kind": "dateTime", "val": dt.to_iso(), "tz": dt.zone() }),
    }
}

/// Render a decoded row as a JSON object.
#[must_use]
pub fn dict_to_json(dict: &Dict) -> Json {
    Json::Object(
        dict.iter()
            .map(|(name, value)| (name.clone(), value_to_json(value)))
            .collect(),
    )
}
