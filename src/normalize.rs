// src/normalize.rs
//! Helpers for the loosely typed upstream payloads. Responses arrive either
//! bare or wrapped in `{"data": ...}`, and lists sometimes sit under a named
//! field instead of at the top level.
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoverSide {
    Gainers,
    Losers,
}

impl MoverSide {
    fn field(&self) -> &'static str {
        match self {
            MoverSide::Gainers => "top_gainers",
            MoverSide::Losers => "top_losers",
        }
    }
}

/// Strips one `{"data": ...}` wrapper if present.
pub fn unwrap_payload(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Returns `value` if it is already an array, otherwise the first array found
/// under one of `keys`. Anything else becomes an empty list.
pub fn as_list(value: Value, keys: &[&str]) -> Value {
    match value {
        Value::Array(_) => value,
        Value::Object(mut map) => keys
            .iter()
            .find_map(|key| match map.remove(*key) {
                Some(found @ Value::Array(_)) => Some(found),
                _ => None,
            })
            .unwrap_or_else(|| Value::Array(Vec::new())),
        _ => Value::Array(Vec::new()),
    }
}

/// Extracts gainers or losers from a `/trending` response.
pub fn movers(trending: &Value, side: MoverSide) -> Value {
    let trending = trending.get("data").unwrap_or(trending);
    let list = trending
        .get("trending_stocks")
        .and_then(|inner| inner.get(side.field()))
        .or_else(|| trending.get(side.field()));

    match list {
        Some(found @ Value::Array(_)) => found.clone(),
        _ => Value::Array(Vec::new()),
    }
}

/// Upstream signals "no such stock" with `null`, `{}` or an `error` field.
pub fn is_empty_payload(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty() || (map.len() == 1 && map.contains_key("error")),
        _ => false,
    }
}
