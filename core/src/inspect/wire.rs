//! JSON encoding of [`SerializedValue`].
//!
//! Null, booleans, strings and integers travel as plain JSON. Everything else
//! is an object tagged with `"__type"`. Decoding is total: unrecognized JSON
//! is mapped onto the closest variant instead of failing.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};

use super::{PromiseState, SerializedValue, DEFAULT_OBJECT_NAME};

pub const TYPE_TAG: &str = "__type";

/// Largest integer JSON consumers can represent exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

impl SerializedValue {
    pub fn to_json(&self) -> Value {
        match self {
            SerializedValue::Null => Value::Null,
            SerializedValue::Bool(b) => Value::Bool(*b),
            SerializedValue::Number(n) => number_to_json(*n),
            SerializedValue::Decimal(text) => json!({ TYPE_TAG: "number", "value": text }),
            SerializedValue::String(s) => Value::String(s.clone()),
            SerializedValue::Undefined => json!({ TYPE_TAG: "undefined" }),
            SerializedValue::Function { name } => json!({ TYPE_TAG: "function", "name": name }),
            SerializedValue::Symbol { description } => {
                json!({ TYPE_TAG: "symbol", "description": description })
            }
            SerializedValue::Circular { name } => json!({ TYPE_TAG: "circular", "name": name }),
            SerializedValue::MaxDepth => json!({ TYPE_TAG: "maxDepth" }),
            SerializedValue::Truncated { count } => json!({ TYPE_TAG: "truncated", "count": count }),
            SerializedValue::Error { message } => json!({ TYPE_TAG: "error", "message": message }),
            SerializedValue::Promise { state } => json!({ TYPE_TAG: "promise", "state": state.as_str() }),
            SerializedValue::Array { length, items } => json!({
                TYPE_TAG: "array",
                "length": length,
                "items": items.iter().map(SerializedValue::to_json).collect::<Vec<_>>(),
            }),
            SerializedValue::Object { name, props } => {
                let props: Map<String, Value> = props
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect();
                json!({ TYPE_TAG: "object", "name": name, "props": props })
            }
        }
    }

    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => SerializedValue::Null,
            Value::Bool(b) => SerializedValue::Bool(*b),
            Value::Number(n) => match n.as_f64() {
                Some(f) if f.fract() == 0.0 => SerializedValue::Number(f),
                _ => SerializedValue::Decimal(n.to_string()),
            },
            Value::String(s) => SerializedValue::String(s.clone()),
            Value::Array(items) => SerializedValue::Array {
                length: items.len(),
                items: items.iter().map(SerializedValue::from_json).collect(),
            },
            Value::Object(map) => match map.get(TYPE_TAG).and_then(Value::as_str) {
                Some(tag) => from_tagged(tag, map),
                None => SerializedValue::Object {
                    name: DEFAULT_OBJECT_NAME.to_string(),
                    props: decode_props(map),
                },
            },
        }
    }
}

fn number_to_json(n: f64) -> Value {
    if n.is_nan() {
        json!({ TYPE_TAG: "number", "value": "NaN" })
    } else if n.is_infinite() {
        let text = if n > 0.0 { "Infinity" } else { "-Infinity" };
        json!({ TYPE_TAG: "number", "value": text })
    } else if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn from_tagged(tag: &str, map: &Map<String, Value>) -> SerializedValue {
    let text = |key: &str| {
        map.get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let count = |key: &str| {
        map.get(key)
            .and_then(Value::as_u64)
            .unwrap_or_default() as usize
    };

    match tag {
        "undefined" => SerializedValue::Undefined,
        "number" => match text("value").as_str() {
            "NaN" => SerializedValue::Number(f64::NAN),
            "Infinity" => SerializedValue::Number(f64::INFINITY),
            "-Infinity" => SerializedValue::Number(f64::NEG_INFINITY),
            decimal => SerializedValue::Decimal(decimal.to_string()),
        },
        "function" => SerializedValue::Function { name: text("name") },
        "symbol" => SerializedValue::Symbol {
            description: text("description"),
        },
        "circular" => SerializedValue::Circular { name: text("name") },
        "maxDepth" => SerializedValue::MaxDepth,
        "truncated" => SerializedValue::Truncated {
            count: count("count"),
        },
        "error" => SerializedValue::Error {
            message: text("message"),
        },
        "promise" => SerializedValue::Promise {
            state: match text("state").as_str() {
                "fulfilled" => PromiseState::Fulfilled,
                "rejected" => PromiseState::Rejected,
                _ => PromiseState::Pending,
            },
        },
        "array" => {
            let items: Vec<SerializedValue> = map
                .get("items")
                .and_then(Value::as_array)
                .map(|items| items.iter().map(SerializedValue::from_json).collect())
                .unwrap_or_default();
            let length = map
                .get("length")
                .and_then(Value::as_u64)
                .map(|length| length as usize)
                .unwrap_or(items.len());
            SerializedValue::Array { length, items }
        }
        "object" => SerializedValue::Object {
            name: map
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_OBJECT_NAME)
                .to_string(),
            props: map
                .get("props")
                .and_then(Value::as_object)
                .map(decode_props)
                .unwrap_or_default(),
        },
        // Unknown tag: keep the fields as a plain object
        _ => SerializedValue::Object {
            name: DEFAULT_OBJECT_NAME.to_string(),
            props: decode_props(map),
        },
    }
}

fn decode_props(map: &Map<String, Value>) -> IndexMap<String, SerializedValue> {
    map.iter()
        .map(|(key, value)| (key.clone(), SerializedValue::from_json(value)))
        .collect()
}

impl Serialize for SerializedValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SerializedValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(SerializedValue::from_json(&value))
    }
}
