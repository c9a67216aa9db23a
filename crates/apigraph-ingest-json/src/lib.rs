//! JSON payload flattening for APIGraph
//!
//! Turns request/response payloads into parameter-name paths:
//! - Object keys become `key` (top level) or `parent.key`
//! - A nested object's own key is emitted before its children
//! - Arrays are sampled: only the first element is inspected, and only when
//!   it is an object (`parent[0].child`)
//!
//! Payload problems never surface as errors. An empty, null-sentinel or
//! malformed payload simply has no keys.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;

/// Payload texts (after trimming) that mean "no payload".
pub const NULL_SENTINELS: [&str; 3] = ["", "null", "None"];

/// Extract the ordered parameter paths of a JSON payload.
///
/// Returns an empty list for blank input, a null sentinel, or text that does
/// not parse as JSON.
pub fn extract_keys(text: &str) -> Vec<String> {
    let trimmed = text.trim();
    if NULL_SENTINELS.contains(&trimmed) {
        return Vec::new();
    }

    match parse_payload(trimmed) {
        Ok(value) => {
            let keys = extract_keys_from_value(&value);
            dismantle(value);
            keys
        }
        Err(err) => {
            tracing::debug!(error = %err, "payload is not valid JSON; no keys extracted");
            Vec::new()
        }
    }
}

/// Parse a payload with no nesting limit.
///
/// The parser recurses per level; `serde_stacker` moves it onto a fresh
/// stack segment when the current one runs low.
pub fn parse_payload(text: &str) -> serde_json::Result<Value> {
    let mut de = serde_json::Deserializer::from_str(text);
    de.disable_recursion_limit();
    let value = Value::deserialize(serde_stacker::Deserializer::new(&mut de))?;
    if let Err(err) = de.end() {
        dismantle(value);
        return Err(err);
    }
    Ok(value)
}

// Drop glue for `Value` recurses once per level; tear deep trees down by hand.
fn dismantle(value: Value) {
    let mut stack = vec![value];
    while let Some(value) = stack.pop() {
        match value {
            Value::Object(map) => stack.extend(map.into_iter().map(|(_, child)| child)),
            Value::Array(items) => stack.extend(items),
            _ => {}
        }
    }
}

/// Extract the ordered parameter paths of an already-parsed payload.
///
/// Pre-order walk with an explicit stack, so nesting depth is unbounded.
pub fn extract_keys_from_value(root: &Value) -> Vec<String> {
    let mut keys = Vec::new();
    let mut stack: Vec<(String, &Value)> = Vec::new();
    push_children(root, "", &mut stack);

    while let Some((path, value)) = stack.pop() {
        push_children(value, &path, &mut stack);
        keys.push(path);
    }

    keys
}

// Children are pushed in reverse so they pop in declaration order.
fn push_children<'a>(value: &'a Value, prefix: &str, stack: &mut Vec<(String, &'a Value)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter().rev() {
                stack.push((join_path(prefix, key), child));
            }
        }
        Value::Array(items) => {
            if let Some(first @ Value::Object(_)) = items.first() {
                push_children(first, &format!("{prefix}[0]"), stack);
            }
        }
        _ => {}
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Coarse JSON value kind, used for parameter metadata and LLM prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JsonKind {
    Null,
    Boolean,
    Integer,
    Number,
    String,
    Array,
    Object,
}

impl JsonKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JsonKind::Null => "null",
            JsonKind::Boolean => "boolean",
            JsonKind::Integer => "integer",
            JsonKind::Number => "number",
            JsonKind::String => "string",
            JsonKind::Array => "array",
            JsonKind::Object => "object",
        }
    }
}

impl fmt::Display for JsonKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Infer the kind of a JSON value.
pub fn infer_type(value: &Value) -> JsonKind {
    match value {
        Value::Null => JsonKind::Null,
        Value::Bool(_) => JsonKind::Boolean,
        Value::Number(n) if n.is_i64() || n.is_u64() => JsonKind::Integer,
        Value::Number(_) => JsonKind::Number,
        Value::String(_) => JsonKind::String,
        Value::Array(_) => JsonKind::Array,
        Value::Object(_) => JsonKind::Object,
    }
}

/// Flatten an object into `path -> leaf value`.
///
/// Unlike [`extract_keys`], intermediate objects are not entries of their
/// own: only leaves are kept. Arrays whose first element is an object are
/// descended under `key[0]`; any other array is a leaf.
pub fn flatten_json(obj: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    let mut stack: Vec<(String, &Value)> = Vec::new();
    push_entries(obj, "", &mut stack);

    while let Some((path, value)) = stack.pop() {
        match value {
            Value::Object(child) => push_entries(child, &path, &mut stack),
            Value::Array(items) => match items.first() {
                Some(Value::Object(first)) => push_entries(first, &format!("{path}[0]"), &mut stack),
                _ => {
                    out.insert(path, value.clone());
                }
            },
            _ => {
                out.insert(path, value.clone());
            }
        }
    }
    out
}

fn push_entries<'a>(obj: &'a Map<String, Value>, parent: &str, stack: &mut Vec<(String, &'a Value)>) {
    for (key, child) in obj.iter().rev() {
        stack.push((join_path(parent, key), child));
    }
}

/// All distinct keys across a batch of payloads, sorted.
pub fn unique_keys<'a, I>(payloads: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a str>,
{
    payloads.into_iter().flat_map(extract_keys).collect()
}
