//! Record serialization.
//!
//! Payloads are stored as pretty-printed JSON. Only objects and arrays are
//! accepted, and nesting is capped below the parser's recursion limit so
//! every stored record can be read back.

use serde_json::Value;
use thiserror::Error;

/// Deepest accepted nesting of objects and arrays.
pub const MAX_DEPTH: usize = 100;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    #[error("Payload must be a JSON object or array, got {0}")]
    NotStructured(&'static str),

    #[error("Payload nests deeper than {0} levels")]
    TooDeep(usize),

    #[error("Malformed record: {0}")]
    Malformed(String),
}

/// Serialize a payload for storage.
pub fn encode(payload: &Value) -> Result<Vec<u8>, CodecError> {
    validate(payload)?;
    serde_json::to_vec_pretty(payload).map_err(|e| CodecError::Malformed(e.to_string()))
}

/// Deserialize stored bytes back into a payload.
pub fn decode(bytes: &[u8]) -> Result<Value, CodecError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| CodecError::Malformed(e.to_string()))?;
    validate(&value)?;
    Ok(value)
}

/// Check that a payload is a structured JSON document of bounded depth.
pub fn validate(payload: &Value) -> Result<(), CodecError> {
    match payload {
        Value::Object(_) | Value::Array(_) => {}
        other => return Err(CodecError::NotStructured(type_name(other))),
    }
    if depth(payload) > MAX_DEPTH {
        return Err(CodecError::TooDeep(MAX_DEPTH));
    }
    Ok(())
}

fn depth(value: &Value) -> usize {
    // Iterative so hostile payloads cannot overflow the stack here
    let mut deepest = 0;
    let mut stack = vec![(value, 1usize)];
    while let Some((value, level)) = stack.pop() {
        match value {
            Value::Object(map) => {
                deepest = deepest.max(level);
                stack.extend(map.values().map(|v| (v, level + 1)));
            }
            Value::Array(items) => {
                deepest = deepest.max(level);
                stack.extend(items.iter().map(|v| (v, level + 1)));
            }
            _ => {}
        }
    }
    deepest
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
