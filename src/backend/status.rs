//! Status Payload Normalization
//!
//! Turns the tool status payload into a [`ToolStatus`]. The HTTP strategy
//! feeds it the parsed response body, the embedded strategy the converted
//! call result; both go through the same shape checks.

use serde_json::Value;

use super::error::BridgeError;
use super::events::ToolStatus;

/// Keys that may carry a model name, in priority order
pub const MODEL_NAME_KEYS: [&str; 3] = ["name", "model", "id"];

/// Parse a raw status body into a [`ToolStatus`].
///
/// Never fails: malformed bodies become `ok: false` with a parse message.
pub fn parse_status_body(body: &str) -> ToolStatus {
    match serde_json::from_str::<Value>(body) {
        Ok(value) => status_from_value(&value),
        Err(e) => ToolStatus::failed(format!("Failed to parse status response: {}", e)),
    }
}

/// Shape-check a structured status value.
pub fn status_from_value(value: &Value) -> ToolStatus {
    match tool_status(value) {
        Ok(status) => status,
        Err(e) => ToolStatus::failed(e.to_string()),
    }
}

fn tool_status(value: &Value) -> Result<ToolStatus, BridgeError> {
    let object = value
        .as_object()
        .ok_or_else(|| BridgeError::BadShape(format!("expected an object, got {}", kind(value))))?;

    let flag = |key: &str| -> Result<bool, BridgeError> {
        match object.get(key) {
            Some(Value::Bool(b)) => Ok(*b),
            Some(other) => Err(BridgeError::BadShape(format!(
                "'{}' should be a boolean, got {}",
                key,
                kind(other)
            ))),
            None => Err(BridgeError::BadShape(format!("missing '{}'", key))),
        }
    };

    let installed = flag("installed")?;
    let running = flag("running")?;

    let models = match object.get("models") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().filter_map(model_name).collect(),
        Some(other) => {
            return Err(BridgeError::BadShape(format!(
                "'models' should be a list, got {}",
                kind(other)
            )))
        }
    };

    Ok(ToolStatus {
        ok: true,
        installed,
        running,
        models,
        error: String::new(),
    })
}

/// Name of a single `models` entry, if it has one
pub fn model_name(entry: &Value) -> Option<String> {
    match entry {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(record) => MODEL_NAME_KEYS.iter().find_map(|key| {
            record
                .get(*key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        }),
        _ => None,
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
