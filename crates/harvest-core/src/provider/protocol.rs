//! Newline-delimited JSON request/response framing spoken over provider stdio.
//!
//! Each request is one line `{"id", "method", "params"}`; each response is one
//! line `{"id", "result"}` or `{"id", "error": {"message"}}`. Any other stdout
//! line is treated as diagnostic output.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl ToolRequest {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolErrorBody {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolErrorBody>,
}

impl ToolResponse {
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            result: None,
            error: Some(ToolErrorBody {
                message: message.into(),
            }),
        }
    }
}

/// Serializes a message as one JSON line with a trailing newline.
pub fn frame<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    let mut json = serde_json::to_string(message)?;
    json.push('\n');
    Ok(json)
}

/// Parses a stdout line as a response; `None` means the line is diagnostic output.
pub fn parse_response(line: &str) -> Option<ToolResponse> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

pub fn parse_request(line: &str) -> Result<ToolRequest, serde_json::Error> {
    serde_json::from_str(line.trim())
}
