//! Result helpers for `tools/call` responses
//!
//! Builds the `{"content": [...], "isError": bool}` payload a tool server
//! returns, so servers don't hand-assemble content items.

use serde::Serialize;
use serde_json::{json, Value};

/// A text content item
pub fn text_content(text: impl Into<String>) -> Value {
    json!({"type": "text", "text": text.into()})
}

/// An image content item carrying base64 `data`
pub fn image_content(data: impl Into<String>, mime_type: &str) -> Value {
    json!({"type": "image", "data": data.into(), "mimeType": mime_type})
}

/// Create a successful result with multiple content items
pub fn multi_result(contents: Vec<Value>) -> Value {
    json!({"content": contents, "isError": false})
}

/// Create a successful plain text result
///
/// ```rust,ignore
/// use mcp_common::text_result;
///
/// let result = text_result("pong");
/// ```
pub fn text_result(text: impl Into<String>) -> Value {
    multi_result(vec![text_content(text)])
}

/// Create a successful result from any serializable data
///
/// The data is pretty-printed into a single text item.
pub fn json_result<T: Serialize>(data: &T) -> Result<Value, serde_json::Error> {
    let text = serde_json::to_string_pretty(data)?;
    Ok(text_result(text))
}

/// Create a result holding a single image
pub fn image_result(data: impl Into<String>, mime_type: &str) -> Value {
    multi_result(vec![image_content(data, mime_type)])
}

/// Create a tool-level failure (the call succeeded, the tool reports an error)
pub fn error_result(text: impl Into<String>) -> Value {
    json!({"content": [text_content(text)], "isError": true})
}
