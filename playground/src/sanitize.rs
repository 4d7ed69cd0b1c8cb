//! Tool result sanitizer
//!
//! Third-party servers happily return megabytes of base64 or pages of text.
//! Before a result reaches an LLM context it is rendered to text, image
//! payloads are replaced with short placeholders, and the whole thing is
//! capped in length. Sanitizing already-sanitized output changes nothing.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};

use crate::config::SanitizerSettings;

/// Appended to output that hit the length cap
pub const TRUNCATION_MARKER: &str = "\n\n... (output truncated to prevent token limit overflow)";

const DEFAULT_MIME: &str = "image/png";

static SINGLE_QUOTED_DATA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"'data':\s*'([A-Za-z0-9+/=]+)'").expect("Invalid single-quoted data regex")
});

static DOUBLE_QUOTED_DATA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""data":\s*"([A-Za-z0-9+/=]+)""#).expect("Invalid double-quoted data regex")
});

fn image_placeholder(len: usize, mime: &str) -> String {
    format!("[Image data - {} chars, type: {}]", len, mime)
}

/// Bounds and redacts tool output
#[derive(Debug, Clone)]
pub struct Sanitizer {
    image_threshold: usize,
    max_output_chars: usize,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::from_settings(&SanitizerSettings::default())
    }
}

impl Sanitizer {
    pub fn new(image_threshold: usize, max_output_chars: usize) -> Self {
        Self {
            image_threshold,
            max_output_chars,
        }
    }

    pub fn from_settings(settings: &SanitizerSettings) -> Self {
        Self::new(settings.image_threshold, settings.max_output_chars)
    }

    /// Render a `tools/call` result and run every text pass over it
    pub fn sanitize_result(&self, result: &Value) -> String {
        self.sanitize_text(&self.render_result(result))
    }

    /// Inline payload pass plus the length cap, for pre-serialized output
    pub fn sanitize_text(&self, text: &str) -> String {
        self.truncate(&self.elide_inline(text))
    }

    /// Flatten a `tools/call` result to text with structured image payloads elided
    ///
    /// Text items contribute their text; other items their compact JSON.
    /// Items are joined with newlines and `isError` results get an
    /// `Error: ` prefix.
    pub fn render_result(&self, result: &Value) -> String {
        let Some(content) = result.get("content").and_then(Value::as_array) else {
            return self.elide_images(result).to_string();
        };

        let rendered = content
            .iter()
            .map(|item| match item.get("text").and_then(Value::as_str) {
                Some(text) if item.get("type").and_then(Value::as_str) == Some("text") => {
                    text.to_string()
                }
                _ => self.elide_images(item).to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n");

        if result.get("isError").and_then(Value::as_bool) == Some(true) {
            format!("Error: {}", rendered)
        } else {
            rendered
        }
    }

    /// Replace every oversized `data` string (at any depth) with a placeholder
    pub fn elide_images(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mime = map
                    .get("mimeType")
                    .or_else(|| map.get("mime_type"))
                    .and_then(Value::as_str)
                    .unwrap_or(DEFAULT_MIME);

                let elided: Map<String, Value> = map
                    .iter()
                    .map(|(key, inner)| {
                        let replaced = match inner {
                            Value::String(data)
                                if key == "data" && data.len() > self.image_threshold =>
                            {
                                Value::String(image_placeholder(data.len(), mime))
                            }
                            other => self.elide_images(other),
                        };
                        (key.clone(), replaced)
                    })
                    .collect();
                Value::Object(elided)
            }
            Value::Array(items) => {
                Value::Array(items.iter().map(|item| self.elide_images(item)).collect())
            }
            other => other.clone(),
        }
    }

    /// Replace base64 payloads embedded in stringified output
    pub fn elide_inline(&self, text: &str) -> String {
        let threshold = self.image_threshold;
        let single = SINGLE_QUOTED_DATA.replace_all(text, |caps: &Captures| {
            let payload = &caps[1];
            if payload.len() > threshold {
                format!("'data': '[Image data - {} chars]'", payload.len())
            } else {
                caps[0].to_string()
            }
        });
        DOUBLE_QUOTED_DATA
            .replace_all(&single, |caps: &Captures| {
                let payload = &caps[1];
                if payload.len() > threshold {
                    format!("\"data\": \"[Image data - {} chars]\"", payload.len())
                } else {
                    caps[0].to_string()
                }
            })
            .into_owned()
    }

    /// Cap at `max_output_chars` characters plus the marker
    pub fn truncate(&self, text: &str) -> String {
        if text.chars().count() <= self.max_output_chars {
            return text.to_string();
        }
        if let Some(body) = text.strip_suffix(TRUNCATION_MARKER) {
            if body.chars().count() <= self.max_output_chars {
                return text.to_string();
            }
        }

        let cut = text
            .char_indices()
            .nth(self.max_output_chars)
            .map(|(index, _)| index)
            .unwrap_or(text.len());
        tracing::debug!(
            "Truncating tool output from {} bytes to {} chars",
            text.len(),
            self.max_output_chars
        );
        format!("{}{}", &text[..cut], TRUNCATION_MARKER)
    }
}
