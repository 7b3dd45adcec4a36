//! Inbound frame splitting.
//!
//! The upstream server may pack several JSON documents into one WebSocket
//! message with no delimiter between them (`{...}{...}`). Splitting is done on
//! bracket depth, ignoring brackets inside string literals, and every document
//! is parsed on its own so one broken fragment never takes the rest of the
//! batch down with it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::traits::MessageParser;

/// One `{"type": ..., "payload": ...}` object received from the server.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Event tag
    #[serde(rename = "type")]
    pub kind: String,
    /// Tag-dependent payload
    #[serde(default)]
    pub payload: Value,
}

impl Frame {
    #[must_use]
    pub fn new<K: Into<String>>(kind: K, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

/// [`MessageParser`] producing [`Frame`]s.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameParser;

impl MessageParser<Frame> for FrameParser {
    fn parse(&self, text: &str) -> Vec<Frame> {
        parse_frames(text)
    }
}

/// Byte offset just past the document opened at `start`, or `None` when the
/// input ends before its closing bracket.
///
/// Brackets inside string literals are ignored.
fn document_end(raw: &str, start: usize) -> Option<usize> {
    let mut depth = 0_usize;
    let mut in_string = false;
    let mut escaped = false;

    for (index, byte) in raw.bytes().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }

        match byte {
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(index + 1);
                }
            }
            b'"' => in_string = true,
            _ => {}
        }
    }

    None
}

/// Parse every complete JSON object in `raw`, in order.
///
/// Top-level arrays contribute their object elements. Text between documents
/// and documents that are not objects are skipped.
///
/// A balanced fragment that is not valid JSON is dropped as a whole. A
/// fragment that never closes (an unclosed bracket or string) would otherwise
/// swallow the rest of the message, so scanning resumes at the next opening
/// bracket after its start.
#[must_use]
pub fn parse_documents(raw: &str) -> Vec<Value> {
    let mut values = Vec::new();
    let mut cursor = 0_usize;

    while let Some(start) = raw
        .get(cursor..)
        .and_then(|rest| rest.find(['{', '[']))
        .map(|offset| cursor + offset)
    {
        let Some(end) = document_end(raw, start) else {
            #[cfg(feature = "tracing")]
            tracing::debug!(offset = start, "Skipping unterminated frame fragment");
            cursor = start + 1;
            continue;
        };
        cursor = end;

        let Some(document) = raw.get(start..end) else {
            continue;
        };
        match serde_json::from_str::<Value>(document) {
            Ok(value @ Value::Object(_)) => values.push(value),
            Ok(Value::Array(items)) => values.extend(items.into_iter().filter(Value::is_object)),
            Ok(_) => {}
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(fragment = %document, error = %e, "Skipping malformed frame fragment");
                #[cfg(not(feature = "tracing"))]
                let _: &serde_json::Error = &e;
            }
        }
    }

    values
}

/// Parse every `{type, payload}` frame in `raw`, in order.
///
/// Objects without a string `type` are skipped like malformed fragments.
#[must_use]
pub fn parse_frames(raw: &str) -> Vec<Frame> {
    parse_documents(raw)
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<Frame>(value) {
            Ok(frame) => Some(frame),
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %e, "Skipping object that is not a frame");
                #[cfg(not(feature = "tracing"))]
                let _: &serde_json::Error = &e;
                None
            }
        })
        .collect()
}
