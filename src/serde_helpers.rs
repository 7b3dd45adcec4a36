//! Serde helpers for event payload decoding.
//!
//! When the `tracing` feature is enabled, payload fields the typed model does
//! not know about are logged instead of silently discarded, which is how
//! server-side protocol additions get noticed.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Deserialize an event payload, warning about unknown fields.
///
/// `event` names the frame tag for log context. Unknown fields never fail
/// deserialization; a missing or mistyped required field does, and the
/// offending path is logged.
#[cfg(feature = "tracing")]
pub(crate) fn deserialize_with_warnings<T: DeserializeOwned>(
    event: &str,
    value: Value,
) -> crate::Result<T> {
    use std::any::type_name;

    tracing::trace!(
        event,
        type_name = %type_name::<T>(),
        json = %value,
        "decoding event payload"
    );

    let original = value.clone();
    let mut unknown_paths: Vec<String> = Vec::new();

    let result: T = serde_ignored::deserialize(value, |path| {
        unknown_paths.push(path.to_string());
    })
    .inspect_err(|_| {
        let path_result: Result<T, _> = serde_path_to_error::deserialize(original.clone());
        if let Err(path_err) = path_result {
            let path = path_err.path().to_string();
            let value_display = format_value(lookup_value(&original, &path));

            tracing::warn!(
                event,
                type_name = %type_name::<T>(),
                path = %path,
                value = %value_display,
                error = %path_err.inner(),
                "event payload decoding failed"
            );
        }
    })?;

    for path in unknown_paths {
        let value_display = format_value(lookup_value(&original, &path));

        tracing::warn!(
            event,
            type_name = %type_name::<T>(),
            field = %path,
            value = %value_display,
            "unknown field in event payload"
        );
    }

    Ok(result)
}

/// Pass-through deserialization when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub(crate) fn deserialize_with_warnings<T: DeserializeOwned>(
    _event: &str,
    value: Value,
) -> crate::Result<T> {
    Ok(serde_json::from_value(value)?)
}

/// Look up a value by a `serde_ignored` / `serde_path_to_error` path such as
/// `conversation.tags[2]` or `customer.?.name`.
#[cfg(feature = "tracing")]
fn lookup_value<'value>(value: &'value Value, path: &str) -> Option<&'value Value> {
    let mut current = value;

    for segment in path.split(['.', '[', ']']) {
        if segment.is_empty() || segment == "?" {
            continue;
        }

        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

#[cfg(feature = "tracing")]
fn format_value(value: Option<&Value>) -> String {
    value.map_or_else(|| "<unable to retrieve>".to_owned(), Value::to_string)
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Payload {
        content: String,
        #[serde(default)]
        company_id: Option<String>,
    }

    #[test]
    fn decodes_known_fields() {
        let payload: Payload = deserialize_with_warnings(
            "message",
            json!({"content": "hi", "company_id": "acme"}),
        )
        .expect("payload should decode");

        assert_eq!(
            payload,
            Payload {
                content: "hi".to_owned(),
                company_id: Some("acme".to_owned())
            }
        );
    }

    #[test]
    fn unknown_fields_do_not_fail() {
        let payload: Payload =
            deserialize_with_warnings("message", json!({"content": "hi", "emoji": true}))
                .expect("payload should decode");

        assert_eq!(payload.company_id, None);
    }

    #[test]
    fn missing_required_field_fails() {
        let result: crate::Result<Payload> =
            deserialize_with_warnings("message", json!({"company_id": "acme"}));

        let error = result.unwrap_err();
        assert_eq!(error.kind(), crate::error::Kind::Internal);
    }

    #[cfg(feature = "tracing")]
    #[test]
    fn lookup_handles_nested_and_indexed_paths() {
        let value = json!({
            "conversation": {"tags": ["vip", "billing", "urgent"]},
            "customer": {"name": "Ada"}
        });

        assert_eq!(
            lookup_value(&value, "conversation.tags[2]"),
            Some(&json!("urgent"))
        );
        assert_eq!(lookup_value(&value, "customer.?.name"), Some(&json!("Ada")));
        assert_eq!(lookup_value(&value, ""), Some(&value));
        assert_eq!(lookup_value(&value, "customer.name.first"), None);
        assert_eq!(format_value(None), "<unable to retrieve>");
    }
}
