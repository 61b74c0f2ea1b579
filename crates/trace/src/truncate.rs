//! Size-bounding helpers applied when a trace snapshot is built.

use crate::record::TracedMessage;

/// Truncate on a char boundary, appending an ellipsis when cut.
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}

/// Keep the first `head` and last `recent` messages, dropping the middle.
/// Returns the trimmed list and the number of messages dropped.
pub fn trim_messages(
    messages: &[TracedMessage],
    head: usize,
    recent: usize,
) -> (Vec<TracedMessage>, u32) {
    if messages.len() <= head + recent {
        return (messages.to_vec(), 0);
    }
    let dropped = messages.len() - head - recent;
    let mut out = Vec::with_capacity(head + recent);
    out.extend_from_slice(&messages[..head]);
    out.extend_from_slice(&messages[messages.len() - recent..]);
    (out, dropped as u32)
}

/// Recursively bound a JSON value: long strings are cut, long arrays
/// keep their first `max_array_items` elements.
pub fn truncate_value(
    value: &serde_json::Value,
    max_field_chars: usize,
    max_array_items: usize,
) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => {
            serde_json::Value::String(truncate_text(s, max_field_chars))
        }
        serde_json::Value::Array(items) => serde_json::Value::Array(
            items
                .iter()
                .take(max_array_items)
                .map(|v| truncate_value(v, max_field_chars, max_array_items))
                .collect(),
        ),
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), truncate_value(v, max_field_chars, max_array_items)))
                .collect(),
        ),
        other => other.clone(),
    }
}
