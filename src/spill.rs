//! Long-payload spill (C6): replace oversized string fields in a tool result
//! with a short preview and a reference to a temp file holding the original.

use serde_json::{Map, Value};
use std::io::Write;
use std::path::PathBuf;

pub const DEFAULT_THRESHOLD: usize = 15_000;
const PREVIEW_LEN: usize = 200;

#[derive(Debug, Clone, Copy)]
pub struct SpillConfig {
    pub threshold: usize,
}

impl Default for SpillConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

/// Applies the spill rule to a tool result value. Best-effort: any I/O or
/// serialization failure is logged and the original value is returned
/// unchanged rather than failing the tool call.
pub fn spill(value: &Value, config: SpillConfig) -> Value {
    // MCP content envelope: {"content": [{"text": "<json>"}, ...], ...}. This
    // only rewrites items whose JSON-encoded `text` has an overlength field
    // inside it; anything it leaves alone still falls through to the
    // whole-value check below (an oversized non-JSON `text`, or any other
    // field the envelope path doesn't touch).
    let value = match spill_content_envelope(value, config) {
        Some(rewritten) => rewritten,
        None => value.clone(),
    };

    if !has_overlength_string(&value, config.threshold) {
        return value;
    }

    match write_spill_file(&value) {
        Ok(path) => rewrite_overlength_strings(&value, config.threshold, &path),
        Err(err) => {
            crate::log(format!("[spill] failed to write temp file: {}", err));
            value
        }
    }
}

fn spill_content_envelope(value: &Value, config: SpillConfig) -> Option<Value> {
    let obj = value.as_object()?;
    let content = obj.get("content")?.as_array()?;

    let mut any_spilled = false;
    let mut new_content = Vec::with_capacity(content.len());
    for item in content {
        let Some(item_obj) = item.as_object() else {
            new_content.push(item.clone());
            continue;
        };
        let Some(text) = item_obj.get("text").and_then(|t| t.as_str()) else {
            new_content.push(item.clone());
            continue;
        };
        match serde_json::from_str::<Value>(text) {
            Ok(inner) if has_overlength_string(&inner, config.threshold) => {
                let spilled_inner = spill(&inner, config);
                let mut new_item = item_obj.clone();
                let reserialized = serde_json::to_string(&spilled_inner)
                    .unwrap_or_else(|_| text.to_string());
                new_item.insert("text".to_string(), Value::String(reserialized));
                new_content.push(Value::Object(new_item));
                any_spilled = true;
            }
            _ => new_content.push(item.clone()),
        }
    }

    if !any_spilled {
        return None;
    }

    let mut new_obj = obj.clone();
    new_obj.insert("content".to_string(), Value::Array(new_content));
    Some(Value::Object(new_obj))
}

fn has_overlength_string(value: &Value, threshold: usize) -> bool {
    match value {
        Value::String(s) => s.chars().count() > threshold,
        Value::Array(arr) => arr.iter().any(|v| has_overlength_string(v, threshold)),
        Value::Object(map) => map.values().any(|v| has_overlength_string(v, threshold)),
        _ => false,
    }
}

fn write_spill_file(value: &Value) -> std::io::Result<PathBuf> {
    let file = tempfile::Builder::new()
        .prefix("spill-")
        .suffix(".json")
        .tempfile()?;
    let (mut handle, path) = file.keep().map_err(|e| e.error)?;
    let pretty = serde_json::to_string_pretty(value)
        .unwrap_or_else(|_| value.to_string());
    handle.write_all(pretty.as_bytes())?;
    Ok(path)
}

fn rewrite_overlength_strings(value: &Value, threshold: usize, path: &PathBuf) -> Value {
    match value {
        Value::String(s) if s.chars().count() > threshold => {
            let preview: String = s.chars().take(PREVIEW_LEN).collect();
            Value::String(format!(
                "{}…\n\n<content_written_to_file:{}>",
                preview,
                path.display()
            ))
        }
        Value::Array(arr) => Value::Array(
            arr.iter()
                .map(|v| rewrite_overlength_strings(v, threshold, path))
                .collect(),
        ),
        Value::Object(map) => {
            let mut new_map = Map::new();
            for (k, v) in map {
                new_map.insert(k.clone(), rewrite_overlength_strings(v, threshold, path));
            }
            Value::Object(new_map)
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_op_below_threshold() {
        let value = serde_json::json!({"msg": "short"});
        let result = spill(&value, SpillConfig::default());
        assert_eq!(result, value);
    }

    #[test]
    fn spills_oversized_field() {
        let long = "x".repeat(20_000);
        let value = serde_json::json!({"msg": long});
        let result = spill(&value, SpillConfig::default());
        let rewritten = result["msg"].as_str().unwrap();
        assert!(rewritten.len() < 20_000);
        assert!(rewritten.contains("<content_written_to_file:"));
    }

    #[test]
    fn idempotent_above_threshold() {
        let long = "x".repeat(20_000);
        let value = serde_json::json!({"msg": long});
        let once = spill(&value, SpillConfig::default());
        let twice = spill(&once, SpillConfig::default());
        assert_eq!(once, twice);
    }

    #[test]
    fn unwraps_mcp_content_envelope() {
        let long = "y".repeat(16_000);
        let inner = serde_json::json!({"field": long}).to_string();
        let value = serde_json::json!({"content": [{"text": inner}]});
        let result = spill(&value, SpillConfig::default());
        let text = result["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("<content_written_to_file:"));
    }

    #[test]
    fn envelope_with_sub_threshold_json_text_is_untouched() {
        let inner = serde_json::json!({"a": 1}).to_string();
        let value = serde_json::json!({"content": [{"text": inner}]});
        let result = spill(&value, SpillConfig::default());
        assert_eq!(result, value);
    }

    #[test]
    fn envelope_still_spills_a_long_non_json_text_item() {
        let long_text = "z".repeat(20_000);
        let value = serde_json::json!({
            "content": [
                {"text": serde_json::json!({"a": 1}).to_string()},
                {"text": long_text},
            ]
        });
        let result = spill(&value, SpillConfig::default());
        assert_eq!(result["content"][0]["text"], serde_json::json!({"a": 1}).to_string());
        let second = result["content"][1]["text"].as_str().unwrap();
        assert!(second.len() < 20_000);
        assert!(second.contains("<content_written_to_file:"));
    }
}
