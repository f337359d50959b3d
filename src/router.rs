//! Tool-call router (C5): split the namespaced tool name, validate against
//! the cached schema, dispatch to the owning server, and apply the spill.

use crate::llm::{Message, Role, ToolCall};
use crate::mcp::ServerPool;
use crate::spill::{spill, SpillConfig};
use serde_json::Value;

/// Runs one tool call through the router and returns the resulting `tool`
/// message. Always succeeds — every failure mode is encoded as an inline
/// `{"error": ...}` message so the model can see and recover from it.
pub async fn route_tool_call(pool: &ServerPool, call: &ToolCall, spill_config: SpillConfig) -> Message {
    let content = route(pool, call, spill_config).await;
    Message {
        role: Role::Tool,
        content,
        tool_call_id: Some(call.id.clone()),
        tool_calls: None,
    }
}

async fn route(pool: &ServerPool, call: &ToolCall, spill_config: SpillConfig) -> String {
    let Some((server, tool)) = split_namespaced(&call.name) else {
        return error_json("Invalid function name format");
    };

    let Some(client) = pool.get(server) else {
        return error_json(&format!("Unknown server: {}", call.name));
    };

    let args = if call.arguments.is_object() {
        call.arguments.clone()
    } else {
        Value::Object(Default::default())
    };

    let descriptors = client.tools().await;
    if let Some(descriptor) = descriptors.iter().find(|d| d.name == tool) {
        let obj = args.as_object();
        for required in descriptor.required_params() {
            let present = obj.map(|o| o.contains_key(&required)).unwrap_or(false);
            if !present {
                return error_json(&format!("Missing required parameter: {}", required));
            }
        }
    }

    let result = client.call_tool(tool, args).await;
    let spilled = spill(&result, spill_config);
    serde_json::to_string(&spilled).unwrap_or_else(|_| spilled.to_string())
}

/// Splits on the *first* underscore, per the namespacing convention.
fn split_namespaced(name: &str) -> Option<(&str, &str)> {
    let idx = name.find('_')?;
    if idx == 0 || idx == name.len() - 1 {
        return None;
    }
    Some((&name[..idx], &name[idx + 1..]))
}

fn error_json(message: &str) -> String {
    serde_json::json!({"error": message}).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_first_underscore_only() {
        assert_eq!(split_namespaced("srv_echo"), Some(("srv", "echo")));
        assert_eq!(split_namespaced("srv_tool_with_underscores"), Some(("srv", "tool_with_underscores")));
    }

    #[test]
    fn rejects_name_without_underscore() {
        assert_eq!(split_namespaced("noseparator"), None);
    }

    #[test]
    fn router_is_injective_for_unambiguous_names() {
        for (server, tool) in [("alpha", "beta"), ("srv", "echo"), ("a", "b")] {
            let namespaced = format!("{}_{}", server, tool);
            assert_eq!(split_namespaced(&namespaced), Some((server, tool)));
        }
    }
}
