//! Tool-name map (spec §3 "Tool-name map", §4.8 step 4): some upstream
//! dialects — notably Anthropic's OAuth surface — reject tool names outside
//! a restricted identifier pattern, so a translated body destined for one
//! of those dialects gets its tool names sanitized here, with the
//! original-name mapping threaded through the request as ephemeral,
//! per-request state (spec §9 "model as a request-scoped record") rather
//! than stashed back into the JSON body under a reserved key.

use std::collections::HashMap;

use serde_json::Value;

use crate::formats::WireFormat;

/// `true` for a wire format + auth combination known to reject free-form
/// tool names (spec §4.2's parenthetical: "e.g., Anthropic OAuth").
pub fn requires_restricted_names(format: WireFormat, is_oauth: bool) -> bool {
    matches!(format, WireFormat::Claude) && is_oauth
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .take(64)
        .collect();
    if cleaned.is_empty() { "tool".to_string() } else { cleaned }
}

/// Rewrites every tool name in a Claude-shaped request body (`tools[].name`,
/// `content[].type == "tool_use".name`) to a restricted-identifier-safe
/// form, returning the original-name lookup keyed by the sanitized name.
/// Names that already satisfy the restriction are left untouched and never
/// appear in the returned map.
pub fn sanitize_claude_tool_names(body: &mut Value) -> HashMap<String, String> {
    let mut renamed = HashMap::new();
    let mut seen = std::collections::HashSet::new();

    if let Some(tools) = body.get_mut("tools").and_then(Value::as_array_mut) {
        for tool in tools {
            rename_in_place(tool, "name", &mut renamed, &mut seen);
        }
    }
    if let Some(messages) = body.get_mut("messages").and_then(Value::as_array_mut) {
        for message in messages {
            let Some(blocks) = message.get_mut("content").and_then(Value::as_array_mut) else {
                continue;
            };
            for block in blocks {
                if block.get("type").and_then(Value::as_str) == Some("tool_use") {
                    rename_in_place(block, "name", &mut renamed, &mut seen);
                }
            }
        }
    }
    renamed
}

fn rename_in_place(value: &mut Value, field: &str, renamed: &mut HashMap<String, String>, seen: &mut std::collections::HashSet<String>) {
    let Some(original) = value.get(field).and_then(Value::as_str).map(str::to_string) else {
        return;
    };
    let sanitized = sanitize(&original);
    if sanitized == original {
        seen.insert(sanitized);
        return;
    }
    let mut candidate = sanitized.clone();
    let mut suffix = 1;
    while seen.contains(&candidate) {
        candidate = format!("{sanitized}_{suffix}");
        suffix += 1;
    }
    seen.insert(candidate.clone());
    renamed.insert(candidate.clone(), original);
    if let Some(obj) = value.as_object_mut() {
        obj.insert(field.to_string(), Value::String(candidate));
    }
}

/// Restores original tool names in a response delta's tool calls, using
/// the map built by [`sanitize_claude_tool_names`] for this request. A
/// name absent from the map (never renamed) passes through unchanged.
pub fn restore_tool_names(delta: &mut crate::formats::openai::StreamDelta, map: &HashMap<String, String>) {
    if map.is_empty() {
        return;
    }
    for call in &mut delta.tool_calls {
        if let Some(name) = &call.name {
            if let Some(original) = map.get(name) {
                call.name = Some(original.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sanitizes_disallowed_characters_and_records_mapping() {
        let mut body = json!({
            "tools": [{"name": "web.search tool!", "description": "d", "input_schema": {}}],
            "messages": [],
        });
        let map = sanitize_claude_tool_names(&mut body);
        let sanitized_name = body["tools"][0]["name"].as_str().unwrap().to_string();
        assert_ne!(sanitized_name, "web.search tool!");
        assert_eq!(map.get(&sanitized_name).unwrap(), "web.search tool!");
    }

    #[test]
    fn already_valid_names_are_left_untouched() {
        let mut body = json!({"tools": [{"name": "search", "input_schema": {}}], "messages": []});
        let map = sanitize_claude_tool_names(&mut body);
        assert!(map.is_empty());
        assert_eq!(body["tools"][0]["name"], "search");
    }

    #[test]
    fn restore_tool_names_maps_sanitized_back_to_original() {
        let mut delta = crate::formats::openai::StreamDelta {
            tool_calls: vec![crate::formats::openai::StreamToolCallDelta {
                index: 0,
                id: Some("t1".into()),
                name: Some("web_search_tool_".into()),
                arguments_fragment: "{}".into(),
            }],
            ..Default::default()
        };
        let mut map = HashMap::new();
        map.insert("web_search_tool_".to_string(), "web.search tool!".to_string());
        restore_tool_names(&mut delta, &map);
        assert_eq!(delta.tool_calls[0].name.as_deref(), Some("web.search tool!"));
    }
}
