//! Google Gemini wire shape ↔ hub.
//!
//! Gemini names roles `user`/`model`, carries `systemInstruction` apart from
//! `contents`, represents tool calls as unordered `functionCall`/
//! `functionResponse` parts with no call id (paired by function name
//! instead), and encodes function arguments as JSON objects rather than
//! strings. `thought` parts (Gemini's reasoning-token marker) have no hub
//! representation and round-trip via `ChatMessage::provider_meta` (spec §9).

use serde_json::{Value, json};

use super::TranslateError;
use crate::formats::WireFormat;
use crate::formats::openai::{ChatMessage, ChatRequest, ContentPart, MessageContent, Role, ToolCall, ToolChoice, ToolDefinition};

pub fn to_hub(body: &Value) -> Result<ChatRequest, TranslateError> {
    let model = body.get("model").and_then(Value::as_str).unwrap_or_default().to_string();
    let contents = find_contents(body)
        .ok_or_else(|| TranslateError::Malformed(WireFormat::Gemini, "missing `contents` array".into()))?;

    let mut messages = Vec::new();
    if let Some(text) = system_instruction_text(body) {
        messages.push(ChatMessage::system(text));
    }
    for raw in contents {
        messages.push(parse_content_entry(raw)?);
    }

    let tools = body
        .get("tools")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().flat_map(parse_tool_group).collect())
        .unwrap_or_default();

    let generation_config = body.get("generationConfig");

    Ok(ChatRequest {
        model,
        messages,
        tools,
        tool_choice: ToolChoice::default(),
        stream: body.get("stream").and_then(Value::as_bool).unwrap_or(false),
        temperature: generation_config.and_then(|c| c.get("temperature")).and_then(Value::as_f64),
        max_tokens: generation_config
            .and_then(|c| c.get("maxOutputTokens"))
            .and_then(Value::as_u64)
            .map(|v| v as u32),
        top_p: generation_config.and_then(|c| c.get("topP")).and_then(Value::as_f64),
    })
}

fn find_contents(body: &Value) -> Option<&Vec<Value>> {
    if let Some(arr) = body.get("contents").and_then(Value::as_array) {
        return Some(arr);
    }
    body.as_object()?.values().find_map(|v| v.get("contents").and_then(Value::as_array))
}

fn system_instruction_text(body: &Value) -> Option<String> {
    let instr = body.get("systemInstruction").or_else(|| body.get("system_instruction"))?;
    let parts = instr.get("parts").and_then(Value::as_array)?;
    let text: String = parts.iter().filter_map(|p| p.get("text").and_then(Value::as_str)).collect();
    (!text.is_empty()).then_some(text)
}

fn parse_content_entry(raw: &Value) -> Result<ChatMessage, TranslateError> {
    let role = match raw.get("role").and_then(Value::as_str) {
        Some("model") => Role::Assistant,
        Some("function") => Role::Tool,
        _ => Role::User,
    };

    let parts = raw.get("parts").and_then(Value::as_array);
    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();
    let mut tool_result: Option<(String, String)> = None;
    let mut saw_thought = false;

    for part in parts.into_iter().flatten() {
        if part.get("thought").and_then(Value::as_bool) == Some(true) {
            saw_thought = true;
        }
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            text_parts.push(ContentPart::Text(text.to_string()));
        } else if let Some(call) = part.get("functionCall") {
            let name = call.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
            let arguments = call.get("args").cloned().unwrap_or_else(|| json!({})).to_string();
            // Gemini has no call id; the function name doubles as the pairing key.
            tool_calls.push(ToolCall { id: name.clone(), name, arguments });
        } else if let Some(resp) = part.get("functionResponse") {
            let name = resp.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
            let content = resp.get("response").cloned().unwrap_or(Value::Null).to_string();
            tool_result = Some((name, content));
        }
    }

    if let Some((name, content)) = tool_result {
        return Ok(ChatMessage {
            role: Role::Tool,
            content: MessageContent::Text(content),
            tool_calls: Vec::new(),
            tool_call_id: Some(name.clone()),
            name: Some(name),
            provider_meta: None,
        });
    }

    Ok(ChatMessage {
        role,
        content: if text_parts.is_empty() {
            MessageContent::Empty
        } else if text_parts.len() == 1 {
            MessageContent::Text(text_parts[0].text().unwrap_or_default().to_string())
        } else {
            MessageContent::Parts(text_parts)
        },
        tool_calls,
        tool_call_id: None,
        name: None,
        provider_meta: saw_thought.then(|| json!({"thought": true})),
    })
}

fn parse_tool_group(raw: &Value) -> Vec<ToolDefinition> {
    raw.get("functionDeclarations")
        .and_then(Value::as_array)
        .map(|decls| {
            decls
                .iter()
                .filter_map(|d| {
                    let name = d.get("name").and_then(Value::as_str)?.to_string();
                    let description = d.get("description").and_then(Value::as_str).map(str::to_string);
                    let parameters = d.get("parameters").cloned().unwrap_or_else(|| json!({"type": "object", "properties": {}}));
                    Some(ToolDefinition { name, description, parameters })
                })
                .collect()
        })
        .unwrap_or_default()
}

pub fn from_hub(request: &ChatRequest) -> Value {
    let system_text: String = request
        .messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.concatenated_text())
        .collect::<Vec<_>>()
        .join("\n");

    let contents: Vec<Value> = request
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        .flat_map(render_entry)
        .collect();

    let mut out = json!({"contents": contents});

    if !system_text.is_empty() {
        out["systemInstruction"] = json!({"parts": [{"text": system_text}]});
    }
    if !request.tools.is_empty() {
        out["tools"] = json!([{"functionDeclarations": request.tools.iter().map(render_tool_def).collect::<Vec<_>>()}]);
    }

    let mut generation_config = serde_json::Map::new();
    if let Some(t) = request.temperature {
        generation_config.insert("temperature".to_string(), json!(t));
    }
    if let Some(m) = request.max_tokens {
        generation_config.insert("maxOutputTokens".to_string(), json!(m));
    }
    if let Some(p) = request.top_p {
        generation_config.insert("topP".to_string(), json!(p));
    }
    if !generation_config.is_empty() {
        out["generationConfig"] = Value::Object(generation_config);
    }

    out
}

fn render_entry(message: &ChatMessage) -> Vec<Value> {
    if message.role == Role::Tool {
        let name = message.name.clone().unwrap_or_else(|| message.tool_call_id.clone().unwrap_or_default());
        let response: Value = serde_json::from_str(&message.content.concatenated_text()).unwrap_or(Value::Null);
        return vec![json!({
            "role": "function",
            "parts": [{"functionResponse": {"name": name, "response": response}}]
        })];
    }

    let role = match message.role {
        Role::User => "user",
        Role::Assistant => "model",
        Role::System | Role::Tool => unreachable!("filtered above"),
    };

    let thought = message.provider_meta.as_ref().and_then(|m| m.get("thought")).and_then(Value::as_bool).unwrap_or(false);

    let mut parts: Vec<Value> = Vec::new();
    let text = message.content.concatenated_text();
    if !text.is_empty() {
        let mut part = json!({"text": text});
        if thought {
            part["thought"] = json!(true);
        }
        parts.push(part);
    }
    for call in &message.tool_calls {
        let args: Value = serde_json::from_str(&call.arguments).unwrap_or(json!({}));
        parts.push(json!({"functionCall": {"name": call.name, "args": args}}));
    }

    vec![json!({"role": role, "parts": parts})]
}

fn render_tool_def(def: &ToolDefinition) -> Value {
    json!({"name": def.name, "description": def.description, "parameters": def.parameters})
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_user_turn() {
        let body = json!({"contents": [{"role": "user", "parts": [{"text": "hi"}]}]});
        let hub = to_hub(&body).unwrap();
        assert_eq!(hub.messages[0].role, Role::User);
        assert_eq!(hub.messages[0].content.concatenated_text(), "hi");
    }

    #[test]
    fn function_call_and_response_pair_by_name() {
        let body = json!({
            "contents": [
                {"role": "model", "parts": [{"functionCall": {"name": "search", "args": {"q": "x"}}}]},
                {"role": "function", "parts": [{"functionResponse": {"name": "search", "response": {"ok": true}}}]}
            ]
        });
        let hub = to_hub(&body).unwrap();
        assert_eq!(hub.tool_call_pairing().get("search"), Some(&"search".to_string()));
    }

    #[test]
    fn thought_part_round_trips_via_provider_meta() {
        let body = json!({"contents": [{"role": "model", "parts": [{"text": "reasoning...", "thought": true}]}]});
        let hub = to_hub(&body).unwrap();
        assert_eq!(hub.messages[0].provider_meta, Some(json!({"thought": true})));
        let back = from_hub(&hub);
        assert_eq!(back["contents"][0]["parts"][0]["thought"], true);
    }
}
