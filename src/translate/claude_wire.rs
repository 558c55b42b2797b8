//! Anthropic Messages wire shape ↔ hub.
//!
//! Claude keeps `system` outside the message list and represents tool use
//! as content blocks (`tool_use`, `tool_result`) instead of OpenAI's
//! separate `tool_calls`/`tool` message fields; both directions normalize
//! that difference. Cache-control breakpoints have no hub representation
//! (spec §9) and are round-tripped via `ChatMessage::provider_meta` instead.

use serde_json::{Value, json};

use super::TranslateError;
use crate::formats::WireFormat;
use crate::formats::openai::{ChatMessage, ChatRequest, ContentPart, MessageContent, Role, ToolCall, ToolChoice, ToolDefinition};

const DEFAULT_MAX_TOKENS: u32 = 4096;

pub fn to_hub(body: &Value) -> Result<ChatRequest, TranslateError> {
    let model = body.get("model").and_then(Value::as_str).unwrap_or_default().to_string();
    let raw_messages = body
        .get("messages")
        .and_then(Value::as_array)
        .ok_or_else(|| TranslateError::Malformed(WireFormat::Claude, "missing `messages` array".into()))?;

    let mut messages = Vec::new();
    if let Some(system) = body.get("system") {
        if let Some(text) = system_as_text(system) {
            messages.push(ChatMessage::system(text));
        }
    }

    for raw in raw_messages {
        messages.extend(parse_message(raw)?);
    }

    let tools = body
        .get("tools")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(parse_tool_def).collect())
        .unwrap_or_default();

    Ok(ChatRequest {
        model,
        messages,
        tools,
        tool_choice: ToolChoice(body.get("tool_choice").cloned()),
        stream: body.get("stream").and_then(Value::as_bool).unwrap_or(false),
        temperature: body.get("temperature").and_then(Value::as_f64),
        max_tokens: body.get("max_tokens").and_then(Value::as_u64).map(|v| v as u32),
        top_p: body.get("top_p").and_then(Value::as_f64),
    })
}

fn system_as_text(system: &Value) -> Option<String> {
    match system {
        Value::String(s) => Some(s.clone()),
        Value::Array(blocks) => {
            let text: String = blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("");
            (!text.is_empty()).then_some(text)
        }
        _ => None,
    }
}

fn parse_message(raw: &Value) -> Result<Vec<ChatMessage>, TranslateError> {
    let role = match raw.get("role").and_then(Value::as_str) {
        Some("user") => Role::User,
        Some("assistant") => Role::Assistant,
        other => {
            return Err(TranslateError::Malformed(
                WireFormat::Claude,
                format!("unknown role {other:?}"),
            ));
        }
    };

    let mut out = Vec::new();
    let mut text_parts: Vec<ContentPart> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    let mut provider_meta: Option<Value> = None;

    match raw.get("content") {
        Some(Value::String(s)) => text_parts.push(ContentPart::Text(s.clone())),
        Some(Value::Array(blocks)) => {
            for block in blocks {
                match block.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        text_parts.push(ContentPart::Text(block.get("text").and_then(Value::as_str).unwrap_or_default().to_string()));
                        if let Some(cc) = block.get("cache_control") {
                            provider_meta = Some(json!({"cache_control": cc}));
                        }
                    }
                    Some("tool_use") => {
                        let id = block.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
                        let name = block.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
                        let arguments = block.get("input").map(|v| v.to_string()).unwrap_or_else(|| "{}".to_string());
                        tool_calls.push(ToolCall { id, name, arguments });
                    }
                    Some("tool_result") => {
                        // Flush any accumulated assistant/user text first so ordering is preserved.
                        if !text_parts.is_empty() || !tool_calls.is_empty() {
                            out.push(ChatMessage {
                                role,
                                content: parts_to_content(std::mem::take(&mut text_parts)),
                                tool_calls: std::mem::take(&mut tool_calls),
                                tool_call_id: None,
                                name: None,
                                provider_meta: provider_meta.take(),
                            });
                        }
                        let tool_use_id = block.get("tool_use_id").and_then(Value::as_str).unwrap_or_default().to_string();
                        let content = tool_result_text(block.get("content"));
                        out.push(ChatMessage {
                            role: Role::Tool,
                            content: MessageContent::Text(content),
                            tool_calls: Vec::new(),
                            tool_call_id: Some(tool_use_id),
                            name: None,
                            provider_meta: None,
                        });
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }

    if !text_parts.is_empty() || !tool_calls.is_empty() || out.is_empty() {
        out.push(ChatMessage {
            role,
            content: parts_to_content(text_parts),
            tool_calls,
            tool_call_id: None,
            name: None,
            provider_meta,
        });
    }

    Ok(out)
}

fn parts_to_content(parts: Vec<ContentPart>) -> MessageContent {
    if parts.is_empty() {
        MessageContent::Empty
    } else if parts.len() == 1 {
        match &parts[0] {
            ContentPart::Text(s) => MessageContent::Text(s.clone()),
            _ => MessageContent::Parts(parts),
        }
    } else {
        MessageContent::Parts(parts)
    }
}

fn tool_result_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn parse_tool_def(raw: &Value) -> Option<ToolDefinition> {
    let name = raw.get("name").and_then(Value::as_str)?.to_string();
    let description = raw.get("description").and_then(Value::as_str).map(str::to_string);
    let parameters = raw.get("input_schema").cloned().unwrap_or_else(|| json!({"type": "object", "properties": {}}));
    Some(ToolDefinition { name, description, parameters })
}

pub fn from_hub(request: &ChatRequest) -> Value {
    let system_text: String = request
        .messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.concatenated_text())
        .collect::<Vec<_>>()
        .join("\n");

    let messages: Vec<Value> = request
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(render_message)
        .collect();

    let mut out = json!({
        "model": request.model,
        "messages": messages,
        "stream": request.stream,
        "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
    });

    if !system_text.is_empty() {
        out["system"] = json!(system_text);
    }
    if !request.tools.is_empty() {
        out["tools"] = Value::Array(request.tools.iter().map(render_tool_def).collect());
    }
    if let Some(choice) = &request.tool_choice.0 {
        out["tool_choice"] = choice.clone();
    }
    if let Some(t) = request.temperature {
        out["temperature"] = json!(t);
    }
    if let Some(p) = request.top_p {
        out["top_p"] = json!(p);
    }
    out
}

fn render_message(message: &ChatMessage) -> Value {
    if message.role == Role::Tool {
        return json!({
            "role": "user",
            "content": [{
                "type": "tool_result",
                "tool_use_id": message.tool_call_id.clone().unwrap_or_default(),
                "content": message.content.concatenated_text(),
            }]
        });
    }

    let role = match message.role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System | Role::Tool => unreachable!("filtered above"),
    };

    let mut blocks: Vec<Value> = Vec::new();
    let text = message.content.concatenated_text();
    if !text.is_empty() {
        let mut block = json!({"type": "text", "text": text});
        if let Some(meta) = &message.provider_meta {
            if let Some(cc) = meta.get("cache_control") {
                block["cache_control"] = cc.clone();
            }
        }
        blocks.push(block);
    }
    for call in &message.tool_calls {
        let input: Value = serde_json::from_str(&call.arguments).unwrap_or(Value::Null);
        blocks.push(json!({"type": "tool_use", "id": call.id, "name": call.name, "input": input}));
    }

    json!({"role": role, "content": blocks})
}

fn render_tool_def(def: &ToolDefinition) -> Value {
    json!({"name": def.name, "description": def.description, "input_schema": def.parameters})
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn system_string_becomes_system_message() {
        let body = json!({"model": "claude-3", "system": "be nice", "messages": [{"role": "user", "content": "hi"}]});
        let hub = to_hub(&body).unwrap();
        assert_eq!(hub.messages[0].role, Role::System);
        assert_eq!(hub.messages[0].content.concatenated_text(), "be nice");
    }

    #[test]
    fn tool_use_and_result_round_trip() {
        let body = json!({
            "model": "claude-3",
            "messages": [
                {"role": "assistant", "content": [{"type": "tool_use", "id": "t1", "name": "search", "input": {"q": "x"}}]},
                {"role": "user", "content": [{"type": "tool_result", "tool_use_id": "t1", "content": "result"}]}
            ]
        });
        let hub = to_hub(&body).unwrap();
        assert_eq!(hub.tool_call_pairing().get("t1"), Some(&"search".to_string()));

        let back = from_hub(&hub);
        assert_eq!(back["messages"][0]["content"][0]["type"], "tool_use");
        assert_eq!(back["messages"][1]["content"][0]["type"], "tool_result");
    }

    #[test]
    fn missing_max_tokens_defaults_on_render() {
        let hub = ChatRequest {
            model: "claude-3".into(),
            messages: vec![ChatMessage::user("hi")],
            tools: vec![],
            tool_choice: ToolChoice::default(),
            stream: false,
            temperature: None,
            max_tokens: None,
            top_p: None,
        };
        let body = from_hub(&hub);
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
    }
}
