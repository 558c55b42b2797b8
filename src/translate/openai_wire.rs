//! OpenAI Chat Completions wire shape ↔ hub.
//!
//! Since OPENAI is the hub, this is close to a typed parse/render pair
//! rather than a translation — but it still owns the string/array content
//! normalization every other format's `to_hub`/`from_hub` builds on.

use serde_json::{Value, json};

use super::TranslateError;
use crate::formats::WireFormat;
use crate::formats::openai::{ChatMessage, ChatRequest, ContentPart, MessageContent, Role, ToolCall, ToolChoice, ToolDefinition};

pub fn to_hub(body: &Value) -> Result<ChatRequest, TranslateError> {
    let model = body.get("model").and_then(Value::as_str).unwrap_or_default().to_string();
    let raw_messages = body
        .get("messages")
        .and_then(Value::as_array)
        .ok_or_else(|| TranslateError::Malformed(WireFormat::Openai, "missing `messages` array".into()))?;

    let messages = raw_messages.iter().map(parse_message).collect::<Result<Vec<_>, _>>()?;

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
        max_tokens: body
            .get("max_tokens")
            .or_else(|| body.get("max_completion_tokens"))
            .and_then(Value::as_u64)
            .map(|v| v as u32),
        top_p: body.get("top_p").and_then(Value::as_f64),
    })
}

fn parse_message(raw: &Value) -> Result<ChatMessage, TranslateError> {
    let role = match raw.get("role").and_then(Value::as_str) {
        Some("system") | Some("developer") => Role::System,
        Some("user") => Role::User,
        Some("assistant") => Role::Assistant,
        Some("tool") => Role::Tool,
        other => {
            return Err(TranslateError::Malformed(
                WireFormat::Openai,
                format!("unknown role {other:?}"),
            ));
        }
    };

    let content = parse_content(raw.get("content"));

    let tool_calls = raw
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(parse_tool_call).collect())
        .unwrap_or_default();

    Ok(ChatMessage {
        role,
        content,
        tool_calls,
        tool_call_id: raw.get("tool_call_id").and_then(Value::as_str).map(str::to_string),
        name: raw.get("name").and_then(Value::as_str).map(str::to_string),
        provider_meta: None,
    })
}

fn parse_content(raw: Option<&Value>) -> MessageContent {
    match raw {
        None | Some(Value::Null) => MessageContent::Empty,
        Some(Value::String(s)) => MessageContent::Text(s.clone()),
        Some(Value::Array(parts)) => MessageContent::Parts(parts.iter().map(parse_content_part).collect()),
        Some(other) => MessageContent::Text(other.to_string()),
    }
}

fn parse_content_part(part: &Value) -> ContentPart {
    match part.get("type").and_then(Value::as_str) {
        Some("text") => ContentPart::Text(part.get("text").and_then(Value::as_str).unwrap_or_default().to_string()),
        Some(other) => ContentPart::UnsupportedPlaceholder(format!("[{other} content omitted]")),
        None => ContentPart::Text(String::new()),
    }
}

fn parse_tool_call(raw: &Value) -> Option<ToolCall> {
    let id = raw.get("id").and_then(Value::as_str)?.to_string();
    let function = raw.get("function")?;
    let name = function.get("name").and_then(Value::as_str)?.to_string();
    let arguments = function.get("arguments").and_then(Value::as_str).unwrap_or("{}").to_string();
    Some(ToolCall { id, name, arguments })
}

fn parse_tool_def(raw: &Value) -> Option<ToolDefinition> {
    let function = raw.get("function").unwrap_or(raw);
    let name = function.get("name").and_then(Value::as_str)?.to_string();
    let description = function.get("description").and_then(Value::as_str).map(str::to_string);
    let parameters = function.get("parameters").cloned().unwrap_or_else(|| json!({"type": "object", "properties": {}}));
    Some(ToolDefinition { name, description, parameters })
}

pub fn from_hub(request: &ChatRequest) -> Value {
    let messages: Vec<Value> = request.messages.iter().map(render_message).collect();
    let mut out = json!({
        "model": request.model,
        "messages": messages,
        "stream": request.stream,
    });

    if !request.tools.is_empty() {
        out["tools"] = Value::Array(request.tools.iter().map(render_tool_def).collect());
    }
    if let Some(choice) = &request.tool_choice.0 {
        out["tool_choice"] = choice.clone();
    }
    if let Some(t) = request.temperature {
        out["temperature"] = json!(t);
    }
    if let Some(m) = request.max_tokens {
        out["max_tokens"] = json!(m);
    }
    if let Some(p) = request.top_p {
        out["top_p"] = json!(p);
    }
    out
}

fn render_message(message: &ChatMessage) -> Value {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };
    let mut out = json!({"role": role, "content": render_content(&message.content)});
    if !message.tool_calls.is_empty() {
        out["tool_calls"] = Value::Array(message.tool_calls.iter().map(render_tool_call).collect());
    }
    if let Some(id) = &message.tool_call_id {
        out["tool_call_id"] = json!(id);
    }
    if let Some(name) = &message.name {
        out["name"] = json!(name);
    }
    out
}

fn render_content(content: &MessageContent) -> Value {
    match content {
        MessageContent::Text(s) => json!(s),
        MessageContent::Empty => Value::Null,
        MessageContent::Parts(parts) => Value::Array(
            parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text(s) => json!({"type": "text", "text": s}),
                    ContentPart::UnsupportedPlaceholder(s) => json!({"type": "text", "text": s}),
                })
                .collect(),
        ),
    }
}

fn render_tool_call(call: &ToolCall) -> Value {
    json!({
        "id": call.id,
        "type": "function",
        "function": {"name": call.name, "arguments": call.arguments},
    })
}

fn render_tool_def(def: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": def.name,
            "description": def.description,
            "parameters": def.parameters,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_minimal_request() {
        let body = json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "hi"}]});
        let hub = to_hub(&body).unwrap();
        assert_eq!(hub.model, "gpt-4o");
        assert_eq!(hub.messages.len(), 1);
        assert_eq!(hub.messages[0].content.concatenated_text(), "hi");
    }

    #[test]
    fn missing_messages_is_malformed() {
        let body = json!({"model": "gpt-4o"});
        assert!(to_hub(&body).is_err());
    }

    #[test]
    fn round_trips_tool_calls() {
        let body = json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "assistant", "content": null, "tool_calls": [
                    {"id": "call_1", "type": "function", "function": {"name": "search", "arguments": "{\"q\":\"x\"}"}}
                ]},
                {"role": "tool", "tool_call_id": "call_1", "content": "result"}
            ]
        });
        let hub = to_hub(&body).unwrap();
        assert_eq!(hub.tool_call_pairing().get("call_1"), Some(&"search".to_string()));
        let back = from_hub(&hub);
        assert_eq!(back["messages"][0]["tool_calls"][0]["function"]["name"], "search");
    }
}
