//! OpenAI Responses API wire shape ↔ hub.
//!
//! The Responses API keeps `instructions` apart from the `input` array (like
//! Claude's separate `system`), and represents tool calls/results as
//! standalone `function_call`/`function_call_output` items rather than
//! inline message fields.

use serde_json::{Value, json};

use super::TranslateError;
use crate::formats::WireFormat;
use crate::formats::openai::{ChatMessage, ChatRequest, ContentPart, MessageContent, Role, ToolCall, ToolChoice, ToolDefinition};

pub fn to_hub(body: &Value) -> Result<ChatRequest, TranslateError> {
    let model = body.get("model").and_then(Value::as_str).unwrap_or_default().to_string();
    let input = body
        .get("input")
        .ok_or_else(|| TranslateError::Malformed(WireFormat::OpenaiResponses, "missing `input`".into()))?;

    let mut messages = Vec::new();
    if let Some(instructions) = body.get("instructions").and_then(Value::as_str) {
        messages.push(ChatMessage::system(instructions));
    }

    match input {
        Value::String(s) => messages.push(ChatMessage::user(s.clone())),
        Value::Array(items) => {
            for item in items {
                if let Some(msg) = parse_item(item)? {
                    messages.push(msg);
                }
            }
        }
        _ => return Err(TranslateError::Malformed(WireFormat::OpenaiResponses, "`input` must be a string or array".into())),
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
        max_tokens: body.get("max_output_tokens").and_then(Value::as_u64).map(|v| v as u32),
        top_p: body.get("top_p").and_then(Value::as_f64),
    })
}

fn parse_item(item: &Value) -> Result<Option<ChatMessage>, TranslateError> {
    if let Some(role) = item.get("role").and_then(Value::as_str) {
        let role = match role {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            "system" | "developer" => Role::System,
            other => {
                return Err(TranslateError::Malformed(
                    WireFormat::OpenaiResponses,
                    format!("unknown role {other}"),
                ));
            }
        };
        let content = match item.get("content") {
            Some(Value::String(s)) => MessageContent::Text(s.clone()),
            Some(Value::Array(parts)) => {
                let texts: Vec<ContentPart> = parts
                    .iter()
                    .map(|p| match p.get("text").and_then(Value::as_str) {
                        Some(t) => ContentPart::Text(t.to_string()),
                        None => ContentPart::UnsupportedPlaceholder("[content omitted]".into()),
                    })
                    .collect();
                if texts.len() == 1 {
                    MessageContent::Text(texts[0].text().unwrap_or_default().to_string())
                } else {
                    MessageContent::Parts(texts)
                }
            }
            _ => MessageContent::Empty,
        };
        return Ok(Some(ChatMessage {
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            provider_meta: None,
        }));
    }

    match item.get("type").and_then(Value::as_str) {
        Some("function_call") => {
            let id = item.get("call_id").and_then(Value::as_str).unwrap_or_default().to_string();
            let name = item.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
            let arguments = item.get("arguments").and_then(Value::as_str).unwrap_or("{}").to_string();
            Ok(Some(ChatMessage {
                role: Role::Assistant,
                content: MessageContent::Empty,
                tool_calls: vec![ToolCall { id, name, arguments }],
                tool_call_id: None,
                name: None,
                provider_meta: None,
            }))
        }
        Some("function_call_output") => {
            let call_id = item.get("call_id").and_then(Value::as_str).unwrap_or_default().to_string();
            let output = item.get("output").and_then(Value::as_str).unwrap_or_default().to_string();
            Ok(Some(ChatMessage {
                role: Role::Tool,
                content: MessageContent::Text(output),
                tool_calls: Vec::new(),
                tool_call_id: Some(call_id),
                name: None,
                provider_meta: None,
            }))
        }
        _ => Ok(None),
    }
}

fn parse_tool_def(raw: &Value) -> Option<ToolDefinition> {
    let name = raw.get("name").and_then(Value::as_str)?.to_string();
    let description = raw.get("description").and_then(Value::as_str).map(str::to_string);
    let parameters = raw.get("parameters").cloned().unwrap_or_else(|| json!({"type": "object", "properties": {}}));
    Some(ToolDefinition { name, description, parameters })
}

pub fn from_hub(request: &ChatRequest) -> Value {
    let instructions: String = request
        .messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.concatenated_text())
        .collect::<Vec<_>>()
        .join("\n");

    let mut items: Vec<Value> = Vec::new();
    for message in request.messages.iter().filter(|m| m.role != Role::System) {
        items.extend(render_item(message));
    }

    let mut out = json!({
        "model": request.model,
        "input": items,
        "stream": request.stream,
    });

    if !instructions.is_empty() {
        out["instructions"] = json!(instructions);
    }
    if !request.tools.is_empty() {
        out["tools"] = Value::Array(request.tools.iter().map(render_tool_def).collect());
    }
    if let Some(t) = request.temperature {
        out["temperature"] = json!(t);
    }
    if let Some(m) = request.max_tokens {
        out["max_output_tokens"] = json!(m);
    }
    if let Some(p) = request.top_p {
        out["top_p"] = json!(p);
    }
    out
}

fn render_item(message: &ChatMessage) -> Vec<Value> {
    if message.role == Role::Tool {
        return vec![json!({
            "type": "function_call_output",
            "call_id": message.tool_call_id.clone().unwrap_or_default(),
            "output": message.content.concatenated_text(),
        })];
    }

    let mut items = Vec::new();
    let role = match message.role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System | Role::Tool => unreachable!("filtered above"),
    };
    let text = message.content.concatenated_text();
    if !text.is_empty() || message.tool_calls.is_empty() {
        items.push(json!({"role": role, "content": [{"type": "input_text", "text": text}]}));
    }
    for call in &message.tool_calls {
        items.push(json!({
            "type": "function_call",
            "call_id": call.id,
            "name": call.name,
            "arguments": call.arguments,
        }));
    }
    items
}

fn render_tool_def(def: &ToolDefinition) -> Value {
    json!({"type": "function", "name": def.name, "description": def.description, "parameters": def.parameters})
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_input_becomes_user_message() {
        let body = json!({"model": "gpt-4o", "input": "hi"});
        let hub = to_hub(&body).unwrap();
        assert_eq!(hub.messages[0].role, Role::User);
        assert_eq!(hub.messages[0].content.concatenated_text(), "hi");
    }

    #[test]
    fn function_call_and_output_pair() {
        let body = json!({
            "model": "gpt-4o",
            "input": [
                {"type": "function_call", "call_id": "c1", "name": "search", "arguments": "{}"},
                {"type": "function_call_output", "call_id": "c1", "output": "result"}
            ]
        });
        let hub = to_hub(&body).unwrap();
        assert_eq!(hub.tool_call_pairing().get("c1"), Some(&"search".to_string()));
    }
}
