//! Non-streaming response translation (spec §4.8 step 9: "extract usage ...
//! return the JSON body"). A parallel, much smaller cousin of
//! [`super::stream_chunks`]: instead of one delta per SSE frame, there is
//! exactly one complete message to parse and render, but the same
//! per-format field names apply (Claude's `content` blocks, Gemini's
//! `candidates[0].content.parts`, OpenAI's `choices[0].message`).
//!
//! Only the four client-facing formats ([`WireFormat::CLIENT_FACING`]) ever
//! need a renderer here: the dialect targets (Kiro, Copilot, Antigravity,
//! Qwen, iFlow) are upstream-only, and Copilot/Qwen/iFlow upstream
//! responses are themselves OpenAI-chat-shaped, so [`upstream_shape`] maps
//! them onto the OpenAI parser rather than growing a fifth branch.

use serde_json::{Value, json};

use super::stream_chunks::parse_openai_usage;
use crate::formats::WireFormat;
use crate::formats::openai::{Role, StreamDelta, StreamToolCallDelta, TokenUsage};

/// Which parser/renderer shape a wire format's *non-streaming* response
/// actually uses. Antigravity speaks Gemini's response shape; Copilot,
/// Qwen, and iFlow speak OpenAI's (they are OpenAI-compatible APIs), so
/// they collapse onto [`ResponseShape::OpenaiChat`] rather than needing a
/// dedicated parser each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResponseShape {
    OpenaiChat,
    OpenaiResponses,
    Claude,
    Gemini,
}

fn shape_of(format: WireFormat) -> ResponseShape {
    match format {
        WireFormat::Claude => ResponseShape::Claude,
        WireFormat::Gemini | WireFormat::Antigravity => ResponseShape::Gemini,
        WireFormat::OpenaiResponses => ResponseShape::OpenaiResponses,
        WireFormat::Openai | WireFormat::Kiro | WireFormat::Copilot | WireFormat::Qwen | WireFormat::Iflow => ResponseShape::OpenaiChat,
    }
}

/// Parses a complete upstream response body (whatever format it actually
/// arrived in) into the hub's delta shape plus its usage. `content` carries
/// the full assistant text rather than a fragment, and each tool call's
/// `arguments_fragment` carries the full JSON-encoded arguments string —
/// the same [`StreamDelta`] shape the streaming path uses, just populated
/// in one pass instead of accumulated across chunks.
pub fn parse_response(format: WireFormat, body: &Value) -> (StreamDelta, TokenUsage) {
    match shape_of(format) {
        ResponseShape::OpenaiChat => parse_openai_response(body),
        ResponseShape::OpenaiResponses => parse_responses_response(body),
        ResponseShape::Claude => parse_claude_response(body),
        ResponseShape::Gemini => parse_gemini_response(body),
    }
}

fn parse_openai_response(body: &Value) -> (StreamDelta, TokenUsage) {
    let choice = body.get("choices").and_then(Value::as_array).and_then(|c| c.first());
    let message = choice.and_then(|c| c.get("message"));
    let content = message.and_then(|m| m.get("content")).and_then(Value::as_str).map(str::to_string);
    let finish_reason = choice.and_then(|c| c.get("finish_reason")).and_then(Value::as_str).map(str::to_string);
    let tool_calls = message
        .and_then(|m| m.get("tool_calls"))
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .enumerate()
                .map(|(index, raw)| StreamToolCallDelta {
                    index: index as u32,
                    id: raw.get("id").and_then(Value::as_str).map(str::to_string),
                    name: raw.get("function").and_then(|f| f.get("name")).and_then(Value::as_str).map(str::to_string),
                    arguments_fragment: raw
                        .get("function")
                        .and_then(|f| f.get("arguments"))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    let delta = StreamDelta {
        role: Some(Role::Assistant),
        content,
        tool_calls,
        finish_reason,
    };
    let usage = body.get("usage").map(parse_openai_usage).unwrap_or_default();
    (delta, usage)
}

fn parse_responses_response(body: &Value) -> (StreamDelta, TokenUsage) {
    let mut content = String::new();
    let mut tool_calls = Vec::new();
    let mut finish_reason = None;

    if let Some(items) = body.get("output").and_then(Value::as_array) {
        for item in items {
            match item.get("type").and_then(Value::as_str) {
                Some("message") => {
                    if let Some(parts) = item.get("content").and_then(Value::as_array) {
                        for part in parts {
                            if let Some(text) = part.get("text").and_then(Value::as_str) {
                                content.push_str(text);
                            }
                        }
                    }
                }
                Some("function_call") => {
                    tool_calls.push(StreamToolCallDelta {
                        index: tool_calls.len() as u32,
                        id: item.get("call_id").and_then(Value::as_str).map(str::to_string),
                        name: item.get("name").and_then(Value::as_str).map(str::to_string),
                        arguments_fragment: item.get("arguments").and_then(Value::as_str).unwrap_or_default().to_string(),
                    });
                }
                _ => {}
            }
        }
        if !tool_calls.is_empty() {
            finish_reason = Some("tool_calls".to_string());
        } else if !items.is_empty() {
            finish_reason = Some("stop".to_string());
        }
    }

    let delta = StreamDelta {
        role: Some(Role::Assistant),
        content: if content.is_empty() { None } else { Some(content) },
        tool_calls,
        finish_reason,
    };
    let usage = body
        .get("usage")
        .map(|u| TokenUsage {
            prompt: u.get("input_tokens").and_then(Value::as_u64).unwrap_or(0),
            completion: u.get("output_tokens").and_then(Value::as_u64).unwrap_or(0),
            cached: 0,
            reasoning: 0,
            cache_creation: 0,
        })
        .unwrap_or_default();
    (delta, usage)
}

fn parse_claude_response(body: &Value) -> (StreamDelta, TokenUsage) {
    let mut content = String::new();
    let mut tool_calls = Vec::new();

    if let Some(blocks) = body.get("content").and_then(Value::as_array) {
        for block in blocks {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    if let Some(text) = block.get("text").and_then(Value::as_str) {
                        content.push_str(text);
                    }
                }
                Some("tool_use") => {
                    let args = block.get("input").cloned().unwrap_or(json!({})).to_string();
                    tool_calls.push(StreamToolCallDelta {
                        index: tool_calls.len() as u32,
                        id: block.get("id").and_then(Value::as_str).map(str::to_string),
                        name: block.get("name").and_then(Value::as_str).map(str::to_string),
                        arguments_fragment: args,
                    });
                }
                _ => {}
            }
        }
    }

    let finish_reason = body.get("stop_reason").and_then(Value::as_str).map(|reason| match reason {
        "tool_use" => "tool_calls".to_string(),
        "max_tokens" => "length".to_string(),
        _ => "stop".to_string(),
    });

    let delta = StreamDelta {
        role: Some(Role::Assistant),
        content: if content.is_empty() { None } else { Some(content) },
        tool_calls,
        finish_reason,
    };
    let usage = body
        .get("usage")
        .map(|u| TokenUsage {
            prompt: u.get("input_tokens").and_then(Value::as_u64).unwrap_or(0),
            completion: u.get("output_tokens").and_then(Value::as_u64).unwrap_or(0),
            cached: u.get("cache_read_input_tokens").and_then(Value::as_u64).unwrap_or(0),
            reasoning: 0,
            cache_creation: u.get("cache_creation_input_tokens").and_then(Value::as_u64).unwrap_or(0),
        })
        .unwrap_or_default();
    (delta, usage)
}

fn parse_gemini_response(body: &Value) -> (StreamDelta, TokenUsage) {
    let candidate = body.get("candidates").and_then(Value::as_array).and_then(|c| c.first());
    let mut content = String::new();
    let mut tool_calls = Vec::new();

    if let Some(parts) = candidate.and_then(|c| c.get("content")).and_then(|c| c.get("parts")).and_then(Value::as_array) {
        for part in parts {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                content.push_str(text);
            }
            if let Some(call) = part.get("functionCall") {
                let name = call.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
                let args = call.get("args").cloned().unwrap_or(json!({})).to_string();
                tool_calls.push(StreamToolCallDelta {
                    index: tool_calls.len() as u32,
                    id: Some(name.clone()),
                    name: Some(name),
                    arguments_fragment: args,
                });
            }
        }
    }

    let finish_reason = candidate
        .and_then(|c| c.get("finishReason"))
        .and_then(Value::as_str)
        .map(|r| if r == "STOP" { "stop".to_string() } else { r.to_lowercase() });

    let delta = StreamDelta {
        role: Some(Role::Assistant),
        content: if content.is_empty() { None } else { Some(content) },
        tool_calls,
        finish_reason,
    };
    let usage = body
        .get("usageMetadata")
        .map(|u| TokenUsage {
            prompt: u.get("promptTokenCount").and_then(Value::as_u64).unwrap_or(0),
            completion: u.get("candidatesTokenCount").and_then(Value::as_u64).unwrap_or(0),
            cached: u.get("cachedContentTokenCount").and_then(Value::as_u64).unwrap_or(0),
            reasoning: u.get("thoughtsTokenCount").and_then(Value::as_u64).unwrap_or(0),
            cache_creation: 0,
        })
        .unwrap_or_default();
    (delta, usage)
}

/// Renders a complete hub delta into `format`'s full (non-streaming)
/// response JSON shape — the inverse of [`parse_response`], used when the
/// client's format differs from the format the upstream actually spoke.
pub fn render_response(format: WireFormat, delta: &StreamDelta, model: &str) -> Value {
    match format {
        WireFormat::Claude => render_claude(delta, model),
        WireFormat::Gemini | WireFormat::Antigravity => render_gemini(delta),
        WireFormat::OpenaiResponses => render_responses(delta, model),
        _ => render_openai(delta, model),
    }
}

fn render_openai(delta: &StreamDelta, model: &str) -> Value {
    let mut message = json!({"role": "assistant"});
    if let Some(content) = &delta.content {
        message["content"] = json!(content);
    } else {
        message["content"] = Value::Null;
    }
    if !delta.tool_calls.is_empty() {
        message["tool_calls"] = Value::Array(
            delta
                .tool_calls
                .iter()
                .map(|c| {
                    json!({
                        "id": c.id.clone().unwrap_or_default(),
                        "type": "function",
                        "function": {"name": c.name.clone().unwrap_or_default(), "arguments": c.arguments_fragment},
                    })
                })
                .collect(),
        );
    }
    json!({
        "id": "chatcmpl-translated",
        "object": "chat.completion",
        "model": model,
        "choices": [{"index": 0, "message": message, "finish_reason": delta.finish_reason.clone().unwrap_or_else(|| "stop".to_string())}],
    })
}

fn render_responses(delta: &StreamDelta, model: &str) -> Value {
    let mut output = Vec::new();
    if let Some(content) = &delta.content {
        output.push(json!({"type": "message", "role": "assistant", "content": [{"type": "output_text", "text": content}]}));
    }
    for call in &delta.tool_calls {
        output.push(json!({
            "type": "function_call",
            "call_id": call.id.clone().unwrap_or_default(),
            "name": call.name.clone().unwrap_or_default(),
            "arguments": call.arguments_fragment,
        }));
    }
    json!({"id": "resp-translated", "object": "response", "model": model, "output": output})
}

fn render_claude(delta: &StreamDelta, model: &str) -> Value {
    let mut blocks = Vec::new();
    if let Some(content) = &delta.content {
        blocks.push(json!({"type": "text", "text": content}));
    }
    for call in &delta.tool_calls {
        let input: Value = serde_json::from_str(&call.arguments_fragment).unwrap_or(Value::Null);
        blocks.push(json!({"type": "tool_use", "id": call.id.clone().unwrap_or_default(), "name": call.name.clone().unwrap_or_default(), "input": input}));
    }
    let stop_reason = match delta.finish_reason.as_deref() {
        Some("tool_calls") => "tool_use",
        Some("length") => "max_tokens",
        _ => "end_turn",
    };
    json!({"id": "msg-translated", "type": "message", "role": "assistant", "model": model, "content": blocks, "stop_reason": stop_reason})
}

fn render_gemini(delta: &StreamDelta) -> Value {
    let mut parts = Vec::new();
    if let Some(content) = &delta.content {
        parts.push(json!({"text": content}));
    }
    for call in &delta.tool_calls {
        let args: Value = serde_json::from_str(&call.arguments_fragment).unwrap_or(json!({}));
        parts.push(json!({"functionCall": {"name": call.name.clone().unwrap_or_default(), "args": args}}));
    }
    let finish_reason = match delta.finish_reason.as_deref() {
        Some("tool_calls") => "STOP",
        Some(other) => return json!({"candidates": [{"content": {"role": "model", "parts": parts}, "finishReason": other.to_uppercase()}]}),
        None => "STOP",
    };
    json!({"candidates": [{"content": {"role": "model", "parts": parts}, "finishReason": finish_reason}]})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_response_round_trips_through_claude() {
        let body = json!({
            "choices": [{"message": {"role": "assistant", "content": "hello"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 2},
        });
        let (delta, usage) = parse_response(WireFormat::Openai, &body);
        assert_eq!(delta.content.as_deref(), Some("hello"));
        assert_eq!(usage.prompt, 3);
        let claude = render_response(WireFormat::Claude, &delta, "claude-3");
        assert_eq!(claude["content"][0]["text"], "hello");
        assert_eq!(claude["stop_reason"], "end_turn");
    }

    #[test]
    fn claude_tool_use_renders_as_openai_tool_call() {
        let body = json!({
            "content": [{"type": "tool_use", "id": "t1", "name": "search", "input": {"q": "x"}}],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 10, "output_tokens": 5},
        });
        let (delta, usage) = parse_response(WireFormat::Claude, &body);
        assert_eq!(usage.prompt, 10);
        let openai = render_response(WireFormat::Openai, &delta, "gpt-4o");
        assert_eq!(openai["choices"][0]["message"]["tool_calls"][0]["function"]["name"], "search");
        assert_eq!(openai["choices"][0]["finish_reason"], "tool_calls");
    }

    #[test]
    fn gemini_function_call_parses_and_renders() {
        let body = json!({
            "candidates": [{"content": {"parts": [{"functionCall": {"name": "lookup", "args": {"a": 1}}}]}, "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 6},
        });
        let (delta, usage) = parse_response(WireFormat::Gemini, &body);
        assert_eq!(usage.completion, 6);
        assert_eq!(delta.tool_calls[0].name.as_deref(), Some("lookup"));
        let gemini_back = render_response(WireFormat::Gemini, &delta, "gemini-1.5-pro");
        assert_eq!(gemini_back["candidates"][0]["content"]["parts"][0]["functionCall"]["name"], "lookup");
    }

    #[test]
    fn same_format_usage_extraction_needs_no_translation() {
        let body = json!({"choices": [{"message": {"content": "hi"}, "finish_reason": "stop"}], "usage": {"prompt_tokens": 1, "completion_tokens": 1}});
        let (_, usage) = parse_response(WireFormat::Openai, &body);
        assert_eq!(usage.prompt, 1);
        assert_eq!(usage.completion, 1);
    }
}
