//! Streaming response translators (spec §4.2's "parallel table" to the
//! request translators, and the per-format half of spec §4.9's Stream
//! Transform). Each source format parses one upstream SSE JSON payload into
//! the hub's [`StreamDelta`]; each target format renders a `StreamDelta`
//! (plus the pipeline's running state) into zero or more outbound SSE data
//! payloads.

use serde_json::{Value, json};

use crate::formats::WireFormat;
use crate::formats::openai::{Role, StreamDelta, StreamToolCallDelta, TokenUsage};

/// Parse one upstream SSE JSON payload in `format`'s native shape into a hub
/// delta, plus any usage numbers present on this chunk (most formats only
/// attach usage to the final chunk).
pub fn parse_chunk(format: WireFormat, payload: &Value) -> (StreamDelta, Option<TokenUsage>) {
    match format {
        WireFormat::Claude => parse_claude_chunk(payload),
        WireFormat::Gemini | WireFormat::Antigravity => parse_gemini_chunk(payload),
        // OpenAI and the remaining OpenAI-compatible dialects share a chunk shape.
        _ => parse_openai_chunk(payload),
    }
}

fn parse_openai_chunk(payload: &Value) -> (StreamDelta, Option<TokenUsage>) {
    let choice = payload.get("choices").and_then(Value::as_array).and_then(|c| c.first());
    let delta_val = choice.and_then(|c| c.get("delta"));

    let role = delta_val.and_then(|d| d.get("role")).and_then(Value::as_str).map(|r| match r {
        "assistant" => Role::Assistant,
        "user" => Role::User,
        "system" => Role::System,
        _ => Role::Tool,
    });
    let content = delta_val.and_then(|d| d.get("content")).and_then(Value::as_str).map(str::to_string);
    let finish_reason = choice.and_then(|c| c.get("finish_reason")).and_then(Value::as_str).map(str::to_string);

    let tool_calls = delta_val
        .and_then(|d| d.get("tool_calls"))
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(parse_openai_tool_delta).collect())
        .unwrap_or_default();

    let usage = payload.get("usage").map(parse_openai_usage);

    (
        StreamDelta {
            role,
            content,
            tool_calls,
            finish_reason,
        },
        usage,
    )
}

fn parse_openai_tool_delta(raw: &Value) -> Option<StreamToolCallDelta> {
    let index = raw.get("index").and_then(Value::as_u64)? as u32;
    let id = raw.get("id").and_then(Value::as_str).map(str::to_string);
    let function = raw.get("function");
    let name = function.and_then(|f| f.get("name")).and_then(Value::as_str).map(str::to_string);
    let arguments_fragment = function
        .and_then(|f| f.get("arguments"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Some(StreamToolCallDelta { index, id, name, arguments_fragment })
}

pub(crate) fn parse_openai_usage(raw: &Value) -> TokenUsage {
    TokenUsage {
        prompt: raw.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0),
        completion: raw.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0),
        cached: raw
            .get("prompt_tokens_details")
            .and_then(|d| d.get("cached_tokens"))
            .and_then(Value::as_u64)
            .unwrap_or(0),
        reasoning: raw
            .get("completion_tokens_details")
            .and_then(|d| d.get("reasoning_tokens"))
            .and_then(Value::as_u64)
            .unwrap_or(0),
        cache_creation: 0,
    }
}

fn parse_claude_chunk(payload: &Value) -> (StreamDelta, Option<TokenUsage>) {
    let event_type = payload.get("type").and_then(Value::as_str).unwrap_or_default();
    let mut delta = StreamDelta::default();
    let mut usage = None;

    match event_type {
        "message_start" => {
            delta.role = Some(Role::Assistant);
            if let Some(u) = payload.get("message").and_then(|m| m.get("usage")) {
                usage = Some(TokenUsage {
                    prompt: u.get("input_tokens").and_then(Value::as_u64).unwrap_or(0),
                    completion: 0,
                    cached: u.get("cache_read_input_tokens").and_then(Value::as_u64).unwrap_or(0),
                    reasoning: 0,
                    cache_creation: u.get("cache_creation_input_tokens").and_then(Value::as_u64).unwrap_or(0),
                });
            }
        }
        "content_block_delta" => {
            if let Some(block_delta) = payload.get("delta") {
                if let Some(text) = block_delta.get("text").and_then(Value::as_str) {
                    delta.content = Some(text.to_string());
                }
                if let Some(partial) = block_delta.get("partial_json").and_then(Value::as_str) {
                    delta.tool_calls.push(StreamToolCallDelta {
                        index: payload.get("index").and_then(Value::as_u64).unwrap_or(0) as u32,
                        id: None,
                        name: None,
                        arguments_fragment: partial.to_string(),
                    });
                }
            }
        }
        "content_block_start" => {
            if let Some(block) = payload.get("content_block") {
                if block.get("type").and_then(Value::as_str) == Some("tool_use") {
                    delta.tool_calls.push(StreamToolCallDelta {
                        index: payload.get("index").and_then(Value::as_u64).unwrap_or(0) as u32,
                        id: block.get("id").and_then(Value::as_str).map(str::to_string),
                        name: block.get("name").and_then(Value::as_str).map(str::to_string),
                        arguments_fragment: String::new(),
                    });
                }
            }
        }
        "message_delta" => {
            if let Some(stop_reason) = payload.get("delta").and_then(|d| d.get("stop_reason")).and_then(Value::as_str) {
                delta.finish_reason = Some(claude_stop_reason_to_openai(stop_reason));
            }
            if let Some(u) = payload.get("usage") {
                usage = Some(TokenUsage {
                    prompt: 0,
                    completion: u.get("output_tokens").and_then(Value::as_u64).unwrap_or(0),
                    cached: 0,
                    reasoning: 0,
                    cache_creation: 0,
                });
            }
        }
        "message_stop" => {
            delta.finish_reason.get_or_insert_with(|| "stop".to_string());
        }
        _ => {}
    }

    (delta, usage)
}

fn claude_stop_reason_to_openai(reason: &str) -> String {
    match reason {
        "tool_use" => "tool_calls",
        "max_tokens" => "length",
        _ => "stop",
    }
    .to_string()
}

fn parse_gemini_chunk(payload: &Value) -> (StreamDelta, Option<TokenUsage>) {
    let candidate = payload.get("candidates").and_then(Value::as_array).and_then(|c| c.first());
    let mut delta = StreamDelta {
        role: Some(Role::Assistant),
        ..Default::default()
    };

    if let Some(parts) = candidate.and_then(|c| c.get("content")).and_then(|c| c.get("parts")).and_then(Value::as_array) {
        let text: String = parts.iter().filter_map(|p| p.get("text").and_then(Value::as_str)).collect();
        if !text.is_empty() {
            delta.content = Some(text);
        }
        for (index, part) in parts.iter().enumerate() {
            if let Some(call) = part.get("functionCall") {
                let name = call.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
                let args = call.get("args").cloned().unwrap_or(json!({})).to_string();
                delta.tool_calls.push(StreamToolCallDelta {
                    index: index as u32,
                    id: Some(name.clone()),
                    name: Some(name),
                    arguments_fragment: args,
                });
            }
        }
    }

    if let Some(reason) = candidate.and_then(|c| c.get("finishReason")).and_then(Value::as_str) {
        delta.finish_reason = Some(if reason == "STOP" { "stop".to_string() } else { reason.to_lowercase() });
    }

    let usage = payload.get("usageMetadata").map(|u| TokenUsage {
        prompt: u.get("promptTokenCount").and_then(Value::as_u64).unwrap_or(0),
        completion: u.get("candidatesTokenCount").and_then(Value::as_u64).unwrap_or(0),
        cached: u.get("cachedContentTokenCount").and_then(Value::as_u64).unwrap_or(0),
        reasoning: u.get("thoughtsTokenCount").and_then(Value::as_u64).unwrap_or(0),
        cache_creation: 0,
    });

    (delta, usage)
}

/// Render one hub delta into the target format's outbound SSE payload(s).
/// `role_emitted` tracks whether the assistant role has already been sent
/// (OpenAI only emits it once, on the first chunk).
pub fn render_chunk(format: WireFormat, delta: &StreamDelta, model: &str, role_emitted: &mut bool) -> Vec<Value> {
    match format {
        WireFormat::Claude => render_claude_chunk(delta),
        WireFormat::Gemini | WireFormat::Antigravity => vec![render_gemini_chunk(delta)],
        _ => vec![render_openai_chunk(delta, model, role_emitted)],
    }
}

fn render_openai_chunk(delta: &StreamDelta, model: &str, role_emitted: &mut bool) -> Value {
    let mut delta_obj = serde_json::Map::new();
    if !*role_emitted {
        delta_obj.insert("role".to_string(), json!("assistant"));
        *role_emitted = true;
    }
    if let Some(content) = &delta.content {
        delta_obj.insert("content".to_string(), json!(content));
    }
    if !delta.tool_calls.is_empty() {
        let calls: Vec<Value> = delta
            .tool_calls
            .iter()
            .map(|t| {
                let mut call = json!({"index": t.index, "function": {"arguments": t.arguments_fragment}});
                if let Some(id) = &t.id {
                    call["id"] = json!(id);
                    call["type"] = json!("function");
                }
                if let Some(name) = &t.name {
                    call["function"]["name"] = json!(name);
                }
                call
            })
            .collect();
        delta_obj.insert("tool_calls".to_string(), Value::Array(calls));
    }

    json!({
        "object": "chat.completion.chunk",
        "model": model,
        "choices": [{"index": 0, "delta": Value::Object(delta_obj), "finish_reason": delta.finish_reason}],
    })
}

fn render_claude_chunk(delta: &StreamDelta) -> Vec<Value> {
    let mut events = Vec::new();
    if let Some(content) = &delta.content {
        events.push(json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "text_delta", "text": content},
        }));
    }
    for call in &delta.tool_calls {
        events.push(json!({
            "type": "content_block_delta",
            "index": call.index,
            "delta": {"type": "input_json_delta", "partial_json": call.arguments_fragment},
        }));
    }
    if let Some(reason) = &delta.finish_reason {
        events.push(json!({"type": "message_delta", "delta": {"stop_reason": reason}}));
    }
    events
}

fn render_gemini_chunk(delta: &StreamDelta) -> Value {
    let mut parts = Vec::new();
    if let Some(content) = &delta.content {
        parts.push(json!({"text": content}));
    }
    for call in &delta.tool_calls {
        let args: Value = serde_json::from_str(&call.arguments_fragment).unwrap_or(json!({}));
        parts.push(json!({"functionCall": {"name": call.name, "args": args}}));
    }
    json!({"candidates": [{"content": {"role": "model", "parts": parts}, "finishReason": delta.finish_reason}]})
}

/// Terminator payload for the target format's stream, plus a flag for
/// whether it should be framed as a literal `data: [DONE]` line rather
/// than a JSON payload.
pub enum Terminator {
    OpenaiDone,
    Json(Value),
}

pub fn terminator(format: WireFormat, usage: &TokenUsage) -> Terminator {
    match format {
        WireFormat::Claude => Terminator::Json(json!({"type": "message_stop"})),
        WireFormat::Gemini | WireFormat::Antigravity => Terminator::Json(json!({
            "candidates": [],
            "usageMetadata": {
                "promptTokenCount": usage.prompt,
                "candidatesTokenCount": usage.completion,
                "cachedContentTokenCount": usage.cached,
                "thoughtsTokenCount": usage.reasoning,
            }
        })),
        _ => Terminator::OpenaiDone,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_openai_content_delta() {
        let payload = json!({"choices": [{"delta": {"content": "hi"}, "finish_reason": null}]});
        let (delta, _) = parse_chunk(WireFormat::Openai, &payload);
        assert_eq!(delta.content, Some("hi".to_string()));
    }

    #[test]
    fn openai_role_emitted_once() {
        let mut emitted = false;
        let delta = StreamDelta {
            content: Some("a".into()),
            ..Default::default()
        };
        let first = render_openai_chunk(&delta, "gpt-4o", &mut emitted);
        assert_eq!(first["choices"][0]["delta"]["role"], "assistant");
        let second = render_openai_chunk(&delta, "gpt-4o", &mut emitted);
        assert!(second["choices"][0]["delta"].get("role").is_none());
    }

    #[test]
    fn gemini_usage_extracted_from_usage_metadata() {
        let payload = json!({"usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 5}});
        let (_, usage) = parse_chunk(WireFormat::Gemini, &payload);
        let usage = usage.unwrap();
        assert_eq!(usage.prompt, 10);
        assert_eq!(usage.completion, 5);
    }

    #[test]
    fn claude_tool_use_stop_reason_maps_to_tool_calls() {
        let payload = json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}});
        let (delta, _) = parse_chunk(WireFormat::Claude, &payload);
        assert_eq!(delta.finish_reason, Some("tool_calls".to_string()));
    }
}
