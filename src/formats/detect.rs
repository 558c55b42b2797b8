//! Format Detector (spec §4.1).
//!
//! Deterministic, side-effect-free classification of a parsed request body
//! into one of the four client-facing [`super::WireFormat`] variants.
//! Ambiguous bodies default to `OPENAI`.

use serde_json::Value;

use super::WireFormat;

/// Classify `body`, optionally aided by the request's `anthropic-version`
/// header (Claude's presence rule can fire on the header alone).
pub fn detect(body: &Value, has_anthropic_version_header: bool) -> WireFormat {
    if is_openai_responses(body) {
        return WireFormat::OpenaiResponses;
    }
    if has_gemini_contents(body) {
        return WireFormat::Gemini;
    }
    if has_messages_array(body) && looks_like_claude(body, has_anthropic_version_header) {
        return WireFormat::Claude;
    }
    if has_messages_array(body) {
        return WireFormat::Openai;
    }
    WireFormat::Openai
}

fn is_openai_responses(body: &Value) -> bool {
    let has_input_array = body.get("input").is_some_and(Value::is_array);
    let has_instructions_or_prev = body.get("instructions").is_some() || body.get("previous_response_id").is_some();
    has_input_array && has_instructions_or_prev
}

fn has_gemini_contents(body: &Value) -> bool {
    if body.get("contents").is_some_and(Value::is_array) {
        return true;
    }
    // Nested under e.g. a `request` wrapper used by some Gemini-compatible clients.
    body.as_object()
        .into_iter()
        .flat_map(|m| m.values())
        .any(|v| v.get("contents").is_some_and(Value::is_array))
}

fn has_messages_array(body: &Value) -> bool {
    body.get("messages").is_some_and(Value::is_array)
}

fn looks_like_claude(body: &Value, has_anthropic_version_header: bool) -> bool {
    if has_anthropic_version_header {
        return true;
    }
    let system_is_string_or_list = matches!(body.get("system"), Some(Value::String(_)) | Some(Value::Array(_)));
    if system_is_string_or_list {
        return true;
    }
    let messages = body.get("messages").and_then(Value::as_array);
    let Some(messages) = messages else { return false };
    messages.iter().any(message_uses_claude_blocks)
}

fn message_uses_claude_blocks(message: &Value) -> bool {
    let Some(content) = message.get("content").and_then(Value::as_array) else {
        return false;
    };
    content.iter().any(|block| {
        matches!(
            block.get("type").and_then(Value::as_str),
            Some("tool_use") | Some("tool_result")
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn detects_openai_responses() {
        let body = json!({"input": [{"role": "user", "content": "hi"}], "instructions": "be nice"});
        assert_eq!(detect(&body, false), WireFormat::OpenaiResponses);
    }

    #[test]
    fn detects_gemini_top_level_contents() {
        let body = json!({"contents": [{"role": "user", "parts": [{"text": "hi"}]}]});
        assert_eq!(detect(&body, false), WireFormat::Gemini);
    }

    #[test]
    fn detects_claude_via_system_string() {
        let body = json!({"system": "be nice", "messages": [{"role": "user", "content": "hi"}]});
        assert_eq!(detect(&body, false), WireFormat::Claude);
    }

    #[test]
    fn detects_claude_via_header() {
        let body = json!({"messages": [{"role": "user", "content": "hi"}]});
        assert_eq!(detect(&body, true), WireFormat::Claude);
    }

    #[test]
    fn detects_claude_via_tool_use_block() {
        let body = json!({
            "messages": [{"role": "assistant", "content": [{"type": "tool_use", "id": "t1", "name": "f", "input": {}}]}]
        });
        assert_eq!(detect(&body, false), WireFormat::Claude);
    }

    #[test]
    fn defaults_to_openai_for_plain_messages() {
        let body = json!({"messages": [{"role": "user", "content": "hi"}]});
        assert_eq!(detect(&body, false), WireFormat::Openai);
    }

    #[test]
    fn ambiguous_body_defaults_to_openai() {
        let body = json!({"foo": "bar"});
        assert_eq!(detect(&body, false), WireFormat::Openai);
    }

    #[test]
    fn detection_is_deterministic() {
        let body = json!({"messages": [{"role": "user", "content": "hi"}], "stream": true});
        let first = detect(&body, false);
        let second = detect(&body, false);
        assert_eq!(first, second);
    }
}
