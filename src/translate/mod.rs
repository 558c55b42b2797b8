//! Translator Registry (spec §4.2).
//!
//! OPENAI is the hub (spec §9): every wire format implements `to_hub` and
//! `from_hub` against the canonical [`crate::formats::openai::ChatRequest`],
//! and [`Registry::translate_request`] composes `X → OPENAI → Y` so the
//! registry needs O(n) translators instead of O(n²). Lossy-over-the-hub
//! features (Gemini thought tokens, Anthropic cache breakpoints) survive a
//! same-format round-trip via [`crate::formats::openai::ChatMessage::provider_meta`]
//! rather than a separate direct-edge table.

pub mod claude_wire;
pub mod dialects;
pub mod gemini_wire;
pub mod openai_wire;
pub mod response_wire;
pub mod responses_wire;
pub mod schema_sanitize;
pub mod stream_chunks;
pub mod tool_names;

use serde_json::Value;
use thiserror::Error;

use crate::formats::WireFormat;
use crate::formats::openai::ChatRequest;

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("malformed {0} request body: {1}")]
    Malformed(WireFormat, String),
    #[error("{0} is not a valid translation target for inbound requests")]
    NotATarget(WireFormat),
}

/// Parse a wire-format body into the hub request shape.
pub fn to_hub(format: WireFormat, body: &Value) -> Result<ChatRequest, TranslateError> {
    match format {
        WireFormat::Openai => openai_wire::to_hub(body),
        WireFormat::Claude => claude_wire::to_hub(body),
        WireFormat::Gemini => gemini_wire::to_hub(body),
        WireFormat::OpenaiResponses => responses_wire::to_hub(body),
        other => Err(TranslateError::NotATarget(other)),
    }
}

/// Render the hub request shape into a wire-format body.
pub fn from_hub(format: WireFormat, request: &ChatRequest) -> Result<Value, TranslateError> {
    match format {
        WireFormat::Openai => Ok(openai_wire::from_hub(request)),
        WireFormat::Claude => Ok(claude_wire::from_hub(request)),
        WireFormat::Gemini => Ok(gemini_wire::from_hub(request)),
        WireFormat::OpenaiResponses => Ok(responses_wire::from_hub(request)),
        WireFormat::Kiro => Ok(dialects::to_kiro(request)),
        WireFormat::Copilot => Ok(dialects::to_copilot(request)),
        WireFormat::Antigravity => Ok(dialects::to_antigravity(request)),
        WireFormat::Qwen => Ok(dialects::to_qwen(request)),
        WireFormat::Iflow => Ok(dialects::to_iflow(request)),
    }
}

/// `translateRequest(src, tgt, model, body, stream, credentials, provider)`
/// (spec §4.2). Identity when `src == tgt`; otherwise composes through the
/// OPENAI hub. `model` overrides the model field in the translated body so
/// callers don't need a second pass to substitute an alias-resolved model.
pub fn translate_request(src: WireFormat, tgt: WireFormat, model: &str, body: &Value) -> Result<Value, TranslateError> {
    if src == tgt {
        let mut out = body.clone();
        if let Some(obj) = out.as_object_mut() {
            obj.insert("model".to_string(), Value::String(model.to_string()));
        }
        return Ok(out);
    }

    let mut hub = to_hub(src, body)?;
    hub.model = model.to_string();
    from_hub(tgt, &hub)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identity_translation_substitutes_model() {
        let body = json!({"model": "old", "messages": [{"role": "user", "content": "hi"}]});
        let out = translate_request(WireFormat::Openai, WireFormat::Openai, "new", &body).unwrap();
        assert_eq!(out["model"], "new");
        assert_eq!(out["messages"], body["messages"]);
    }

    #[test]
    fn openai_to_claude_round_trip_preserves_text_and_roles() {
        let body = json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "system", "content": "be nice"},
                {"role": "user", "content": "hello there"}
            ]
        });
        let claude_body = translate_request(WireFormat::Openai, WireFormat::Claude, "claude-3", &body).unwrap();
        let back = translate_request(WireFormat::Claude, WireFormat::Openai, "gpt-4o", &claude_body).unwrap();

        let original_hub = to_hub(WireFormat::Openai, &body).unwrap();
        let back_hub = to_hub(WireFormat::Openai, &back).unwrap();
        assert_eq!(original_hub.role_sequence(), back_hub.role_sequence());
        let orig_text: String = original_hub.messages.iter().map(|m| m.content.concatenated_text()).collect();
        let back_text: String = back_hub.messages.iter().map(|m| m.content.concatenated_text()).collect();
        assert_eq!(orig_text, back_text);
    }
}
