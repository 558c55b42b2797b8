//! OPENAI → dialect request translators (spec §4.2: `OPENAI→{KIRO, COPILOT,
//! ANTIGRAVITY, QWEN, IFLOW}`). These are upstream-only targets — no client
//! ever sends these shapes to us, so there is no `to_hub` for them, matching
//! the registry's asymmetric edge list.

use serde_json::{Value, json};

use crate::formats::openai::{ChatRequest, Role};

use super::{gemini_wire, openai_wire};

/// AWS CodeWhisperer (Kiro) conversation-state request shape.
///
/// Kiro has no OpenAI-style flat message list; it wants a `currentMessage`
/// plus a `history` of prior turns, and tool results as part of the
/// current user-input message context rather than separate messages.
pub fn to_kiro(request: &ChatRequest) -> Value {
    let mut history: Vec<Value> = Vec::new();
    let mut pending_tool_results: Vec<Value> = Vec::new();
    let mut current_text = String::new();
    let mut current_tools_used: Vec<Value> = Vec::new();

    for message in &request.messages {
        match message.role {
            Role::System => continue,
            Role::User => {
                if !current_text.is_empty() {
                    history.push(json!({"userInputMessage": {"content": current_text}}));
                    current_text.clear();
                }
                current_text = message.content.concatenated_text();
            }
            Role::Assistant => {
                history.push(json!({"userInputMessage": {"content": current_text}}));
                current_text.clear();
                let assistant_text = message.content.concatenated_text();
                let tool_uses: Vec<Value> = message
                    .tool_calls
                    .iter()
                    .map(|c| json!({"toolUseId": c.id, "name": c.name, "input": serde_json::from_str::<Value>(&c.arguments).unwrap_or(Value::Null)}))
                    .collect();
                let mut assistant_msg = json!({"content": assistant_text});
                if !tool_uses.is_empty() {
                    assistant_msg["toolUses"] = Value::Array(tool_uses);
                }
                history.push(json!({"assistantResponseMessage": assistant_msg}));
            }
            Role::Tool => {
                pending_tool_results.push(json!({
                    "toolUseId": message.tool_call_id.clone().unwrap_or_default(),
                    "content": [{"text": message.content.concatenated_text()}],
                    "status": "success",
                }));
            }
        }
    }

    let system_prompt: String = request
        .messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.concatenated_text())
        .collect::<Vec<_>>()
        .join("\n");

    let tools: Vec<Value> = request
        .tools
        .iter()
        .map(|t| json!({"toolSpecification": {"name": t.name, "description": t.description, "inputSchema": {"json": t.parameters}}}))
        .collect();

    let mut context = serde_json::Map::new();
    if !pending_tool_results.is_empty() {
        context.insert("toolResults".to_string(), Value::Array(pending_tool_results));
    }
    if !tools.is_empty() {
        context.insert("tools".to_string(), Value::Array(tools));
    }
    if !current_tools_used.is_empty() {
        context.insert("toolsUsed".to_string(), Value::Array(std::mem::take(&mut current_tools_used)));
    }

    let mut current_message = json!({
        "content": current_text,
        "modelId": request.model,
        "origin": "AI_EDITOR",
    });
    if !context.is_empty() {
        current_message["userInputMessageContext"] = Value::Object(context);
    }
    if !system_prompt.is_empty() {
        current_message["systemPrompt"] = json!(system_prompt);
    }

    json!({
        "conversationState": {
            "chatTriggerType": "MANUAL",
            "currentMessage": {"userInputMessage": current_message},
            "history": history,
        }
    })
}

/// GitHub Copilot chat completions — OpenAI-compatible with an `intent`
/// flag and a client-identifying `x-initiator` carried at the body level
/// (Copilot's own header set is built by the executor; this only covers
/// the body-shape difference).
pub fn to_copilot(request: &ChatRequest) -> Value {
    let mut body = openai_wire::from_hub(request);
    body["intent"] = json!(false);
    body
}

/// Gemini-CLI's Code Assist API wraps the Gemini body under a `request`
/// key alongside a `model` and `project` field.
pub fn to_antigravity(request: &ChatRequest) -> Value {
    let gemini_body = gemini_wire::from_hub(request);
    json!({
        "model": request.model,
        "request": gemini_body,
    })
}

/// Qwen (DashScope compatible-mode) is OpenAI-compatible; it additionally
/// accepts a `result_format` hint.
pub fn to_qwen(request: &ChatRequest) -> Value {
    let mut body = openai_wire::from_hub(request);
    body["result_format"] = json!("message");
    body
}

/// iFlow is OpenAI-compatible at the body level; Basic-auth happens at the
/// header layer (spec §4.3 refresh methods).
pub fn to_iflow(request: &ChatRequest) -> Value {
    openai_wire::from_hub(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::openai::{ChatMessage, ToolChoice};

    fn sample_request() -> ChatRequest {
        ChatRequest {
            model: "kiro-model".into(),
            messages: vec![ChatMessage::system("be helpful"), ChatMessage::user("hi")],
            tools: vec![],
            tool_choice: ToolChoice::default(),
            stream: true,
            temperature: None,
            max_tokens: None,
            top_p: None,
        }
    }

    #[test]
    fn kiro_carries_current_message_and_system_prompt() {
        let body = to_kiro(&sample_request());
        let current = &body["conversationState"]["currentMessage"]["userInputMessage"];
        assert_eq!(current["content"], "hi");
        assert_eq!(current["systemPrompt"], "be helpful");
    }

    #[test]
    fn antigravity_wraps_gemini_body() {
        let body = to_antigravity(&sample_request());
        assert!(body["request"]["contents"].is_array());
    }

    #[test]
    fn qwen_and_iflow_are_openai_compatible() {
        let body = to_qwen(&sample_request());
        assert_eq!(body["result_format"], "message");
        let iflow_body = to_iflow(&sample_request());
        assert!(iflow_body["messages"].is_array());
    }
}
