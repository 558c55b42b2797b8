//! Executor registry (spec §4.3): dispatches a provider id (plus, for
//! user-added generic nodes, its [`NodeConfig`]) to a concrete [`Executor`].

use crate::executors::default_executor::{DefaultExecutor, Family};
use crate::executors::kiro::KiroExecutor;
use crate::executors::Executor;
use crate::formats::WireFormat;
use crate::state::NodeConfig;

/// Builds the executor for `provider_id`. `node` supplies the base URL and
/// API type for a connection that targets a user-added generic
/// OpenAI-/Anthropic-compatible node rather than a well-known provider.
pub fn build(provider_id: &str, node: Option<&NodeConfig>) -> Box<dyn Executor> {
    if provider_id == "kiro" || provider_id == "kiro-social" {
        return Box::new(KiroExecutor::new("https://codewhisperer.us-east-1.amazonaws.com"));
    }

    if let Some((family, base_url)) = DefaultExecutor::well_known(provider_id) {
        return Box::new(DefaultExecutor::new(provider_id, family, base_url));
    }

    if let Some(node) = node {
        let family = match node.api_type.as_str() {
            "anthropic" => Family::AnthropicFamily,
            "gemini" => Family::Gemini,
            "responses" => Family::OpenAiResponses,
            _ => Family::OpenAiChat,
        };
        return Box::new(DefaultExecutor::new(provider_id, family, node.base_url.clone()));
    }

    // Unknown provider with no node config: fall back to a plain
    // OpenAI-compatible shape against an empty base URL. The upstream call
    // will fail fast with a connection error, which the fallback policy
    // classifies as a retryable network failure.
    Box::new(DefaultExecutor::new(provider_id, Family::OpenAiChat, String::new()))
}

/// The wire format a provider's upstream API natively speaks, used to pick
/// the translator's target side (spec §4.7 "source/target format
/// resolution").
pub fn preferred_format_for(provider_id: &str, node: Option<&NodeConfig>) -> WireFormat {
    match provider_id {
        "claude" | "anthropic" | "glm" | "kimi" | "minimax" => WireFormat::Claude,
        "gemini" | "google" => WireFormat::Gemini,
        "antigravity" => WireFormat::Antigravity,
        "kiro" | "kiro-social" => WireFormat::Kiro,
        "copilot" => WireFormat::Copilot,
        "qwen" => WireFormat::Qwen,
        "iflow" => WireFormat::Iflow,
        _ => node.map(|n| n.preferred_format).unwrap_or(WireFormat::Openai),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kiro_dispatches_to_kiro_executor_url_shape() {
        let exec = build("kiro", None);
        assert!(exec.build_url("claude-sonnet", true).contains("codewhisperer"));
    }

    #[test]
    fn generic_node_uses_its_configured_base_url() {
        let node = NodeConfig {
            id: "custom".to_string(),
            base_url: "https://llm.example.com/v1".to_string(),
            api_type: "openai".to_string(),
            preferred_format: WireFormat::Openai,
        };
        let exec = build("custom", Some(&node));
        assert!(exec.build_url("some-model", false).starts_with("https://llm.example.com/v1"));
    }

    #[test]
    fn preferred_format_defaults_to_node_format_for_unknown_provider() {
        let node = NodeConfig {
            id: "custom".to_string(),
            base_url: "https://llm.example.com/v1".to_string(),
            api_type: "anthropic".to_string(),
            preferred_format: WireFormat::Claude,
        };
        assert_eq!(preferred_format_for("custom", Some(&node)), WireFormat::Claude);
    }
}
