//! Canonical hub representation (spec §9 "Cross-format tool calls": OPENAI
//! is the hub; every other format translates `X → OPENAI → Y`).
//!
//! These types are a typed view of the OpenAI Chat Completions wire shape,
//! rich enough that every other supported format can losslessly round-trip
//! through it for the properties enumerated in spec §8 (role sequence, text,
//! tool-name set, tool-call/tool-result pairing). They are not the literal
//! wire JSON OpenAI expects — `serde_json::Value` is used at the translation
//! boundary for exact wire fidelity; see [`crate::translate`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    /// A non-text part (image, audio, file) with no representation in the
    /// target dialect; carries a human-readable placeholder so content is
    /// never silently dropped (spec §4.2).
    UnsupportedPlaceholder(String),
}

impl ContentPart {
    pub fn text(&self) -> Option<&str> {
        match self {
            ContentPart::Text(s) => Some(s),
            ContentPart::UnsupportedPlaceholder(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
    Empty,
}

impl MessageContent {
    /// Concatenated text across all text-bearing parts, used by the
    /// round-trip text-preservation property (spec §8).
    pub fn concatenated_text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts.iter().filter_map(ContentPart::text).collect::<Vec<_>>().join(""),
            MessageContent::Empty => String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON-encoded arguments, as OpenAI transmits them (a string, not
    /// a parsed object) so translators never need to reconcile schema drift.
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
    /// Present only on assistant messages that invoked tools.
    pub tool_calls: Vec<ToolCall>,
    /// Present only on `role: tool` messages, pairing a result to its call.
    pub tool_call_id: Option<String>,
    /// Tool name, carried on `role: tool` messages for dialects (Anthropic)
    /// that need the name alongside the call id.
    pub name: Option<String>,
    /// Opaque passthrough bag for source-format metadata that has no hub
    /// representation but must survive a round-trip back to the same
    /// format (spec §9: Gemini `thought` flags, Anthropic `cache_control`
    /// breakpoints). Populated by a format's `to_hub` and consumed by its
    /// own `from_hub`; other formats ignore it.
    pub provider_meta: Option<Value>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            provider_meta: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            provider_meta: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            provider_meta: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: Option<String>,
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ToolChoice(pub Option<Value>);

/// The hub request: every translator's canonical in/out type.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: ToolChoice,
    pub stream: bool,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f64>,
}

impl ChatRequest {
    /// Ordered role sequence, one of the properties a round-trip must
    /// preserve (spec §8).
    pub fn role_sequence(&self) -> Vec<Role> {
        self.messages.iter().map(|m| m.role).collect()
    }

    /// The set of distinct tool names referenced by `tools` plus any
    /// tool calls/results in the message history.
    pub fn tool_name_set(&self) -> std::collections::BTreeSet<String> {
        let mut names: std::collections::BTreeSet<String> = self.tools.iter().map(|t| t.name.clone()).collect();
        for message in &self.messages {
            for call in &message.tool_calls {
                names.insert(call.name.clone());
            }
            if let Some(name) = &message.name {
                names.insert(name.clone());
            }
        }
        names
    }

    /// Tool-call-id → tool-name pairing used to verify tool-result pairing
    /// survives a round-trip (spec §8).
    pub fn tool_call_pairing(&self) -> std::collections::BTreeMap<String, String> {
        let mut pairing = std::collections::BTreeMap::new();
        for message in &self.messages {
            for call in &message.tool_calls {
                pairing.insert(call.id.clone(), call.name.clone());
            }
        }
        pairing
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt: u64,
    pub completion: u64,
    pub cached: u64,
    pub reasoning: u64,
    pub cache_creation: u64,
}

impl TokenUsage {
    /// Folds in numbers from a later chunk. Streaming providers split usage
    /// across multiple events (e.g. Claude reports prompt tokens on
    /// `message_start` and completion tokens on `message_delta`); later,
    /// non-zero figures win per field rather than summing, since a
    /// provider's final usage event is typically a cumulative total.
    pub fn merge(&mut self, other: &TokenUsage) {
        if other.prompt != 0 {
            self.prompt = other.prompt;
        }
        if other.completion != 0 {
            self.completion = other.completion;
        }
        if other.cached != 0 {
            self.cached = other.cached;
        }
        if other.reasoning != 0 {
            self.reasoning = other.reasoning;
        }
        if other.cache_creation != 0 {
            self.cache_creation = other.cache_creation;
        }
    }
}

/// A single streamed delta in the hub's chunk shape, used internally by
/// the stream-transform pipeline before it is rendered to a specific wire
/// format.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StreamDelta {
    pub role: Option<Role>,
    pub content: Option<String>,
    pub tool_calls: Vec<StreamToolCallDelta>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamToolCallDelta {
    pub index: u32,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments_fragment: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors_set_role_and_text() {
        let m = ChatMessage::user("hi");
        assert_eq!(m.role, Role::User);
        assert_eq!(m.content.concatenated_text(), "hi");
    }

    #[test]
    fn concatenated_text_skips_placeholders() {
        let content = MessageContent::Parts(vec![
            ContentPart::Text("a".into()),
            ContentPart::UnsupportedPlaceholder("[image omitted]".into()),
            ContentPart::Text("b".into()),
        ]);
        assert_eq!(content.concatenated_text(), "ab");
    }

    #[test]
    fn tool_name_set_merges_defs_and_calls() {
        let req = ChatRequest {
            model: "m".into(),
            messages: vec![ChatMessage {
                role: Role::Assistant,
                content: MessageContent::Empty,
                tool_calls: vec![ToolCall {
                    id: "c1".into(),
                    name: "search".into(),
                    arguments: "{}".into(),
                }],
                tool_call_id: None,
                name: None,
                provider_meta: None,
            }],
            tools: vec![ToolDefinition {
                name: "lookup".into(),
                description: None,
                parameters: Value::Null,
            }],
            tool_choice: ToolChoice::default(),
            stream: false,
            temperature: None,
            max_tokens: None,
            top_p: None,
        };
        let names = req.tool_name_set();
        assert!(names.contains("search"));
        assert!(names.contains("lookup"));
    }
}
