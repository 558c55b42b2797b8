//! Wire format taxonomy and detection.
//!
//! A [`WireFormat`] tags the shape of an inbound or outbound chat-completion
//! body. The four client-facing formats (`OpenAI`, `Claude`, `Gemini`,
//! `OpenAiResponses`) are things a caller can legitimately send us; the
//! dialect formats (`Kiro`, `Copilot`, `Antigravity`, `Qwen`, `Iflow`) are
//! upstream-only targets a [`crate::translate::Registry`] can translate
//! *to* but never detects on the inbound side.

pub mod detect;
pub mod openai;

pub use detect::detect;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WireFormat {
    Openai,
    Claude,
    Gemini,
    OpenaiResponses,
    Kiro,
    Copilot,
    Antigravity,
    Qwen,
    Iflow,
}

impl WireFormat {
    /// Formats a caller may legitimately POST to us; the dialect targets
    /// are upstream-only and never returned by [`detect`].
    pub const CLIENT_FACING: [WireFormat; 4] = [
        WireFormat::Openai,
        WireFormat::Claude,
        WireFormat::Gemini,
        WireFormat::OpenaiResponses,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WireFormat::Openai => "OPENAI",
            WireFormat::Claude => "CLAUDE",
            WireFormat::Gemini => "GEMINI",
            WireFormat::OpenaiResponses => "OPENAI_RESPONSES",
            WireFormat::Kiro => "KIRO",
            WireFormat::Copilot => "COPILOT",
            WireFormat::Antigravity => "ANTIGRAVITY",
            WireFormat::Qwen => "QWEN",
            WireFormat::Iflow => "IFLOW",
        }
    }
}

impl std::fmt::Display for WireFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
