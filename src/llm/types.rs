//! Wire types for the LLM adapter.

use serde::{Deserialize, Serialize};

/// Transport tag naming which provider backend a model id should be routed
/// through. The concrete HTTP transport is out of scope; this only
/// disambiguates request shaping and the structured-output capability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum Provider {
    OpenRouter,
    LmStudio,
    Anthropic,
    OpenAI,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenRouter => write!(f, "openrouter"),
            Self::LmStudio => write!(f, "lmstudio"),
            Self::Anthropic => write!(f, "anthropic"),
            Self::OpenAI => write!(f, "openai"),
        }
    }
}

/// A minimal model identity, just enough to route a call and name it in
/// error/trajectory output. Pricing/context-window metadata is out of scope
/// here — PromptGuard evaluates prompts, it does not manage a model catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub id: String,
    pub provider: Provider,
}

impl ModelSpec {
    pub fn new(id: impl Into<String>, provider: Provider) -> Self {
        Self {
            id: id.into(),
            provider,
        }
    }
}

/// Role of a message in the conversation sent to an evaluator model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A single message in the wire-format request sent to the LLM adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// The result of a single LLM call: the assistant text (with any `<think>`
/// block already stripped) and the extracted reasoning trace, if present.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub reasoning_trace: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_display() {
        assert_eq!(Provider::OpenRouter.to_string(), "openrouter");
        assert_eq!(Provider::LmStudio.to_string(), "lmstudio");
    }
}
