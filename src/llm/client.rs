//! LLM adapter trait and provider-backed implementations.
//!
//! The adapter's only contract is `call(model_id, messages) -> (text,
//! reasoning_trace?)`. `<think>...</think>` splitting happens here, once,
//! centrally, before text reaches any caller — it is never re-parsed
//! downstream.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::types::{ChatMessage, ChatRole, LlmResponse, Provider};

/// Configuration shared by provider-backed clients.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_key: String,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            timeout_secs: 30,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

fn build_http_client(timeout_secs: u64) -> Client {
    let timeout = Duration::from_secs(timeout_secs);
    match catch_unwind(AssertUnwindSafe(|| Client::builder().timeout(timeout).build())) {
        Ok(Ok(client)) => client,
        Ok(Err(_)) | Err(_) => Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()
            .expect("failed to build HTTP client"),
    }
}

fn think_tag_regex() -> Regex {
    Regex::new(r"(?s)<think>(.*?)</think>").expect("static regex is valid")
}

/// Splits a `<think>...</think>` block out of raw assistant text, returning
/// the enclosed content as the reasoning trace and the remainder as the
/// visible text.
fn split_reasoning_trace(raw: &str) -> LlmResponse {
    let re = think_tag_regex();
    if let Some(caps) = re.captures(raw) {
        let reasoning_trace = caps.get(1).map(|m| m.as_str().trim().to_string());
        let text = re.replace(raw, "").trim().to_string();
        LlmResponse {
            text,
            reasoning_trace,
        }
    } else {
        LlmResponse {
            text: raw.trim().to_string(),
            reasoning_trace: None,
        }
    }
}

/// Contract every LLM adapter honors: one model, one batch of messages, one
/// response. Retries, provider selection, and transport details are
/// implementation concerns of each client.
#[async_trait]
pub trait LLMClient: Send + Sync {
    async fn call(&self, model_id: &str, messages: &[ChatMessage]) -> Result<LlmResponse>;

    fn provider(&self) -> Provider;
}

// OpenRouter wire types (OpenAI-compatible chat completions surface).

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionMessage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionMessage {
    content: String,
}

fn role_str(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
    }
}

/// Client for OpenRouter's OpenAI-compatible chat completions API, the
/// transport PromptGuard's own research corpus uses by default.
pub struct OpenRouterClient {
    config: ClientConfig,
    http: Client,
    max_tokens: u32,
    temperature: f64,
}

impl OpenRouterClient {
    const DEFAULT_BASE_URL: &'static str = "https://openrouter.ai/api/v1";

    pub fn new(config: ClientConfig) -> Self {
        let http = build_http_client(config.timeout_secs);
        Self {
            config,
            http,
            max_tokens: 2000,
            temperature: 0.0,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    fn base_url(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(Self::DEFAULT_BASE_URL)
    }
}

#[async_trait]
impl LLMClient for OpenRouterClient {
    async fn call(&self, model_id: &str, messages: &[ChatMessage]) -> Result<LlmResponse> {
        let wire_messages: Vec<WireMessage> = messages
            .iter()
            .map(|m| WireMessage {
                role: role_str(m.role),
                content: &m.content,
            })
            .collect();

        let request = ChatCompletionRequest {
            model: model_id,
            messages: wire_messages,
            max_tokens: Some(self.max_tokens),
            temperature: Some(self.temperature),
        };

        let url = format!("{}/chat/completions", self.base_url());
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::transport(model_id, e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::transport(model_id, e.to_string()))?;

        if !status.is_success() {
            return Err(Error::transport(model_id, format!("HTTP {status}: {body}")));
        }

        let parsed: ChatCompletionResponse =
            serde_json::from_str(&body).map_err(|e| Error::transport(model_id, e.to_string()))?;

        let raw = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::transport(model_id, "empty choices array"))?;

        Ok(split_reasoning_trace(&raw))
    }

    fn provider(&self) -> Provider {
        Provider::OpenRouter
    }
}

/// Client for a local LM Studio server exposing the same OpenAI-compatible
/// surface, used for offline/self-hosted evaluation.
pub struct LmStudioClient {
    config: ClientConfig,
    http: Client,
    max_tokens: u32,
    temperature: f64,
}

impl LmStudioClient {
    const DEFAULT_BASE_URL: &'static str = "http://localhost:1234/v1";

    pub fn new(config: ClientConfig) -> Self {
        let http = build_http_client(config.timeout_secs);
        Self {
            config,
            http,
            max_tokens: 2000,
            temperature: 0.0,
        }
    }

    fn base_url(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(Self::DEFAULT_BASE_URL)
    }
}

#[async_trait]
impl LLMClient for LmStudioClient {
    async fn call(&self, model_id: &str, messages: &[ChatMessage]) -> Result<LlmResponse> {
        let wire_messages: Vec<WireMessage> = messages
            .iter()
            .map(|m| WireMessage {
                role: role_str(m.role),
                content: &m.content,
            })
            .collect();

        let request = ChatCompletionRequest {
            model: model_id,
            messages: wire_messages,
            max_tokens: Some(self.max_tokens),
            temperature: Some(self.temperature),
        };

        let url = format!("{}/chat/completions", self.base_url());
        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::transport(model_id, e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::transport(model_id, e.to_string()))?;

        if !status.is_success() {
            return Err(Error::transport(model_id, format!("HTTP {status}: {body}")));
        }

        let parsed: ChatCompletionResponse =
            serde_json::from_str(&body).map_err(|e| Error::transport(model_id, e.to_string()))?;

        let raw = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::transport(model_id, "empty choices array"))?;

        Ok(split_reasoning_trace(&raw))
    }

    fn provider(&self) -> Provider {
        Provider::LmStudio
    }
}

/// Unused API key placeholder accepted by [`ClientConfig::new`] when a
/// client (e.g. LM Studio) requires none.
pub const NO_API_KEY: &str = "";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_reasoning_trace_extracts_think_block() {
        let raw = "<think>internal deliberation</think>final answer";
        let resp = split_reasoning_trace(raw);
        assert_eq!(resp.text, "final answer");
        assert_eq!(resp.reasoning_trace.as_deref(), Some("internal deliberation"));
    }

    #[test]
    fn test_split_reasoning_trace_absent() {
        let raw = "just an answer";
        let resp = split_reasoning_trace(raw);
        assert_eq!(resp.text, "just an answer");
        assert!(resp.reasoning_trace.is_none());
    }

    #[test]
    fn test_split_reasoning_trace_multiline() {
        let raw = "<think>line one\nline two</think>{\"truth\": 0.5}";
        let resp = split_reasoning_trace(raw);
        assert_eq!(resp.text, "{\"truth\": 0.5}");
        assert!(resp.reasoning_trace.unwrap().contains("line two"));
    }
}
