//! LLM adapter: a single operation, `call(model, messages) -> (text, reasoning_trace?)`.
//!
//! Retries, provider selection, and concrete transport are left to each
//! client implementation; everything above this module only depends on the
//! [`LLMClient`] trait.

mod client;
mod types;

pub use client::{ClientConfig, LLMClient, LmStudioClient, OpenRouterClient, NO_API_KEY};
pub use types::{ChatMessage, ChatRole, LlmResponse, ModelSpec, Provider};
