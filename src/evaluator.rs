//! Runs a layer through one evaluator model (or several) and returns
//! neutrosophic evaluations.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::cache::{cache_key, CacheEntry, CacheProvider};
use crate::config::{EvaluationConfig, EvaluationMode};
use crate::error::{Error, Result};
use crate::llm::{ChatMessage, LLMClient};
use crate::neutrosophic::NeutrosophicValue;
use crate::parser::parse_response;
use crate::prompts::{template_of, EvaluationPromptTag};

/// One evaluator's judgment of one layer, under one evaluation-prompt tag.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub value: NeutrosophicValue,
    pub reasoning: String,
    pub model_id: String,
    pub reasoning_trace: Option<String>,
}

/// Reasoning text used when the cache satisfies a request, per spec §8 S6.
pub const CACHED_REASONING: &str = "[CACHED]";

/// Reasoning text used when recursion depth is exhausted, per spec §4.5.
pub const RECURSION_LIMIT_REASONING: &str = "Recursion limit reached";

/// Builds the fixed outbound envelope sent to the evaluator model,
/// reproducing the exact structure of the original research pipeline's
/// request formatting: the evaluation-prompt template, the full context,
/// the layer under evaluation, and a schema reminder.
fn format_evaluation_request(tag: EvaluationPromptTag, context: &str, layer_content: &str) -> String {
    format!(
        "{template}\n\nFull Prompt Context:\n{context}\n\nLayer to Evaluate:\n{layer}\n\n\
Respond with a JSON object containing exactly these keys: truth, indeterminacy, falsehood \
(each a float between 0.0 and 1.0), and reasoning (a short string). Truth, Indeterminacy, \
and Falsehood are independent axes - a layer can be simultaneously truthful and indeterminate \
(productive contradiction is meaningful, not an error).",
        template = template_of(tag).trim(),
        context = context,
        layer = layer_content,
    )
}

/// Runs single/parallel-model evaluation over a layer. Fire Circle
/// deliberation (§4.6) is handled by [`crate::fire_circle::FireCircleEvaluator`]
/// and is not part of this type.
pub struct Evaluator {
    config: EvaluationConfig,
    client: Arc<dyn LLMClient>,
    cache: Option<Arc<dyn CacheProvider>>,
}

impl Evaluator {
    pub fn new(config: EvaluationConfig, client: Arc<dyn LLMClient>) -> Self {
        Self {
            config,
            client,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheProvider>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Evaluates `layer_content` under `tags` (an ensemble of one or more
    /// evaluation-prompt tags), calling each configured model once per tag.
    /// `depth` threads the recursion counter for self-referential
    /// evaluation; at `max_recursion_depth` a neutral placeholder is
    /// returned instead of dispatching any call.
    pub async fn evaluate_layer(
        &self,
        layer_content: &str,
        context: &str,
        tags: &[EvaluationPromptTag],
        depth: u32,
    ) -> Result<Vec<Evaluation>> {
        if depth >= self.config.max_recursion_depth {
            return Ok(vec![Evaluation {
                value: NeutrosophicValue::new(0.5, 0.5, 0.0),
                reasoning: RECURSION_LIMIT_REASONING.to_string(),
                model_id: "none".to_string(),
                reasoning_trace: None,
            }]);
        }

        let mut results = Vec::new();
        for tag in tags {
            let tag_results = match self.config.mode {
                EvaluationMode::Single => {
                    let model = self.first_model()?;
                    vec![self.evaluate_single(*tag, model, context, layer_content).await?]
                }
                EvaluationMode::Parallel => self.evaluate_parallel(*tag, context, layer_content).await?,
                EvaluationMode::FireCircle => {
                    return Err(Error::config(
                        "fire circle mode must be driven through FireCircleEvaluator, not Evaluator::evaluate_layer",
                    ))
                }
            };
            results.extend(tag_results);
        }
        Ok(results)
    }

    fn first_model(&self) -> Result<&str> {
        self.config
            .models
            .first()
            .map(|s| s.as_str())
            .ok_or_else(|| Error::config("no models configured"))
    }

    async fn cached(&self, key: &str) -> Option<CacheEntry> {
        match &self.cache {
            Some(cache) => cache.get(key).await.ok().flatten(),
            None => None,
        }
    }

    async fn store_cache(&self, key: &str, value: NeutrosophicValue, model: &str) {
        if let Some(cache) = &self.cache {
            let entry = CacheEntry::new(value, model, self.config.cache.ttl_seconds);
            if let Err(e) = cache.set(key, entry).await {
                warn!("failed to write evaluation cache entry: {e}");
            }
        }
    }

    async fn evaluate_single(
        &self,
        tag: EvaluationPromptTag,
        model: &str,
        context: &str,
        layer_content: &str,
    ) -> Result<Evaluation> {
        let prompt_text = template_of(tag);
        let key = cache_key(layer_content, context, prompt_text, model);

        if let Some(entry) = self.cached(&key).await {
            debug!("cache hit for model {model}, tag {tag}");
            return Ok(Evaluation {
                value: entry.value(),
                reasoning: CACHED_REASONING.to_string(),
                model_id: model.to_string(),
                reasoning_trace: None,
            });
        }
        debug!("cache miss for model {model}, tag {tag}");

        let evaluation = self.call_and_parse(tag, model, context, layer_content).await?;
        self.store_cache(&key, evaluation.value, model).await;
        Ok(evaluation)
    }

    /// Runs one evaluation-prompt tag across all configured models. Cache
    /// hits are resolved first (not dispatched); the remaining models fan
    /// out concurrently. Any failure among the dispatched models fails the
    /// whole call with an aggregated error naming every failing model.
    async fn evaluate_parallel(
        &self,
        tag: EvaluationPromptTag,
        context: &str,
        layer_content: &str,
    ) -> Result<Vec<Evaluation>> {
        let prompt_text = template_of(tag);
        let mut resolved = Vec::new();
        let mut pending_models = Vec::new();

        for model in &self.config.models {
            let key = cache_key(layer_content, context, prompt_text, model);
            if let Some(entry) = self.cached(&key).await {
                debug!("cache hit for model {model}, tag {tag}");
                resolved.push(Evaluation {
                    value: entry.value(),
                    reasoning: CACHED_REASONING.to_string(),
                    model_id: model.clone(),
                    reasoning_trace: None,
                });
            } else {
                pending_models.push(model.clone());
            }
        }

        let calls = pending_models
            .iter()
            .map(|model| self.call_and_parse(tag, model, context, layer_content));
        let outcomes: Vec<Result<Evaluation>> = join_all(calls).await;

        let mut failures = Vec::new();
        let mut successes = Vec::new();
        for (model, outcome) in pending_models.iter().zip(outcomes) {
            match outcome {
                Ok(evaluation) => successes.push(evaluation),
                Err(e) => failures.push(format!("{model}: {e}")),
            }
        }

        if !failures.is_empty() {
            return Err(Error::transport(
                pending_models.join(","),
                failures.join("; "),
            ));
        }

        for (model, evaluation) in pending_models.iter().zip(successes.iter()) {
            let key = cache_key(layer_content, context, prompt_text, model);
            self.store_cache(&key, evaluation.value, model).await;
        }

        resolved.extend(successes);
        Ok(resolved)
    }

    async fn call_and_parse(
        &self,
        tag: EvaluationPromptTag,
        model: &str,
        context: &str,
        layer_content: &str,
    ) -> Result<Evaluation> {
        let request_text = format_evaluation_request(tag, context, layer_content);
        let messages = vec![ChatMessage::user(request_text)];
        let response = self.client.call(model, &messages).await?;

        let (parsed, parse_trace) = parse_response(&response.text);
        if parse_trace.is_some() {
            warn!("parse error placeholder recorded for model {model}, tag {tag}");
        }
        let reasoning_trace = parse_trace.or(response.reasoning_trace);

        Ok(Evaluation {
            value: parsed.value,
            reasoning: parsed.reasoning,
            model_id: model.to_string(),
            reasoning_trace,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmResponse, Provider};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubClient {
        calls: AtomicUsize,
        response: String,
    }

    impl StubClient {
        fn new(response: impl Into<String>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                response: response.into(),
            }
        }
    }

    #[async_trait]
    impl LLMClient for StubClient {
        async fn call(&self, _model_id: &str, _messages: &[ChatMessage]) -> Result<LlmResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(LlmResponse {
                text: self.response.clone(),
                reasoning_trace: None,
            })
        }

        fn provider(&self) -> Provider {
            Provider::OpenRouter
        }
    }

    fn single_config(models: Vec<&str>) -> EvaluationConfig {
        EvaluationConfig::default()
            .with_mode(EvaluationMode::Single)
            .with_models(models.into_iter().map(String::from).collect())
    }

    #[tokio::test]
    async fn test_recursion_limit_returns_neutral_without_calling_client() {
        let client = Arc::new(StubClient::new("unused"));
        let config = single_config(vec!["model-a"]).with_max_recursion_depth(1);
        let evaluator = Evaluator::new(config, client.clone());

        let results = evaluator
            .evaluate_layer("hello", "ctx", &[EvaluationPromptTag::AyniRelational], 1)
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].reasoning, RECURSION_LIMIT_REASONING);
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_single_mode_calls_once_per_tag() {
        let client = Arc::new(StubClient::new(
            r#"{"truth": 0.7, "indeterminacy": 0.1, "falsehood": 0.1, "reasoning": "fine"}"#,
        ));
        let config = single_config(vec!["model-a"]);
        let evaluator = Evaluator::new(config, client.clone());

        let results = evaluator
            .evaluate_layer("hello", "ctx", &[EvaluationPromptTag::AyniRelational], 0)
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_parallel_mode_fails_fast_on_any_error() {
        struct FailingClient;
        #[async_trait]
        impl LLMClient for FailingClient {
            async fn call(&self, model_id: &str, _messages: &[ChatMessage]) -> Result<LlmResponse> {
                Err(Error::transport(model_id, "boom"))
            }
            fn provider(&self) -> Provider {
                Provider::OpenRouter
            }
        }

        let client = Arc::new(FailingClient);
        let config = EvaluationConfig::default()
            .with_mode(EvaluationMode::Parallel)
            .with_models(vec!["model-a".to_string(), "model-b".to_string()]);
        let evaluator = Evaluator::new(config, client);

        let result = evaluator
            .evaluate_layer("hello", "ctx", &[EvaluationPromptTag::AyniRelational], 0)
            .await;

        assert!(result.is_err());
    }
}
