//! Configuration structs for evaluation, caching, Fire Circle, and the pipeline.

use serde::{Deserialize, Serialize};

use crate::llm::Provider;

/// How an evaluation is carried out across models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvaluationMode {
    /// One model evaluates each layer.
    Single,
    /// All configured models evaluate each layer independently; results aggregate.
    Parallel,
    /// Models deliberate over multiple rounds (see [`crate::fire_circle`]).
    FireCircle,
}

impl Default for EvaluationMode {
    fn default() -> Self {
        Self::Single
    }
}

/// Top-level configuration for an [`crate::evaluator::Evaluator`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    pub mode: EvaluationMode,
    pub provider: Provider,
    pub models: Vec<String>,
    pub max_recursion_depth: u32,
    pub max_tokens: u32,
    pub temperature: f64,
    pub timeout_seconds: u64,
    pub cache: CacheConfig,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            mode: EvaluationMode::default(),
            provider: Provider::OpenRouter,
            models: vec!["anthropic/claude-3.5-sonnet".to_string()],
            max_recursion_depth: 3,
            max_tokens: 2000,
            temperature: 0.0,
            timeout_seconds: 30,
            cache: CacheConfig::default(),
        }
    }
}

impl EvaluationConfig {
    pub fn with_mode(mut self, mode: EvaluationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.models = models;
        self
    }

    pub fn with_max_recursion_depth(mut self, depth: u32) -> Self {
        self.max_recursion_depth = depth;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_timeout_seconds(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Validates provider/model/cache consistency, mirroring the teacher's
    /// `ClientConfig` construction-time checks.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.models.is_empty() {
            return Err(crate::error::Error::config(
                "at least one model must be configured",
            ));
        }
        if matches!(self.mode, EvaluationMode::FireCircle) && self.models.len() < 2 {
            return Err(crate::error::Error::config(
                "fire circle mode requires at least two models",
            ));
        }
        Ok(())
    }
}

/// Cache backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheBackend {
    Memory,
    Disk,
}

impl Default for CacheBackend {
    fn default() -> Self {
        Self::Memory
    }
}

/// Configuration for the evaluation response cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub backend: CacheBackend,
    pub location: Option<String>,
    pub max_size_mb: u64,
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: CacheBackend::Memory,
            location: None,
            max_size_mb: 100,
            ttl_seconds: 86_400,
        }
    }
}

impl CacheConfig {
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_backend(mut self, backend: CacheBackend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_max_size_mb(mut self, max_size_mb: u64) -> Self {
        self.max_size_mb = max_size_mb;
        self
    }

    pub fn with_ttl_seconds(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }
}

/// How a stalled Fire Circle round should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FireCircleFailureMode {
    /// Continue with whichever models responded, as long as quorum holds.
    ContinueWithQuorum,
    /// Abort the deliberation entirely if any model fails to respond.
    AbortOnAnyFailure,
}

impl Default for FireCircleFailureMode {
    fn default() -> Self {
        Self::ContinueWithQuorum
    }
}

/// Configuration for a Fire Circle deliberation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FireCircleConfig {
    pub models: Vec<String>,
    pub max_rounds: u32,
    pub min_viable_circle: usize,
    pub failure_mode: FireCircleFailureMode,
    /// Minimum agreement score (`agreeing_count / active_models`) a Round 2
    /// pattern nomination must reach in Round 3 to be exported.
    pub pattern_threshold: f64,
}

impl Default for FireCircleConfig {
    fn default() -> Self {
        Self {
            models: Vec::new(),
            max_rounds: 3,
            min_viable_circle: 2,
            failure_mode: FireCircleFailureMode::default(),
            pattern_threshold: 0.5,
        }
    }
}

impl FireCircleConfig {
    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.models = models;
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds.min(3);
        self
    }

    pub fn with_min_viable_circle(mut self, min_viable_circle: usize) -> Self {
        self.min_viable_circle = min_viable_circle;
        self
    }

    pub fn with_failure_mode(mut self, failure_mode: FireCircleFailureMode) -> Self {
        self.failure_mode = failure_mode;
        self
    }

    pub fn with_pattern_threshold(mut self, pattern_threshold: f64) -> Self {
        self.pattern_threshold = pattern_threshold;
        self
    }

    pub fn circle_size(&self) -> usize {
        self.models.len()
    }
}

/// Which stages of the pre/post pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineMode {
    /// No evaluation at all; response is generated and recorded unmodified.
    Baseline,
    /// Evaluate the prompt before generation only.
    Pre,
    /// Evaluate the response after generation only.
    Post,
    /// Evaluate both prompt and response, and compute deltas.
    Both,
}

impl Default for PipelineMode {
    fn default() -> Self {
        Self::Both
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub mode: PipelineMode,
    pub evaluation: EvaluationConfig,
    pub record_ground_truth: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: PipelineMode::default(),
            evaluation: EvaluationConfig::default(),
            record_ground_truth: false,
        }
    }
}

impl PipelineConfig {
    pub fn with_mode(mut self, mode: PipelineMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_evaluation(mut self, evaluation: EvaluationConfig) -> Self {
        self.evaluation = evaluation;
        self
    }

    pub fn with_record_ground_truth(mut self, record_ground_truth: bool) -> Self {
        self.record_ground_truth = record_ground_truth;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluation_config_defaults_are_valid() {
        let cfg = EvaluationConfig::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_fire_circle_requires_two_models() {
        let cfg = EvaluationConfig::default()
            .with_mode(EvaluationMode::FireCircle)
            .with_models(vec!["only-one".to_string()]);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_fire_circle_max_rounds_clamped() {
        let cfg = FireCircleConfig::default().with_max_rounds(10);
        assert_eq!(cfg.max_rounds, 3);
    }

    #[test]
    fn test_builder_chain() {
        let cfg = CacheConfig::default()
            .with_backend(CacheBackend::Disk)
            .with_location("/tmp/promptguard-cache")
            .with_max_size_mb(50);
        assert_eq!(cfg.backend, CacheBackend::Disk);
        assert_eq!(cfg.max_size_mb, 50);
        assert_eq!(cfg.location.as_deref(), Some("/tmp/promptguard-cache"));
    }
}
