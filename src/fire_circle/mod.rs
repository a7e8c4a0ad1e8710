//! Three-round multi-model dialogue with empty-chair rotation, resilient
//! quorum, pattern emergence, and consensus synthesis.

pub mod types;

pub use types::{DialogueRound, Dissent, FireCircleMetadata, FireCircleResult, PatternObservation};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tracing::{info, warn};

use crate::config::{FireCircleConfig, FireCircleFailureMode};
use crate::error::Result;
use crate::evaluator::Evaluation;
use crate::llm::{ChatMessage, LLMClient};
use crate::neutrosophic::NeutrosophicValue;
use crate::parser::parse_response;
use crate::prompts::{template_of, EvaluationPromptTag};

const DISSENT_THRESHOLD: f64 = 0.3;
const MAX_ROUNDS: u32 = 3;

fn is_parse_failure(evaluation: &Evaluation) -> bool {
    evaluation.reasoning.starts_with("[PARSE_ERROR:")
}

/// Evaluations eligible to feed a consensus: dropped models' parse-error
/// placeholders are excluded so a synthetic `(T=0.5, I=1.0, F=0.5)` never
/// dominates `max F` or gets selected as the highest-F consensus reasoning.
/// `round.evaluations` itself is left untouched — it is the verbatim
/// transcript, placeholders included, for dialogue history.
fn surviving_evaluations(evaluations: &[Evaluation], active: &[String]) -> Vec<Evaluation> {
    evaluations
        .iter()
        .filter(|e| active.contains(&e.model_id) && !is_parse_failure(e))
        .cloned()
        .collect()
}

fn stddev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Drives a Fire Circle deliberation over a single layer.
pub struct FireCircleEvaluator {
    config: FireCircleConfig,
    client: Arc<dyn LLMClient>,
}

impl FireCircleEvaluator {
    pub fn new(config: FireCircleConfig, client: Arc<dyn LLMClient>) -> Self {
        Self { config, client }
    }

    /// Deterministic round-robin chair assignment by sorted model id: each
    /// of the first three participants serves once across the three rounds.
    fn chair_for_round(&self, round_number: u32, active: &[String]) -> Option<String> {
        let mut sorted: Vec<&String> = self.config.models.iter().collect();
        sorted.sort();
        if sorted.len() < 3 {
            return None;
        }
        let candidate = sorted.get((round_number - 1) as usize)?;
        if active.contains(candidate) {
            Some((*candidate).clone())
        } else {
            None
        }
    }

    async fn call_model(
        &self,
        model: &str,
        tag: EvaluationPromptTag,
        prompt_body: &str,
    ) -> Result<(Evaluation, Vec<String>)> {
        let messages = vec![ChatMessage::user(prompt_body.to_string())];
        let response = self.client.call(model, &messages).await?;
        let (parsed, parse_trace) = parse_response(&response.text);
        let reasoning_trace = parse_trace.or(response.reasoning_trace);
        let _ = tag;
        let evaluation = Evaluation {
            value: parsed.value,
            reasoning: parsed.reasoning,
            model_id: model.to_string(),
            reasoning_trace,
        };
        Ok((evaluation, parsed.patterns_observed))
    }

    fn round1_prompt(&self, tag: EvaluationPromptTag, context: &str, layer_content: &str) -> String {
        format!(
            "{template}\n\nFull Prompt Context:\n{context}\n\nLayer to Evaluate:\n{layer}\n\n\
This is Round 1 of a Fire Circle deliberation. Evaluate independently, without knowledge of \
other participants. Respond with JSON: truth, indeterminacy, falsehood, reasoning.",
            template = template_of(tag).trim(),
            context = context,
            layer = layer_content,
        )
    }

    fn transcript(round: &DialogueRound) -> String {
        round
            .evaluations
            .iter()
            .map(|e| {
                format!(
                    "- {} (T={:.2}, I={:.2}, F={:.2}): {}",
                    e.model_id, e.value.t, e.value.i, e.value.f, e.reasoning
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn round2_prompt(
        &self,
        tag: EvaluationPromptTag,
        context: &str,
        layer_content: &str,
        round1: &DialogueRound,
        is_chair: bool,
    ) -> String {
        let chair_clause = if is_chair {
            "\n\nYou have been asked to sit in the empty chair this round: voice concerns about \
             this layer that no other participant raised in Round 1."
        } else {
            ""
        };
        format!(
            "{template}\n\nFull Prompt Context:\n{context}\n\nLayer to Evaluate:\n{layer}\n\n\
This is Round 2 of a Fire Circle deliberation. Round 1 transcripts:\n{transcript}\n\n\
You may revise your own truth/indeterminacy/falsehood in light of what others observed. Also \
name zero or more short patterns you observe (patterns_observed).{chair_clause}\n\n\
Respond with JSON: truth, indeterminacy, falsehood, reasoning, patterns_observed (array of strings).",
            template = template_of(tag).trim(),
            context = context,
            layer = layer_content,
            transcript = Self::transcript(round1),
            chair_clause = chair_clause,
        )
    }

    fn round3_prompt(
        &self,
        tag: EvaluationPromptTag,
        context: &str,
        layer_content: &str,
        round1: &DialogueRound,
        round2: &DialogueRound,
        candidate_patterns: &[String],
    ) -> String {
        format!(
            "{template}\n\nFull Prompt Context:\n{context}\n\nLayer to Evaluate:\n{layer}\n\n\
This is Round 3 (consensus synthesis) of a Fire Circle deliberation.\n\nRound 1:\n{r1}\n\n\
Round 2:\n{r2}\n\nPatterns nominated so far: {patterns}\n\n\
State your final truth/indeterminacy/falsehood and which nominated patterns you agree have \
reached consensus (patterns_observed).\n\n\
Respond with JSON: truth, indeterminacy, falsehood, reasoning, patterns_observed (array of strings).",
            template = template_of(tag).trim(),
            context = context,
            layer = layer_content,
            r1 = Self::transcript(round1),
            r2 = Self::transcript(round2),
            patterns = candidate_patterns.join(", "),
        )
    }

    fn record_dissents(round_number: u32, evaluations: &[Evaluation]) -> Vec<Dissent> {
        let mut dissents = Vec::new();
        for i in 0..evaluations.len() {
            for j in (i + 1)..evaluations.len() {
                let delta = (evaluations[i].value.f - evaluations[j].value.f).abs();
                if delta >= DISSENT_THRESHOLD {
                    dissents.push(Dissent {
                        round_number,
                        model_a: evaluations[i].model_id.clone(),
                        model_b: evaluations[j].model_id.clone(),
                        f_delta: delta,
                    });
                }
            }
        }
        dissents
    }

    /// Runs the full three-round deliberation.
    pub async fn deliberate(
        &self,
        tag: EvaluationPromptTag,
        context: &str,
        layer_content: &str,
    ) -> Result<FireCircleResult> {
        let start = Utc::now();
        let mut active: Vec<String> = self.config.models.clone();
        let mut history: Vec<DialogueRound> = Vec::new();
        let mut all_dissents = Vec::new();
        let mut pattern_nominations: HashMap<String, (String, u32)> = HashMap::new();
        let mut quorum_valid = true;

        // Round 1 — independent baseline. One task per active model, fanned
        // out concurrently, with a single join barrier before round 2.
        let round_start = Utc::now();
        let prompt = self.round1_prompt(tag, context, layer_content);
        let calls = active.iter().map(|model| self.call_model(model, tag, &prompt));
        let outcomes = join_all(calls).await;

        let mut round1_evals = Vec::new();
        let mut dropped = HashSet::new();
        for (model, outcome) in active.iter().zip(outcomes) {
            match outcome {
                Ok((evaluation, _patterns)) => {
                    if is_parse_failure(&evaluation) {
                        warn!("model {model} failed to produce a parseable evaluation in round 1");
                        dropped.insert(model.clone());
                    }
                    round1_evals.push(evaluation);
                }
                Err(e) => {
                    if matches!(self.config.failure_mode, FireCircleFailureMode::AbortOnAnyFailure) {
                        return Err(e);
                    }
                    warn!("model {model} failed in round 1: {e}");
                    dropped.insert(model.clone());
                }
            }
        }
        active.retain(|m| !dropped.contains(m));
        all_dissents.extend(Self::record_dissents(1, &round1_evals));
        let chair1 = self.chair_for_round(1, &active);
        let f_values: Vec<f64> = round1_evals.iter().map(|e| e.value.f).collect();
        let round1 = DialogueRound {
            round_number: 1,
            evaluations: round1_evals,
            active_models: active.clone(),
            empty_chair_model: chair1,
            prompt_used: tag,
            convergence_metric: stddev(&f_values),
            duration_ms: (Utc::now() - round_start).num_milliseconds().max(0) as u64,
            timestamp: Utc::now(),
        };
        history.push(round1.clone());

        if active.len() < self.config.min_viable_circle {
            quorum_valid = false;
            return Ok(self.finish(
                &mut Vec::<Evaluation>::new(),
                history,
                Vec::new(),
                all_dissents,
                active,
                start,
                quorum_valid,
            ));
        }

        // Round 2 — dialogue with pattern nomination. Concurrent fan-out,
        // single join barrier before round 3.
        let round_start = Utc::now();
        let chair2 = self.chair_for_round(2, &active);
        let round2_prompts: Vec<String> = active
            .iter()
            .map(|model| {
                let is_chair = chair2.as_deref() == Some(model.as_str());
                self.round2_prompt(tag, context, layer_content, &round1, is_chair)
            })
            .collect();
        let calls = active
            .iter()
            .zip(round2_prompts.iter())
            .map(|(model, prompt)| self.call_model(model, tag, prompt));
        let outcomes = join_all(calls).await;

        let mut round2_evals = Vec::new();
        let mut dropped = HashSet::new();
        for (model, outcome) in active.iter().zip(outcomes) {
            match outcome {
                Ok((evaluation, patterns)) => {
                    if is_parse_failure(&evaluation) {
                        dropped.insert(model.clone());
                    } else {
                        for pattern in patterns {
                            pattern_nominations
                                .entry(pattern)
                                .or_insert_with(|| (model.clone(), 2));
                        }
                    }
                    round2_evals.push(evaluation);
                }
                Err(e) => {
                    if matches!(self.config.failure_mode, FireCircleFailureMode::AbortOnAnyFailure) {
                        return Err(e);
                    }
                    warn!("model {model} failed in round 2: {e}");
                    dropped.insert(model.clone());
                }
            }
        }
        active.retain(|m| !dropped.contains(m));
        all_dissents.extend(Self::record_dissents(2, &round2_evals));
        let f_values: Vec<f64> = round2_evals.iter().map(|e| e.value.f).collect();
        let round2 = DialogueRound {
            round_number: 2,
            evaluations: round2_evals,
            active_models: active.clone(),
            empty_chair_model: chair2,
            prompt_used: tag,
            convergence_metric: stddev(&f_values),
            duration_ms: (Utc::now() - round_start).num_milliseconds().max(0) as u64,
            timestamp: Utc::now(),
        };
        history.push(round2.clone());

        if active.len() < self.config.min_viable_circle {
            quorum_valid = false;
            let mut surviving = surviving_evaluations(&round2.evaluations, &active);
            return Ok(self.finish(
                &mut surviving,
                history,
                Vec::new(),
                all_dissents,
                active,
                start,
                quorum_valid,
            ));
        }

        // Round 3 — consensus synthesis. Concurrent fan-out.
        let candidate_patterns: Vec<String> = pattern_nominations.keys().cloned().collect();
        let round_start = Utc::now();
        let prompt =
            self.round3_prompt(tag, context, layer_content, &round1, &round2, &candidate_patterns);
        let calls = active.iter().map(|model| self.call_model(model, tag, &prompt));
        let outcomes = join_all(calls).await;

        let mut round3_evals = Vec::new();
        let mut dropped = HashSet::new();
        let mut pattern_agreement_round3: HashMap<String, usize> = HashMap::new();
        for (model, outcome) in active.iter().zip(outcomes) {
            match outcome {
                Ok((evaluation, patterns)) => {
                    if is_parse_failure(&evaluation) {
                        dropped.insert(model.clone());
                    } else {
                        for pattern in patterns {
                            *pattern_agreement_round3.entry(pattern).or_insert(0) += 1;
                        }
                    }
                    round3_evals.push(evaluation);
                }
                Err(e) => {
                    if matches!(self.config.failure_mode, FireCircleFailureMode::AbortOnAnyFailure) {
                        return Err(e);
                    }
                    warn!("model {model} failed in round 3: {e}");
                    dropped.insert(model.clone());
                }
            }
        }
        active.retain(|m| !dropped.contains(m));
        all_dissents.extend(Self::record_dissents(3, &round3_evals));
        if active.len() < self.config.min_viable_circle {
            quorum_valid = false;
        }
        let chair3 = self.chair_for_round(3, &active);
        let f_values: Vec<f64> = round3_evals.iter().map(|e| e.value.f).collect();
        let round3 = DialogueRound {
            round_number: 3,
            evaluations: round3_evals.clone(),
            active_models: active.clone(),
            empty_chair_model: chair3,
            prompt_used: tag,
            convergence_metric: stddev(&f_values),
            duration_ms: (Utc::now() - round_start).num_milliseconds().max(0) as u64,
            timestamp: Utc::now(),
        };
        history.push(round3);

        // Patterns agreeing >= pattern_threshold proportion of round-3 active models are exported.
        let agreement_denominator = active.len().max(1) as f64;
        let patterns: Vec<PatternObservation> = pattern_nominations
            .into_iter()
            .map(|(pattern_type, (first_observed_by, round_discovered))| {
                let agreeing = *pattern_agreement_round3.get(&pattern_type).unwrap_or(&0) as f64;
                let agreement_score = agreeing / agreement_denominator;
                PatternObservation {
                    pattern_type,
                    first_observed_by,
                    agreement_score,
                    round_discovered,
                }
            })
            .filter(|p| p.agreement_score >= self.config.pattern_threshold)
            .collect();

        info!(
            "fire circle deliberation complete: {} rounds, {} active models, quorum_valid={}",
            history.len(),
            active.len(),
            quorum_valid
        );

        let mut surviving = surviving_evaluations(&round3_evals, &active);
        Ok(self.finish(
            &mut surviving,
            history,
            patterns,
            all_dissents,
            active,
            start,
            quorum_valid,
        ))
    }

    fn finish(
        &self,
        final_evaluations: &mut Vec<Evaluation>,
        history: Vec<DialogueRound>,
        patterns: Vec<PatternObservation>,
        dissents: Vec<Dissent>,
        final_active: Vec<String>,
        start: chrono::DateTime<Utc>,
        quorum_valid: bool,
    ) -> FireCircleResult {
        let consensus = NeutrosophicValue::aggregate(final_evaluations.iter().map(|e| &e.value));
        let consensus_reasoning = final_evaluations
            .iter()
            .max_by(|a, b| a.value.f.partial_cmp(&b.value.f).unwrap())
            .map(|e| e.reasoning.clone())
            .unwrap_or_default();

        let empty_chair_influence = Self::empty_chair_influence(&history);

        FireCircleResult {
            id: uuid::Uuid::new_v4(),
            final_evaluations: std::mem::take(final_evaluations),
            consensus,
            consensus_reasoning,
            dialogue_history: history.clone(),
            patterns,
            dissents,
            empty_chair_influence,
            metadata: FireCircleMetadata {
                quorum_valid,
                total_duration_ms: (Utc::now() - start).num_milliseconds().max(0) as u64,
                rounds_completed: history.len() as u32,
                final_active_models: final_active,
            },
        }
    }

    /// Mean delta in F-score between chair-round evaluations and non-chair
    /// evaluations in the same round.
    fn empty_chair_influence(history: &[DialogueRound]) -> f64 {
        let mut deltas = Vec::new();
        for round in history {
            let Some(chair) = &round.empty_chair_model else {
                continue;
            };
            let chair_f: Vec<f64> = round
                .evaluations
                .iter()
                .filter(|e| &e.model_id == chair)
                .map(|e| e.value.f)
                .collect();
            let other_f: Vec<f64> = round
                .evaluations
                .iter()
                .filter(|e| &e.model_id != chair)
                .map(|e| e.value.f)
                .collect();
            if chair_f.is_empty() || other_f.is_empty() {
                continue;
            }
            let chair_mean = chair_f.iter().sum::<f64>() / chair_f.len() as f64;
            let other_mean = other_f.iter().sum::<f64>() / other_f.len() as f64;
            deltas.push(chair_mean - other_mean);
        }
        if deltas.is_empty() {
            0.0
        } else {
            deltas.iter().sum::<f64>() / deltas.len() as f64
        }
    }

    /// Max rounds this circle is configured to run (always ≤ 3).
    pub fn max_rounds(&self) -> u32 {
        self.config.max_rounds.min(MAX_ROUNDS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmResponse, Provider};
    use async_trait::async_trait;

    struct ScriptedClient {
        // maps model id -> canned response text
        scripts: HashMap<String, String>,
    }

    #[async_trait]
    impl LLMClient for ScriptedClient {
        async fn call(&self, model_id: &str, _messages: &[ChatMessage]) -> Result<LlmResponse> {
            let text = self
                .scripts
                .get(model_id)
                .cloned()
                .unwrap_or_else(|| "malformed".to_string());
            Ok(LlmResponse {
                text,
                reasoning_trace: None,
            })
        }

        fn provider(&self) -> Provider {
            Provider::OpenRouter
        }
    }

    fn good_response(f: f64) -> String {
        format!(
            r#"{{"truth": 0.6, "indeterminacy": 0.2, "falsehood": {f}, "reasoning": "consistent"}}"#
        )
    }

    #[tokio::test]
    async fn test_parse_resilience_drops_malformed_model_and_keeps_quorum() {
        let mut scripts = HashMap::new();
        scripts.insert("model-a".to_string(), good_response(0.1));
        scripts.insert("model-b".to_string(), good_response(0.15));
        scripts.insert("model-c".to_string(), "not json at all".to_string());

        let client = Arc::new(ScriptedClient { scripts });
        let config = FireCircleConfig::default()
            .with_models(vec![
                "model-a".to_string(),
                "model-b".to_string(),
                "model-c".to_string(),
            ])
            .with_min_viable_circle(2);
        let evaluator = FireCircleEvaluator::new(config, client);

        let result = evaluator
            .deliberate(EvaluationPromptTag::AyniRelational, "ctx", "layer text")
            .await
            .unwrap();

        assert!(result.quorum_valid());
        assert!(!result.metadata.final_active_models.contains(&"model-c".to_string()));
    }

    #[tokio::test]
    async fn test_quorum_lost_when_too_many_drop() {
        let mut scripts = HashMap::new();
        scripts.insert("model-a".to_string(), good_response(0.1));
        scripts.insert("model-b".to_string(), "garbage".to_string());

        let client = Arc::new(ScriptedClient { scripts });
        let config = FireCircleConfig::default()
            .with_models(vec!["model-a".to_string(), "model-b".to_string()])
            .with_min_viable_circle(2);
        let evaluator = FireCircleEvaluator::new(config, client);

        let result = evaluator
            .deliberate(EvaluationPromptTag::AyniRelational, "ctx", "layer text")
            .await
            .unwrap();

        assert!(!result.quorum_valid());
    }

    /// Succeeds on its first two calls per model, then returns an
    /// unparseable response from the third call onward — simulates a model
    /// that only breaks down in round 3, after contributing clean rounds 1/2.
    struct DegradingClient {
        scripts: HashMap<String, String>,
        fails_after: HashMap<String, u32>,
        call_counts: std::sync::Mutex<HashMap<String, u32>>,
    }

    #[async_trait]
    impl LLMClient for DegradingClient {
        async fn call(&self, model_id: &str, _messages: &[ChatMessage]) -> Result<LlmResponse> {
            let mut counts = self.call_counts.lock().unwrap();
            let count = counts.entry(model_id.to_string()).or_insert(0);
            *count += 1;
            let limit = self.fails_after.get(model_id).copied();
            let text = if limit.is_some_and(|limit| *count > limit) {
                "not json at all".to_string()
            } else {
                self.scripts
                    .get(model_id)
                    .cloned()
                    .unwrap_or_else(|| "malformed".to_string())
            };
            Ok(LlmResponse {
                text,
                reasoning_trace: None,
            })
        }

        fn provider(&self) -> Provider {
            Provider::OpenRouter
        }
    }

    #[tokio::test]
    async fn test_round3_dropout_placeholder_excluded_from_consensus() {
        let mut scripts = HashMap::new();
        scripts.insert("model-a".to_string(), good_response(0.1));
        scripts.insert("model-b".to_string(), good_response(0.15));
        scripts.insert("model-c".to_string(), good_response(0.2));
        let mut fails_after = HashMap::new();
        fails_after.insert("model-c".to_string(), 2);

        let client = Arc::new(DegradingClient {
            scripts,
            fails_after,
            call_counts: std::sync::Mutex::new(HashMap::new()),
        });
        let config = FireCircleConfig::default()
            .with_models(vec![
                "model-a".to_string(),
                "model-b".to_string(),
                "model-c".to_string(),
            ])
            .with_min_viable_circle(2);
        let evaluator = FireCircleEvaluator::new(config, client);

        let result = evaluator
            .deliberate(EvaluationPromptTag::AyniRelational, "ctx", "layer text")
            .await
            .unwrap();

        assert!(result.quorum_valid());
        assert!(!result.metadata.final_active_models.contains(&"model-c".to_string()));
        // Without the surviving-evaluations filter, model-c's dropped round-3
        // placeholder (F=0.5) would dominate the max-F consensus aggregate.
        assert!((result.consensus.f - 0.15).abs() < 1e-9, "f={}", result.consensus.f);
        assert!(!result.consensus_reasoning.starts_with("[PARSE_ERROR:"));
    }

    #[tokio::test]
    async fn test_dissent_detected_for_large_f_delta() {
        let mut scripts = HashMap::new();
        scripts.insert("model-a".to_string(), good_response(0.05));
        scripts.insert("model-b".to_string(), good_response(0.9));

        let client = Arc::new(ScriptedClient { scripts });
        let config = FireCircleConfig::default()
            .with_models(vec!["model-a".to_string(), "model-b".to_string()])
            .with_min_viable_circle(2);
        let evaluator = FireCircleEvaluator::new(config, client);

        let result = evaluator
            .deliberate(EvaluationPromptTag::AyniRelational, "ctx", "layer text")
            .await
            .unwrap();

        assert!(!result.dissents.is_empty());
    }
}
