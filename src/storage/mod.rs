//! Persistent storage for Fire Circle deliberations.
//!
//! The storage contract is a superset of the research corpus's abstract
//! deliberation store: the original six query shapes (by attack, by
//! pattern, by dissent, single lookup, listing) plus two extensions this
//! engine adds — querying by participating model, and free-text search
//! over recorded reasoning.

mod schema;
mod sqlite_store;

pub use sqlite_store::SqliteDeliberationStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::fire_circle::types::{Dissent, FireCircleResult, PatternObservation};

/// One evaluator's contribution to a stored round, flattened from
/// [`crate::evaluator::Evaluation`] into a serializable shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvaluation {
    pub model_id: String,
    pub t: f64,
    pub i: f64,
    pub f: f64,
    pub reasoning: String,
}

/// One round of a stored deliberation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRound {
    pub round_number: u32,
    pub evaluations: Vec<StoredEvaluation>,
    pub active_models: Vec<String>,
    pub empty_chair_model: Option<String>,
}

/// The consensus evaluation a deliberation converged on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StoredConsensus {
    pub t: f64,
    pub i: f64,
    pub f: f64,
}

/// A complete Fire Circle deliberation as persisted for later research
/// queries: every round, every nominated pattern, every recorded dissent,
/// and the consensus the circle reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliberationRecord {
    pub fire_circle_id: String,
    pub timestamp: DateTime<Utc>,
    pub models: Vec<String>,
    pub attack_id: Option<String>,
    pub attack_category: Option<String>,
    pub rounds: Vec<StoredRound>,
    pub patterns: Vec<PatternObservation>,
    pub dissents: Vec<Dissent>,
    pub consensus: StoredConsensus,
    pub consensus_reasoning: String,
    pub empty_chair_influence: f64,
    pub quorum_valid: bool,
}

impl DeliberationRecord {
    /// Builds a storable record from a live deliberation result. Rounds
    /// only carry `model_id`/T/I/F/reasoning per evaluator — the richer
    /// [`crate::evaluator::Evaluation`] is not itself serializable.
    pub fn from_fire_circle_result(
        result: &FireCircleResult,
        models: Vec<String>,
        attack_id: Option<String>,
        attack_category: Option<String>,
    ) -> Self {
        let rounds = result
            .dialogue_history
            .iter()
            .map(|round| StoredRound {
                round_number: round.round_number,
                evaluations: round
                    .evaluations
                    .iter()
                    .map(|e| StoredEvaluation {
                        model_id: e.model_id.clone(),
                        t: e.value.t,
                        i: e.value.i,
                        f: e.value.f,
                        reasoning: e.reasoning.clone(),
                    })
                    .collect(),
                active_models: round.active_models.clone(),
                empty_chair_model: round.empty_chair_model.clone(),
            })
            .collect();

        Self {
            fire_circle_id: result.id.to_string(),
            timestamp: Utc::now(),
            models,
            attack_id,
            attack_category,
            rounds,
            patterns: result.patterns.clone(),
            dissents: result.dissents.clone(),
            consensus: StoredConsensus {
                t: result.consensus.t,
                i: result.consensus.i,
                f: result.consensus.f,
            },
            consensus_reasoning: result.consensus_reasoning.clone(),
            empty_chair_influence: result.empty_chair_influence,
            quorum_valid: result.metadata.quorum_valid,
        }
    }

    /// All reasoning text recorded across every round, concatenated for
    /// full-text indexing.
    pub fn all_reasoning_text(&self) -> String {
        let mut joined = self.consensus_reasoning.clone();
        for round in &self.rounds {
            for evaluation in &round.evaluations {
                joined.push('\n');
                joined.push_str(&evaluation.reasoning);
            }
        }
        joined
    }
}

/// Storage contract for Fire Circle deliberations.
#[async_trait]
pub trait DeliberationStorage: Send + Sync {
    /// Persists one deliberation. Overwrites any existing record with the
    /// same `fire_circle_id`.
    async fn store_deliberation(&self, record: DeliberationRecord) -> Result<()>;

    /// Fetches a single deliberation by id.
    async fn get_deliberation(&self, fire_circle_id: &str) -> Result<Option<DeliberationRecord>>;

    /// Deliberations tagged with the given attack category, most recent first.
    async fn query_by_attack(&self, attack_category: &str, limit: usize) -> Result<Vec<DeliberationRecord>>;

    /// Deliberations where a pattern of `pattern_type` was nominated with
    /// at least `min_agreement` agreement.
    async fn query_by_pattern(
        &self,
        pattern_type: &str,
        min_agreement: f64,
        limit: usize,
    ) -> Result<Vec<DeliberationRecord>>;

    /// Deliberations in which `model` participated.
    async fn query_by_model(&self, model: &str, limit: usize) -> Result<Vec<DeliberationRecord>>;

    /// Deliberations containing a recorded dissent of at least `min_f_delta`.
    async fn find_dissents(&self, min_f_delta: f64, limit: usize) -> Result<Vec<DeliberationRecord>>;

    /// Deliberations within `[start_date, end_date]` (either bound optional),
    /// most recent first.
    async fn list_deliberations(
        &self,
        start_date: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<DeliberationRecord>>;

    /// Full-text search over every round's recorded reasoning and the
    /// consensus reasoning.
    async fn search_reasoning(&self, query: &str, limit: usize) -> Result<Vec<DeliberationRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::Evaluation;
    use crate::fire_circle::types::{DialogueRound, FireCircleMetadata};
    use crate::neutrosophic::NeutrosophicValue;
    use crate::prompts::EvaluationPromptTag;

    fn sample_result() -> FireCircleResult {
        FireCircleResult {
            id: uuid::Uuid::nil(),
            final_evaluations: vec![Evaluation {
                value: NeutrosophicValue::new(0.7, 0.2, 0.1),
                reasoning: "balanced exchange".to_string(),
                model_id: "model-a".to_string(),
                reasoning_trace: None,
            }],
            consensus: NeutrosophicValue::new(0.7, 0.2, 0.1),
            consensus_reasoning: "converged on reciprocity".to_string(),
            dialogue_history: vec![DialogueRound {
                round_number: 1,
                evaluations: vec![Evaluation {
                    value: NeutrosophicValue::new(0.7, 0.2, 0.1),
                    reasoning: "balanced exchange".to_string(),
                    model_id: "model-a".to_string(),
                    reasoning_trace: None,
                }],
                active_models: vec!["model-a".to_string()],
                empty_chair_model: None,
                prompt_used: EvaluationPromptTag::AyniRelational,
                convergence_metric: 0.0,
                duration_ms: 5,
                timestamp: Utc::now(),
            }],
            patterns: Vec::new(),
            dissents: Vec::new(),
            empty_chair_influence: 0.0,
            metadata: FireCircleMetadata {
                quorum_valid: true,
                total_duration_ms: 5,
                rounds_completed: 1,
                final_active_models: vec!["model-a".to_string()],
            },
        }
    }

    #[test]
    fn test_from_fire_circle_result_flattens_rounds() {
        let record = DeliberationRecord::from_fire_circle_result(
            &sample_result(),
            vec!["model-a".to_string()],
            None,
            Some("jailbreak".to_string()),
        );
        assert_eq!(record.rounds.len(), 1);
        assert_eq!(record.rounds[0].evaluations[0].model_id, "model-a");
        assert_eq!(record.attack_category.as_deref(), Some("jailbreak"));
    }

    #[test]
    fn test_all_reasoning_text_includes_consensus_and_rounds() {
        let record = DeliberationRecord::from_fire_circle_result(
            &sample_result(),
            vec!["model-a".to_string()],
            None,
            None,
        );
        let text = record.all_reasoning_text();
        assert!(text.contains("converged on reciprocity"));
        assert!(text.contains("balanced exchange"));
    }
}
