//! Artifacts produced by a Fire Circle deliberation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::evaluator::Evaluation;
use crate::neutrosophic::NeutrosophicValue;
use crate::prompts::EvaluationPromptTag;

/// A single round's contributions.
#[derive(Debug, Clone)]
pub struct DialogueRound {
    pub round_number: u32,
    pub evaluations: Vec<Evaluation>,
    pub active_models: Vec<String>,
    pub empty_chair_model: Option<String>,
    pub prompt_used: EvaluationPromptTag,
    pub convergence_metric: f64,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// A pattern nominated by a model in Round 2 and scored for agreement in
/// Round 3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternObservation {
    pub pattern_type: String,
    pub first_observed_by: String,
    pub agreement_score: f64,
    pub round_discovered: u32,
}

/// A round-internal pair of evaluators whose falsehood scores differ by at
/// least 0.3 — retained as a first-class artifact, not discarded as noise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dissent {
    pub round_number: u32,
    pub model_a: String,
    pub model_b: String,
    pub f_delta: f64,
}

/// Summary metadata about how the deliberation concluded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FireCircleMetadata {
    pub quorum_valid: bool,
    pub total_duration_ms: u64,
    pub rounds_completed: u32,
    pub final_active_models: Vec<String>,
}

/// The complete output of a Fire Circle deliberation.
#[derive(Debug, Clone)]
pub struct FireCircleResult {
    pub id: uuid::Uuid,
    pub final_evaluations: Vec<Evaluation>,
    pub consensus: NeutrosophicValue,
    pub consensus_reasoning: String,
    pub dialogue_history: Vec<DialogueRound>,
    pub patterns: Vec<PatternObservation>,
    pub dissents: Vec<Dissent>,
    pub empty_chair_influence: f64,
    pub metadata: FireCircleMetadata,
}

impl FireCircleResult {
    pub fn quorum_valid(&self) -> bool {
        self.metadata.quorum_valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quorum_valid_reads_through_metadata() {
        let result = FireCircleResult {
            id: uuid::Uuid::nil(),
            final_evaluations: Vec::new(),
            consensus: NeutrosophicValue::neutral(),
            consensus_reasoning: String::new(),
            dialogue_history: Vec::new(),
            patterns: Vec::new(),
            dissents: Vec::new(),
            empty_chair_influence: 0.0,
            metadata: FireCircleMetadata {
                quorum_valid: false,
                total_duration_ms: 0,
                rounds_completed: 1,
                final_active_models: Vec::new(),
            },
        };
        assert!(!result.quorum_valid());
    }
}
