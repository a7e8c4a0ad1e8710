//! Trajectory event types for observable pipeline execution.
//!
//! The trajectory system provides a stream of events that can be rendered
//! differently depending on the deployment context:
//! - CLI: streaming text output for `--verbose` runs
//! - Dashboard: structured panel updates
//! - Research: JSONL export for offline analysis alongside recorded
//!   evaluations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Types of trajectory events emitted during evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrajectoryEventType {
    /// A pipeline run started (baseline/pre/post/both).
    PipelineStart,
    /// Pre-response evaluation of a layered prompt started.
    PreEvaluate,
    /// Post-response evaluation of generated text started.
    PostEvaluate,
    /// Cache lookup hit, evaluation served without a model call.
    CacheHit,
    /// Cache lookup missed, an evaluation will be dispatched.
    CacheMiss,
    /// A request was dispatched to an LLM client.
    LlmDispatch,
    /// An LLM response was received.
    LlmResponse,
    /// Structured/free-form parsing of a model response failed and fell
    /// back to the neutral placeholder.
    ParseFallback,
    /// A Fire Circle dialogue round completed.
    FireCircleRound,
    /// The Fire Circle empty chair rotated to a new model.
    EmptyChairRotate,
    /// Fire Circle quorum was lost or restored.
    QuorumChange,
    /// Fire Circle consensus was reached.
    ConsensusReached,
    /// A structural or classification violation was detected.
    ViolationDetected,
    /// A pre- or post-evaluation decision was made (pass/block/flag/accept/reject).
    DecisionMade,
    /// Session trust trajectory was updated after a turn.
    TrustUpdated,
    /// A deliberation or evaluation record was persisted.
    RecordPersisted,
    /// An error occurred.
    Error,
    /// The pipeline run completed.
    PipelineEnd,
}

impl std::fmt::Display for TrajectoryEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PipelineStart => "PIPELINE_START",
            Self::PreEvaluate => "PRE_EVALUATE",
            Self::PostEvaluate => "POST_EVALUATE",
            Self::CacheHit => "CACHE_HIT",
            Self::CacheMiss => "CACHE_MISS",
            Self::LlmDispatch => "LLM_DISPATCH",
            Self::LlmResponse => "LLM_RESPONSE",
            Self::ParseFallback => "PARSE_FALLBACK",
            Self::FireCircleRound => "FIRE_CIRCLE_ROUND",
            Self::EmptyChairRotate => "EMPTY_CHAIR_ROTATE",
            Self::QuorumChange => "QUORUM_CHANGE",
            Self::ConsensusReached => "CONSENSUS_REACHED",
            Self::ViolationDetected => "VIOLATION_DETECTED",
            Self::DecisionMade => "DECISION_MADE",
            Self::TrustUpdated => "TRUST_UPDATED",
            Self::RecordPersisted => "RECORD_PERSISTED",
            Self::Error => "ERROR",
            Self::PipelineEnd => "PIPELINE_END",
        };
        write!(f, "{}", s)
    }
}

/// A trajectory event emitted during evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryEvent {
    /// Type of the event.
    pub event_type: TrajectoryEventType,
    /// Fire Circle round number, or 0 for non-round-scoped events.
    pub depth: u32,
    /// Human-readable content describing the event.
    pub content: String,
    /// Event-specific metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Value>>,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
}

impl TrajectoryEvent {
    /// Creates a new trajectory event.
    pub fn new(event_type: TrajectoryEventType, depth: u32, content: impl Into<String>) -> Self {
        Self {
            event_type,
            depth,
            content: content.into(),
            metadata: None,
            timestamp: Utc::now(),
        }
    }

    /// Adds metadata to the event.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Adds multiple metadata entries.
    pub fn with_metadata_map(mut self, map: HashMap<String, Value>) -> Self {
        self.metadata = Some(map);
        self
    }

    /// Gets a metadata value.
    pub fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.as_ref()?.get(key)
    }

    // Convenience constructors for common event types.

    /// Creates a pipeline start event.
    pub fn pipeline_start(run_id: impl Into<String>, mode: impl Into<String>) -> Self {
        Self::new(TrajectoryEventType::PipelineStart, 0, run_id.into()).with_metadata("mode", mode.into())
    }

    /// Creates a pre-evaluation start event.
    pub fn pre_evaluate(layer: impl Into<String>) -> Self {
        Self::new(TrajectoryEventType::PreEvaluate, 0, layer)
    }

    /// Creates a post-evaluation start event.
    pub fn post_evaluate(response_preview: impl Into<String>) -> Self {
        Self::new(TrajectoryEventType::PostEvaluate, 0, response_preview)
    }

    /// Creates a cache hit event.
    pub fn cache_hit(key: impl Into<String>) -> Self {
        Self::new(TrajectoryEventType::CacheHit, 0, key)
    }

    /// Creates a cache miss event.
    pub fn cache_miss(key: impl Into<String>) -> Self {
        Self::new(TrajectoryEventType::CacheMiss, 0, key)
    }

    /// Creates an LLM dispatch event.
    pub fn llm_dispatch(model: impl Into<String>) -> Self {
        Self::new(TrajectoryEventType::LlmDispatch, 0, model.into())
    }

    /// Creates an LLM response event.
    pub fn llm_response(model: impl Into<String>, latency_ms: f64) -> Self {
        Self::new(TrajectoryEventType::LlmResponse, 0, model.into())
            .with_metadata("latency_ms", latency_ms)
    }

    /// Creates a parse fallback event.
    pub fn parse_fallback(reason: impl Into<String>) -> Self {
        Self::new(TrajectoryEventType::ParseFallback, 0, reason)
    }

    /// Creates a Fire Circle round event.
    pub fn fire_circle_round(round_number: u32, convergence_metric: f64) -> Self {
        Self::new(
            TrajectoryEventType::FireCircleRound,
            round_number,
            format!("round {round_number} complete"),
        )
        .with_metadata("convergence_metric", convergence_metric)
    }

    /// Creates an empty chair rotation event.
    pub fn empty_chair_rotate(round_number: u32, model: impl Into<String>) -> Self {
        Self::new(TrajectoryEventType::EmptyChairRotate, round_number, model.into())
    }

    /// Creates a quorum change event.
    pub fn quorum_change(round_number: u32, quorum_valid: bool) -> Self {
        Self::new(
            TrajectoryEventType::QuorumChange,
            round_number,
            if quorum_valid { "quorum restored" } else { "quorum lost" },
        )
        .with_metadata("quorum_valid", quorum_valid)
    }

    /// Creates a consensus reached event.
    pub fn consensus_reached(reasoning: impl Into<String>) -> Self {
        Self::new(TrajectoryEventType::ConsensusReached, 0, reasoning)
    }

    /// Creates a violation detected event.
    pub fn violation_detected(violation: impl Into<String>) -> Self {
        Self::new(TrajectoryEventType::ViolationDetected, 0, violation)
    }

    /// Creates a decision made event.
    pub fn decision_made(decision: impl Into<String>) -> Self {
        Self::new(TrajectoryEventType::DecisionMade, 0, decision)
    }

    /// Creates a trust updated event.
    pub fn trust_updated(session_id: impl Into<String>, ema_balance: f64) -> Self {
        Self::new(TrajectoryEventType::TrustUpdated, 0, session_id.into())
            .with_metadata("ema_balance", ema_balance)
    }

    /// Creates a record persisted event.
    pub fn record_persisted(destination: impl Into<String>) -> Self {
        Self::new(TrajectoryEventType::RecordPersisted, 0, destination)
    }

    /// Creates an error event.
    pub fn error(error: impl Into<String>) -> Self {
        Self::new(TrajectoryEventType::Error, 0, error)
    }

    /// Creates a pipeline end event.
    pub fn pipeline_end(run_id: impl Into<String>) -> Self {
        Self::new(TrajectoryEventType::PipelineEnd, 0, run_id)
    }

    /// Checks if this is an error event.
    pub fn is_error(&self) -> bool {
        self.event_type == TrajectoryEventType::Error
    }

    /// Checks if this is a pipeline end event.
    pub fn is_final(&self) -> bool {
        self.event_type == TrajectoryEventType::PipelineEnd
    }

    /// Formats as a single-line log entry.
    pub fn as_log_line(&self) -> String {
        let indent = "  ".repeat(self.depth as usize);
        format!(
            "[{}] {}{}: {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            indent,
            self.event_type,
            self.content.lines().next().unwrap_or("")
        )
    }
}

/// Export format for trajectory data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// JSON Lines format (one event per line).
    JsonLines,
    /// Pretty-printed JSON array.
    JsonPretty,
    /// Compact JSON array.
    JsonCompact,
    /// Markdown summary.
    Markdown,
}

/// Serializes a list of events to the specified format.
pub fn export_events(events: &[TrajectoryEvent], format: ExportFormat) -> String {
    match format {
        ExportFormat::JsonLines => events
            .iter()
            .filter_map(|e| serde_json::to_string(e).ok())
            .collect::<Vec<_>>()
            .join("\n"),
        ExportFormat::JsonPretty => {
            serde_json::to_string_pretty(events).unwrap_or_else(|_| "[]".to_string())
        }
        ExportFormat::JsonCompact => {
            serde_json::to_string(events).unwrap_or_else(|_| "[]".to_string())
        }
        ExportFormat::Markdown => events_to_markdown(events),
    }
}

fn events_to_markdown(events: &[TrajectoryEvent]) -> String {
    let mut md = String::from("# Evaluation Trajectory\n\n");

    for event in events {
        let indent = "  ".repeat(event.depth as usize);
        md.push_str(&format!(
            "{}**{}** `{}`\n",
            indent, event.event_type, event.timestamp
        ));
        if !event.content.is_empty() {
            md.push_str(&format!("{}> {}\n", indent, event.content));
        }
        md.push('\n');
    }

    md
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_creation() {
        let event = TrajectoryEvent::pipeline_start("run-1", "both");
        assert_eq!(event.event_type, TrajectoryEventType::PipelineStart);
        assert_eq!(event.depth, 0);
        assert_eq!(event.content, "run-1");
        assert_eq!(event.get_metadata("mode"), Some(&Value::String("both".to_string())));
    }

    #[test]
    fn test_event_with_metadata() {
        let event = TrajectoryEvent::quorum_change(2, false);
        assert_eq!(event.get_metadata("quorum_valid"), Some(&Value::Bool(false)));
    }

    #[test]
    fn test_fire_circle_round_event() {
        let event = TrajectoryEvent::fire_circle_round(2, 0.05);
        assert_eq!(event.depth, 2);
        assert_eq!(
            event.get_metadata("convergence_metric"),
            Some(&Value::from(0.05))
        );
    }

    #[test]
    fn test_event_log_line() {
        let event = TrajectoryEvent::cache_hit("abc123");
        let line = event.as_log_line();
        assert!(line.contains("CACHE_HIT"));
        assert!(line.contains("abc123"));
    }

    #[test]
    fn test_export_json_lines() {
        let events = vec![
            TrajectoryEvent::pipeline_start("run-1", "baseline"),
            TrajectoryEvent::pipeline_end("run-1"),
        ];
        let exported = export_events(&events, ExportFormat::JsonLines);
        let lines: Vec<_> = exported.lines().collect();
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn test_is_final_on_pipeline_end() {
        let event = TrajectoryEvent::pipeline_end("run-1");
        assert!(event.is_final());
        assert!(!event.is_error());
    }
}
