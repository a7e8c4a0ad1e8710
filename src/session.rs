//! Session-level trust tracking.
//!
//! A session accumulates an exponential moving average of `ayni_balance`
//! across turns, so a single reciprocal exchange cannot offset a sustained
//! pattern of extraction and, conversely, a single probe does not
//! permanently condemn an otherwise reciprocal session. Ownership is
//! single-writer: the accumulator is meant to live behind one `Arc<Mutex<_>>`
//! per session, updated from wherever the caller closes out a turn.

use std::collections::{BTreeSet, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ayni::{ExchangeType, Violation};

/// Smoothing factor for the trust EMA (spec §4.8: `α = 0.3`).
const DEFAULT_EMA_ALPHA: f64 = 0.3;

/// Number of most-recent turns retained verbatim for trajectory inspection.
const TURN_HISTORY_CAPACITY: usize = 50;

/// `persistent_testing` window: a violation recurring within this many
/// trailing turns counts toward the pattern (spec §4.8).
const PERSISTENT_TESTING_WINDOW: usize = 5;
/// Occurrences of the same violation within the window before
/// `persistent_testing` latches on.
const PERSISTENT_TESTING_MIN_OCCURRENCES: usize = 2;

/// `trajectory = hostile` latches once the EMA falls to or below this.
const HOSTILE_EMA_THRESHOLD: f64 = -0.3;
/// `trajectory = improving` requires a slope across the last three turns at
/// or above this many balance-units per turn.
const IMPROVING_SLOPE_THRESHOLD: f64 = 0.1;
/// `trajectory = degrading` requires a slope across the last five turns at
/// or below this many balance-units per turn.
const DEGRADING_SLOPE_THRESHOLD: f64 = -0.05;

/// One turn's contribution to a session's trust trajectory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub ayni_balance: f64,
    pub exchange_type: ExchangeType,
    pub violations: BTreeSet<Violation>,
    pub timestamp: DateTime<Utc>,
}

/// Direction the trust trajectory is currently moving (spec §3 "Session
/// state").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trajectory {
    Improving,
    Stable,
    Degrading,
    Hostile,
}

/// Backwards-compatible alias kept only where the three-way trend
/// (improving/stable/degrading) is all a caller needs; prefer [`Trajectory`].
pub type TrustTrend = Trajectory;

/// How the caller should currently engage with the session, derived from
/// `(trust_ema, persistent_testing, trajectory)` per spec §4.8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementMode {
    Cooperative,
    Cautious,
    BoundaryTesting,
    Guarded,
}

/// Threshold on `trust_ema` above which, absent other signals, engagement
/// is cooperative rather than merely cautious.
const COOPERATIVE_EMA_THRESHOLD: f64 = 0.3;

/// Accumulates per-turn ayni balance into a session-level trust trajectory.
///
/// Not `Clone`: a session's trajectory has exactly one writer (spec §4.8:
/// "single-writer"). Callers that need to share read access across tasks
/// should hold this behind an `Arc<tokio::sync::Mutex<SessionAccumulator>>`.
#[derive(Debug)]
pub struct SessionAccumulator {
    session_id: String,
    alpha: f64,
    trust_ema: Option<f64>,
    turns: VecDeque<TurnRecord>,
    interaction_count: u64,
    violation_counts: HashMap<Violation, u32>,
    any_trust_collapse: bool,
}

impl SessionAccumulator {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self::with_alpha(session_id, DEFAULT_EMA_ALPHA)
    }

    pub fn with_alpha(session_id: impl Into<String>, alpha: f64) -> Self {
        Self {
            session_id: session_id.into(),
            alpha: alpha.clamp(0.0, 1.0),
            trust_ema: None,
            turns: VecDeque::with_capacity(TURN_HISTORY_CAPACITY),
            interaction_count: 0,
            violation_counts: HashMap::new(),
            any_trust_collapse: false,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Records one turn's ayni balance and violation set, updating the EMA
    /// trust trajectory and the per-violation counters.
    pub fn record_turn(
        &mut self,
        ayni_balance: f64,
        exchange_type: ExchangeType,
        violations: BTreeSet<Violation>,
        timestamp: DateTime<Utc>,
    ) {
        self.trust_ema = Some(match self.trust_ema {
            Some(prev) => self.alpha * ayni_balance + (1.0 - self.alpha) * prev,
            None => ayni_balance,
        });

        if violations.contains(&Violation::TrustCollapse) {
            self.any_trust_collapse = true;
        }
        for violation in &violations {
            *self.violation_counts.entry(*violation).or_insert(0) += 1;
        }

        self.interaction_count += 1;
        if self.turns.len() == TURN_HISTORY_CAPACITY {
            self.turns.pop_front();
        }
        self.turns.push_back(TurnRecord {
            ayni_balance,
            exchange_type,
            violations,
            timestamp,
        });
    }

    /// Current EMA of `ayni_balance`, or `None` if no turns recorded yet.
    pub fn trust_ema(&self) -> Option<f64> {
        self.trust_ema
    }

    /// Monotone count of turns recorded in this session's lifetime (not
    /// capped by the retained-history window).
    pub fn interaction_count(&self) -> u64 {
        self.interaction_count
    }

    /// Cumulative count of a given violation across the session's retained
    /// history.
    pub fn violation_count(&self, violation: Violation) -> u32 {
        self.violation_counts.get(&violation).copied().unwrap_or(0)
    }

    /// True once any violation has appeared in at least
    /// [`PERSISTENT_TESTING_MIN_OCCURRENCES`] turns within the trailing
    /// [`PERSISTENT_TESTING_WINDOW`]-turn window (spec §4.8).
    pub fn persistent_testing(&self) -> bool {
        let mut counts: HashMap<Violation, usize> = HashMap::new();
        for turn in self.turns.iter().rev().take(PERSISTENT_TESTING_WINDOW) {
            for violation in &turn.violations {
                *counts.entry(*violation).or_insert(0) += 1;
            }
        }
        counts.values().any(|&c| c >= PERSISTENT_TESTING_MIN_OCCURRENCES)
    }

    fn slope_over_last(&self, n: usize) -> Option<f64> {
        if self.turns.len() < n || n < 2 {
            return None;
        }
        let recent: Vec<f64> = self.turns.iter().rev().take(n).map(|t| t.ayni_balance).collect();
        // `recent` is newest-first; slope is measured forward in time.
        let first = *recent.last().unwrap();
        let last = recent[0];
        Some((last - first) / (n - 1) as f64)
    }

    fn is_monotonically_non_decreasing_last(&self, n: usize) -> bool {
        if self.turns.len() < n {
            return false;
        }
        let recent: Vec<f64> = self.turns.iter().rev().take(n).map(|t| t.ayni_balance).collect();
        // `recent` is newest-first; non-decreasing forward in time means
        // non-increasing in this reversed view.
        recent.windows(2).all(|w| w[0] >= w[1])
    }

    /// Classifies the session's current trajectory per the precedence order
    /// in spec §4.8: a hostile signal (very negative EMA, or a recorded
    /// trust collapse) dominates; otherwise a recent sustained improvement
    /// or decline is reported; otherwise the session is stable.
    pub fn trajectory(&self) -> Trajectory {
        let Some(ema) = self.trust_ema else {
            return Trajectory::Stable;
        };

        if ema <= HOSTILE_EMA_THRESHOLD || self.any_trust_collapse {
            return Trajectory::Hostile;
        }

        if self.is_monotonically_non_decreasing_last(3) {
            if let Some(slope) = self.slope_over_last(3) {
                if slope >= IMPROVING_SLOPE_THRESHOLD {
                    return Trajectory::Improving;
                }
            }
        }

        if let Some(slope) = self.slope_over_last(5) {
            if slope <= DEGRADING_SLOPE_THRESHOLD {
                return Trajectory::Degrading;
            }
        }

        Trajectory::Stable
    }

    /// Derives how the caller should currently engage with this session.
    pub fn engagement_mode(&self) -> EngagementMode {
        if self.trajectory() == Trajectory::Hostile {
            return EngagementMode::Guarded;
        }
        if self.persistent_testing() {
            return EngagementMode::BoundaryTesting;
        }
        match self.trust_ema {
            Some(ema) if ema >= COOPERATIVE_EMA_THRESHOLD => EngagementMode::Cooperative,
            _ => EngagementMode::Cautious,
        }
    }

    /// Turn history in chronological order, oldest first, capped at the
    /// last [`TURN_HISTORY_CAPACITY`] turns.
    pub fn history(&self) -> impl Iterator<Item = &TurnRecord> {
        self.turns.iter()
    }
}
