//! SQLite-backed [`DeliberationStorage`] implementation.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::fire_circle::types::{Dissent, PatternObservation};

use super::schema::{initialize_schema, is_initialized};
use super::{DeliberationRecord, DeliberationStorage, StoredConsensus, StoredRound};

/// Single-writer SQLite store for Fire Circle deliberations, guarded by a
/// `tokio::sync::Mutex` so concurrent callers serialize through one
/// connection rather than racing on the file.
pub struct SqliteDeliberationStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDeliberationStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        if !is_initialized(&conn) {
            initialize_schema(&conn)?;
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_record(row: &Row) -> rusqlite::Result<DeliberationRecord> {
        let models_json: String = row.get("models")?;
        let rounds_json: String = row.get("rounds")?;
        let patterns_json: String = row.get("patterns")?;
        let dissents_json: String = row.get("dissents")?;
        let quorum_valid: i64 = row.get("quorum_valid")?;

        let models: Vec<String> = serde_json::from_str(&models_json).unwrap_or_default();
        let rounds: Vec<StoredRound> = serde_json::from_str(&rounds_json).unwrap_or_default();
        let patterns: Vec<PatternObservation> = serde_json::from_str(&patterns_json).unwrap_or_default();
        let dissents: Vec<Dissent> = serde_json::from_str(&dissents_json).unwrap_or_default();

        Ok(DeliberationRecord {
            fire_circle_id: row.get("fire_circle_id")?,
            timestamp: row.get("created_at")?,
            models,
            attack_id: row.get("attack_id")?,
            attack_category: row.get("attack_category")?,
            rounds,
            patterns,
            dissents,
            consensus: StoredConsensus {
                t: row.get("consensus_t")?,
                i: row.get("consensus_i")?,
                f: row.get("consensus_f")?,
            },
            consensus_reasoning: row.get("consensus_reasoning")?,
            empty_chair_influence: row.get("empty_chair_influence")?,
            quorum_valid: quorum_valid != 0,
        })
    }
}

#[async_trait]
impl DeliberationStorage for SqliteDeliberationStore {
    async fn store_deliberation(&self, record: DeliberationRecord) -> Result<()> {
        let conn = self.conn.lock().await;
        let models_json = serde_json::to_string(&record.models)?;
        let rounds_json = serde_json::to_string(&record.rounds)?;
        let patterns_json = serde_json::to_string(&record.patterns)?;
        let dissents_json = serde_json::to_string(&record.dissents)?;
        let reasoning_text = record.all_reasoning_text();

        conn.execute(
            "INSERT INTO deliberations (
                fire_circle_id, created_at, models, attack_id, attack_category,
                rounds, patterns, dissents, consensus_t, consensus_i, consensus_f,
                consensus_reasoning, empty_chair_influence, quorum_valid, reasoning_text
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT(fire_circle_id) DO UPDATE SET
                created_at = excluded.created_at,
                models = excluded.models,
                attack_id = excluded.attack_id,
                attack_category = excluded.attack_category,
                rounds = excluded.rounds,
                patterns = excluded.patterns,
                dissents = excluded.dissents,
                consensus_t = excluded.consensus_t,
                consensus_i = excluded.consensus_i,
                consensus_f = excluded.consensus_f,
                consensus_reasoning = excluded.consensus_reasoning,
                empty_chair_influence = excluded.empty_chair_influence,
                quorum_valid = excluded.quorum_valid,
                reasoning_text = excluded.reasoning_text",
            params![
                record.fire_circle_id,
                record.timestamp,
                models_json,
                record.attack_id,
                record.attack_category,
                rounds_json,
                patterns_json,
                dissents_json,
                record.consensus.t,
                record.consensus.i,
                record.consensus.f,
                record.consensus_reasoning,
                record.empty_chair_influence,
                record.quorum_valid as i64,
                reasoning_text,
            ],
        )?;
        Ok(())
    }

    async fn get_deliberation(&self, fire_circle_id: &str) -> Result<Option<DeliberationRecord>> {
        let conn = self.conn.lock().await;
        let result = conn.query_row(
            "SELECT * FROM deliberations WHERE fire_circle_id = ?1",
            params![fire_circle_id],
            Self::row_to_record,
        );
        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn query_by_attack(&self, attack_category: &str, limit: usize) -> Result<Vec<DeliberationRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT * FROM deliberations WHERE attack_category = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![attack_category, limit as i64], Self::row_to_record)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    async fn query_by_pattern(
        &self,
        pattern_type: &str,
        min_agreement: f64,
        limit: usize,
    ) -> Result<Vec<DeliberationRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT * FROM deliberations ORDER BY created_at DESC")?;
        let rows = stmt.query_map([], Self::row_to_record)?;

        let mut matched = Vec::new();
        for row in rows {
            let record = row?;
            let hit = record
                .patterns
                .iter()
                .any(|p| p.pattern_type == pattern_type && p.agreement_score >= min_agreement);
            if hit {
                matched.push(record);
                if matched.len() >= limit {
                    break;
                }
            }
        }
        Ok(matched)
    }

    async fn query_by_model(&self, model: &str, limit: usize) -> Result<Vec<DeliberationRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT * FROM deliberations WHERE models LIKE ?1 ORDER BY created_at DESC",
        )?;
        let needle = format!("%\"{model}\"%");
        let rows = stmt.query_map(params![needle], Self::row_to_record)?;

        let mut matched = Vec::new();
        for row in rows {
            let record = row?;
            if record.models.iter().any(|m| m == model) {
                matched.push(record);
                if matched.len() >= limit {
                    break;
                }
            }
        }
        Ok(matched)
    }

    async fn find_dissents(&self, min_f_delta: f64, limit: usize) -> Result<Vec<DeliberationRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT * FROM deliberations ORDER BY created_at DESC")?;
        let rows = stmt.query_map([], Self::row_to_record)?;

        let mut matched = Vec::new();
        for row in rows {
            let record = row?;
            if record.dissents.iter().any(|d| d.f_delta >= min_f_delta) {
                matched.push(record);
                if matched.len() >= limit {
                    break;
                }
            }
        }
        Ok(matched)
    }

    async fn list_deliberations(
        &self,
        start_date: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<DeliberationRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT * FROM deliberations
             WHERE (?1 IS NULL OR created_at >= ?1) AND (?2 IS NULL OR created_at <= ?2)
             ORDER BY created_at DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![start_date, end_date, limit as i64], Self::row_to_record)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    async fn search_reasoning(&self, query: &str, limit: usize) -> Result<Vec<DeliberationRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT d.* FROM deliberations d
             JOIN deliberations_fts fts ON d.rowid = fts.rowid
             WHERE deliberations_fts MATCH ?1
             ORDER BY rank LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![query, limit as i64], Self::row_to_record)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fire_circle::types::PatternObservation;
    use crate::storage::StoredEvaluation;

    fn sample_record(id: &str, category: &str, model: &str) -> DeliberationRecord {
        DeliberationRecord {
            fire_circle_id: id.to_string(),
            timestamp: Utc::now(),
            models: vec![model.to_string()],
            attack_id: None,
            attack_category: Some(category.to_string()),
            rounds: vec![StoredRound {
                round_number: 1,
                evaluations: vec![StoredEvaluation {
                    model_id: model.to_string(),
                    t: 0.2,
                    i: 0.3,
                    f: 0.8,
                    reasoning: "clear extraction attempt".to_string(),
                }],
                active_models: vec![model.to_string()],
                empty_chair_model: None,
            }],
            patterns: vec![PatternObservation {
                pattern_type: "extraction".to_string(),
                first_observed_by: model.to_string(),
                agreement_score: 0.9,
                round_discovered: 2,
            }],
            dissents: vec![Dissent {
                round_number: 1,
                model_a: model.to_string(),
                model_b: "other-model".to_string(),
                f_delta: 0.5,
            }],
            consensus: StoredConsensus { t: 0.2, i: 0.3, f: 0.8 },
            consensus_reasoning: "converged on manipulation".to_string(),
            empty_chair_influence: 0.1,
            quorum_valid: true,
        }
    }

    #[tokio::test]
    async fn test_store_and_get_roundtrip() {
        let store = SqliteDeliberationStore::in_memory().unwrap();
        let record = sample_record("fc-1", "jailbreak", "model-a");
        store.store_deliberation(record.clone()).await.unwrap();

        let fetched = store.get_deliberation("fc-1").await.unwrap().unwrap();
        assert_eq!(fetched.fire_circle_id, "fc-1");
        assert_eq!(fetched.rounds[0].evaluations[0].model_id, "model-a");
    }

    #[tokio::test]
    async fn test_query_by_attack() {
        let store = SqliteDeliberationStore::in_memory().unwrap();
        store.store_deliberation(sample_record("fc-1", "jailbreak", "model-a")).await.unwrap();
        store.store_deliberation(sample_record("fc-2", "extraction", "model-a")).await.unwrap();

        let results = store.query_by_attack("jailbreak", 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].fire_circle_id, "fc-1");
    }

    #[tokio::test]
    async fn test_query_by_model() {
        let store = SqliteDeliberationStore::in_memory().unwrap();
        store.store_deliberation(sample_record("fc-1", "jailbreak", "model-a")).await.unwrap();
        store.store_deliberation(sample_record("fc-2", "jailbreak", "model-b")).await.unwrap();

        let results = store.query_by_model("model-b", 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].fire_circle_id, "fc-2");
    }

    #[tokio::test]
    async fn test_find_dissents_respects_threshold() {
        let store = SqliteDeliberationStore::in_memory().unwrap();
        store.store_deliberation(sample_record("fc-1", "jailbreak", "model-a")).await.unwrap();

        assert_eq!(store.find_dissents(0.3, 10).await.unwrap().len(), 1);
        assert_eq!(store.find_dissents(0.9, 10).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_search_reasoning_matches_full_text() {
        let store = SqliteDeliberationStore::in_memory().unwrap();
        store.store_deliberation(sample_record("fc-1", "jailbreak", "model-a")).await.unwrap();

        let results = store.search_reasoning("extraction", 10).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_store_overwrites_existing_id() {
        let store = SqliteDeliberationStore::in_memory().unwrap();
        store.store_deliberation(sample_record("fc-1", "jailbreak", "model-a")).await.unwrap();
        store.store_deliberation(sample_record("fc-1", "extraction", "model-a")).await.unwrap();

        let fetched = store.get_deliberation("fc-1").await.unwrap().unwrap();
        assert_eq!(fetched.attack_category.as_deref(), Some("extraction"));
    }
}
