//! SQLite schema and migrations for deliberation storage.

use rusqlite::{Connection, Result as SqliteResult};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Initializes the database schema, applying any migrations not yet
/// recorded in `schema_version`. Safe to call repeatedly.
pub fn initialize_schema(conn: &Connection) -> SqliteResult<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version < 1 {
        apply_v1_schema(conn)?;
    }

    Ok(())
}

fn apply_v1_schema(conn: &Connection) -> SqliteResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS deliberations (
            fire_circle_id TEXT PRIMARY KEY,
            created_at TEXT NOT NULL,
            models TEXT NOT NULL,
            attack_id TEXT,
            attack_category TEXT,
            rounds TEXT NOT NULL,
            patterns TEXT NOT NULL,
            dissents TEXT NOT NULL,
            consensus_t REAL NOT NULL,
            consensus_i REAL NOT NULL,
            consensus_f REAL NOT NULL,
            consensus_reasoning TEXT NOT NULL,
            empty_chair_influence REAL NOT NULL,
            quorum_valid INTEGER NOT NULL,
            reasoning_text TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_deliberations_attack_category ON deliberations(attack_category)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_deliberations_created_at ON deliberations(created_at)",
        [],
    )?;

    conn.execute(
        "CREATE VIRTUAL TABLE IF NOT EXISTS deliberations_fts USING fts5(
            reasoning_text,
            content='deliberations',
            content_rowid='rowid'
        )",
        [],
    )?;

    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS deliberations_ai AFTER INSERT ON deliberations BEGIN
            INSERT INTO deliberations_fts(rowid, reasoning_text) VALUES (NEW.rowid, NEW.reasoning_text);
        END",
        [],
    )?;
    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS deliberations_ad AFTER DELETE ON deliberations BEGIN
            INSERT INTO deliberations_fts(deliberations_fts, rowid, reasoning_text) VALUES ('delete', OLD.rowid, OLD.reasoning_text);
        END",
        [],
    )?;
    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS deliberations_au AFTER UPDATE ON deliberations BEGIN
            INSERT INTO deliberations_fts(deliberations_fts, rowid, reasoning_text) VALUES ('delete', OLD.rowid, OLD.reasoning_text);
            INSERT INTO deliberations_fts(rowid, reasoning_text) VALUES (NEW.rowid, NEW.reasoning_text);
        END",
        [],
    )?;

    conn.execute("INSERT INTO schema_version (version) VALUES (1)", [])?;

    Ok(())
}

pub fn is_initialized(conn: &Connection) -> bool {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='deliberations'",
        [],
        |row| row.get::<_, i32>(0),
    )
    .map(|count| count > 0)
    .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_schema() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        assert!(is_initialized(&conn));
    }

    #[test]
    fn test_idempotent_initialization() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        initialize_schema(&conn).unwrap();
        assert!(is_initialized(&conn));
    }
}
