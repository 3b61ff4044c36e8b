// =============================================================================
// Filter Database — user scanner filters (SQLite)
// =============================================================================
//
// The `user_scanner_filters` table is written by the product surface that
// owns scan editing; this service only reads it. Rows carry a JSON
// `parameters` object interpreted by `rete::user_rules`.
//
// rusqlite is synchronous; callers on the async side go through
// `tokio::task::spawn_blocking` (see ReteManager).
// =============================================================================

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use rusqlite::Connection;
use serde_json::Value;
use tracing::{info, warn};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS user_scanner_filters (
    id          INTEGER PRIMARY KEY,
    user_id     TEXT NOT NULL,
    name        TEXT NOT NULL,
    enabled     INTEGER NOT NULL DEFAULT 1,
    filter_type TEXT NOT NULL DEFAULT 'custom',
    parameters  TEXT NOT NULL DEFAULT '{}',
    priority    INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_user_filters_enabled
    ON user_scanner_filters (enabled);
";

/// One row of `user_scanner_filters` with `parameters` already parsed.
#[derive(Debug, Clone)]
pub struct UserFilterRow {
    pub id: i64,
    pub user_id: String,
    pub name: String,
    pub enabled: bool,
    pub filter_type: String,
    pub parameters: Value,
    pub priority: i64,
}

/// Handle to the filters database. Clone-cheap via `Arc`; the single
/// connection is serialized behind a mutex.
#[derive(Clone)]
pub struct FilterDb {
    conn: Arc<Mutex<Connection>>,
}

impl FilterDb {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open filter db at {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .context("failed to apply sqlite pragmas")?;
        conn.execute_batch(SCHEMA)
            .context("failed to apply filter db schema")?;
        info!(path = %path.display(), "filter database opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory db")?;
        conn.execute_batch(SCHEMA)
            .context("failed to apply filter db schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow!("filter db lock poisoned: {e}"))
    }

    /// All enabled filter rows. Rows with unparsable `parameters` JSON are
    /// skipped with a warning; the rest of the load succeeds.
    pub fn load_enabled_filters(&self) -> Result<Vec<UserFilterRow>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, name, enabled, filter_type, parameters, priority
                 FROM user_scanner_filters
                 WHERE enabled = 1
                 ORDER BY user_id, id",
            )
            .context("failed to prepare filter query")?;

        let mut rows = Vec::new();
        let mapped = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, bool>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, i64>(6)?,
            ))
        })?;

        for record in mapped {
            let (id, user_id, name, enabled, filter_type, parameters, priority) =
                record.context("failed to read filter row")?;
            let parameters = match serde_json::from_str::<Value>(&parameters) {
                Ok(v) => v,
                Err(e) => {
                    warn!(filter_id = id, user_id = %user_id, error = %e,
                        "invalid parameters JSON in filter row — skipping");
                    continue;
                }
            };
            rows.push(UserFilterRow {
                id,
                user_id,
                name,
                enabled,
                filter_type,
                parameters,
                priority,
            });
        }
        Ok(rows)
    }

    /// Lightweight count of enabled filters, used by the periodic safety
    /// reload to detect drift without loading every row.
    pub fn count_enabled(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM user_scanner_filters WHERE enabled = 1",
                [],
                |row| row.get(0),
            )
            .context("failed to count enabled filters")?;
        Ok(count as usize)
    }

    /// Insert or replace a filter row. The scan editor surface owns writes in
    /// production; this exists for tooling and tests.
    pub fn upsert_filter(
        &self,
        id: i64,
        user_id: &str,
        name: &str,
        enabled: bool,
        parameters: &Value,
        priority: i64,
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO user_scanner_filters
                 (id, user_id, name, enabled, filter_type, parameters, priority)
             VALUES (?1, ?2, ?3, ?4, 'custom', ?5, ?6)",
            rusqlite::params![id, user_id, name, enabled, parameters.to_string(), priority],
        )
        .context("failed to upsert filter row")?;
        Ok(())
    }

    /// Test hook: direct access to the underlying connection.
    #[cfg(test)]
    pub fn raw_connection_for_tests(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn roundtrip_enabled_filters() {
        let db = FilterDb::open_in_memory().unwrap();
        db.upsert_filter(1, "u1", "cheap movers", true, &json!({"min_price": 5.0}), 0)
            .unwrap();
        db.upsert_filter(2, "u1", "disabled", false, &json!({"min_rvol": 2.0}), 0)
            .unwrap();
        db.upsert_filter(3, "u2", "gappers", true, &json!({"min_gap_percent": 4.0}), 1)
            .unwrap();

        let rows = db.load_enabled_filters().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].user_id, "u1");
        assert_eq!(rows[0].parameters["min_price"], json!(5.0));
        assert_eq!(rows[1].user_id, "u2");
        assert_eq!(db.count_enabled().unwrap(), 2);
    }

    #[test]
    fn malformed_parameters_json_is_skipped() {
        let db = FilterDb::open_in_memory().unwrap();
        {
            let conn = db.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO user_scanner_filters (id, user_id, name, enabled, parameters)
                 VALUES (1, 'u1', 'broken', 1, '{not json')",
                [],
            )
            .unwrap();
        }
        db.upsert_filter(2, "u1", "ok", true, &json!({"min_price": 1.0}), 0)
            .unwrap();

        let rows = db.load_enabled_filters().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, 2);
        // The count still sees both rows — drift detection is schema-level.
        assert_eq!(db.count_enabled().unwrap(), 2);
    }

    #[test]
    fn opens_on_disk_with_wal() {
        let dir = tempfile::tempdir().unwrap();
        let db = FilterDb::open(dir.path().join("filters.db")).unwrap();
        assert_eq!(db.count_enabled().unwrap(), 0);
    }
}
