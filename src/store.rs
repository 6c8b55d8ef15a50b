//! SQLite database shared by the queue, result cache, cooldowns and
//! character records.
//!
//! Tables:
//! - `review_tasks`: queued classification work, FIFO by `seq`
//! - `review_results`: verdict per content fingerprint
//! - `cooldowns`: per-submitter request timestamps and daily counts
//! - `characters`: finalized sheets per submitter

use anyhow::{Context, Result};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;
use std::path::Path;

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database {}", path.display()))?;

        // WAL mode for concurrent reads + crash safety
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS review_tasks (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id TEXT NOT NULL UNIQUE,
                fingerprint TEXT NOT NULL,
                submitter_id TEXT NOT NULL,
                guild_id TEXT,
                channel_id TEXT NOT NULL,
                thread_id TEXT,
                kind TEXT NOT NULL,
                category TEXT NOT NULL DEFAULT '',
                prompt TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL,
                result TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_status ON review_tasks(status, seq);
            CREATE INDEX IF NOT EXISTS idx_tasks_fingerprint ON review_tasks(fingerprint, status);

            CREATE TABLE IF NOT EXISTS review_results (
                fingerprint TEXT PRIMARY KEY,
                pass INTEGER NOT NULL,
                reason TEXT NOT NULL,
                role TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS cooldowns (
                submitter_id TEXT PRIMARY KEY,
                last_request TEXT NOT NULL,
                request_count INTEGER NOT NULL,
                reset_date TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS characters (
                id TEXT PRIMARY KEY,
                submitter_id TEXT NOT NULL,
                guild_id TEXT,
                name TEXT NOT NULL COLLATE NOCASE,
                fingerprint TEXT NOT NULL,
                sheet TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (submitter_id, name)
            );
            CREATE INDEX IF NOT EXISTS idx_characters_fingerprint ON characters(fingerprint);",
        )
        .context("failed to create tables")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Exclusive access to the connection; each caller's read-check-write
    /// runs under this lock.
    pub fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn open_creates_tables_on_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("charsheet.db");
        let db = Database::open(&path).unwrap();
        let conn = db.lock();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('review_tasks', 'review_results', 'cooldowns', 'characters')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 4);
    }

    #[test]
    fn reopening_keeps_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("charsheet.db");
        {
            let db = Database::open(&path).unwrap();
            db.lock()
                .execute(
                    "INSERT INTO review_results (fingerprint, pass, reason, role, created_at)
                     VALUES ('f', 1, 'ok', 'Student', '2026-01-01T00:00:00Z')",
                    [],
                )
                .unwrap();
        }
        let db = Database::open(&path).unwrap();
        let n: i64 = db
            .lock()
            .query_row("SELECT COUNT(*) FROM review_results", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 1);
    }
}
