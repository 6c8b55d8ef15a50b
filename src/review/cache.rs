//! Verdicts memoized by content fingerprint.

use anyhow::Result;
use rusqlite::OptionalExtension;
use serde::Serialize;
use std::sync::Arc;

use super::task::timestamp_now;
use crate::store::Database;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewResult {
    pub fingerprint: String,
    pub pass: bool,
    pub reason: String,
    /// Granted role name, only for passes.
    pub role: Option<String>,
    pub created_at: String,
}

impl ReviewResult {
    pub fn passed(fingerprint: &str, role: &str, reason: &str) -> Self {
        Self {
            fingerprint: fingerprint.to_string(),
            pass: true,
            reason: reason.to_string(),
            role: Some(role.to_string()),
            created_at: timestamp_now(),
        }
    }

    pub fn failed(fingerprint: &str, reason: &str) -> Self {
        Self {
            fingerprint: fingerprint.to_string(),
            pass: false,
            reason: reason.to_string(),
            role: None,
            created_at: timestamp_now(),
        }
    }
}

pub struct ResultCache {
    db: Arc<Database>,
}

impl ResultCache {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn get(&self, fingerprint: &str) -> Result<Option<ReviewResult>> {
        let conn = self.db.lock();
        let result = conn
            .query_row(
                "SELECT fingerprint, pass, reason, role, created_at
                 FROM review_results WHERE fingerprint = ?1",
                [fingerprint],
                read_result,
            )
            .optional()?;
        Ok(result)
    }

    /// Store a verdict, replacing any previous one for the fingerprint.
    pub fn put(&self, result: &ReviewResult) -> Result<()> {
        self.db.lock().execute(
            "INSERT OR REPLACE INTO review_results (fingerprint, pass, reason, role, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                result.fingerprint,
                result.pass,
                result.reason,
                result.role,
                result.created_at,
            ],
        )?;
        Ok(())
    }

    /// Drop a cached verdict. Returns whether one existed.
    pub fn invalidate(&self, fingerprint: &str) -> Result<bool> {
        let n = self
            .db
            .lock()
            .execute("DELETE FROM review_results WHERE fingerprint = ?1", [fingerprint])?;
        Ok(n > 0)
    }

    /// Newest verdicts first.
    pub fn list(&self, limit: usize) -> Result<Vec<ReviewResult>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(
            "SELECT fingerprint, pass, reason, role, created_at
             FROM review_results ORDER BY created_at DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([limit as i64], read_result)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

fn read_result(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReviewResult> {
    Ok(ReviewResult {
        fingerprint: row.get(0)?,
        pass: row.get(1)?,
        reason: row.get(2)?,
        role: row.get(3)?,
        created_at: row.get(4)?,
    })
}
