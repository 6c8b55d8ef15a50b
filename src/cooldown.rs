//! Per-submitter request throttling: a minimum interval between accepted
//! requests plus a daily ceiling that resets at UTC midnight.

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::OptionalExtension;
use std::sync::Arc;
use std::time::Duration;

use crate::config::CooldownConfig;
use crate::store::Database;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CooldownDecision {
    /// Request recorded.
    Allowed { remaining_today: u32 },
    /// Too soon after the previous accepted request.
    TooSoon { retry_after: Duration },
    /// Daily ceiling reached.
    DailyLimit { resets_on: NaiveDate },
}

impl CooldownDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

pub struct CooldownTracker {
    db: Arc<Database>,
    min_interval: Duration,
    daily_limit: u32,
}

struct Record {
    last_request: DateTime<Utc>,
    count: u32,
    reset_date: NaiveDate,
}

impl CooldownTracker {
    pub fn new(db: Arc<Database>, cfg: &CooldownConfig) -> Self {
        Self {
            db,
            min_interval: Duration::from_secs(cfg.min_interval_secs),
            daily_limit: cfg.daily_limit,
        }
    }

    /// Check the submitter's limits at `now` and, if allowed, record the
    /// request. The read-check-write runs under the database lock.
    pub fn check_and_record(&self, submitter_id: &str, now: DateTime<Utc>) -> Result<CooldownDecision> {
        let conn = self.db.lock();
        let today = now.date_naive();

        let record = conn
            .query_row(
                "SELECT last_request, request_count, reset_date FROM cooldowns WHERE submitter_id = ?1",
                [submitter_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, u32>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?
            .map(|(last, count, reset)| -> Result<Record> {
                Ok(Record {
                    last_request: DateTime::parse_from_rfc3339(&last)?.with_timezone(&Utc),
                    count,
                    reset_date: reset.parse()?,
                })
            })
            .transpose()?;

        let count = match &record {
            Some(r) if r.reset_date >= today => r.count,
            _ => 0,
        };

        if let Some(r) = &record {
            let elapsed = (now - r.last_request).to_std().unwrap_or(Duration::ZERO);
            if elapsed < self.min_interval {
                let retry_after = self.min_interval - elapsed;
                tracing::debug!(submitter = submitter_id, retry_after_secs = retry_after.as_secs(), "Request too soon");
                return Ok(CooldownDecision::TooSoon { retry_after });
            }
        }

        if count >= self.daily_limit {
            let resets_on = today.succ_opt().unwrap_or(today);
            tracing::info!(submitter = submitter_id, count, "Daily request limit reached");
            return Ok(CooldownDecision::DailyLimit { resets_on });
        }

        let count = count + 1;
        conn.execute(
            "INSERT INTO cooldowns (submitter_id, last_request, request_count, reset_date)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(submitter_id) DO UPDATE SET
                last_request = excluded.last_request,
                request_count = excluded.request_count,
                reset_date = excluded.reset_date",
            rusqlite::params![submitter_id, now.to_rfc3339(), count, today.to_string()],
        )?;

        Ok(CooldownDecision::Allowed {
            remaining_today: self.daily_limit.saturating_sub(count),
        })
    }

    /// Forget a submitter's history.
    pub fn reset(&self, submitter_id: &str) -> Result<()> {
        self.db
            .lock()
            .execute("DELETE FROM cooldowns WHERE submitter_id = ?1", [submitter_id])?;
        Ok(())
    }
}
