//! Durable FIFO of review tasks.
//!
//! At most one non-terminal task exists per fingerprint. Tasks are claimed
//! oldest first and only ever move forward through their statuses.

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};
use std::sync::Arc;

use super::task::{timestamp_now, NewTask, Origin, ReviewTask, TaskKind, TaskStatus};
use crate::store::Database;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Created(ReviewTask),
    /// A pending or processing task already covers this fingerprint.
    InFlight(ReviewTask),
}

pub struct TaskQueue {
    db: Arc<Database>,
}

const TASK_COLUMNS: &str = "task_id, fingerprint, submitter_id, guild_id, channel_id, thread_id,
     kind, category, prompt, status, created_at, result";

impl TaskQueue {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Add a task unless one for the same fingerprint is still in flight.
    pub fn enqueue(&self, new: NewTask) -> Result<EnqueueOutcome> {
        let conn = self.db.lock();
        if let Some(existing) = in_flight(&conn, &new.fingerprint)? {
            return Ok(EnqueueOutcome::InFlight(existing));
        }

        let task = ReviewTask {
            task_id: uuid::Uuid::new_v4().to_string(),
            fingerprint: new.fingerprint,
            submitter_id: new.submitter_id,
            origin: new.origin,
            kind: new.kind,
            category: new.category,
            prompt: new.prompt,
            status: TaskStatus::Pending,
            created_at: timestamp_now(),
            result: None,
        };
        conn.execute(
            "INSERT INTO review_tasks (task_id, fingerprint, submitter_id, guild_id, channel_id,
                thread_id, kind, category, prompt, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            rusqlite::params![
                task.task_id,
                task.fingerprint,
                task.submitter_id,
                task.origin.guild_id,
                task.origin.channel_id,
                task.origin.thread_id,
                task.kind.as_str(),
                task.category,
                task.prompt,
                task.status.as_str(),
                task.created_at,
            ],
        )
        .context("failed to insert review task")?;

        tracing::info!(
            task_id = %task.task_id,
            kind = task.kind.as_str(),
            submitter = %task.submitter_id,
            "Enqueued review task"
        );
        Ok(EnqueueOutcome::Created(task))
    }

    /// Oldest pending task, marked processing.
    pub fn claim_next(&self) -> Result<Option<ReviewTask>> {
        let conn = self.db.lock();
        let next = conn
            .query_row(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM review_tasks WHERE status = 'pending'
                     ORDER BY created_at ASC, seq ASC LIMIT 1"
                ),
                [],
                read_task,
            )
            .optional()?;
        let Some(mut task) = next.transpose()? else {
            return Ok(None);
        };

        let changed = conn.execute(
            "UPDATE review_tasks SET status = 'processing' WHERE task_id = ?1 AND status = 'pending'",
            [&task.task_id],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        task.status = TaskStatus::Processing;
        Ok(Some(task))
    }

    /// processing → completed. Returns false if the task was not processing.
    pub fn complete(&self, task_id: &str, result: &str) -> Result<bool> {
        self.finish(task_id, TaskStatus::Completed, result)
    }

    /// processing → failed. Returns false if the task was not processing.
    pub fn fail(&self, task_id: &str, error: &str) -> Result<bool> {
        self.finish(task_id, TaskStatus::Failed, error)
    }

    fn finish(&self, task_id: &str, status: TaskStatus, result: &str) -> Result<bool> {
        let changed = self.db.lock().execute(
            "UPDATE review_tasks SET status = ?1, result = ?2
             WHERE task_id = ?3 AND status = 'processing'",
            rusqlite::params![status.as_str(), result, task_id],
        )?;
        if changed == 0 {
            tracing::warn!(task_id, status = status.as_str(), "Ignoring transition of a task that is not processing");
        }
        Ok(changed > 0)
    }

    pub fn in_flight(&self, fingerprint: &str) -> Result<Option<ReviewTask>> {
        in_flight(&self.db.lock(), fingerprint)
    }

    pub fn get(&self, task_id: &str) -> Result<Option<ReviewTask>> {
        let conn = self.db.lock();
        conn.query_row(
            &format!("SELECT {TASK_COLUMNS} FROM review_tasks WHERE task_id = ?1"),
            [task_id],
            read_task,
        )
        .optional()?
        .transpose()
    }

    /// Newest task of any status for a fingerprint.
    pub fn latest_for(&self, fingerprint: &str) -> Result<Option<ReviewTask>> {
        let conn = self.db.lock();
        conn.query_row(
            &format!(
                "SELECT {TASK_COLUMNS} FROM review_tasks WHERE fingerprint = ?1
                 ORDER BY seq DESC LIMIT 1"
            ),
            [fingerprint],
            read_task,
        )
        .optional()?
        .transpose()
    }

    /// Most recent tasks first.
    pub fn list_recent(&self, limit: usize) -> Result<Vec<ReviewTask>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM review_tasks ORDER BY seq DESC LIMIT ?1"
        ))?;
        let rows = stmt
            .query_map([limit as i64], read_task)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().collect()
    }

    /// Fail tasks left processing by a previous run. Their submitters can
    /// simply resubmit.
    pub fn recover_stale(&self) -> Result<usize> {
        let n = self.db.lock().execute(
            "UPDATE review_tasks SET status = 'failed', result = 'interrupted by restart'
             WHERE status = 'processing'",
            [],
        )?;
        if n > 0 {
            tracing::warn!(count = n, "Failed review tasks interrupted by a restart");
        }
        Ok(n)
    }

    pub fn pending_count(&self) -> Result<usize> {
        let n: i64 = self.db.lock().query_row(
            "SELECT COUNT(*) FROM review_tasks WHERE status = 'pending'",
            [],
            |r| r.get(0),
        )?;
        Ok(n as usize)
    }
}

fn in_flight(conn: &Connection, fingerprint: &str) -> Result<Option<ReviewTask>> {
    conn.query_row(
        &format!(
            "SELECT {TASK_COLUMNS} FROM review_tasks
             WHERE fingerprint = ?1 AND status IN ('pending', 'processing')
             ORDER BY seq ASC LIMIT 1"
        ),
        [fingerprint],
        read_task,
    )
    .optional()?
    .transpose()
}

/// Row mapper; enum decoding errors surface as the outer `Result`.
fn read_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<ReviewTask>> {
    let kind: String = row.get(6)?;
    let status: String = row.get(9)?;
    let task = (|| -> Result<ReviewTask> {
        Ok(ReviewTask {
            task_id: row.get(0)?,
            fingerprint: row.get(1)?,
            submitter_id: row.get(2)?,
            origin: Origin {
                guild_id: row.get(3)?,
                channel_id: row.get(4)?,
                thread_id: row.get(5)?,
            },
            kind: kind.parse::<TaskKind>().map_err(anyhow::Error::msg)?,
            category: row.get(7)?,
            prompt: row.get(8)?,
            status: status.parse::<TaskStatus>().map_err(anyhow::Error::msg)?,
            created_at: row.get(10)?,
            result: row.get(11)?,
        })
    })();
    Ok(task)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> TaskQueue {
        TaskQueue::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    fn new_task(fp: &str) -> NewTask {
        NewTask {
            fingerprint: fp.into(),
            submitter_id: "u1".into(),
            origin: Origin {
                guild_id: Some("g1".into()),
                channel_id: "c1".into(),
                thread_id: None,
            },
            kind: TaskKind::Initial,
            category: "Human".into(),
            prompt: "review this".into(),
        }
    }

    fn created(outcome: EnqueueOutcome) -> ReviewTask {
        match outcome {
            EnqueueOutcome::Created(t) => t,
            EnqueueOutcome::InFlight(t) => panic!("unexpected in-flight {}", t.task_id),
        }
    }

    #[test]
    fn claims_in_fifo_order() {
        let q = queue();
        let a = created(q.enqueue(new_task("a")).unwrap());
        let b = created(q.enqueue(new_task("b")).unwrap());
        let c = created(q.enqueue(new_task("c")).unwrap());

        let first = q.claim_next().unwrap().unwrap();
        assert_eq!(first.task_id, a.task_id);
        assert_eq!(first.status, TaskStatus::Processing);
        assert_eq!(q.claim_next().unwrap().unwrap().task_id, b.task_id);
        assert_eq!(q.claim_next().unwrap().unwrap().task_id, c.task_id);
        assert!(q.claim_next().unwrap().is_none());
    }

    #[test]
    fn one_in_flight_task_per_fingerprint() {
        let q = queue();
        let first = created(q.enqueue(new_task("same")).unwrap());
        match q.enqueue(new_task("same")).unwrap() {
            EnqueueOutcome::InFlight(t) => assert_eq!(t.task_id, first.task_id),
            EnqueueOutcome::Created(_) => panic!("duplicate task created"),
        }

        // Still in flight while processing.
        q.claim_next().unwrap().unwrap();
        assert!(matches!(
            q.enqueue(new_task("same")).unwrap(),
            EnqueueOutcome::InFlight(_)
        ));

        // A terminal task no longer blocks.
        assert!(q.complete(&first.task_id, "ok").unwrap());
        assert!(matches!(
            q.enqueue(new_task("same")).unwrap(),
            EnqueueOutcome::Created(_)
        ));
    }

    #[test]
    fn transitions_only_from_processing() {
        let q = queue();
        let t = created(q.enqueue(new_task("x")).unwrap());
        assert!(!q.complete(&t.task_id, "too early").unwrap());
        q.claim_next().unwrap();
        assert!(q.fail(&t.task_id, "boom").unwrap());
        assert!(!q.complete(&t.task_id, "too late").unwrap());

        let stored = q.get(&t.task_id).unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert_eq!(stored.result.as_deref(), Some("boom"));
    }

    #[test]
    fn stale_processing_tasks_are_failed_on_recovery() {
        let q = queue();
        let t = created(q.enqueue(new_task("x")).unwrap());
        created(q.enqueue(new_task("y")).unwrap());
        q.claim_next().unwrap();
        assert_eq!(q.recover_stale().unwrap(), 1);
        assert_eq!(q.get(&t.task_id).unwrap().unwrap().status, TaskStatus::Failed);
        assert_eq!(q.pending_count().unwrap(), 1);
    }

    #[test]
    fn latest_for_ignores_status() {
        let q = queue();
        let first = created(q.enqueue(new_task("fp")).unwrap());
        q.claim_next().unwrap();
        q.complete(&first.task_id, "ok").unwrap();
        let second = created(q.enqueue(new_task("fp")).unwrap());
        assert_eq!(q.latest_for("fp").unwrap().unwrap().task_id, second.task_id);
        assert!(q.latest_for("other").unwrap().is_none());
    }

    #[test]
    fn list_recent_is_newest_first() {
        let q = queue();
        created(q.enqueue(new_task("a")).unwrap());
        let b = created(q.enqueue(new_task("b")).unwrap());
        let recent = q.list_recent(1).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].task_id, b.task_id);
    }
}
