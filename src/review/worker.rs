//! Single background worker draining the review queue.
//!
//! One task is classified at a time. The worker is the only writer of
//! cached verdicts and of task completion.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::cache::{ResultCache, ReviewResult};
use super::classifier::Classifier;
use super::grant::{grant_roles, GrantReport};
use super::queue::TaskQueue;
use super::task::{ReviewTask, TaskKind};
use super::verdict::{implicated_fields, parse_verdict, Verdict};
use crate::config::{GuildDirectory, QueueConfig};
use crate::platform::{Outbound, RetryPolicy, SuspendGate};

const UNAVAILABLE: &str = "⚠️ The review could not be completed right now. Please try again later.";

pub struct ReviewWorker {
    queue: Arc<TaskQueue>,
    cache: Arc<ResultCache>,
    classifier: Arc<dyn Classifier>,
    outbound: Outbound,
    retry: RetryPolicy,
    gate: SuspendGate,
    guilds: GuildDirectory,
    log_channel: Option<String>,
    busy_poll: Duration,
    idle_poll: Duration,
}

impl ReviewWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<TaskQueue>,
        cache: Arc<ResultCache>,
        classifier: Arc<dyn Classifier>,
        outbound: Outbound,
        retry: RetryPolicy,
        guilds: GuildDirectory,
        log_channel: Option<String>,
        cfg: &QueueConfig,
    ) -> Self {
        Self {
            queue,
            cache,
            classifier,
            outbound,
            retry,
            gate: SuspendGate::new(),
            guilds,
            log_channel: log_channel.filter(|c| !c.trim().is_empty()),
            busy_poll: Duration::from_millis(cfg.busy_poll_ms),
            idle_poll: Duration::from_secs(cfg.idle_poll_secs),
        }
    }

    /// Poll until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        if let Err(e) = self.queue.recover_stale() {
            tracing::error!(error = %e, "Failed to recover stale review tasks");
        }
        tracing::info!(classifier = self.classifier.name(), "Review worker started");

        loop {
            let delay = match self.process_next().await {
                Ok(true) => self.busy_poll,
                Ok(false) => self.idle_poll,
                Err(e) => {
                    tracing::error!(error = %e, "Review worker iteration failed");
                    self.idle_poll
                }
            };
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }
        tracing::info!("Review worker stopped");
    }

    /// Claim and fully handle one task. Returns whether a task was found.
    ///
    /// A store error after the claim fails the task and tells the
    /// submitter before it is returned.
    pub async fn process_next(&self) -> Result<bool> {
        let Some(task) = self.queue.claim_next()? else {
            return Ok(false);
        };
        tracing::info!(
            task_id = %task.task_id,
            kind = task.kind.as_str(),
            submitter = %task.submitter_id,
            "Processing review task"
        );

        if let Err(e) = self.handle(&task).await {
            tracing::error!(task_id = %task.task_id, error = %e, "Review task aborted");
            if let Err(fail_err) = self.queue.fail(&task.task_id, &format!("store error: {e}")) {
                tracing::error!(task_id = %task.task_id, error = %fail_err, "Failed to mark task failed");
            }
            self.tell(&task, UNAVAILABLE).await;
            self.log(&task, &format!("aborted: {e}")).await;
            return Err(e);
        }
        Ok(true)
    }

    async fn handle(&self, task: &ReviewTask) -> Result<()> {
        // Identical content may have been reviewed after this task was queued.
        if task.kind == TaskKind::Initial {
            if let Some(result) = self.cache.get(&task.fingerprint)? {
                tracing::info!(task_id = %task.task_id, pass = result.pass, "Serving cached verdict");
                let summary = match (&result.role, result.pass) {
                    (Some(role), true) => format!("pass: {role}"),
                    _ => format!("fail: {}", result.reason),
                };
                self.queue.complete(&task.task_id, &summary)?;
                let grants = match (&result.role, result.pass) {
                    (Some(role), true) => self.grant(task, role).await,
                    _ => None,
                };
                self.tell(task, &cached_message(&result, grants.as_deref()))
                    .await;
                self.log(task, "served cached verdict").await;
                return Ok(());
            }
        }

        let reply = self
            .retry
            .run(&self.gate, "classify", || self.classifier.classify(&task.prompt))
            .await;
        let text = match reply {
            Ok(text) => text,
            Err(e) => {
                // Not cached: the same content may be retried later.
                tracing::error!(task_id = %task.task_id, error = %e, "Classification failed");
                self.queue.fail(&task.task_id, &e.to_string())?;
                self.tell(task, UNAVAILABLE).await;
                self.log(task, &format!("failed: {e}")).await;
                return Ok(());
            }
        };

        if task.kind == TaskKind::FollowUp {
            self.queue.complete(&task.task_id, &text)?;
            self.tell(task, &format!("💬 {text}")).await;
            self.log(task, "answered").await;
            return Ok(());
        }

        let settings = self.guilds.get(task.origin.guild_id.as_deref());
        match parse_verdict(&text, &settings.allowed_roles) {
            Err(malformed) => {
                tracing::warn!(
                    task_id = %task.task_id,
                    reason = %malformed.reason,
                    raw = %malformed.raw,
                    "Malformed review reply"
                );
                self.cache
                    .put(&ReviewResult::failed(&task.fingerprint, &malformed.reason))?;
                self.queue.fail(&task.task_id, &malformed.reason)?;
                self.tell(task, &fail_message(&malformed.reason)).await;
                self.log(task, &format!("malformed reply: {}", malformed.reason))
                    .await;
            }
            Ok(Verdict::Fail { reason }) => {
                self.cache
                    .put(&ReviewResult::failed(&task.fingerprint, &reason))?;
                self.queue.complete(&task.task_id, &format!("fail: {reason}"))?;
                self.tell(task, &fail_message(&reason)).await;
                self.log(task, "failed review").await;
            }
            Ok(Verdict::Pass { role, reason }) => {
                self.cache
                    .put(&ReviewResult::passed(&task.fingerprint, &role, &reason))?;
                self.queue.complete(&task.task_id, &format!("pass: {role}"))?;
                let grants = self.grant(task, &role).await;
                self.tell(task, &pass_message(&role, &reason, grants.as_deref()))
                    .await;
                self.log(task, &format!("passed as {role}")).await;
            }
        }
        Ok(())
    }

    /// Grant summary for the success message; `None` outside a guild.
    async fn grant(&self, task: &ReviewTask, role: &str) -> Option<String> {
        let guild_id = task.origin.guild_id.as_deref()?;
        let summary = match grant_roles(
            &self.outbound,
            guild_id,
            &task.submitter_id,
            role,
            &task.category,
        )
        .await
        {
            Ok(report) => {
                if !matches!(report, GrantReport::AlreadyGranted) && !report.fully_granted() {
                    self.log(task, &format!("partial role grant: {}", report.summary()))
                        .await;
                }
                report.summary()
            }
            Err(e) => {
                tracing::error!(task_id = %task.task_id, error = %e, "Role lookup failed");
                format!("Roles could not be granted ({e}), please ask a moderator.")
            }
        };
        Some(summary)
    }

    async fn tell(&self, task: &ReviewTask, text: &str) {
        let channel = task.origin.reply_channel();
        if channel.is_empty() {
            tracing::debug!(task_id = %task.task_id, "No reply channel, skipping notification");
            return;
        }
        if let Err(e) = self.outbound.notify(channel, &task.submitter_id, text).await {
            tracing::warn!(task_id = %task.task_id, channel, error = %e, "Failed to notify submitter");
            self.log(task, &format!("could not notify <@{}>: {e}", task.submitter_id))
                .await;
        }
    }

    async fn log(&self, task: &ReviewTask, note: &str) {
        let Some(channel) = &self.log_channel else {
            return;
        };
        let text = format!(
            "[{} {}] <@{}> {note}",
            task.kind.as_str(),
            task.task_id,
            task.submitter_id
        );
        if let Err(e) = self.outbound.send(channel, &text).await {
            tracing::warn!(error = %e, "Failed to post to the log channel");
        }
    }
}

pub fn pass_message(role: &str, reason: &str, grants: Option<&str>) -> String {
    let mut text = format!("🎉 Passed! Role: {role}\n{reason}");
    if let Some(grants) = grants {
        text.push('\n');
        text.push_str(grants);
    }
    text
}

/// Failure notice, with the fields the reason seems to point at.
pub fn fail_message(reason: &str) -> String {
    let mut text = format!("❌ Your sheet did not pass review: {reason}");
    let fields = implicated_fields(reason);
    if !fields.is_empty() {
        let keys: Vec<&str> = fields.iter().map(|f| f.key()).collect();
        text.push_str(&format!(
            "\nFields to revise: {}. Use `edit <name> <fields>` to change them.",
            keys.join(", ")
        ));
    }
    text
}

/// Message for a verdict served from the cache.
pub fn cached_message(result: &ReviewResult, grants: Option<&str>) -> String {
    match (&result.role, result.pass) {
        (Some(role), true) => pass_message(role, &result.reason, grants),
        _ => fail_message(&result.reason),
    }
}
