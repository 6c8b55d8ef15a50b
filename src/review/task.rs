use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// First review of a sheet.
    Initial,
    /// Forced review after the cached result was dropped.
    ReReview,
    /// Free-form question answered by the classifier, never cached.
    FollowUp,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::ReReview => "re_review",
            Self::FollowUp => "follow_up",
        }
    }

    /// Whether the task produces a cached verdict.
    pub fn is_review(self) -> bool {
        !matches!(self, Self::FollowUp)
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initial" => Ok(Self::Initial),
            "re_review" => Ok(Self::ReReview),
            "follow_up" => Ok(Self::FollowUp),
            other => Err(format!("unknown task kind '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Transitions only move forward: pending → processing → terminal.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown task status '{other}'")),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Where a task came from and where its answer goes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub guild_id: Option<String>,
    pub channel_id: String,
    pub thread_id: Option<String>,
}

impl Origin {
    pub fn reply_channel(&self) -> &str {
        self.thread_id.as_deref().unwrap_or(&self.channel_id)
    }
}

/// Input for [`super::queue::TaskQueue::enqueue`].
#[derive(Debug, Clone)]
pub struct NewTask {
    pub fingerprint: String,
    pub submitter_id: String,
    pub origin: Origin,
    pub kind: TaskKind,
    /// Race of the reviewed sheet; empty for follow-ups.
    pub category: String,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewTask {
    pub task_id: String,
    pub fingerprint: String,
    pub submitter_id: String,
    pub origin: Origin,
    pub kind: TaskKind,
    pub category: String,
    pub prompt: String,
    pub status: TaskStatus,
    pub created_at: String,
    pub result: Option<String>,
}

/// Fixed-width UTC timestamp so lexical order matches time order.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
