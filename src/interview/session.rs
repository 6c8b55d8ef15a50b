//! Async driver for interviews.
//!
//! Inbound messages are routed to at most one live session per
//! (submitter, channel). The driver relays prompts through the outbound
//! gateway and feeds replies to the state machine until it completes,
//! times out or is cancelled.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::flow::Flow;
use super::machine::{Interview, Outcome, Prompt};
use crate::config::SheetConfig;
use crate::platform::{InboundMessage, Outbound, PlatformError};
use crate::sheet::fields::Answer;
use crate::sheet::record::Answers;
use crate::sheet::{self, offending_fields};

const SESSION_BUFFER: usize = 32;

/// (submitter id, channel id)
pub type SessionKey = (String, String);

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionKey, mpsc::Sender<InboundMessage>>>,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim the (submitter, channel) pair. `None` if a session is
    /// already running there.
    pub fn open(self: &Arc<Self>, user_id: &str, channel_id: &str) -> Option<SessionHandle> {
        let key = (user_id.to_string(), channel_id.to_string());
        let mut sessions = self.sessions.lock();
        if sessions.get(&key).is_some_and(|tx| !tx.is_closed()) {
            return None;
        }
        let (tx, rx) = mpsc::channel(SESSION_BUFFER);
        sessions.insert(key.clone(), tx);
        Some(SessionHandle {
            registry: Arc::clone(self),
            key,
            rx,
        })
    }

    /// Hand a message to the author's session in that channel, if any.
    pub fn route(&self, msg: &InboundMessage) -> bool {
        let key = (msg.author_id.clone(), msg.channel_id.clone());
        let mut sessions = self.sessions.lock();
        let Some(tx) = sessions.get(&key) else {
            return false;
        };
        match tx.try_send(msg.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(user = %msg.author_id, "Session inbox full, dropping message");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                sessions.remove(&key);
                false
            }
        }
    }

    pub fn is_active(&self, user_id: &str, channel_id: &str) -> bool {
        self.sessions
            .lock()
            .contains_key(&(user_id.to_string(), channel_id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Receiving end of one session; unregisters itself on drop.
pub struct SessionHandle {
    registry: Arc<SessionRegistry>,
    key: SessionKey,
    rx: mpsc::Receiver<InboundMessage>,
}

impl SessionHandle {
    pub fn user_id(&self) -> &str {
        &self.key.0
    }

    pub fn channel_id(&self) -> &str {
        &self.key.1
    }

    pub async fn recv(&mut self) -> Option<InboundMessage> {
        self.rx.recv().await
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.registry.sessions.lock().remove(&self.key);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InterviewEnd {
    #[error("no reply within {} seconds", .0.as_secs())]
    TimedOut(Duration),
    #[error("cancelled by the submitter")]
    Cancelled,
    #[error("session closed")]
    Closed,
    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// Per-interview knobs taken from `[interview]`.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub timeout: Duration,
    pub cancel_word: String,
}

pub fn render_prompt(prompt: &Prompt) -> String {
    let mut text = prompt.text.clone();
    if !prompt.options.is_empty() {
        text.push_str(&format!("\nOptions: {}", prompt.options.join(", ")));
    }
    if prompt.accepts_attachment {
        text.push_str("\nYou can also upload an image.");
    }
    text
}

fn to_answer(msg: InboundMessage, accepts_attachment: bool) -> Answer {
    let text_empty = msg.content.trim().is_empty();
    match msg.attachments.into_iter().next() {
        Some(att) if accepts_attachment || text_empty => Answer::Attachment(att),
        _ => Answer::Text(msg.content),
    }
}

/// Drive `interview` to completion and return its answers.
pub async fn run_interview(
    outbound: &Outbound,
    session: &mut SessionHandle,
    mut interview: Interview,
    settings: &SessionSettings,
) -> Result<Answers, InterviewEnd> {
    let channel = session.channel_id().to_string();
    loop {
        if let Some(notice) = interview.take_notice() {
            outbound.send(&channel, &notice).await?;
        }
        let Some(prompt) = interview.prompt() else {
            break;
        };
        outbound.send(&channel, &render_prompt(&prompt)).await?;

        loop {
            let msg = match tokio::time::timeout(settings.timeout, session.recv()).await {
                Ok(Some(msg)) => msg,
                Ok(None) => return Err(InterviewEnd::Closed),
                Err(_) => {
                    tracing::info!(user = session.user_id(), channel = %channel, "Interview timed out");
                    interview.cancel();
                    return Err(InterviewEnd::TimedOut(settings.timeout));
                }
            };
            if msg.content.trim().eq_ignore_ascii_case(&settings.cancel_word) {
                interview.cancel();
                return Err(InterviewEnd::Cancelled);
            }
            match interview.answer(to_answer(msg, prompt.accepts_attachment)) {
                Outcome::Next | Outcome::Complete => break,
                Outcome::Rejected(reason) => {
                    outbound.send(&channel, &reason).await?;
                }
            }
        }
    }
    if let Some(notice) = interview.take_notice() {
        outbound.send(&channel, &notice).await?;
    }
    Ok(interview.into_answers())
}

/// Run `interview`, then re-ask the fields named by cross-field violations
/// until the answers assemble into a valid sheet.
pub async fn collect_sheet(
    outbound: &Outbound,
    session: &mut SessionHandle,
    flow: &Arc<Flow>,
    interview: Interview,
    cfg: &SheetConfig,
    settings: &SessionSettings,
) -> Result<Answers, InterviewEnd> {
    let mut interview = interview;
    loop {
        let answers = run_interview(outbound, session, interview, settings).await?;
        let violations = match sheet::check(&answers, cfg) {
            Ok(_) => return Ok(answers),
            Err(v) => v,
        };

        let lines: Vec<String> = violations.iter().map(|v| format!("- {v}")).collect();
        outbound
            .send(
                session.channel_id(),
                &format!("Some answers need changes:\n{}", lines.join("\n")),
            )
            .await?;

        interview = Interview::revisit(Arc::clone(flow), answers, &offending_fields(&violations));
        if interview.is_complete() {
            tracing::warn!(user = session.user_id(), "Violations name no askable field");
            return Ok(interview.into_answers());
        }
    }
}
