//! Command router: turns inbound chat messages into interviews, review
//! requests and replies.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{GuildDirectory, InterviewConfig};
use crate::cooldown::CooldownDecision;
use crate::interview::{collect_sheet, Flow, Interview, InterviewEnd, SessionRegistry, SessionSettings};
use crate::platform::{InboundMessage, Outbound};
use crate::review::worker::cached_message;
use crate::review::{grant_roles, Origin, ReviewService, SubmitError, SubmitOutcome};
use crate::sheet::{FieldId, FieldKey};

const ACK_EMOJI: &str = "👀";
const THREAD_NAME: &str = "Admission sheet";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Submit,
    Edit { name: String, fields: Vec<FieldKey> },
    List,
    Recheck(String),
    Ask {
        character: Option<String>,
        question: String,
    },
    Help,
}

/// Parse `content` as a command. `None` when it is not addressed to the
/// bot; `Some(Err(usage))` when it is but the arguments are wrong.
pub fn parse_command(content: &str, prefix: &str) -> Option<Result<Command, String>> {
    let body = content.trim().strip_prefix(prefix)?;
    let (name, rest) = match body.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (body, ""),
    };

    let command = match name.to_lowercase().as_str() {
        "submit" => Ok(Command::Submit),
        "list" => Ok(Command::List),
        "help" => Ok(Command::Help),
        "recheck" if !rest.is_empty() => Ok(Command::Recheck(rest.to_string())),
        "recheck" => Err(format!("Usage: `{prefix}recheck <character name>`")),
        "ask" => match rest.split_once('|') {
            _ if rest.is_empty() => Err(format!("Usage: `{prefix}ask [name |] <question>`")),
            Some((character, question)) if !question.trim().is_empty() => Ok(Command::Ask {
                character: Some(character.trim().to_string()),
                question: question.trim().to_string(),
            }),
            Some(_) => Err(format!("Usage: `{prefix}ask [name |] <question>`")),
            None => Ok(Command::Ask {
                character: None,
                question: rest.to_string(),
            }),
        },
        "edit" => parse_edit(rest).map_err(|e| format!("{e}\nUsage: `{prefix}edit <name> <field...>`")),
        _ => return None,
    };
    Some(command)
}

/// `<name words...> <field keys...>`: trailing tokens that parse as field
/// keys are the fields, the rest is the character name.
fn parse_edit(rest: &str) -> Result<Command, String> {
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    let split = tokens
        .iter()
        .rposition(|t| t.parse::<FieldKey>().is_err())
        .map_or(0, |i| i + 1);
    let (name, fields) = tokens.split_at(split);
    if name.is_empty() {
        return Err("Name the character to edit.".into());
    }
    if fields.is_empty() {
        let keys: Vec<&str> = FieldId::ALL.iter().map(|f| f.key()).collect();
        return Err(format!("Name at least one field: {}", keys.join(", ")));
    }
    Ok(Command::Edit {
        name: name.join(" "),
        fields: fields.iter().filter_map(|t| t.parse().ok()).collect(),
    })
}

pub fn help_text(prefix: &str) -> String {
    format!(
        "**Commands**\n\
         `{prefix}submit` start a new admission sheet (in the intake channel)\n\
         `{prefix}edit <name> <field...>` change fields of a stored sheet and resubmit\n\
         `{prefix}list` show your characters and their review status\n\
         `{prefix}recheck <name>` ask for a fresh review of a stored sheet\n\
         `{prefix}ask [name |] <question>` ask the reviewer a question\n\
         `{prefix}help` show this message"
    )
}

fn cooldown_text(decision: &CooldownDecision) -> String {
    match decision {
        CooldownDecision::TooSoon { retry_after } => format!(
            "⏳ Please wait {} more seconds before sending another request.",
            retry_after.as_secs().max(1)
        ),
        CooldownDecision::DailyLimit { resets_on } => {
            format!("⏳ You have used all of today's requests. Try again on {resets_on}.")
        }
        CooldownDecision::Allowed { .. } => "Request accepted.".into(),
    }
}

pub struct Bot {
    outbound: Outbound,
    service: Arc<ReviewService>,
    sessions: Arc<SessionRegistry>,
    flow: Arc<Flow>,
    guilds: GuildDirectory,
    prefix: String,
    use_threads: bool,
    session: SessionSettings,
}

impl Bot {
    pub fn new(
        outbound: Outbound,
        service: Arc<ReviewService>,
        flow: Arc<Flow>,
        guilds: GuildDirectory,
        cfg: &InterviewConfig,
    ) -> Self {
        Self {
            outbound,
            service,
            sessions: SessionRegistry::new(),
            flow,
            guilds,
            prefix: cfg.command_prefix.clone(),
            use_threads: cfg.use_threads,
            session: SessionSettings {
                timeout: Duration::from_secs(cfg.timeout_secs),
                cancel_word: cfg.cancel_word.clone(),
            },
        }
    }

    /// Consume inbound messages until `shutdown` fires. Replies to running
    /// interviews are routed in arrival order; commands run concurrently.
    pub async fn run(self: Arc<Self>, mut inbound: mpsc::Receiver<InboundMessage>, shutdown: CancellationToken) {
        loop {
            let msg = tokio::select! {
                () = shutdown.cancelled() => break,
                msg = inbound.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };
            if msg.author_is_bot || self.sessions.route(&msg) {
                continue;
            }
            let bot = Arc::clone(&self);
            tokio::spawn(async move {
                bot.handle_command(msg).await;
            });
        }
        tracing::info!("Bot stopped");
    }

    /// Handle one message. Returns the interview task when one was started.
    pub async fn handle(self: &Arc<Self>, msg: InboundMessage) -> Option<JoinHandle<()>> {
        if msg.author_is_bot || self.sessions.route(&msg) {
            return None;
        }
        self.handle_command(msg).await
    }

    async fn handle_command(self: &Arc<Self>, msg: InboundMessage) -> Option<JoinHandle<()>> {
        let command = match parse_command(&msg.content, &self.prefix)? {
            Ok(command) => command,
            Err(usage) => {
                self.reply(&msg, &usage).await;
                return None;
            }
        };
        tracing::debug!(user = %msg.author_id, command = ?command, "Handling command");

        match command {
            Command::Submit => {
                if !self.in_intake_channel(&msg).await {
                    return None;
                }
                self.start_interview(msg, Interview::new(Arc::clone(&self.flow)))
                    .await
            }
            Command::Edit { name, fields } => {
                if !self.in_intake_channel(&msg).await {
                    return None;
                }
                let stored = match self.service.characters().find(&msg.author_id, &name) {
                    Ok(Some(stored)) => stored,
                    Ok(None) => {
                        self.reply(&msg, &format!("You have no character named `{name}`.")).await;
                        return None;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Character lookup failed");
                        self.reply(&msg, "Something went wrong, please try again later.").await;
                        return None;
                    }
                };
                let skills = stored.sheet.skills.len();
                if let Some(missing) = fields.iter().find(|k| k.index.is_some_and(|i| i >= skills)) {
                    self.reply(
                        &msg,
                        &format!(
                            "`{name}` has no {} (it has {skills} skill(s)). Edit `skills` to add or redo skills.",
                            missing.label()
                        ),
                    )
                    .await;
                    return None;
                }
                let interview =
                    Interview::revisit(Arc::clone(&self.flow), stored.sheet.to_answers(), &fields);
                self.start_interview(msg, interview).await
            }
            Command::List => {
                self.list(&msg).await;
                None
            }
            Command::Recheck(name) => {
                let result = self.service.recheck_by_name(
                    &msg.author_id,
                    &name,
                    origin_of(&msg, None),
                    Utc::now(),
                );
                self.ack(&msg).await;
                self.report(&msg, result, None).await;
                None
            }
            Command::Ask {
                character,
                question,
            } => {
                let result = self.service.ask(
                    &msg.author_id,
                    origin_of(&msg, None),
                    &question,
                    character.as_deref(),
                    Utc::now(),
                );
                self.ack(&msg).await;
                self.report(&msg, result, None).await;
                None
            }
            Command::Help => {
                self.reply(&msg, &help_text(&self.prefix)).await;
                None
            }
        }
    }

    async fn in_intake_channel(&self, msg: &InboundMessage) -> bool {
        let settings = self.guilds.get(msg.guild_id.as_deref());
        let name = match self.outbound.channel_name(&msg.channel_id).await {
            Ok(name) => name,
            Err(e) => {
                tracing::warn!(channel = %msg.channel_id, error = %e, "Could not resolve channel name");
                None
            }
        };
        if msg.guild_id.is_some() && name.as_deref() == Some(settings.intake_channel.as_str()) {
            return true;
        }
        self.reply(
            msg,
            &format!("Admission sheets are accepted in #{} only.", settings.intake_channel),
        )
        .await;
        false
    }

    async fn start_interview(self: &Arc<Self>, msg: InboundMessage, interview: Interview) -> Option<JoinHandle<()>> {
        self.ack(&msg).await;

        let thread_id = if self.use_threads {
            match self
                .outbound
                .create_thread(&msg.channel_id, &msg.message_id, THREAD_NAME)
                .await
            {
                Ok(id) => Some(id),
                Err(e) => {
                    tracing::warn!(error = %e, "Could not open a thread, using the channel");
                    None
                }
            }
        } else {
            None
        };
        let origin = origin_of(&msg, thread_id);

        let Some(mut session) = self
            .sessions
            .open(&msg.author_id, origin.reply_channel())
        else {
            self.reply(&msg, "You already have an interview running here.").await;
            return None;
        };

        let bot = Arc::clone(self);
        let user = msg.author_id.clone();
        Some(tokio::spawn(async move {
            tracing::info!(user = %user, channel = origin.reply_channel(), "Interview started");
            let answers = collect_sheet(
                &bot.outbound,
                &mut session,
                &bot.flow,
                interview,
                bot.service.sheet_config(),
                &bot.session,
            )
            .await;
            drop(session);

            let channel = origin.reply_channel().to_string();
            let answers = match answers {
                Ok(answers) => answers,
                Err(InterviewEnd::TimedOut(after)) => {
                    bot.notify(&channel, &user, &format!(
                        "⏰ No reply for {} minutes, the submission was discarded.",
                        after.as_secs() / 60
                    ))
                    .await;
                    return;
                }
                Err(InterviewEnd::Cancelled) => {
                    bot.notify(&channel, &user, "Submission cancelled.").await;
                    return;
                }
                Err(e) => {
                    tracing::warn!(user = %user, error = %e, "Interview ended");
                    return;
                }
            };

            let race = answers
                .text(FieldKey::top(FieldId::Race))
                .map(str::to_string);
            let result = bot.service.submit(&user, origin.clone(), &answers, Utc::now());
            bot.report_to(&channel, &user, origin.guild_id.as_deref(), result, race.as_deref())
                .await;
        }))
    }

    async fn list(&self, msg: &InboundMessage) {
        let characters = match self.service.characters().list(&msg.author_id) {
            Ok(list) => list,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list characters");
                self.reply(msg, "Something went wrong, please try again later.").await;
                return;
            }
        };
        if characters.is_empty() {
            self.reply(
                msg,
                &format!("You have no characters yet. Start with `{}submit`.", self.prefix),
            )
            .await;
            return;
        }

        let lines: Vec<String> = characters
            .iter()
            .map(|c| {
                let status = match self.service.cached(&c.fingerprint) {
                    Ok(Some(r)) if r.pass => {
                        format!("✅ passed ({})", r.role.as_deref().unwrap_or("-"))
                    }
                    Ok(Some(_)) => "❌ did not pass".to_string(),
                    Ok(None) => "⏳ not reviewed".to_string(),
                    Err(e) => {
                        tracing::warn!(error = %e, "Verdict lookup failed");
                        "unknown".to_string()
                    }
                };
                format!(
                    "- **{}** ({}, {}): {status}",
                    c.sheet.name, c.sheet.race, c.sheet.role
                )
            })
            .collect();
        self.reply(msg, &format!("Your characters:\n{}", lines.join("\n")))
            .await;
    }

    async fn report(
        &self,
        msg: &InboundMessage,
        result: Result<SubmitOutcome, SubmitError>,
        race: Option<&str>,
    ) {
        self.report_to(&msg.channel_id, &msg.author_id, msg.guild_id.as_deref(), result, race)
            .await;
    }

    async fn report_to(
        &self,
        channel: &str,
        user: &str,
        guild_id: Option<&str>,
        result: Result<SubmitOutcome, SubmitError>,
        race: Option<&str>,
    ) {
        let text = match result {
            Ok(SubmitOutcome::Rejected(violations)) => {
                let lines: Vec<String> = violations.iter().map(|v| format!("- {v}")).collect();
                format!("Your sheet has problems:\n{}", lines.join("\n"))
            }
            Ok(SubmitOutcome::CoolingDown(decision)) => cooldown_text(&decision),
            Ok(SubmitOutcome::Cached(result)) => {
                let grants = match (&result.role, guild_id) {
                    (Some(role), Some(guild)) if result.pass => {
                        match grant_roles(&self.outbound, guild, user, role, race.unwrap_or("")).await {
                            Ok(report) => Some(report.summary()),
                            Err(e) => {
                                tracing::warn!(error = %e, "Role lookup failed for cached verdict");
                                None
                            }
                        }
                    }
                    _ => None,
                };
                cached_message(&result, grants.as_deref())
            }
            Ok(SubmitOutcome::InFlight(task)) => {
                format!("This is already being reviewed ({}), hang tight.", task.status)
            }
            Ok(SubmitOutcome::Enqueued(_)) => {
                "📨 Queued for review. You will be notified here.".to_string()
            }
            Err(e @ (SubmitError::InFlight { .. } | SubmitError::UnknownCharacter(_))) => {
                e.to_string()
            }
            Err(e) => {
                tracing::error!(user, error = %e, "Review request failed");
                "Something went wrong, please try again later.".to_string()
            }
        };
        self.notify(channel, user, &text).await;
    }

    async fn ack(&self, msg: &InboundMessage) {
        if let Err(e) = self
            .outbound
            .react(&msg.channel_id, &msg.message_id, ACK_EMOJI)
            .await
        {
            tracing::debug!(error = %e, "Could not react to command");
        }
    }

    async fn reply(&self, msg: &InboundMessage, text: &str) {
        self.notify(&msg.channel_id, &msg.author_id, text).await;
    }

    async fn notify(&self, channel: &str, user: &str, text: &str) {
        if let Err(e) = self.outbound.notify(channel, user, text).await {
            tracing::warn!(channel, error = %e, "Failed to send reply");
        }
    }
}

fn origin_of(msg: &InboundMessage, thread_id: Option<String>) -> Origin {
    Origin {
        guild_id: msg.guild_id.clone(),
        channel_id: msg.channel_id.clone(),
        thread_id,
    }
}
