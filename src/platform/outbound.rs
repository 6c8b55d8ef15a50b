//! Outbound messaging gateway: every platform call goes through the
//! shared retry policy and suspension gate.

use std::sync::Arc;

use super::error::PlatformError;
use super::retry::{RetryPolicy, SuspendGate};
use super::traits::{ChatPlatform, GuildRole};

/// Discord rejects messages longer than this many characters.
pub const MAX_MESSAGE_LEN: usize = 2000;

#[derive(Clone)]
pub struct Outbound {
    platform: Arc<dyn ChatPlatform>,
    policy: RetryPolicy,
    gate: Arc<SuspendGate>,
}

impl Outbound {
    pub fn new(platform: Arc<dyn ChatPlatform>, policy: RetryPolicy) -> Self {
        Self {
            platform,
            policy,
            gate: Arc::new(SuspendGate::new()),
        }
    }

    /// Send `content`, split into as many messages as needed. Returns the
    /// id of the last message.
    pub async fn send(&self, channel_id: &str, content: &str) -> Result<String, PlatformError> {
        let mut last_id = String::new();
        for chunk in split_message(content, MAX_MESSAGE_LEN) {
            last_id = self
                .policy
                .run(&self.gate, "send_message", || {
                    self.platform.send_message(channel_id, chunk)
                })
                .await?;
        }
        Ok(last_id)
    }

    /// Send a message addressed to `user_id`.
    pub async fn notify(
        &self,
        channel_id: &str,
        user_id: &str,
        content: &str,
    ) -> Result<String, PlatformError> {
        self.send(channel_id, &format!("<@{user_id}> {content}")).await
    }

    pub async fn react(
        &self,
        channel_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> Result<(), PlatformError> {
        self.policy
            .run(&self.gate, "add_reaction", || {
                self.platform.add_reaction(channel_id, message_id, emoji)
            })
            .await
    }

    pub async fn list_roles(&self, guild_id: &str) -> Result<Vec<GuildRole>, PlatformError> {
        self.policy
            .run(&self.gate, "list_roles", || self.platform.list_roles(guild_id))
            .await
    }

    pub async fn member_roles(
        &self,
        guild_id: &str,
        user_id: &str,
    ) -> Result<Vec<String>, PlatformError> {
        self.policy
            .run(&self.gate, "member_roles", || {
                self.platform.member_roles(guild_id, user_id)
            })
            .await
    }

    pub async fn grant_role(
        &self,
        guild_id: &str,
        user_id: &str,
        role_id: &str,
    ) -> Result<(), PlatformError> {
        self.policy
            .run(&self.gate, "grant_role", || {
                self.platform.grant_role(guild_id, user_id, role_id)
            })
            .await
    }

    pub async fn create_thread(
        &self,
        channel_id: &str,
        message_id: &str,
        name: &str,
    ) -> Result<String, PlatformError> {
        self.policy
            .run(&self.gate, "create_thread", || {
                self.platform.create_thread(channel_id, message_id, name)
            })
            .await
    }

    pub async fn channel_name(&self, channel_id: &str) -> Result<Option<String>, PlatformError> {
        self.policy
            .run(&self.gate, "channel_name", || {
                self.platform.channel_name(channel_id)
            })
            .await
    }
}

/// Split text into chunks of at most `max_len` bytes, preferring newline
/// then space boundaries and never cutting inside a character.
pub fn split_message(text: &str, max_len: usize) -> Vec<&str> {
    if text.len() <= max_len {
        return vec![text];
    }
    let mut chunks = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining);
            break;
        }
        let mut cut = max_len;
        while !remaining.is_char_boundary(cut) {
            cut -= 1;
        }
        let boundary = remaining[..cut]
            .rfind('\n')
            .or_else(|| remaining[..cut].rfind(' '))
            .filter(|&b| b > 0)
            .unwrap_or(cut);
        let (chunk, rest) = remaining.split_at(boundary);
        chunks.push(chunk);
        remaining = rest.trim_start_matches(['\n', ' ']);
    }
    chunks
}
