use async_trait::async_trait;

use super::error::PlatformError;
use crate::sheet::fields::AttachmentRef;

/// A role defined in a guild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildRole {
    pub id: String,
    pub name: String,
}

/// A new message seen by the bot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundMessage {
    /// `None` for direct messages.
    pub guild_id: Option<String>,
    pub channel_id: String,
    pub message_id: String,
    pub author_id: String,
    pub author_is_bot: bool,
    pub content: String,
    pub attachments: Vec<AttachmentRef>,
}

/// Outbound operations of a chat platform.
///
/// Implementations return [`PlatformError::RateLimited`] on 429 and leave
/// retrying to the caller.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Human-readable platform name.
    fn name(&self) -> &str;

    /// Post a message, returning its id.
    async fn send_message(&self, channel_id: &str, content: &str) -> Result<String, PlatformError>;

    async fn add_reaction(
        &self,
        channel_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> Result<(), PlatformError>;

    async fn list_roles(&self, guild_id: &str) -> Result<Vec<GuildRole>, PlatformError>;

    /// Role ids currently held by a member.
    async fn member_roles(&self, guild_id: &str, user_id: &str)
        -> Result<Vec<String>, PlatformError>;

    async fn grant_role(
        &self,
        guild_id: &str,
        user_id: &str,
        role_id: &str,
    ) -> Result<(), PlatformError>;

    /// Start a thread from a message, returning the thread's channel id.
    async fn create_thread(
        &self,
        channel_id: &str,
        message_id: &str,
        name: &str,
    ) -> Result<String, PlatformError>;

    /// Name of a guild channel; `None` for direct-message channels.
    async fn channel_name(&self, channel_id: &str) -> Result<Option<String>, PlatformError>;
}
