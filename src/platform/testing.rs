//! In-memory platform used by unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use super::error::{PlatformError, RateLimitScope};
use super::traits::{ChatPlatform, GuildRole};

#[derive(Default)]
pub struct MockPlatform {
    sent: Mutex<Vec<(String, String)>>,
    reactions: Mutex<Vec<(String, String)>>,
    roles: Mutex<Vec<GuildRole>>,
    member_roles: Mutex<HashMap<String, Vec<String>>>,
    forbidden_roles: Mutex<HashSet<String>>,
    channel_names: Mutex<HashMap<String, String>>,
    grants: Mutex<Vec<(String, String)>>,
    rate_limited_sends: AtomicU32,
    rate_limit_delay_ms: AtomicU32,
    send_attempts: AtomicUsize,
    next_id: AtomicUsize,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_roles(names: &[&str]) -> Self {
        let mock = Self::new();
        *mock.roles.lock() = names
            .iter()
            .enumerate()
            .map(|(i, n)| GuildRole {
                id: format!("r{i}"),
                name: (*n).to_string(),
            })
            .collect();
        mock
    }

    pub fn set_member_roles(&self, user_id: &str, role_ids: &[&str]) {
        self.member_roles.lock().insert(
            user_id.to_string(),
            role_ids.iter().map(|r| (*r).to_string()).collect(),
        );
    }

    pub fn forbid_role(&self, role_id: &str) {
        self.forbidden_roles.lock().insert(role_id.to_string());
    }

    pub fn set_channel_name(&self, channel_id: &str, name: &str) {
        self.channel_names
            .lock()
            .insert(channel_id.to_string(), name.to_string());
    }

    /// Make the next `count` sends fail with a local 429.
    pub fn rate_limit_next_sends(&self, count: u32, retry_after: Duration) {
        self.rate_limited_sends.store(count, Ordering::SeqCst);
        self.rate_limit_delay_ms
            .store(retry_after.as_millis() as u32, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }

    pub fn sent_to(&self, channel_id: &str) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|(c, _)| c == channel_id)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn reactions(&self) -> Vec<(String, String)> {
        self.reactions.lock().clone()
    }

    pub fn grants(&self) -> Vec<(String, String)> {
        self.grants.lock().clone()
    }

    pub fn send_attempts(&self) -> usize {
        self.send_attempts.load(Ordering::SeqCst)
    }

    fn next_id(&self) -> String {
        format!("m{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl ChatPlatform for MockPlatform {
    fn name(&self) -> &str {
        "mock"
    }

    async fn send_message(&self, channel_id: &str, content: &str) -> Result<String, PlatformError> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);
        let limited = self
            .rate_limited_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if limited {
            let ms = self.rate_limit_delay_ms.load(Ordering::SeqCst);
            return Err(PlatformError::RateLimited {
                retry_after: Some(Duration::from_millis(u64::from(ms))),
                scope: RateLimitScope::Local,
            });
        }
        self.sent
            .lock()
            .push((channel_id.to_string(), content.to_string()));
        Ok(self.next_id())
    }

    async fn add_reaction(
        &self,
        _channel_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> Result<(), PlatformError> {
        self.reactions
            .lock()
            .push((message_id.to_string(), emoji.to_string()));
        Ok(())
    }

    async fn list_roles(&self, _guild_id: &str) -> Result<Vec<GuildRole>, PlatformError> {
        Ok(self.roles.lock().clone())
    }

    async fn member_roles(
        &self,
        _guild_id: &str,
        user_id: &str,
    ) -> Result<Vec<String>, PlatformError> {
        Ok(self
            .member_roles
            .lock()
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn grant_role(
        &self,
        _guild_id: &str,
        user_id: &str,
        role_id: &str,
    ) -> Result<(), PlatformError> {
        if self.forbidden_roles.lock().contains(role_id) {
            return Err(PlatformError::Forbidden(format!("cannot grant {role_id}")));
        }
        self.grants
            .lock()
            .push((user_id.to_string(), role_id.to_string()));
        self.member_roles
            .lock()
            .entry(user_id.to_string())
            .or_default()
            .push(role_id.to_string());
        Ok(())
    }

    async fn create_thread(
        &self,
        _channel_id: &str,
        message_id: &str,
        _name: &str,
    ) -> Result<String, PlatformError> {
        Ok(format!("thread-{message_id}"))
    }

    async fn channel_name(&self, channel_id: &str) -> Result<Option<String>, PlatformError> {
        Ok(self.channel_names.lock().get(channel_id).cloned())
    }
}
