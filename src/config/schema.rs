//! Configuration schema.
//!
//! Every section has a `Default` so a minimal `config.toml` only needs the
//! secrets (which may also come from the environment).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub discord: DiscordConfig,
    pub classifier: ClassifierConfig,
    pub interview: InterviewConfig,
    pub sheet: SheetConfig,
    pub cooldown: CooldownConfig,
    pub queue: QueueConfig,
    pub retry: RetryConfig,
    pub storage: StorageConfig,
    /// Settings applied to every guild without its own `[guilds.<id>]` table.
    pub guild_defaults: GuildSettings,
    /// Per-guild overrides keyed by guild id.
    pub guilds: HashMap<String, GuildSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    /// Bot token. `DISCORD_TOKEN` overrides this value.
    pub token: String,
    pub api_base: String,
    pub gateway_url: String,
    /// Channel that receives operator-facing failure and completion notes.
    pub log_channel_id: Option<String>,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            api_base: "https://discord.com/api/v10".into(),
            gateway_url: "wss://gateway.discord.gg/?v=10&encoding=json".into(),
            log_channel_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// API key. `OPENAI_API_KEY` overrides this value.
    pub api_key: String,
    /// Base URL of an OpenAI-compatible API (without `/chat/completions`).
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,
    pub system_prompt: String,
    pub timeout_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: "https://api.openai.com/v1".into(),
            model: "gpt-4.1-mini".into(),
            max_tokens: 150,
            system_prompt: "You are a Discord bot for character review.".into(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterviewConfig {
    /// Inactivity timeout for a single reply.
    pub timeout_secs: u64,
    pub cancel_word: String,
    pub command_prefix: String,
    /// Open a thread per submission and run the interview inside it.
    pub use_threads: bool,
    pub affirmative: Vec<String>,
    pub negative: Vec<String>,
}

impl Default for InterviewConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 600,
            cancel_word: "cancel".into(),
            command_prefix: "!".into(),
            use_threads: false,
            affirmative: vec!["yes".into(), "y".into(), "네".into(), "예".into()],
            negative: vec!["no".into(), "n".into(), "아니오".into(), "아니요".into()],
        }
    }
}

/// Closed interval for the attribute-sum rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SumRange {
    pub min: u32,
    pub max: u32,
}

/// One row of the power table: skills at `power` or above need at least
/// `min_cooldown` turns of cooldown and may last at most `max_duration` turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerTier {
    pub power: u8,
    pub min_cooldown: u8,
    pub max_duration: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MinLengths {
    pub appearance: usize,
    pub personality: usize,
    pub background: usize,
    pub skill_description: usize,
}

impl Default for MinLengths {
    fn default() -> Self {
        Self {
            appearance: 20,
            personality: 20,
            background: 50,
            skill_description: 10,
        }
    }
}

/// Everything the field validators and the cross-field rules read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetConfig {
    /// Race options; each race is also granted as a secondary role.
    pub races: Vec<String>,
    /// Applicant role options (drives the grade/subject branch).
    pub roles: Vec<String>,
    /// The applicant role that is asked for a grade and class.
    pub student_role: String,
    /// The applicant role that is asked for a subject.
    pub teacher_role: String,
    pub banned_words: Vec<String>,
    pub min_lengths: MinLengths,
    pub max_skills: usize,
    /// Attribute-sum interval per race.
    pub attribute_sum: BTreeMap<String, SumRange>,
    pub power_tiers: Vec<PowerTier>,
    /// Duration ceiling applied regardless of power.
    pub max_duration: u8,
}

impl Default for SheetConfig {
    fn default() -> Self {
        let mut attribute_sum = BTreeMap::new();
        attribute_sum.insert("Human".to_string(), SumRange { min: 10, max: 18 });
        attribute_sum.insert("Wizard".to_string(), SumRange { min: 8, max: 16 });
        attribute_sum.insert("Yokai".to_string(), SumRange { min: 12, max: 20 });

        Self {
            races: vec!["Human".into(), "Wizard".into(), "Yokai".into()],
            roles: vec!["Student".into(), "Teacher".into()],
            student_role: "Student".into(),
            teacher_role: "Teacher".into(),
            banned_words: Vec::new(),
            min_lengths: MinLengths::default(),
            max_skills: 6,
            attribute_sum,
            power_tiers: vec![
                PowerTier { power: 1, min_cooldown: 0, max_duration: 5 },
                PowerTier { power: 2, min_cooldown: 1, max_duration: 4 },
                PowerTier { power: 3, min_cooldown: 2, max_duration: 3 },
                PowerTier { power: 4, min_cooldown: 3, max_duration: 2 },
                PowerTier { power: 5, min_cooldown: 5, max_duration: 1 },
            ],
            max_duration: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownConfig {
    pub min_interval_secs: u64,
    pub daily_limit: u32,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: 60,
            daily_limit: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Poll delay after a task was processed.
    pub busy_poll_ms: u64,
    /// Poll delay when the queue was empty.
    pub idle_poll_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            busy_poll_ms: 1000,
            idle_poll_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    /// Cool-off used when the server does not suggest one.
    pub default_delay_ms: u64,
    pub max_delay_secs: u64,
    pub max_jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            default_delay_ms: 5000,
            max_delay_secs: 600,
            max_jitter_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database path. Empty means the platform data directory.
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: String::new(),
        }
    }
}

/// Per-guild settings, read-only from the pipeline's point of view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuildSettings {
    /// Roles the classifier may assign.
    pub allowed_roles: Vec<String>,
    /// Name of the channel where `submit` is accepted.
    pub intake_channel: String,
    /// Replaces the built-in rules description in review prompts.
    pub rules_template: Option<String>,
}

impl Default for GuildSettings {
    fn default() -> Self {
        Self {
            allowed_roles: vec!["Student".into(), "Teacher".into(), "A.M.L".into()],
            intake_channel: "admission-forms".into(),
            rules_template: None,
        }
    }
}
