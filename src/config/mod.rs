pub mod schema;

pub use schema::{
    ClassifierConfig, Config, CooldownConfig, DiscordConfig, GuildSettings, InterviewConfig,
    MinLengths, PowerTier, QueueConfig, RetryConfig, SheetConfig, StorageConfig, SumRange,
};

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "config.toml";
const DATABASE_FILE_NAME: &str = "charsheet.db";

impl Config {
    /// Load configuration from `path`, or from the platform config directory
    /// when no path is given. A missing default file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match default_config_path() {
                Some(p) => (p, false),
                None => return Ok(Self::default().with_env_overrides()),
            },
        };

        if !path.exists() {
            if explicit {
                anyhow::bail!("config file not found: {}", path.display());
            }
            tracing::info!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default().with_env_overrides());
        }

        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config = Self::from_toml(&text)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config.with_env_overrides())
    }

    /// Parse a TOML document, warning about keys the schema does not know.
    pub fn from_toml(text: &str) -> Result<Self> {
        let value: toml::Value = toml::from_str(text)?;
        let mut unknown = Vec::new();
        let config: Self = serde_ignored::deserialize(value, |path| {
            unknown.push(path.to_string());
        })?;
        for key in unknown {
            tracing::warn!(key = %key, "Ignoring unknown config key");
        }
        Ok(config)
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(token) = std::env::var("DISCORD_TOKEN") {
            if !token.trim().is_empty() {
                self.discord.token = token;
            }
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.trim().is_empty() {
                self.classifier.api_key = key;
            }
        }
        self
    }

    /// Resolve the SQLite path, expanding `~` and falling back to the
    /// platform data directory.
    pub fn database_path(&self) -> Result<PathBuf> {
        if !self.storage.database_path.trim().is_empty() {
            let expanded = shellexpand::tilde(self.storage.database_path.trim());
            return Ok(PathBuf::from(expanded.as_ref()));
        }
        let dirs = project_dirs().context("could not determine a data directory")?;
        let dir = dirs.data_dir();
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        Ok(dir.join(DATABASE_FILE_NAME))
    }

    pub fn guild_directory(&self) -> GuildDirectory {
        GuildDirectory::new(self.guild_defaults.clone(), self.guilds.clone())
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "charsheet")
}

fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|d| d.config_dir().join(CONFIG_FILE_NAME))
}

/// Read-only lookup of per-guild settings.
#[derive(Debug, Clone, Default)]
pub struct GuildDirectory {
    defaults: GuildSettings,
    overrides: HashMap<String, GuildSettings>,
}

impl GuildDirectory {
    pub fn new(defaults: GuildSettings, overrides: HashMap<String, GuildSettings>) -> Self {
        Self {
            defaults,
            overrides,
        }
    }

    /// Settings for a guild; direct messages and unknown guilds get the defaults.
    pub fn get(&self, guild_id: Option<&str>) -> &GuildSettings {
        guild_id
            .and_then(|id| self.overrides.get(id))
            .unwrap_or(&self.defaults)
    }
}
