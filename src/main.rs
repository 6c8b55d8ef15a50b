use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use charsheet::bot::Bot;
use charsheet::characters::CharacterStore;
use charsheet::config::Config;
use charsheet::cooldown::CooldownTracker;
use charsheet::platform::{ChatPlatform, DiscordClient, DiscordGateway, Outbound, RetryPolicy};
use charsheet::review::{OpenAiClassifier, ResultCache, ReviewService, ReviewWorker, TaskQueue};
use charsheet::sheet::{self, questions::character_flow, CharacterSheet};
use charsheet::store::Database;

const INBOUND_BUFFER: usize = 256;

#[derive(Parser)]
#[command(name = "charsheet", version, about = "Guided character-sheet intake with asynchronous review")]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the chat platform and run the bot with its review worker
    Run,
    /// Validate a sheet stored as JSON and print its fingerprint
    Check {
        /// Path to a JSON character sheet
        sheet: PathBuf,
    },
    /// List recent review tasks
    Queue {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Drop the cached verdict for a fingerprint and review it again
    Recheck { fingerprint: String },
    /// Clear a submitter's cooldown and daily count
    ResetCooldown { submitter: String },
    /// List cached verdicts
    Results {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::load(cli.config.as_deref())?;
    match cli.command {
        Commands::Run => run(config).await,
        Commands::Check { sheet } => check(&config, &sheet),
        Commands::Queue { limit } => {
            let queue = TaskQueue::new(open_database(&config)?);
            for task in queue.list_recent(limit)? {
                println!(
                    "{}  {:<10}  {:<9}  {}  {}",
                    task.created_at,
                    task.status,
                    task.kind.as_str(),
                    task.submitter_id,
                    task.result.as_deref().unwrap_or("")
                );
            }
            Ok(())
        }
        Commands::Recheck { fingerprint } => {
            let service = build_service(&config, open_database(&config)?);
            let task = service.force_recheck(&fingerprint, None)?;
            println!("queued {} for {}", task.task_id, task.submitter_id);
            Ok(())
        }
        Commands::ResetCooldown { submitter } => {
            CooldownTracker::new(open_database(&config)?, &config.cooldown).reset(&submitter)?;
            println!("cooldown cleared for {submitter}");
            Ok(())
        }
        Commands::Results { limit } => {
            let cache = ResultCache::new(open_database(&config)?);
            for result in cache.list(limit)? {
                let verdict = if result.pass { "pass" } else { "fail" };
                println!(
                    "{}  {}  {:<4}  {:<10}  {}",
                    result.created_at,
                    &result.fingerprint[..result.fingerprint.len().min(12)],
                    verdict,
                    result.role.as_deref().unwrap_or("-"),
                    result.reason
                );
            }
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "charsheet=debug" } else { "charsheet=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
}

fn open_database(config: &Config) -> Result<Arc<Database>> {
    let path = config.database_path()?;
    Ok(Arc::new(Database::open(&path)?))
}

fn build_service(config: &Config, db: Arc<Database>) -> ReviewService {
    ReviewService::new(
        config.sheet.clone(),
        config.guild_directory(),
        Arc::new(TaskQueue::new(db.clone())),
        Arc::new(ResultCache::new(db.clone())),
        CooldownTracker::new(db.clone(), &config.cooldown),
        Arc::new(CharacterStore::new(db)),
    )
}

fn check(config: &Config, path: &std::path::Path) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let parsed: CharacterSheet =
        serde_json::from_str(&text).with_context(|| format!("invalid sheet {}", path.display()))?;

    match sheet::check(&parsed.to_answers(), &config.sheet) {
        Ok(valid) => {
            println!("ok  {}", valid.fingerprint());
            Ok(())
        }
        Err(violations) => {
            for v in &violations {
                println!("- {v}");
            }
            anyhow::bail!("{} violation(s)", violations.len())
        }
    }
}

async fn run(config: Config) -> Result<()> {
    if config.discord.token.trim().is_empty() {
        anyhow::bail!("no Discord token: set [discord].token or DISCORD_TOKEN");
    }
    if config.classifier.api_key.trim().is_empty() {
        tracing::warn!("No classifier API key configured, reviews will fail");
    }

    let db = open_database(&config)?;
    let queue = Arc::new(TaskQueue::new(db.clone()));
    let cache = Arc::new(ResultCache::new(db.clone()));
    let service = Arc::new(ReviewService::new(
        config.sheet.clone(),
        config.guild_directory(),
        queue.clone(),
        cache.clone(),
        CooldownTracker::new(db.clone(), &config.cooldown),
        Arc::new(CharacterStore::new(db)),
    ));

    let retry = RetryPolicy::from_config(&config.retry);
    let platform: Arc<dyn ChatPlatform> = Arc::new(DiscordClient::new(
        config.discord.token.clone(),
        config.discord.api_base.clone(),
    ));
    tracing::info!(platform = platform.name(), "Chat platform client ready");
    let outbound = Outbound::new(platform, retry.clone());
    let classifier = Arc::new(OpenAiClassifier::new(&config.classifier)?);

    let worker = ReviewWorker::new(
        queue,
        cache,
        classifier,
        outbound.clone(),
        retry,
        config.guild_directory(),
        config.discord.log_channel_id.clone(),
        &config.queue,
    );
    let flow = Arc::new(character_flow(&config.sheet, &config.interview));
    let bot = Arc::new(Bot::new(
        outbound,
        service,
        flow,
        config.guild_directory(),
        &config.interview,
    ));
    let gateway = DiscordGateway::new(config.discord.token.clone(), config.discord.gateway_url.clone());

    let shutdown = CancellationToken::new();
    let (tx, rx) = mpsc::channel(INBOUND_BUFFER);

    let gateway_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { gateway.run(tx, shutdown).await })
    };
    let worker_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { worker.run(shutdown).await })
    };
    let bot_task = tokio::spawn(bot.run(rx, shutdown.clone()));

    tracing::info!("charsheet running, press Ctrl+C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    tracing::info!("Shutting down");
    shutdown.cancel();

    for (name, task) in [("gateway", gateway_task), ("worker", worker_task), ("bot", bot_task)] {
        if let Err(e) = task.await {
            tracing::error!(task = name, error = %e, "Task ended abnormally");
        }
    }
    Ok(())
}
