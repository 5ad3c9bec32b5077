// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use freja_board::Board;
use freja_channels::{ChannelSink, OutboundMessage};
use freja_config::Config;
use freja_core::{LaneManager, NullToolRuntime, TurnRunner};
use freja_cron::{CronDispatch, CronJob, CronPayload, CronStore, Scheduler};
use freja_session::{LogEvent, SessionKey, SessionStore};
use freja_tasks::{AgentMemory, HookTable, TaskRunner};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Arc::new(freja_config::load(cli.config.as_deref())?);

    match cli.command {
        Some(Commands::ShowConfig) => {
            println!("{}", serde_yaml::to_string(&*config).unwrap_or_default());
            Ok(())
        }
        Some(Commands::ListModels { provider }) => {
            list_models(provider.as_deref());
            Ok(())
        }
        Some(Commands::ListProviders) => {
            for meta in freja_model::registry::DRIVERS {
                let key = meta.default_api_key_env.unwrap_or("(no key required)");
                println!("{:<12} {:<20} {key}", meta.id, meta.name);
            }
            Ok(())
        }
        Some(Commands::Jobs) => {
            let app = App::build(config)?;
            for job in app.cron_store.list().await {
                let next = job
                    .state
                    .next_run_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".into());
                let enabled = if job.enabled { "on" } else { "off" };
                println!("{:<36} {:<5} next {next}  {}", job.id, enabled, job.name);
            }
            Ok(())
        }
        Some(Commands::Chat {
            message,
            session,
            topic,
        }) => {
            let app = App::build(config)?;
            let body = message.join(" ");
            if body.trim().is_empty() {
                anyhow::bail!("empty message; pass text after `chat`");
            }
            let key = SessionKey::new(session.unwrap_or_else(|| "cli:default".into()));
            let reply = app
                .board
                .handle_message(&body, &key, topic.as_deref())
                .await?;
            println!("{reply}");
            Ok(())
        }
        Some(Commands::Serve) => {
            let app = App::build(config.clone())?;
            let scheduler = Scheduler::new(
                app.cron_store.clone(),
                Arc::new(BoardDispatch {
                    board: app.board.clone(),
                    sessions: app.sessions.clone(),
                    sink: app.sink.clone(),
                }),
                config.cron.tick_interval_ms,
            );
            tracing::info!(
                tick_ms = config.cron.tick_interval_ms,
                "scheduler running; press Ctrl-C to stop"
            );
            tokio::select! {
                _ = scheduler.run() => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutting down");
                }
            }
            Ok(())
        }
        None => {
            // No subcommand: behave like `chat` reading stdin.
            use std::io::Read;
            let mut body = String::new();
            std::io::stdin().read_to_string(&mut body)?;
            if body.trim().is_empty() {
                anyhow::bail!("no input; pipe a message or use `freja chat <text>`");
            }
            let app = App::build(config)?;
            let reply = app
                .board
                .handle_message(body.trim(), &SessionKey::new("cli:default"), None)
                .await?;
            println!("{reply}");
            Ok(())
        }
    }
}

/// Everything a command needs, wired once.
struct App {
    board: Arc<Board>,
    sessions: Arc<SessionStore>,
    sink: Arc<dyn ChannelSink>,
    cron_store: Arc<CronStore>,
}

impl App {
    fn build(config: Arc<Config>) -> anyhow::Result<Self> {
        let state_dir = state_dir();
        let auth_path = config
            .auth
            .store_path
            .as_deref()
            .map(freja_config::expand_path)
            .unwrap_or_else(|| state_dir.join("auth.json"));
        let cron_path = config
            .cron
            .store_path
            .as_deref()
            .map(freja_config::expand_path)
            .unwrap_or_else(|| state_dir.join("cron.json"));
        let memory_dir = config
            .tasks
            .memory_dir
            .as_deref()
            .map(freja_config::expand_path)
            .unwrap_or_else(|| state_dir.join("memory"));

        let auth = Arc::new(
            freja_auth::AuthStore::open(&config.auth, auth_path).context("opening auth store")?,
        );
        let sessions = Arc::new(SessionStore::new(
            &config.sessions,
            config.agents.compaction_keep_recent,
        ));
        let registry = Arc::new(freja_model::DriverRegistry::new());
        let turns = Arc::new(TurnRunner::new(
            config.clone(),
            registry,
            auth,
            sessions.clone(),
            Arc::new(LaneManager::new(4)),
            Arc::new(NullToolRuntime),
        ));

        let sink: Arc<dyn ChannelSink> = Arc::new(StdoutSink);
        let memory = Arc::new(AgentMemory::new(memory_dir, config.tasks.memory_retention));
        let tasks = Arc::new(TaskRunner::new(
            turns.clone(),
            sink.clone(),
            Arc::new(HookTable::new()),
            memory,
            config.clone(),
        ));
        let board = Arc::new(Board::new(config, turns, tasks, sink.clone()));
        let cron_store = Arc::new(CronStore::open(cron_path).context("opening cron store")?);

        Ok(Self {
            board,
            sessions,
            sink,
            cron_store,
        })
    }
}

fn state_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("freja"))
        .unwrap_or_else(|| PathBuf::from(".freja"))
}

/// Scheduled turns enter the same board → lanes → failover pipeline as
/// live messages.
struct BoardDispatch {
    board: Arc<Board>,
    sessions: Arc<SessionStore>,
    sink: Arc<dyn ChannelSink>,
}

#[async_trait]
impl CronDispatch for BoardDispatch {
    async fn dispatch(&self, job: &CronJob) -> anyhow::Result<String> {
        let key = SessionKey::new(&job.session_target);
        match &job.payload {
            CronPayload::AgentTurn { message } => {
                let reply = self.board.handle_message(message, &key, None).await?;
                if job.delivery == freja_cron::DeliveryPolicy::Announce {
                    self.sink
                        .send(OutboundMessage::new(
                            key.surface(),
                            job.session_target.clone(),
                            reply.clone(),
                        ))
                        .await?;
                }
                Ok(reply)
            }
            CronPayload::SystemEvent { text } => {
                let mut log = self.sessions.open(&key)?;
                log.append(LogEvent::system(text, Some("cron".into())))?;
                Ok(text.clone())
            }
        }
    }
}

/// Outbound sink for the CLI surface: everything prints to stdout.
struct StdoutSink;

#[async_trait]
impl ChannelSink for StdoutSink {
    async fn send(&self, message: OutboundMessage) -> anyhow::Result<()> {
        match &message.topic_id {
            Some(topic) => println!("[{}:{}#{topic}] {}", message.channel, message.to, message.text),
            None => println!("[{}:{}] {}", message.channel, message.to, message.text),
        }
        Ok(())
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_env("FREJA_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn list_models(provider: Option<&str>) {
    for entry in freja_model::catalog::static_catalog() {
        if provider.map_or(false, |p| p != entry.provider) {
            continue;
        }
        println!(
            "{:<12} {:<24} window {:>7}  max out {:>6}",
            entry.provider, entry.id, entry.context_window, entry.max_output_tokens
        );
    }
}
