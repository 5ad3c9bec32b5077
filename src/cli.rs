// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// freja — multi-channel AI assistant core.
#[derive(Parser, Debug)]
#[command(name = "freja", version, about)]
pub struct Cli {
    /// Path to an explicit config file (also honoured via FREJA_CONFIG).
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Log to stderr (RUST_LOG-style filtering via FREJA_LOG).
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send one message through the board and print the reply.
    Chat {
        /// The message text.
        message: Vec<String>,
        /// Session key to continue (default: cli:default).
        #[arg(long, short = 's')]
        session: Option<String>,
        /// Group topic id, for topic-routed boards.
        #[arg(long)]
        topic: Option<String>,
    },

    /// Run the scheduler daemon: fire due cron jobs until interrupted.
    Serve,

    /// Print the merged configuration and exit.
    ShowConfig,

    /// List models from the bundled catalog.
    ListModels {
        /// Restrict to one provider.
        #[arg(long)]
        provider: Option<String>,
    },

    /// List known providers.
    ListProviders,

    /// List stored cron jobs.
    Jobs,
}
