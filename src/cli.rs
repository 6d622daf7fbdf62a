// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// tove — an agentic terminal coding assistant.
#[derive(Parser, Debug)]
#[command(name = "tove", version, about)]
pub struct Cli {
    /// Prompt to run.
    pub prompt: Option<String>,

    /// Explicit config file (merged over the discovered layers).
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Model override: a provider key from the config.
    #[arg(long, short = 'm')]
    pub model: Option<String>,

    /// Continue an existing session instead of starting a new one.
    #[arg(long, short = 's')]
    pub session: Option<String>,

    /// Approve every permission prompt without asking.
    #[arg(long, short = 'y')]
    pub yes: bool,

    /// Emit events as newline-delimited JSON instead of plain text.
    #[arg(long)]
    pub json: bool,

    /// Log to stderr (RUST_LOG controls the filter).
    #[arg(long, short = 'v')]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the merged configuration and exit.
    ShowConfig,
    /// List models from the bundled catalog.
    ListModels {
        /// Emit as JSON.
        #[arg(long)]
        json: bool,
    },
    /// List stored sessions, newest first.
    Sessions {
        /// Maximum number of sessions to print.
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}
