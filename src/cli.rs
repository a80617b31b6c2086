// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "otto", version, about = "An interactive AI coding agent runtime")]
pub struct Cli {
    /// Explicit config file, merged over the discovered layers.
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Model key from the `providers` config table, or empty for the
    /// default model.
    #[arg(long, short = 'm', global = true)]
    pub model: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Select or create the session used by subsequent commands.
    Session {
        /// Start a fresh session in the current working directory.
        #[arg(long, conflicts_with_all = ["continue_", "resume"])]
        new: bool,
        /// Continue the most recent session for this directory.
        #[arg(long = "continue", conflicts_with = "resume")]
        continue_: bool,
        /// Resume a specific session file.
        #[arg(long)]
        resume: Option<PathBuf>,
    },

    /// Send one prompt and stream subscriber events as JSON lines.
    ///
    /// Exit code is 0 when the turn ended with a `stop` stop-reason,
    /// non-zero otherwise.
    Prompt {
        /// The user message.
        text: String,
    },

    /// Summarise old history into a compaction entry.
    Compact {
        /// Extra instructions folded into the summarisation prompt.
        #[arg(long)]
        instructions: Option<String>,
    },

    /// Fork the current session at an entry and switch to the fork.
    Branch {
        /// Entry id to branch from (inclusive).
        entry_id: String,
    },

    /// Export the current session transcript as a standalone HTML file.
    Export {
        /// Output path.
        html_path: PathBuf,
    },
}
