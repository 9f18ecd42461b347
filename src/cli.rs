// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};

#[derive(Parser, Debug)]
#[command(
    name = "coday",
    about = "Multi-agent conversational orchestrator",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Initial message to submit. Omit to start an interactive REPL on stdin.
    #[arg(value_name = "PROMPT")]
    pub prompt: Option<String>,

    /// Name of the agent to address (falls back to the last-used agent, then
    /// the project's preferred default, then the builtin `coday` agent).
    #[arg(long, short = 'a')]
    pub agent: Option<String>,

    /// Project to select before submitting (sets `currentProject`).
    #[arg(long, short = 'p')]
    pub project: Option<String>,

    /// Path to config file (overrides auto-discovery).
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Extra directory to scan for agent YAML files (repeatable).
    #[arg(long = "agent-folder")]
    pub agent_folders: Vec<PathBuf>,

    /// Increase verbosity (-v = debug, -vv = trace).
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the effective configuration and exit.
    ShowConfig,
    /// Generate a shell completion script.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "coday", &mut std::io::stdout());
}
