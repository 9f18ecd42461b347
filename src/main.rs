// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::{self, BufRead};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use coday_core::{
    load_agent_definitions, AgentRegistry, ContentPart, Event, EventBus, EventKind, ModelFactory, Session,
};
use coday_model::{MockProvider, ModelProvider};
use coday_tools::{ListDirTool, ReadFileTool, ToolRegistry, UpdateMemoryTool, WebFetchTool, WriteTool};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Some(cmd) = &cli.command {
        match cmd {
            Commands::ShowConfig => {
                let config = coday_config::load(cli.config.as_deref())?;
                println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
                return Ok(());
            }
            Commands::Completions { shell } => {
                cli::print_completions(*shell);
                return Ok(());
            }
        }
    }

    // Credential/wire-format wiring from the config is out of scope for the
    // engine, so this demo session always talks to the mock model; the tool
    // approval policy is real, though, and is built from `config.tools`.
    let config = coday_config::load(cli.config.as_deref()).context("loading configuration")?;

    let mut tools = ToolRegistry::new();
    tools.register(ReadFileTool);
    tools.register(ListDirTool);
    tools.register(WriteTool);
    tools.register(WebFetchTool);
    tools.register(UpdateMemoryTool::default());

    let model_factory: ModelFactory =
        Arc::new(|_def| Ok(Arc::new(MockProvider) as Arc<dyn ModelProvider>));

    let policy = Arc::new(coday_tools::ToolPolicy::from_config(&config.tools));
    let agent_definitions = load_agent_definitions(&config, cli.project.as_deref(), &cli.agent_folders);
    let registry = Arc::new(AgentRegistry::new(agent_definitions, Arc::new(tools), model_factory, policy));
    let bus = Arc::new(EventBus::new());
    let session = Session::new("cli", registry, bus.clone());

    if let Some(project) = &cli.project {
        *session.current_project.lock().unwrap() = Some(project.clone());
        bus.publish(EventKind::ProjectSelected { project_name: project.clone() }, None);
    }

    let (mut events, _history) = bus.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(&event);
        }
    });

    if let Some(prompt) = cli.prompt {
        session.submit(prompt, cli.agent.clone()).await?;
        return Ok(());
    }

    println!("coday — type a message and press enter (Ctrl-D to exit)");
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("reading stdin")?;
        if line.trim().is_empty() {
            continue;
        }
        session.submit(line, cli.agent.clone()).await?;
    }
    Ok(())
}

fn print_event(event: &Event) {
    match &event.kind {
        EventKind::Message { speaker_name, content, .. } => {
            let text = render_text(content);
            println!("[{speaker_name}] {text}");
        }
        EventKind::ToolRequest { tool_name, .. } => println!("  -> calling {tool_name}"),
        EventKind::ToolResponse { output, .. } => println!("  <- {output}"),
        EventKind::Invite { invite, .. } => println!("? {invite}"),
        EventKind::Choice { invite, options, .. } => println!("? {invite} {options:?}"),
        EventKind::Warn { message } => eprintln!("warning: {message}"),
        EventKind::Error { message } => eprintln!("error: {message}"),
        EventKind::ProjectSelected { project_name } => println!("project: {project_name}"),
        EventKind::ThreadSelected { thread_name, .. } => {
            if let Some(name) = thread_name {
                println!("thread: {name}");
            }
        }
        EventKind::File { filename, .. } => println!("file: {filename}"),
        EventKind::Heartbeat | EventKind::Thinking | EventKind::Text { .. } | EventKind::Answer { .. } => {}
    }
}

fn render_text(content: &[ContentPart]) -> String {
    content
        .iter()
        .filter_map(|part| match part {
            ContentPart::Text { text } => Some(text.as_str()),
            ContentPart::Image { .. } => None,
        })
        .collect::<Vec<_>>()
        .join("")
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
