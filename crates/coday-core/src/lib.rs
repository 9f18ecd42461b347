// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod agent;
mod agent_def;
mod agent_loader;
mod compact;
mod eventbus;
mod events;
mod prompts;
mod registry;
mod runloop;
mod session;
mod thread;
#[cfg(test)]
mod tests;

pub use agent::Agent;
pub use agent_def::{AgentDefinition, IntegrationAllowList};
pub use agent_loader::load_agent_definitions;
pub use compact::{
    compact_session, compact_session_with_strategy, emergency_compact, smart_truncate,
};
pub use eventbus::EventBus;
pub use events::{ContentPart, Event, EventKind, FileOperation, MessageRole};
pub use prompts::compose_system_prompt;
pub use registry::{AgentRegistry, ModelFactory};
pub use runloop::{DelegateTool, RunLoop, RunOutcome, DEFAULT_MAX_ITERATIONS};
pub use session::{Session, SessionCommand};
pub use thread::{ForkOrigin, Thread, ThreadEntry};
