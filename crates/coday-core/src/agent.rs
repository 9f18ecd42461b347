// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Runtime instance: an [`AgentDefinition`] bound to a [`ModelProvider`] and a
//! materialized, integration-filtered tool set.

use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use coday_model::ModelProvider;
use coday_tools::ToolRegistry;
use tokio_util::sync::CancellationToken;

use crate::agent_def::AgentDefinition;
use crate::eventbus::EventBus;
use crate::events::EventKind;
use crate::registry::AgentRegistry;
use crate::runloop::{RunLoop, RunOutcome};
use crate::thread::{Thread, ThreadEntry};

/// Composition of an [`AgentDefinition`] with a bound model and a filtered
/// tool set.  The agent holds no thread state of its own — it is pure
/// configuration plus an execution entry point.
pub struct Agent {
    pub definition: AgentDefinition,
    pub model: Arc<dyn ModelProvider>,
    pub tools: Arc<ToolRegistry>,
    pub system_prompt: String,
}

impl Agent {
    pub fn new(
        definition: AgentDefinition,
        model: Arc<dyn ModelProvider>,
        tools: Arc<ToolRegistry>,
        system_prompt: String,
    ) -> Self {
        Self { definition, model, tools, system_prompt }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Append `user_input` to `thread`, publish the `Answer` event, and drive
    /// a [`RunLoop`] to completion.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        self: &Arc<Self>,
        user_input: &str,
        thread: &mut Thread,
        bus: Arc<EventBus>,
        registry: Arc<AgentRegistry>,
        stack_depth: Arc<AtomicU32>,
        cancel: CancellationToken,
        max_iterations: u32,
    ) -> anyhow::Result<RunOutcome> {
        thread.append(ThreadEntry::user("user", user_input))?;
        bus.publish(EventKind::Answer { answer: user_input.to_string() }, None);

        let mut run_loop = RunLoop::new(self.clone(), registry, bus, cancel, stack_depth, max_iterations);
        run_loop.run(thread).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coday_config::ToolsConfig;
    use coday_model::MockProvider;
    use coday_tools::policy::ToolPolicy;
    use std::sync::atomic::AtomicU32;

    fn mock_agent() -> Arc<Agent> {
        let definition = AgentDefinition::builtin_fallback("mock", "mock-1");
        let model: Arc<dyn ModelProvider> = Arc::new(MockProvider::default());
        let tools = Arc::new(ToolRegistry::new());
        Arc::new(Agent::new(definition, model, tools, "be helpful".to_string()))
    }

    #[tokio::test]
    async fn run_appends_user_message_and_completes() {
        let agent = mock_agent();
        let mut thread = Thread::new();
        let bus = Arc::new(EventBus::new());
        let registry = Arc::new(AgentRegistry::new_empty(
            Arc::new(ToolRegistry::new()),
            Arc::new(ToolPolicy::from_config(&ToolsConfig::default())),
        ));
        let outcome = agent
            .run(
                "hello",
                &mut thread,
                bus,
                registry,
                Arc::new(AtomicU32::new(3)),
                CancellationToken::new(),
                20,
            )
            .await
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Done(_)));
        assert_eq!(thread.count_user_messages(), 1);
    }
}
