// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! End-to-end scenarios driving a real [`Agent`]/[`RunLoop`] pair, matching
//! the canonical turn shapes: a plain answer, a tool round-trip, and a
//! mid-tool stop.
#[cfg(test)]
mod scenarios {
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    use async_trait::async_trait;
    use coday_model::{ModelProvider, ScriptedMockProvider};
    use coday_tools::policy::ApprovalPolicy;
    use coday_tools::{Tool, ToolCall, ToolOutput, ToolRegistry};
    use serde_json::{json, Value};
    use tokio_util::sync::CancellationToken;

    use crate::agent::Agent;
    use crate::agent_def::AgentDefinition;
    use crate::eventbus::EventBus;
    use crate::prompts::compose_system_prompt;
    use crate::registry::AgentRegistry;
    use crate::thread::{Thread, ThreadEntry};

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its input back"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object", "properties": { "text": { "type": "string" } } })
        }
        fn default_policy(&self) -> ApprovalPolicy {
            ApprovalPolicy::Auto
        }
        async fn execute(&self, call: &ToolCall) -> ToolOutput {
            let text = call.args.get("text").and_then(|v| v.as_str()).unwrap_or("");
            ToolOutput::ok(&call.id, format!("echo: {text}"))
        }
    }

    fn agent_with(model: Arc<dyn ModelProvider>, tools: ToolRegistry) -> Arc<Agent> {
        let definition = AgentDefinition::builtin_fallback("mock", "mock-model");
        let system_prompt = compose_system_prompt(&definition, None, None, None, &[]);
        Arc::new(Agent::new(definition, model, Arc::new(tools), system_prompt))
    }

    fn empty_registry() -> Arc<AgentRegistry> {
        Arc::new(AgentRegistry::new_empty(
            Arc::new(ToolRegistry::new()),
            Arc::new(coday_tools::policy::ToolPolicy::from_config(&coday_config::ToolsConfig::default())),
        ))
    }

    /// S1: a plain answer produces exactly two thread entries: the user
    /// message and the agent's reply.
    #[tokio::test]
    async fn s1_simple_answer_yields_two_entries() {
        let model = Arc::new(ScriptedMockProvider::always_text("hi there")) as Arc<dyn ModelProvider>;
        let agent = agent_with(model, ToolRegistry::new());
        let mut thread = Thread::new();
        let bus = Arc::new(EventBus::new());

        agent
            .run("hello", &mut thread, bus, empty_registry(), Arc::new(AtomicU32::new(3)), CancellationToken::new(), 20)
            .await
            .unwrap();

        assert_eq!(thread.get_all().len(), 2);
        assert!(matches!(thread.get_all()[0], ThreadEntry::UserMessage { .. }));
        assert!(matches!(thread.get_all()[1], ThreadEntry::AgentMessage { .. }));
    }

    /// S2: a tool round-trip produces four thread entries and the
    /// `ToolResponse`'s `call_id` matches the preceding `ToolRequest`'s.
    #[tokio::test]
    async fn s2_tool_round_trip_yields_four_entries_with_matching_call_id() {
        let model = Arc::new(ScriptedMockProvider::tool_then_text(
            "call-1",
            "echo",
            r#"{"text":"hi"}"#,
            "all done",
        )) as Arc<dyn ModelProvider>;
        let mut tools = ToolRegistry::new();
        tools.register(EchoTool);
        let agent = agent_with(model, tools);
        let mut thread = Thread::new();
        let bus = Arc::new(EventBus::new());

        agent
            .run("use the tool", &mut thread, bus, empty_registry(), Arc::new(AtomicU32::new(3)), CancellationToken::new(), 20)
            .await
            .unwrap();

        let entries = thread.get_all();
        assert_eq!(entries.len(), 4);
        let (req_id, req_call_id) = match &entries[1] {
            ThreadEntry::ToolRequest { id, call_id, .. } => (id.clone(), call_id.clone()),
            other => panic!("expected ToolRequest, got {other:?}"),
        };
        match &entries[2] {
            ThreadEntry::ToolResponse { call_id, result_json, .. } => {
                assert_eq!(*call_id, req_call_id);
                assert_eq!(result_json.as_deref(), Some("echo: hi"));
            }
            other => panic!("expected ToolResponse, got {other:?}"),
        }
        let _ = req_id;
        assert!(matches!(entries[3], ThreadEntry::AgentMessage { .. }));
    }

    /// S3: cancelling before the model stream starts aborts the turn without
    /// leaving an orphan `ToolRequest` and without appending a final answer.
    #[tokio::test]
    async fn s3_stop_before_model_call_yields_interrupted_with_unchanged_thread() {
        let model = Arc::new(ScriptedMockProvider::always_text("too late")) as Arc<dyn ModelProvider>;
        let agent = agent_with(model, ToolRegistry::new());
        let mut thread = Thread::new();
        let bus = Arc::new(EventBus::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = agent
            .run("hello", &mut thread, bus, empty_registry(), Arc::new(AtomicU32::new(3)), cancel, 20)
            .await
            .unwrap();

        assert!(matches!(outcome, crate::runloop::RunOutcome::Interrupted));
        // Only the user message was appended; no agent reply followed.
        assert_eq!(thread.get_all().len(), 1);
    }

    /// Budget exhaustion: a provider that always re-emits the same tool call
    /// never lets the turn settle on a final text answer, so the iteration
    /// cap must kick in and leave the thread in a consistent (fully matched)
    /// state.
    #[tokio::test]
    async fn iteration_cap_yields_budget_exhausted() {
        let scripts = (0..25)
            .map(|i| {
                vec![coday_model::ResponseEvent::ToolCall {
                    index: 0,
                    id: format!("call-{i}"),
                    name: "echo".into(),
                    arguments: r#"{"text":"loop"}"#.into(),
                }]
            })
            .collect();
        let model = Arc::new(coday_model::ScriptedMockProvider::new(scripts)) as Arc<dyn ModelProvider>;
        let mut tools = ToolRegistry::new();
        tools.register(EchoTool);
        let agent = agent_with(model, tools);
        let mut thread = Thread::new();
        let bus = Arc::new(EventBus::new());

        let outcome = agent
            .run("loop forever", &mut thread, bus, empty_registry(), Arc::new(AtomicU32::new(3)), CancellationToken::new(), 5)
            .await
            .unwrap();

        assert!(matches!(outcome, crate::runloop::RunOutcome::BudgetExhausted));
    }
}
