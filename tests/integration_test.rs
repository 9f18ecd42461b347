// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! End-to-end tests exercising the public crate boundary: config loading,
//! tool execution, and a full session turn against the mock model.
use std::sync::Arc;

use coday_config::{AgentConfig, Config, ToolsConfig};
use coday_core::{AgentRegistry, EventBus, EventKind, ModelFactory, Session};
use coday_model::{MockProvider, ModelProvider, ScriptedMockProvider};
use coday_tools::{
    ApprovalPolicy, ReadFileTool, Tool, ToolCall, ToolPolicy, ToolRegistry, WriteTool,
};

fn mock_registry() -> Arc<AgentRegistry> {
    let factory: ModelFactory = Arc::new(|_def| Ok(Arc::new(MockProvider) as Arc<dyn ModelProvider>));
    let policy = Arc::new(ToolPolicy::from_config(&ToolsConfig::default()));
    Arc::new(AgentRegistry::new(vec![], Arc::new(ToolRegistry::new()), factory, policy))
}

#[tokio::test]
async fn session_submit_yields_assistant_message_event() {
    let registry = mock_registry();
    let bus = Arc::new(EventBus::new());
    let (mut events, _) = bus.subscribe();

    let session = Session::new("client-1", registry, bus);
    session.submit("hello", None).await.unwrap();

    let mut saw_message = false;
    while let Ok(event) = events.try_recv() {
        if let EventKind::Message { content, .. } = event.kind {
            let text: String = content
                .iter()
                .filter_map(|p| match p {
                    coday_core::ContentPart::Text { text } => Some(text.clone()),
                    _ => None,
                })
                .collect();
            assert!(text.contains("MOCK"));
            saw_message = true;
        }
    }
    assert!(saw_message, "expected at least one Message event");
}

#[tokio::test]
async fn delegation_round_trip_yields_four_parent_entries() {
    let factory: ModelFactory = Arc::new(|_def| {
        Ok(Arc::new(ScriptedMockProvider::tool_then_text(
            "call-1",
            "echo",
            r#"{"text":"hi"}"#,
            "all done",
        )) as Arc<dyn ModelProvider>)
    });
    let mut tools = ToolRegistry::new();
    tools.register(EchoTool);

    let mut integrations = std::collections::HashMap::new();
    integrations.insert("other".to_string(), Some(vec![]));
    let definition = coday_core::AgentDefinition {
        name: "coday".into(),
        description: String::new(),
        instructions: "test agent".into(),
        model_provider: "mock".into(),
        model_name: "mock-model".into(),
        assistant_id: None,
        integrations,
        mandatory_docs: vec![],
        optional_docs: vec![],
        temperature: None,
        max_tokens: None,
    };

    let policy = Arc::new(ToolPolicy::from_config(&ToolsConfig::default()));
    let registry = Arc::new(AgentRegistry::new(vec![definition], Arc::new(tools), factory, policy));
    let bus = Arc::new(EventBus::new());
    let session = Session::new("client-1", registry, bus);

    session.submit("please echo hi", None).await.unwrap();
    assert_eq!(session.thread.lock().unwrap().get_all().len(), 4);
}

struct EchoTool;
#[async_trait::async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "echoes its input back"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}})
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }
    async fn execute(&self, call: &ToolCall) -> coday_tools::ToolOutput {
        let text = call.args.get("text").and_then(|v| v.as_str()).unwrap_or("");
        coday_tools::ToolOutput::ok(&call.id, format!("echo: {text}"))
    }
}

#[test]
fn config_defaults_are_valid() {
    let cfg = Config::default();
    assert_eq!(cfg.model.provider, "openai");
    assert!(cfg.agent.max_tool_rounds > 0);
    assert!(cfg.agent.compaction_threshold > 0.0);
}

#[test]
fn agent_config_default_allows_overriding_compaction_threshold() {
    let cfg = AgentConfig {
        compaction_threshold: 0.5,
        ..AgentConfig::default()
    };
    assert_eq!(cfg.compaction_threshold, 0.5);
}

#[test]
fn tool_policy_auto_approve() {
    let cfg = ToolsConfig::default();
    let policy = ToolPolicy::from_config(&cfg);
    assert_eq!(policy.decide("cat /etc/hosts"), ApprovalPolicy::Auto);
    assert_eq!(policy.decide("ls /tmp"), ApprovalPolicy::Auto);
}

#[test]
fn tool_policy_deny() {
    let cfg = ToolsConfig {
        deny_patterns: vec!["rm -rf /*".into()],
        ..ToolsConfig::default()
    };
    let policy = ToolPolicy::from_config(&cfg);
    assert_eq!(policy.decide("rm -rf /*"), ApprovalPolicy::Deny);
}

#[tokio::test]
async fn fs_tool_write_read_roundtrip() {
    let path = std::env::temp_dir().join(format!("coday_test_{}.txt", uuid::Uuid::new_v4()));
    let path_str = path.to_string_lossy().to_string();

    let write_call = ToolCall {
        id: "w1".into(),
        name: "write".into(),
        args: serde_json::json!({ "path": path_str, "content": "roundtrip" }),
    };
    let wo = WriteTool.execute(&write_call).await;
    assert!(!wo.is_error, "write failed: {}", wo.content);

    let read_call = ToolCall {
        id: "r1".into(),
        name: "read_file".into(),
        args: serde_json::json!({ "path": path_str }),
    };
    let ro = ReadFileTool.execute(&read_call).await;
    assert!(!ro.is_error);
    assert!(ro.content.contains("roundtrip"));

    let _ = std::fs::remove_file(&path);
}
