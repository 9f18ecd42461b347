// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The heart of the engine: drives one user turn against one (agent, thread)
//! pair through the model↔tools alternation until a final answer or a stop
//! condition is reached.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use coday_config::CompactionStrategy;
use coday_model::{CompletionRequest, FunctionCall, Message, MessageContent, ResponseEvent, Role, ToolSchema as ModelToolSchema};
use coday_tools::policy::ApprovalPolicy;
use coday_tools::{Tool, ToolCall, ToolOutput};
use futures::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::agent::Agent;
use crate::compact::compact_session_with_strategy;
use crate::eventbus::EventBus;
use crate::events::{ContentPart, EventKind, MessageRole};
use crate::registry::AgentRegistry;
use crate::thread::{Thread, ThreadEntry};

/// Asks an external party (the connected client, via its event bus and
/// pending-invite plumbing) whether an `Ask`-policy tool call may proceed.
#[async_trait]
pub trait ToolApprover: Send + Sync {
    async fn approve(&self, tool_name: &str, summary: &str) -> bool;
}

pub const DEFAULT_MAX_ITERATIONS: u32 = 20;
const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);
/// Tools considered idempotent and read-only; the run loop may execute a
/// round of them concurrently rather than one at a time.
const SAFE_PARALLEL_TOOLS: &[&str] = &["read_file", "list_dir", "web_fetch"];
const DEFAULT_CONTEXT_WINDOW: usize = 128_000;
const COMPACTION_THRESHOLD: f32 = 0.85;

#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The turn finished normally with the given assistant text.
    Done(String),
    /// The session's stop signal was asserted mid-turn.
    Interrupted,
    /// The iteration cap was hit before a final answer was produced.
    BudgetExhausted,
}

/// A built-in tool that forks the calling thread and runs a nested
/// [`RunLoop`] under a different agent. Its schema is registered in a
/// ToolSet like any other tool, but [`RunLoop`] intercepts calls to it by
/// name before dispatch — `execute` here is never reached in normal
/// operation, which avoids giving the tool trait object a live reference to
/// the thread/session state it would need to actually delegate.
pub struct DelegateTool;

#[async_trait]
impl Tool for DelegateTool {
    fn name(&self) -> &str {
        "delegate"
    }

    fn description(&self) -> &str {
        "Delegate a focused task to another agent. The task runs on a forked copy \
         of the current thread; only the delegate's final answer is returned."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "task": { "type": "string", "description": "The task for the delegate agent" },
                "agentName": { "type": "string", "description": "Name (or unambiguous prefix) of the target agent" }
            },
            "required": ["task", "agentName"]
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        ToolOutput::err(
            &call.id,
            "delegate must be intercepted by the run loop, not executed directly",
        )
    }
}

/// Rewrite a child's event for republishing on the parent bus: `Message` and
/// `Text` speaker names gain a `-> <childAgent>` prefix. If the speaker is
/// already the agent the prefix names (the child's own events), the prefix
/// replaces the name outright instead of duplicating it.
fn prefix_event_kind(kind: EventKind, prefix: &str) -> EventKind {
    fn prefixed(prefix: &str, speaker: &str) -> String {
        if !speaker.is_empty() && prefix.ends_with(speaker) {
            prefix.to_string()
        } else {
            format!("{prefix} {speaker}")
        }
    }
    match kind {
        EventKind::Message { role, speaker_name, content } => EventKind::Message {
            role,
            speaker_name: prefixed(prefix, &speaker_name),
            content,
        },
        EventKind::Text { speaker, text } => EventKind::Text {
            speaker: Some(prefixed(prefix, &speaker.unwrap_or_default())),
            text,
        },
        other => other,
    }
}

pub struct RunLoop {
    agent: Arc<Agent>,
    registry: Arc<AgentRegistry>,
    bus: Arc<EventBus>,
    cancel: CancellationToken,
    stack_depth: Arc<AtomicU32>,
    max_iterations: u32,
    tool_timeout: Duration,
    context_window: usize,
}

impl RunLoop {
    pub fn new(
        agent: Arc<Agent>,
        registry: Arc<AgentRegistry>,
        bus: Arc<EventBus>,
        cancel: CancellationToken,
        stack_depth: Arc<AtomicU32>,
        max_iterations: u32,
    ) -> Self {
        Self {
            agent,
            registry,
            bus,
            cancel,
            stack_depth,
            max_iterations,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            context_window: DEFAULT_CONTEXT_WINDOW,
        }
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_context_window(mut self, tokens: usize) -> Self {
        self.context_window = tokens;
        self
    }

    /// Convert the thread's entries into the provider-neutral message list,
    /// prefixed by the agent's composed system prompt.
    fn render_messages(&self, thread: &Thread) -> Vec<Message> {
        let mut messages = vec![Message::system(self.agent.system_prompt.clone())];
        for entry in thread.get_all() {
            match entry {
                ThreadEntry::UserMessage { content, .. } => {
                    messages.push(Message::user(render_content_text(content)));
                }
                ThreadEntry::AgentMessage { content, .. } => {
                    messages.push(Message::assistant(render_content_text(content)));
                }
                ThreadEntry::ToolRequest { tool_name, call_id, args_json, .. } => {
                    messages.push(Message {
                        role: Role::Assistant,
                        content: MessageContent::ToolCall {
                            tool_call_id: call_id.clone(),
                            function: FunctionCall { name: tool_name.clone(), arguments: args_json.clone() },
                        },
                    });
                }
                ThreadEntry::ToolResponse { call_id, result_json, error_text, .. } => {
                    let text = result_json.clone().unwrap_or_else(|| error_text.clone().unwrap_or_default());
                    messages.push(Message::tool_result(call_id.clone(), text));
                }
            }
        }
        messages
    }

    fn model_tool_schemas(&self) -> Vec<ModelToolSchema> {
        self.agent
            .tools
            .schemas()
            .into_iter()
            .map(|s| ModelToolSchema { name: s.name, description: s.description, parameters: s.parameters })
            .collect()
    }

    async fn maybe_compact(&self, messages: &mut Vec<Message>) {
        let estimate: usize = messages.iter().map(|m| m.approx_tokens()).sum();
        let budget = (self.context_window as f32 * COMPACTION_THRESHOLD) as usize;
        if estimate < budget {
            return;
        }
        let system = messages.first().cloned();
        let before = compact_session_with_strategy(messages, system.clone(), &CompactionStrategy::Structured);
        debug!(before, after = messages.len(), "compacting thread history before model call");

        let req = CompletionRequest { messages: messages.clone(), tools: vec![], stream: true, ..Default::default() };
        let Ok(mut stream) = self.agent.model.complete(req).await else {
            self.bus.publish_warn("context compaction call failed; continuing with truncated prompt");
            return;
        };
        let mut summary = String::new();
        while let Some(event) = stream.next().await {
            if let Ok(ResponseEvent::TextDelta(delta)) = event {
                summary.push_str(&delta);
            }
        }
        messages.clear();
        if let Some(sys) = system {
            messages.push(sys);
        }
        messages.push(Message::assistant(summary));
    }

    /// Execute one user turn. The caller must have already appended the
    /// triggering `UserMessage` to `thread`.
    pub async fn run(&mut self, thread: &mut Thread) -> anyhow::Result<RunOutcome> {
        let agent_name = self.agent.name().to_string();
        let mut iteration = 0u32;

        loop {
            iteration += 1;
            if iteration > self.max_iterations {
                self.bus.publish_warn("Tool-use budget exhausted");
                thread.append(ThreadEntry::agent(&agent_name, "Tool-use budget exhausted."))?;
                self.emit_message(&agent_name, "Tool-use budget exhausted.");
                return Ok(RunOutcome::BudgetExhausted);
            }

            if self.cancel.is_cancelled() {
                return Ok(RunOutcome::Interrupted);
            }

            self.bus.publish(EventKind::Thinking, None);

            let mut messages = self.render_messages(thread);
            self.maybe_compact(&mut messages).await;

            let req = CompletionRequest {
                messages,
                tools: self.model_tool_schemas(),
                stream: true,
                system_dynamic_suffix: None,
                cache_key: Some(thread.id.clone()),
            };

            let mut stream = self.agent.model.complete(req).await?;

            let mut text_buf = String::new();
            let mut tool_calls: Vec<(u32, String, String, String)> = Vec::new();
            let mut cancelled_mid_stream = false;

            loop {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        cancelled_mid_stream = true;
                        break;
                    }
                    next = stream.next() => {
                        match next {
                            None => break,
                            Some(Ok(ResponseEvent::TextDelta(delta))) => {
                                text_buf.push_str(&delta);
                                self.bus.publish(EventKind::Text { speaker: Some(agent_name.clone()), text: delta }, None);
                            }
                            Some(Ok(ResponseEvent::ThinkingDelta(_))) => {}
                            Some(Ok(ResponseEvent::ToolCall { index, id, name, arguments })) => {
                                match tool_calls.iter_mut().find(|(i, ..)| *i == index) {
                                    Some((_, _, _, args)) => args.push_str(&arguments),
                                    None => tool_calls.push((index, id, name, arguments)),
                                }
                            }
                            Some(Ok(ResponseEvent::Usage { .. })) => {}
                            Some(Ok(ResponseEvent::MaxTokens)) | Some(Ok(ResponseEvent::Done)) => break,
                            Some(Ok(ResponseEvent::Error(message))) => {
                                self.bus.publish_warn(message);
                                break;
                            }
                            Some(Err(e)) => {
                                self.bus.publish_warn(format!("model error: {e}"));
                                break;
                            }
                        }
                    }
                }
            }

            if cancelled_mid_stream {
                return Ok(RunOutcome::Interrupted);
            }

            if tool_calls.is_empty() {
                thread.append(ThreadEntry::agent(&agent_name, &text_buf))?;
                self.emit_message(&agent_name, &text_buf);
                self.maybe_auto_name(thread).await;
                return Ok(RunOutcome::Done(text_buf));
            }

            tool_calls.sort_by_key(|(i, ..)| *i);
            for (_, call_id, tool_name, args_json) in &tool_calls {
                thread.append(ThreadEntry::tool_request(&agent_name, tool_name, call_id, args_json))?;
                self.bus.publish(
                    EventKind::ToolRequest { tool_name: tool_name.clone(), call_id: call_id.clone(), args_json: args_json.clone() },
                    None,
                );
            }

            let (delegate_calls, direct_calls): (Vec<_>, Vec<_>) =
                tool_calls.iter().cloned().partition(|(_, _, name, _)| name == "delegate");

            let mut results: Vec<(String, Result<String, String>)> = Vec::with_capacity(tool_calls.len());
            for (_, call_id, _, args_json) in &delegate_calls {
                results.push((call_id.clone(), self.handle_delegate(args_json, thread).await));
                if self.cancel.is_cancelled() {
                    break;
                }
            }

            let all_safe = direct_calls.iter().all(|(_, _, name, _)| SAFE_PARALLEL_TOOLS.contains(&name.as_str()));
            if !self.cancel.is_cancelled() {
                if all_safe {
                    let futs = direct_calls
                        .iter()
                        .map(|(_, call_id, name, args)| self.execute_one(call_id.clone(), name.clone(), args.clone()));
                    results.extend(futures::future::join_all(futs).await);
                } else {
                    for (_, call_id, name, args) in &direct_calls {
                        results.push(self.execute_one(call_id.clone(), name.clone(), args.clone()).await);
                        if self.cancel.is_cancelled() {
                            break;
                        }
                    }
                }
            }

            let mut answered: std::collections::HashSet<String> = std::collections::HashSet::new();
            for (call_id, result) in results {
                answered.insert(call_id.clone());
                let entry = match result {
                    Ok(output) => ThreadEntry::tool_response_ok(&call_id, output),
                    Err(err) => ThreadEntry::tool_response_err(&call_id, err),
                };
                let output_text = match &entry {
                    ThreadEntry::ToolResponse { result_json, error_text, .. } => {
                        result_json.clone().unwrap_or_else(|| error_text.clone().unwrap_or_default())
                    }
                    _ => String::new(),
                };
                thread.append(entry)?;
                self.bus.publish(EventKind::ToolResponse { call_id, output: output_text }, None);
            }
            // Tool requests abandoned by cancellation mid-round are closed with a
            // synthetic cancelled response so the thread never holds an orphan
            // ToolRequest.
            for (_, call_id, _, _) in &tool_calls {
                if !answered.contains(call_id) {
                    thread.append(ThreadEntry::tool_response_ok(call_id, "cancelled"))?;
                    self.bus.publish(EventKind::ToolResponse { call_id: call_id.clone(), output: "cancelled".into() }, None);
                }
            }

            if self.cancel.is_cancelled() {
                return Ok(RunOutcome::Interrupted);
            }
            // loop back to S1
        }
    }

    async fn execute_one(&self, call_id: String, name: String, args_json: String) -> (String, Result<String, String>) {
        let args_value: serde_json::Value = match serde_json::from_str(&args_json) {
            Ok(v) => v,
            Err(e) => return (call_id, Err(format!("invalid arguments: {e}"))),
        };
        let call = ToolCall { id: call_id.clone(), name, args: args_value };

        match self.decide_approval(&call).await {
            ApprovalPolicy::Deny => return (call_id, Err(format!("tool '{}' was denied by policy", call.name))),
            ApprovalPolicy::Ask => return (call_id, Err(format!("tool '{}' was not approved", call.name))),
            ApprovalPolicy::Auto => {}
        }

        let exec = self.agent.tools.execute(&call);
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err("cancelled".to_string()),
            res = tokio::time::timeout(self.tool_timeout, exec) => match res {
                Ok(out) if out.is_error => Err(out.content),
                Ok(out) => Ok(out.content),
                Err(_) => Err(format!("tool timed out after {:?}", self.tool_timeout)),
            },
        };
        (call_id, outcome)
    }

    /// Resolve a tool call's approval decision. Config `deny_patterns` always
    /// win; config `auto_approve_patterns` always approve. Otherwise the
    /// tool's own [`Tool::default_policy`] governs: `Auto` runs immediately,
    /// `Deny` refuses, and `Ask` is resolved through the installed
    /// [`ToolApprover`] (falling back to `Auto` when none is installed —
    /// there is no one to ask in a headless run).
    async fn decide_approval(&self, call: &ToolCall) -> ApprovalPolicy {
        let command = command_repr(&call.name, &call.args);
        match self.registry.tool_policy().decide(&command) {
            ApprovalPolicy::Deny => return ApprovalPolicy::Deny,
            ApprovalPolicy::Auto => return ApprovalPolicy::Auto,
            ApprovalPolicy::Ask => {}
        }

        let tool_default = self
            .agent
            .tools
            .get(&call.name)
            .map(|t| t.default_policy())
            .unwrap_or(ApprovalPolicy::Ask);

        match tool_default {
            ApprovalPolicy::Auto => ApprovalPolicy::Auto,
            ApprovalPolicy::Deny => ApprovalPolicy::Deny,
            ApprovalPolicy::Ask => match self.registry.tool_approver() {
                Some(approver) => {
                    let summary = command;
                    if approver.approve(&call.name, &summary).await {
                        ApprovalPolicy::Auto
                    } else {
                        ApprovalPolicy::Ask
                    }
                }
                None => ApprovalPolicy::Auto,
            },
        }
    }

    /// Intercept a `delegate` call before generic tool dispatch: fork the
    /// thread for the target agent, run a nested [`RunLoop`] on the fork, and
    /// republish its events on the parent bus with a `-> <agent>` prefix.
    async fn handle_delegate(&self, args_json: &str, thread: &mut Thread) -> Result<String, String> {
        let args: serde_json::Value = serde_json::from_str(args_json).map_err(|e| format!("invalid arguments: {e}"))?;
        let task = args
            .get("task")
            .and_then(|v| v.as_str())
            .ok_or("delegate requires a 'task' string")?
            .to_string();
        let agent_name = args
            .get("agentName")
            .and_then(|v| v.as_str())
            .ok_or("delegate requires an 'agentName' string")?;

        let remaining = self.stack_depth.load(Ordering::SeqCst);
        if remaining == 0 {
            return Ok("delegation refused: nesting budget exhausted".to_string());
        }

        let matches = self.registry.find_by_prefix(agent_name);
        let target_name = match matches.len() {
            0 => return Err(format!("no agent matches '{agent_name}'")),
            1 => matches[0].name.clone(),
            _ => {
                return Err(format!(
                    "ambiguous agent prefix '{agent_name}': {}",
                    matches.iter().map(|d| d.name.as_str()).collect::<Vec<_>>().join(", ")
                ))
            }
        };
        let child_agent = self.registry.get_or_build(&target_name).map_err(|e| e.to_string())?;

        let mut child_thread = thread.fork(Some(target_name.clone()));
        self.stack_depth.fetch_sub(1, Ordering::SeqCst);

        let child_bus = Arc::new(EventBus::new());
        let (mut child_rx, _) = child_bus.subscribe();
        let parent_bus = self.bus.clone();
        let prefix = format!("-> {target_name}");
        let forward = tokio::spawn(async move {
            while let Ok(event) = child_rx.recv().await {
                let kind = prefix_event_kind(event.kind, &prefix);
                parent_bus.publish(kind, event.parent_id);
            }
        });

        let outcome = child_agent
            .run(
                &task,
                &mut child_thread,
                child_bus,
                self.registry.clone(),
                self.stack_depth.clone(),
                self.cancel.clone(),
                self.max_iterations,
            )
            .await;
        forward.abort();
        self.stack_depth.fetch_add(1, Ordering::SeqCst);

        match outcome {
            Ok(RunOutcome::Done(text)) => Ok(text),
            Ok(RunOutcome::Interrupted) => Err("delegated task was interrupted".to_string()),
            Ok(RunOutcome::BudgetExhausted) => Ok("Tool-use budget exhausted.".to_string()),
            Err(e) => Err(format!("delegated task failed: {e}")),
        }
    }

    fn emit_message(&self, agent_name: &str, text: &str) {
        self.bus.publish(
            EventKind::Message {
                role: MessageRole::Assistant,
                speaker_name: agent_name.to_string(),
                content: vec![ContentPart::text(text)],
            },
            None,
        );
    }

    async fn maybe_auto_name(&self, thread: &mut Thread) {
        if thread.name.is_some() || thread.count_user_messages() == 0 {
            return;
        }
        let seed = thread.first_user_text(3);
        let req = CompletionRequest {
            messages: vec![
                Message::system("Generate a short (<=6 word) title for this conversation. Wrap it exactly as <title>...</title> with no other text."),
                Message::user(seed),
            ],
            tools: vec![],
            stream: true,
            ..Default::default()
        };

        let title = match self.agent.model.complete(req).await {
            Ok(mut stream) => {
                let mut buf = String::new();
                while let Some(ev) = stream.next().await {
                    if let Ok(ResponseEvent::TextDelta(d)) = ev {
                        buf.push_str(&d);
                    }
                }
                extract_title(&buf)
            }
            Err(_) => None,
        };

        let succeeded = title.is_some();
        let name = title.unwrap_or_else(|| format!("Thread {}", chrono::Utc::now().format("%Y-%m-%d")));
        thread.name = Some(name.clone());
        if succeeded {
            self.bus.publish(
                EventKind::Message {
                    role: MessageRole::System,
                    speaker_name: self.agent.name().to_string(),
                    content: vec![ContentPart::text(format!("Thread auto-renamed to \"{name}\""))],
                },
                None,
            );
        }
    }
}

/// Build the command-like string a [`ToolPolicy`](coday_tools::policy::ToolPolicy)'s
/// glob patterns are matched against: the tool name followed by its most
/// identifying argument (`path`/`command`, or the whole argument object).
fn command_repr(tool_name: &str, args: &serde_json::Value) -> String {
    let arg = args
        .get("path")
        .or_else(|| args.get("command"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| args.to_string());
    format!("{tool_name} {arg}")
}

fn render_content_text(content: &[ContentPart]) -> String {
    content
        .iter()
        .filter_map(|p| match p {
            ContentPart::Text { text } => Some(text.as_str()),
            ContentPart::Image { .. } => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn extract_title(raw: &str) -> Option<String> {
    let start = raw.find("<title>")? + "<title>".len();
    let end = raw.find("</title>")?;
    if end <= start {
        return None;
    }
    let title = raw[start..end].trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_title_parses_tagged_output() {
        assert_eq!(extract_title("noise <title>Fix login bug</title> noise"), Some("Fix login bug".to_string()));
    }

    #[test]
    fn extract_title_missing_tags_returns_none() {
        assert_eq!(extract_title("no tags here"), None);
    }

    #[test]
    fn prefix_event_kind_replaces_own_speaker_name() {
        let kind = EventKind::Message {
            role: MessageRole::Assistant,
            speaker_name: "researcher".into(),
            content: vec![],
        };
        let prefixed = prefix_event_kind(kind, "-> researcher");
        match prefixed {
            EventKind::Message { speaker_name, .. } => assert_eq!(speaker_name, "-> researcher"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn prefix_event_kind_prepends_for_other_speakers() {
        let kind = EventKind::Message {
            role: MessageRole::Assistant,
            speaker_name: "grandchild".into(),
            content: vec![],
        };
        let prefixed = prefix_event_kind(kind, "-> researcher");
        match prefixed {
            EventKind::Message { speaker_name, .. } => assert_eq!(speaker_name, "-> researcher grandchild"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn prefix_event_kind_passes_through_other_kinds() {
        let prefixed = prefix_event_kind(EventKind::Heartbeat, "-> x");
        assert!(matches!(prefixed, EventKind::Heartbeat));
    }
}
