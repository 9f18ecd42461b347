// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The client-facing entry point: one [`Session`] per connected client,
//! serializing turns onto a single [`Thread`] through exactly one active
//! [`RunLoop`] at a time.

use std::collections::VecDeque;
use std::sync::atomic::AtomicU32;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::agent::Agent;
use crate::eventbus::EventBus;
use crate::events::EventKind;
use crate::registry::AgentRegistry;
use crate::runloop::{ToolApprover, DEFAULT_MAX_ITERATIONS, RunOutcome};
use crate::thread::Thread;

/// A client command, as described in the external-interface surface: submit a
/// message, answer a pending invite/choice, stop the current turn, or switch
/// project/thread.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    Submit { text: String, agent_hint: Option<String> },
    AnswerInvite { parent_id: String, answer: String },
    AnswerChoice { parent_id: String, choice: String },
    Stop,
    SelectProject { project_name: String },
}

struct PendingAsk {
    parent_id: String,
    responder: oneshot::Sender<String>,
}

struct QueuedTurn {
    text: String,
    agent_hint: Option<String>,
}

/// One connected client's conversational state. Holds the current project
/// and thread, the soft agent hint, and the plumbing needed to serialize
/// concurrent submissions behind a single active run loop.
pub struct Session {
    pub client_id: String,
    pub registry: Arc<AgentRegistry>,
    pub bus: Arc<EventBus>,
    pub thread: Mutex<Thread>,
    pub current_project: Mutex<Option<String>>,
    pub current_agent_hint: Mutex<Option<String>>,
    pub stack_depth_budget: u32,
    pub max_iterations: u32,
    cancel: Mutex<CancellationToken>,
    running: tokio::sync::Mutex<()>,
    queue: Mutex<VecDeque<QueuedTurn>>,
    pending_invite: Mutex<Option<PendingAsk>>,
    pending_choice: Mutex<Option<PendingAsk>>,
}

impl Session {
    pub fn new(client_id: impl Into<String>, registry: Arc<AgentRegistry>, bus: Arc<EventBus>) -> Arc<Self> {
        let session = Arc::new(Self {
            client_id: client_id.into(),
            registry: registry.clone(),
            bus,
            thread: Mutex::new(Thread::new()),
            current_project: Mutex::new(None),
            current_agent_hint: Mutex::new(None),
            stack_depth_budget: 3,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            cancel: Mutex::new(CancellationToken::new()),
            running: tokio::sync::Mutex::new(()),
            queue: Mutex::new(VecDeque::new()),
            pending_invite: Mutex::new(None),
            pending_choice: Mutex::new(None),
        });
        registry.set_tool_approver(session.clone() as Arc<dyn ToolApprover>);
        session
    }

    /// Enqueue a user submission. If a run loop is already active, this turn
    /// waits its turn FIFO; otherwise it starts draining immediately.
    pub async fn submit(self: &Arc<Self>, text: impl Into<String>, agent_hint: Option<String>) -> anyhow::Result<()> {
        self.queue.lock().unwrap().push_back(QueuedTurn { text: text.into(), agent_hint });
        self.drain_queue().await
    }

    /// Assert the session's stop signal, cancelling the currently active run
    /// loop (and, transitively, any in-flight tools or nested delegations).
    pub fn stop(&self) {
        self.cancel.lock().unwrap().cancel();
    }

    /// Register a pending invite awaiting a client answer correlated to
    /// `parent_id` (the id of the `Invite` event). Bypasses the turn queue —
    /// resolution happens directly against this slot, not in submission order.
    pub fn register_pending_invite(&self, parent_id: impl Into<String>) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        *self.pending_invite.lock().unwrap() = Some(PendingAsk { parent_id: parent_id.into(), responder: tx });
        rx
    }

    pub fn register_pending_choice(&self, parent_id: impl Into<String>) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        *self.pending_choice.lock().unwrap() = Some(PendingAsk { parent_id: parent_id.into(), responder: tx });
        rx
    }

    /// Resolve a pending invite if, and only if, `parent_id` matches the
    /// currently registered one. Returns whether it resolved.
    pub fn answer_invite(&self, parent_id: &str, answer: String) -> bool {
        resolve_pending(&self.pending_invite, parent_id, answer)
    }

    pub fn answer_choice(&self, parent_id: &str, choice: String) -> bool {
        resolve_pending(&self.pending_choice, parent_id, choice)
    }

    async fn drain_queue(self: &Arc<Self>) -> anyhow::Result<()> {
        let Ok(_guard) = self.running.try_lock() else {
            return Ok(());
        };
        loop {
            let next = self.queue.lock().unwrap().pop_front();
            let Some(turn) = next else { break };
            self.run_one_turn(&turn.text, turn.agent_hint.as_deref()).await?;
        }
        Ok(())
    }

    async fn run_one_turn(self: &Arc<Self>, text: &str, explicit_agent: Option<&str>) -> anyhow::Result<()> {
        let last_used = {
            let thread = self.thread.lock().unwrap();
            thread.last_agent_name().map(str::to_string)
        };
        let project = self.current_project.lock().unwrap().clone();
        let hint = self.current_agent_hint.lock().unwrap().clone();
        let explicit = explicit_agent.or(hint.as_deref());

        let target_name = self.registry.resolve_target(explicit, last_used.as_deref(), project.as_deref())?;
        let agent: Arc<Agent> = self.registry.get_or_build(&target_name)?;

        let cancel = {
            let mut slot = self.cancel.lock().unwrap();
            if slot.is_cancelled() {
                *slot = CancellationToken::new();
            }
            slot.clone()
        };

        let stack_depth = Arc::new(AtomicU32::new(self.stack_depth_budget));
        let mut thread = self.thread.lock().unwrap().clone();
        let outcome = agent
            .run(text, &mut thread, self.bus.clone(), self.registry.clone(), stack_depth, cancel, self.max_iterations)
            .await?;
        *self.thread.lock().unwrap() = thread;

        *self.current_agent_hint.lock().unwrap() = Some(target_name);
        if matches!(outcome, RunOutcome::Interrupted) {
            self.bus.publish_warn("turn interrupted by stop signal");
        }
        Ok(())
    }
}

#[async_trait]
impl ToolApprover for Session {
    /// Publish an `Invite` asking the client to allow or deny the call, then
    /// block on its answer via the same pending-invite slot used for
    /// `AnswerInvite` client commands. Any answer other than `y`/`yes`
    /// (case-insensitive) is treated as a denial, as is a dropped channel.
    async fn approve(&self, tool_name: &str, summary: &str) -> bool {
        let event = self.bus.publish(
            EventKind::Invite {
                invite: format!("Allow {tool_name} ({summary})? [y/N]"),
                default_value: Some("n".to_string()),
            },
            None,
        );
        let rx = self.register_pending_invite(event.id);
        match rx.await {
            Ok(answer) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
            Err(_) => false,
        }
    }
}

fn resolve_pending(slot: &Mutex<Option<PendingAsk>>, parent_id: &str, answer: String) -> bool {
    let mut guard = slot.lock().unwrap();
    if guard.as_ref().map(|p| p.parent_id.as_str()) == Some(parent_id) {
        let pending = guard.take().unwrap();
        let _ = pending.responder.send(answer);
        true
    } else {
        false
    }
}
