// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The durable, ordered conversation log that a run loop reads and appends to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::ContentPart;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ThreadEntry {
    UserMessage {
        id: String,
        speaker: String,
        content: Vec<ContentPart>,
    },
    AgentMessage {
        id: String,
        agent_name: String,
        content: Vec<ContentPart>,
    },
    ToolRequest {
        id: String,
        agent_name: String,
        tool_name: String,
        call_id: String,
        args_json: String,
    },
    ToolResponse {
        id: String,
        call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result_json: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_text: Option<String>,
    },
}

impl ThreadEntry {
    pub fn id(&self) -> &str {
        match self {
            Self::UserMessage { id, .. }
            | Self::AgentMessage { id, .. }
            | Self::ToolRequest { id, .. }
            | Self::ToolResponse { id, .. } => id,
        }
    }

    pub fn user(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self::UserMessage {
            id: Uuid::new_v4().to_string(),
            speaker: speaker.into(),
            content: vec![ContentPart::text(text.into())],
        }
    }

    pub fn agent(agent_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::AgentMessage {
            id: Uuid::new_v4().to_string(),
            agent_name: agent_name.into(),
            content: vec![ContentPart::text(text.into())],
        }
    }

    pub fn tool_request(
        agent_name: impl Into<String>,
        tool_name: impl Into<String>,
        call_id: impl Into<String>,
        args_json: impl Into<String>,
    ) -> Self {
        Self::ToolRequest {
            id: Uuid::new_v4().to_string(),
            agent_name: agent_name.into(),
            tool_name: tool_name.into(),
            call_id: call_id.into(),
            args_json: args_json.into(),
        }
    }

    pub fn tool_response_ok(call_id: impl Into<String>, result_json: impl Into<String>) -> Self {
        Self::ToolResponse {
            id: Uuid::new_v4().to_string(),
            call_id: call_id.into(),
            result_json: Some(result_json.into()),
            error_text: None,
        }
    }

    pub fn tool_response_err(call_id: impl Into<String>, error_text: impl Into<String>) -> Self {
        Self::ToolResponse {
            id: Uuid::new_v4().to_string(),
            call_id: call_id.into(),
            result_json: None,
            error_text: Some(error_text.into()),
        }
    }

    /// Plain text of a user/agent message entry, if any.
    pub fn as_text(&self) -> Option<String> {
        let content = match self {
            Self::UserMessage { content, .. } | Self::AgentMessage { content, .. } => content,
            _ => return None,
        };
        Some(
            content
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }
}

/// Records where a forked thread came from, for provenance/debugging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForkOrigin {
    pub parent_thread_id: String,
    pub at_entry_id: String,
    pub for_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    entries: Vec<ThreadEntry>,
    pub fork_depth: u32,
    pub fork_origin: Option<ForkOrigin>,
}

impl Thread {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: None,
            created_at: now,
            modified_at: now,
            entries: Vec::new(),
            fork_depth: 0,
            fork_origin: None,
        }
    }

    /// The call ids of `ToolRequest` entries with no matching `ToolResponse` yet.
    fn pending_call_ids(&self) -> Vec<&str> {
        let mut pending = Vec::new();
        for entry in &self.entries {
            match entry {
                ThreadEntry::ToolRequest { call_id, .. } => pending.push(call_id.as_str()),
                ThreadEntry::ToolResponse { call_id, .. } => {
                    pending.retain(|id| *id != call_id.as_str());
                }
                _ => {}
            }
        }
        pending
    }

    /// Append an entry. Rejects appends while a `ToolRequest` is unmatched,
    /// except to append that very `ToolResponse`.
    pub fn append(&mut self, entry: ThreadEntry) -> anyhow::Result<&str> {
        let pending = self.pending_call_ids();
        if !pending.is_empty() {
            let allowed = matches!(&entry, ThreadEntry::ToolResponse { call_id, .. } if pending.contains(&call_id.as_str()));
            if !allowed {
                anyhow::bail!(
                    "cannot append while tool requests {:?} are unmatched",
                    pending
                );
            }
        }
        self.modified_at = Utc::now();
        self.entries.push(entry);
        Ok(self.entries.last().unwrap().id())
    }

    pub fn get_all(&self) -> &[ThreadEntry] {
        &self.entries
    }

    pub fn get_since(&self, id: &str) -> &[ThreadEntry] {
        match self.entries.iter().position(|e| e.id() == id) {
            Some(idx) => &self.entries[idx + 1..],
            None => &self.entries,
        }
    }

    /// Create a child thread seeded with the full entry list of this thread.
    pub fn fork(&mut self, for_agent: Option<String>) -> Thread {
        self.fork_depth += 1;
        let now = Utc::now();
        Thread {
            id: Uuid::new_v4().to_string(),
            name: None,
            created_at: now,
            modified_at: now,
            entries: self.entries.clone(),
            fork_depth: self.fork_depth,
            fork_origin: Some(ForkOrigin {
                parent_thread_id: self.id.clone(),
                at_entry_id: self.entries.last().map(|e| e.id().to_string()).unwrap_or_default(),
                for_agent,
            }),
        }
    }

    /// Append a single summary `AgentMessage` representing a delegated task's
    /// result. Child entries are never inlined into the parent.
    pub fn merge(&mut self, child: &Thread, agent_name: impl Into<String>, summary: impl Into<String>) -> anyhow::Result<()> {
        let _ = child;
        self.append(ThreadEntry::agent(agent_name, summary))?;
        Ok(())
    }

    /// Truncate the thread to just before `entry_id`. Any pending `ToolRequest`
    /// in the truncated range is invalidated (simply dropped).
    pub fn delete_from(&mut self, entry_id: &str) -> anyhow::Result<()> {
        let idx = self
            .entries
            .iter()
            .position(|e| e.id() == entry_id)
            .ok_or_else(|| anyhow::anyhow!("entry {entry_id} not found"))?;
        self.entries.truncate(idx);
        self.modified_at = Utc::now();
        Ok(())
    }

    /// Concatenated text of the first `limit` user messages, for auto-naming.
    pub fn first_user_text(&self, limit: usize) -> String {
        self.entries
            .iter()
            .filter_map(|e| match e {
                ThreadEntry::UserMessage { .. } => e.as_text(),
                _ => None,
            })
            .take(limit)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn count_user_messages(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, ThreadEntry::UserMessage { .. }))
            .count()
    }

    pub fn last_agent_name(&self) -> Option<&str> {
        self.entries.iter().rev().find_map(|e| match e {
            ThreadEntry::AgentMessage { agent_name, .. } => Some(agent_name.as_str()),
            _ => None,
        })
    }
}

impl Default for Thread {
    fn default() -> Self {
        Self::new()
    }
}
