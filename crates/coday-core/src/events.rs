// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The typed event vocabulary streamed out of a session.
//!
//! Every observable step of a run loop — model deltas, tool calls, prompts
//! back to the user — is an [`Event`]. Events are append-only and carry a
//! monotonic, lexicographically sortable `id` plus an optional `parentId`
//! that threads answers back to the invite/request that caused them.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Generate a monotonic, lexicographically sortable event id.
///
/// Millisecond timestamp plus a process-wide sequence counter, so ids
/// compare correctly even when two events land in the same millisecond.
pub fn next_event_id() -> String {
    let ts = Utc::now().timestamp_millis().max(0) as u64;
    let seq = EVENT_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{ts:016x}-{seq:010x}")
}

/// A single part of a [`EventKind::Message`] or `Text` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image {
        mime_type: String,
        /// Base64-encoded bytes.
        bytes: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        width: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        height: Option<u32>,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOperation {
    Created,
    Updated,
    Deleted,
}

/// Kind-specific payload. Tagged so the wire representation carries `kind`
/// alongside the fields listed in the external-interfaces table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum EventKind {
    Message {
        role: MessageRole,
        speaker_name: String,
        content: Vec<ContentPart>,
    },
    /// Incremental text, emitted while a Message is still being assembled.
    Text {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        speaker: Option<String>,
        text: String,
    },
    Answer { answer: String },
    Invite {
        invite: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default_value: Option<String>,
    },
    Choice {
        invite: String,
        options: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        optional_question: Option<String>,
    },
    ToolRequest {
        tool_name: String,
        call_id: String,
        args_json: String,
    },
    ToolResponse {
        call_id: String,
        output: String,
    },
    Thinking,
    Warn { message: String },
    Error { message: String },
    ProjectSelected { project_name: String },
    ThreadSelected {
        thread_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thread_name: Option<String>,
    },
    File {
        filename: String,
        operation: FileOperation,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size: Option<u64>,
    },
    Heartbeat,
}

/// The atomic unit of observable progress on a session's event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    pub fn new(kind: EventKind, parent_id: Option<String>) -> Self {
        Self {
            id: next_event_id(),
            parent_id,
            timestamp: Utc::now(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_ids_are_monotonically_increasing() {
        let a = next_event_id();
        let b = next_event_id();
        assert!(b > a);
    }

    #[test]
    fn event_carries_parent_id() {
        let e = Event::new(EventKind::Answer { answer: "yes".into() }, Some("abc".into()));
        assert_eq!(e.parent_id, Some("abc".into()));
    }

    #[test]
    fn event_serialises_with_flattened_kind() {
        let e = Event::new(EventKind::Heartbeat, None);
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("\"kind\":\"Heartbeat\""));
    }
}
