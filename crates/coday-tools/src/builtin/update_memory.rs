// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use async_trait::async_trait;
use coday_memory::MemoryStore;
use serde_json::{json, Value};
use tracing::debug;

use crate::policy::ApprovalPolicy;
use crate::tool::{Tool, ToolCall, ToolOutput};

/// Appends and removes free-text notes in the active memory store —
/// project-scoped by default, or user-scoped when `scope: "user"` is given.
#[derive(Default)]
pub struct UpdateMemoryTool {
    /// Root the project-scoped store resolves against. Defaults to the
    /// process cwd when unset.
    pub project_root: Option<PathBuf>,
}

#[async_trait]
impl Tool for UpdateMemoryTool {
    fn name(&self) -> &str { "update_memory" }

    fn description(&self) -> &str {
        "Persist free-text notes across sessions. Operations: remember (append a note), \
         forget (remove notes containing a substring), list (show all notes). \
         Notes are project-scoped by default; pass scope=\"user\" to persist across projects."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": ["remember", "forget", "list"],
                    "description": "Memory operation to perform"
                },
                "note": {
                    "type": "string",
                    "description": "Note text (remember) or substring to match (forget)"
                },
                "scope": {
                    "type": "string",
                    "enum": ["project", "user"],
                    "description": "Which store to use (default project)"
                }
            },
            "required": ["operation"]
        })
    }

    fn default_policy(&self) -> ApprovalPolicy { ApprovalPolicy::Auto }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let op = match call.args.get("operation").and_then(|v| v.as_str()) {
            Some(o) => o.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'operation'"),
        };
        let scope = call.args.get("scope").and_then(|v| v.as_str()).unwrap_or("project");

        debug!(op = %op, scope, "update_memory tool");

        let mut store = match self.open_store(scope) {
            Ok(s) => s,
            Err(e) => return ToolOutput::err(&call.id, format!("could not open memory store: {e}")),
        };

        match op.as_str() {
            "remember" => {
                let note = match call.args.get("note").and_then(|v| v.as_str()) {
                    Some(n) => n.to_string(),
                    None => return ToolOutput::err(&call.id, "missing 'note' for remember"),
                };
                match store.remember(&note) {
                    Ok(_) => ToolOutput::ok(&call.id, format!("remembered: {note}")),
                    Err(e) => ToolOutput::err(&call.id, format!("save error: {e}")),
                }
            }
            "forget" => {
                let needle = match call.args.get("note").and_then(|v| v.as_str()) {
                    Some(n) => n.to_string(),
                    None => return ToolOutput::err(&call.id, "missing 'note' for forget"),
                };
                let before = store.notes().len();
                match store.forget(|n| n.contains(&needle)) {
                    Ok(_) => {
                        let removed = before - store.notes().len();
                        ToolOutput::ok(&call.id, format!("forgot {removed} note(s) matching '{needle}'"))
                    }
                    Err(e) => ToolOutput::err(&call.id, format!("save error: {e}")),
                }
            }
            "list" => {
                if store.notes().is_empty() {
                    ToolOutput::ok(&call.id, "(no notes stored)")
                } else {
                    ToolOutput::ok(&call.id, store.notes().join("\n"))
                }
            }
            other => ToolOutput::err(&call.id, format!("unknown operation: {other}")),
        }
    }
}

impl UpdateMemoryTool {
    fn open_store(&self, scope: &str) -> anyhow::Result<MemoryStore> {
        match scope {
            "user" => MemoryStore::user(),
            _ => {
                let root = self
                    .project_root
                    .clone()
                    .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
                MemoryStore::project(root)
            }
        }
    }
}
