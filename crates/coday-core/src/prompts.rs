// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Composes an agent's system prompt from its definition plus the optional
//! project/memory/doc blocks supplied by the embedding application.

use crate::agent_def::AgentDefinition;

/// `instructions ∥ project description ∥ user memory ∥ project memory ∥ rendered docs`.
///
/// Each optional block is omitted entirely (no empty heading) when absent, so
/// a minimally-configured agent gets a prompt that is just its instructions.
pub fn compose_system_prompt(
    definition: &AgentDefinition,
    project_description: Option<&str>,
    user_memory: Option<&str>,
    project_memory: Option<&str>,
    rendered_docs: &[String],
) -> String {
    let mut sections = Vec::new();
    sections.push(definition.instructions.clone());

    if let Some(desc) = project_description {
        if !desc.trim().is_empty() {
            sections.push(format!("## Project\n\n{desc}"));
        }
    }
    if let Some(mem) = user_memory {
        if !mem.trim().is_empty() {
            sections.push(format!("## What you know about this user\n\n{mem}"));
        }
    }
    if let Some(mem) = project_memory {
        if !mem.trim().is_empty() {
            sections.push(format!("## What you know about this project\n\n{mem}"));
        }
    }
    if !rendered_docs.is_empty() {
        let docs = rendered_docs.join("\n\n---\n\n");
        sections.push(format!("## Reference documents\n\n{docs}"));
    }

    sections.join("\n\n")
}
