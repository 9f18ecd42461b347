// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Which scope a [`MemoryStore`] persists to: one file shared across all
/// projects for a given user, or one file scoped to a single project
/// checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryScope {
    User,
    Project,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MemoryDocument {
    #[serde(default)]
    notes: Vec<String>,
}

/// A flat list of free-text notes persisted as YAML at either user or
/// project scope. Notes accumulate over time; nothing is ever silently
/// overwritten except through explicit [`MemoryStore::forget`].
pub struct MemoryStore {
    scope: MemoryScope,
    path: PathBuf,
    doc: MemoryDocument,
}

impl MemoryStore {
    /// Open the user-scoped store at `~/.config/coday/memories.yaml` (or the
    /// platform equivalent resolved by `dirs::config_dir`). Missing files
    /// load as empty rather than erroring.
    pub fn user() -> anyhow::Result<Self> {
        let base = dirs::config_dir().context("no config directory available on this platform")?;
        Self::open(MemoryScope::User, base.join("coday").join("memories.yaml"))
    }

    /// Open the project-scoped store at `<project_root>/.coday/memories.yaml`.
    pub fn project(project_root: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = project_root.as_ref().join(".coday").join("memories.yaml");
        Self::open(MemoryScope::Project, path)
    }

    fn open(scope: MemoryScope, path: PathBuf) -> anyhow::Result<Self> {
        let doc = if path.is_file() {
            debug!(path = %path.display(), "loading memory store");
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        } else {
            MemoryDocument::default()
        };
        Ok(Self { scope, path, doc })
    }

    pub fn scope(&self) -> &MemoryScope {
        &self.scope
    }

    pub fn notes(&self) -> &[String] {
        &self.doc.notes
    }

    /// Render the accumulated notes as the block handed to
    /// `compose_system_prompt`, or `None` when there is nothing to say.
    pub fn render(&self) -> Option<String> {
        if self.doc.notes.is_empty() {
            None
        } else {
            Some(self.doc.notes.join("\n"))
        }
    }

    /// Append a note and persist immediately.
    pub fn remember(&mut self, note: impl Into<String>) -> anyhow::Result<()> {
        self.doc.notes.push(note.into());
        self.save()
    }

    /// Drop every note matching `predicate` and persist.
    pub fn forget(&mut self, predicate: impl Fn(&str) -> bool) -> anyhow::Result<()> {
        self.doc.notes.retain(|n| !predicate(n));
        self.save()
    }

    fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let text = serde_yaml::to_string(&self.doc)?;
        std::fs::write(&self.path, text)
            .with_context(|| format!("writing {}", self.path.display()))?;
        Ok(())
    }
}
