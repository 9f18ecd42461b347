// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Flat, per-scope memory persistence: a YAML document of free-text notes an
//! agent accumulates about a user or a project, fed back into
//! [`coday_core::compose_system_prompt`] on every turn.

mod store;

pub use store::{MemoryScope, MemoryStore};
