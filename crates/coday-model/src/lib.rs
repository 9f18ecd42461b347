// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Provider-neutral model abstraction.
//!
//! A [`ModelProvider`] turns a [`CompletionRequest`] into a stream of
//! [`ResponseEvent`]s. The engine never sees a provider's wire format —
//! every concrete driver normalizes its SSE/JSON chunks into the same event
//! vocabulary before they reach the agent run loop.

pub mod mock;
pub mod provider;
pub mod types;

pub use mock::{MockProvider, ScriptedMockProvider};
pub use provider::{InputModality, ModelProvider, ResponseStream};
pub use types::{
    CompletionRequest, ContentPart, FunctionCall, Message, MessageContent, ResponseEvent, Role,
    ToolContentPart, ToolResultContent, ToolSchema, Usage,
};
