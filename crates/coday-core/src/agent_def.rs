// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Static, declarative agent definitions and the `CodayDefaults` merge rule.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Per-integration tool allow-list. `None` means the whole integration is
/// denied (absent from the agent's effective tool set); `Some(vec![])` means
/// every tool in that integration is allowed; `Some(names)` restricts to the
/// named tools.
pub type IntegrationAllowList = HashMap<String, Option<Vec<String>>>;

/// A named personality bound to a model and a filtered tool set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub instructions: String,
    pub model_provider: String,
    pub model_name: String,
    #[serde(default)]
    pub assistant_id: Option<String>,
    #[serde(default)]
    pub integrations: IntegrationAllowList,
    #[serde(default)]
    pub mandatory_docs: Vec<String>,
    #[serde(default)]
    pub optional_docs: Vec<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl AgentDefinition {
    pub fn lower_name(&self) -> String {
        self.name.to_lowercase()
    }

    /// Merge `self` over `defaults`: any field left at its wire-absent value
    /// falls back to the `CodayDefaults` definition. Name, description and
    /// instructions are never inherited (every agent must state its own).
    pub fn merged_with_defaults(&self, defaults: &AgentDefinition) -> AgentDefinition {
        let mut integrations = defaults.integrations.clone();
        for (k, v) in &self.integrations {
            integrations.insert(k.clone(), v.clone());
        }
        AgentDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            instructions: self.instructions.clone(),
            model_provider: if self.model_provider.is_empty() {
                defaults.model_provider.clone()
            } else {
                self.model_provider.clone()
            },
            model_name: if self.model_name.is_empty() {
                defaults.model_name.clone()
            } else {
                self.model_name.clone()
            },
            assistant_id: self.assistant_id.clone().or_else(|| defaults.assistant_id.clone()),
            integrations,
            mandatory_docs: if self.mandatory_docs.is_empty() {
                defaults.mandatory_docs.clone()
            } else {
                self.mandatory_docs.clone()
            },
            optional_docs: if self.optional_docs.is_empty() {
                defaults.optional_docs.clone()
            } else {
                self.optional_docs.clone()
            },
            temperature: self.temperature.or(defaults.temperature),
            max_tokens: self.max_tokens.or(defaults.max_tokens),
        }
    }

    /// Whether `tool_name` belonging to `integration` is visible to this agent.
    pub fn allows_tool(&self, integration: &str, tool_name: &str) -> bool {
        match self.integrations.get(integration) {
            None => false,
            Some(None) => false,
            Some(Some(names)) if names.is_empty() => true,
            Some(Some(names)) => names.iter().any(|n| n == tool_name),
        }
    }

    /// The built-in fallback definition, named `coday`, used when no more
    /// specific resolution applies.
    pub fn builtin_fallback(model_provider: impl Into<String>, model_name: impl Into<String>) -> Self {
        let mut integrations = HashMap::new();
        integrations.insert("files".to_string(), Some(vec![]));
        integrations.insert("web".to_string(), Some(vec![]));
        integrations.insert("memory".to_string(), Some(vec![]));
        Self {
            name: "coday".to_string(),
            description: "General-purpose default agent.".to_string(),
            instructions: "You are coday, a helpful engineering assistant.".to_string(),
            model_provider: model_provider.into(),
            model_name: model_name.into(),
            assistant_id: None,
            integrations,
            mandatory_docs: Vec::new(),
            optional_docs: Vec::new(),
            temperature: None,
            max_tokens: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> AgentDefinition {
        let mut integrations = HashMap::new();
        integrations.insert("files".to_string(), Some(vec![]));
        AgentDefinition {
            name: "CodayDefaults".into(),
            description: String::new(),
            instructions: String::new(),
            model_provider: "anthropic".into(),
            model_name: "claude".into(),
            assistant_id: None,
            integrations,
            mandatory_docs: vec!["README.md".into()],
            optional_docs: vec![],
            temperature: Some(0.2),
            max_tokens: Some(4096),
        }
    }

    #[test]
    fn lower_name_lowercases() {
        let a = AgentDefinition::builtin_fallback("anthropic", "claude");
        assert_eq!(a.lower_name(), "coday");
    }

    #[test]
    fn merge_inherits_empty_fields_from_defaults() {
        let partial = AgentDefinition {
            name: "researcher".into(),
            description: "finds things".into(),
            instructions: "Research only.".into(),
            model_provider: String::new(),
            model_name: String::new(),
            assistant_id: None,
            integrations: HashMap::new(),
            mandatory_docs: vec![],
            optional_docs: vec![],
            temperature: None,
            max_tokens: None,
        };
        let merged = partial.merged_with_defaults(&defaults());
        assert_eq!(merged.model_provider, "anthropic");
        assert_eq!(merged.mandatory_docs, vec!["README.md".to_string()]);
        assert_eq!(merged.temperature, Some(0.2));
    }

    #[test]
    fn merge_overrides_win_over_defaults() {
        let mut integrations = HashMap::new();
        integrations.insert("web".to_string(), Some(vec!["web_fetch".into()]));
        let partial = AgentDefinition {
            name: "researcher".into(),
            description: String::new(),
            instructions: String::new(),
            model_provider: "openai".into(),
            model_name: "gpt".into(),
            assistant_id: None,
            integrations,
            mandatory_docs: vec![],
            optional_docs: vec![],
            temperature: Some(0.9),
            max_tokens: None,
        };
        let merged = partial.merged_with_defaults(&defaults());
        assert_eq!(merged.model_provider, "openai");
        assert_eq!(merged.temperature, Some(0.9));
        assert!(merged.integrations.contains_key("files"));
        assert!(merged.integrations.contains_key("web"));
    }

    #[test]
    fn allows_tool_respects_empty_list_as_allow_all() {
        let a = AgentDefinition::builtin_fallback("anthropic", "claude");
        assert!(a.allows_tool("files", "read_file"));
        assert!(!a.allows_tool("gdb", "gdb_connect"));
    }

    #[test]
    fn allows_tool_respects_named_allow_list() {
        let mut integrations = HashMap::new();
        integrations.insert("web".to_string(), Some(vec!["web_fetch".into()]));
        let a = AgentDefinition {
            name: "x".into(),
            description: String::new(),
            instructions: String::new(),
            model_provider: "anthropic".into(),
            model_name: "claude".into(),
            assistant_id: None,
            integrations,
            mandatory_docs: vec![],
            optional_docs: vec![],
            temperature: None,
            max_tokens: None,
        };
        assert!(a.allows_tool("web", "web_fetch"));
        assert!(!a.allows_tool("web", "other_tool"));
    }
}
