// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Discovers [`AgentDefinition`]s and hands out lazily-built, cached [`Agent`]
//! instances.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use coday_memory::MemoryStore;
use coday_model::ModelProvider;
use coday_tools::policy::ToolPolicy;
use coday_tools::{ToolRegistry, Tool};

use crate::agent::Agent;
use crate::agent_def::AgentDefinition;
use crate::prompts::compose_system_prompt;
use crate::runloop::{DelegateTool, ToolApprover};

/// Builds a [`ModelProvider`] for a resolved [`AgentDefinition`]. Provider
/// wiring (credentials, base URLs, wire formats) is out of scope here — the
/// factory is supplied by the embedding application.
pub type ModelFactory =
    Arc<dyn Fn(&AgentDefinition) -> anyhow::Result<Arc<dyn ModelProvider>> + Send + Sync>;

/// Maps a builtin tool's unqualified name to the integration key an agent's
/// `integrations` allow-list gates it behind. MCP tools are namespaced
/// `mcp__<serverId>__<toolName>` upstream and are not covered by this map.
fn integration_for_tool(name: &str) -> &'static str {
    match name {
        "read_file" | "list_dir" | "write" => "files",
        "web_fetch" => "web",
        "update_memory" => "memory",
        "delegate" => "delegate",
        _ => "other",
    }
}

const DEFAULTS_KEY: &str = "codaydefaults";

pub struct AgentRegistry {
    defaults: AgentDefinition,
    definitions: Mutex<HashMap<String, AgentDefinition>>,
    cache: Mutex<HashMap<String, Arc<Agent>>>,
    full_tools: Arc<ToolRegistry>,
    model_factory: ModelFactory,
    /// Per-project preferred-agent hint, set via user config (out of scope).
    preferred: Mutex<HashMap<String, String>>,
    /// Root used to resolve relative `mandatory_docs`/`optional_docs` paths
    /// and the project-scoped memory store. Defaults to the process cwd.
    project_root: Mutex<PathBuf>,
    /// Approval policy consulted by the run loop before executing a tool.
    policy: Arc<ToolPolicy>,
    /// `Ask`-policy approver, usually installed by the session once a client
    /// is connected to answer an `Invite` event. `None` in headless contexts.
    approver: Mutex<Option<Arc<dyn ToolApprover>>>,
}

impl AgentRegistry {
    /// Build a registry from discovered definitions.
    ///
    /// `definitions` should already reflect discovery precedence — on a name
    /// collision the first occurrence wins, matching `coday.yaml` > project
    /// local config > discovered agent files.
    pub fn new(
        mut definitions: Vec<AgentDefinition>,
        full_tools: Arc<ToolRegistry>,
        model_factory: ModelFactory,
        policy: Arc<ToolPolicy>,
    ) -> Self {
        let defaults_idx = definitions
            .iter()
            .position(|d| d.lower_name() == DEFAULTS_KEY);
        let defaults = match defaults_idx {
            Some(idx) => definitions.remove(idx),
            None => AgentDefinition::builtin_fallback("mock", "mock-model"),
        };

        let mut map = HashMap::new();
        for def in definitions {
            map.entry(def.lower_name()).or_insert(def);
        }
        map.entry("coday".to_string())
            .or_insert_with(|| AgentDefinition::builtin_fallback(&defaults.model_provider, &defaults.model_name));

        Self {
            defaults,
            definitions: Mutex::new(map),
            cache: Mutex::new(HashMap::new()),
            full_tools,
            model_factory,
            preferred: Mutex::new(HashMap::new()),
            project_root: Mutex::new(
                std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            ),
            policy,
            approver: Mutex::new(None),
        }
    }

    /// A registry with only the `coday` builtin fallback. Useful for tests
    /// and standalone/headless sessions.
    pub fn new_empty(full_tools: Arc<ToolRegistry>, policy: Arc<ToolPolicy>) -> Self {
        Self::new(
            vec![],
            full_tools,
            Arc::new(|_def: &AgentDefinition| anyhow::bail!("no model factory configured")),
            policy,
        )
    }

    /// The approval policy the run loop should consult before executing a
    /// tool call on agents built by this registry.
    pub fn tool_policy(&self) -> Arc<ToolPolicy> {
        self.policy.clone()
    }

    /// Install the approver consulted for `Ask`-policy tool calls.
    pub fn set_tool_approver(&self, approver: Arc<dyn ToolApprover>) {
        *self.approver.lock().unwrap() = Some(approver);
    }

    pub fn tool_approver(&self) -> Option<Arc<dyn ToolApprover>> {
        self.approver.lock().unwrap().clone()
    }

    /// Override the project root used to resolve doc paths and the
    /// project-scoped memory store. Call this once a project directory is
    /// known, e.g. on session start or project switch.
    pub fn set_project_root(&self, root: impl Into<PathBuf>) {
        *self.project_root.lock().unwrap() = root.into();
    }

    pub fn find_by_name(&self, exact_name: &str) -> Option<AgentDefinition> {
        self.definitions.lock().unwrap().get(&exact_name.to_lowercase()).cloned()
    }

    pub fn find_by_prefix(&self, prefix: &str) -> Vec<AgentDefinition> {
        let prefix = prefix.to_lowercase();
        self.definitions
            .lock()
            .unwrap()
            .values()
            .filter(|d| d.lower_name().starts_with(&prefix))
            .cloned()
            .collect()
    }

    pub fn set_preferred(&self, project: impl Into<String>, agent_name: impl Into<String>) {
        self.preferred.lock().unwrap().insert(project.into(), agent_name.into());
    }

    pub fn preferred_agent_for(&self, project: &str) -> Option<String> {
        self.preferred.lock().unwrap().get(project).cloned()
    }

    /// `explicit @prefix` > `last agent used in thread` > `project default` >
    /// built-in `coday` fallback. Returns the resolved definition name.
    pub fn resolve_target(
        &self,
        explicit_prefix: Option<&str>,
        last_used: Option<&str>,
        project: Option<&str>,
    ) -> anyhow::Result<String> {
        if let Some(prefix) = explicit_prefix {
            let matches = self.find_by_prefix(prefix);
            return match matches.len() {
                0 => anyhow::bail!("no agent matches prefix '{prefix}'"),
                1 => Ok(matches[0].name.clone()),
                _ => anyhow::bail!(
                    "ambiguous agent prefix '{prefix}': {}",
                    matches.iter().map(|d| d.name.as_str()).collect::<Vec<_>>().join(", ")
                ),
            };
        }
        if let Some(name) = last_used {
            if self.find_by_name(name).is_some() {
                return Ok(name.to_string());
            }
        }
        if let Some(project) = project {
            if let Some(name) = self.preferred_agent_for(project) {
                return Ok(name);
            }
        }
        Ok("coday".to_string())
    }

    fn filter_tools(&self, definition: &AgentDefinition) -> ToolRegistry {
        let mut filtered = ToolRegistry::new();
        for name in self.full_tools.names() {
            if let Some(tool) = self.full_tools.get(&name) {
                let integration = integration_for_tool(&name);
                if definition.allows_tool(integration, &name) {
                    register_arc(&mut filtered, tool);
                }
            }
        }
        if definition.integrations.get("delegate").is_some() {
            filtered.register(DelegateTool);
        }
        filtered
    }

    /// Resolve and build (or return cached) the [`Agent`] for `name`.
    pub fn get_or_build(&self, name: &str) -> anyhow::Result<Arc<Agent>> {
        let key = name.to_lowercase();
        if let Some(agent) = self.cache.lock().unwrap().get(&key) {
            return Ok(agent.clone());
        }
        let definition = self
            .find_by_name(name)
            .ok_or_else(|| anyhow::anyhow!("unknown agent '{name}'"))?
            .merged_with_defaults(&self.defaults);

        let model = (self.model_factory)(&definition)?;
        let tools = Arc::new(self.filter_tools(&definition));

        let project_root = self.project_root.lock().unwrap().clone();
        let user_memory = MemoryStore::user().ok().and_then(|s| s.render());
        let project_memory = MemoryStore::project(&project_root).ok().and_then(|s| s.render());
        let rendered_docs = self.render_docs(&definition, &project_root)?;

        let system_prompt = compose_system_prompt(
            &definition,
            None,
            user_memory.as_deref(),
            project_memory.as_deref(),
            &rendered_docs,
        );
        let agent = Arc::new(Agent::new(definition, model, tools, system_prompt));
        self.cache.lock().unwrap().insert(key, agent.clone());
        Ok(agent)
    }

    /// Read `mandatory_docs` and `optional_docs`, relative to `project_root`,
    /// into their rendered text. A missing mandatory doc fails the whole
    /// build; a missing optional doc is silently skipped.
    fn render_docs(&self, definition: &AgentDefinition, project_root: &std::path::Path) -> anyhow::Result<Vec<String>> {
        let mut rendered = Vec::new();
        for doc in &definition.mandatory_docs {
            let content = std::fs::read_to_string(project_root.join(doc))
                .map_err(|e| anyhow::anyhow!("mandatory doc '{doc}' could not be read: {e}"))?;
            rendered.push(content);
        }
        for doc in &definition.optional_docs {
            if let Ok(content) = std::fs::read_to_string(project_root.join(doc)) {
                rendered.push(content);
            }
        }
        Ok(rendered)
    }

    /// Drop all cached agents, e.g. on a project switch. Callers are
    /// responsible for releasing any live MCP child processes held by the
    /// outgoing agents' tool sets before dropping the last `Arc`.
    pub fn invalidate_cache(&self) {
        self.cache.lock().unwrap().clear();
    }
}

/// Re-register a tool trait object under its own name into `dest`.
fn register_arc(dest: &mut ToolRegistry, tool: Arc<dyn Tool>) {
    dest.register_arc(tool);
}
