// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Discovers [`AgentDefinition`]s from configuration and on-disk YAML files,
//! in the precedence order [`AgentRegistry::new`](crate::AgentRegistry::new)
//! expects: first occurrence wins on a name collision.

use std::path::{Path, PathBuf};

use coday_config::{AgentDefinitionConfig, Config};
use tracing::{debug, warn};

use crate::agent_def::AgentDefinition;

impl From<AgentDefinitionConfig> for AgentDefinition {
    fn from(c: AgentDefinitionConfig) -> Self {
        AgentDefinition {
            name: c.name,
            description: c.description,
            instructions: c.instructions,
            model_provider: c.model_provider,
            model_name: c.model_name,
            assistant_id: c.assistant_id,
            integrations: c.integrations,
            mandatory_docs: c.mandatory_docs,
            optional_docs: c.optional_docs,
            temperature: c.temperature,
            max_tokens: c.max_tokens,
        }
    }
}

/// Gather every declared/discovered agent definition, in discovery order:
/// `config.agents` (the project's `coday.yaml` merged with local config, both
/// already folded into `config` by the time it reaches here), then YAML files
/// under `<configDir>/coday/<project>/agents/`, then `config.agent_folders`,
/// then `extra_folders` (e.g. a `--agent-folder` CLI flag). Earlier sources
/// win on a name collision — callers pass the result straight to
/// [`AgentRegistry::new`](crate::AgentRegistry::new), which applies that same
/// first-wins rule.
pub fn load_agent_definitions(
    config: &Config,
    project: Option<&str>,
    extra_folders: &[PathBuf],
) -> Vec<AgentDefinition> {
    let mut defs: Vec<AgentDefinition> =
        config.agents.iter().cloned().map(AgentDefinition::from).collect();

    if let Some(project) = project {
        if let Some(dir) = dirs::config_dir() {
            defs.extend(scan_agent_folder(&dir.join("coday").join(project).join("agents")));
        }
    }

    for folder in &config.agent_folders {
        defs.extend(scan_agent_folder(Path::new(folder)));
    }
    for folder in extra_folders {
        defs.extend(scan_agent_folder(folder));
    }

    defs
}

/// Read every `*.yaml`/`*.yml` file directly under `dir` as a single agent
/// definition. Missing directories are silently skipped; a file that fails to
/// parse is logged and skipped rather than failing the whole discovery.
fn scan_agent_folder(dir: &Path) -> Vec<AgentDefinition> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut found = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let is_yaml = matches!(path.extension().and_then(|e| e.to_str()), Some("yaml") | Some("yml"));
        if !is_yaml {
            continue;
        }
        match std::fs::read_to_string(&path).and_then(|text| {
            serde_yaml::from_str::<AgentDefinitionConfig>(&text)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        }) {
            Ok(def) => {
                debug!(path = %path.display(), name = %def.name, "discovered agent file");
                found.push(AgentDefinition::from(def));
            }
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unparsable agent file"),
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_agents_come_first_in_order() {
        let mut config = Config::default();
        config.agents.push(AgentDefinitionConfig {
            name: "researcher".into(),
            description: String::new(),
            instructions: String::new(),
            model_provider: "anthropic".into(),
            model_name: "claude".into(),
            assistant_id: None,
            integrations: Default::default(),
            mandatory_docs: vec![],
            optional_docs: vec![],
            temperature: None,
            max_tokens: None,
        });
        let defs = load_agent_definitions(&config, None, &[]);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "researcher");
    }

    #[test]
    fn scan_agent_folder_reads_yaml_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("reviewer.yaml"),
            "name: reviewer\nmodel_provider: anthropic\nmodel_name: claude\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let found = scan_agent_folder(dir.path());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "reviewer");
    }

    #[test]
    fn scan_agent_folder_skips_unparsable_file_without_failing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.yaml"), "not: [valid agent shape").unwrap();
        let found = scan_agent_folder(dir.path());
        assert!(found.is_empty());
    }

    #[test]
    fn scan_agent_folder_missing_directory_returns_empty() {
        let found = scan_agent_folder(Path::new("/nonexistent/coday/agents/path"));
        assert!(found.is_empty());
    }

    #[test]
    fn extra_folders_are_scanned_after_config_folders() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("ops.yaml"),
            "name: ops\nmodel_provider: anthropic\nmodel_name: claude\n",
        )
        .unwrap();
        let config = Config::default();
        let defs = load_agent_definitions(&config, None, &[dir.path().to_path_buf()]);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "ops");
    }
}
