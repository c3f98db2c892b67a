use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;

use crate::types::AgentIdentity;
use crate::usage::ModelPrice;

#[derive(Debug, Default, Deserialize)]
struct AgentsFile {
    #[serde(default)]
    name: String,
    #[serde(default)]
    agents: Vec<AgentNode>,
    #[serde(default)]
    legacy_dirs: HashMap<String, Vec<String>>,
    #[serde(default)]
    pricing: BTreeMap<String, ModelPrice>,
}

#[derive(Debug, Deserialize)]
struct AgentNode {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    emoji: String,
    #[serde(default)]
    team: String,
    #[serde(default)]
    team_color: String,
    #[serde(default)]
    aliases: Vec<String>,
    #[serde(default)]
    orchestrator: bool,
    #[serde(default)]
    children: Vec<AgentNode>,
}

#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    pub team_name: String,
    pub agents: Vec<AgentIdentity>,
    pub pricing: BTreeMap<String, ModelPrice>,
    /// Mtime of the source file when this snapshot was read.
    pub modified: Option<SystemTime>,
}

/// Fleet identities, shared between request handlers and background loops.
pub struct AgentRegistry {
    inner: RwLock<RegistrySnapshot>,
    orchestrator_ids: Vec<String>,
    source: Option<PathBuf>,
}

impl AgentRegistry {
    pub fn new(agents: Vec<AgentIdentity>, orchestrator_ids: Vec<String>) -> Self {
        let agents = agents
            .into_iter()
            .map(|mut a| {
                a.is_orchestrator |= orchestrator_ids.contains(&a.id);
                a
            })
            .collect();
        Self {
            inner: RwLock::new(RegistrySnapshot {
                agents,
                ..RegistrySnapshot::default()
            }),
            orchestrator_ids,
            source: None,
        }
    }

    pub fn load(path: &Path, orchestrator_ids: Vec<String>) -> Result<Self> {
        let snapshot = read_snapshot(path, &orchestrator_ids)?;
        log::info!(
            "Loaded {} agents from {}",
            snapshot.agents.len(),
            path.display()
        );
        Ok(Self {
            inner: RwLock::new(snapshot),
            orchestrator_ids,
            source: Some(path.to_path_buf()),
        })
    }

    /// Re-reads the source file. The previous snapshot stays in place on error.
    pub fn reload(&self) -> Result<usize> {
        let Some(path) = &self.source else {
            return Ok(self.agents().len());
        };
        let snapshot = read_snapshot(path, &self.orchestrator_ids)?;
        let count = snapshot.agents.len();
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = snapshot;
        log::info!("Reloaded {} agents from {}", count, path.display());
        Ok(count)
    }

    /// Reloads when the source file's mtime differs from the loaded snapshot's.
    pub fn reload_if_changed(&self) -> Result<bool> {
        let Some(path) = &self.source else {
            return Ok(false);
        };
        let current = source_modified(path);
        let loaded = self.inner.read().unwrap_or_else(|e| e.into_inner()).modified;
        if current.is_none() || current == loaded {
            return Ok(false);
        }
        self.reload()?;
        Ok(true)
    }

    pub fn agents(&self) -> Vec<AgentIdentity> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .agents
            .clone()
    }

    pub fn team_name(&self) -> String {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .team_name
            .clone()
    }

    pub fn pricing(&self) -> BTreeMap<String, ModelPrice> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .pricing
            .clone()
    }

    pub fn orchestrator_ids(&self) -> &[String] {
        &self.orchestrator_ids
    }

    /// Looks an agent up by id, then display name, then legacy alias.
    pub fn get(&self, key: &str) -> Option<AgentIdentity> {
        let snapshot = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let agents = &snapshot.agents;
        agents
            .iter()
            .find(|a| a.id == key)
            .or_else(|| agents.iter().find(|a| a.display_name == key))
            .or_else(|| {
                agents
                    .iter()
                    .find(|a| a.legacy_aliases.iter().any(|alias| alias == key))
            })
            .cloned()
    }

    /// Known identity for `id`, or a bare one built from the id alone.
    pub fn identity_for(&self, id: &str) -> AgentIdentity {
        self.get(id).unwrap_or_else(|| {
            let mut bare = AgentIdentity::bare(id);
            bare.is_orchestrator = self.orchestrator_ids.iter().any(|o| o == id);
            bare
        })
    }
}

fn read_snapshot(path: &Path, orchestrator_ids: &[String]) -> Result<RegistrySnapshot> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("reading agents config {}", path.display()))?;
    let file: AgentsFile = serde_yaml::from_str(&data)
        .with_context(|| format!("parsing agents config {}", path.display()))?;

    let mut agents = Vec::new();
    for node in file.agents {
        flatten(node, &mut agents);
    }

    for agent in &mut agents {
        let aliases = file
            .legacy_dirs
            .get(&agent.display_name)
            .or_else(|| file.legacy_dirs.get(&agent.id));
        if let Some(aliases) = aliases {
            for alias in aliases {
                if !agent.legacy_aliases.contains(alias) {
                    agent.legacy_aliases.push(alias.clone());
                }
            }
        }
        agent.is_orchestrator |= orchestrator_ids.contains(&agent.id);
    }

    Ok(RegistrySnapshot {
        team_name: file.name,
        agents,
        pricing: file.pricing,
        modified: source_modified(path),
    })
}

fn source_modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn flatten(node: AgentNode, out: &mut Vec<AgentIdentity>) {
    let name = if node.name.is_empty() {
        node.id.clone()
    } else {
        node.name
    };
    let mut identity = AgentIdentity::new(node.id, name)
        .with_team(node.team, node.team_color)
        .with_aliases(node.aliases);
    if !node.emoji.is_empty() {
        identity.emoji = node.emoji;
    }
    identity.is_orchestrator = node.orchestrator;
    out.push(identity);

    for child in node.children {
        flatten(child, out);
    }
}
