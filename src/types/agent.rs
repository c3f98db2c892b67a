use serde::{Deserialize, Serialize};

use super::AgentId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub id: AgentId,
    pub display_name: String,
    pub emoji: String,
    pub team: String,
    pub team_color: String,
    pub legacy_aliases: Vec<String>,
    pub is_orchestrator: bool,
}

impl AgentIdentity {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            emoji: "🤖".to_string(),
            team: String::new(),
            team_color: String::new(),
            legacy_aliases: Vec::new(),
            is_orchestrator: false,
        }
    }

    /// Identity for an id the registry does not know about.
    pub fn bare(id: impl Into<String>) -> Self {
        let id = id.into();
        Self::new(id.clone(), id)
    }

    pub fn with_aliases(mut self, aliases: Vec<String>) -> Self {
        self.legacy_aliases = aliases;
        self
    }

    pub fn with_team(mut self, team: impl Into<String>, color: impl Into<String>) -> Self {
        self.team = team.into();
        self.team_color = color.into();
        self
    }

    pub fn orchestrator(mut self) -> Self {
        self.is_orchestrator = true;
        self
    }

    /// True if `key` names this agent by id, display name, or alias.
    pub fn answers_to(&self, key: &str) -> bool {
        self.id == key
            || self.display_name == key
            || self.id.eq_ignore_ascii_case(key)
            || self.display_name.eq_ignore_ascii_case(key)
            || self.legacy_aliases.iter().any(|a| a == key)
    }
}
