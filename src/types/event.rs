use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AgentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Prompt,
    Response,
    Command,
    Result,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Prompt => "prompt",
            EventKind::Response => "response",
            EventKind::Command => "command",
            EventKind::Result => "result",
            EventKind::Error => "error",
        }
    }
}

/// One normalized action parsed out of a session log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalEvent {
    pub timestamp: DateTime<Utc>,
    pub agent_id: AgentId,
    pub kind: EventKind,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Tool call arguments as compact JSON, unclipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl CanonicalEvent {
    pub fn new(
        timestamp: DateTime<Utc>,
        agent_id: impl Into<AgentId>,
        kind: EventKind,
        text: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            agent_id: agent_id.into(),
            kind,
            text: text.into(),
            tool_name: None,
            tool_input: None,
            exit_code: None,
            is_error: None,
        }
    }

    pub fn with_tool(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }
}
