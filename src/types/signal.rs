use serde::{Deserialize, Serialize};

/// Sentinel files the external agent runtime polls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalKind {
    Kill,
    Pause,
    Restart,
}

impl SignalKind {
    pub fn file_name(&self) -> &'static str {
        match self {
            SignalKind::Kill => "KILL",
            SignalKind::Pause => "PAUSE",
            SignalKind::Restart => "RESTART",
        }
    }
}
