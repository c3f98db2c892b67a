use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ORCHESTRATOR_IDS: [&str; 3] = ["main", "thunder", "titan"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub root_dir: PathBuf,
    pub agents_config: PathBuf,
    pub database_url: Option<String>,
    pub port: u16,
    pub status_interval_secs: u64,
    pub health_interval_secs: u64,
    pub orchestrator_ids: Vec<String>,
}

impl Config {
    pub fn from_env() -> Self {
        let root_dir = std::env::var("FLEETLENS_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                PathBuf::from(home).join(".openclaw")
            });

        let orchestrator_ids = std::env::var("ORCHESTRATOR_IDS")
            .ok()
            .map(|s| parse_id_list(&s))
            .filter(|ids| !ids.is_empty())
            .unwrap_or_else(|| DEFAULT_ORCHESTRATOR_IDS.iter().map(|s| s.to_string()).collect());

        Self {
            root_dir,
            agents_config: std::env::var("AGENTS_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./agents.yaml")),
            database_url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            port: env_parse("PORT", 8080),
            status_interval_secs: env_parse("STATUS_INTERVAL_SECS", 10),
            health_interval_secs: env_parse("HEALTH_INTERVAL_SECS", 120),
            orchestrator_ids,
        }
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs.max(1))
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs.max(1))
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_id_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}
