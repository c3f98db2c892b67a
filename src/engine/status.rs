use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::transcript::{non_blank, read_all, read_tail, truncate, LogRecord, TranscriptParser};
use crate::types::{AgentId, AgentIdentity, AgentState, EventKind};
use crate::usage::{totals, UsageAccountant, UsageRecord};
use crate::workspace::{Locator, SessionFile};

pub const ACTIVE_WINDOW_MINUTES: i64 = 5;
pub const IDLE_WINDOW_MINUTES: i64 = 30;

/// Bytes read from the end of the latest session when looking for the current task.
pub const TASK_TAIL_BYTES: u64 = 30 * 1024;
pub const TASK_TEXT_BUDGET: usize = 200;

/// The recency ladder.
pub fn classify(now: DateTime<Utc>, last_active: Option<DateTime<Utc>>) -> AgentState {
    let Some(last) = last_active else {
        return AgentState::Offline;
    };
    let age = now - last;
    if age < Duration::minutes(ACTIVE_WINDOW_MINUTES) {
        AgentState::Active
    } else if age < Duration::minutes(IDLE_WINDOW_MINUTES) {
        AgentState::Idle
    } else {
        AgentState::Offline
    }
}

pub fn relative_time(now: DateTime<Utc>, at: DateTime<Utc>) -> String {
    let age = now - at;
    if age < Duration::minutes(1) {
        return "just now".to_string();
    }
    let (n, unit) = if age < Duration::hours(1) {
        (age.num_minutes(), "min")
    } else if age < Duration::hours(24) {
        (age.num_hours(), "hour")
    } else {
        (age.num_days(), "day")
    };
    if n == 1 {
        format!("1 {} ago", unit)
    } else {
        format!("{} {}s ago", n, unit)
    }
}

/// Derived, non-authoritative view of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub agent_id: AgentId,
    pub name: String,
    pub emoji: String,
    pub team: String,
    pub team_color: String,
    pub is_orchestrator: bool,
    pub state: AgentState,
    pub last_active: Option<DateTime<Utc>>,
    pub last_active_str: String,
    pub session_count: usize,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub total_tokens: u64,
    pub estimated_cost: f64,
    pub current_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
}

/// Usage parsed out of one session file. Valid while the file keeps the
/// same length and mtime.
#[derive(Debug, Clone)]
struct FileUsage {
    agent_id: AgentId,
    len: u64,
    modified: DateTime<Utc>,
    records: Arc<Vec<UsageRecord>>,
    model: Option<String>,
}

/// Per-file usage shared by every clone of a [`StatusDeriver`].
#[derive(Debug, Clone, Default)]
pub struct UsageCache {
    files: Arc<Mutex<HashMap<PathBuf, FileUsage>>>,
}

impl UsageCache {
    fn lookup(&self, agent_id: &str, path: &Path, len: u64, modified: DateTime<Utc>) -> Option<FileUsage> {
        let files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        files
            .get(path)
            .filter(|u| u.agent_id == agent_id && u.len == len && u.modified == modified)
            .cloned()
    }

    fn store(&self, path: PathBuf, usage: FileUsage) {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path, usage);
    }

    /// Drops entries for files that are no longer among `live`.
    pub fn retain(&self, live: &HashSet<PathBuf>) {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|path, _| live.contains(path));
    }

    pub fn len(&self) -> usize {
        self.files.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builds [`AgentStatus`] from session files. Blocking file I/O; call it off
/// the async runtime.
#[derive(Clone)]
pub struct StatusDeriver {
    locator: Locator,
    accountant: Arc<UsageAccountant>,
    parser: TranscriptParser,
    cache: UsageCache,
}

impl StatusDeriver {
    pub fn new(locator: Locator, accountant: Arc<UsageAccountant>, parser: TranscriptParser) -> Self {
        Self {
            locator,
            accountant,
            parser: parser.with_text_budget(Some(TASK_TEXT_BUDGET)),
            cache: UsageCache::default(),
        }
    }

    pub fn cache(&self) -> &UsageCache {
        &self.cache
    }

    /// Session files of every given agent, for pruning the cache.
    pub fn live_files(&self, agents: &[AgentIdentity]) -> HashSet<PathBuf> {
        agents
            .iter()
            .flat_map(|a| self.locator.session_files(a))
            .map(|f| f.path)
            .collect()
    }

    /// Same files and same `now` always give the same status.
    pub fn derive(&self, identity: &AgentIdentity, now: DateTime<Utc>) -> AgentStatus {
        let files = self.locator.session_files(identity);
        let last_active = files.first().map(|f| f.modified);
        let (usage, current_model) = self.scan(&files, identity, now);
        let current_model = current_model.or_else(|| default_model(self.locator.root()));
        let sums = totals(&usage);

        let state = if identity.is_orchestrator {
            AgentState::Active
        } else {
            classify(now, last_active)
        };

        AgentStatus {
            agent_id: identity.id.clone(),
            name: identity.display_name.clone(),
            emoji: identity.emoji.clone(),
            team: identity.team.clone(),
            team_color: identity.team_color.clone(),
            is_orchestrator: identity.is_orchestrator,
            state,
            last_active,
            last_active_str: last_active
                .map(|t| relative_time(now, t))
                .unwrap_or_else(|| "Never".to_string()),
            session_count: files.len(),
            tokens_in: sums.tokens_in,
            tokens_out: sums.tokens_out,
            total_tokens: sums.total_tokens,
            estimated_cost: sums.cost_usd,
            current_model,
            current_task: files.first().and_then(|f| self.current_task(f, identity, now)),
        }
    }

    /// Usage of every assistant turn in every session file of the agent.
    pub fn usage_records(&self, identity: &AgentIdentity, now: DateTime<Utc>) -> Vec<UsageRecord> {
        let files = self.locator.session_files(identity);
        self.scan(&files, identity, now).0
    }

    /// Usage records plus the newest model named by an assistant turn.
    fn scan(
        &self,
        files: &[SessionFile],
        identity: &AgentIdentity,
        now: DateTime<Utc>,
    ) -> (Vec<UsageRecord>, Option<String>) {
        let mut usage = Vec::new();
        let mut current_model = None;
        for file in files {
            let Some(parsed) = self.file_usage(file, identity, now) else {
                continue;
            };
            usage.extend(parsed.records.iter().cloned());
            // Files are newest first, so the first file naming a model wins.
            if current_model.is_none() {
                current_model = parsed.model;
            }
        }
        (usage, current_model)
    }

    /// Cached usage for an unchanged file, otherwise a full read and parse.
    /// Records without a timestamp keep the `now` of the parse that read them.
    fn file_usage(
        &self,
        file: &SessionFile,
        identity: &AgentIdentity,
        now: DateTime<Utc>,
    ) -> Option<FileUsage> {
        let len = match fs::metadata(&file.path) {
            Ok(meta) => meta.len(),
            Err(e) => {
                log::debug!("Skipping {}: {}", file.path.display(), e);
                return None;
            }
        };
        if let Some(hit) = self.cache.lookup(&identity.id, &file.path, len, file.modified) {
            return Some(hit);
        }

        let lines = match read_all(&file.path) {
            Ok(lines) => lines,
            Err(e) => {
                log::debug!("Skipping {}: {}", file.path.display(), e);
                return None;
            }
        };
        let mut records = Vec::new();
        let mut model = None;
        for record in non_blank(&lines).filter_map(LogRecord::decode) {
            if let Some(m) = record.assistant().and_then(|a| a.model()) {
                model = Some(m.to_string());
            }
            if let Some(u) = self.accountant.extract(&record, &identity.id, now) {
                records.push(u);
            }
        }

        let parsed = FileUsage {
            agent_id: identity.id.clone(),
            len,
            modified: file.modified,
            records: Arc::new(records),
            model,
        };
        self.cache.store(file.path.clone(), parsed.clone());
        Some(parsed)
    }

    /// Newest non-heartbeat prompt in the tail of the latest session.
    fn current_task(
        &self,
        latest: &SessionFile,
        identity: &AgentIdentity,
        now: DateTime<Utc>,
    ) -> Option<String> {
        let lines = match read_tail(&latest.path, TASK_TAIL_BYTES) {
            Ok(lines) => lines,
            Err(e) => {
                log::debug!("Cannot tail {}: {}", latest.path.display(), e);
                return None;
            }
        };
        self.parser
            .parse_lines(non_blank(&lines), &identity.id, now)
            .into_iter()
            .filter(|e| e.kind == EventKind::Prompt)
            .last()
            .map(|e| truncate(&e.text, TASK_TEXT_BUDGET))
    }
}

/// `defaultModel` from the runtime's own config file, if it has one.
fn default_model(root: &Path) -> Option<String> {
    let data = std::fs::read_to_string(root.join("openclaw.json")).ok()?;
    let value: serde_json::Value = serde_json::from_str(&data).ok()?;
    value
        .get("defaultModel")
        .and_then(|m| m.as_str())
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}
