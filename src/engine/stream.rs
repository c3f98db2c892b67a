use chrono::{DateTime, Duration, Local, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

use super::status::relative_time;
use crate::transcript::{non_blank, read_all, read_tail, truncate, LogRecord, TranscriptParser};
use crate::types::{AgentId, AgentIdentity, CanonicalEvent, EventKind};
use crate::workspace::Locator;

pub const STREAM_TAIL_BYTES: u64 = 20 * 1024;
pub const STREAM_HORIZON_HOURS: i64 = 48;
pub const DEFAULT_STREAM_LIMIT: usize = 30;
pub const MAX_STREAM_LIMIT: usize = 200;

pub const DETAIL_TAIL_BYTES: u64 = 100 * 1024;
pub const DETAIL_ENTRIES: usize = 50;
pub const PREVIEW_BUDGET: usize = 500;

pub const DEFAULT_TIMELINE_HOURS: i64 = 24;
pub const MAX_TIMELINE_HOURS: i64 = 168;
const TITLE_BUDGET: usize = 80;
const ERROR_TITLE_BUDGET: usize = 60;

/// Zero or out of range falls back to the default.
pub fn clamp_limit(limit: Option<usize>) -> usize {
    match limit {
        Some(n) if n > 0 && n <= MAX_STREAM_LIMIT => n,
        _ => DEFAULT_STREAM_LIMIT,
    }
}

pub fn clamp_hours(hours: Option<i64>) -> i64 {
    match hours {
        Some(h) if h > 0 && h <= MAX_TIMELINE_HOURS => h,
        _ => DEFAULT_TIMELINE_HOURS,
    }
}

/// `Ns`, `Nm` or `Nh Mm`.
pub fn format_duration(d: Duration) -> String {
    if d < Duration::minutes(1) {
        format!("{}s", d.num_seconds().max(0))
    } else if d < Duration::hours(1) {
        format!("{}m", d.num_minutes())
    } else {
        format!("{}h {}m", d.num_hours(), d.num_minutes() % 60)
    }
}

/// A canonical event tagged with display metadata of the agent that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEntry {
    pub timestamp: DateTime<Utc>,
    pub time_str: String,
    pub time_abs: String,
    pub agent_id: AgentId,
    pub agent: String,
    pub emoji: String,
    pub team_color: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl StreamEntry {
    pub fn tag(event: CanonicalEvent, identity: &AgentIdentity, now: DateTime<Utc>) -> Self {
        Self {
            timestamp: event.timestamp,
            time_str: relative_time(now, event.timestamp),
            time_abs: event
                .timestamp
                .with_timezone(&Local)
                .format("%H:%M:%S")
                .to_string(),
            agent_id: event.agent_id,
            agent: identity.display_name.clone(),
            emoji: identity.emoji.clone(),
            team_color: identity.team_color.clone(),
            kind: event.kind,
            content: event.text,
            tool_name: event.tool_name,
            exit_code: event.exit_code,
            is_error: event.is_error,
        }
    }
}

/// Drops stale entries, sorts newest first and cuts to `limit`.
///
/// The sort is stable, so entries with equal timestamps keep scan order.
pub fn merge_stream(
    mut entries: Vec<StreamEntry>,
    limit: usize,
    now: DateTime<Utc>,
) -> Vec<StreamEntry> {
    let cutoff = now - Duration::hours(STREAM_HORIZON_HOURS);
    entries.retain(|e| e.timestamp > cutoff);
    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    entries.truncate(limit);
    entries
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineKind {
    Task,
    Response,
    ToolCall,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEvent {
    /// RFC 3339, whole seconds, UTC.
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: TimelineKind,
    pub title: String,
    pub detail: String,
}

impl TimelineEvent {
    /// Timeline view of a canonical event. Plain tool results have none.
    pub fn from_event(event: &CanonicalEvent) -> Option<Self> {
        let (kind, title) = match event.kind {
            EventKind::Prompt => (TimelineKind::Task, truncate(&event.text, TITLE_BUDGET)),
            EventKind::Response => (TimelineKind::Response, truncate(&event.text, TITLE_BUDGET)),
            EventKind::Command => (TimelineKind::ToolCall, event.text.clone()),
            EventKind::Error => (
                TimelineKind::Error,
                format!(
                    "{}: {}",
                    event.tool_name.as_deref().unwrap_or_default(),
                    truncate(&event.text, ERROR_TITLE_BUDGET)
                ),
            ),
            EventKind::Result => return None,
        };
        // Tool calls carry their raw arguments; everything else its text.
        let detail = match (&kind, &event.tool_input) {
            (TimelineKind::ToolCall, Some(input)) => input.clone(),
            _ => event.text.clone(),
        };
        Some(Self {
            timestamp: event.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            kind,
            title,
            detail,
        })
    }
}

/// Collapses events sharing (second, kind, title) and orders the rest oldest first.
pub fn build_timeline<I>(events: I, cutoff: DateTime<Utc>) -> Vec<TimelineEvent>
where
    I: IntoIterator<Item = CanonicalEvent>,
{
    let mut seen = HashSet::new();
    let mut out: Vec<TimelineEvent> = events
        .into_iter()
        .filter(|e| e.timestamp >= cutoff)
        .filter_map(|e| TimelineEvent::from_event(&e))
        .filter(|t| seen.insert((t.timestamp.clone(), t.kind, t.title.clone())))
        .collect();
    out.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    out
}

/// What the latest session tail says about an agent's recent work.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptSummary {
    pub recent_transcript: Vec<StreamEntry>,
    pub tools_used: Vec<String>,
    pub output_preview: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_duration: Option<String>,
}

/// Reads session logs into stream, timeline and transcript views.
#[derive(Clone)]
pub struct StreamAggregator {
    locator: Locator,
    stream_parser: TranscriptParser,
    detail_parser: TranscriptParser,
    timeline_parser: TranscriptParser,
}

impl StreamAggregator {
    pub fn new(locator: Locator, parser: TranscriptParser) -> Self {
        let heartbeat = parser.heartbeat().clone();
        Self {
            locator,
            stream_parser: parser,
            detail_parser: TranscriptParser::full().with_heartbeat(heartbeat.clone()),
            timeline_parser: TranscriptParser::canonical()
                .with_heartbeat(heartbeat)
                .with_text_budget(None),
        }
    }

    /// Events from the tail of the agent's latest session, tagged for display.
    pub fn recent_entries(&self, identity: &AgentIdentity, now: DateTime<Utc>) -> Vec<StreamEntry> {
        let Some(latest) = self.locator.latest_session(identity) else {
            return Vec::new();
        };
        let lines = match read_tail(&latest.path, STREAM_TAIL_BYTES) {
            Ok(lines) => lines,
            Err(e) => {
                log::debug!("Cannot tail {}: {}", latest.path.display(), e);
                return Vec::new();
            }
        };
        self.stream_parser
            .parse_lines(non_blank(&lines), &identity.id, now)
            .into_iter()
            .map(|e| StreamEntry::tag(e, identity, now))
            .collect()
    }

    /// Fleet-wide live feed. `agent_filter` matches id or name, any case.
    pub fn global_stream(
        &self,
        agents: &[AgentIdentity],
        limit: usize,
        agent_filter: Option<&str>,
        now: DateTime<Utc>,
    ) -> Vec<StreamEntry> {
        let filter = agent_filter.map(str::trim).filter(|f| !f.is_empty());
        let entries = agents
            .iter()
            .filter(|a| filter.map_or(true, |f| a.answers_to(f)))
            .flat_map(|a| self.recent_entries(a, now))
            .collect();
        merge_stream(entries, limit, now)
    }

    /// Deduplicated timeline over every session file touched in the last `hours`.
    pub fn timeline(
        &self,
        identity: &AgentIdentity,
        hours: i64,
        now: DateTime<Utc>,
    ) -> Vec<TimelineEvent> {
        let cutoff = now - Duration::hours(hours);
        let mut events = Vec::new();
        for file in self.locator.sessions_modified_since(identity, cutoff) {
            match read_all(&file.path) {
                Ok(lines) => events.extend(self.timeline_parser.parse_lines(
                    non_blank(&lines),
                    &identity.id,
                    now,
                )),
                Err(e) => log::debug!("Skipping {}: {}", file.path.display(), e),
            }
        }
        build_timeline(events, cutoff)
    }

    /// Last entries, tools, output preview and span of the latest session tail.
    pub fn transcript(&self, identity: &AgentIdentity, now: DateTime<Utc>) -> TranscriptSummary {
        let Some(latest) = self.locator.latest_session(identity) else {
            return TranscriptSummary::default();
        };
        let lines = match read_tail(&latest.path, DETAIL_TAIL_BYTES) {
            Ok(lines) => lines,
            Err(e) => {
                log::debug!("Cannot tail {}: {}", latest.path.display(), e);
                return TranscriptSummary::default();
            }
        };

        let mut first_seen = None;
        let mut last_seen = None;
        let mut events = Vec::new();
        for record in non_blank(&lines).filter_map(LogRecord::decode) {
            if let Some(ts) = record.timestamp() {
                first_seen.get_or_insert(ts);
                last_seen = Some(ts);
            }
            events.extend(self.detail_parser.parse_record(&record, &identity.id, now));
        }

        let tools: BTreeSet<String> = events
            .iter()
            .filter(|e| e.kind == EventKind::Command)
            .filter_map(|e| e.tool_name.clone())
            .collect();
        let output_preview = events
            .iter()
            .rev()
            .find(|e| e.kind == EventKind::Response)
            .map(|e| truncate(&e.text, PREVIEW_BUDGET))
            .unwrap_or_default();

        let skip = events.len().saturating_sub(DETAIL_ENTRIES);
        TranscriptSummary {
            recent_transcript: events
                .into_iter()
                .skip(skip)
                .map(|e| StreamEntry::tag(e, identity, now))
                .collect(),
            tools_used: tools.into_iter().collect(),
            output_preview,
            session_duration: first_seen
                .zip(last_seen)
                .map(|(start, end)| format_duration(end - start)),
        }
    }
}
