use chrono::{DateTime, Utc};

use super::format::format_command;
use super::record::{Content, ContentBlock, LogRecord, Message};
use crate::types::{CanonicalEvent, EventKind};

/// Default character budget for event text.
pub const EVENT_TEXT_BUDGET: usize = 500;

/// Truncates to `max` characters, marking the cut with `...`.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = s.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// Suppresses heartbeat chatter.
///
/// A user prompt is a heartbeat if it mentions the marker in any case. An
/// assistant reply is a heartbeat if, trimmed, it is exactly the ack token.
/// Every view shares this one rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatFilter {
    marker: String,
    ack: String,
}

impl Default for HeartbeatFilter {
    fn default() -> Self {
        Self::new("HEARTBEAT", "HEARTBEAT_OK")
    }
}

impl HeartbeatFilter {
    pub fn new(marker: impl Into<String>, ack: impl Into<String>) -> Self {
        Self {
            marker: marker.into().to_uppercase(),
            ack: ack.into(),
        }
    }

    pub fn is_heartbeat_prompt(&self, text: &str) -> bool {
        text.to_uppercase().contains(&self.marker)
    }

    pub fn is_heartbeat_ack(&self, text: &str) -> bool {
        text.trim() == self.ack
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// Tool results surface only when they are errors.
    Canonical,
    /// Every tool result surfaces, as `result` or `error`.
    Full,
}

/// Turns decoded log records into canonical events.
#[derive(Debug, Clone)]
pub struct TranscriptParser {
    mode: ParseMode,
    heartbeat: HeartbeatFilter,
    text_budget: Option<usize>,
}

impl Default for TranscriptParser {
    fn default() -> Self {
        Self::canonical()
    }
}

impl TranscriptParser {
    pub fn canonical() -> Self {
        Self {
            mode: ParseMode::Canonical,
            heartbeat: HeartbeatFilter::default(),
            text_budget: Some(EVENT_TEXT_BUDGET),
        }
    }

    pub fn full() -> Self {
        Self {
            mode: ParseMode::Full,
            ..Self::canonical()
        }
    }

    /// `None` keeps text whole.
    pub fn with_text_budget(mut self, budget: Option<usize>) -> Self {
        self.text_budget = budget;
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: HeartbeatFilter) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn heartbeat(&self) -> &HeartbeatFilter {
        &self.heartbeat
    }

    pub fn mode(&self) -> ParseMode {
        self.mode
    }

    pub fn parse_line(&self, line: &str, agent_id: &str, now: DateTime<Utc>) -> Vec<CanonicalEvent> {
        if line.trim().is_empty() {
            return Vec::new();
        }
        match LogRecord::decode(line) {
            Some(record) => self.parse_record(&record, agent_id, now),
            None => Vec::new(),
        }
    }

    pub fn parse_lines<'a, I>(&self, lines: I, agent_id: &str, now: DateTime<Utc>) -> Vec<CanonicalEvent>
    where
        I: IntoIterator<Item = &'a str>,
    {
        lines
            .into_iter()
            .flat_map(|line| self.parse_line(line, agent_id, now))
            .collect()
    }

    /// Zero or more events for one record. Records that are not messages yield nothing.
    pub fn parse_record(
        &self,
        record: &LogRecord,
        agent_id: &str,
        now: DateTime<Utc>,
    ) -> Vec<CanonicalEvent> {
        if !record.is_message() {
            return Vec::new();
        }
        let Some(message) = &record.message else {
            return Vec::new();
        };

        let timestamp = record.timestamp().unwrap_or_else(|| {
            log::debug!("Record for {} has no usable timestamp, using now", agent_id);
            now
        });
        let event = |kind: EventKind, text: &str| {
            CanonicalEvent::new(timestamp, agent_id, kind, self.clip(text))
        };

        let mut events = Vec::new();
        match message {
            Message::User(user) => {
                let text = user.content.text();
                if !text.trim().is_empty() && !self.heartbeat.is_heartbeat_prompt(&text) {
                    events.push(event(EventKind::Prompt, &text));
                }
            }
            Message::Assistant(assistant) => {
                if let Content::Text(text) = &assistant.content {
                    if let Some(e) = self.response(text, &event) {
                        events.push(e);
                    }
                }
                for block in assistant.blocks() {
                    match block {
                        ContentBlock::Text { text } => {
                            if let Some(e) = self.response(text, &event) {
                                events.push(e);
                            }
                        }
                        ContentBlock::ToolCall { name, .. } => {
                            let args = block.tool_arguments();
                            let text = format_command(name, args.as_ref());
                            let mut e = event(EventKind::Command, &text).with_tool(name.clone());
                            e.tool_input = serde_json::to_string(&args).ok();
                            events.push(e);
                        }
                        ContentBlock::Unknown => {}
                    }
                }
            }
            Message::ToolResult(result) => {
                let is_error = result.is_error.unwrap_or(false);
                if is_error || self.mode == ParseMode::Full {
                    let kind = if is_error {
                        EventKind::Error
                    } else {
                        EventKind::Result
                    };
                    let mut e = event(kind, &result.output());
                    e.tool_name = result.tool_name.clone().filter(|n| !n.is_empty());
                    e.exit_code = result.exit_code();
                    e.is_error = result.is_error;
                    events.push(e);
                }
            }
        }
        events
    }

    fn response<F>(&self, text: &str, event: &F) -> Option<CanonicalEvent>
    where
        F: Fn(EventKind, &str) -> CanonicalEvent,
    {
        let text = text.trim();
        if text.is_empty() || self.heartbeat.is_heartbeat_ack(text) {
            return None;
        }
        Some(event(EventKind::Response, text))
    }

    fn clip(&self, text: &str) -> String {
        match self.text_budget {
            Some(max) => truncate(text, max),
            None => text.to_string(),
        }
    }
}
