use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::pricing::PriceTable;
use crate::transcript::LogRecord;
use crate::types::AgentId;

/// Token usage of one assistant turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub agent_id: AgentId,
    pub timestamp: DateTime<Utc>,
    pub model: Option<String>,
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_write: u64,
    pub total_tokens: u64,
    pub cost_usd: f64,
    /// True when the cost came from the log rather than the price table.
    pub cost_reported: bool,
}

impl UsageRecord {
    /// Input-side tokens, cache traffic included.
    pub fn tokens_in(&self) -> u64 {
        self.input
            .saturating_add(self.cache_read)
            .saturating_add(self.cache_write)
    }
}

pub struct UsageAccountant {
    prices: PriceTable,
}

impl UsageAccountant {
    pub fn new(prices: PriceTable) -> Self {
        Self { prices }
    }

    pub fn extract(&self, record: &LogRecord, agent_id: &str, now: DateTime<Utc>) -> Option<UsageRecord> {
        let assistant = record.assistant()?;
        let usage = assistant.usage.as_ref()?;
        let model = assistant.model().map(str::to_string);

        // Sums saturate at u64::MAX.
        let input_side = usage
            .input
            .saturating_add(usage.cache_read)
            .saturating_add(usage.cache_write);
        let (cost_usd, cost_reported) = match usage.reported_cost() {
            Some(cost) => (cost, true),
            None => (
                self.prices.price_for(model.as_deref()).cost(input_side, usage.output),
                false,
            ),
        };
        let total_tokens = if usage.total_tokens > 0 {
            usage.total_tokens
        } else {
            input_side.saturating_add(usage.output)
        };

        Some(UsageRecord {
            agent_id: agent_id.to_string(),
            timestamp: record.timestamp().unwrap_or(now),
            model,
            input: usage.input,
            output: usage.output,
            cache_read: usage.cache_read,
            cache_write: usage.cache_write,
            total_tokens,
            cost_usd,
            cost_reported,
        })
    }

    pub fn extract_lines<'a, I>(&self, lines: I, agent_id: &str, now: DateTime<Utc>) -> Vec<UsageRecord>
    where
        I: IntoIterator<Item = &'a str>,
    {
        lines
            .into_iter()
            .filter_map(LogRecord::decode)
            .filter_map(|record| self.extract(&record, agent_id, now))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub total_tokens: u64,
    pub cost_usd: f64,
    pub messages: usize,
}

impl UsageTotals {
    fn add(&mut self, r: &UsageRecord) {
        self.tokens_in = self.tokens_in.saturating_add(r.tokens_in());
        self.tokens_out = self.tokens_out.saturating_add(r.output);
        self.total_tokens = self.total_tokens.saturating_add(r.total_tokens);
        self.cost_usd += r.cost_usd;
        self.messages += 1;
    }
}

pub fn totals(records: &[UsageRecord]) -> UsageTotals {
    let mut t = UsageTotals::default();
    for r in records {
        t.add(r);
    }
    t
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentUsage {
    pub agent_id: AgentId,
    pub name: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub total_tokens: u64,
    pub cost_usd: f64,
    pub message_count: usize,
}

/// Per-agent totals, most expensive first. `name` starts out as the agent id.
pub fn by_agent(records: &[UsageRecord], since: Option<DateTime<Utc>>) -> Vec<AgentUsage> {
    let mut map: HashMap<&str, UsageTotals> = HashMap::new();
    for r in records {
        if since.is_some_and(|cutoff| r.timestamp < cutoff) {
            continue;
        }
        map.entry(r.agent_id.as_str()).or_default().add(r);
    }

    let mut out: Vec<AgentUsage> = map
        .into_iter()
        .map(|(id, t)| AgentUsage {
            agent_id: id.to_string(),
            name: id.to_string(),
            tokens_in: t.tokens_in,
            tokens_out: t.tokens_out,
            total_tokens: t.total_tokens,
            cost_usd: t.cost_usd,
            message_count: t.messages,
        })
        .collect();
    out.sort_by(|a, b| {
        b.cost_usd
            .total_cmp(&a.cost_usd)
            .then_with(|| a.agent_id.cmp(&b.agent_id))
    });
    out
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyUsage {
    pub date: NaiveDate,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost_usd: f64,
}

/// One row per day for the `days` days ending at `today`, gaps zero-filled.
pub fn by_day(
    records: &[UsageRecord],
    today: NaiveDate,
    days: u32,
    agent_filter: Option<&str>,
) -> Vec<DailyUsage> {
    let days = days.max(1);
    let first = today - Duration::days(i64::from(days) - 1);

    let mut rows: Vec<DailyUsage> = first
        .iter_days()
        .take(days as usize)
        .map(|date| DailyUsage {
            date,
            tokens_in: 0,
            tokens_out: 0,
            cost_usd: 0.0,
        })
        .collect();

    for r in records {
        if agent_filter.is_some_and(|a| a != r.agent_id) {
            continue;
        }
        let date = r.timestamp.date_naive();
        if date < first || date > today {
            continue;
        }
        let row = &mut rows[(date - first).num_days() as usize];
        row.tokens_in = row.tokens_in.saturating_add(r.tokens_in());
        row.tokens_out = row.tokens_out.saturating_add(r.output);
        row.cost_usd += r.cost_usd;
    }
    rows
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelUsage {
    pub model: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost_usd: f64,
    pub message_count: usize,
}

pub fn by_model(records: &[UsageRecord]) -> Vec<ModelUsage> {
    let mut map: HashMap<&str, UsageTotals> = HashMap::new();
    for r in records {
        let model = r.model.as_deref().unwrap_or("unknown");
        map.entry(model).or_default().add(r);
    }

    let mut out: Vec<ModelUsage> = map
        .into_iter()
        .map(|(model, t)| ModelUsage {
            model: model.to_string(),
            tokens_in: t.tokens_in,
            tokens_out: t.tokens_out,
            cost_usd: t.cost_usd,
            message_count: t.messages,
        })
        .collect();
    out.sort_by(|a, b| b.cost_usd.total_cmp(&a.cost_usd).then_with(|| a.model.cmp(&b.model)));
    out
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    pub cost_this_week: f64,
    pub cost_this_month: f64,
    pub cost_all_time: f64,
    pub tokens_all_time: u64,
    pub most_expensive_agent: Option<String>,
    pub most_expensive_cost: f64,
}

/// Weeks start on Sunday, both boundaries in UTC.
pub fn cost_summary(records: &[UsageRecord], now: DateTime<Utc>) -> CostSummary {
    let today = now.date_naive();
    let week_start = today - Duration::days(i64::from(today.weekday().num_days_from_sunday()));
    let month_start = today.with_day(1).unwrap_or(today);
    let week_start = Utc.from_utc_datetime(&week_start.and_time(chrono::NaiveTime::MIN));
    let month_start = Utc.from_utc_datetime(&month_start.and_time(chrono::NaiveTime::MIN));

    let mut summary = CostSummary {
        cost_this_week: 0.0,
        cost_this_month: 0.0,
        cost_all_time: 0.0,
        tokens_all_time: 0,
        most_expensive_agent: None,
        most_expensive_cost: 0.0,
    };

    for r in records {
        summary.cost_all_time += r.cost_usd;
        summary.tokens_all_time = summary.tokens_all_time.saturating_add(r.total_tokens);
        if r.timestamp >= week_start {
            summary.cost_this_week += r.cost_usd;
        }
        if r.timestamp >= month_start {
            summary.cost_this_month += r.cost_usd;
        }
    }

    if let Some(top) = by_agent(records, None).into_iter().find(|a| a.cost_usd > 0.0) {
        summary.most_expensive_cost = top.cost_usd;
        summary.most_expensive_agent = Some(top.agent_id);
    }
    summary
}
