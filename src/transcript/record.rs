use chrono::{DateTime, TimeZone, Utc};
use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

/// One decoded session log line.
#[derive(Debug, Clone, Deserialize)]
pub struct LogRecord {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub timestamp: Option<RawTimestamp>,
    #[serde(default)]
    pub message: Option<Message>,
}

impl LogRecord {
    /// Decodes one line. Malformed JSON and unknown roles yield `None`.
    pub fn decode(line: &str) -> Option<Self> {
        match serde_json::from_str::<LogRecord>(line) {
            Ok(record) => Some(record),
            Err(e) => {
                log::trace!("Skipping undecodable record: {}", e);
                None
            }
        }
    }

    pub fn is_message(&self) -> bool {
        self.kind == "message" && self.message.is_some()
    }

    /// Record timestamp, preferring the root field over the message field.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
            .as_ref()
            .and_then(RawTimestamp::resolve)
            .or_else(|| {
                self.message
                    .as_ref()
                    .and_then(|m| m.timestamp())
                    .and_then(RawTimestamp::resolve)
            })
    }

    pub fn assistant(&self) -> Option<&AssistantMessage> {
        match self.message.as_ref()? {
            Message::Assistant(m) if self.kind == "message" => Some(m),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "role")]
pub enum Message {
    #[serde(rename = "user")]
    User(UserMessage),
    #[serde(rename = "assistant")]
    Assistant(AssistantMessage),
    #[serde(rename = "toolResult", alias = "tool")]
    ToolResult(ToolResultMessage),
}

impl Message {
    fn timestamp(&self) -> Option<&RawTimestamp> {
        match self {
            Message::User(m) => m.timestamp.as_ref(),
            Message::Assistant(m) => m.timestamp.as_ref(),
            Message::ToolResult(m) => m.timestamp.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserMessage {
    #[serde(default)]
    pub content: Content,
    #[serde(default)]
    pub timestamp: Option<RawTimestamp>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Content,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub usage: Option<Usage>,
    #[serde(default)]
    pub timestamp: Option<RawTimestamp>,
}

impl AssistantMessage {
    pub fn blocks(&self) -> impl Iterator<Item = &ContentBlock> {
        self.content.blocks()
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref().filter(|m| !m.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultMessage {
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub content: Content,
    #[serde(default)]
    pub is_error: Option<bool>,
    #[serde(default)]
    pub details: Option<ToolDetails>,
    #[serde(default)]
    pub timestamp: Option<RawTimestamp>,
}

impl ToolResultMessage {
    /// Aggregated output if present, else the joined text blocks, else plain content.
    pub fn output(&self) -> String {
        if let Some(agg) = self
            .details
            .as_ref()
            .and_then(|d| d.aggregated.as_deref())
            .filter(|a| !a.is_empty())
        {
            return agg.to_string();
        }
        self.content.text()
    }

    pub fn exit_code(&self) -> Option<i64> {
        self.details.as_ref()?.exit_code.map(|c| c as i64)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDetails {
    #[serde(default)]
    pub aggregated: Option<String>,
    #[serde(default)]
    pub exit_code: Option<f64>,
}

/// Message content: a bare string or a list of typed blocks.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Blocks(Vec<BlockSlot>),
    Other(IgnoredAny),
}

impl Default for Content {
    fn default() -> Self {
        Content::Blocks(Vec::new())
    }
}

impl Content {
    pub fn blocks(&self) -> impl Iterator<Item = &ContentBlock> {
        let slots: &[BlockSlot] = match self {
            Content::Blocks(slots) => slots,
            _ => &[],
        };
        slots.iter().filter_map(|slot| match slot {
            BlockSlot::Known(block) => Some(block),
            BlockSlot::Other(_) => None,
        })
    }

    /// Plain string content, or the `text` blocks joined with newlines.
    pub fn text(&self) -> String {
        match self {
            Content::Text(s) => s.clone(),
            Content::Blocks(_) => self
                .blocks()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
            Content::Other(_) => String::new(),
        }
    }
}

/// A block slot tolerates array entries that are not objects at all.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BlockSlot {
    Known(ContentBlock),
    Other(IgnoredAny),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text {
        #[serde(default)]
        text: String,
    },
    #[serde(rename = "tool_use", alias = "toolCall")]
    ToolCall {
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: Option<Value>,
        #[serde(default)]
        arguments: Option<Value>,
    },
    #[serde(other)]
    Unknown,
}

impl ContentBlock {
    /// Tool arguments from `arguments` (object), `input` (object), or
    /// `arguments` holding a JSON-encoded object.
    pub fn tool_arguments(&self) -> Option<Map<String, Value>> {
        let ContentBlock::ToolCall {
            input, arguments, ..
        } = self
        else {
            return None;
        };
        if let Some(Value::Object(args)) = arguments {
            return Some(args.clone());
        }
        if let Some(Value::Object(args)) = input {
            return Some(args.clone());
        }
        if let Some(Value::String(raw)) = arguments {
            if let Ok(Value::Object(args)) = serde_json::from_str(raw) {
                return Some(args);
            }
        }
        None
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    #[serde(default, deserialize_with = "lenient_count")]
    pub input: u64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub output: u64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub cache_read: u64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub cache_write: u64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub total_tokens: u64,
    #[serde(default)]
    pub cost: Option<UsageCost>,
}

impl Usage {
    pub fn reported_cost(&self) -> Option<f64> {
        self.cost.as_ref()?.total
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UsageCost {
    #[serde(default, deserialize_with = "lenient_float")]
    pub total: Option<f64>,
}

fn lenient_count<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f > 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

fn lenient_float<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Epoch milliseconds or an RFC 3339 string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Millis(f64),
    Iso(String),
    Other(IgnoredAny),
}

impl RawTimestamp {
    pub fn resolve(&self) -> Option<DateTime<Utc>> {
        match self {
            RawTimestamp::Millis(ms) if ms.is_finite() => {
                Utc.timestamp_millis_opt(*ms as i64).single()
            }
            RawTimestamp::Iso(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
            _ => None,
        }
    }
}
