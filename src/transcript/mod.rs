pub mod format;
pub mod parser;
pub mod reader;
pub mod record;

pub use format::format_command;
pub use parser::{truncate, HeartbeatFilter, ParseMode, TranscriptParser, EVENT_TEXT_BUDGET};
pub use reader::{non_blank, read_all, read_tail};
pub use record::{ContentBlock, LogRecord, Message, Usage};
