pub mod memory;
pub mod postgres;
pub mod traits;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use traits::{is_audit_action, ActivityEntry, AgentRecord, AgentStore, AUDIT_ACTIONS};
