pub mod broadcast;
pub mod reconcile;
pub mod status;
pub mod stream;
pub mod telemetry;

pub use broadcast::{BroadcastMessage, Broadcaster, ChannelBroadcaster};
pub use reconcile::{HealthCheckLoop, StatusBroadcastLoop, HEALTH_UPDATE_EVENT, STATUS_UPDATE_EVENT};
pub use status::{classify, relative_time, AgentStatus, StatusDeriver};
pub use stream::{
    build_timeline, merge_stream, StreamAggregator, StreamEntry, TimelineEvent, TimelineKind,
    TranscriptSummary,
};
pub use telemetry::{AgentDetail, FleetStats, TeamStats, TelemetryService};
