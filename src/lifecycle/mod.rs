pub mod health;
pub mod monitor;
pub mod state_machine;

pub use health::{assess, AgentHealth, Assessment, HealthCheck, HealthInputs};
pub use monitor::{
    ControlOutcome, HealthMonitor, HealthSweep, StatusTransition, DEFAULT_ACTIVITY_ENTRIES,
    MAX_ACTIVITY_ENTRIES, SWEEP_STATUSES,
};
pub use state_machine::{StatusCorrection, StatusPolicy, ACTIVITY_HORIZON_HOURS};
