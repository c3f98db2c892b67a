use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::types::HealthStatus;

/// Activity older than this downgrades an agent to offline.
pub const ACTIVITY_HORIZON_HOURS: i64 = 24;

/// Datastore fix-up implied by what a health evaluation observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusCorrection {
    /// Orchestrator seen in any state other than online.
    ForceOnline,
    /// Recorded offline but active within the horizon. Applied only while the
    /// row still reads offline.
    IdleFromOffline,
}

impl StatusCorrection {
    pub fn target(&self) -> HealthStatus {
        match self {
            StatusCorrection::ForceOnline => HealthStatus::Online,
            StatusCorrection::IdleFromOffline => HealthStatus::Idle,
        }
    }
}

pub struct StatusPolicy;

impl StatusPolicy {
    fn horizon() -> Duration {
        Duration::hours(ACTIVITY_HORIZON_HOURS)
    }

    /// Status to report for a recorded status, plus any datastore correction.
    pub fn display(
        recorded: HealthStatus,
        last_activity: Option<DateTime<Utc>>,
        is_orchestrator: bool,
        now: DateTime<Utc>,
    ) -> (HealthStatus, Option<StatusCorrection>) {
        if is_orchestrator {
            let correction = (recorded != HealthStatus::Online).then_some(StatusCorrection::ForceOnline);
            return (HealthStatus::Online, correction);
        }

        if recorded == HealthStatus::Offline {
            if let Some(last) = last_activity {
                if now - last < Self::horizon() {
                    return (HealthStatus::Idle, Some(StatusCorrection::IdleFromOffline));
                }
            }
        }
        (recorded, None)
    }

    /// Automatic transition after a health evaluation, if any.
    ///
    /// Only online, degraded and idle agents move. An agent that has never been
    /// seen settles at idle; one silent past the horizon goes offline. The
    /// orchestrator never moves.
    pub fn next(
        status: HealthStatus,
        last_seen: Option<DateTime<Utc>>,
        is_orchestrator: bool,
        now: DateTime<Utc>,
    ) -> Option<HealthStatus> {
        if is_orchestrator || !status.is_downgrade_eligible() {
            return None;
        }

        match last_seen {
            None if status != HealthStatus::Idle => Some(HealthStatus::Idle),
            None => None,
            Some(seen) if now - seen > Self::horizon() => Some(HealthStatus::Offline),
            Some(_) => None,
        }
    }
}
