//! Point-in-time replicator status.

use crate::engine::EngineStatus;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Engine-reported connectivity and work state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityLevel {
    /// Unstarted, finished, or hit a fatal error.
    Stopped = 0,
    /// The remote host is unreachable.
    Offline = 1,
    /// Connecting to the remote host.
    Connecting = 2,
    /// Caught up, waiting for changes.
    Idle = 3,
    /// Actively transferring data.
    Busy = 4,
}

impl ActivityLevel {
    /// All activity levels in code order.
    pub const ALL: [ActivityLevel; 5] = [
        ActivityLevel::Stopped,
        ActivityLevel::Offline,
        ActivityLevel::Connecting,
        ActivityLevel::Idle,
        ActivityLevel::Busy,
    ];

    /// Returns the numeric engine code.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Returns the lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityLevel::Stopped => "stopped",
            ActivityLevel::Offline => "offline",
            ActivityLevel::Connecting => "connecting",
            ActivityLevel::Idle => "idle",
            ActivityLevel::Busy => "busy",
        }
    }
}

impl TryFrom<i32> for ActivityLevel {
    type Error = i32;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        ActivityLevel::ALL
            .into_iter()
            .find(|level| level.code() == code)
            .ok_or(code)
    }
}

impl fmt::Display for ActivityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A snapshot of a replicator's state.
///
/// Produced fresh on every query. Two successive snapshots need not agree.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Current activity.
    pub activity: ActivityLevel,
    /// Fraction of known work done, in `[0.0, 1.0]`.
    pub progress_complete: f32,
    /// Documents processed in the current run.
    pub document_count: u64,
    /// Last error code; 0 means no error.
    pub error_code: i32,
}

impl StatusSnapshot {
    /// Snapshot of a session that never ran.
    pub fn stopped() -> Self {
        Self {
            activity: ActivityLevel::Stopped,
            progress_complete: 0.0,
            document_count: 0,
            error_code: 0,
        }
    }

    /// Returns true if caught up and waiting for changes.
    pub fn is_idle(&self) -> bool {
        self.activity == ActivityLevel::Idle
    }

    /// Returns true if transferring data.
    pub fn is_busy(&self) -> bool {
        self.activity == ActivityLevel::Busy
    }

    /// Returns true if stopped.
    pub fn is_stopped(&self) -> bool {
        self.activity == ActivityLevel::Stopped
    }

    /// Returns true if the remote is unreachable.
    pub fn is_offline(&self) -> bool {
        self.activity == ActivityLevel::Offline
    }

    /// Returns true if connecting.
    pub fn is_connecting(&self) -> bool {
        self.activity == ActivityLevel::Connecting
    }

    /// Returns true if the snapshot carries an error.
    pub fn has_error(&self) -> bool {
        self.error_code != 0
    }
}

impl From<EngineStatus> for StatusSnapshot {
    fn from(status: EngineStatus) -> Self {
        let progress_complete = if status.complete.is_nan() {
            0.0
        } else {
            status.complete.clamp(0.0, 1.0)
        };
        Self {
            activity: status.activity,
            progress_complete,
            document_count: status.document_count,
            error_code: status.error.map_or(0, |e| e.code),
        }
    }
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<10} {:>5.1}%  docs={}",
            self.activity,
            self.progress_complete * 100.0,
            self.document_count
        )?;
        if self.has_error() {
            write!(f, "  error={}", self.error_code)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineFailure;
    use proptest::prelude::*;

    fn snapshot(activity: ActivityLevel) -> StatusSnapshot {
        StatusSnapshot {
            activity,
            ..StatusSnapshot::stopped()
        }
    }

    #[test]
    fn activity_codes() {
        assert_eq!(ActivityLevel::Stopped.code(), 0);
        assert_eq!(ActivityLevel::Busy.code(), 4);
        for level in ActivityLevel::ALL {
            assert_eq!(ActivityLevel::try_from(level.code()), Ok(level));
        }
        assert_eq!(ActivityLevel::try_from(5), Err(5));
        assert_eq!(ActivityLevel::try_from(-1), Err(-1));
    }

    #[test]
    fn projection_clamps_progress() {
        let status = EngineStatus {
            activity: ActivityLevel::Busy,
            complete: 1.5,
            document_count: 3,
            error: None,
        };
        let snap = StatusSnapshot::from(status.clone());
        assert_eq!(snap.progress_complete, 1.0);
        assert_eq!(snap.error_code, 0);

        let snap = StatusSnapshot::from(EngineStatus {
            complete: f32::NAN,
            error: Some(EngineFailure::new(111, "connection refused")),
            ..status
        });
        assert_eq!(snap.progress_complete, 0.0);
        assert_eq!(snap.error_code, 111);
        assert!(snap.has_error());
    }

    #[test]
    fn serializes_lowercase_activity() {
        let json = serde_json::to_string(&snapshot(ActivityLevel::Idle)).unwrap();
        assert!(json.contains("\"activity\":\"idle\""));
        let back: StatusSnapshot = serde_json::from_str(&json).unwrap();
        assert!(back.is_idle());
    }

    #[test]
    fn display() {
        let snap = StatusSnapshot {
            activity: ActivityLevel::Busy,
            progress_complete: 0.5,
            document_count: 12,
            error_code: 0,
        };
        let out = snap.to_string();
        assert!(out.contains("busy"));
        assert!(out.contains("50.0%"));
        assert!(out.contains("docs=12"));
        assert!(!out.contains("error"));
    }

    proptest! {
        #[test]
        fn exactly_one_predicate_holds(code in 0i32..5, complete in any::<f32>(), count in any::<u64>()) {
            let activity = ActivityLevel::try_from(code).unwrap();
            let snap = StatusSnapshot::from(EngineStatus {
                activity,
                complete,
                document_count: count,
                error: None,
            });
            let held = [
                snap.is_idle(),
                snap.is_busy(),
                snap.is_stopped(),
                snap.is_offline(),
                snap.is_connecting(),
            ];
            prop_assert_eq!(held.iter().filter(|b| **b).count(), 1);
            prop_assert!((0.0..=1.0).contains(&snap.progress_complete));
        }
    }
}
