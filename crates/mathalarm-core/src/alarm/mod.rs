//! Alarm model and lifecycle.
//!
//! ## State Transitions
//!
//! ```text
//! Scheduled -> Active -> (Dismissed | Expired)
//! Scheduled -> (Cancelled | Expired)
//! ```
//!
//! `Dismissed`, `Expired` and `Cancelled` are terminal.

mod lifecycle;
mod recovery;

pub use lifecycle::{AlarmPolicy, CleanupReport, LifecycleManager, Transition};
pub use recovery::{RecoveryAction, RecoveryReport};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmStatus {
    Scheduled,
    /// Currently sounding. At most one alarm holds this status.
    Active,
    Dismissed,
    Expired,
    Cancelled,
}

impl AlarmStatus {
    pub const TERMINAL: [AlarmStatus; 3] = [
        AlarmStatus::Dismissed,
        AlarmStatus::Expired,
        AlarmStatus::Cancelled,
    ];

    pub fn is_terminal(self) -> bool {
        Self::TERMINAL.contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlarmStatus::Scheduled => "scheduled",
            AlarmStatus::Active => "active",
            AlarmStatus::Dismissed => "dismissed",
            AlarmStatus::Expired => "expired",
            AlarmStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(AlarmStatus::Scheduled),
            "active" => Some(AlarmStatus::Active),
            "dismissed" => Some(AlarmStatus::Dismissed),
            "expired" => Some(AlarmStatus::Expired),
            "cancelled" => Some(AlarmStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for AlarmStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One configured alert window `[start_time, end_time)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alarm {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: AlarmStatus,
    pub label: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Alarm {
    pub(crate) fn new(
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        label: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            start_time,
            end_time,
            status: AlarmStatus::Scheduled,
            label: label.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// True while `now` falls inside `[start_time, end_time)`.
    pub fn window_contains(&self, now: DateTime<Utc>) -> bool {
        self.start_time <= now && now < self.end_time
    }

    pub fn is_past_end(&self, now: DateTime<Utc>) -> bool {
        now >= self.end_time
    }

    /// Closed-open interval overlap against another window.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        windows_overlap(start, end, self.start_time, self.end_time)
    }
}

/// `[a_start, a_end)` and `[b_start, b_end)` share at least one instant.
pub fn windows_overlap(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> bool {
    !(a_end <= b_start || a_start >= b_end)
}
