use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::alarm::AlarmStatus;
use crate::puzzle::PuzzleView;

/// Every state change in the system produces an Event.
/// Observers subscribe to them; they cannot feed anything back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    AlarmCreated {
        alarm_id: String,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    AlarmActivated {
        alarm_id: String,
        end_time: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    AlarmDismissed {
        alarm_id: String,
        at: DateTime<Utc>,
    },
    AlarmExpired {
        alarm_id: String,
        from: AlarmStatus,
        at: DateTime<Utc>,
    },
    AlarmCancelled {
        alarm_id: String,
        at: DateTime<Utc>,
    },
    RecoveryCompleted {
        activated: usize,
        expired: usize,
        at: DateTime<Utc>,
    },
    /// A host wake-up trigger was armed for an alarm start.
    WakeArmed {
        alarm_id: String,
        fire_at: DateTime<Utc>,
    },
    WakeCancelled {
        alarm_id: String,
    },
    /// A fresh puzzle is on screen. Never carries the answer.
    PuzzleIssued {
        alarm_id: String,
        puzzle: PuzzleView,
        remaining_secs: u64,
    },
    AnswerRejected {
        alarm_id: String,
        attempts: u32,
    },
    CountdownTick {
        alarm_id: String,
        remaining_secs: u64,
    },
    SessionEnded {
        alarm_id: String,
        reason: SessionEndReason,
        at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionEndReason {
    Dismissed,
    Expired,
}

/// One-way fan-out of [`Event`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Publishing with no subscribers is fine.
    pub(crate) fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
