//! Host deferred-wake primitive.
//!
//! A [`WakeHost`] delivers a [`WakePayload`] at or after a requested time.
//! Delivery may be late. An early trigger is re-armed by the coordinator.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::clock::{remaining_until, Clock};

/// Carried by a wake trigger back to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WakePayload {
    pub alarm_id: String,
    pub end_time: DateTime<Utc>,
}

/// At most one trigger is outstanding per host. Scheduling replaces it.
pub trait WakeHost: Send + Sync {
    fn schedule_wake(&self, at: DateTime<Utc>, payload: WakePayload);
    fn cancel_wake(&self);
}

/// In-process wake host: sleeps on the tokio timer, then sends the payload
/// down an unbounded channel.
///
/// Only useful while the process is alive; after a restart the coordinator
/// re-arms from the store during boot.
pub struct TokioWakeHost {
    clock: Arc<dyn Clock>,
    tx: mpsc::UnboundedSender<WakePayload>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl TokioWakeHost {
    pub fn new(clock: Arc<dyn Clock>) -> (Self, mpsc::UnboundedReceiver<WakePayload>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let host = Self {
            clock,
            tx,
            pending: Mutex::new(None),
        };
        (host, rx)
    }

    fn replace(&self, next: Option<JoinHandle<()>>) {
        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(old) = pending.take() {
            old.abort();
        }
        *pending = next;
    }
}

impl WakeHost for TokioWakeHost {
    /// Must be called inside a tokio runtime.
    fn schedule_wake(&self, at: DateTime<Utc>, payload: WakePayload) {
        let delay = remaining_until(self.clock.now(), at);
        let tx = self.tx.clone();
        tracing::debug!(alarm_id = %payload.alarm_id, at = %at, delay_ms = delay.as_millis() as u64, "wake scheduled");
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(payload).is_err() {
                tracing::debug!("wake receiver dropped");
            }
        });
        self.replace(Some(handle));
    }

    fn cancel_wake(&self) {
        self.replace(None);
    }
}

impl Drop for TokioWakeHost {
    fn drop(&mut self) {
        self.replace(None);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use super::*;
    use crate::clock::{from_epoch_ms, AnchoredClock};

    fn payload(id: &str) -> WakePayload {
        WakePayload {
            alarm_id: id.into(),
            end_time: from_epoch_ms(1_700_000_100_000),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_at_requested_time() {
        let clock = Arc::new(AnchoredClock::new(from_epoch_ms(1_700_000_000_000)));
        let (host, mut rx) = TokioWakeHost::new(clock.clone());
        host.schedule_wake(from_epoch_ms(1_700_000_030_000), payload("a"));

        tokio::time::sleep(StdDuration::from_secs(29)).await;
        assert!(rx.try_recv().is_err());

        let got = rx.recv().await.unwrap();
        assert_eq!(got.alarm_id, "a");
        assert_eq!(clock.now(), from_epoch_ms(1_700_000_030_000));
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_pending() {
        let clock = Arc::new(AnchoredClock::new(from_epoch_ms(1_700_000_000_000)));
        let (host, mut rx) = TokioWakeHost::new(clock);
        host.schedule_wake(from_epoch_ms(1_700_000_010_000), payload("old"));
        host.schedule_wake(from_epoch_ms(1_700_000_020_000), payload("new"));

        tokio::time::sleep(StdDuration::from_secs(25)).await;
        assert_eq!(rx.try_recv().unwrap().alarm_id, "new");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_suppresses_delivery() {
        let clock = Arc::new(AnchoredClock::new(from_epoch_ms(1_700_000_000_000)));
        let (host, mut rx) = TokioWakeHost::new(clock);
        host.schedule_wake(from_epoch_ms(1_700_000_010_000), payload("a"));
        host.cancel_wake();

        tokio::time::sleep(StdDuration::from_secs(60)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn past_time_fires_immediately() {
        let clock = Arc::new(AnchoredClock::new(from_epoch_ms(1_700_000_000_000)));
        let (host, mut rx) = TokioWakeHost::new(clock);
        host.schedule_wake(from_epoch_ms(1_600_000_000_000), payload("late"));
        assert_eq!(rx.recv().await.unwrap().alarm_id, "late");
    }
}
