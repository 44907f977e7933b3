//! Alert actuation contract.
//!
//! The core only ever starts and stops the alert. Implementations must
//! tolerate repeated calls.

pub trait AlertPlayer: Send + Sync {
    fn start_alert(&self);
    fn stop_alert(&self);
}

/// Records playback requests in the log and nothing else.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingPlayer;

impl AlertPlayer for TracingPlayer {
    fn start_alert(&self) {
        tracing::info!("alert started");
    }

    fn stop_alert(&self) {
        tracing::info!("alert stopped");
    }
}
