//! Recovery sweep run at every process start.
//!
//! Recomputes each non-terminal alarm's true status from its persisted window
//! and the current clock. Nothing about the previous process is assumed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::lifecycle::{LifecycleManager, Transition};
use super::AlarmStatus;
use crate::error::AlarmError;
use crate::events::Event;

/// What the sweep did with one alarm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Window is open; the alarm should be sounding.
    Activated { alarm_id: String },
    /// Window closed while nobody was watching.
    Expired {
        alarm_id: String,
        from: AlarmStatus,
        recorded: bool,
    },
    /// Left as is.
    Skipped { alarm_id: String, reason: String },
    /// Activation could not be written.
    Failed { alarm_id: String, error: String },
}

/// Summary of a recovery sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// Non-terminal alarms examined.
    pub examined: usize,
    pub activated: usize,
    pub expired: usize,
    pub skipped: usize,
    pub failed: usize,
    pub actions: Vec<RecoveryAction>,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }

    fn push(&mut self, action: RecoveryAction) {
        match &action {
            RecoveryAction::Activated { .. } => self.activated += 1,
            RecoveryAction::Expired { .. } => self.expired += 1,
            RecoveryAction::Skipped { .. } => self.skipped += 1,
            RecoveryAction::Failed { .. } => self.failed += 1,
        }
        self.actions.push(action);
    }
}

impl LifecycleManager {
    /// Reconcile stored status with the clock.
    ///
    /// - Scheduled or Active with `end <= now` becomes Expired.
    /// - Scheduled with `start <= now < end` becomes Active, unless another
    ///   alarm already holds the Active slot.
    ///
    /// Expiry runs first so a stale Active alarm frees the slot.
    ///
    /// # Errors
    /// `StorageFailure` only if the alarms cannot be read at all.
    pub fn recover_state(&self, now: DateTime<Utc>) -> Result<RecoveryReport, AlarmError> {
        let mut report = RecoveryReport::default();
        let mut published = Vec::new();

        {
            let mut gate = self.enter();
            self.flush(&mut gate);

            let mut live = self.with_status(&gate, AlarmStatus::Active)?;
            live.extend(self.with_status(&gate, AlarmStatus::Scheduled)?);
            report.examined = live.len();

            let (ended, open): (Vec<_>, Vec<_>) =
                live.into_iter().partition(|a| a.is_past_end(now));

            for alarm in ended {
                let (id, from) = (alarm.id.clone(), alarm.status);
                let transition = self.commit_terminal(&mut gate, alarm, AlarmStatus::Expired, now);
                report.push(RecoveryAction::Expired {
                    alarm_id: id.clone(),
                    from,
                    recorded: matches!(transition, Transition::Applied { .. }),
                });
                published.push(Event::AlarmExpired {
                    alarm_id: id,
                    from,
                    at: now,
                });
            }

            let mut active_id = open
                .iter()
                .find(|a| a.status == AlarmStatus::Active)
                .map(|a| a.id.clone());

            for mut alarm in open {
                match alarm.status {
                    AlarmStatus::Active => {
                        report.push(RecoveryAction::Skipped {
                            alarm_id: alarm.id,
                            reason: "still active within its window".into(),
                        });
                    }
                    AlarmStatus::Scheduled if !alarm.window_contains(now) => {
                        report.push(RecoveryAction::Skipped {
                            alarm_id: alarm.id,
                            reason: "window has not opened".into(),
                        });
                    }
                    AlarmStatus::Scheduled => {
                        if let Some(holder) = &active_id {
                            tracing::warn!(alarm_id = %alarm.id, active = %holder, "recovery cannot activate: slot taken");
                            report.push(RecoveryAction::Skipped {
                                alarm_id: alarm.id,
                                reason: format!("alarm {holder} is already active"),
                            });
                            continue;
                        }
                        alarm.status = AlarmStatus::Active;
                        alarm.updated_at = now;
                        match self.store().put_alarm(&alarm) {
                            Ok(()) => {
                                active_id = Some(alarm.id.clone());
                                published.push(Event::AlarmActivated {
                                    alarm_id: alarm.id.clone(),
                                    end_time: alarm.end_time,
                                    at: now,
                                });
                                report.push(RecoveryAction::Activated { alarm_id: alarm.id });
                            }
                            Err(e) => {
                                tracing::warn!(alarm_id = %alarm.id, error = %e, "recovery activation not recorded");
                                report.push(RecoveryAction::Failed {
                                    alarm_id: alarm.id,
                                    error: e.to_string(),
                                });
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        for event in published {
            self.events().publish(event);
        }
        self.events().publish(Event::RecoveryCompleted {
            activated: report.activated,
            expired: report.expired,
            at: now,
        });
        tracing::info!(
            examined = report.examined,
            activated = report.activated,
            expired = report.expired,
            skipped = report.skipped,
            failed = report.failed,
            "recovery sweep finished"
        );
        Ok(report)
    }
}
