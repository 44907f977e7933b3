//! Alarm lifecycle manager.
//!
//! Owns every status change. All transitions for every alarm pass through one
//! gate, so "at most one alarm is Active" holds under any interleaving of
//! callers. Terminal transitions that lose a race are no-ops, not errors.
//!
//! Dismiss and expire are safety paths: if the store rejects the write, the
//! new status is kept in memory (overlaying the stored record) and retried on
//! the next gate entry. Callers get `Transition::Unrecorded` and every read
//! already reports the new status.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use super::{Alarm, AlarmStatus};
use crate::clock::Clock;
use crate::error::{AlarmError, DatabaseError};
use crate::events::{Event, EventBus};
use crate::storage::AlarmStore;

/// Window limits and retention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmPolicy {
    pub min_duration: Duration,
    pub max_duration: Duration,
    pub alarm_retention: Duration,
    pub puzzle_retention: Duration,
}

impl AlarmPolicy {
    pub fn production() -> Self {
        Self {
            min_duration: Duration::minutes(1),
            ..Self::debug()
        }
    }

    pub fn debug() -> Self {
        Self {
            min_duration: Duration::seconds(5),
            max_duration: Duration::hours(12),
            alarm_retention: Duration::days(7),
            puzzle_retention: Duration::days(1),
        }
    }
}

impl Default for AlarmPolicy {
    fn default() -> Self {
        Self::production()
    }
}

/// Outcome of a status-changing call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Transition {
    Applied { from: AlarmStatus, to: AlarmStatus },
    /// Already in the target (or another terminal) status.
    NoOp { status: AlarmStatus },
    /// Applied in memory only; the store write failed and will be retried.
    Unrecorded { to: AlarmStatus, error: String },
}

impl Transition {
    pub fn changed(&self) -> bool {
        !matches!(self, Transition::NoOp { .. })
    }

    pub fn status(&self) -> AlarmStatus {
        match self {
            Transition::Applied { to, .. } | Transition::Unrecorded { to, .. } => *to,
            Transition::NoOp { status } => *status,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub alarms_purged: usize,
    pub puzzles_purged: usize,
}

/// State held inside the transition gate.
#[derive(Default)]
pub(super) struct GateState {
    /// Terminal records the store has not accepted yet.
    unflushed: HashMap<String, Alarm>,
}

pub struct LifecycleManager {
    store: Arc<dyn AlarmStore>,
    clock: Arc<dyn Clock>,
    policy: AlarmPolicy,
    events: EventBus,
    gate: Mutex<GateState>,
}

impl LifecycleManager {
    pub fn new(store: Arc<dyn AlarmStore>, clock: Arc<dyn Clock>, policy: AlarmPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
            events: EventBus::default(),
            gate: Mutex::new(GateState::default()),
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn policy(&self) -> &AlarmPolicy {
        &self.policy
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now().trunc_subsecs(3)
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub fn get(&self, id: &str) -> Result<Alarm, AlarmError> {
        let gate = self.enter();
        self.load(&gate, id)?
            .ok_or_else(|| AlarmError::alarm_not_found(id))
    }

    pub fn by_status(&self, status: AlarmStatus) -> Result<Vec<Alarm>, AlarmError> {
        let gate = self.enter();
        Ok(self.with_status(&gate, status)?)
    }

    pub fn list(&self) -> Result<Vec<Alarm>, AlarmError> {
        let gate = self.enter();
        let mut alarms = self.store.list_alarms()?;
        for alarm in alarms.iter_mut() {
            if let Some(pending) = gate.unflushed.get(&alarm.id) {
                *alarm = pending.clone();
            }
        }
        Ok(alarms)
    }

    /// The currently sounding alarm, if any.
    pub fn active(&self) -> Result<Option<Alarm>, AlarmError> {
        Ok(self.by_status(AlarmStatus::Active)?.into_iter().next())
    }

    /// Earliest scheduled alarm that has not ended by `now`.
    pub fn next_scheduled(&self, now: DateTime<Utc>) -> Result<Option<Alarm>, AlarmError> {
        Ok(self
            .by_status(AlarmStatus::Scheduled)?
            .into_iter()
            .find(|a| !a.is_past_end(now)))
    }

    // ── Validation ───────────────────────────────────────────────────

    /// Check a candidate window, reporting the first rule it breaks in the
    /// order: start in the past, inverted window, too long, too short.
    pub fn validate(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), AlarmError> {
        validate_window(&self.policy, start, end, now)
    }

    /// False if an alarm is Active or the window overlaps a Scheduled one.
    pub fn can_create(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<bool, AlarmError> {
        let gate = self.enter();
        Ok(self.conflict(&gate, start, end)?.is_none())
    }

    fn conflict(
        &self,
        gate: &GateState,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<String>, DatabaseError> {
        if let Some(active) = self.with_status(gate, AlarmStatus::Active)?.first() {
            return Ok(Some(format!("alarm {} is currently active", active.id)));
        }
        let clash = self
            .with_status(gate, AlarmStatus::Scheduled)?
            .into_iter()
            .find(|a| a.overlaps(start, end));
        Ok(clash.map(|a| {
            format!(
                "window overlaps scheduled alarm {} ({} to {})",
                a.id,
                a.start_time.to_rfc3339(),
                a.end_time.to_rfc3339()
            )
        }))
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Validate, check conflicts and persist a new Scheduled alarm.
    ///
    /// # Errors
    /// The first violated window rule, `Conflict`, or `StorageFailure`.
    /// Nothing is written unless every check passes.
    pub fn create(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        label: &str,
    ) -> Result<Alarm, AlarmError> {
        let now = self.now();
        let (start, end) = (start.trunc_subsecs(3), end.trunc_subsecs(3));
        self.validate(start, end, now)?;

        let mut gate = self.enter();
        self.flush(&mut gate);
        if let Some(reason) = self.conflict(&gate, start, end)? {
            return Err(AlarmError::Conflict(reason));
        }

        let alarm = Alarm::new(start, end, label, now);
        self.store.put_alarm(&alarm)?;
        drop(gate);

        tracing::info!(alarm_id = %alarm.id, start = %start, end = %end, "alarm created");
        self.events.publish(Event::AlarmCreated {
            alarm_id: alarm.id.clone(),
            start_time: start,
            end_time: end,
            at: now,
        });
        Ok(alarm)
    }

    /// Scheduled -> Active.
    ///
    /// Idempotent for an alarm that is already Active. A terminal alarm is
    /// left alone (a stale trigger after cancel lands here).
    ///
    /// # Errors
    /// `Conflict` if a different alarm is Active, `NotFound`, or
    /// `StorageFailure` (the alarm then stays Scheduled).
    pub fn activate(&self, id: &str) -> Result<Transition, AlarmError> {
        let now = self.now();
        let mut gate = self.enter();
        self.flush(&mut gate);

        let mut alarm = self
            .load(&gate, id)?
            .ok_or_else(|| AlarmError::alarm_not_found(id))?;
        if alarm.status != AlarmStatus::Scheduled {
            tracing::debug!(alarm_id = id, status = %alarm.status, "activate ignored");
            return Ok(Transition::NoOp {
                status: alarm.status,
            });
        }

        if let Some(other) = self.with_status(&gate, AlarmStatus::Active)?.first() {
            return Err(AlarmError::Conflict(format!(
                "alarm {} is already active",
                other.id
            )));
        }

        alarm.status = AlarmStatus::Active;
        alarm.updated_at = now;
        self.store.put_alarm(&alarm)?;
        drop(gate);

        tracing::info!(alarm_id = id, end = %alarm.end_time, "alarm activated");
        self.events.publish(Event::AlarmActivated {
            alarm_id: alarm.id.clone(),
            end_time: alarm.end_time,
            at: now,
        });
        Ok(Transition::Applied {
            from: AlarmStatus::Scheduled,
            to: AlarmStatus::Active,
        })
    }

    /// Active -> Dismissed, after a correct answer.
    ///
    /// # Errors
    /// `NotFound`, or `Conflict` for a Scheduled alarm (nothing to dismiss yet).
    /// Storage failures are absorbed.
    pub fn dismiss(&self, id: &str) -> Result<Transition, AlarmError> {
        self.terminate(id, AlarmStatus::Dismissed, &[AlarmStatus::Active])
    }

    /// Scheduled | Active -> Expired.
    pub fn expire(&self, id: &str) -> Result<Transition, AlarmError> {
        self.terminate(
            id,
            AlarmStatus::Expired,
            &[AlarmStatus::Scheduled, AlarmStatus::Active],
        )
    }

    /// Scheduled -> Cancelled.
    ///
    /// # Errors
    /// `Conflict` for an Active alarm: it can only be dismissed or expire.
    pub fn cancel(&self, id: &str) -> Result<Transition, AlarmError> {
        self.terminate(id, AlarmStatus::Cancelled, &[AlarmStatus::Scheduled])
    }

    fn terminate(
        &self,
        id: &str,
        target: AlarmStatus,
        allowed_from: &[AlarmStatus],
    ) -> Result<Transition, AlarmError> {
        let now = self.now();
        let mut gate = self.enter();
        self.flush(&mut gate);

        let alarm = match self.load(&gate, id) {
            Ok(Some(alarm)) => alarm,
            Ok(None) => return Err(AlarmError::alarm_not_found(id)),
            Err(e) if target == AlarmStatus::Cancelled => return Err(e.into()),
            Err(e) => {
                tracing::warn!(alarm_id = id, error = %e, status = %target, "could not read alarm; transition not recorded");
                return Ok(Transition::Unrecorded {
                    to: target,
                    error: e.to_string(),
                });
            }
        };

        if alarm.status.is_terminal() {
            tracing::debug!(alarm_id = id, status = %alarm.status, "already terminal");
            return Ok(Transition::NoOp {
                status: alarm.status,
            });
        }
        if !allowed_from.contains(&alarm.status) {
            return Err(AlarmError::Conflict(format!(
                "alarm {id} is {} and cannot become {target}",
                alarm.status
            )));
        }

        let from = alarm.status;
        let transition = self.commit_terminal(&mut gate, alarm, target, now);
        drop(gate);

        self.publish_terminal(id, from, target, now);
        Ok(transition)
    }

    /// Write a terminal status, keeping it in memory if the store refuses.
    pub(super) fn commit_terminal(
        &self,
        gate: &mut GateState,
        mut alarm: Alarm,
        target: AlarmStatus,
        now: DateTime<Utc>,
    ) -> Transition {
        let from = alarm.status;
        alarm.status = target;
        alarm.updated_at = now;

        match self.store.put_alarm(&alarm) {
            Ok(()) => {
                gate.unflushed.remove(&alarm.id);
                tracing::info!(alarm_id = %alarm.id, from = %from, to = %target, "alarm transitioned");
                Transition::Applied { from, to: target }
            }
            Err(e) if target == AlarmStatus::Cancelled => {
                // Cancel is not a safety path; report the truth.
                tracing::warn!(alarm_id = %alarm.id, error = %e, "cancel not recorded");
                gate.unflushed.insert(alarm.id.clone(), alarm);
                Transition::Unrecorded {
                    to: target,
                    error: e.to_string(),
                }
            }
            Err(e) => {
                tracing::warn!(
                    alarm_id = %alarm.id,
                    from = %from,
                    to = %target,
                    error = %e,
                    "store rejected terminal transition; holding in memory"
                );
                gate.unflushed.insert(alarm.id.clone(), alarm);
                Transition::Unrecorded {
                    to: target,
                    error: e.to_string(),
                }
            }
        }
    }

    pub(super) fn publish_terminal(
        &self,
        id: &str,
        from: AlarmStatus,
        target: AlarmStatus,
        at: DateTime<Utc>,
    ) {
        let alarm_id = id.to_string();
        let event = match target {
            AlarmStatus::Dismissed => Event::AlarmDismissed { alarm_id, at },
            AlarmStatus::Cancelled => Event::AlarmCancelled { alarm_id, at },
            _ => Event::AlarmExpired { alarm_id, from, at },
        };
        self.events.publish(event);
    }

    /// Purge terminal alarms past retention and old puzzles.
    ///
    /// Never fails: purge errors are logged and counted as zero.
    pub fn cleanup(&self, now: DateTime<Utc>) -> CleanupReport {
        let mut gate = self.enter();
        self.flush(&mut gate);

        let alarms_purged = if gate.unflushed.is_empty() {
            self.store
                .purge_alarms(&AlarmStatus::TERMINAL, now - self.policy.alarm_retention)
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "alarm purge failed");
                    0
                })
        } else {
            0
        };
        drop(gate);

        let puzzles_purged = self
            .store
            .purge_puzzles(now - self.policy.puzzle_retention)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "puzzle purge failed");
                0
            });

        tracing::info!(alarms_purged, puzzles_purged, "cleanup finished");
        CleanupReport {
            alarms_purged,
            puzzles_purged,
        }
    }

    // ── Internal ─────────────────────────────────────────────────────

    pub(super) fn enter(&self) -> MutexGuard<'_, GateState> {
        self.gate.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub(super) fn store(&self) -> &dyn AlarmStore {
        self.store.as_ref()
    }

    /// Shared handle for side tables that do not go through the gate.
    pub(crate) fn shared_store(&self) -> Arc<dyn AlarmStore> {
        Arc::clone(&self.store)
    }

    /// Retry writes the store refused earlier.
    pub(super) fn flush(&self, gate: &mut GateState) {
        if gate.unflushed.is_empty() {
            return;
        }
        gate.unflushed.retain(|id, alarm| match self.store.put_alarm(alarm) {
            Ok(()) => {
                tracing::info!(alarm_id = %id, status = %alarm.status, "deferred transition recorded");
                false
            }
            Err(_) => true,
        });
    }

    fn load(&self, gate: &GateState, id: &str) -> Result<Option<Alarm>, DatabaseError> {
        if let Some(pending) = gate.unflushed.get(id) {
            return Ok(Some(pending.clone()));
        }
        self.store.get_alarm(id)
    }

    /// Alarms with `status`, as seen through the in-memory overlay.
    pub(super) fn with_status(
        &self,
        gate: &GateState,
        status: AlarmStatus,
    ) -> Result<Vec<Alarm>, DatabaseError> {
        let mut alarms: Vec<Alarm> = self
            .store
            .alarms_by_status(status)?
            .into_iter()
            .filter(|a| !gate.unflushed.contains_key(&a.id))
            .collect();
        alarms.extend(
            gate.unflushed
                .values()
                .filter(|a| a.status == status)
                .cloned(),
        );
        alarms.sort_by(|a, b| a.start_time.cmp(&b.start_time).then(a.id.cmp(&b.id)));
        Ok(alarms)
    }
}

fn validate_window(
    policy: &AlarmPolicy,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), AlarmError> {
    if start <= now {
        return Err(AlarmError::InvalidWindow {
            start,
            end,
            reason: "start time must be in the future",
        });
    }
    if end <= start {
        return Err(AlarmError::InvalidWindow {
            start,
            end,
            reason: "end time must be after start time",
        });
    }
    let actual = end - start;
    if actual > policy.max_duration {
        return Err(AlarmError::DurationTooLong {
            actual,
            max: policy.max_duration,
        });
    }
    if actual < policy.min_duration {
        return Err(AlarmError::DurationTooShort {
            actual,
            min: policy.min_duration,
        });
    }
    Ok(())
}
