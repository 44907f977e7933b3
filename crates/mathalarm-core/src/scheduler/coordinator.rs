//! Turns lifecycle decisions into timers.
//!
//! The coordinator keeps exactly one host wake trigger outstanding, always
//! for the earliest Scheduled alarm. When a trigger arrives it activates the
//! alarm, begins the dismissal session and arms a local deadline timer that
//! expires the alarm at its end time. A trigger that arrives after the end
//! time goes straight to expiry.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::wake::{WakeHost, WakePayload};
use crate::alarm::{Alarm, AlarmStatus, CleanupReport, LifecycleManager, RecoveryReport, Transition};
use crate::clock::{remaining_until, Clock};
use crate::error::AlarmError;
use crate::events::Event;
use crate::playback::AlertPlayer;
use crate::puzzle::PuzzleEngine;
use crate::session::{AnswerOutcome, DismissalSession, SessionSettings, SessionSnapshot};
use crate::storage::{AlarmStore, Config};

/// `kv` key holding the outstanding trigger as JSON.
pub const PENDING_WAKE_KEY: &str = "scheduler.pending_wake";

/// The trigger currently armed with the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingWake {
    pub alarm_id: String,
    pub fire_at: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// What a delivered trigger turned into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WakeOutcome {
    Activated { alarm_id: String },
    /// Delivered after the end time.
    Expired { alarm_id: String },
    /// Stale, early, or blocked trigger.
    Ignored { alarm_id: String, reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStatus {
    pub active: Option<Alarm>,
    pub pending_wake: Option<PendingWake>,
    pub session: Option<SessionSnapshot>,
}

pub struct Coordinator {
    lifecycle: Arc<LifecycleManager>,
    puzzles: Arc<PuzzleEngine>,
    player: Arc<dyn AlertPlayer>,
    host: Arc<dyn WakeHost>,
    settings: SessionSettings,
    pending: Mutex<Option<PendingWake>>,
    session: Mutex<Option<Arc<DismissalSession>>>,
    deadline: Mutex<Option<JoinHandle<()>>>,
}

impl Coordinator {
    pub fn new(
        lifecycle: Arc<LifecycleManager>,
        puzzles: Arc<PuzzleEngine>,
        player: Arc<dyn AlertPlayer>,
        host: Arc<dyn WakeHost>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            lifecycle,
            puzzles,
            player,
            host,
            settings,
            pending: Mutex::new(None),
            session: Mutex::new(None),
            deadline: Mutex::new(None),
        }
    }

    /// Wire up a lifecycle manager and puzzle engine from configuration.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn AlarmStore>,
        clock: Arc<dyn Clock>,
        player: Arc<dyn AlertPlayer>,
        host: Arc<dyn WakeHost>,
    ) -> Self {
        let lifecycle = Arc::new(LifecycleManager::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            config.policy(),
        ));
        let puzzles = Arc::new(PuzzleEngine::new(store, clock, config.puzzle_settings()));
        Self::new(lifecycle, puzzles, player, host, config.session_settings())
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    pub fn puzzles(&self) -> &Arc<PuzzleEngine> {
        &self.puzzles
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Create an alarm and make sure the right trigger is armed.
    ///
    /// A failure to re-arm is logged, not returned: the alarm exists and the
    /// next boot arms it.
    pub fn create(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        label: &str,
    ) -> Result<Alarm, AlarmError> {
        let alarm = self.lifecycle.create(start, end, label)?;
        if let Err(e) = self.arm_next() {
            tracing::warn!(alarm_id = %alarm.id, error = %e, "could not arm wake after create");
        }
        Ok(alarm)
    }

    /// Cancel a Scheduled alarm along with its pending trigger.
    pub fn cancel(&self, id: &str) -> Result<Transition, AlarmError> {
        let transition = self.lifecycle.cancel(id)?;
        self.arm_next()?;
        Ok(transition)
    }

    /// Forward an answer to the running session.
    ///
    /// # Errors
    /// `NotFound` when no session is running, otherwise whatever the
    /// session reports.
    pub fn submit_answer(&self, raw: &str) -> Result<AnswerOutcome, AlarmError> {
        let session = self.session().ok_or_else(|| AlarmError::NotFound {
            kind: "Session",
            id: "active".into(),
        })?;
        let outcome = session.submit_answer(raw)?;
        if session.ended().is_some() && self.settled(session.alarm_id()) {
            self.stop_deadline();
        }
        Ok(outcome)
    }

    pub fn cleanup(&self) -> CleanupReport {
        self.lifecycle.cleanup(self.lifecycle.now())
    }

    // ── Wake handling ────────────────────────────────────────────────

    /// Arm the host trigger for the earliest Scheduled alarm, replacing
    /// whatever was armed before. Disarms when nothing is Scheduled.
    pub fn arm_next(&self) -> Result<Option<PendingWake>, AlarmError> {
        let mut pending = lock(&self.pending);
        let wanted = self
            .lifecycle
            .next_scheduled(self.lifecycle.now())?
            .map(|a| PendingWake {
                alarm_id: a.id,
                fire_at: a.start_time,
                end_time: a.end_time,
            });
        if pending.is_some() && *pending == wanted {
            return Ok(wanted);
        }

        if let Some(old) = pending.take() {
            self.host.cancel_wake();
            tracing::info!(alarm_id = %old.alarm_id, "wake cancelled");
            self.lifecycle.events().publish(Event::WakeCancelled {
                alarm_id: old.alarm_id,
            });
        }

        if let Some(wake) = &wanted {
            self.host.schedule_wake(
                wake.fire_at,
                WakePayload {
                    alarm_id: wake.alarm_id.clone(),
                    end_time: wake.end_time,
                },
            );
            tracing::info!(alarm_id = %wake.alarm_id, fire_at = %wake.fire_at, "wake armed");
            self.lifecycle.events().publish(Event::WakeArmed {
                alarm_id: wake.alarm_id.clone(),
                fire_at: wake.fire_at,
            });
        }
        self.persist_pending(wanted.as_ref());
        *pending = wanted.clone();
        Ok(wanted)
    }

    /// Handle a delivered trigger, then re-arm for the next alarm.
    pub fn on_wake(&self, payload: WakePayload) -> Result<WakeOutcome, AlarmError> {
        {
            let mut pending = lock(&self.pending);
            if pending
                .as_ref()
                .is_some_and(|p| p.alarm_id == payload.alarm_id)
            {
                *pending = None;
            }
        }

        let outcome = self.handle_wake(&payload);
        if let Err(e) = self.arm_next() {
            tracing::warn!(error = %e, "could not re-arm after wake");
        }
        outcome
    }

    fn handle_wake(&self, payload: &WakePayload) -> Result<WakeOutcome, AlarmError> {
        let now = self.lifecycle.now();
        let alarm = self.lifecycle.get(&payload.alarm_id)?;
        let alarm_id = alarm.id.clone();

        if alarm.status == AlarmStatus::Active {
            if let Some(outcome) = self.adopt_active()? {
                return Ok(outcome);
            }
        }
        if alarm.status != AlarmStatus::Scheduled {
            tracing::info!(alarm_id = %alarm_id, status = %alarm.status, "stale wake ignored");
            return Ok(WakeOutcome::Ignored {
                alarm_id,
                reason: format!("alarm is {}", alarm.status),
            });
        }
        if alarm.end_time != payload.end_time {
            tracing::debug!(alarm_id = %alarm_id, "wake payload end time differs from record; using record");
        }

        if alarm.is_past_end(now) {
            tracing::warn!(alarm_id = %alarm_id, end = %alarm.end_time, "wake arrived after end time");
            self.lifecycle.expire(&alarm_id)?;
            return Ok(WakeOutcome::Expired { alarm_id });
        }
        if now < alarm.start_time {
            return Ok(WakeOutcome::Ignored {
                alarm_id,
                reason: "wake arrived before start time".into(),
            });
        }

        self.retire_overdue(now);
        match self.lifecycle.activate(&alarm_id)? {
            Transition::Applied { .. } => {}
            other => {
                return Ok(WakeOutcome::Ignored {
                    alarm_id,
                    reason: format!("alarm is {}", other.status()),
                })
            }
        }
        self.start_session(&alarm);
        Ok(WakeOutcome::Activated { alarm_id })
    }

    /// Expire an Active alarm whose deadline timer has not fired yet, so
    /// the Active slot is free for the next one.
    fn retire_overdue(&self, now: DateTime<Utc>) {
        let active = match self.lifecycle.active() {
            Ok(Some(active)) if active.is_past_end(now) => active,
            _ => return,
        };
        match self.session() {
            Some(session) if session.alarm_id() == active.id => session.expire(),
            _ => {
                if let Err(e) = self.lifecycle.expire(&active.id) {
                    tracing::warn!(alarm_id = %active.id, error = %e, "could not expire overdue alarm");
                }
            }
        }
    }

    /// Take over an Active alarm that no session in this process owns, such
    /// as one activated by another process. Inside its window the session is
    /// started here; past its end it is expired.
    ///
    /// Returns `None` when nothing is Active or this process already owns it.
    pub fn adopt_active(&self) -> Result<Option<WakeOutcome>, AlarmError> {
        let Some(active) = self.lifecycle.active()? else {
            return Ok(None);
        };
        let owned = lock(&self.session)
            .as_ref()
            .is_some_and(|s| s.alarm_id() == active.id);
        if owned {
            return Ok(None);
        }

        let alarm_id = active.id.clone();
        if active.is_past_end(self.lifecycle.now()) {
            tracing::warn!(alarm_id = %alarm_id, end = %active.end_time, "expiring orphaned active alarm");
            self.lifecycle.expire(&alarm_id)?;
            return Ok(Some(WakeOutcome::Expired { alarm_id }));
        }
        tracing::info!(alarm_id = %alarm_id, end = %active.end_time, "resuming dismissal session");
        self.start_session(&active);
        Ok(Some(WakeOutcome::Activated { alarm_id }))
    }

    /// Begin the dismissal session and its deadline timer.
    ///
    /// The timer outlives the session when the session ended without the
    /// terminal status reaching the store, and expires the alarm at its end.
    fn start_session(&self, alarm: &Alarm) -> Arc<DismissalSession> {
        let session = DismissalSession::begin(
            &alarm.id,
            alarm.end_time,
            Arc::clone(&self.lifecycle),
            Arc::clone(&self.puzzles),
            Arc::clone(&self.player),
            self.settings.clone(),
        );

        let delay = remaining_until(self.lifecycle.now(), alarm.end_time);
        let timer = {
            let session = Arc::clone(&session);
            let lifecycle = Arc::clone(&self.lifecycle);
            tokio::spawn(async move {
                let sleep = tokio::time::sleep(delay);
                tokio::pin!(sleep);
                let closed_early = tokio::select! {
                    _ = &mut sleep => false,
                    _ = session.closed() => true,
                };
                if closed_early {
                    if is_settled(&lifecycle, session.alarm_id()) {
                        return;
                    }
                    tracing::warn!(alarm_id = %session.alarm_id(), "session ended but alarm still open; keeping deadline");
                    sleep.await;
                }

                tracing::info!(alarm_id = %session.alarm_id(), "deadline timer fired");
                if session.ended().is_none() {
                    session.expire();
                } else if let Err(e) = lifecycle.expire(session.alarm_id()) {
                    tracing::warn!(alarm_id = %session.alarm_id(), error = %e, "deadline expiry failed");
                }
            })
        };

        if let Some(old) = lock(&self.deadline).replace(timer) {
            old.abort();
        }
        *lock(&self.session) = Some(Arc::clone(&session));
        session
    }

    fn settled(&self, alarm_id: &str) -> bool {
        is_settled(&self.lifecycle, alarm_id)
    }

    fn stop_deadline(&self) {
        if let Some(timer) = lock(&self.deadline).take() {
            timer.abort();
        }
    }

    // ── Process lifetime ─────────────────────────────────────────────

    /// Start-of-process sequence: recover, resume a session for an alarm
    /// that is still Active, arm the next trigger.
    ///
    /// Must be called inside a tokio runtime.
    pub fn boot(&self) -> Result<RecoveryReport, AlarmError> {
        let previous = self.persisted_pending();
        let report = self.lifecycle.recover_state(self.lifecycle.now())?;
        self.adopt_active()?;

        let armed = self.arm_next()?;
        if let Some(prev) = previous {
            if armed.as_ref().map(|w| &w.alarm_id) != Some(&prev.alarm_id) {
                tracing::info!(alarm_id = %prev.alarm_id, "persisted wake superseded at boot");
            }
        }
        Ok(report)
    }

    /// Deliver triggers until the host side of the channel closes.
    pub async fn run(self: Arc<Self>, mut wakes: mpsc::UnboundedReceiver<WakePayload>) {
        while let Some(payload) = wakes.recv().await {
            let alarm_id = payload.alarm_id.clone();
            match self.on_wake(payload) {
                Ok(outcome) => tracing::info!(alarm_id = %alarm_id, ?outcome, "wake handled"),
                Err(e) => tracing::warn!(alarm_id = %alarm_id, error = %e, "wake failed"),
            }
        }
        tracing::debug!("wake channel closed");
    }

    /// Drop timers owned by this process. The persisted trigger stays so
    /// the next boot re-arms it.
    pub fn shutdown(&self) {
        self.stop_deadline();
        self.host.cancel_wake();
        lock(&self.pending).take();
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// The running session, if one has not ended.
    pub fn session(&self) -> Option<Arc<DismissalSession>> {
        lock(&self.session)
            .as_ref()
            .filter(|s| s.ended().is_none())
            .cloned()
    }

    /// The armed trigger, falling back to what a previous process recorded.
    pub fn pending_wake(&self) -> Option<PendingWake> {
        lock(&self.pending)
            .clone()
            .or_else(|| self.persisted_pending())
    }

    pub fn status(&self) -> Result<CoordinatorStatus, AlarmError> {
        Ok(CoordinatorStatus {
            active: self.lifecycle.active()?,
            pending_wake: self.pending_wake(),
            session: self.session().map(|s| s.snapshot()),
        })
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn persisted_pending(&self) -> Option<PendingWake> {
        let raw = match self.lifecycle.shared_store().kv_get(PENDING_WAKE_KEY) {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(error = %e, "could not read pending wake");
                return None;
            }
        };
        serde_json::from_str(&raw)
            .inspect_err(|e| tracing::warn!(error = %e, "discarding unreadable pending wake"))
            .ok()
    }

    fn persist_pending(&self, wake: Option<&PendingWake>) {
        let store = self.lifecycle.shared_store();
        let result = match wake {
            Some(wake) => match serde_json::to_string(wake) {
                Ok(json) => store.kv_set(PENDING_WAKE_KEY, &json),
                Err(e) => {
                    tracing::warn!(error = %e, "could not encode pending wake");
                    return;
                }
            },
            None => store.kv_delete(PENDING_WAKE_KEY),
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "could not record pending wake");
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.stop_deadline();
    }
}

/// The alarm's terminal status is visible to reads (stored or held in memory).
fn is_settled(lifecycle: &LifecycleManager, alarm_id: &str) -> bool {
    lifecycle
        .get(alarm_id)
        .is_ok_and(|alarm| alarm.status.is_terminal())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}
