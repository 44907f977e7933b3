//! Dismissal session controller.
//!
//! A headless object driving one Active alarm from the first puzzle to the
//! end of the alert:
//!
//! ```text
//! begin -> (submit_answer)* -> ended(Dismissed | Expired)
//! ```
//!
//! A once-per-interval countdown re-checks the deadline on its own, so a
//! puzzle is never on screen past the end of the window even if the
//! scheduler's deadline timer runs late. Ending is idempotent and stops
//! playback exactly once.

mod input;

pub use input::{parse_answer, AnswerInput};

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::alarm::{AlarmStatus, LifecycleManager, Transition};
use crate::clock::remaining_until;
use crate::error::AlarmError;
use crate::events::{Event, SessionEndReason};
use crate::playback::AlertPlayer;
use crate::puzzle::{Puzzle, PuzzleEngine, PuzzleView};

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub input_max_len: usize,
    pub tick_interval: std::time::Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            input_max_len: 10,
            tick_interval: std::time::Duration::from_secs(1),
        }
    }
}

/// Result of a submitted answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AnswerOutcome {
    /// Correct; the alarm is dismissed and the alert stopped.
    Dismissed { attempts: u32 },
    /// Wrong; here is a brand-new puzzle.
    Incorrect { attempts: u32, next: PuzzleView },
    /// The session had already ended.
    Closed { reason: SessionEndReason },
}

/// Render-ready view of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub alarm_id: String,
    pub puzzle: Option<PuzzleView>,
    pub attempts: u32,
    pub remaining_secs: u64,
    pub input: String,
    pub ended: Option<SessionEndReason>,
}

struct SessionState {
    puzzle: Option<Puzzle>,
    attempts: u32,
    input: AnswerInput,
    ended: Option<SessionEndReason>,
}

pub struct DismissalSession {
    alarm_id: String,
    end_time: DateTime<Utc>,
    lifecycle: Arc<LifecycleManager>,
    puzzles: Arc<PuzzleEngine>,
    player: Arc<dyn AlertPlayer>,
    settings: SessionSettings,
    state: Mutex<SessionState>,
    shutdown: watch::Sender<bool>,
}

impl DismissalSession {
    /// Start the alert, issue the first puzzle and start the countdown.
    ///
    /// If the deadline has already passed the alarm is expired instead and
    /// the returned session is already ended; no puzzle is issued.
    ///
    /// Must be called inside a tokio runtime.
    pub fn begin(
        alarm_id: &str,
        end_time: DateTime<Utc>,
        lifecycle: Arc<LifecycleManager>,
        puzzles: Arc<PuzzleEngine>,
        player: Arc<dyn AlertPlayer>,
        settings: SessionSettings,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        let session = Arc::new(Self {
            alarm_id: alarm_id.to_string(),
            end_time,
            lifecycle,
            puzzles,
            player,
            state: Mutex::new(SessionState {
                puzzle: None,
                attempts: 0,
                input: AnswerInput::new(settings.input_max_len),
                ended: None,
            }),
            settings,
            shutdown,
        });

        if session.past_deadline() {
            session.expire();
            return session;
        }

        session.player.start_alert();
        tracing::info!(alarm_id, end = %end_time, "dismissal session started");

        if session.issue_puzzle(&mut session.lock()).is_err() {
            tracing::info!(alarm_id, "retrying first puzzle on the next tick");
        }

        tokio::spawn(Arc::clone(&session).countdown());
        session
    }

    pub fn alarm_id(&self) -> &str {
        &self.alarm_id
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    pub fn ended(&self) -> Option<SessionEndReason> {
        self.lock().ended
    }

    pub fn remaining_secs(&self) -> u64 {
        let remaining = remaining_until(self.lifecycle.now(), self.end_time);
        remaining.as_millis().div_ceil(1000) as u64
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.lock();
        SessionSnapshot {
            alarm_id: self.alarm_id.clone(),
            puzzle: state.puzzle.as_ref().map(Puzzle::view),
            attempts: state.attempts,
            remaining_secs: self.remaining_secs(),
            input: state.input.as_str().to_string(),
            ended: state.ended,
        }
    }

    /// The puzzle currently on screen.
    pub fn current_puzzle(&self) -> Option<PuzzleView> {
        self.lock().puzzle.as_ref().map(Puzzle::view)
    }

    // ── Input editing ────────────────────────────────────────────────

    pub fn push_digit(&self, digit: char) -> bool {
        self.lock().input.push_digit(digit)
    }

    pub fn push_minus(&self) -> bool {
        self.lock().input.push_minus()
    }

    pub fn backspace(&self) -> Option<char> {
        self.lock().input.backspace()
    }

    /// Submit whatever is in the entry buffer.
    pub fn submit_input(&self) -> Result<AnswerOutcome, AlarmError> {
        let raw = self.lock().input.take();
        self.submit_answer(&raw)
    }

    // ── Answering ────────────────────────────────────────────────────

    /// Check an answer against the current puzzle.
    ///
    /// # Errors
    /// `EmptyInput` / `NotANumber` for unusable input (no attempt is
    /// counted), or a puzzle engine failure.
    pub fn submit_answer(&self, raw: &str) -> Result<AnswerOutcome, AlarmError> {
        if let Some(reason) = self.ended() {
            return Ok(AnswerOutcome::Closed { reason });
        }
        if self.past_deadline() {
            self.expire();
            return Ok(AnswerOutcome::Closed {
                reason: SessionEndReason::Expired,
            });
        }

        let answer = parse_answer(raw, self.settings.input_max_len)?;

        let mut state = self.lock();
        if let Some(reason) = state.ended {
            return Ok(AnswerOutcome::Closed { reason });
        }
        let current = state.puzzle.as_ref().map(|p| p.id.clone());
        let puzzle_id = match current {
            Some(id) => id,
            None => {
                // Nothing was on screen to answer. Put a puzzle up and report it.
                let next = self.issue_puzzle(&mut state)?;
                return Err(AlarmError::puzzle_not_found(&format!("(none; issued {})", next.id)));
            }
        };

        if self.puzzles.validate(&puzzle_id, answer)? {
            let attempts = state.attempts;
            drop(state);
            return Ok(self.on_solved(attempts));
        }

        state.attempts += 1;
        let attempts = state.attempts;
        self.lifecycle.events().publish(Event::AnswerRejected {
            alarm_id: self.alarm_id.clone(),
            attempts,
        });
        tracing::info!(alarm_id = %self.alarm_id, attempts, "incorrect answer");

        // The old puzzle is never shown again.
        state.puzzle = None;
        let next = self.issue_puzzle(&mut state)?;
        Ok(AnswerOutcome::Incorrect { attempts, next })
    }

    fn on_solved(&self, attempts: u32) -> AnswerOutcome {
        let reason = match self.lifecycle.dismiss(&self.alarm_id) {
            Ok(Transition::NoOp {
                status: AlarmStatus::Expired,
            }) => SessionEndReason::Expired,
            Ok(_) => SessionEndReason::Dismissed,
            Err(e) => {
                // Silence wins over bookkeeping.
                tracing::warn!(alarm_id = %self.alarm_id, error = %e, "dismiss not recorded");
                SessionEndReason::Dismissed
            }
        };
        self.finish(reason);
        match reason {
            SessionEndReason::Dismissed => AnswerOutcome::Dismissed { attempts },
            SessionEndReason::Expired => AnswerOutcome::Closed { reason },
        }
    }

    // ── Ending ───────────────────────────────────────────────────────

    /// Expire the alarm and end the session. Safe to call any number of times.
    pub fn expire(&self) {
        if self.ended().is_some() {
            return;
        }
        match self.lifecycle.expire(&self.alarm_id) {
            Ok(Transition::NoOp {
                status: AlarmStatus::Dismissed,
            }) => {
                self.finish(SessionEndReason::Dismissed);
                return;
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(alarm_id = %self.alarm_id, error = %e, "expire not recorded"),
        }
        self.finish(SessionEndReason::Expired);
    }

    /// Resolves once the session has ended.
    pub async fn closed(&self) {
        let mut rx = self.shutdown.subscribe();
        let _ = rx.wait_for(|ended| *ended).await;
    }

    /// End the session. Only the first call stops playback.
    fn finish(&self, reason: SessionEndReason) -> bool {
        {
            let mut state = self.lock();
            if state.ended.is_some() {
                return false;
            }
            state.ended = Some(reason);
            state.puzzle = None;
            state.input.clear();
        }

        self.shutdown.send_replace(true);
        self.player.stop_alert();
        tracing::info!(alarm_id = %self.alarm_id, reason = ?reason, "dismissal session ended");
        self.lifecycle.events().publish(Event::SessionEnded {
            alarm_id: self.alarm_id.clone(),
            reason,
            at: self.lifecycle.now(),
        });
        true
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn past_deadline(&self) -> bool {
        self.lifecycle.now() >= self.end_time
    }

    fn issue_puzzle(&self, state: &mut SessionState) -> Result<PuzzleView, AlarmError> {
        let puzzle = self.puzzles.generate().inspect_err(|e| {
            tracing::warn!(alarm_id = %self.alarm_id, error = %e, "puzzle generation failed");
        })?;
        let view = puzzle.view();
        state.puzzle = Some(puzzle);
        self.lifecycle.events().publish(Event::PuzzleIssued {
            alarm_id: self.alarm_id.clone(),
            puzzle: view.clone(),
            remaining_secs: self.remaining_secs(),
        });
        Ok(view)
    }

    /// Put a puzzle on screen if an earlier generation failed.
    fn ensure_puzzle(&self) {
        let mut state = self.lock();
        if state.ended.is_none() && state.puzzle.is_none() {
            // Failure is logged by issue_puzzle; the next tick tries again.
            let _ = self.issue_puzzle(&mut state);
        }
    }

    async fn countdown(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = tokio::time::interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.ended().is_some() {
                        break;
                    }
                    if self.past_deadline() {
                        tracing::info!(alarm_id = %self.alarm_id, "countdown reached deadline");
                        self.expire();
                        break;
                    }
                    self.ensure_puzzle();
                    self.lifecycle.events().publish(Event::CountdownTick {
                        alarm_id: self.alarm_id.clone(),
                        remaining_secs: self.remaining_secs(),
                    });
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    use chrono::Duration;

    use super::*;
    use crate::alarm::{Alarm, AlarmPolicy};
    use crate::clock::{from_epoch_ms, AnchoredClock, Clock};
    use crate::puzzle::PuzzleSettings;
    use crate::storage::{AlarmStore, Database};

    #[derive(Default)]
    struct CountingPlayer {
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    impl AlertPlayer for CountingPlayer {
        fn start_alert(&self) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }
        fn stop_alert(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        lifecycle: Arc<LifecycleManager>,
        puzzles: Arc<PuzzleEngine>,
        player: Arc<CountingPlayer>,
        alarm: Alarm,
    }

    impl Fixture {
        fn begin(&self) -> Arc<DismissalSession> {
            DismissalSession::begin(
                &self.alarm.id,
                self.alarm.end_time,
                Arc::clone(&self.lifecycle),
                Arc::clone(&self.puzzles),
                self.player.clone(),
                SessionSettings::default(),
            )
        }

        fn stops(&self) -> usize {
            self.player.stops.load(Ordering::SeqCst)
        }

        fn status(&self) -> AlarmStatus {
            self.lifecycle.get(&self.alarm.id).unwrap().status
        }
    }

    /// Alarm window [T+5s, T+15s), already activated at T+5s.
    async fn active_fixture() -> Fixture {
        let clock: Arc<dyn Clock> = Arc::new(AnchoredClock::new(from_epoch_ms(1_700_000_000_000)));
        let store: Arc<dyn AlarmStore> = Arc::new(Database::open_memory().unwrap());
        let lifecycle = Arc::new(LifecycleManager::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            AlarmPolicy::debug(),
        ));
        let puzzles = Arc::new(PuzzleEngine::new(store, clock, PuzzleSettings::default()));
        let now = lifecycle.now();
        let alarm = lifecycle
            .create(now + Duration::seconds(5), now + Duration::seconds(15), "test")
            .unwrap();
        tokio::time::sleep(StdDuration::from_secs(5)).await;
        lifecycle.activate(&alarm.id).unwrap();
        Fixture {
            lifecycle,
            puzzles,
            player: Arc::new(CountingPlayer::default()),
            alarm,
        }
    }

    fn answer_for(f: &Fixture, session: &DismissalSession) -> i64 {
        let view = session.current_puzzle().unwrap();
        f.puzzles.get(&view.id).unwrap().correct_answer
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_then_right_dismisses() {
        let f = active_fixture().await;
        let session = f.begin();
        assert_eq!(f.player.starts.load(Ordering::SeqCst), 1);
        let first = session.current_puzzle().unwrap();

        let wrong = answer_for(&f, &session) + 1;
        match session.submit_answer(&wrong.to_string()).unwrap() {
            AnswerOutcome::Incorrect { attempts, next } => {
                assert_eq!(attempts, 1);
                assert_ne!(next.id, first.id);
            }
            other => panic!("expected Incorrect, got {other:?}"),
        }
        assert_eq!(f.status(), AlarmStatus::Active);

        let right = answer_for(&f, &session);
        assert_eq!(
            session.submit_answer(&right.to_string()).unwrap(),
            AnswerOutcome::Dismissed { attempts: 1 }
        );
        assert_eq!(f.status(), AlarmStatus::Dismissed);
        assert_eq!(session.ended(), Some(SessionEndReason::Dismissed));
        assert_eq!(f.stops(), 1);
        assert!(session.current_puzzle().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn bad_input_counts_no_attempt() {
        let f = active_fixture().await;
        let session = f.begin();
        let id = session.current_puzzle().unwrap().id;

        assert!(matches!(session.submit_answer("  "), Err(AlarmError::EmptyInput)));
        assert!(matches!(session.submit_answer("abc"), Err(AlarmError::NotANumber(_))));
        assert_eq!(f.puzzles.get(&id).unwrap().attempts, 0);
        assert_eq!(session.current_puzzle().unwrap().id, id);
    }

    #[tokio::test(start_paused = true)]
    async fn buffered_input_submits() {
        let f = active_fixture().await;
        let session = f.begin();
        for c in answer_for(&f, &session).to_string().chars() {
            let pushed = if c == '-' {
                session.push_minus()
            } else {
                session.push_digit(c)
            };
            assert!(pushed);
        }
        session.push_digit('9');
        assert_eq!(session.backspace(), Some('9'));
        assert!(matches!(
            session.submit_input().unwrap(),
            AnswerOutcome::Dismissed { attempts: 0 }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_expires_at_deadline() {
        let f = active_fixture().await;
        let mut events = f.lifecycle.events().subscribe();
        let session = f.begin();

        tokio::time::sleep(StdDuration::from_secs(11)).await;
        assert_eq!(session.ended(), Some(SessionEndReason::Expired));
        assert_eq!(f.status(), AlarmStatus::Expired);
        assert_eq!(f.stops(), 1);
        assert_eq!(
            session.submit_answer("1").unwrap(),
            AnswerOutcome::Closed {
                reason: SessionEndReason::Expired
            }
        );

        let mut issued = 0;
        let mut ticks = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                Event::PuzzleIssued { .. } => issued += 1,
                Event::CountdownTick { .. } => ticks += 1,
                _ => {}
            }
        }
        assert_eq!(issued, 1);
        assert!(ticks >= 9);
    }

    #[tokio::test(start_paused = true)]
    async fn begin_after_deadline_expires_without_puzzle() {
        let f = active_fixture().await;
        tokio::time::sleep(StdDuration::from_secs(20)).await;
        let session = f.begin();
        assert_eq!(session.ended(), Some(SessionEndReason::Expired));
        assert!(session.current_puzzle().is_none());
        assert_eq!(f.player.starts.load(Ordering::SeqCst), 0);
        assert_eq!(f.stops(), 1);
        assert_eq!(f.status(), AlarmStatus::Expired);
    }

    #[tokio::test(start_paused = true)]
    async fn ending_twice_stops_once() {
        let f = active_fixture().await;
        let session = f.begin();
        session.expire();
        session.expire();
        let right = 0;
        let _ = session.submit_answer(&right.to_string());
        assert_eq!(f.stops(), 1);
        session.closed().await;
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_secs_rounds_up() {
        let f = active_fixture().await;
        let session = f.begin();
        assert_eq!(session.remaining_secs(), 10);
        tokio::time::sleep(StdDuration::from_millis(9_500)).await;
        assert_eq!(session.remaining_secs(), 1);
        assert_eq!(session.snapshot().remaining_secs, 1);
    }
}
