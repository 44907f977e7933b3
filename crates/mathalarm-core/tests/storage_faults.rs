//! Lifecycle behavior when the store misbehaves.
//!
//! Creation must surface storage failures. Dismiss and expire must not: the
//! alert has to stop regardless, and the write is retried later.
//! Timers keep running until the terminal status is actually visible.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};

use mathalarm_core::clock::{from_epoch_ms, AnchoredClock, ManualClock};
use mathalarm_core::error::DatabaseError;
use mathalarm_core::storage::StoreResult;
use mathalarm_core::{
    Alarm, AlarmError, AlarmPolicy, AlarmStatus, AlarmStore, AnswerOutcome, Clock, Coordinator,
    Database, DismissalSession, LifecycleManager, Puzzle, PuzzleEngine, PuzzleSettings,
    SessionSettings, TracingPlayer, Transition, WakeHost, WakePayload, WakeOutcome,
};

/// Wraps a real database. Refuses writes while `failing` is set and alarm
/// reads while `failing_reads` is set.
struct FlakyStore {
    inner: Database,
    failing: AtomicBool,
    failing_reads: AtomicBool,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: Database::open_memory().unwrap(),
            failing: AtomicBool::new(false),
            failing_reads: AtomicBool::new(false),
        }
    }

    fn fail_reads(&self, on: bool) {
        self.failing_reads.store(on, Ordering::SeqCst);
    }

    fn fail(&self, on: bool) {
        self.failing.store(on, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(DatabaseError::Locked)
        } else {
            Ok(())
        }
    }
}

impl AlarmStore for FlakyStore {
    fn put_alarm(&self, alarm: &Alarm) -> StoreResult<()> {
        self.check()?;
        self.inner.put_alarm(alarm)
    }

    fn get_alarm(&self, id: &str) -> StoreResult<Option<Alarm>> {
        if self.failing_reads.load(Ordering::SeqCst) {
            return Err(DatabaseError::Locked);
        }
        self.inner.get_alarm(id)
    }

    fn alarms_by_status(&self, status: AlarmStatus) -> StoreResult<Vec<Alarm>> {
        self.inner.alarms_by_status(status)
    }

    fn list_alarms(&self) -> StoreResult<Vec<Alarm>> {
        self.inner.list_alarms()
    }

    fn delete_alarm(&self, id: &str) -> StoreResult<bool> {
        self.check()?;
        self.inner.delete_alarm(id)
    }

    fn purge_alarms(
        &self,
        statuses: &[AlarmStatus],
        older_than: DateTime<Utc>,
    ) -> StoreResult<usize> {
        self.check()?;
        self.inner.purge_alarms(statuses, older_than)
    }

    fn put_puzzle(&self, puzzle: &Puzzle) -> StoreResult<()> {
        self.check()?;
        self.inner.put_puzzle(puzzle)
    }

    fn get_puzzle(&self, id: &str) -> StoreResult<Option<Puzzle>> {
        self.inner.get_puzzle(id)
    }

    fn record_attempt(&self, id: &str) -> StoreResult<Option<Puzzle>> {
        self.check()?;
        self.inner.record_attempt(id)
    }

    fn delete_puzzle(&self, id: &str) -> StoreResult<bool> {
        self.check()?;
        self.inner.delete_puzzle(id)
    }

    fn purge_puzzles(&self, older_than: DateTime<Utc>) -> StoreResult<usize> {
        self.check()?;
        self.inner.purge_puzzles(older_than)
    }

    fn kv_get(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.kv_get(key)
    }

    fn kv_set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.check()?;
        self.inner.kv_set(key, value)
    }

    fn kv_delete(&self, key: &str) -> StoreResult<()> {
        self.check()?;
        self.inner.kv_delete(key)
    }
}

fn setup() -> (LifecycleManager, Arc<FlakyStore>, ManualClock) {
    let clock = ManualClock::new(from_epoch_ms(1_700_000_000_000));
    let store = Arc::new(FlakyStore::new());
    let lifecycle = LifecycleManager::new(store.clone(), Arc::new(clock.clone()), AlarmPolicy::debug());
    (lifecycle, store, clock)
}

fn active_alarm(lifecycle: &LifecycleManager, clock: &ManualClock) -> Alarm {
    let now = lifecycle.now();
    let alarm = lifecycle
        .create(now + Duration::seconds(5), now + Duration::seconds(15), "")
        .unwrap();
    clock.advance(Duration::seconds(5));
    lifecycle.activate(&alarm.id).unwrap();
    alarm
}

#[test]
fn test_create_propagates_storage_failure() {
    let (lifecycle, store, _) = setup();
    store.fail(true);
    let now = lifecycle.now();
    let err = lifecycle
        .create(now + Duration::seconds(5), now + Duration::seconds(15), "")
        .unwrap_err();
    assert!(matches!(err, AlarmError::StorageFailure(_)));

    store.fail(false);
    assert!(lifecycle.list().unwrap().is_empty());
}

#[test]
fn test_activate_failure_leaves_alarm_scheduled() {
    let (lifecycle, store, clock) = setup();
    let now = lifecycle.now();
    let alarm = lifecycle
        .create(now + Duration::seconds(5), now + Duration::seconds(15), "")
        .unwrap();
    clock.advance(Duration::seconds(5));

    store.fail(true);
    assert!(matches!(
        lifecycle.activate(&alarm.id),
        Err(AlarmError::StorageFailure(_))
    ));
    assert_eq!(lifecycle.get(&alarm.id).unwrap().status, AlarmStatus::Scheduled);
}

#[test]
fn test_dismiss_swallows_failure_and_flushes_later() {
    let (lifecycle, store, clock) = setup();
    let alarm = active_alarm(&lifecycle, &clock);

    store.fail(true);
    let transition = lifecycle.dismiss(&alarm.id).unwrap();
    assert!(matches!(
        transition,
        Transition::Unrecorded {
            to: AlarmStatus::Dismissed,
            ..
        }
    ));
    assert_eq!(transition.status(), AlarmStatus::Dismissed);

    // Reads see the new status even though the record is stale.
    assert_eq!(lifecycle.get(&alarm.id).unwrap().status, AlarmStatus::Dismissed);
    assert!(lifecycle.active().unwrap().is_none());
    assert_eq!(
        store.inner.get_alarm(&alarm.id).unwrap().unwrap().status,
        AlarmStatus::Active
    );

    // A racing expire loses.
    assert_eq!(
        lifecycle.expire(&alarm.id).unwrap(),
        Transition::NoOp {
            status: AlarmStatus::Dismissed
        }
    );

    store.fail(false);
    lifecycle.cleanup(lifecycle.now());
    assert_eq!(
        store.inner.get_alarm(&alarm.id).unwrap().unwrap().status,
        AlarmStatus::Dismissed
    );
}

#[test]
fn test_expire_swallows_failure() {
    let (lifecycle, store, clock) = setup();
    let alarm = active_alarm(&lifecycle, &clock);
    clock.advance(Duration::seconds(10));

    store.fail(true);
    let transition = lifecycle.expire(&alarm.id).unwrap();
    assert_eq!(transition.status(), AlarmStatus::Expired);
    assert!(lifecycle.by_status(AlarmStatus::Active).unwrap().is_empty());

    // The freed slot is usable while the write is still pending.
    store.fail(false);
    let now = lifecycle.now();
    assert!(lifecycle
        .can_create(now + Duration::seconds(5), now + Duration::seconds(15))
        .unwrap());
}

#[test]
fn test_recovery_reports_unrecorded_expiry() {
    let (lifecycle, store, clock) = setup();
    let alarm = active_alarm(&lifecycle, &clock);
    clock.advance(Duration::seconds(30));

    store.fail(true);
    let report = lifecycle.recover_state(lifecycle.now()).unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(lifecycle.get(&alarm.id).unwrap().status, AlarmStatus::Expired);
}

#[test]
fn test_cleanup_never_fails() {
    let (lifecycle, store, _) = setup();
    store.fail(true);
    let report = lifecycle.cleanup(lifecycle.now());
    assert_eq!(report.alarms_purged, 0);
    assert_eq!(report.puzzles_purged, 0);
}

#[test]
fn test_puzzle_generation_requires_a_write() {
    let clock = ManualClock::new(from_epoch_ms(1_700_000_000_000));
    let store = Arc::new(FlakyStore::new());
    let engine = PuzzleEngine::new(store.clone(), Arc::new(clock), PuzzleSettings::default());

    store.fail(true);
    assert!(matches!(
        engine.generate(),
        Err(AlarmError::StorageFailure(_))
    ));
}

// ============================================================================
// Timed paths
// ============================================================================

struct IdleHost;

impl WakeHost for IdleHost {
    fn schedule_wake(&self, _at: DateTime<Utc>, _payload: WakePayload) {}
    fn cancel_wake(&self) {}
}

fn timed_stack() -> (Arc<FlakyStore>, Arc<LifecycleManager>, Arc<PuzzleEngine>) {
    let clock: Arc<dyn Clock> = Arc::new(AnchoredClock::new(from_epoch_ms(1_700_000_000_000)));
    let store = Arc::new(FlakyStore::new());
    let lifecycle = Arc::new(LifecycleManager::new(
        store.clone(),
        Arc::clone(&clock),
        AlarmPolicy::debug(),
    ));
    let puzzles = Arc::new(PuzzleEngine::new(
        store.clone(),
        clock,
        PuzzleSettings::default(),
    ));
    (store, lifecycle, puzzles)
}

#[tokio::test(start_paused = true)]
async fn test_unreadable_dismiss_keeps_deadline_armed() {
    let (store, lifecycle, puzzles) = timed_stack();
    let coordinator = Coordinator::new(
        Arc::clone(&lifecycle),
        Arc::clone(&puzzles),
        Arc::new(TracingPlayer),
        Arc::new(IdleHost),
        SessionSettings::default(),
    );
    let now = lifecycle.now();
    let alarm = coordinator
        .create(now + Duration::seconds(5), now + Duration::seconds(15), "")
        .unwrap();
    tokio::time::sleep(StdDuration::from_secs(5)).await;
    let outcome = coordinator
        .on_wake(WakePayload {
            alarm_id: alarm.id.clone(),
            end_time: alarm.end_time,
        })
        .unwrap();
    assert!(matches!(outcome, WakeOutcome::Activated { .. }));

    let view = coordinator.session().unwrap().current_puzzle().unwrap();
    let answer = puzzles.get(&view.id).unwrap().correct_answer;

    store.fail_reads(true);
    assert_eq!(
        coordinator.submit_answer(&answer.to_string()).unwrap(),
        AnswerOutcome::Dismissed { attempts: 0 }
    );
    store.fail_reads(false);
    assert_eq!(
        store.inner.get_alarm(&alarm.id).unwrap().unwrap().status,
        AlarmStatus::Active
    );

    // The deadline still closes the record.
    tokio::time::sleep(StdDuration::from_secs(11)).await;
    assert_eq!(
        store.inner.get_alarm(&alarm.id).unwrap().unwrap().status,
        AlarmStatus::Expired
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_first_puzzle_is_retried() {
    let (store, lifecycle, puzzles) = timed_stack();
    let now = lifecycle.now();
    let alarm = lifecycle
        .create(now + Duration::seconds(5), now + Duration::seconds(15), "")
        .unwrap();
    tokio::time::sleep(StdDuration::from_secs(5)).await;
    lifecycle.activate(&alarm.id).unwrap();

    store.fail(true);
    let session = DismissalSession::begin(
        &alarm.id,
        alarm.end_time,
        Arc::clone(&lifecycle),
        puzzles,
        Arc::new(TracingPlayer),
        SessionSettings::default(),
    );
    assert!(session.current_puzzle().is_none());

    store.fail(false);
    tokio::time::sleep(StdDuration::from_millis(1_500)).await;
    assert!(session.current_puzzle().is_some());
    assert!(session.ended().is_none());
}
