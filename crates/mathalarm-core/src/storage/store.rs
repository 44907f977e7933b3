//! The durable record store contract.
//!
//! The lifecycle manager and puzzle engine talk to storage only through
//! [`AlarmStore`]. [`Database`](super::Database) is the SQLite
//! implementation; anything else that survives a process restart will do.

use chrono::{DateTime, Utc};

use crate::alarm::{Alarm, AlarmStatus};
use crate::error::DatabaseError;
use crate::puzzle::Puzzle;

pub type StoreResult<T> = Result<T, DatabaseError>;

pub trait AlarmStore: Send + Sync {
    /// Insert or replace an alarm record.
    fn put_alarm(&self, alarm: &Alarm) -> StoreResult<()>;

    fn get_alarm(&self, id: &str) -> StoreResult<Option<Alarm>>;

    /// Alarms with `status`, ordered by start time.
    fn alarms_by_status(&self, status: AlarmStatus) -> StoreResult<Vec<Alarm>>;

    /// Every alarm, ordered by start time.
    fn list_alarms(&self) -> StoreResult<Vec<Alarm>>;

    fn delete_alarm(&self, id: &str) -> StoreResult<bool>;

    /// Delete alarms in any of `statuses` last updated before `older_than`.
    fn purge_alarms(&self, statuses: &[AlarmStatus], older_than: DateTime<Utc>)
        -> StoreResult<usize>;

    fn put_puzzle(&self, puzzle: &Puzzle) -> StoreResult<()>;

    fn get_puzzle(&self, id: &str) -> StoreResult<Option<Puzzle>>;

    /// Atomically bump the attempt counter and return the updated record.
    fn record_attempt(&self, id: &str) -> StoreResult<Option<Puzzle>>;

    fn delete_puzzle(&self, id: &str) -> StoreResult<bool>;

    /// Delete puzzles generated before `older_than`.
    fn purge_puzzles(&self, older_than: DateTime<Utc>) -> StoreResult<usize>;

    fn kv_get(&self, key: &str) -> StoreResult<Option<String>>;

    fn kv_set(&self, key: &str, value: &str) -> StoreResult<()>;

    fn kv_delete(&self, key: &str) -> StoreResult<()>;
}
