//! SQLite-based alarm and puzzle storage.
//!
//! Provides persistent storage for:
//! - Alarm records, indexed by status and start time
//! - Puzzle records, with an atomic attempt counter
//! - Key-value store for coordinator state (the pending wake trigger)

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::data_dir;
use super::migrations;
use super::store::{AlarmStore, StoreResult};
use crate::alarm::{Alarm, AlarmStatus};
use crate::clock::from_epoch_ms;
use crate::error::DatabaseError;
use crate::puzzle::{Operation, Puzzle};

const ALARM_COLUMNS: &str = "id, start_ms, end_ms, status, label, created_ms, updated_ms";
const PUZZLE_COLUMNS: &str =
    "id, operand1, operand2, operation, correct, generated_ms, attempts, max_attempts";

/// Build an Alarm from a database row selected with `ALARM_COLUMNS`.
fn row_to_alarm(row: &rusqlite::Row) -> Result<Alarm, rusqlite::Error> {
    let status_str: String = row.get(3)?;
    let status = AlarmStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown alarm status '{status_str}'").into(),
        )
    })?;

    Ok(Alarm {
        id: row.get(0)?,
        start_time: from_epoch_ms(row.get(1)?),
        end_time: from_epoch_ms(row.get(2)?),
        status,
        label: row.get(4)?,
        created_at: from_epoch_ms(row.get(5)?),
        updated_at: from_epoch_ms(row.get(6)?),
    })
}

/// Build a Puzzle from a database row selected with `PUZZLE_COLUMNS`.
fn row_to_puzzle(row: &rusqlite::Row) -> Result<Puzzle, rusqlite::Error> {
    let op_str: String = row.get(3)?;
    let operation = Operation::parse(&op_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown operation '{op_str}'").into(),
        )
    })?;

    Ok(Puzzle {
        id: row.get(0)?,
        operand1: row.get(1)?,
        operand2: row.get(2)?,
        operation,
        correct_answer: row.get(4)?,
        generated_at: from_epoch_ms(row.get(5)?),
        attempts: row.get(6)?,
        max_attempts: row.get(7)?,
    })
}

/// SQLite database for alarm storage.
///
/// The connection sits behind a mutex so one `Database` can be shared
/// across the scheduler, session and CLI through an `Arc`.
pub struct Database {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Database {
    /// Open the database at `~/.config/mathalarm/mathalarm.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the data directory, the file or the migration fails.
    pub fn open() -> Result<Self, DatabaseError> {
        let dir = data_dir().map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        Self::open_at(dir.join("mathalarm.db"))
    }

    /// Open (or create) the database at an explicit path.
    pub fn open_at(path: impl AsRef<Path>) -> Result<Self, DatabaseError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path).map_err(|source| DatabaseError::OpenFailed {
            path: path.clone(),
            source,
        })?;
        let db = Self {
            conn: Mutex::new(conn),
            path: Some(path),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database (tests and dry runs).
    pub fn open_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
            path: None,
        };
        db.migrate()?;
        Ok(db)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn migrate(&self) -> Result<(), DatabaseError> {
        let conn = self.lock()?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        migrations::migrate(&conn).map_err(|e| DatabaseError::MigrationFailed(e.to_string()))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DatabaseError> {
        self.conn.lock().map_err(|_| DatabaseError::Locked)
    }

    fn query_alarms(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> StoreResult<Vec<Alarm>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, row_to_alarm)?;
        let mut alarms = Vec::new();
        for row in rows {
            alarms.push(row?);
        }
        Ok(alarms)
    }
}

impl AlarmStore for Database {
    fn put_alarm(&self, alarm: &Alarm) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO alarms (id, start_ms, end_ms, status, label, created_ms, updated_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                alarm.id,
                alarm.start_time.timestamp_millis(),
                alarm.end_time.timestamp_millis(),
                alarm.status.as_str(),
                alarm.label,
                alarm.created_at.timestamp_millis(),
                alarm.updated_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    fn get_alarm(&self, id: &str) -> StoreResult<Option<Alarm>> {
        let conn = self.lock()?;
        let alarm = conn
            .query_row(
                &format!("SELECT {ALARM_COLUMNS} FROM alarms WHERE id = ?1"),
                params![id],
                row_to_alarm,
            )
            .optional()?;
        Ok(alarm)
    }

    fn alarms_by_status(&self, status: AlarmStatus) -> StoreResult<Vec<Alarm>> {
        self.query_alarms(
            &format!("SELECT {ALARM_COLUMNS} FROM alarms WHERE status = ?1 ORDER BY start_ms, id"),
            &[&status.as_str()],
        )
    }

    fn list_alarms(&self) -> StoreResult<Vec<Alarm>> {
        self.query_alarms(
            &format!("SELECT {ALARM_COLUMNS} FROM alarms ORDER BY start_ms, id"),
            &[],
        )
    }

    fn delete_alarm(&self, id: &str) -> StoreResult<bool> {
        let conn = self.lock()?;
        let n = conn.execute("DELETE FROM alarms WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }

    fn purge_alarms(
        &self,
        statuses: &[AlarmStatus],
        older_than: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let conn = self.lock()?;
        let cutoff = older_than.timestamp_millis();
        let mut purged = 0;
        for status in statuses {
            purged += conn.execute(
                "DELETE FROM alarms WHERE status = ?1 AND updated_ms < ?2",
                params![status.as_str(), cutoff],
            )?;
        }
        Ok(purged)
    }

    fn put_puzzle(&self, puzzle: &Puzzle) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO puzzles (id, operand1, operand2, operation, correct, generated_ms, attempts, max_attempts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                puzzle.id,
                puzzle.operand1,
                puzzle.operand2,
                puzzle.operation.as_str(),
                puzzle.correct_answer,
                puzzle.generated_at.timestamp_millis(),
                puzzle.attempts,
                puzzle.max_attempts,
            ],
        )?;
        Ok(())
    }

    fn get_puzzle(&self, id: &str) -> StoreResult<Option<Puzzle>> {
        let conn = self.lock()?;
        let puzzle = conn
            .query_row(
                &format!("SELECT {PUZZLE_COLUMNS} FROM puzzles WHERE id = ?1"),
                params![id],
                row_to_puzzle,
            )
            .optional()?;
        Ok(puzzle)
    }

    fn record_attempt(&self, id: &str) -> StoreResult<Option<Puzzle>> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let updated = tx.execute(
            "UPDATE puzzles SET attempts = attempts + 1 WHERE id = ?1",
            params![id],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        let puzzle = tx.query_row(
            &format!("SELECT {PUZZLE_COLUMNS} FROM puzzles WHERE id = ?1"),
            params![id],
            row_to_puzzle,
        )?;
        tx.commit()?;
        Ok(Some(puzzle))
    }

    fn delete_puzzle(&self, id: &str) -> StoreResult<bool> {
        let conn = self.lock()?;
        let n = conn.execute("DELETE FROM puzzles WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }

    fn purge_puzzles(&self, older_than: DateTime<Utc>) -> StoreResult<usize> {
        let conn = self.lock()?;
        let n = conn.execute(
            "DELETE FROM puzzles WHERE generated_ms < ?1",
            params![older_than.timestamp_millis()],
        )?;
        Ok(n)
    }

    fn kv_get(&self, key: &str) -> StoreResult<Option<String>> {
        let conn = self.lock()?;
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    fn kv_set(&self, key: &str, value: &str) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn kv_delete(&self, key: &str) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }
}
