//! Subcommand implementations and the helpers they share.

pub mod alarm;
pub mod config;
pub mod maintenance;
pub mod puzzle;
pub mod run;

use std::error::Error;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use mathalarm_core::{
    AlarmStore, Config, Coordinator, Database, SystemClock, TracingPlayer, WakeHost, WakePayload,
};
use serde::Serialize;

pub type CliResult = Result<(), Box<dyn Error>>;

/// Wake host for one-shot commands.
///
/// The trigger is only recorded (the coordinator persists it); a `run`
/// process picks it up on its next rescan.
struct DetachedHost;

impl WakeHost for DetachedHost {
    fn schedule_wake(&self, at: DateTime<Utc>, payload: WakePayload) {
        tracing::debug!(alarm_id = %payload.alarm_id, at = %at, "wake left for the run loop");
    }

    fn cancel_wake(&self) {}
}

/// Coordinator over the on-disk store, for commands that exit right away.
///
/// Runs the recovery sweep first so an alarm left Active by a crashed
/// process does not block this command. A failed sweep is logged only.
pub fn open_coordinator() -> mathalarm_core::error::Result<Coordinator> {
    let coordinator = open_unswept()?;
    let lifecycle = coordinator.lifecycle();
    match lifecycle.recover_state(lifecycle.now()) {
        Ok(report) => tracing::debug!(
            examined = report.examined,
            activated = report.activated,
            expired = report.expired,
            "startup recovery"
        ),
        Err(e) => tracing::warn!(error = %e, "startup recovery failed"),
    }
    Ok(coordinator)
}

/// Coordinator over the on-disk store, with no recovery sweep.
pub fn open_unswept() -> mathalarm_core::error::Result<Coordinator> {
    let config = Config::load()?;
    let store: Arc<dyn AlarmStore> = Arc::new(Database::open()?);
    Ok(Coordinator::from_config(
        &config,
        store,
        Arc::new(SystemClock),
        Arc::new(TracingPlayer),
        Arc::new(DetachedHost),
    ))
}

pub fn print_json<T: Serialize>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// RFC 3339 timestamp, or `+` and an offset from `base` such as `90s`,
/// `5m` or `1h30m`.
pub fn parse_when(raw: &str, base: DateTime<Utc>) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Some(offset) = raw.strip_prefix('+') {
        let offset = parse_offset(offset)?;
        return base
            .checked_add_signed(offset)
            .ok_or_else(|| format!("time '{raw}' is out of range"));
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid time '{raw}': {e} (use RFC 3339 or +DURATION)"))
}

fn parse_offset(raw: &str) -> Result<Duration, String> {
    let invalid = || format!("invalid duration '{raw}' (use e.g. 90s, 5m, 1h30m)");
    let mut total = Duration::zero();
    let mut digits = String::new();

    for c in raw.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let n: i64 = digits.parse().map_err(|_| invalid())?;
        digits.clear();
        let part = match c {
            'd' => Duration::try_days(n),
            'h' => Duration::try_hours(n),
            'm' => Duration::try_minutes(n),
            's' => Duration::try_seconds(n),
            _ => return Err(format!("unknown unit '{c}' in '{raw}'")),
        };
        total = part
            .and_then(|p| total.checked_add(&p))
            .ok_or_else(invalid)?;
    }

    if !digits.is_empty() || total <= Duration::zero() {
        return Err(invalid());
    }
    Ok(total)
}
