//! Foreground mode.
//!
//! Boots the coordinator, delivers wake triggers in-process, rings the
//! terminal bell while an alarm is Active and submits each stdin line as an
//! answer. Events are written to stdout as JSON lines.

use std::error::Error;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use mathalarm_core::{
    AlarmStore, AlertPlayer, Clock, Config, Coordinator, Database, Event, SystemClock,
    TokioWakeHost,
};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use super::CliResult;

#[derive(Args)]
pub struct RunArgs {
    /// Seconds between checks for alarms created by other processes
    #[arg(long, default_value = "5")]
    rescan_secs: u64,
    /// Also print the once-per-second countdown
    #[arg(long)]
    ticks: bool,
}

/// Rings the terminal bell every couple of seconds until stopped.
#[derive(Default)]
struct BellPlayer {
    ringing: Arc<AtomicBool>,
}

impl AlertPlayer for BellPlayer {
    fn start_alert(&self) {
        if self.ringing.swap(true, Ordering::SeqCst) {
            return;
        }
        let ringing = Arc::clone(&self.ringing);
        tokio::spawn(async move {
            let mut bell = tokio::time::interval(Duration::from_secs(2));
            while ringing.load(Ordering::SeqCst) {
                bell.tick().await;
                let mut stderr = std::io::stderr();
                let _ = stderr.write_all(b"\x07");
                let _ = stderr.flush();
            }
        });
    }

    fn stop_alert(&self) {
        self.ringing.store(false, Ordering::SeqCst);
    }
}

pub fn run(args: RunArgs) -> CliResult {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(serve(args))
}

async fn serve(args: RunArgs) -> Result<(), Box<dyn Error>> {
    let config = Config::load()?;
    let store: Arc<dyn AlarmStore> = Arc::new(Database::open()?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (host, wakes) = TokioWakeHost::new(Arc::clone(&clock));
    let coordinator = Arc::new(Coordinator::from_config(
        &config,
        store,
        clock,
        Arc::new(BellPlayer::default()),
        Arc::new(host),
    ));

    let mut events = coordinator.lifecycle().events().subscribe();
    let report = coordinator.boot()?;
    emit(&report);
    tokio::spawn(Arc::clone(&coordinator).run(wakes));

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut rescan = tokio::time::interval(Duration::from_secs(args.rescan_secs.max(1)));

    loop {
        tokio::select! {
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => submit(&coordinator, &line),
                Ok(None) => stdin_open = false,
                Err(e) => {
                    tracing::warn!(error = %e, "stdin closed");
                    stdin_open = false;
                }
            },
            event = events.recv() => match event {
                Ok(Event::CountdownTick { .. }) if !args.ticks => {}
                Ok(event) => emit(&event),
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "event output fell behind"),
                Err(RecvError::Closed) => break,
            },
            _ = rescan.tick() => rescan_once(&coordinator),
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        }
    }

    coordinator.shutdown();
    Ok(())
}

/// Pick up alarms another process created or activated.
fn rescan_once(coordinator: &Coordinator) {
    match coordinator.adopt_active() {
        Ok(Some(outcome)) => emit(&outcome),
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "active alarm check failed"),
    }
    if let Err(e) = coordinator.arm_next() {
        tracing::warn!(error = %e, "rescan failed");
    }
}

fn submit(coordinator: &Coordinator, line: &str) {
    match coordinator.submit_answer(line) {
        Ok(outcome) => emit(&outcome),
        Err(e) => eprintln!("error: {e}"),
    }
}

fn emit<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::warn!(error = %e, "could not encode output"),
    }
}
