use clap::Subcommand;
use mathalarm_core::{Alarm, AlarmStatus};
use serde::Serialize;

use super::{open_coordinator, parse_when, print_json, CliResult};

#[derive(Subcommand)]
pub enum AlarmAction {
    /// Schedule a new alarm
    Create {
        /// Window start: RFC 3339, or +DURATION from now (e.g. +10m)
        #[arg(long)]
        start: String,
        /// Window end: RFC 3339, or +DURATION from the start (e.g. +15m)
        #[arg(long)]
        end: String,
        /// Free-text label
        #[arg(long, default_value = "")]
        label: String,
    },
    /// Check a window without creating anything
    Check {
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
    },
    /// Cancel a scheduled alarm
    Cancel {
        /// Alarm ID
        id: String,
    },
    /// List alarms
    List {
        /// Only alarms with this status
        #[arg(long)]
        status: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one alarm as JSON
    Show {
        /// Alarm ID
        id: String,
    },
    /// Active alarm, pending wake and running session
    Status,
}

#[derive(Serialize)]
struct WindowCheck {
    valid: bool,
    available: bool,
    reason: Option<String>,
}

pub fn run(action: AlarmAction) -> CliResult {
    let coordinator = open_coordinator()?;
    let lifecycle = coordinator.lifecycle();

    match action {
        AlarmAction::Create { start, end, label } => {
            let now = lifecycle.now();
            let start = parse_when(&start, now)?;
            let end = parse_when(&end, start)?;
            let alarm = coordinator.create(start, end, &label)?;
            print_json(&alarm)?;
        }
        AlarmAction::Check { start, end } => {
            let now = lifecycle.now();
            let start = parse_when(&start, now)?;
            let end = parse_when(&end, start)?;
            let check = match lifecycle.validate(start, end, now) {
                Err(e) => WindowCheck {
                    valid: false,
                    available: false,
                    reason: Some(e.to_string()),
                },
                Ok(()) => {
                    let available = lifecycle.can_create(start, end)?;
                    WindowCheck {
                        valid: true,
                        available,
                        reason: (!available)
                            .then(|| "overlaps a scheduled alarm or an alarm is ringing".into()),
                    }
                }
            };
            print_json(&check)?;
        }
        AlarmAction::Cancel { id } => {
            let transition = coordinator.cancel(&id)?;
            print_json(&transition)?;
        }
        AlarmAction::List { status, json } => {
            let alarms = match status {
                Some(s) => {
                    let status = AlarmStatus::parse(&s)
                        .ok_or_else(|| format!("unknown status: {s}"))?;
                    lifecycle.by_status(status)?
                }
                None => lifecycle.list()?,
            };
            if json {
                print_json(&alarms)?;
            } else if alarms.is_empty() {
                println!("No alarms.");
            } else {
                for alarm in &alarms {
                    print_row(alarm);
                }
            }
        }
        AlarmAction::Show { id } => {
            let alarm = lifecycle.get(&id)?;
            print_json(&alarm)?;
        }
        AlarmAction::Status => {
            let status = coordinator.status()?;
            print_json(&status)?;
        }
    }
    Ok(())
}

fn print_row(alarm: &Alarm) {
    println!(
        "{}  {:<9}  {} -> {}  {}",
        alarm.id,
        alarm.status.as_str(),
        alarm.start_time.format("%Y-%m-%d %H:%M:%S"),
        alarm.end_time.format("%H:%M:%S"),
        alarm.label
    );
}
