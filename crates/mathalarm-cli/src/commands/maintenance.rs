use super::{open_coordinator, open_unswept, print_json, CliResult};

/// One-off recovery sweep. No session is started; `run` does that.
pub fn recover() -> CliResult {
    let coordinator = open_unswept()?;
    let lifecycle = coordinator.lifecycle();
    let report = lifecycle.recover_state(lifecycle.now())?;
    coordinator.arm_next()?;
    print_json(&report)
}

pub fn cleanup() -> CliResult {
    let coordinator = open_coordinator()?;
    print_json(&coordinator.cleanup())
}
