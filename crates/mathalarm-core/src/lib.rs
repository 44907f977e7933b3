//! # Mathalarm Core Library
//!
//! Core logic for a puzzle-gated alarm. An alarm rings inside a fixed time
//! window and can only be silenced by solving an arithmetic puzzle before
//! the window closes; otherwise it expires on its own. The CLI binary is a
//! thin shell over this crate.
//!
//! ## Architecture
//!
//! - **Lifecycle**: a single gate serializes every status change, so at most
//!   one alarm is Active and dismiss/expire races resolve first-wins
//! - **Puzzles**: seeded generation and validation with persisted attempt
//!   counters
//! - **Session**: headless controller for one ringing alarm (puzzle, input,
//!   countdown, playback stop)
//! - **Scheduler**: one host wake trigger per upcoming alarm plus a local
//!   deadline timer
//! - **Storage**: SQLite records and TOML configuration
//!
//! ## Key Components
//!
//! - [`LifecycleManager`]: alarm state machine and recovery sweep
//! - [`PuzzleEngine`]: puzzle generation and answer checking
//! - [`DismissalSession`]: drives an Active alarm to its end
//! - [`Coordinator`]: wires triggers, sessions and timers together
//! - [`Database`]: durable [`AlarmStore`]
//! - [`Config`]: application configuration

pub mod alarm;
pub mod clock;
pub mod error;
pub mod events;
pub mod playback;
pub mod puzzle;
pub mod scheduler;
pub mod session;
pub mod storage;

pub use alarm::{
    Alarm, AlarmPolicy, AlarmStatus, CleanupReport, LifecycleManager, RecoveryAction,
    RecoveryReport, Transition,
};
pub use clock::{AnchoredClock, Clock, ManualClock, SystemClock};
pub use error::{AlarmError, ConfigError, CoreError, DatabaseError};
pub use events::{Event, EventBus, SessionEndReason};
pub use playback::{AlertPlayer, TracingPlayer};
pub use puzzle::{Operation, Puzzle, PuzzleEngine, PuzzleSettings, PuzzleView};
pub use scheduler::{
    Coordinator, CoordinatorStatus, PendingWake, TokioWakeHost, WakeHost, WakeOutcome, WakePayload,
};
pub use session::{AnswerInput, AnswerOutcome, DismissalSession, SessionSettings, SessionSnapshot};
pub use storage::{AlarmStore, Config, Database};
