use clap::Subcommand;
use mathalarm_core::session::parse_answer;
use mathalarm_core::Config;
use serde::Serialize;

use super::{open_coordinator, print_json, CliResult};

#[derive(Subcommand)]
pub enum PuzzleAction {
    /// Generate and store a puzzle (the answer is not shown)
    Generate,
    /// Check an answer, counting one attempt
    Check {
        /// Puzzle ID
        id: String,
        /// Proposed answer
        #[arg(allow_hyphen_values = true)]
        answer: String,
    },
}

#[derive(Serialize)]
struct CheckResult {
    puzzle_id: String,
    correct: bool,
}

pub fn run(action: PuzzleAction) -> CliResult {
    let coordinator = open_coordinator()?;
    let puzzles = coordinator.puzzles();

    match action {
        PuzzleAction::Generate => {
            let puzzle = puzzles.generate()?;
            print_json(&puzzle.view())?;
        }
        PuzzleAction::Check { id, answer } => {
            let max_len = Config::load()?.session.input_max_len;
            let answer = parse_answer(&answer, max_len)?;
            let correct = puzzles.validate(&id, answer)?;
            print_json(&CheckResult {
                puzzle_id: id,
                correct,
            })?;
        }
    }
    Ok(())
}
