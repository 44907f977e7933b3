//! Arithmetic challenges that gate alarm dismissal.

mod engine;

pub use engine::{PuzzleEngine, PuzzleSettings};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Add,
    Subtract,
    Multiply,
}

impl Operation {
    pub const ALL: [Operation; 3] = [Operation::Add, Operation::Subtract, Operation::Multiply];

    pub fn symbol(self) -> char {
        match self {
            Operation::Add => '+',
            Operation::Subtract => '-',
            Operation::Multiply => '×',
        }
    }

    pub fn apply(self, lhs: i64, rhs: i64) -> i64 {
        match self {
            Operation::Add => lhs + rhs,
            Operation::Subtract => lhs - rhs,
            Operation::Multiply => lhs * rhs,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Add => "add",
            Operation::Subtract => "subtract",
            Operation::Multiply => "multiply",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "add" => Some(Operation::Add),
            "subtract" => Some(Operation::Subtract),
            "multiply" => Some(Operation::Multiply),
            _ => None,
        }
    }
}

/// One single-use arithmetic challenge.
///
/// Only `attempts` ever changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Puzzle {
    pub id: String,
    pub operand1: i64,
    pub operand2: i64,
    pub operation: Operation,
    /// Never serialized to observers; see [`PuzzleView`].
    pub correct_answer: i64,
    pub generated_at: DateTime<Utc>,
    pub attempts: u32,
    /// Advisory ceiling, exposed for policy decisions only.
    pub max_attempts: u32,
}

impl Puzzle {
    /// `"47 + 38 = ?"`
    pub fn prompt(&self) -> String {
        format!(
            "{} {} {} = ?",
            self.operand1,
            self.operation.symbol(),
            self.operand2
        )
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    pub fn view(&self) -> PuzzleView {
        PuzzleView {
            id: self.id.clone(),
            prompt: self.prompt(),
            operand1: self.operand1,
            operand2: self.operand2,
            operation: self.operation,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
        }
    }
}

/// A puzzle as shown to the user: everything except the answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PuzzleView {
    pub id: String,
    pub prompt: String,
    pub operand1: i64,
    pub operand2: i64,
    pub operation: Operation,
    pub attempts: u32,
    pub max_attempts: u32,
}
