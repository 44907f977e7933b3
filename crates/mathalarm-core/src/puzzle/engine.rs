//! Puzzle generation and answer checking.
//!
//! Every request yields a fresh, persisted puzzle. Operand ranges:
//!
//! | Operation | operand1    | operand2          |
//! |-----------|-------------|-------------------|
//! | Add       | [10, 100)   | [10, 100)         |
//! | Subtract  | [50, 200)   | [10, operand1)    |
//! | Multiply  | [2, 20)     | [2, 20)           |

use std::sync::{Arc, Mutex};

use chrono::SubsecRound;
use rand::prelude::*;
use rand_pcg::Mcg128Xsl64;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Operation, Puzzle};
use crate::clock::Clock;
use crate::error::AlarmError;
use crate::storage::AlarmStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PuzzleSettings {
    pub max_attempts: u32,
    /// Random seed for reproducibility (None = random)
    pub seed: Option<u64>,
}

impl Default for PuzzleSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            seed: None,
        }
    }
}

pub struct PuzzleEngine {
    store: Arc<dyn AlarmStore>,
    clock: Arc<dyn Clock>,
    rng: Mutex<Mcg128Xsl64>,
    max_attempts: u32,
}

impl PuzzleEngine {
    pub fn new(store: Arc<dyn AlarmStore>, clock: Arc<dyn Clock>, settings: PuzzleSettings) -> Self {
        let rng = match settings.seed {
            Some(seed) => Mcg128Xsl64::seed_from_u64(seed),
            None => Mcg128Xsl64::from_entropy(),
        };
        Self {
            store,
            clock,
            rng: Mutex::new(rng),
            max_attempts: settings.max_attempts,
        }
    }

    /// Create and persist a new puzzle.
    ///
    /// # Errors
    /// Returns `StorageFailure` if the puzzle cannot be saved; an unsaved
    /// puzzle could never be validated, so it is not handed out.
    pub fn generate(&self) -> Result<Puzzle, AlarmError> {
        let (operation, operand1, operand2) = {
            let mut rng = self.rng.lock().unwrap_or_else(|p| p.into_inner());
            draw_operands(&mut *rng)
        };

        let puzzle = Puzzle {
            id: Uuid::new_v4().to_string(),
            operand1,
            operand2,
            operation,
            correct_answer: operation.apply(operand1, operand2),
            generated_at: self.clock.now().trunc_subsecs(3),
            attempts: 0,
            max_attempts: self.max_attempts,
        };

        self.store.put_puzzle(&puzzle)?;
        tracing::debug!(puzzle_id = %puzzle.id, operation = ?operation, "puzzle generated");
        Ok(puzzle)
    }

    /// Check `answer` against a stored puzzle, counting the attempt.
    ///
    /// # Errors
    /// `NotFound` for an unknown id, `StorageFailure` if the store fails.
    pub fn validate(&self, puzzle_id: &str, answer: i64) -> Result<bool, AlarmError> {
        let puzzle = self
            .store
            .record_attempt(puzzle_id)?
            .ok_or_else(|| AlarmError::puzzle_not_found(puzzle_id))?;

        let correct = answer == puzzle.correct_answer;
        if puzzle.attempts_exhausted() {
            tracing::info!(
                puzzle_id,
                attempts = puzzle.attempts,
                max_attempts = puzzle.max_attempts,
                "puzzle attempt ceiling reached"
            );
        }
        Ok(correct)
    }

    /// Fetch a stored puzzle.
    pub fn get(&self, puzzle_id: &str) -> Result<Puzzle, AlarmError> {
        self.store
            .get_puzzle(puzzle_id)?
            .ok_or_else(|| AlarmError::puzzle_not_found(puzzle_id))
    }
}

/// Pick an operation uniformly, then operands for its range.
fn draw_operands<R: Rng + ?Sized>(rng: &mut R) -> (Operation, i64, i64) {
    let operation = Operation::ALL[rng.gen_range(0..Operation::ALL.len())];
    match operation {
        Operation::Add => (operation, rng.gen_range(10..100), rng.gen_range(10..100)),
        Operation::Subtract => {
            let lhs = rng.gen_range(50..200);
            (operation, lhs, rng.gen_range(10..lhs))
        }
        Operation::Multiply => (operation, rng.gen_range(2..20), rng.gen_range(2..20)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::storage::Database;

    fn engine(seed: u64) -> PuzzleEngine {
        let store: Arc<dyn AlarmStore> = Arc::new(Database::open_memory().unwrap());
        PuzzleEngine::new(
            store,
            Arc::new(SystemClock),
            PuzzleSettings {
                max_attempts: 5,
                seed: Some(seed),
            },
        )
    }

    #[test]
    fn operands_stay_in_range() {
        let mut rng = Mcg128Xsl64::seed_from_u64(7);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..2_000 {
            let (op, a, b) = draw_operands(&mut rng);
            seen.insert(op);
            match op {
                Operation::Add => {
                    assert!((10..100).contains(&a));
                    assert!((10..100).contains(&b));
                }
                Operation::Subtract => {
                    assert!((50..200).contains(&a));
                    assert!((10..a).contains(&b));
                    assert!(op.apply(a, b) > 0);
                }
                Operation::Multiply => {
                    assert!((2..20).contains(&a));
                    assert!((2..20).contains(&b));
                }
            }
        }
        assert_eq!(seen.len(), 3, "every operation should be drawn");
    }

    #[test]
    fn generate_persists_puzzle() {
        let engine = engine(1);
        let puzzle = engine.generate().unwrap();
        let stored = engine.get(&puzzle.id).unwrap();
        assert_eq!(stored, puzzle);
        assert_eq!(stored.attempts, 0);
        assert_eq!(
            stored.correct_answer,
            stored.operation.apply(stored.operand1, stored.operand2)
        );
    }

    #[test]
    fn validate_counts_every_attempt() {
        let engine = engine(2);
        let puzzle = engine.generate().unwrap();
        assert!(!engine.validate(&puzzle.id, puzzle.correct_answer + 1).unwrap());
        assert!(engine.validate(&puzzle.id, puzzle.correct_answer).unwrap());
        assert_eq!(engine.get(&puzzle.id).unwrap().attempts, 2);
    }

    #[test]
    fn validate_unknown_id_is_not_found() {
        let engine = engine(3);
        let err = engine.validate("nope", 1).unwrap_err();
        assert!(matches!(err, AlarmError::NotFound { kind: "Puzzle", .. }));
    }

    #[test]
    fn same_seed_same_sequence() {
        let a = engine(99);
        let b = engine(99);
        for _ in 0..10 {
            let (pa, pb) = (a.generate().unwrap(), b.generate().unwrap());
            assert_eq!(
                (pa.operation, pa.operand1, pa.operand2),
                (pb.operation, pb.operand1, pb.operand2)
            );
        }
    }

    #[test]
    fn prompt_hides_answer() {
        let engine = engine(5);
        let puzzle = engine.generate().unwrap();
        let view = puzzle.view();
        let json = serde_json::to_string(&view).unwrap();
        assert!(!json.contains("correct"));
        assert!(view.prompt.ends_with("= ?"));
    }
}
