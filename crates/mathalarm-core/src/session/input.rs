//! Answer entry buffer and parsing.
//!
//! Editing is plain string manipulation; nothing is checked until submit.

use serde::{Deserialize, Serialize};

use crate::error::AlarmError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerInput {
    text: String,
    max_len: usize,
}

impl AnswerInput {
    pub fn new(max_len: usize) -> Self {
        Self {
            text: String::new(),
            max_len,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Append a digit; ignored once the buffer is full or for non-digits.
    pub fn push_digit(&mut self, digit: char) -> bool {
        if !digit.is_ascii_digit() || self.is_full() {
            return false;
        }
        self.text.push(digit);
        true
    }

    /// Leading minus sign.
    pub fn push_minus(&mut self) -> bool {
        if !self.text.is_empty() || self.is_full() {
            return false;
        }
        self.text.push('-');
        true
    }

    pub fn backspace(&mut self) -> Option<char> {
        self.text.pop()
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }

    /// Hand back the buffered text and empty the buffer.
    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.text)
    }

    fn is_full(&self) -> bool {
        self.text.chars().count() >= self.max_len
    }
}

/// Parse a raw answer: trim, cap at `max_len` characters, then read an integer.
///
/// # Errors
/// `EmptyInput` for blank input, `NotANumber` otherwise.
pub fn parse_answer(raw: &str, max_len: usize) -> Result<i64, AlarmError> {
    let capped: String = raw.trim().chars().take(max_len).collect();
    if capped.is_empty() {
        return Err(AlarmError::EmptyInput);
    }
    capped
        .parse::<i64>()
        .map_err(|_| AlarmError::NotANumber(capped))
}
