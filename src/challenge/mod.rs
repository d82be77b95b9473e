//! Question challenge and extension-validation data model.

pub mod bank;
pub mod generator;
pub mod validator;

pub use generator::{GeneratorConfig, QuestionProvider};
pub use validator::{ExtensionValidator, ValidatorConfig};

use serde::{Deserialize, Serialize};

/// Justification shorter than this is rejected locally, with no network
/// round-trip; the fallback validator applies the same floor.
pub const MIN_JUSTIFICATION_CHARS: usize = 10;
/// Fixed ask attached to every extension request.
pub const DEFAULT_REQUESTED_MINUTES: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionCategory {
    pub id: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub category_id: String,
    pub prompt: String,
    /// Unique options, exactly one of which matches `correct_answer`.
    pub options: Vec<String>,
    pub correct_answer: String,
}

impl Question {
    /// Multiple-choice check: exact match, case and whitespace insensitive.
    pub fn is_correct(&self, answer: &str) -> bool {
        answer.trim().eq_ignore_ascii_case(self.correct_answer.trim())
    }
}

/// A submitted answer plus its free-text justification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionResponse {
    pub question_id: String,
    pub answer: String,
    pub justification: String,
    pub correct: bool,
}

/// Derived from a correct response; what the validator decides on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionRequest {
    pub package: String,
    pub app_name: String,
    pub response: QuestionResponse,
    pub requested_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub approved: bool,
    pub confidence: f64,
    pub feedback: String,
    pub suggested_minutes: u32,
}
