use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("duplicate rule id '{id}'")]
    DuplicateRule { id: String },

    #[error("rule '{rule}' has no action")]
    MissingAction { rule: String },

    #[error("rule '{rule}' targets no fields")]
    EmptyTarget { rule: String },
}

/// A business rule that could not be applied. Non-fatal: the rule is skipped
/// and evaluation continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rule '{rule}' skipped: {reason}")]
pub struct RuleEvaluationError {
    pub rule: String,
    pub reason: String,
}
