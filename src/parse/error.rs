use thiserror::Error;

/// Syntax error in a condition or rule file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parse error: {message}")]
pub struct ParseError {
    message: String,
}

impl ParseError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The rendered winnow error, including the offending input position.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}
