use thiserror::Error;

use crate::CompileError;
use crate::parse::ParseError;
use crate::types::FieldType;

/// Error returned when loading a rule set from text or a file.
///
/// Returned by [`RuleSet::from_dsl()`](crate::RuleSet::from_dsl) and
/// [`RuleSet::from_file()`](crate::RuleSet::from_file).
#[derive(Debug, Error)]
pub enum RuleSetError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Fatal pipeline failure. Non-fatal problems are reported as
/// [`Diagnostic`](crate::Diagnostic)s on the enriched schema instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unresolved reference '{pointer}' in '{referenced_from}'")]
    Reference {
        pointer: String,
        referenced_from: String,
    },

    #[error("circular reference: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("reference depth exceeded the limit of {max}")]
    DepthExceeded { max: usize },

    #[error("schema pulls in more than {max} documents")]
    TooManyDocuments { max: usize },

    #[error("field '{field}' redeclared as {incoming}, incompatible with {existing}")]
    CompositionConflict {
        field: String,
        existing: FieldType,
        incoming: FieldType,
    },

    #[error("field '{field}' has no type")]
    MissingFieldType { field: String },

    #[error("schema store unavailable for '{schema_id}': {reason}")]
    StoreUnavailable { schema_id: String, reason: String },

    #[error("malformed pointer '{pointer}'")]
    InvalidPointer { pointer: String },

    #[error("document cannot be encoded: {0}")]
    Document(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_lists_path() {
        let err = PipelineError::Cycle {
            path: vec!["a#x".into(), "a#y".into(), "a#x".into()],
        };
        assert_eq!(err.to_string(), "circular reference: a#x -> a#y -> a#x");
    }

    #[test]
    fn reference_message() {
        let err = PipelineError::Reference {
            pointer: "address#zip".into(),
            referenced_from: "signup".into(),
        };
        assert_eq!(
            err.to_string(),
            "unresolved reference 'address#zip' in 'signup'"
        );
    }

    #[test]
    fn conflict_message_names_types() {
        let err = PipelineError::CompositionConflict {
            field: "age".into(),
            existing: FieldType::Text,
            incoming: FieldType::Number,
        };
        assert_eq!(
            err.to_string(),
            "field 'age' redeclared as number, incompatible with text"
        );
    }

    #[test]
    fn rule_set_error_is_transparent() {
        let err = RuleSetError::from(CompileError::DuplicateRule { id: "r".into() });
        assert_eq!(err.to_string(), "duplicate rule id 'r'");
    }
}
