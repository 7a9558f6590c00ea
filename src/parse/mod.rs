mod error;
mod grammar;
mod parser;

pub use error::ParseError;
pub use parser::ParsedRuleSet;

use crate::types::Expr;

/// Parse rule-file text into a [`ParsedRuleSet`].
///
/// # Errors
///
/// Returns [`ParseError`] if the input is not valid rule-file syntax.
pub fn parse(input: &str) -> Result<ParsedRuleSet, ParseError> {
    use winnow::Parser;
    grammar::parse_ruleset
        .parse(input)
        .map_err(|e| ParseError::new(e.to_string()))
}

/// Parse a single condition expression, e.g. a field's attached `condition`.
///
/// # Errors
///
/// Returns [`ParseError`] if the input is not a complete, valid expression.
pub fn parse_condition(input: &str) -> Result<Expr, ParseError> {
    use winnow::Parser;
    grammar::parse_condition
        .parse(input)
        .map_err(|e| ParseError::new(e.to_string()))
}
