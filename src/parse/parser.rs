use crate::types::BusinessRule;

/// The result of parsing a rule file.
#[derive(Debug)]
pub struct ParsedRuleSet {
    pub rules: Vec<BusinessRule>,
}
