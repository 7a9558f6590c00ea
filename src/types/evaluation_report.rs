use std::fmt;
use std::time::Duration;

use super::error::RuleEvaluationError;

/// Report returned by [`RuleSet::explain()`](super::ruleset::RuleSet::explain).
///
/// Lists which rules matched the request, the order rules were considered in,
/// rules skipped because of malformed conditions or type errors, and the
/// wall-clock duration of the evaluation.
#[derive(Debug, Clone)]
#[must_use]
pub struct EvaluationReport {
    matched: Vec<String>,
    evaluation_order: Vec<String>,
    skipped: Vec<RuleEvaluationError>,
    duration: Duration,
}

impl EvaluationReport {
    pub(crate) fn new(
        matched: Vec<String>,
        evaluation_order: Vec<String>,
        skipped: Vec<RuleEvaluationError>,
        duration: Duration,
    ) -> Self {
        Self {
            matched,
            evaluation_order,
            skipped,
            duration,
        }
    }

    /// Ids of rules whose condition held, in application order.
    #[must_use]
    pub fn matched(&self) -> &[String] {
        &self.matched
    }

    /// Ids of every in-scope rule, in application order.
    #[must_use]
    pub fn evaluation_order(&self) -> &[String] {
        &self.evaluation_order
    }

    #[must_use]
    pub fn skipped(&self) -> &[RuleEvaluationError] {
        &self.skipped
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "matched: [{}]", self.matched.join(", "))?;
        if !self.skipped.is_empty() {
            let ids: Vec<&str> = self.skipped.iter().map(|e| e.rule.as_str()).collect();
            write!(f, ", skipped: [{}]", ids.join(", "))?;
        }
        write!(f, ", duration: {:?}", self.duration)
    }
}
