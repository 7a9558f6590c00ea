use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use super::context::{FormData, RequestContext};
use super::error::CompileError;
use super::evaluation_report::EvaluationReport;
use super::expr::Expr;
use super::field::FieldType;
use super::path_registry::PathRegistry;
use super::rule::{BusinessRule, CompiledRule, Condition, RuleAction, RuleTarget};
use super::schema::ResolvedSchema;
use crate::evaluate::{RuleOutcome, Scope};

/// Builder for constructing a [`RuleSet`].
///
/// Rules are defined via closures and compiled into an immutable, thread-safe
/// structure sorted by application order.
///
/// # Example
///
/// ```
/// use formwright::{RuleSetBuilder, FieldType, has_permission, path};
///
/// let rules = RuleSetBuilder::new()
///     .rule("hide_salary", |r| {
///         r.on_fields(&["salary"]).when(!has_permission("hr.view")).hide()
///     })
///     .rule("lock_numbers", |r| {
///         r.on_type(FieldType::Number)
///             .priority(10)
///             .when(path("form.status").eq("submitted"))
///             .readonly()
///             .message("Submitted forms are locked")
///     })
///     .compile()
///     .unwrap();
/// assert_eq!(rules.len(), 2);
/// ```
#[derive(Debug, Default)]
pub struct RuleSetBuilder {
    rules: Vec<BusinessRule>,
}

/// Intermediate builder passed to the rule definition closure.
#[derive(Debug)]
pub struct RuleBuilder {
    rule: BusinessRule,
}

impl RuleSetBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a rule. The closure must set an action (`.hide()`, `.require()`, ...).
    ///
    /// Without a target the rule applies to every field; without a condition it
    /// always matches. A missing action fails compilation with
    /// [`CompileError::MissingAction`].
    #[must_use]
    pub fn rule(mut self, id: &str, f: impl FnOnce(RuleBuilder) -> RuleBuilder) -> Self {
        let builder = f(RuleBuilder {
            rule: BusinessRule {
                id: id.to_owned(),
                schema: None,
                target: RuleTarget::All,
                condition: None,
                priority: 0,
                action: None,
                message: None,
            },
        });
        self.rules.push(builder.rule);
        self
    }

    /// Append an already-built rule, e.g. one loaded from storage.
    #[must_use]
    pub fn push(mut self, rule: BusinessRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Compile the rules into an immutable `RuleSet`.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError`] if validation fails.
    pub fn compile(self) -> Result<RuleSet, CompileError> {
        crate::compile::compile(&self.rules)
    }
}

impl RuleBuilder {
    #[must_use]
    pub fn on_fields(mut self, names: &[&str]) -> Self {
        self.rule.target = RuleTarget::Fields(names.iter().map(|n| (*n).to_owned()).collect());
        self
    }

    #[must_use]
    pub fn on_type(mut self, field_type: FieldType) -> Self {
        self.rule.target = RuleTarget::FieldType(field_type);
        self
    }

    #[must_use]
    pub fn on_all(mut self) -> Self {
        self.rule.target = RuleTarget::All;
        self
    }

    /// Restrict the rule to one schema id.
    #[must_use]
    pub fn schema(mut self, schema_id: &str) -> Self {
        self.rule.schema = Some(schema_id.to_owned());
        self
    }

    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.rule.priority = priority;
        self
    }

    #[must_use]
    pub fn when(mut self, condition: Expr) -> Self {
        self.rule.condition = Some(Condition::Expr(condition));
        self
    }

    /// Condition given as DSL text. Parsed at compile time; a malformed condition
    /// does not fail compilation, the rule is skipped at evaluation.
    #[must_use]
    pub fn when_source(mut self, source: &str) -> Self {
        self.rule.condition = Some(Condition::Source(source.to_owned()));
        self
    }

    #[must_use]
    pub fn message(mut self, message: &str) -> Self {
        self.rule.message = Some(message.to_owned());
        self
    }

    #[must_use]
    pub fn action(mut self, action: RuleAction) -> Self {
        self.rule.action = Some(action);
        self
    }

    #[must_use]
    pub fn show(self) -> Self {
        self.action(RuleAction::Show)
    }

    #[must_use]
    pub fn hide(self) -> Self {
        self.action(RuleAction::Hide)
    }

    #[must_use]
    pub fn editable(self) -> Self {
        self.action(RuleAction::Editable)
    }

    #[must_use]
    pub fn readonly(self) -> Self {
        self.action(RuleAction::ReadOnly)
    }

    #[must_use]
    pub fn require(self) -> Self {
        self.action(RuleAction::Require)
    }

    #[must_use]
    pub fn optional(self) -> Self {
        self.action(RuleAction::Optional)
    }
}

/// A compiled, immutable rule set. Thread-safe and designed to live behind `Arc`.
#[derive(Debug)]
pub struct RuleSet {
    /// Sorted by `(priority, ordinal)`.
    pub(crate) rules: Vec<CompiledRule>,
    pub(crate) paths: PathRegistry,
    pub(crate) fingerprint: [u8; 32],
}

impl RuleSet {
    /// A rule set with no rules.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            rules: Vec::new(),
            paths: PathRegistry::new(),
            fingerprint: *blake3::hash(b"").as_bytes(),
        }
    }

    /// Parse rule-file text and compile it.
    ///
    /// # Errors
    ///
    /// Returns [`RuleSetError`](crate::RuleSetError) on parse or compile failure.
    pub fn from_dsl(input: &str) -> Result<Self, crate::RuleSetError> {
        let parsed = crate::parse::parse(input)?;
        let ruleset = crate::compile::compile(&parsed.rules)?;
        Ok(ruleset)
    }

    /// Read a rule file and compile it.
    ///
    /// # Errors
    ///
    /// Returns [`RuleSetError`](crate::RuleSetError) on I/O, parse, or compile failure.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, crate::RuleSetError> {
        let input = std::fs::read_to_string(path)?;
        Self::from_dsl(&input)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rule ids in the order they are applied.
    #[must_use]
    pub fn application_order(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.id.as_str()).collect()
    }

    /// Ids of rules whose condition text failed to parse.
    #[must_use]
    pub fn malformed_rules(&self) -> Vec<&str> {
        self.rules
            .iter()
            .filter(|r| r.condition.is_err())
            .map(|r| r.id.as_str())
            .collect()
    }

    /// Context paths read by any rule condition.
    #[must_use]
    pub fn read_paths(&self) -> &PathRegistry {
        &self.paths
    }

    /// BLAKE3 digest of the canonical rule text.
    #[must_use]
    pub fn fingerprint(&self) -> [u8; 32] {
        self.fingerprint
    }

    /// Canonical rule-file text, in application order.
    #[must_use]
    pub fn to_dsl(&self) -> String {
        crate::compile::canonical_text(&self.rules)
    }

    /// Evaluate every rule scoped to `schema` against one request and report
    /// which matched.
    pub fn explain(
        &self,
        schema: &ResolvedSchema,
        ctx: &RequestContext,
        form: &FormData,
    ) -> EvaluationReport {
        let start = Instant::now();
        let scope = Scope::new(schema, ctx, form);
        let outcomes = crate::evaluate::evaluate_rules(&self.rules, &scope);

        let mut matched = Vec::new();
        let mut order = Vec::new();
        let mut skipped = Vec::new();
        for (rule, outcome) in self.rules.iter().zip(outcomes) {
            match outcome {
                RuleOutcome::OutOfScope => continue,
                RuleOutcome::Matched => matched.push(rule.id.clone()),
                RuleOutcome::NotMatched => {}
                RuleOutcome::Skipped(err) => skipped.push(err),
            }
            order.push(rule.id.clone());
        }
        EvaluationReport::new(matched, order, skipped, start.elapsed())
    }
}

impl fmt::Display for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RuleSet({} rules, {} paths, {} malformed)",
            self.rules.len(),
            self.paths.len(),
            self.rules.iter().filter(|r| r.condition.is_err()).count(),
        )
    }
}

/// Holder for the active rule set. Injected into the pipeline; swapping the rule
/// set changes its fingerprint and therefore every enriched cache key.
#[derive(Debug)]
pub struct RuleRegistry {
    current: RwLock<Arc<RuleSet>>,
}

impl RuleRegistry {
    #[must_use]
    pub fn new(rules: RuleSet) -> Self {
        Self {
            current: RwLock::new(Arc::new(rules)),
        }
    }

    /// Snapshot of the active rule set.
    #[must_use]
    pub fn current(&self) -> Arc<RuleSet> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Atomically replace the active rule set. Requests already running keep the
    /// snapshot they started with.
    pub fn replace(&self, rules: RuleSet) {
        let next = Arc::new(rules);
        match self.current.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new(RuleSet::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{has_role, path};

    #[test]
    fn builder_collects_rules() {
        let builder = RuleSetBuilder::new()
            .rule("a", |r| r.on_fields(&["x", "y"]).when(has_role("admin")).show())
            .rule("b", |r| r.schema("s1").priority(5).hide().message("gone"));

        assert_eq!(builder.rules.len(), 2);
        assert_eq!(
            builder.rules[0].target,
            RuleTarget::Fields(vec!["x".into(), "y".into()])
        );
        assert_eq!(builder.rules[1].schema.as_deref(), Some("s1"));
        assert_eq!(builder.rules[1].priority, 5);
        assert_eq!(builder.rules[1].action, Some(RuleAction::Hide));
        assert_eq!(builder.rules[1].message.as_deref(), Some("gone"));
        assert_eq!(builder.rules[1].condition, None);
    }

    #[test]
    fn builder_rule_without_action_returns_error() {
        let result = RuleSetBuilder::new().rule("bad", |r| r).compile();
        assert!(matches!(
            result,
            Err(CompileError::MissingAction { rule }) if rule == "bad"
        ));
    }

    #[test]
    fn from_dsl_compiles() {
        let rules = RuleSet::from_dsl(
            "rule a (priority 2) on *:\n form.x == 1\n => hide\n\
             rule b on type:number:\n has_permission(\"p\")\n => readonly",
        )
        .unwrap();
        assert_eq!(rules.application_order(), vec!["b", "a"]);
        assert_eq!(rules.read_paths().iter().collect::<Vec<_>>(), ["form.x"]);
    }

    #[test]
    fn from_dsl_rejects_duplicates() {
        let err = RuleSet::from_dsl("rule a on *:\n true => hide\nrule a on *:\n true => show")
            .unwrap_err();
        assert!(matches!(
            err,
            crate::RuleSetError::Compile(CompileError::DuplicateRule { .. })
        ));
    }

    #[test]
    fn display_summarizes() {
        let rules = RuleSetBuilder::new()
            .rule("a", |r| r.when(path("form.x").exists()).hide())
            .rule("b", |r| r.when_source("((").show())
            .compile()
            .unwrap();
        assert_eq!(rules.to_string(), "RuleSet(2 rules, 1 paths, 1 malformed)");
    }

    #[test]
    fn registry_swaps_snapshots() {
        let registry = RuleRegistry::default();
        let before = registry.current();
        assert!(before.is_empty());
        registry.replace(
            RuleSetBuilder::new()
                .rule("a", |r| r.hide())
                .compile()
                .unwrap(),
        );
        assert!(before.is_empty());
        assert_eq!(registry.current().len(), 1);
        assert_ne!(before.fingerprint(), registry.current().fingerprint());
    }
}
