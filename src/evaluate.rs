use std::borrow::Cow;

use tracing::warn;

use crate::types::{
    CompiledRule, Diagnostic, Discriminator, EnrichedField, Expr, FormData, RequestContext,
    ResolvedSchema, RuleEvaluationError, Runtime, Value,
};

/// Everything a condition may read for one request.
pub(crate) struct Scope<'a> {
    schema: &'a ResolvedSchema,
    ctx: &'a RequestContext,
    form: &'a FormData,
}

impl<'a> Scope<'a> {
    pub(crate) fn new(
        schema: &'a ResolvedSchema,
        ctx: &'a RequestContext,
        form: &'a FormData,
    ) -> Self {
        Self { schema, ctx, form }
    }

    /// Resolve a condition path. `form.*` reads form data, a handful of
    /// well-known names read the request and schema, anything else reads
    /// context attributes.
    pub(crate) fn lookup(&self, path: &str) -> Option<Cow<'a, Value>> {
        match path {
            "user.id" => Some(Cow::Owned(Value::from(self.ctx.identity()))),
            "tenant.id" => Some(Cow::Owned(Value::from(self.ctx.tenant_id()))),
            "schema.id" => Some(Cow::Owned(Value::from(self.schema.schema_id()))),
            "schema.kind" => Some(Cow::Owned(Value::from(self.schema.kind()))),
            _ => match path.strip_prefix("form.") {
                Some(rest) => self.form.get(rest).map(Cow::Borrowed),
                None => self.ctx.attributes().get(path).map(Cow::Borrowed),
            },
        }
    }

    fn matches(&self, gate: &Discriminator) -> bool {
        self.lookup(&gate.path)
            .is_some_and(|v| v.matches(&gate.equals))
    }
}

/// Evaluate `expr`. A comparison between incompatible, non-null types is a
/// type error; missing paths read as null and never error.
pub(crate) fn eval_expr(expr: &Expr, scope: &Scope<'_>) -> Result<bool, String> {
    match expr {
        Expr::Literal(b) => Ok(*b),
        Expr::Compare { path, op, value } => {
            let null = Value::Null;
            let found = scope.lookup(path);
            let actual = found.as_deref().unwrap_or(&null);
            match actual.compare(*op, value) {
                Some(result) => Ok(result),
                None if matches!(actual, Value::Null) || matches!(value, Value::Null) => Ok(false),
                None => Err(format!(
                    "cannot compare {} at '{path}' with {} using {op}",
                    actual.type_name(),
                    value.type_name()
                )),
            }
        }
        Expr::In { path, values } => Ok(scope
            .lookup(path)
            .is_some_and(|actual| values.iter().any(|v| actual.matches(v)))),
        Expr::Exists(path) => Ok(scope
            .lookup(path)
            .is_some_and(|v| !matches!(v.as_ref(), Value::Null))),
        Expr::HasPermission(token) => Ok(scope.ctx.has_permission(token)),
        Expr::HasRole(role) => Ok(scope.ctx.has_role(role)),
        Expr::And(a, b) => Ok(eval_expr(a, scope)? && eval_expr(b, scope)?),
        Expr::Or(a, b) => Ok(eval_expr(a, scope)? || eval_expr(b, scope)?),
        Expr::Not(inner) => Ok(!eval_expr(inner, scope)?),
    }
}

/// Result of evaluating one rule's condition for a request.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RuleOutcome {
    /// Scoped to a different schema.
    OutOfScope,
    Matched,
    NotMatched,
    Skipped(RuleEvaluationError),
}

/// Conditions do not depend on the field, so each rule is evaluated once per
/// request. Index-aligned with `rules`.
pub(crate) fn evaluate_rules(rules: &[CompiledRule], scope: &Scope<'_>) -> Vec<RuleOutcome> {
    let schema_id = scope.schema.schema_id();
    rules
        .iter()
        .map(|rule| {
            if rule.schema.as_deref().is_some_and(|s| s != schema_id) {
                return RuleOutcome::OutOfScope;
            }
            let result = match &rule.condition {
                Ok(expr) => eval_expr(expr, scope),
                Err(parse) => Err(format!("malformed condition: {parse}")),
            };
            match result {
                Ok(true) => RuleOutcome::Matched,
                Ok(false) => RuleOutcome::NotMatched,
                Err(reason) => RuleOutcome::Skipped(RuleEvaluationError {
                    rule: rule.id.clone(),
                    reason,
                }),
            }
        })
        .collect()
}

/// Compute runtime state for every field of `schema`.
///
/// Per field, in order: patches of runtime conditionals whose gates match,
/// static defaults, the gate check for gated fields, the field's condition,
/// matching rules by ascending priority (last applied wins), then the
/// required-permission ceiling.
pub(crate) fn enrich_fields(
    schema: &ResolvedSchema,
    rules: &[CompiledRule],
    ctx: &RequestContext,
    form: &FormData,
) -> (Vec<EnrichedField>, Vec<Diagnostic>) {
    let scope = Scope::new(schema, ctx, form);
    let schema_id = schema.schema_id();
    let mut diagnostics = Vec::new();

    let outcomes = evaluate_rules(rules, &scope);
    for outcome in &outcomes {
        if let RuleOutcome::Skipped(err) = outcome {
            warn!(rule = %err.rule, reason = %err.reason, schema = %schema_id, "skipping business rule");
            diagnostics.push(Diagnostic::RuleSkipped(err.clone()));
        }
    }

    let fields = schema
        .fields()
        .iter()
        .zip(&schema.conditions)
        .map(|(base, conditions)| {
            // Matching conditionals layer their declaration over the base field.
            let mut field = Cow::Borrowed(base);
            let mut condition = &conditions.base;
            let mut any_gate = false;
            for (conditional, parsed) in base.conditionals.iter().zip(&conditions.gated) {
                if conditional.when.iter().all(|gate| scope.matches(gate)) {
                    any_gate = true;
                    field.to_mut().apply(&conditional.patch);
                    if parsed.is_some() {
                        condition = parsed;
                    }
                }
            }

            let mut runtime = Runtime::for_field(&field);
            if base.gated && !any_gate {
                runtime.visible = false;
                let gate_path = base
                    .conditionals
                    .iter()
                    .flat_map(|c| &c.when)
                    .map(|g| g.path.as_str())
                    .next()
                    .unwrap_or_default();
                runtime.reason = Some(format!("gate:{gate_path}"));
            }

            match condition {
                Some(Ok(expr)) => match eval_expr(expr, &scope) {
                    Ok(true) => {}
                    Ok(false) => {
                        runtime.visible = false;
                        runtime.reason = Some("condition".to_owned());
                    }
                    Err(reason) => {
                        warn!(field = %field.name, %reason, "field condition failed; leaving visible");
                        diagnostics.push(Diagnostic::ConditionSkipped {
                            field: field.name.clone(),
                            reason,
                        });
                    }
                },
                Some(Err(reason)) => {
                    warn!(field = %field.name, %reason, "field condition malformed; leaving visible");
                    diagnostics.push(Diagnostic::ConditionSkipped {
                        field: field.name.clone(),
                        reason: reason.clone(),
                    });
                }
                None => {}
            }

            for (rule, outcome) in rules.iter().zip(&outcomes) {
                if *outcome == RuleOutcome::Matched && rule.applies_to(schema_id, &field) {
                    rule.action.apply(&mut runtime);
                    runtime.reason = Some(rule.id.clone());
                    runtime.message.clone_from(&rule.message);
                }
            }

            if let Some(token) = &field.permission
                && !ctx.has_permission(token)
            {
                runtime.visible = false;
                runtime.editable = false;
                runtime.reason = Some(format!("permission:{token}"));
                runtime.message = None;
            }

            EnrichedField {
                field: field.into_owned(),
                runtime,
            }
        })
        .collect();

    (fields, diagnostics)
}
