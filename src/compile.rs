use std::collections::{BTreeSet, HashSet};
use std::fmt::Write;

use crate::parse::parse_condition;
use crate::types::{
    BusinessRule, CompileError, CompiledRule, Condition, Expr, PathRegistry, RuleSet, RuleTarget,
    Value,
};

pub(crate) fn compile(rules: &[BusinessRule]) -> Result<RuleSet, CompileError> {
    check_duplicates(rules)?;

    let mut paths = PathRegistry::new();
    let mut compiled = Vec::with_capacity(rules.len());

    for (ordinal, rule) in rules.iter().enumerate() {
        let action = rule.action.ok_or_else(|| CompileError::MissingAction {
            rule: rule.id.clone(),
        })?;
        if let RuleTarget::Fields(names) = &rule.target
            && names.is_empty()
        {
            return Err(CompileError::EmptyTarget {
                rule: rule.id.clone(),
            });
        }

        // A condition that does not parse is kept; evaluation skips the rule.
        let condition = match &rule.condition {
            None => Ok(Expr::Literal(true)),
            Some(Condition::Expr(expr)) => Ok(expr.clone()),
            Some(Condition::Source(src)) => parse_condition(src).map_err(|e| e.to_string()),
        };
        if let Ok(expr) = &condition {
            let mut read = BTreeSet::new();
            expr.collect_paths(&mut read);
            for path in &read {
                paths.register(path);
            }
        }

        compiled.push(CompiledRule {
            id: rule.id.clone(),
            schema: rule.schema.clone(),
            target: rule.target.clone(),
            condition,
            priority: rule.priority,
            action,
            message: rule.message.clone(),
            ordinal,
        });
    }

    // Ascending priority; equal priorities keep declaration order so the later
    // declaration is applied later and wins.
    compiled.sort_by_key(|r| (r.priority, r.ordinal));

    let text = canonical_text(&compiled);
    let fingerprint = *blake3::hash(text.as_bytes()).as_bytes();

    Ok(RuleSet {
        rules: compiled,
        paths,
        fingerprint,
    })
}

fn check_duplicates(rules: &[BusinessRule]) -> Result<(), CompileError> {
    let mut seen = HashSet::new();
    for rule in rules {
        if !seen.insert(rule.id.as_str()) {
            return Err(CompileError::DuplicateRule {
                id: rule.id.clone(),
            });
        }
    }
    Ok(())
}

/// Rule-file rendering of compiled rules, in application order.
pub(crate) fn canonical_text(rules: &[CompiledRule]) -> String {
    let mut out = String::new();
    for rule in rules {
        let _ = write!(out, "rule {} (priority {})", rule.id, rule.priority);
        if let Some(schema) = &rule.schema {
            let _ = write!(out, " schema {schema}");
        }
        let _ = write!(out, " on {}:\n    ", rule.target);
        match &rule.condition {
            Ok(expr) => {
                let _ = write!(out, "{expr}");
            }
            Err(err) => {
                let _ = write!(out, "false # malformed: {}", err.replace('\n', " "));
            }
        }
        let _ = write!(out, "\n    => {}", rule.action);
        if let Some(message) = &rule.message {
            let _ = write!(out, " {}", Value::from(message.as_str()));
        }
        out.push('\n');
    }
    out
}
