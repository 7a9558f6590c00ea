use std::fmt;

use super::expr::Expr;
use super::field::{Field, FieldType, Runtime};

/// Effect a matching rule has on a field's runtime state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleAction {
    Show,
    Hide,
    Editable,
    ReadOnly,
    Require,
    Optional,
}

impl RuleAction {
    pub(crate) fn apply(self, runtime: &mut Runtime) {
        match self {
            RuleAction::Show => runtime.visible = true,
            RuleAction::Hide => runtime.visible = false,
            RuleAction::Editable => runtime.editable = true,
            RuleAction::ReadOnly => runtime.editable = false,
            RuleAction::Require => runtime.required = true,
            RuleAction::Optional => runtime.required = false,
        }
    }

    #[must_use]
    pub fn from_keyword(word: &str) -> Option<RuleAction> {
        Some(match word {
            "show" => RuleAction::Show,
            "hide" => RuleAction::Hide,
            "editable" => RuleAction::Editable,
            "readonly" => RuleAction::ReadOnly,
            "require" => RuleAction::Require,
            "optional" => RuleAction::Optional,
            _ => return None,
        })
    }
}

impl fmt::Display for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RuleAction::Show => "show",
            RuleAction::Hide => "hide",
            RuleAction::Editable => "editable",
            RuleAction::ReadOnly => "readonly",
            RuleAction::Require => "require",
            RuleAction::Optional => "optional",
        })
    }
}

/// Which fields a rule applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleTarget {
    All,
    FieldType(FieldType),
    Fields(Vec<String>),
}

impl RuleTarget {
    #[must_use]
    pub fn matches(&self, field: &Field) -> bool {
        match self {
            RuleTarget::All => true,
            RuleTarget::FieldType(t) => field.field_type == *t,
            RuleTarget::Fields(names) => names.iter().any(|n| *n == field.name),
        }
    }
}

impl fmt::Display for RuleTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleTarget::All => write!(f, "*"),
            RuleTarget::FieldType(t) => write!(f, "type:{t}"),
            RuleTarget::Fields(names) => write!(f, "{}", names.join(", ")),
        }
    }
}

/// A rule condition: an AST built in code, or DSL text parsed at compile time.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Expr(Expr),
    Source(String),
}

/// A declarative business rule.
///
/// Created via [`RuleSetBuilder`](super::RuleSetBuilder) or parsed from rule-file
/// text with [`RuleSet::from_dsl()`](super::RuleSet::from_dsl). A rule without a
/// condition always applies.
#[derive(Debug, Clone, PartialEq)]
pub struct BusinessRule {
    pub id: String,
    pub schema: Option<String>,
    pub target: RuleTarget,
    pub condition: Option<Condition>,
    pub priority: i32,
    pub action: Option<RuleAction>,
    pub message: Option<String>,
}

/// A rule after compilation. A condition that failed to parse is kept as its
/// error text so evaluation can skip the rule and report it.
#[derive(Debug, Clone)]
pub(crate) struct CompiledRule {
    pub(crate) id: String,
    pub(crate) schema: Option<String>,
    pub(crate) target: RuleTarget,
    pub(crate) condition: Result<Expr, String>,
    pub(crate) priority: i32,
    pub(crate) action: RuleAction,
    pub(crate) message: Option<String>,
    /// Declaration position; breaks priority ties.
    pub(crate) ordinal: usize,
}

impl CompiledRule {
    pub(crate) fn applies_to(&self, schema_id: &str, field: &Field) -> bool {
        self.schema.as_deref().is_none_or(|s| s == schema_id) && self.target.matches(field)
    }
}
