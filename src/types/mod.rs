mod context;
mod error;
mod evaluation_report;
mod expr;
mod field;
mod path_registry;
mod rule;
mod ruleset;
mod schema;
mod tenant;
mod value;

pub use context::{AccessMode, Attributes, FormData, RequestContext};
pub(crate) use context::short_hex;
pub use error::{CompileError, RuleEvaluationError};
pub use evaluation_report::EvaluationReport;
pub use expr::{CompareOp, Expr, PathExpr, has_permission, has_role, path};
pub use field::{
    Discriminator, Field, FieldDef, FieldType, Runtime, RuntimeConditional, ValidationRule,
    ValidationSet,
};
pub use path_registry::PathRegistry;
pub(crate) use rule::CompiledRule;
pub use rule::{BusinessRule, Condition, RuleAction, RuleTarget};
pub use ruleset::{RuleBuilder, RuleRegistry, RuleSet, RuleSetBuilder};
pub use schema::{
    Constituent, ContentHash, Diagnostic, EnrichedField, EnrichedSchema, Node, RefKey,
    ResolvedSchema, SchemaDocument,
};
pub use tenant::TenantOverride;
pub use value::Value;
