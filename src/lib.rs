mod cache;
mod compile;
mod config;
mod error;
mod evaluate;
mod flatten;
mod parse;
mod pipeline;
mod resolve;
#[cfg(feature = "binary-cache")]
mod serial;
mod store;
mod tenant;
mod types;

pub use cache::{Cache, CacheManager, CacheStats, DomainStats, EnrichedCacheKey};
pub use config::{
    CacheConfig, ConfigError, EnrichedCacheConfig, OverrideCacheConfig, PipelineConfig,
    ResolvedCacheConfig,
};
pub use error::{PipelineError, RuleSetError};
pub use flatten::flatten;
pub use parse::{ParseError, parse_condition};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineStage, enrich_schema, resolve_schema};
pub use resolve::{ResolvedConstituent, ResolvedNode, referenced_documents, resolve_references};
#[cfg(feature = "binary-cache")]
pub use serial::{DeserializeError, SerializeError};
pub use store::{
    MemoryOverrideStore, MemorySchemaStore, SchemaStore, StoreError, TenantOverrideStore,
};
pub use tenant::apply_overrides;
pub use types::{
    AccessMode, Attributes, BusinessRule, CompareOp, CompileError, Condition, Constituent,
    ContentHash, Diagnostic, Discriminator, EnrichedField, EnrichedSchema, EvaluationReport, Expr,
    Field, FieldDef, FieldType, FormData, Node, PathExpr, PathRegistry, RefKey, RequestContext,
    ResolvedSchema, RuleAction, RuleBuilder, RuleEvaluationError, RuleRegistry, RuleSet,
    RuleSetBuilder, RuleTarget, Runtime, RuntimeConditional, SchemaDocument, TenantOverride,
    ValidationRule, ValidationSet, Value, has_permission, has_role, path,
};
