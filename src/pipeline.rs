use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::cache::{CacheManager, CacheStats, EnrichedCacheKey};
use crate::config::{ConfigError, PipelineConfig};
use crate::error::PipelineError;
use crate::evaluate::enrich_fields;
use crate::flatten::flatten;
use crate::resolve::{referenced_documents, resolve_references};
use crate::store::{MemoryOverrideStore, SchemaStore, StoreError, TenantOverrideStore};
use crate::tenant::apply_overrides;
use crate::types::{
    Diagnostic, EnrichedSchema, FormData, RequestContext, ResolvedSchema, RuleRegistry, RuleSet,
    SchemaDocument, TenantOverride, short_hex,
};

/// Where a pipeline run is. Runs move strictly forward; any stage may fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    NotStarted,
    ResolvingReferences,
    FlatteningComposition,
    EvaluatingRules,
    ApplyingTenantOverrides,
    Complete,
    Failed,
}

impl PipelineStage {
    /// The stage that follows `self` on success.
    #[must_use]
    pub fn successor(self) -> Option<PipelineStage> {
        match self {
            PipelineStage::NotStarted => Some(PipelineStage::ResolvingReferences),
            PipelineStage::ResolvingReferences => Some(PipelineStage::FlatteningComposition),
            PipelineStage::FlatteningComposition => Some(PipelineStage::EvaluatingRules),
            PipelineStage::EvaluatingRules => Some(PipelineStage::ApplyingTenantOverrides),
            PipelineStage::ApplyingTenantOverrides => Some(PipelineStage::Complete),
            PipelineStage::Complete | PipelineStage::Failed => None,
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::NotStarted => "not_started",
            PipelineStage::ResolvingReferences => "resolving_references",
            PipelineStage::FlatteningComposition => "flattening_composition",
            PipelineStage::EvaluatingRules => "evaluating_rules",
            PipelineStage::ApplyingTenantOverrides => "applying_tenant_overrides",
            PipelineStage::Complete => "complete",
            PipelineStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Stage tracker for one request.
#[derive(Debug)]
pub(crate) struct Run<'a> {
    schema_id: &'a str,
    stage: PipelineStage,
}

impl<'a> Run<'a> {
    pub(crate) fn new(schema_id: &'a str) -> Self {
        Self {
            schema_id,
            stage: PipelineStage::NotStarted,
        }
    }

    /// Pick up a run whose earlier stages happened elsewhere.
    pub(crate) fn resumed(schema_id: &'a str, stage: PipelineStage) -> Self {
        Self { schema_id, stage }
    }

    #[cfg(test)]
    pub(crate) fn stage(&self) -> PipelineStage {
        self.stage
    }

    pub(crate) fn advance(&mut self, next: PipelineStage) {
        debug_assert_eq!(self.stage.successor(), Some(next), "out-of-order stage");
        debug!(schema = self.schema_id, from = %self.stage, to = %next, "pipeline stage");
        self.stage = next;
    }

    /// Finish early, e.g. on an enriched cache hit.
    pub(crate) fn complete(&mut self) {
        debug!(schema = self.schema_id, from = %self.stage, "pipeline complete");
        self.stage = PipelineStage::Complete;
    }

    pub(crate) fn fail(&mut self, err: PipelineError) -> PipelineError {
        debug!(schema = self.schema_id, stage = %self.stage, error = %err, "pipeline failed");
        self.stage = PipelineStage::Failed;
        err
    }
}

/// Resolve and flatten `root` from an already fetched document set.
///
/// # Errors
///
/// Any resolution or flattening [`PipelineError`].
pub fn resolve_schema(
    root: &str,
    documents: &HashMap<String, SchemaDocument>,
    max_depth: usize,
) -> Result<ResolvedSchema, PipelineError> {
    let mut run = Run::new(root);
    run.advance(PipelineStage::ResolvingReferences);
    resolve_in(&mut run, root, documents, max_depth)
}

fn resolve_in(
    run: &mut Run<'_>,
    root: &str,
    documents: &HashMap<String, SchemaDocument>,
    max_depth: usize,
) -> Result<ResolvedSchema, PipelineError> {
    let doc = documents.get(root).ok_or_else(|| {
        run.fail(PipelineError::Reference {
            pointer: root.to_owned(),
            referenced_from: root.to_owned(),
        })
    })?;
    let tree = resolve_references(root, documents, max_depth).map_err(|e| run.fail(e))?;

    run.advance(PipelineStage::FlatteningComposition);
    let fields = flatten(&tree, &doc.constants, &doc.kind).map_err(|e| run.fail(e))?;

    let source_hash = doc.content_hash().map_err(|e| run.fail(e.into()))?;
    let mut dependencies = Vec::new();
    for (id, other) in documents {
        if id != root {
            let hash = other.content_hash().map_err(|e| run.fail(e.into()))?;
            dependencies.push((id.clone(), hash));
        }
    }
    dependencies.sort();

    Ok(ResolvedSchema::new(
        doc.id.clone(),
        doc.version.clone(),
        doc.kind.clone(),
        source_hash,
        dependencies,
        fields,
    ))
}

/// Compute runtime state and merge overrides: the pure core of enrichment.
#[must_use]
pub fn enrich_schema(
    resolved: &ResolvedSchema,
    rules: &RuleSet,
    ctx: &RequestContext,
    form: &FormData,
    overrides: &[TenantOverride],
) -> EnrichedSchema {
    let mut enriched = evaluate_stage(resolved, rules, ctx, form);
    apply_overrides(&mut enriched, overrides);
    enriched
}

fn evaluate_stage(
    resolved: &ResolvedSchema,
    rules: &RuleSet,
    ctx: &RequestContext,
    form: &FormData,
) -> EnrichedSchema {
    let (fields, diagnostics) = enrich_fields(resolved, &rules.rules, ctx, form);
    EnrichedSchema {
        schema_id: resolved.schema_id().to_owned(),
        kind: resolved.kind().to_owned(),
        source_hash: resolved.source_hash(),
        tenant_id: ctx.tenant_id().to_owned(),
        fields,
        diagnostics,
    }
}

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    config: PipelineConfig,
    schemas: Arc<dyn SchemaStore>,
    overrides: Arc<dyn TenantOverrideStore>,
    rules: Arc<RuleRegistry>,
    cache: Option<Arc<CacheManager>>,
}

impl PipelineBuilder {
    #[must_use]
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn overrides(mut self, store: Arc<dyn TenantOverrideStore>) -> Self {
        self.overrides = store;
        self
    }

    #[must_use]
    pub fn rules(mut self, registry: Arc<RuleRegistry>) -> Self {
        self.rules = registry;
        self
    }

    /// Share a cache manager between pipelines. Defaults to a fresh one sized
    /// from the config.
    #[must_use]
    pub fn cache(mut self, cache: Arc<CacheManager>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the config fails validation.
    pub fn build(self) -> Result<Pipeline, ConfigError> {
        self.config.validate()?;
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(CacheManager::new(&self.config.cache)));
        Ok(Pipeline {
            config: self.config,
            schemas: self.schemas,
            overrides: self.overrides,
            rules: self.rules,
            cache,
        })
    }
}

/// Entry point: fetches, resolves, enriches and caches schemas.
///
/// Every collaborator is injected; cloning a `Pipeline` shares them.
#[derive(Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    schemas: Arc<dyn SchemaStore>,
    overrides: Arc<dyn TenantOverrideStore>,
    rules: Arc<RuleRegistry>,
    cache: Arc<CacheManager>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("rules", &self.rules.current())
            .field("cache", &self.cache.stats())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    #[must_use]
    pub fn builder(schemas: Arc<dyn SchemaStore>) -> PipelineBuilder {
        PipelineBuilder {
            config: PipelineConfig::default(),
            schemas,
            overrides: Arc::new(MemoryOverrideStore::new()),
            rules: Arc::new(RuleRegistry::default()),
            cache: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub fn rules(&self) -> &Arc<RuleRegistry> {
        &self.rules
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Fetch, resolve and flatten `schema_id`, serving from the resolved cache
    /// when the root and every dependency are unchanged.
    ///
    /// # Errors
    ///
    /// [`PipelineError::StoreUnavailable`] when a document fetch fails or
    /// times out, [`PipelineError::TooManyDocuments`] past `max_documents`, and
    /// any resolution or flattening error.
    pub async fn resolve(&self, schema_id: &str) -> Result<Arc<ResolvedSchema>, PipelineError> {
        let mut run = Run::new(schema_id);
        run.advance(PipelineStage::ResolvingReferences);
        self.resolve_run(&mut run, schema_id).await
    }

    async fn resolve_run(
        &self,
        run: &mut Run<'_>,
        schema_id: &str,
    ) -> Result<Arc<ResolvedSchema>, PipelineError> {
        let documents = self.fetch_documents(schema_id).await.map_err(|e| run.fail(e))?;
        let root = documents.get(schema_id).ok_or_else(|| {
            run.fail(PipelineError::Reference {
                pointer: schema_id.to_owned(),
                referenced_from: schema_id.to_owned(),
            })
        })?;
        let hash = root.content_hash().map_err(|e| run.fail(e.into()))?;

        if let Some(cached) = self.cache.resolved().get(&hash)
            && dependencies_current(&cached, schema_id, &documents)
        {
            run.advance(PipelineStage::FlatteningComposition);
            return Ok(cached);
        }

        let resolved = Arc::new(resolve_in(run, schema_id, &documents, self.config.max_depth)?);
        self.cache.resolved().insert(hash, Arc::clone(&resolved));
        Ok(resolved)
    }

    /// Breadth-first fetch of the root and everything it points at.
    async fn fetch_documents(
        &self,
        schema_id: &str,
    ) -> Result<HashMap<String, SchemaDocument>, PipelineError> {
        let mut documents = HashMap::new();
        let mut queue = VecDeque::from([(schema_id.to_owned(), schema_id.to_owned())]);
        while let Some((id, referenced_from)) = queue.pop_front() {
            if documents.contains_key(&id) {
                continue;
            }
            if documents.len() >= self.config.max_documents {
                return Err(PipelineError::TooManyDocuments {
                    max: self.config.max_documents,
                });
            }
            let doc = self.fetch_document(&id, &referenced_from).await?;
            for next in referenced_documents(&doc) {
                if !documents.contains_key(&next) {
                    queue.push_back((next, id.clone()));
                }
            }
            documents.insert(id, doc);
        }
        Ok(documents)
    }

    async fn fetch_document(
        &self,
        id: &str,
        referenced_from: &str,
    ) -> Result<SchemaDocument, PipelineError> {
        let limit = self.config.fetch_timeout();
        match timeout(limit, self.schemas.get(id)).await {
            Ok(Ok(doc)) => Ok(doc),
            Ok(Err(StoreError::NotFound(_))) => Err(PipelineError::Reference {
                pointer: id.to_owned(),
                referenced_from: referenced_from.to_owned(),
            }),
            Ok(Err(StoreError::Unavailable(reason))) => Err(PipelineError::StoreUnavailable {
                schema_id: id.to_owned(),
                reason,
            }),
            Err(_) => Err(PipelineError::StoreUnavailable {
                schema_id: id.to_owned(),
                reason: format!("timed out after {}ms", limit.as_millis()),
            }),
        }
    }

    /// Compute the enriched schema for one request.
    ///
    /// Served from the enriched cache when enabled and the request is in
    /// standard mode. Override fetch failures fail open: the schema is
    /// returned without overrides, with a diagnostic, and is not cached.
    ///
    /// # Errors
    ///
    /// Currently infallible once a schema is resolved; the `Result` leaves
    /// room for stages that can fail.
    pub async fn enrich(
        &self,
        resolved: &ResolvedSchema,
        ctx: &RequestContext,
        form: &FormData,
    ) -> Result<Arc<EnrichedSchema>, PipelineError> {
        let mut run = Run::resumed(resolved.schema_id(), PipelineStage::FlatteningComposition);
        self.enrich_run(&mut run, resolved, ctx, form).await
    }

    async fn enrich_run(
        &self,
        run: &mut Run<'_>,
        resolved: &ResolvedSchema,
        ctx: &RequestContext,
        form: &FormData,
    ) -> Result<Arc<EnrichedSchema>, PipelineError> {
        let rules = self.rules.current();
        let key = self.key_for(resolved, &rules, ctx, form);
        let fingerprint = ctx.permission_fingerprint();
        debug!(
            schema = resolved.schema_id(),
            tenant = ctx.tenant_id(),
            fingerprint = %short_hex(&fingerprint),
            cached = key.is_some(),
            "enriching schema"
        );

        if let (Some(key), Some(cache)) = (&key, self.cache.enriched())
            && let Some(hit) = cache.get(key)
        {
            run.complete();
            return Ok(hit);
        }

        run.advance(PipelineStage::EvaluatingRules);
        let mut enriched = evaluate_stage(resolved, &rules, ctx, form);

        run.advance(PipelineStage::ApplyingTenantOverrides);
        let cacheable = match self.load_overrides(resolved.schema_id(), ctx.tenant_id()).await {
            Ok(overrides) => {
                apply_overrides(&mut enriched, &overrides);
                true
            }
            Err(reason) => {
                warn!(
                    schema = resolved.schema_id(),
                    tenant = ctx.tenant_id(),
                    %reason,
                    "tenant overrides unavailable; serving defaults"
                );
                enriched
                    .diagnostics
                    .push(Diagnostic::OverridesUnavailable { reason });
                false
            }
        };

        run.advance(PipelineStage::Complete);
        let enriched = Arc::new(enriched);
        if cacheable
            && let (Some(key), Some(cache)) = (key, self.cache.enriched())
        {
            cache.insert(key, Arc::clone(&enriched));
        }
        Ok(enriched)
    }

    async fn load_overrides(
        &self,
        schema_id: &str,
        tenant_id: &str,
    ) -> Result<Arc<Vec<TenantOverride>>, String> {
        let key = (schema_id.to_owned(), tenant_id.to_owned());
        if let Some(hit) = self.cache.overrides().get(&key) {
            return Ok(hit);
        }
        let limit = self.config.override_timeout();
        let overrides = match timeout(limit, self.overrides.list(schema_id, tenant_id)).await {
            Ok(Ok(list)) => Arc::new(list),
            Ok(Err(err)) => return Err(err.to_string()),
            Err(_) => return Err(format!("timed out after {}ms", limit.as_millis())),
        };
        self.cache.overrides().insert(key, Arc::clone(&overrides));
        Ok(overrides)
    }

    /// Resolve `schema_id` and enrich it for one request.
    ///
    /// # Errors
    ///
    /// As [`resolve`](Self::resolve).
    pub async fn get_enriched_schema(
        &self,
        schema_id: &str,
        ctx: &RequestContext,
        form: &FormData,
    ) -> Result<Arc<EnrichedSchema>, PipelineError> {
        let mut run = Run::new(schema_id);
        run.advance(PipelineStage::ResolvingReferences);
        let resolved = self.resolve_run(&mut run, schema_id).await?;
        self.enrich_run(&mut run, &resolved, ctx, form).await
    }

    /// Key the enriched cache would use for this request; `None` when the
    /// cache is disabled or the request bypasses it.
    #[must_use]
    pub fn enriched_cache_key(
        &self,
        resolved: &ResolvedSchema,
        ctx: &RequestContext,
        form: &FormData,
    ) -> Option<EnrichedCacheKey> {
        self.key_for(resolved, &self.rules.current(), ctx, form)
    }

    fn key_for(
        &self,
        resolved: &ResolvedSchema,
        rules: &RuleSet,
        ctx: &RequestContext,
        form: &FormData,
    ) -> Option<EnrichedCacheKey> {
        self.cache.enriched()?;
        EnrichedCacheKey::for_request(resolved, rules, ctx, form)
    }
}

fn dependencies_current(
    cached: &ResolvedSchema,
    root: &str,
    documents: &HashMap<String, SchemaDocument>,
) -> bool {
    let others = documents.keys().filter(|id| id.as_str() != root).count();
    others == cached.dependencies().len()
        && cached.dependencies().iter().all(|(id, hash)| {
            documents
                .get(id)
                .and_then(|doc| doc.content_hash().ok())
                .is_some_and(|current| current == *hash)
        })
}
