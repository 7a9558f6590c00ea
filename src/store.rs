use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{SchemaDocument, TenantOverride};

/// Failure reported by an external store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("'{0}' not found")]
    NotFound(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Source of raw schema documents.
#[async_trait]
pub trait SchemaStore: Send + Sync {
    async fn get(&self, schema_id: &str) -> Result<SchemaDocument, StoreError>;
}

/// Source of per-tenant content overrides.
#[async_trait]
pub trait TenantOverrideStore: Send + Sync {
    async fn list(&self, schema_id: &str, tenant_id: &str)
    -> Result<Vec<TenantOverride>, StoreError>;
}

/// In-process [`SchemaStore`] for tests and demos.
#[derive(Debug, Default)]
pub struct MemorySchemaStore {
    documents: RwLock<HashMap<String, SchemaDocument>>,
    latency: Option<Duration>,
    fetches: AtomicUsize,
}

impl MemorySchemaStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every fetch by `latency` (tokio time).
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    #[must_use]
    pub fn with(self, document: SchemaDocument) -> Self {
        self.insert(document);
        self
    }

    /// Add or replace a document.
    pub fn insert(&self, document: SchemaDocument) {
        self.documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(document.id.clone(), document);
    }

    /// Number of `get` calls served so far.
    #[must_use]
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SchemaStore for MemorySchemaStore {
    async fn get(&self, schema_id: &str) -> Result<SchemaDocument, StoreError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(schema_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(schema_id.to_owned()))
    }
}

/// In-process [`TenantOverrideStore`] for tests and demos.
#[derive(Debug, Default)]
pub struct MemoryOverrideStore {
    overrides: RwLock<Vec<TenantOverride>>,
    latency: Option<Duration>,
    unavailable: AtomicBool,
}

impl MemoryOverrideStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    #[must_use]
    pub fn with(self, o: TenantOverride) -> Self {
        self.push(o);
        self
    }

    pub fn push(&self, o: TenantOverride) {
        self.overrides
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(o);
    }

    /// Make every `list` call fail until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }
}

#[async_trait]
impl TenantOverrideStore for MemoryOverrideStore {
    async fn list(
        &self,
        schema_id: &str,
        tenant_id: &str,
    ) -> Result<Vec<TenantOverride>, StoreError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("override store offline".to_owned()));
        }
        Ok(self
            .overrides
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|o| o.schema_id == schema_id && o.tenant_id == tenant_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_schema_store() {
        let store = MemorySchemaStore::new().with(SchemaDocument::new("a"));
        assert_eq!(store.get("a").await.unwrap().id, "a");
        assert_eq!(
            store.get("b").await,
            Err(StoreError::NotFound("b".into()))
        );
        assert_eq!(store.fetches(), 2);
    }

    #[tokio::test]
    async fn memory_override_store_filters() {
        let store = MemoryOverrideStore::new()
            .with(TenantOverride::new("s", "acme", "x").label("A"))
            .with(TenantOverride::new("s", "globex", "x").label("G"))
            .with(TenantOverride::new("t", "acme", "x").label("T"));
        let found = store.list("s", "acme").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].label.as_deref(), Some("A"));

        store.set_unavailable(true);
        assert!(matches!(
            store.list("s", "acme").await,
            Err(StoreError::Unavailable(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn latency_uses_tokio_time() {
        let store = MemorySchemaStore::new()
            .with_latency(Duration::from_secs(5))
            .with(SchemaDocument::new("a"));
        let start = tokio::time::Instant::now();
        store.get("a").await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
    }
}
