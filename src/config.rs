use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest accepted tenant-override TTL.
pub const MAX_OVERRIDE_TTL_MINUTES: u64 = 24 * 60;

/// Longest accepted enriched-schema TTL.
pub const MAX_ENRICHED_TTL_SECONDS: u64 = 3600;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("{field} must be {requirement}")]
    Invalid {
        field: &'static str,
        requirement: &'static str,
    },
}

/// Pipeline limits and cache sizing.
///
/// ```toml
/// max_depth = 32
/// max_documents = 64
/// fetch_timeout_ms = 2000
/// override_timeout_ms = 500
///
/// [cache.resolved]
/// capacity = 256
///
/// [cache.overrides]
/// capacity = 1024
/// ttl_minutes = 5
///
/// [cache.enriched]
/// enabled = true
/// capacity = 4096
/// ttl_seconds = 30
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Maximum number of pointer hops on the resolution stack.
    pub max_depth: usize,
    /// Maximum number of documents one schema may pull in, root included.
    pub max_documents: usize,
    pub fetch_timeout_ms: u64,
    pub override_timeout_ms: u64,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub resolved: ResolvedCacheConfig,
    pub overrides: OverrideCacheConfig,
    pub enriched: EnrichedCacheConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolvedCacheConfig {
    pub capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OverrideCacheConfig {
    pub capacity: usize,
    pub ttl_minutes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnrichedCacheConfig {
    pub enabled: bool,
    pub capacity: usize,
    pub ttl_seconds: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_depth: 32,
            max_documents: 64,
            fetch_timeout_ms: 2_000,
            override_timeout_ms: 500,
            cache: CacheConfig::default(),
        }
    }
}

impl Default for ResolvedCacheConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

impl Default for OverrideCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            ttl_minutes: 5,
        }
    }
}

impl Default for EnrichedCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 4096,
            ttl_seconds: 30,
        }
    }
}

impl PipelineConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a TOML document. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Toml`] for malformed input or unknown keys and
    /// [`ConfigError::Invalid`] when a value is out of range.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    ///
    /// # Errors
    ///
    /// As [`from_toml_str`](Self::from_toml_str), plus [`ConfigError::Io`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let input = std::fs::read_to_string(path)?;
        Self::from_toml_str(&input)
    }

    /// # Errors
    ///
    /// Returns the first out-of-range setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(bool, &'static str, &'static str); 8] = [
            (self.max_depth > 0, "max_depth", "greater than zero"),
            (self.max_documents > 0, "max_documents", "greater than zero"),
            (self.fetch_timeout_ms > 0, "fetch_timeout_ms", "greater than zero"),
            (self.override_timeout_ms > 0, "override_timeout_ms", "greater than zero"),
            (self.cache.resolved.capacity > 0, "cache.resolved.capacity", "greater than zero"),
            (self.cache.overrides.capacity > 0, "cache.overrides.capacity", "greater than zero"),
            (
                self.cache.overrides.ttl_minutes <= MAX_OVERRIDE_TTL_MINUTES,
                "cache.overrides.ttl_minutes",
                "at most 1440",
            ),
            (
                !self.cache.enriched.enabled
                    || (self.cache.enriched.capacity > 0
                        && self.cache.enriched.ttl_seconds <= MAX_ENRICHED_TTL_SECONDS),
                "cache.enriched",
                "a non-zero capacity with ttl_seconds at most 3600",
            ),
        ];
        match checks.into_iter().find(|(ok, _, _)| !ok) {
            Some((_, field, requirement)) => Err(ConfigError::Invalid { field, requirement }),
            None => Ok(()),
        }
    }

    #[must_use]
    pub const fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    #[must_use]
    pub const fn with_max_documents(mut self, max_documents: usize) -> Self {
        self.max_documents = max_documents;
        self
    }

    #[must_use]
    pub const fn with_fetch_timeout_ms(mut self, ms: u64) -> Self {
        self.fetch_timeout_ms = ms;
        self
    }

    #[must_use]
    pub const fn with_override_timeout_ms(mut self, ms: u64) -> Self {
        self.override_timeout_ms = ms;
        self
    }

    #[must_use]
    pub const fn with_resolved_capacity(mut self, capacity: usize) -> Self {
        self.cache.resolved.capacity = capacity;
        self
    }

    #[must_use]
    pub const fn with_override_cache(mut self, capacity: usize, ttl_minutes: u64) -> Self {
        self.cache.overrides.capacity = capacity;
        self.cache.overrides.ttl_minutes = ttl_minutes;
        self
    }

    #[must_use]
    pub const fn with_enriched_cache(mut self, capacity: usize, ttl_seconds: u64) -> Self {
        self.cache.enriched.enabled = true;
        self.cache.enriched.capacity = capacity;
        self.cache.enriched.ttl_seconds = ttl_seconds;
        self
    }

    #[must_use]
    pub const fn without_enriched_cache(mut self) -> Self {
        self.cache.enriched.enabled = false;
        self
    }

    #[must_use]
    pub const fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    #[must_use]
    pub const fn override_timeout(&self) -> Duration {
        Duration::from_millis(self.override_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            max_depth = 8

            [cache.overrides]
            ttl_minutes = 15
            "#,
        )
        .unwrap();
        assert_eq!(config.max_depth, 8);
        assert_eq!(config.max_documents, 64);
        assert_eq!(config.cache.overrides.ttl_minutes, 15);
        assert_eq!(config.cache.overrides.capacity, 1024);
        assert!(config.cache.enriched.enabled);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = PipelineConfig::from_toml_str("max_dept = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = PipelineConfig::from_toml_str("[cache.resolved]\ncapacity = 0").unwrap_err();
        assert_eq!(err.to_string(), "cache.resolved.capacity must be greater than zero");
    }

    #[test]
    fn ttl_ceiling() {
        let err = PipelineConfig::from_toml_str("[cache.enriched]\nttl_seconds = 7200").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "cache.enriched", .. }));
        PipelineConfig::from_toml_str("[cache.enriched]\nenabled = false\nttl_seconds = 7200")
            .unwrap();
    }

    #[test]
    fn builders() {
        let config = PipelineConfig::new()
            .with_max_depth(4)
            .with_fetch_timeout_ms(50)
            .without_enriched_cache();
        assert_eq!(config.max_depth, 4);
        assert_eq!(config.fetch_timeout(), Duration::from_millis(50));
        assert!(!config.cache.enriched.enabled);
    }

    #[test]
    fn reads_from_file() {
        let path = std::env::temp_dir().join(format!("formwright-config-{}.toml", std::process::id()));
        std::fs::write(&path, "max_documents = 3\n").unwrap();
        let config = PipelineConfig::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.max_documents, 3);
    }
}
