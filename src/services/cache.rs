//! Pattern caching keyed by the column set.
//!
//! Patterns depend only on which columns are being enriched, so a job with
//! thousands of rows only needs one generator call per distinct column set.
//! Retry attempts bypass the cache because their feedback makes the output
//! row specific.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::capabilities::QueryPatternGenerator;
use crate::error::CapabilityError;
use crate::feedback::EnrichmentFeedback;
use crate::models::ColumnMetadata;

/// Storage for generated pattern lists.
///
/// Implementations must hand out copies: a caller mutating what `get`
/// returned must not affect later lookups.
pub trait PatternCache: Send + Sync {
    fn get(&self, key: &str) -> Option<Vec<String>>;

    fn set(&self, key: &str, patterns: &[String]);
}

/// Hit and miss counters for a [`PatternCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatternCacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl PatternCacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// `RwLock`-guarded in-memory [`PatternCache`].
#[derive(Debug, Default)]
pub struct InMemoryPatternCache {
    entries: RwLock<HashMap<String, Vec<String>>>,
    stats: RwLock<PatternCacheStats>,
}

impl InMemoryPatternCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> PatternCacheStats {
        *self
            .stats
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, hit: bool) {
        let mut stats = self
            .stats
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if hit {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
    }
}

impl PatternCache for InMemoryPatternCache {
    fn get(&self, key: &str) -> Option<Vec<String>> {
        let found = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned();
        self.record(found.is_some());
        found
    }

    fn set(&self, key: &str, patterns: &[String]) {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string(), patterns.to_vec());
    }
}

/// Hex SHA-256 over the column set, independent of column order.
pub fn generate_cache_key(columns: &[ColumnMetadata]) -> String {
    let mut sorted: Vec<&ColumnMetadata> = columns.iter().collect();
    sorted.sort_by(|a, b| {
        (&a.name, a.column_type, &a.description).cmp(&(&b.name, b.column_type, &b.description))
    });

    // Serializing plain structs of strings cannot fail.
    let canonical = serde_json::to_vec(&sorted).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    hex::encode(hasher.finalize())
}

/// Wraps a generator with a [`PatternCache`].
pub struct CachedPatternGenerator {
    inner: Arc<dyn QueryPatternGenerator>,
    cache: Arc<dyn PatternCache>,
}

impl CachedPatternGenerator {
    pub fn new(inner: Arc<dyn QueryPatternGenerator>, cache: Arc<dyn PatternCache>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl QueryPatternGenerator for CachedPatternGenerator {
    async fn generate_patterns(
        &self,
        columns: &[ColumnMetadata],
        feedback: Option<&EnrichmentFeedback>,
    ) -> Result<Vec<String>, CapabilityError> {
        if feedback.is_some_and(|fb| fb.is_retry()) {
            return self.inner.generate_patterns(columns, feedback).await;
        }

        let key = generate_cache_key(columns);
        let short_key = &key[..16];

        if let Some(patterns) = self.cache.get(&key) {
            tracing::debug!(cache_key = short_key, "Pattern cache hit");
            return Ok(patterns);
        }
        tracing::debug!(cache_key = short_key, "Pattern cache miss");

        let patterns = self.inner.generate_patterns(columns, feedback).await?;
        self.cache.set(&key, &patterns);
        Ok(patterns)
    }
}
