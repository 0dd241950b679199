//! Capability contracts consumed by the pipeline, plus the pattern helpers
//! and cache that sit in front of a [`QueryPatternGenerator`].

mod cache;
mod capabilities;
mod patterns;

pub use cache::{
    generate_cache_key, CachedPatternGenerator, InMemoryPatternCache, PatternCache,
    PatternCacheStats,
};
pub use capabilities::{
    ContentExtractor, CrawlDecision, DecisionMaker, ExtractionResult, QueryPatternGenerator,
    WebCrawler, WebSearcher,
};
pub use patterns::{
    validate_patterns, FallbackPatternGenerator, PatternQueryBuilder, ValidatedPatternGenerator,
    ENTITY_PLACEHOLDER, MAX_PATTERNS, MAX_PATTERN_CHARS,
};
