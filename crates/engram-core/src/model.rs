//! Data model — memory records, candidates, and configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Maximum content length in characters; longer content is truncated at
/// admission time.
pub const MAX_CONTENT_CHARS: usize = 500;

/// Default category set recognized by a fresh [`Config`].
pub const DEFAULT_CATEGORIES: &[&str] = &["fact", "preference", "skill", "episode", "context"];

/// Milliseconds since the Unix epoch. Only [`crate::engine::Engine`] reads
/// the system clock directly (overridable for tests); everything else just
/// passes `now` through, so this alias documents the unit without binding
/// the data model to a particular time library.
pub type Millis = i64;

/// A single prior snapshot of a memory's content/metadata, recorded on merge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// The content at the time of the snapshot.
    pub content: String,
    /// The metadata at the time of the snapshot.
    pub metadata: HashMap<String, serde_json::Value>,
    /// Why the snapshot was recorded (e.g. `"merged"`).
    pub reason: String,
    /// When the snapshot was recorded.
    pub recorded_at: Millis,
}

/// A unit of persistence and ranking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    /// Opaque unique identifier (UUID-shaped string). Immutable after creation.
    pub id: String,
    /// Atomic fact as a short string (≤ [`MAX_CONTENT_CHARS`] chars).
    pub content: String,
    /// One of the configured categories; unknown categories collapse to `"fact"`.
    pub category: String,
    /// Free-form tag identifying ingestion origin.
    pub source: String,
    /// Novelty score at time of admission, in `[0, 1]`. Immutable.
    pub surprise: f32,
    /// Base importance (`surprise * category_boost`), in `[0, ∞)`.
    pub importance: f32,
    /// Incremented on every successful recall that returns this record.
    pub access_count: u32,
    /// Millisecond timestamp of most recent read.
    pub last_accessed: Millis,
    /// Millisecond timestamp of admission. Immutable.
    pub created_at: Millis,
    /// Optional fixed-length embedding vector. Set at admission; recomputed
    /// on import.
    pub embedding: Option<Vec<f32>>,
    /// Free-form metadata, including merge provenance (`mergedFrom`).
    pub metadata: HashMap<String, serde_json::Value>,
    /// Logical partition label; all operations are namespace-scoped.
    pub namespace: String,
    /// Optional lifetime in seconds from creation.
    pub ttl: Option<u64>,
    /// Millisecond timestamp the record expires at, derived from `ttl` or
    /// the configured global retention.
    pub expires_at: Option<Millis>,
    /// Incremented on merge.
    pub version: u32,
    /// Ordered list of prior content/metadata snapshots, capped at
    /// [`Config::max_history_per_memory`].
    pub history: Vec<HistoryEntry>,
}

impl Memory {
    /// `true` once `now >= expires_at` (when `expires_at` is set).
    pub fn is_expired(&self, now: Millis) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }
}

/// A pre-admission candidate: content plus category, trimmed and validated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    /// The proposed content (trimmed, truncated to [`MAX_CONTENT_CHARS`]).
    pub content: String,
    /// The proposed category; collapses to `"fact"` if not in [`Config::categories`].
    pub category: String,
}

impl Candidate {
    /// Build a candidate, trimming content and truncating it to
    /// [`MAX_CONTENT_CHARS`] characters.
    pub fn new(content: impl Into<String>, category: impl Into<String>) -> Self {
        let content = content.into();
        let trimmed = content.trim();
        let truncated: String = trimmed.chars().take(MAX_CONTENT_CHARS).collect();
        Self {
            content: truncated,
            category: category.into(),
        }
    }
}

/// Weights applied during retrieval scoring. Not required to sum
/// to 1 — see "Weighted scoring normalization".
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalWeights {
    /// Weight on query/content relevance.
    pub relevance: f32,
    /// Weight on decayed importance.
    pub importance: f32,
    /// Weight on recency.
    pub recency: f32,
    /// Weight on access frequency.
    pub access_frequency: f32,
}

impl Default for RetrievalWeights {
    fn default() -> Self {
        Self {
            relevance: 0.5,
            importance: 0.3,
            recency: 0.2,
            access_frequency: 0.0,
        }
    }
}

/// Process-wide defaults, overridable per engine instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Minimum surprise for admission via the extraction pipeline.
    pub surprise_threshold: f32,
    /// Multiplier applied to surprise to produce importance, per category.
    pub importance_boost: HashMap<String, f32>,
    /// The admissible category set.
    pub categories: Vec<String>,
    /// Half-life of the exponential importance decay, in days.
    pub decay_half_life_days: f64,
    /// Hard upper bound on record age when no `ttl` is set, in days.
    pub max_retention_days: f64,
    /// Capacity trigger for capacity-driven pruning.
    pub max_memories: usize,
    /// Default number of results for recall.
    pub default_k: usize,
    /// Weights applied during retrieval scoring.
    pub retrieval_weights: RetrievalWeights,
    /// Active partition for this engine instance.
    pub namespace: String,
    /// Whether merges append to `history`.
    pub track_history: bool,
    /// Maximum history entries retained per memory; oldest evicted first.
    pub max_history_per_memory: usize,
    /// Approximate token budget (per [`crate::tokenizer::estimate_tokens`])
    /// for the transcript passed to the extraction prompt; `None` disables
    /// trimming. Not part of configuration table — supplements it,
    /// since an extraction pipeline with no transcript-size guard would not
    /// ship in practice.
    pub max_context_tokens: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        let mut importance_boost = HashMap::new();
        importance_boost.insert("fact".to_string(), 1.0);
        importance_boost.insert("preference".to_string(), 1.2);
        importance_boost.insert("skill".to_string(), 1.3);
        importance_boost.insert("episode".to_string(), 0.8);
        importance_boost.insert("context".to_string(), 0.9);

        Self {
            surprise_threshold: 0.3,
            importance_boost,
            categories: DEFAULT_CATEGORIES.iter().map(|s| s.to_string()).collect(),
            decay_half_life_days: 30.0,
            max_retention_days: 90.0,
            max_memories: 10_000,
            default_k: 5,
            retrieval_weights: RetrievalWeights::default(),
            namespace: "default".to_string(),
            track_history: true,
            max_history_per_memory: 10,
            max_context_tokens: Some(8_000),
        }
    }
}

impl Config {
    /// Validate the configuration, returning [`crate::EngramError::Config`]
    /// on the first problem found. Called by `Engine::new`.
    pub fn validate(&self) -> crate::Result<()> {
        use crate::EngramError;

        if self.categories.is_empty() {
            return Err(EngramError::Config("categories must not be empty".into()));
        }
        if !self.surprise_threshold.is_finite() || !(0.0..=1.0).contains(&self.surprise_threshold)
        {
            return Err(EngramError::Config(
                "surpriseThreshold must be a finite number in [0, 1]".into(),
            ));
        }
        for (weight_name, weight) in [
            ("relevance", self.retrieval_weights.relevance),
            ("importance", self.retrieval_weights.importance),
            ("recency", self.retrieval_weights.recency),
            ("accessFrequency", self.retrieval_weights.access_frequency),
        ] {
            if !weight.is_finite() {
                return Err(EngramError::Config(format!(
                    "retrievalWeights.{weight_name} must be a finite number"
                )));
            }
        }
        if self.decay_half_life_days <= 0.0 {
            return Err(EngramError::Config(
                "decayHalfLifeDays must be positive".into(),
            ));
        }
        if self.max_retention_days <= 0.0 {
            return Err(EngramError::Config(
                "maxRetentionDays must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Resolve a category against [`Self::categories`], collapsing unknown
    /// values to `"fact"`.
    pub fn resolve_category(&self, category: &str) -> String {
        if self.categories.iter().any(|c| c == category) {
            category.to_string()
        } else {
            "fact".to_string()
        }
    }

    /// The importance boost for a (already-resolved) category, defaulting to
    /// `1.0` for categories with no configured boost.
    pub fn category_boost(&self, category: &str) -> f32 {
        self.importance_boost.get(category).copied().unwrap_or(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_trims_and_truncates() {
        let long = "x".repeat(600);
        let c = Candidate::new(format!("  {long}  "), "fact");
        assert_eq!(c.content.chars().count(), MAX_CONTENT_CHARS);
    }

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn empty_categories_is_config_error() {
        let mut cfg = Config::default();
        cfg.categories.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn resolve_category_collapses_unknown() {
        let cfg = Config::default();
        assert_eq!(cfg.resolve_category("preference"), "preference");
        assert_eq!(cfg.resolve_category("nonsense"), "fact");
    }
}
