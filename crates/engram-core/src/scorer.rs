//! Scorer — novelty-gated admission.

use crate::collaborators::Embedder;
use crate::model::{Candidate, Config, Memory};
use crate::similarity::{cosine, jaccard};
use crate::tokenizer::{tokenize, RecordTokenCache};

/// Outcome of scoring a [`Candidate`] against the existing memory set.
#[derive(Debug, Clone, PartialEq)]
pub struct Admission {
    /// Novelty score in `[0, 1]`.
    pub surprise: f32,
    /// `surprise * category_boost`, the value stored as `Memory::importance`.
    pub importance: f32,
    /// Whether `surprise >= threshold` (the threshold passed to [`score`]).
    pub admitted: bool,
    /// Embedding computed for the candidate, if an embedder was supplied and
    /// succeeded. Reused by the caller to avoid a second `embed` call.
    pub embedding: Option<Vec<f32>>,
    /// Stable machine-readable rejection code, set regardless of `explain`.
    /// Currently only the exact-duplicate fast path populates this.
    pub reason: Option<&'static str>,
    /// Human-readable breakdown, populated only when `explain` is requested.
    pub explanation: Option<String>,
}

fn normalized(content: &str) -> String {
    content.trim().to_lowercase()
}

fn is_exact_duplicate(candidate: &Candidate, existing: &[Memory]) -> bool {
    let needle = normalized(&candidate.content);
    existing.iter().any(|m| normalized(&m.content) == needle)
}

/// Category rarity: `1 / log2(2 + count)`, where `count` is the number of
/// existing memories already in this category. Rarer categories (lower
/// count) score higher.
fn category_rarity(category: &str, existing: &[Memory]) -> f32 {
    let count = existing.iter().filter(|m| m.category == category).count();
    1.0 / (2.0 + count as f32).log2()
}

/// Score `candidate` for admission against `existing` (all memories in the
/// target namespace), using `embedder` when available. Does not mutate
/// anything; the caller is responsible for turning an admitted [`Admission`]
/// into a stored [`Memory`].
///
/// `threshold` is the minimum surprise required for admission. Callers pass
/// `config.surprise_threshold` for extraction-derived candidates and `0.0`
/// (the sentinel that forces admission) for manual storage and
/// `forceStore` — the exact-duplicate guard below applies regardless of
/// `threshold`, since it is never a function of the novelty gate.
pub fn score(
    candidate: &Candidate,
    existing: &[Memory],
    config: &Config,
    embedder: Option<&dyn Embedder>,
    token_cache: &RecordTokenCache,
    explain: bool,
    threshold: f32,
) -> Admission {
    let category = config.resolve_category(&candidate.category);
    let boost = config.category_boost(&category);

    if is_exact_duplicate(candidate, existing) {
        return Admission {
            surprise: 0.0,
            importance: 0.0,
            admitted: false,
            embedding: None,
            reason: Some("duplicate_content"),
            explanation: explain.then(|| "exact duplicate of an existing memory".to_string()),
        };
    }

    if existing.is_empty() {
        let importance = 1.0 * boost;
        return Admission {
            surprise: 1.0,
            importance,
            admitted: 1.0 >= threshold,
            embedding: None,
            reason: None,
            explanation: explain.then(|| "first memory in namespace, maximal novelty".to_string()),
        };
    }

    let candidate_embedding = embedder.and_then(|e| match e.embed(&candidate.content) {
        Ok(v) => Some(v),
        Err(err) => {
            tracing::warn!(category = %category, "embedder failed, falling back to keyword-only novelty: {err}");
            None
        }
    });
    let candidate_tokens = tokenize(&candidate.content);

    let keyword_novelty = {
        let max_sim = existing
            .iter()
            .map(|m| jaccard(&candidate_tokens, &token_cache.tokens(&m.id, &m.content)))
            .fold(0.0f32, f32::max);
        1.0 - max_sim
    };

    let rarity = category_rarity(&category, existing);

    let (surprise, semantic_novelty) = match &candidate_embedding {
        Some(embedding) => {
            let max_sim = existing
                .iter()
                .filter_map(|m| m.embedding.as_ref())
                .filter_map(|other| cosine(embedding, other).ok())
                .fold(0.0f32, f32::max);
            let semantic_novelty = 1.0 - max_sim;
            let combined = 0.6 * semantic_novelty + 0.3 * keyword_novelty + 0.1 * rarity;
            (combined, Some(semantic_novelty))
        }
        None => {
            let combined = 0.8 * keyword_novelty + 0.2 * rarity;
            (combined, None)
        }
    };

    let surprise = surprise.clamp(0.0, 1.0);
    let importance = surprise * boost;
    let admitted = surprise >= threshold;

    tracing::debug!(
        category = %category,
        surprise = surprise as f64,
        keyword_novelty = keyword_novelty as f64,
        ?semantic_novelty,
        rarity = rarity as f64,
        threshold = threshold as f64,
        admitted,
        "scored candidate"
    );

    let explanation = explain.then(|| match semantic_novelty {
        Some(sem) => format!(
            "surprise={surprise:.3} (semantic_novelty={sem:.3}*0.6 + keyword_novelty={keyword_novelty:.3}*0.3 \
             + category_rarity={rarity:.3}*0.1), category_boost={boost:.2}"
        ),
        None => format!(
            "surprise={surprise:.3} (keyword_novelty={keyword_novelty:.3}*0.8 + category_rarity={rarity:.3}*0.2), \
             category_boost={boost:.2} (no embedder)"
        ),
    });

    Admission {
        surprise,
        importance,
        admitted,
        embedding: candidate_embedding,
        reason: None,
        explanation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::mocks::{FailingEmbedder, HashEmbedder};
    use std::collections::HashMap;

    fn make_memory(content: &str, category: &str, embedding: Option<Vec<f32>>) -> Memory {
        Memory {
            id: uuid_stub(),
            content: content.to_string(),
            category: category.to_string(),
            source: "test".to_string(),
            surprise: 1.0,
            importance: 1.0,
            access_count: 0,
            last_accessed: 0,
            created_at: 0,
            embedding,
            metadata: HashMap::new(),
            namespace: "default".to_string(),
            ttl: None,
            expires_at: None,
            version: 1,
            history: vec![],
        }
    }

    fn uuid_stub() -> String {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        format!("mem-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    #[test]
    fn first_candidate_is_maximal_novelty() {
        let config = Config::default();
        let cache = RecordTokenCache::new();
        let candidate = Candidate::new("The sky is blue", "fact");
        let admission = score(&candidate, &[], &config, None, &cache, false, config.surprise_threshold);
        assert_eq!(admission.surprise, 1.0);
        assert!(admission.admitted);
    }

    #[test]
    fn exact_duplicate_is_rejected() {
        let config = Config::default();
        let existing = vec![make_memory("The sky is blue", "fact", None)];
        let candidate = Candidate::new("  the SKY is BLUE  ", "fact");
        let cache = RecordTokenCache::new();
        let admission = score(&candidate, &existing, &config, None, &cache, false, config.surprise_threshold);
        assert_eq!(admission.surprise, 0.0);
        assert!(!admission.admitted);
        assert_eq!(admission.reason, Some("duplicate_content"));
    }

    #[test]
    fn exact_duplicate_reason_is_set_regardless_of_explain() {
        let config = Config::default();
        let existing = vec![make_memory("The sky is blue", "fact", None)];
        let candidate = Candidate::new("The sky is blue", "fact");
        let cache = RecordTokenCache::new();
        let admission = score(&candidate, &existing, &config, None, &cache, false, config.surprise_threshold);
        assert_eq!(admission.reason, Some("duplicate_content"));
        assert!(admission.explanation.is_none(), "explanation stays gated on explain, unlike reason");
    }

    #[test]
    fn near_duplicate_keyword_only_scores_low_novelty() {
        let config = Config::default();
        let existing = vec![make_memory("User prefers TypeScript over JavaScript", "preference", None)];
        let candidate = Candidate::new("User prefers TypeScript instead of JavaScript", "preference");
        let cache = RecordTokenCache::new();
        let admission = score(&candidate, &existing, &config, None, &cache, false, config.surprise_threshold);
        assert!(admission.surprise < 0.5, "surprise = {}", admission.surprise);
    }

    #[test]
    fn distinct_content_scores_high_novelty_with_embedder() {
        let config = Config::default();
        let embedder = HashEmbedder { dimensions: 64 };
        let existing_embedding = embedder.embed("User prefers TypeScript").unwrap();
        let existing = vec![make_memory(
            "User prefers TypeScript",
            "preference",
            Some(existing_embedding),
        )];
        let candidate = Candidate::new("The deployment runs on a Tuesday schedule", "episode");
        let cache = RecordTokenCache::new();
        let admission = score(&candidate, &existing, &config, Some(&embedder), &cache, false, config.surprise_threshold);
        assert!(admission.surprise > 0.5, "surprise = {}", admission.surprise);
    }

    #[test]
    fn embedder_failure_degrades_to_keyword_only() {
        let config = Config::default();
        let existing = vec![make_memory("User prefers TypeScript", "preference", None)];
        let candidate = Candidate::new("Totally different content about cooking", "fact");
        let cache = RecordTokenCache::new();
        let admission = score(&candidate, &existing, &config, Some(&FailingEmbedder), &cache, false, config.surprise_threshold);
        assert!(admission.embedding.is_none());
        assert!(admission.surprise > 0.0);
    }

    #[test]
    fn rarer_category_scores_higher_rarity_component() {
        let common = make_memory("a", "fact", None);
        let existing = vec![common.clone(), common.clone(), common];
        assert!(category_rarity("episode", &existing) > category_rarity("fact", &existing));
    }

    #[test]
    fn importance_applies_category_boost() {
        let config = Config::default();
        let candidate = Candidate::new("Something new", "skill");
        let cache = RecordTokenCache::new();
        let admission = score(&candidate, &[], &config, None, &cache, false, config.surprise_threshold);
        assert_eq!(admission.importance, 1.0 * config.category_boost("skill"));
    }

    #[test]
    fn explain_is_populated_on_request() {
        let config = Config::default();
        let candidate = Candidate::new("Something new", "fact");
        let cache = RecordTokenCache::new();
        let admission = score(&candidate, &[], &config, None, &cache, true, config.surprise_threshold);
        assert!(admission.explanation.is_some());
    }

    #[test]
    fn explain_is_none_when_not_requested() {
        let config = Config::default();
        let candidate = Candidate::new("Something new", "fact");
        let cache = RecordTokenCache::new();
        let admission = score(&candidate, &[], &config, None, &cache, false, config.surprise_threshold);
        assert!(admission.explanation.is_none());
    }
}
