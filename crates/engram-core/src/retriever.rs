//! Retriever — hybrid lexical/semantic ranking.

use crate::collaborators::Embedder;
use crate::decay::memory_decayed_importance;
use crate::model::{Config, Memory, Millis, RetrievalWeights};
use crate::similarity::{cosine, jaccard};
use crate::store::{Store, StoreFilter};
use crate::tokenizer::{tokenize, RecordTokenCache};
use crate::Result;
use std::collections::HashMap;

/// Over-fetch multiplier applied to `k` before filtering and ranking, so
/// filters that reject many candidates still leave enough to fill `k`.
const OVERFETCH_MULTIPLIER: usize = 3;
/// Absolute floor for the over-fetch size, so small `k` still sees a
/// reasonable candidate pool.
const OVERFETCH_FLOOR: usize = 50;

/// Query parameters for [`recall`].
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub text: String,
    pub k: Option<usize>,
    /// Category whitelist; empty means no constraint.
    pub categories: Vec<String>,
    pub since: Option<Millis>,
    /// Namespace to recall from; defaults to `config.namespace` when unset,
    /// so most callers never need to set this.
    pub namespace: Option<String>,
    pub metadata: Vec<(String, serde_json::Value)>,
    pub min_importance: Option<f32>,
    pub explain: bool,
}

/// A single ranked result.
#[derive(Debug, Clone)]
pub struct RecallResult {
    pub memory: Memory,
    pub score: f32,
    /// Time-decayed importance computed at recall time (step 9
    /// "Annotation"), not to be confused with `memory.importance`, the
    /// undecayed value recorded at admission.
    pub decayed_importance: f32,
    pub explanation: Option<String>,
}

fn relevance(
    query_tokens: &[String],
    query_embedding: Option<&[f32]>,
    memory: &Memory,
    token_cache: &RecordTokenCache,
) -> f32 {
    if let (Some(query_vec), Some(memory_vec)) = (query_embedding, memory.embedding.as_ref()) {
        if let Ok(sim) = cosine(query_vec, memory_vec) {
            return sim;
        }
    }
    jaccard(query_tokens, &token_cache.tokens(&memory.id, &memory.content))
}

fn recency(memory: &Memory, now: Millis) -> f32 {
    let age_days = crate::decay::age_days(memory.created_at, now).max(0.0);
    (1.0 / (1.0 + age_days / 30.0)) as f32
}

fn access_frequency(memory: &Memory) -> f32 {
    (memory.access_count.min(100) as f32) / 100.0
}

fn weighted_score(
    weights: &RetrievalWeights,
    relevance: f32,
    decayed_importance: f32,
    recency: f32,
    access_frequency: f32,
) -> f32 {
    weights.relevance * relevance
        + weights.importance * decayed_importance
        + weights.recency * recency
        + weights.access_frequency * access_frequency
}

/// Run retrieval against `store`, ranking results per `config.retrieval_weights`,
/// applying `query.min_importance` post-scoring, and recording access-count /
/// last-accessed side effects on returned memories.
pub fn recall(
    store: &dyn Store,
    config: &Config,
    embedder: Option<&dyn Embedder>,
    token_cache: &RecordTokenCache,
    query: &Query,
    now: Millis,
) -> Result<(Vec<RecallResult>, Vec<String>)> {
    let k = query.k.unwrap_or(config.default_k);
    let overfetch = (k * OVERFETCH_MULTIPLIER).max(OVERFETCH_FLOOR);
    let namespace = query.namespace.as_deref().unwrap_or(&config.namespace);

    let query_tokens = tokenize(&query.text);
    let query_embedding = embedder.and_then(|e| match e.embed(&query.text) {
        Ok(v) => Some(v),
        Err(err) => {
            tracing::warn!("embedder failed for query, falling back to keyword-only relevance: {err}");
            None
        }
    });

    let mut candidates: HashMap<String, Memory> = HashMap::new();

    for memory in store.search(namespace, &query_tokens, overfetch)? {
        candidates.insert(memory.id.clone(), memory);
    }

    if let Some(query_vec) = &query_embedding {
        if let Some(vector_hits) = store.vector_search(namespace, query_vec, overfetch)? {
            for memory in vector_hits {
                candidates.entry(memory.id.clone()).or_insert(memory);
            }
        }
    }

    let filter = StoreFilter {
        namespace: Some(namespace.to_string()),
        categories: query.categories.clone(),
        since: query.since,
        metadata: query.metadata.clone(),
        ..Default::default()
    };

    let mut scored: Vec<RecallResult> = candidates
        .into_values()
        .filter(|m| filter_matches(&filter, m))
        .filter(|m| !m.is_expired(now))
        .map(|memory| {
            let rel = relevance(&query_tokens, query_embedding.as_deref(), &memory, token_cache);
            let decayed = memory_decayed_importance(&memory, now, config);
            let rec = recency(&memory, now);
            let freq = access_frequency(&memory);
            let score = weighted_score(&config.retrieval_weights, rel, decayed, rec, freq);

            let explanation = query.explain.then(|| {
                format!(
                    "score={score:.3} (relevance={rel:.3}*{:.2} + decayed_importance={decayed:.3}*{:.2} \
                     + recency={rec:.3}*{:.2} + access_frequency={freq:.3}*{:.2})",
                    config.retrieval_weights.relevance,
                    config.retrieval_weights.importance,
                    config.retrieval_weights.recency,
                    config.retrieval_weights.access_frequency,
                )
            });

            RecallResult {
                memory,
                score,
                decayed_importance: decayed,
                explanation,
            }
        })
        // step 5: minImportance filters on decayedImportance, applied
        // after scoring — not on the static `Memory::importance` field.
        .filter(|r| query.min_importance.is_none_or(|min| r.decayed_importance >= min))
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.memory.created_at.cmp(&a.memory.created_at))
            .then_with(|| a.memory.id.cmp(&b.memory.id))
    });
    scored.truncate(k);

    // A failing persist here must not suppress the result (spec step 8):
    // the caller already has the in-memory record with updated counters: only
    // the durability of that update is in question, so we log and collect the
    // error rather than propagating it and discarding every result in `scored`.
    let mut persist_errors = Vec::new();
    for result in &mut scored {
        result.memory.access_count += 1;
        result.memory.last_accessed = now;
        if let Err(err) = store.put(result.memory.clone()) {
            tracing::warn!(id = %result.memory.id, "failed to persist access-count update after recall: {err}");
            persist_errors.push(err.to_string());
        }
    }

    Ok((scored, persist_errors))
}

fn filter_matches(filter: &StoreFilter, memory: &Memory) -> bool {
    if let Some(ns) = &filter.namespace {
        if &memory.namespace != ns {
            return false;
        }
    }
    if !filter.categories.is_empty() && !filter.categories.contains(&memory.category) {
        return false;
    }
    if let Some(since) = filter.since {
        if memory.created_at < since {
            return false;
        }
    }
    for (key, value) in &filter.metadata {
        if memory.metadata.get(key) != Some(value) {
            return false;
        }
    }
    true
}
