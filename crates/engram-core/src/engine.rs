//! Engine — orchestrates extraction, admission, retrieval, and lifecycle.
//!
//! A memory moves through exactly three states: *candidate* (never
//! persisted — rejected by novelty or a hook), *live* (persisted, eligible
//! for recall and pruning), and, from there, either *discarded* (pruned for
//! low decayed importance or expiry) or *deleted* (explicit `forget`).

use crate::collaborators::{
    build_extraction_prompt, parse_extraction_response, Embedder, Llm, Message,
};
use crate::decay::{memory_decayed_importance, prune_candidates, PruneMode};
use crate::events::{Event, EventBus};
use crate::hooks::Hooks;
use crate::model::{Candidate, Config, HistoryEntry, Memory, Millis};
use crate::retriever::{self, Query, RecallResult};
use crate::scorer::score;
use crate::similarity::{cosine, jaccard};
use crate::store::Store;
use crate::tokenizer::{estimate_tokens, RecordTokenCache};
use crate::{EngramError, Result};
use std::collections::{HashMap, HashSet};

/// Summary statistics aggregated in one O(n) pass over every namespace the
/// store holds.
#[derive(Debug, Clone)]
pub struct Stats {
    pub total: usize,
    pub by_category: HashMap<String, usize>,
    pub by_namespace: HashMap<String, usize>,
    pub average_importance: f32,
    pub average_decayed_importance: f32,
    pub average_surprise: f32,
    /// Mean age in days, computed at call time.
    pub average_age_days: f64,
    /// The earliest-created memory, if any exist.
    pub oldest: Option<Memory>,
    /// The most recently-created memory, if any exist.
    pub newest: Option<Memory>,
}

/// Options for [`Engine::merge`].
#[derive(Debug, Clone, Copy)]
pub struct MergeOptions {
    /// Minimum similarity for a pair to be merged.
    pub threshold: f32,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self { threshold: 0.85 }
    }
}

/// Result of one [`Engine::merge`] pass.
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    /// Kept records that absorbed at least one near-duplicate, post-merge.
    pub kept: Vec<Memory>,
    /// Ids of records absorbed (and deleted) in this pass.
    pub absorbed: Vec<String>,
}

/// Options for [`Engine::forget`].
#[derive(Debug, Clone, Copy)]
pub struct ForgetOptions {
    pub mode: PruneMode,
}

fn default_clock() -> Millis {
    chrono::Utc::now().timestamp_millis()
}

fn default_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// The memory engine: owns configuration, a store, and optional LLM/embedder
/// collaborators, plus the hook fabric and event bus.
pub struct Engine {
    config: Config,
    store: Box<dyn Store>,
    llm: Option<Box<dyn Llm>>,
    embedder: Option<Box<dyn Embedder>>,
    hooks: Hooks,
    events: EventBus,
    clock: Box<dyn Fn() -> Millis + Send + Sync>,
    id_gen: Box<dyn Fn() -> String + Send + Sync>,
    token_cache: RecordTokenCache,
}

impl Engine {
    /// Construct an engine. Validates `config`, returning
    /// [`EngramError::Config`] on the first invalid field, and calls
    /// `store.init()`.
    pub fn new(
        config: Config,
        store: Box<dyn Store>,
        llm: Option<Box<dyn Llm>>,
        embedder: Option<Box<dyn Embedder>>,
    ) -> Result<Self> {
        config.validate()?;
        store.init()?;
        Ok(Self {
            config,
            store,
            llm,
            embedder,
            hooks: Hooks::new(),
            events: EventBus::new(),
            clock: Box::new(default_clock),
            id_gen: Box::new(default_id),
            token_cache: RecordTokenCache::new(),
        })
    }

    /// Override the clock (tests; or to align with an external wall clock).
    pub fn with_clock(mut self, clock: impl Fn() -> Millis + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Override id generation (tests, for deterministic ids).
    pub fn with_id_generator(mut self, id_gen: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.id_gen = Box::new(id_gen);
        self
    }

    pub fn hooks_mut(&mut self) -> &mut Hooks {
        &mut self.hooks
    }

    pub fn on_event(&mut self, listener: impl Fn(&Event) + Send + Sync + 'static) {
        self.events.subscribe(listener);
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn now(&self) -> Millis {
        (self.clock)()
    }

    /// Drop the oldest transcript messages until the remaining ones' total
    /// `estimate_tokens` fits `config.max_context_tokens`, keeping the most
    /// recent turns (most relevant to extraction). Returns `None` when no
    /// budget is configured or the transcript already fits, so the caller
    /// can reuse the original slice without an allocation.
    fn trim_to_context_budget(&self, transcript: &[Message]) -> Option<Vec<Message>> {
        let budget = self.config.max_context_tokens?;
        let total: usize = transcript.iter().map(|m| estimate_tokens(&m.content)).sum();
        if total <= budget {
            return None;
        }

        let mut kept: Vec<Message> = Vec::new();
        let mut used = 0usize;
        for message in transcript.iter().rev() {
            let cost = estimate_tokens(&message.content);
            if used + cost > budget && !kept.is_empty() {
                break;
            }
            used += cost;
            kept.push(message.clone());
        }
        kept.reverse();
        Some(kept)
    }

    /// Extract candidate facts from `transcript` via the configured LLM,
    /// then run each through the admission pipeline via [`Self::store`],
    /// gated by `config.surprise_threshold`. Requires an LLM collaborator
    /// ([`EngramError::NoLlm`] otherwise).
    ///
    /// On an unparseable LLM response, retries once with a stricter prompt;
    /// a second failure surfaces as [`EngramError::Extraction`].
    pub fn remember(&self, transcript: &[Message]) -> Result<Vec<Memory>> {
        self.remember_with(transcript, false)
    }

    /// Like [`Self::remember`], but when `force_store` is set every
    /// extracted candidate is admitted with the sentinel `0` threshold
    /// instead of `config.surprise_threshold`.
    pub fn remember_with(&self, transcript: &[Message], force_store: bool) -> Result<Vec<Memory>> {
        let llm = self.llm.as_deref().ok_or(EngramError::NoLlm)?;

        self.hooks.run_before_extract(transcript);

        let trimmed = self.trim_to_context_budget(transcript);
        let transcript = trimmed.as_deref().unwrap_or(transcript);

        let prompt = build_extraction_prompt(&self.config, transcript, false);
        let response = llm.complete(&prompt)?;

        let candidates = match parse_extraction_response(&response, &self.config) {
            Some(candidates) => candidates,
            None => {
                let strict_prompt = build_extraction_prompt(&self.config, transcript, true);
                let retry_response = llm.complete(&strict_prompt)?;
                parse_extraction_response(&retry_response, &self.config).ok_or_else(|| {
                    EngramError::Extraction(
                        "language model response was not a parseable JSON array after retry".into(),
                    )
                })?
            }
        };

        self.hooks.run_after_extract(&candidates);

        let threshold = if force_store { 0.0 } else { self.config.surprise_threshold };
        let mut stored = Vec::new();
        for candidate in candidates {
            if let Some(memory) = self.store_candidate(candidate, false, threshold)? {
                stored.push(memory);
            }
        }
        Ok(stored)
    }

    /// Run a single candidate through the admission pipeline directly,
    /// bypassing extraction. Uses the sentinel `0` threshold, so only the exact-duplicate guard and any
    /// `beforeStore` hook can reject it. Returns `Ok(None)` on rejection
    /// rather than erroring — rejection is an expected outcome, not a failure.
    pub fn store(&self, candidate: Candidate, explain: bool) -> Result<Option<Memory>> {
        self.store_candidate(candidate, explain, 0.0)
    }

    fn store_candidate(&self, candidate: Candidate, explain: bool, threshold: f32) -> Result<Option<Memory>> {
        if let Err(err) = self.hooks.run_before_store(&candidate) {
            self.events.emit(Event::Rejected {
                content: candidate.content.clone(),
                category: candidate.category.clone(),
                reason: err.to_string(),
            });
            return Ok(None);
        }

        let existing = self.store.list(&crate::store::StoreFilter::namespace(self.config.namespace.as_str()))?;
        let admission = score(
            &candidate,
            &existing,
            &self.config,
            self.embedder.as_deref(),
            &self.token_cache,
            explain,
            threshold,
        );

        if !admission.admitted {
            let reason = admission
                .reason
                .map(str::to_string)
                .or(admission.explanation)
                .unwrap_or_else(|| "surprise below threshold".to_string());
            tracing::info!(category = %candidate.category, surprise = admission.surprise as f64, "rejected: {reason}");
            self.events.emit(Event::Rejected {
                content: candidate.content.clone(),
                category: candidate.category.clone(),
                reason,
            });
            return Ok(None);
        }

        let now = self.now();
        let category = self.config.resolve_category(&candidate.category);
        let memory = Memory {
            id: (self.id_gen)(),
            content: candidate.content,
            category,
            source: "remember".to_string(),
            surprise: admission.surprise,
            importance: admission.importance,
            access_count: 0,
            last_accessed: now,
            created_at: now,
            embedding: admission.embedding,
            metadata: HashMap::new(),
            namespace: self.config.namespace.clone(),
            ttl: None,
            expires_at: Some(crate::decay::compute_expires_at(
                now,
                None,
                self.config.max_retention_days,
            )),
            version: 1,
            history: Vec::new(),
        };

        self.store.put(memory.clone())?;
        self.hooks.run_after_store(&memory);
        tracing::info!(id = %memory.id, category = %memory.category, importance = memory.importance as f64, "stored");
        self.events.emit(Event::Stored(memory.clone()));
        Ok(Some(memory))
    }

    /// Retrieve the top-k memories relevant to `query`.
    pub fn recall(&self, query: Query) -> Result<Vec<RecallResult>> {
        self.hooks.run_before_recall(&query);
        let now = self.now();
        let (results, persist_errors) = retriever::recall(
            self.store.as_ref(),
            &self.config,
            self.embedder.as_deref(),
            &self.token_cache,
            &query,
            now,
        )?;
        self.hooks.run_after_recall(&results);
        for err in persist_errors {
            self.events.emit(Event::Error(err));
        }
        self.events.emit(Event::Recalled {
            query: query.text.clone(),
            result_count: results.len(),
        });
        Ok(results)
    }

    /// Delete a single memory by id. Returns `true` if a record was removed.
    /// `beforeForget` cannot veto the deletion — unlike `beforeStore`, a
    /// returned `Err` or a panic is logged and swallowed.
    pub fn forget(&self, id: &str) -> Result<bool> {
        self.hooks.run_before_forget(std::slice::from_ref(&id.to_string()));
        let removed = self.store.delete(id)?;
        if removed {
            self.token_cache.forget(id);
            tracing::info!(id, "forgotten");
            self.events.emit(Event::Forgotten {
                ids: vec![id.to_string()],
                count: 1,
            });
        }
        Ok(removed)
    }

    /// Bulk forgetting: computes the prune set per
    /// `opts.mode` (expiry, low decayed importance, or bottom decile —
    /// [`PruneMode`]), adds capacity-driven victims when the namespace
    /// exceeds `config.max_memories` (lowest decayed importance first),
    /// runs `beforeForget` over the whole set (observational only — it
    /// cannot veto), then deletes. Returns the ids actually removed.
    pub fn forget_many(&self, opts: ForgetOptions) -> Result<Vec<String>> {
        let now = self.now();
        let memories = self
            .store
            .list(&crate::store::StoreFilter::namespace(self.config.namespace.as_str()))?;
        let decayed: Vec<(&Memory, f32)> = memories
            .iter()
            .map(|m| (m, memory_decayed_importance(m, now, &self.config)))
            .collect();

        let mut ids = prune_candidates(&decayed, opts.mode, now);

        let total = memories.len();
        if total > self.config.max_memories {
            let pruned: HashSet<&str> = ids.iter().map(String::as_str).collect();
            let mut remaining: Vec<(&Memory, f32)> = decayed
                .iter()
                .filter(|(m, _)| !pruned.contains(m.id.as_str()))
                .cloned()
                .collect();
            remaining.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

            let overflow = total - self.config.max_memories;
            ids.extend(remaining.into_iter().take(overflow).map(|(m, _)| m.id.clone()));
            ids.sort();
            ids.dedup();
        }

        self.hooks.run_before_forget(&ids);

        let removed = self.store.prune(&ids)?;
        for id in &ids {
            self.token_cache.forget(id);
        }
        if removed > 0 {
            tracing::info!(mode = ?opts.mode, removed, "pruned");
            self.events.emit(Event::Forgotten {
                ids: ids.clone(),
                count: removed,
            });
        }
        Ok(ids)
    }

    /// Merge near-duplicates within each category:
    /// for every unordered pair not already absorbed, compute similarity
    /// (cosine when both carry an embedding and an embedder is configured,
    /// else Jaccard over tokens); when it meets `opts.threshold`, keep the
    /// higher-importance record (ties broken by earlier `createdAt`), record
    /// the absorbed record's pre-merge content in the kept record's history,
    /// append the absorbed id to `metadata.mergedFrom`, increment the kept
    /// record's version, and mark the absorbed record for deletion. An
    /// absorbed record may not act as a keeper in a later pair this call.
    pub fn merge(&self, opts: MergeOptions) -> Result<MergeOutcome> {
        let now = self.now();
        let all = self
            .store
            .list(&crate::store::StoreFilter::namespace(self.config.namespace.as_str()))?;

        let mut by_category: HashMap<String, Vec<Memory>> = HashMap::new();
        for memory in all {
            by_category.entry(memory.category.clone()).or_default().push(memory);
        }

        let mut kept: HashMap<String, Memory> = HashMap::new();
        let mut absorbed_ids: Vec<String> = Vec::new();
        let mut absorbed: HashSet<String> = HashSet::new();

        for group in by_category.into_values() {
            let mut group = group;
            group.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

            for i in 0..group.len() {
                if absorbed.contains(&group[i].id) {
                    continue;
                }
                for j in (i + 1)..group.len() {
                    if absorbed.contains(&group[i].id) {
                        break;
                    }
                    if absorbed.contains(&group[j].id) {
                        continue;
                    }

                    let current_i = kept.get(&group[i].id).cloned().unwrap_or_else(|| group[i].clone());
                    let current_j = kept.get(&group[j].id).cloned().unwrap_or_else(|| group[j].clone());

                    let similarity = self.pair_similarity(&current_i, &current_j);
                    if similarity < opts.threshold {
                        continue;
                    }

                    let (keeper, secondary) = if current_i.importance > current_j.importance
                        || (current_i.importance == current_j.importance
                            && current_i.created_at <= current_j.created_at)
                    {
                        (current_i, current_j)
                    } else {
                        (current_j, current_i)
                    };

                    let mut updated = keeper.clone();
                    if self.config.track_history {
                        updated.history.push(HistoryEntry {
                            content: secondary.content.clone(),
                            metadata: secondary.metadata.clone(),
                            reason: "merged".to_string(),
                            recorded_at: now,
                        });
                        while updated.history.len() > self.config.max_history_per_memory {
                            updated.history.remove(0);
                        }
                    }
                    let merged_from = updated
                        .metadata
                        .entry("mergedFrom".to_string())
                        .or_insert_with(|| serde_json::Value::Array(Vec::new()));
                    if let serde_json::Value::Array(ids) = merged_from {
                        ids.push(serde_json::Value::String(secondary.id.clone()));
                    }
                    updated.version += 1;

                    absorbed.insert(secondary.id.clone());
                    absorbed_ids.push(secondary.id.clone());
                    kept.remove(&secondary.id);
                    kept.insert(updated.id.clone(), updated);
                }
            }
        }

        for memory in kept.values() {
            self.store.put(memory.clone())?;
        }
        for id in &absorbed_ids {
            self.store.delete(id)?;
            self.token_cache.forget(id);
        }

        let outcome = MergeOutcome {
            kept: kept.into_values().collect(),
            absorbed: absorbed_ids,
        };
        tracing::info!(kept = outcome.kept.len(), absorbed = outcome.absorbed.len(), "merged");
        self.events.emit(Event::Merged(outcome.clone()));
        Ok(outcome)
    }

    fn pair_similarity(&self, a: &Memory, b: &Memory) -> f32 {
        if self.embedder.is_some() {
            if let (Some(emb_a), Some(emb_b)) = (&a.embedding, &b.embedding) {
                if let Ok(sim) = cosine(emb_a, emb_b) {
                    return sim;
                }
            }
        }
        jaccard(
            &self.token_cache.tokens(&a.id, &a.content),
            &self.token_cache.tokens(&b.id, &b.content),
        )
    }

    /// All memories in the active namespace, for export. Does not affect
    /// access counts (unlike [`Self::recall`]).
    pub fn list_all(&self) -> Result<Vec<Memory>> {
        self.store
            .list(&crate::store::StoreFilter::namespace(self.config.namespace.as_str()))
    }

    /// Restore previously-exported memories verbatim, bypassing the novelty
    /// gate (export round-trip laws assume a lossless re-import, not
    /// a re-run of admission). Rejects up front if any record's category
    /// isn't in `config.categories`. Returns the number of records written.
    pub fn import_memories(&self, memories: Vec<Memory>) -> Result<usize> {
        crate::export::validate_categories(&memories, &self.config)?;
        let count = memories.len();
        self.store.put_many(memories)?;
        Ok(count)
    }

    /// Summary statistics over every namespace in the store (/// "stats"): totals, per-category and per-namespace counts, average
    /// importance/surprise/age, and the oldest/newest record by `createdAt`.
    pub fn stats(&self) -> Result<Stats> {
        let now = self.now();
        let memories = self.store.dump()?;

        let mut by_category: HashMap<String, usize> = HashMap::new();
        let mut by_namespace: HashMap<String, usize> = HashMap::new();
        let mut importance_sum = 0.0f32;
        let mut decayed_sum = 0.0f32;
        let mut surprise_sum = 0.0f32;
        let mut age_sum_days = 0.0f64;
        let mut oldest: Option<&Memory> = None;
        let mut newest: Option<&Memory> = None;

        for memory in &memories {
            *by_category.entry(memory.category.clone()).or_insert(0) += 1;
            *by_namespace.entry(memory.namespace.clone()).or_insert(0) += 1;
            importance_sum += memory.importance;
            surprise_sum += memory.surprise;
            decayed_sum += memory_decayed_importance(memory, now, &self.config);
            age_sum_days += crate::decay::age_days(memory.created_at, now).max(0.0);

            if oldest.is_none_or(|o| memory.created_at < o.created_at) {
                oldest = Some(memory);
            }
            if newest.is_none_or(|n| memory.created_at > n.created_at) {
                newest = Some(memory);
            }
        }

        let total = memories.len();
        let average = |sum: f32| if total == 0 { 0.0 } else { sum / total as f32 };

        Ok(Stats {
            total,
            by_category,
            by_namespace,
            average_importance: average(importance_sum),
            average_decayed_importance: average(decayed_sum),
            average_surprise: average(surprise_sum),
            average_age_days: if total == 0 { 0.0 } else { age_sum_days / total as f64 },
            oldest: oldest.cloned(),
            newest: newest.cloned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::mocks::MockLlm;
    use crate::store::MemoryStore;
    use std::sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    };

    fn engine_with_clock(config: Config) -> Engine {
        let counter = Arc::new(AtomicI64::new(0));
        let clock_counter = counter.clone();
        Engine::new(config, Box::new(MemoryStore::new()), None, None)
            .unwrap()
            .with_clock(move || clock_counter.fetch_add(1, Ordering::Relaxed))
            .with_id_generator({
                let id_counter = Arc::new(AtomicI64::new(0));
                move || format!("mem-{}", id_counter.fetch_add(1, Ordering::Relaxed))
            })
    }

    #[test]
    fn store_admits_first_candidate() {
        let engine = engine_with_clock(Config::default());
        let memory = engine
            .store(Candidate::new("The sky is blue", "fact"), false)
            .unwrap();
        assert!(memory.is_some());
    }

    #[test]
    fn store_rejects_exact_duplicate() {
        let engine = engine_with_clock(Config::default());
        engine.store(Candidate::new("The sky is blue", "fact"), false).unwrap();
        let second = engine
            .store(Candidate::new("The sky is blue", "fact"), false)
            .unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn store_admits_below_extraction_threshold_via_sentinel_zero() {
        // Manual storage uses the sentinel threshold 0, not config.surprise_threshold
        //, so even a near-duplicate below the extraction gate is admitted.
        let mut config = Config::default();
        config.surprise_threshold = 0.99;
        let engine = engine_with_clock(config);
        engine.store(Candidate::new("User prefers TypeScript over JavaScript", "preference"), false).unwrap();
        let near_duplicate = engine
            .store(Candidate::new("User prefers TypeScript instead of JavaScript", "preference"), false)
            .unwrap();
        assert!(near_duplicate.is_some());
    }

    #[test]
    fn remember_with_force_store_bypasses_extraction_threshold() {
        let mut config = Config::default();
        config.surprise_threshold = 0.99;
        let llm = MockLlm::new(vec![
            r#"[{"content": "User likes Rust", "category": "preference"}]"#,
        ]);
        let engine = Engine::new(config, Box::new(MemoryStore::new()), Some(Box::new(llm)), None)
            .unwrap()
            .with_clock(|| 0)
            .with_id_generator(|| "mem-0".to_string());

        let stored = engine.remember_with(&[], true).unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[test]
    fn trim_to_context_budget_keeps_most_recent_messages() {
        let mut config = Config::default();
        config.max_context_tokens = Some(5);
        let engine = engine_with_clock(config);

        let transcript = vec![
            Message { role: "user".to_string(), content: "a".repeat(40) },
            Message { role: "user".to_string(), content: "recent".to_string() },
        ];
        let trimmed = engine.trim_to_context_budget(&transcript).unwrap();
        assert_eq!(trimmed.len(), 1);
        assert_eq!(trimmed[0].content, "recent");
    }

    #[test]
    fn trim_to_context_budget_is_noop_when_transcript_fits() {
        let engine = engine_with_clock(Config::default());
        let transcript = vec![Message { role: "user".to_string(), content: "short".to_string() }];
        assert!(engine.trim_to_context_budget(&transcript).is_none());
    }

    #[test]
    fn remember_without_llm_errors() {
        let engine = engine_with_clock(Config::default());
        let result = engine.remember(&[]);
        assert!(matches!(result, Err(EngramError::NoLlm)));
    }

    #[test]
    fn remember_parses_llm_extraction() {
        let config = Config::default();
        let llm = MockLlm::new(vec![r#"[{"content": "User likes Rust", "category": "preference"}]"#]);
        let engine = Engine::new(config, Box::new(MemoryStore::new()), Some(Box::new(llm)), None)
            .unwrap()
            .with_clock(|| 0)
            .with_id_generator(|| "mem-0".to_string());

        let transcript = vec![Message {
            role: "user".to_string(),
            content: "I really like Rust".to_string(),
        }];
        let stored = engine.remember(&transcript).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "User likes Rust");
    }

    #[test]
    fn remember_retries_once_on_unparseable_response() {
        let config = Config::default();
        let llm = MockLlm::new(vec![
            "not json",
            r#"[{"content": "User likes Rust", "category": "preference"}]"#,
        ]);
        let engine = Engine::new(config, Box::new(MemoryStore::new()), Some(Box::new(llm)), None)
            .unwrap()
            .with_clock(|| 0)
            .with_id_generator(|| "mem-0".to_string());

        let stored = engine.remember(&[]).unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[test]
    fn remember_errors_after_second_unparseable_response() {
        let config = Config::default();
        let llm = MockLlm::new(vec!["not json", "still not json"]);
        let engine = Engine::new(config, Box::new(MemoryStore::new()), Some(Box::new(llm)), None).unwrap();

        assert!(matches!(engine.remember(&[]), Err(EngramError::Extraction(_))));
    }

    #[test]
    fn before_store_hook_can_veto_admission() {
        let mut engine = engine_with_clock(Config::default());
        engine
            .hooks_mut()
            .add_before_store(|c| {
                if c.content.contains("banned") {
                    Err(crate::hooks::reject("banned word"))
                } else {
                    Ok(())
                }
            });

        let result = engine.store(Candidate::new("this is banned content", "fact"), false).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn remember_reports_duplicate_content_reason_for_exact_duplicate_extraction() {
        use std::sync::Mutex;
        let config = Config::default();
        let llm = MockLlm::new(vec![r#"[{"content": "User prefers TypeScript", "category": "preference"}]"#]);
        let mut engine = Engine::new(config, Box::new(MemoryStore::new()), Some(Box::new(llm)), None)
            .unwrap()
            .with_clock(|| 0)
            .with_id_generator(|| "mem-0".to_string());

        engine.store(Candidate::new("User prefers TypeScript", "preference"), false).unwrap();

        let reasons = Arc::new(Mutex::new(Vec::new()));
        let recorder = reasons.clone();
        engine.on_event(move |event| {
            if let Event::Rejected { reason, .. } = event {
                recorder.lock().unwrap().push(reason.clone());
            }
        });

        let stored = engine.remember(&[]).unwrap();
        assert!(stored.is_empty());
        assert_eq!(reasons.lock().unwrap().as_slice(), ["duplicate_content".to_string()]);
    }

    #[test]
    fn forget_removes_memory() {
        let engine = engine_with_clock(Config::default());
        let memory = engine.store(Candidate::new("x", "fact"), false).unwrap().unwrap();
        assert!(engine.forget(&memory.id).unwrap());
        assert!(!engine.forget(&memory.id).unwrap());
    }

    #[test]
    fn merge_keeps_higher_importance_record_and_records_provenance() {
        let engine = engine_with_clock(Config::default());
        let a = engine.store(Candidate::new("Deploy with vercel", "skill"), false).unwrap().unwrap();
        let b = engine.store(Candidate::new("Deploy with vercel prod", "skill"), false).unwrap().unwrap();
        assert!(a.importance > b.importance, "fixture assumption: a is the higher-importance record");

        let outcome = engine.merge(MergeOptions { threshold: 0.6 }).unwrap();
        assert_eq!(outcome.absorbed, vec![b.id.clone()]);
        assert_eq!(outcome.kept.len(), 1);
        assert_eq!(outcome.kept[0].id, a.id);
        assert_eq!(outcome.kept[0].version, 2);
        assert_eq!(
            outcome.kept[0].metadata.get("mergedFrom"),
            Some(&serde_json::json!([b.id]))
        );
        assert_eq!(engine.list_all().unwrap().len(), 1);
    }

    #[test]
    fn merge_below_threshold_leaves_both_records() {
        let engine = engine_with_clock(Config::default());
        engine.store(Candidate::new("Deploy with vercel", "skill"), false).unwrap();
        engine.store(Candidate::new("The office coffee machine broke", "episode"), false).unwrap();

        let outcome = engine.merge(MergeOptions::default()).unwrap();
        assert!(outcome.absorbed.is_empty());
        assert_eq!(engine.list_all().unwrap().len(), 2);
    }

    #[test]
    fn merge_does_not_let_an_absorbed_record_act_as_a_later_keeper() {
        // Chain of three identical-content records in one category: pairing
        // order is (a,b), (a,c), (b,c). The first pair lets b absorb a. If the
        // outer loop's `i` (still pointing at the absorbed a) is not retired,
        // the second pair recomputes a stale, pre-merge clone of a and can let
        // it win against c, re-inserting a.id into `kept` even though it is
        // already queued for deletion — so the returned `kept` set ends up
        // inconsistent with what is actually left in the store.
        use std::collections::HashMap as Map;
        let engine = engine_with_clock(Config::default());

        let make = |id: &str, importance: f32, created_at: Millis| Memory {
            id: id.to_string(),
            content: "quarterly roadmap review notes".to_string(),
            category: "fact".to_string(),
            source: "test".to_string(),
            surprise: importance,
            importance,
            access_count: 0,
            last_accessed: created_at,
            created_at,
            embedding: None,
            metadata: Map::new(),
            namespace: "default".to_string(),
            ttl: None,
            expires_at: None,
            version: 1,
            history: vec![],
        };

        engine.store.put(make("mem-a", 2.0, 0)).unwrap();
        engine.store.put(make("mem-b", 3.0, 1)).unwrap();
        engine.store.put(make("mem-c", 1.0, 2)).unwrap();

        let outcome = engine.merge(MergeOptions { threshold: 0.5 }).unwrap();

        assert_eq!(outcome.kept.len(), 1, "exactly one record should survive a three-way merge");
        assert_eq!(outcome.kept[0].id, "mem-b", "mem-b has the highest importance and must be the sole keeper");
        let mut absorbed = outcome.absorbed.clone();
        absorbed.sort();
        assert_eq!(absorbed, vec!["mem-a".to_string(), "mem-c".to_string()]);

        let remaining = engine.list_all().unwrap();
        assert_eq!(remaining.len(), 1, "a legitimately-kept record must not be destroyed by a stale keeper recomputation");
        assert_eq!(remaining[0].id, "mem-b");
    }

    #[test]
    fn forget_many_gentle_prunes_only_expired() {
        let engine = engine_with_clock(Config::default());
        let memory = engine.store(Candidate::new("x", "fact"), false).unwrap().unwrap();
        // Force expiry by writing back a record with an already-past `expiresAt`.
        let mut expired = memory.clone();
        expired.expires_at = Some(-1);
        engine.store.put(expired).unwrap();

        let removed = engine.forget_many(ForgetOptions { mode: PruneMode::Gentle }).unwrap();
        assert_eq!(removed, vec![memory.id]);
        assert_eq!(engine.list_all().unwrap().len(), 0);
    }

    #[test]
    fn forget_many_applies_capacity_pressure() {
        let mut config = Config::default();
        config.max_memories = 1;
        let engine = engine_with_clock(config);
        engine.store(Candidate::new("older, less important", "fact"), false).unwrap();
        engine.store(Candidate::new("newer, entirely different content", "episode"), false).unwrap();

        let removed = engine.forget_many(ForgetOptions { mode: PruneMode::Gentle }).unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(engine.list_all().unwrap().len(), 1);
    }

    #[test]
    fn stats_reports_category_counts() {
        let engine = engine_with_clock(Config::default());
        engine.store(Candidate::new("fact one", "fact"), false).unwrap();
        engine.store(Candidate::new("pref one entirely different", "preference"), false).unwrap();

        let stats = engine.stats().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_category.get("fact"), Some(&1));
        assert_eq!(stats.by_category.get("preference"), Some(&1));
        assert_eq!(stats.by_namespace.get("default"), Some(&2));
        assert!(stats.average_surprise > 0.0);
        assert!(stats.oldest.is_some());
        assert!(stats.newest.is_some());
    }

    #[test]
    fn events_fire_on_store_and_forget() {
        use std::sync::Mutex;
        let events = Arc::new(Mutex::new(Vec::new()));
        let recorder = events.clone();

        let mut engine = engine_with_clock(Config::default());
        engine.on_event(move |event| recorder.lock().unwrap().push(format!("{event:?}")));

        let memory = engine.store(Candidate::new("x", "fact"), false).unwrap().unwrap();
        engine.forget(&memory.id).unwrap();

        let recorded = events.lock().unwrap();
        assert!(recorded.iter().any(|e| e.starts_with("Stored")));
        assert!(recorded.iter().any(|e| e.starts_with("Forgotten")));
    }
}
