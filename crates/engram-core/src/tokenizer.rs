//! Tokenizer — text normalization, stopword filtering, and a weak token cache.

use std::collections::HashSet;
use std::sync::{Mutex, OnceLock, Weak};

/// English stopwords dropped during tokenization. Not exhaustive, but covers
/// articles, pronouns, auxiliary verbs, and common prepositions/conjunctions.
const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "if", "then", "else", "when", "at", "by", "for",
    "with", "about", "against", "between", "into", "through", "during", "before", "after",
    "above", "below", "to", "from", "up", "down", "in", "out", "on", "off", "over", "under",
    "again", "further", "once", "here", "there", "all", "any", "both", "each", "few", "more",
    "most", "other", "some", "such", "no", "nor", "not", "only", "own", "same", "so", "than",
    "too", "very", "can", "will", "just", "should", "now", "i", "me", "my", "myself", "we",
    "our", "ours", "ourselves", "you", "your", "yours", "yourself", "yourselves", "he", "him",
    "his", "himself", "she", "her", "hers", "herself", "it", "its", "itself", "they", "them",
    "their", "theirs", "themselves", "what", "which", "who", "whom", "this", "that", "these",
    "those", "am", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
    "having", "do", "does", "did", "doing", "a's", "able", "would", "could", "shall", "might",
    "must", "let", "also", "of", "as", "because", "until", "while", "is'nt", "isn't", "don't",
    "doesn't", "didn't", "wasn't", "weren't", "won't", "wouldn't", "shouldn't", "couldn't",
    "can't", "cannot", "there's", "it's", "that's", "here's", "let's", "who's", "one", "two",
];

fn stopword_set() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| STOPWORDS.iter().copied().collect())
}

/// Lowercase, strip non-word characters, split on whitespace, drop tokens shorter
/// than two characters, and drop stopwords. Multiplicities and first-occurrence
/// order are preserved.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let normalized: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    let stopwords = stopword_set();
    normalized
        .split_whitespace()
        .filter(|tok| tok.chars().count() >= 2)
        .filter(|tok| !stopwords.contains(tok))
        .map(|tok| tok.to_string())
        .collect()
}

/// Rough token-count estimate (`ceil(len / 4)`), used only for the context-budget
/// heuristic — never for admission. Monotone in `text.len()`.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// A weak, advisory cache from record identity to its token list.
///
/// Entries vanish once the owning `Arc<str>` key is dropped elsewhere, so the
/// cache never outlives the records it indexes. Correctness of every caller
/// must not depend on cache hits — only performance does.
#[derive(Default)]
pub struct TokenCache {
    entries: Mutex<Vec<(Weak<str>, Vec<String>)>>,
}

impl TokenCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the cached tokens for `key` if the backing `Arc<str>` is still
    /// alive and its content still matches `content`; otherwise tokenize
    /// `content`, cache it under `key`, and return the fresh tokens.
    pub fn get_or_tokenize(&self, key: &std::sync::Arc<str>, content: &str) -> Vec<String> {
        let mut entries = self.entries.lock().expect("token cache lock poisoned");

        // Drop dead entries opportunistically so the cache does not grow unbounded.
        entries.retain(|(weak, _)| weak.strong_count() > 0);

        for (weak, tokens) in entries.iter() {
            if let Some(arc) = weak.upgrade() {
                if std::sync::Arc::ptr_eq(&arc, key) {
                    return tokens.clone();
                }
            }
        }

        let tokens = tokenize(content);
        entries.push((std::sync::Arc::downgrade(key), tokens.clone()));
        tokens
    }
}

/// Ties [`TokenCache`] to record identity by interning each memory id into a
/// stable `Arc<str>`, so repeated lookups for the same id hit the weak cache
/// instead of re-tokenizing. Purely a performance layer: every caller must
/// get correct results even if this struct were replaced with bare
/// [`tokenize`] calls.
#[derive(Default)]
pub struct RecordTokenCache {
    cache: TokenCache,
    keys: Mutex<std::collections::HashMap<String, std::sync::Arc<str>>>,
}

impl RecordTokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tokens for the memory identified by `id` with the given `content`.
    pub fn tokens(&self, id: &str, content: &str) -> Vec<String> {
        let key = {
            let mut keys = self.keys.lock().expect("record token cache lock poisoned");
            keys.entry(id.to_string())
                .or_insert_with(|| std::sync::Arc::from(id))
                .clone()
        };
        self.cache.get_or_tokenize(&key, content)
    }

    /// Drop the interned key for `id`, so the underlying weak cache entry can
    /// be collected once nothing else references it. Called when a memory is
    /// deleted.
    pub fn forget(&self, id: &str) {
        self.keys
            .lock()
            .expect("record token cache lock poisoned")
            .remove(id);
    }
}
