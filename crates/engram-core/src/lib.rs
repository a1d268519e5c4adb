//! # Engram Core
//!
//! A conversational memory engine: novelty-gated ingestion, hybrid
//! lexical/semantic retrieval, and time-decayed importance, built around
//! pluggable language-model, embedder, and storage collaborators.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use engram_core::{Config, Engine};
//! use engram_core::store::MemoryStore;
//!
//! let engine = Engine::new(Config::default(), Box::new(MemoryStore::new()), None, None)?;
//! let memory = engine.store(engram_core::Candidate::new("User prefers dark mode", "preference"), false)?;
//! ```
//!
//! ## Feature flags
//!
//! - `sqlite-store`: enables [`store::SqliteStore`], a `rusqlite` + FTS5 backend.

pub mod collaborators;
pub mod decay;
pub mod engine;
pub mod error;
pub mod events;
pub mod export;
pub mod hooks;
pub mod model;
pub mod retriever;
pub mod scorer;
pub mod similarity;
pub mod store;
pub mod tokenizer;

pub use collaborators::{Embedder, Llm, Message};
pub use engine::{Engine, ForgetOptions, MergeOptions, MergeOutcome, Stats};
pub use error::{EngramError, Result};
pub use events::{Event, EventBus};
pub use hooks::Hooks;
pub use model::{Candidate, Config, HistoryEntry, Memory, Millis, RetrievalWeights};
pub use retriever::{Query, RecallResult};
pub use scorer::Admission;
pub use store::{SortBy, SortOrder, Store, StoreFilter};

/// Commonly used types, for a single glob import.
pub mod prelude {
    pub use crate::collaborators::{Embedder, Llm, Message};
    pub use crate::engine::{Engine, ForgetOptions, MergeOptions, MergeOutcome, Stats};
    pub use crate::error::{EngramError, Result};
    pub use crate::events::Event;
    pub use crate::model::{Candidate, Config, Memory};
    pub use crate::retriever::{Query, RecallResult};
    pub use crate::store::{MemoryStore, Store};
}
