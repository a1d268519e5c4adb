//! Engine event surface: notifications emitted after each
//! operation completes, independent of the hook fabric. Listeners cannot
//! affect the outcome; they observe it.

use crate::engine::MergeOutcome;
use crate::model::Memory;

/// An event emitted by [`crate::engine::Engine`].
#[derive(Debug, Clone)]
pub enum Event {
    /// A candidate was admitted and persisted.
    Stored(Memory),
    /// A candidate failed admission (novelty below threshold, exact
    /// duplicate, or a `beforeStore` hook veto).
    Rejected { content: String, category: String, reason: String },
    /// A recall completed, with the query text and result count.
    Recalled { query: String, result_count: usize },
    /// One or more memories were deleted via `forget`/`forget_many`.
    Forgotten { ids: Vec<String>, count: usize },
    /// One merge pass combined near-duplicates within one or more categories.
    Merged(MergeOutcome),
    /// An operation failed with an engine error.
    Error(String),
}

type Listener = Box<dyn Fn(&Event) + Send + Sync>;

/// A simple fan-out list of event listeners.
#[derive(Default)]
pub struct EventBus {
    listeners: Vec<Listener>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, listener: impl Fn(&Event) + Send + Sync + 'static) {
        self.listeners.push(Box::new(listener));
    }

    pub(crate) fn emit(&self, event: Event) {
        for listener in &self.listeners {
            listener(&event);
        }
    }
}
