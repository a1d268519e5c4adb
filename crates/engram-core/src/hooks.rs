//! The engine's hook fabric: seven extension points. Only `beforeStore` is a
//! true gate — a returned `Err` or panic rejects admission. The other three
//! `before*` hooks (`beforeExtract`, `beforeRecall`, `beforeForget`) and all
//! `after*` observers are invoked for side effects only: a returned `Err` or
//! a panic is caught, logged, and swallowed, and the operation proceeds with
//! its original value as if the hook had not run.

use crate::collaborators::Message;
use crate::model::Candidate;
use crate::retriever::{Query, RecallResult};
use crate::{EngramError, Result};
use std::panic::{catch_unwind, AssertUnwindSafe};

type BeforeExtract = Box<dyn Fn(&[Message]) -> Result<()> + Send + Sync>;
type AfterExtract = Box<dyn Fn(&[Candidate]) + Send + Sync>;
type BeforeStore = Box<dyn Fn(&Candidate) -> Result<()> + Send + Sync>;
type AfterStore = Box<dyn Fn(&crate::model::Memory) + Send + Sync>;
type BeforeRecall = Box<dyn Fn(&Query) -> Result<()> + Send + Sync>;
type AfterRecall = Box<dyn Fn(&[RecallResult]) + Send + Sync>;
type BeforeForget = Box<dyn Fn(&[String]) -> Result<()> + Send + Sync>;

/// Registered hooks, run in registration order. Empty by default.
#[derive(Default)]
pub struct Hooks {
    before_extract: Vec<BeforeExtract>,
    after_extract: Vec<AfterExtract>,
    before_store: Vec<BeforeStore>,
    after_store: Vec<AfterStore>,
    before_recall: Vec<BeforeRecall>,
    after_recall: Vec<AfterRecall>,
    before_forget: Vec<BeforeForget>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_before_extract(&mut self, hook: impl Fn(&[Message]) -> Result<()> + Send + Sync + 'static) {
        self.before_extract.push(Box::new(hook));
    }

    pub fn add_after_extract(&mut self, hook: impl Fn(&[Candidate]) + Send + Sync + 'static) {
        self.after_extract.push(Box::new(hook));
    }

    pub fn add_before_store(&mut self, hook: impl Fn(&Candidate) -> Result<()> + Send + Sync + 'static) {
        self.before_store.push(Box::new(hook));
    }

    pub fn add_after_store(&mut self, hook: impl Fn(&crate::model::Memory) + Send + Sync + 'static) {
        self.after_store.push(Box::new(hook));
    }

    pub fn add_before_recall(&mut self, hook: impl Fn(&Query) -> Result<()> + Send + Sync + 'static) {
        self.before_recall.push(Box::new(hook));
    }

    pub fn add_after_recall(&mut self, hook: impl Fn(&[RecallResult]) + Send + Sync + 'static) {
        self.after_recall.push(Box::new(hook));
    }

    /// Register a `beforeForget` hook. Receives the full set of memory ids
    /// about to be deleted (the computed prune set, or a single id for an
    /// explicit [`crate::engine::Engine::forget`] call). Unlike `beforeStore`,
    /// a returned `Err` or a panic is swallowed and the deletion proceeds.
    pub fn add_before_forget(&mut self, hook: impl Fn(&[String]) -> Result<()> + Send + Sync + 'static) {
        self.before_forget.push(Box::new(hook));
    }

    /// Run the `beforeExtract` hooks in registration order. Neither a
    /// returned `Err` nor a panic can veto extraction; both are logged and
    /// swallowed so extraction always proceeds with the original transcript.
    pub(crate) fn run_before_extract(&self, transcript: &[Message]) {
        for hook in &self.before_extract {
            match catch_unwind(AssertUnwindSafe(|| hook(transcript))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::warn!("beforeExtract hook rejected; swallowing and proceeding: {err}"),
                Err(_) => tracing::warn!("beforeExtract hook panicked; swallowing and proceeding"),
            }
        }
    }

    pub(crate) fn run_after_extract(&self, candidates: &[Candidate]) {
        for hook in &self.after_extract {
            run_observer(|| hook(candidates));
        }
    }

    /// Run the `beforeStore` gates in order. A panicking hook is caught and
    /// converted into the same [`EngramError::HookRejected`] an `Err` return
    /// would have produced, rather than unwinding past the engine.
    pub(crate) fn run_before_store(&self, candidate: &Candidate) -> Result<()> {
        for hook in &self.before_store {
            match catch_unwind(AssertUnwindSafe(|| hook(candidate))) {
                Ok(result) => result?,
                Err(_) => return Err(reject("beforeStore hook panicked")),
            }
        }
        Ok(())
    }

    pub(crate) fn run_after_store(&self, memory: &crate::model::Memory) {
        for hook in &self.after_store {
            run_observer(|| hook(memory));
        }
    }

    /// Run the `beforeRecall` hooks. Like [`Self::run_before_extract`], a
    /// returned `Err` or panic is swallowed and recall proceeds with the
    /// original query.
    pub(crate) fn run_before_recall(&self, query: &Query) {
        for hook in &self.before_recall {
            match catch_unwind(AssertUnwindSafe(|| hook(query))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::warn!("beforeRecall hook rejected; swallowing and proceeding: {err}"),
                Err(_) => tracing::warn!("beforeRecall hook panicked; swallowing and proceeding"),
            }
        }
    }

    pub(crate) fn run_after_recall(&self, results: &[RecallResult]) {
        for hook in &self.after_recall {
            run_observer(|| hook(results));
        }
    }

    /// Run the `beforeForget` hooks. Like [`Self::run_before_extract`], a
    /// returned `Err` or panic is swallowed and the deletion proceeds with
    /// the original id set.
    pub(crate) fn run_before_forget(&self, ids: &[String]) {
        for hook in &self.before_forget {
            match catch_unwind(AssertUnwindSafe(|| hook(ids))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::warn!("beforeForget hook rejected; swallowing and proceeding: {err}"),
                Err(_) => tracing::warn!("beforeForget hook panicked; swallowing and proceeding"),
            }
        }
    }
}

fn run_observer(f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::warn!("an observer hook panicked; ignoring");
    }
}

/// Convenience constructor for rejecting a gate hook with a message.
pub fn reject(reason: impl Into<String>) -> EngramError {
    EngramError::HookRejected(reason.into())
}
