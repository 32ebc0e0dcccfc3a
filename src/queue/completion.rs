use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::ErrorInfo;

pub type CompletionResult = std::result::Result<(), ErrorInfo>;

type Callback = Box<dyn FnOnce(CompletionResult) + Send>;

/// Notification target for one operation.
///
/// Clones share the same target, and only the first `complete` reaches it.
/// That lets a sender hand a clone to the transport and still fail the
/// operation itself if the transport rejects it synchronously.
#[derive(Clone, Default)]
pub struct Completion {
    inner: Option<Arc<Mutex<Option<Callback>>>>,
}

impl Debug for Completion {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("pending", &self.is_pending())
            .finish()
    }
}

impl Completion {
    /// No one is waiting.
    pub fn none() -> Self {
        Self { inner: None }
    }

    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnOnce(CompletionResult) + Send + 'static,
    {
        Self {
            inner: Some(Arc::new(Mutex::new(Some(Box::new(f))))),
        }
    }

    /// Completion backed by a oneshot, for async callers.
    pub fn channel() -> (Self, oneshot::Receiver<CompletionResult>) {
        let (tx, rx) = oneshot::channel();
        let completion = Self::from_fn(move |result| {
            let _ = tx.send(result);
        });
        (completion, rx)
    }

    /// Completes both targets with the same outcome.
    pub fn join(
        self,
        other: Completion,
    ) -> Completion {
        match (self.is_pending(), other.is_pending()) {
            (false, _) => other,
            (_, false) => self,
            _ => Completion::from_fn(move |result: CompletionResult| {
                self.complete(result.clone());
                other.complete(result);
            }),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.inner.as_ref().map(|cb| cb.lock().is_some()).unwrap_or(false)
    }

    pub fn complete(
        &self,
        result: CompletionResult,
    ) {
        let callback = self.inner.as_ref().and_then(|cb| cb.lock().take());
        if let Some(callback) = callback {
            callback(result);
        }
    }

    pub fn succeed(&self) {
        self.complete(Ok(()));
    }

    pub fn fail(
        &self,
        error: ErrorInfo,
    ) {
        self.complete(Err(error));
    }
}

/// Completions collected under a lock and fired once it is released.
#[derive(Debug, Default)]
#[must_use]
pub struct DeferredCompletions(Vec<(Completion, CompletionResult)>);

impl DeferredCompletions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn succeed(
        &mut self,
        completion: Completion,
    ) {
        self.0.push((completion, Ok(())));
    }

    pub fn fail(
        &mut self,
        completion: Completion,
        error: ErrorInfo,
    ) {
        self.0.push((completion, Err(error)));
    }

    pub fn extend(
        &mut self,
        other: DeferredCompletions,
    ) {
        self.0.extend(other.0);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn run(self) {
        for (completion, result) in self.0 {
            completion.complete(result);
        }
    }
}
