//! Operations that could not be sent yet, each paired with its completion.
//!
//! Every queued operation leaves the queue exactly once: either taken by a
//! drain and handed to the sender, or taken by `fail_all`. Both take the
//! whole buffer under the queue lock, so the two can never see the same op.
mod completion;

pub use completion::*;


use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::debug;
use tracing::trace;

use crate::metrics::PENDING_OPERATIONS_FAILED;
use crate::metrics::PENDING_OPERATIONS_SENT;
use crate::ErrorInfo;

#[derive(Debug)]
pub struct PendingOp<T> {
    /// Set for operations that supersede earlier ones with the same key
    pub key: Option<String>,
    pub payload: T,
    pub completion: Completion,
}

#[derive(Debug)]
pub struct PendingQueue<T> {
    kind: &'static str,
    ops: Mutex<VecDeque<PendingOp<T>>>,
}

impl<T> PendingQueue<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            ops: Mutex::new(VecDeque::new()),
        }
    }

    pub fn enqueue(
        &self,
        payload: T,
        completion: Completion,
    ) {
        let mut ops = self.ops.lock();
        ops.push_back(PendingOp {
            key: None,
            payload,
            completion,
        });
        trace!(kind = self.kind, len = ops.len(), "PendingQueue::enqueue");
    }

    /// Enqueues `payload` under `key`, replacing the payload of an op already
    /// queued with that key in place. The replaced op's completion is joined to
    /// the new one, so both callers learn the outcome.
    pub fn enqueue_keyed(
        &self,
        key: impl Into<String>,
        payload: T,
        completion: Completion,
    ) {
        let key = key.into();
        let mut ops = self.ops.lock();
        if let Some(existing) = ops.iter_mut().find(|op| op.key.as_deref() == Some(key.as_str())) {
            debug!(kind = self.kind, key = %key, "replacing queued operation");
            existing.payload = payload;
            existing.completion = std::mem::take(&mut existing.completion).join(completion);
            return;
        }
        ops.push_back(PendingOp {
            key: Some(key),
            payload,
            completion,
        });
    }

    pub fn len(&self) -> usize {
        self.ops.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.lock().is_empty()
    }

    /// Removes and returns every queued op in submission order.
    pub fn take_all(&self) -> Vec<PendingOp<T>> {
        std::mem::take(&mut *self.ops.lock()).into()
    }

    /// Sends every queued op in FIFO order. A rejected send fails only that
    /// op; the rest are still sent. Returned failures fire once the caller
    /// drops its own locks.
    pub fn drain_and_send<F>(
        &self,
        mut send: F,
    ) -> DeferredCompletions
    where
        F: FnMut(T, Completion) -> std::result::Result<(), ErrorInfo>,
    {
        let mut failures = DeferredCompletions::new();
        let ops = self.take_all();
        if !ops.is_empty() {
            debug!(kind = self.kind, count = ops.len(), "replaying queued operations");
        }
        for op in ops {
            match send(op.payload, op.completion.clone()) {
                Ok(()) => PENDING_OPERATIONS_SENT.with_label_values(&[self.kind]).inc(),
                Err(e) => {
                    PENDING_OPERATIONS_FAILED.with_label_values(&[self.kind]).inc();
                    failures.fail(op.completion, e);
                }
            }
        }
        failures
    }

    /// Fails and clears every queued op with `reason`.
    pub fn fail_all(
        &self,
        reason: &ErrorInfo,
    ) -> DeferredCompletions {
        let mut failures = DeferredCompletions::new();
        let ops = self.take_all();
        if !ops.is_empty() {
            debug!(kind = self.kind, count = ops.len(), code = reason.code, "failing queued operations");
            PENDING_OPERATIONS_FAILED
                .with_label_values(&[self.kind])
                .inc_by(ops.len() as u64);
        }
        for op in ops {
            failures.fail(op.completion, reason.clone());
        }
        failures
    }
}
