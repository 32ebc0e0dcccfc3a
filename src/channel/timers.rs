//! Per-channel attach, reattach and detach timers.
//!
//! Each armed timer carries a generation token. A callback only acts if its
//! token is still the armed one for its kind when it gets the channel lock;
//! anything else is a timer that lost a race against a newer operation.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TimerKind {
    Attach,
    Reattach,
    Detach,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TimerToken {
    pub(crate) kind: TimerKind,
    pub(crate) generation: u64,
}

#[derive(Debug)]
struct ArmedTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Debug, Default)]
pub(crate) struct Timers {
    generation: u64,
    attach: Option<ArmedTimer>,
    reattach: Option<ArmedTimer>,
    detach: Option<ArmedTimer>,
}

impl Timers {
    fn slot(
        &mut self,
        kind: TimerKind,
    ) -> &mut Option<ArmedTimer> {
        match kind {
            TimerKind::Attach => &mut self.attach,
            TimerKind::Reattach => &mut self.reattach,
            TimerKind::Detach => &mut self.detach,
        }
    }

    /// Arms a timer of `kind` that calls `on_fire` after `delay`.
    ///
    /// Attach and reattach timers exclude each other: arming either one
    /// disarms both first.
    pub(crate) fn arm<F>(
        &mut self,
        kind: TimerKind,
        delay: Duration,
        runtime: &Handle,
        on_fire: F,
    ) -> TimerToken
    where
        F: FnOnce(TimerToken) + Send + 'static,
    {
        match kind {
            TimerKind::Attach | TimerKind::Reattach => {
                self.cancel(TimerKind::Attach);
                self.cancel(TimerKind::Reattach);
            }
            TimerKind::Detach => self.cancel(TimerKind::Detach),
        }

        self.generation += 1;
        let token = TimerToken {
            kind,
            generation: self.generation,
        };
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire(token);
        });
        trace!(?kind, generation = token.generation, ?delay, "timer armed");
        *self.slot(kind) = Some(ArmedTimer {
            generation: token.generation,
            handle,
        });
        token
    }

    pub(crate) fn cancel(
        &mut self,
        kind: TimerKind,
    ) {
        if let Some(armed) = self.slot(kind).take() {
            trace!(?kind, generation = armed.generation, "timer cancelled");
            armed.handle.abort();
        }
    }

    pub(crate) fn cancel_all(&mut self) {
        self.cancel(TimerKind::Attach);
        self.cancel(TimerKind::Reattach);
        self.cancel(TimerKind::Detach);
    }

    pub(crate) fn is_current(
        &mut self,
        token: TimerToken,
    ) -> bool {
        self.slot(token.kind)
            .as_ref()
            .map(|armed| armed.generation == token.generation)
            .unwrap_or(false)
    }

    /// Forgets a timer that has fired, without aborting its task.
    pub(crate) fn clear_fired(
        &mut self,
        token: TimerToken,
    ) {
        if self.is_current(token) {
            self.slot(token.kind).take();
        }
    }

    #[cfg(test)]
    pub(crate) fn is_armed(
        &mut self,
        kind: TimerKind,
    ) -> bool {
        self.slot(kind).is_some()
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
