//! Typed listener registry shared by channels and presence.
//!
//! Listeners are registered either for every event or for one key (a state,
//! an event name, a presence action). Emission snapshots the matching
//! listeners and invokes them outside any registry lock, so a listener may
//! register or remove listeners while being called. A listener returning an
//! error is logged and does not stop delivery to the others.

use std::hash::Hash;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::trace;
use tracing::warn;


pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Listener<E> = Arc<dyn Fn(&E) -> std::result::Result<(), BoxError> + Send + Sync>;

/// Handle returned by registration, used to remove the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration<E> {
    id: u64,
    once: bool,
    listener: Listener<E>,
}

impl<E> Clone for Registration<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            once: self.once,
            listener: self.listener.clone(),
        }
    }
}

pub struct ObserverRegistry<K, E>
where
    K: Eq + Hash + Clone,
{
    any: Mutex<Vec<Registration<E>>>,
    keyed: DashMap<K, Vec<Registration<E>>>,
    next_id: AtomicU64,
    name: &'static str,
}

impl<K, E> std::fmt::Debug for ObserverRegistry<K, E>
where
    K: Eq + Hash + Clone,
{
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("name", &self.name)
            .field("any", &self.any.lock().len())
            .field("keyed", &self.keyed.len())
            .finish()
    }
}

impl<K, E> ObserverRegistry<K, E>
where
    K: Eq + Hash + Clone,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            any: Mutex::new(Vec::new()),
            keyed: DashMap::new(),
            next_id: AtomicU64::new(1),
            name,
        }
    }

    /// Registers `listener` for every event, or only for `key` when given.
    pub fn on<F>(
        &self,
        key: Option<K>,
        listener: F,
    ) -> ListenerId
    where
        F: Fn(&E) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.register(key, false, Arc::new(listener))
    }

    /// Like [`on`](Self::on) but the listener is removed before its first call.
    pub fn once<F>(
        &self,
        key: Option<K>,
        listener: F,
    ) -> ListenerId
    where
        F: Fn(&E) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.register(key, true, Arc::new(listener))
    }

    fn register(
        &self,
        key: Option<K>,
        once: bool,
        listener: Listener<E>,
    ) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let registration = Registration { id, once, listener };
        match key {
            Some(key) => self.keyed.entry(key).or_default().push(registration),
            None => self.any.lock().push(registration),
        }
        trace!(registry = self.name, listener_id = id, once, "listener registered");
        ListenerId(id)
    }

    /// Removes one listener wherever it was registered. Returns false if unknown.
    pub fn off(
        &self,
        id: ListenerId,
    ) -> bool {
        let mut removed = false;
        {
            let mut any = self.any.lock();
            let before = any.len();
            any.retain(|r| r.id != id.0);
            removed |= any.len() != before;
        }

        let keys: Vec<K> = self.keyed.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.keyed.remove_if_mut(&key, |_key, registrations| {
                let before = registrations.len();
                registrations.retain(|r| r.id != id.0);
                removed |= registrations.len() != before;
                registrations.is_empty()
            });
        }
        removed
    }

    pub fn off_all(&self) {
        self.any.lock().clear();
        self.keyed.clear();
    }

    pub fn listener_count(&self) -> usize {
        self.any.lock().len() + self.keyed.iter().map(|e| e.value().len()).sum::<usize>()
    }

    /// Delivers `event` to the all-events listeners, then to those registered for `key`.
    pub fn emit(
        &self,
        key: Option<&K>,
        event: &E,
    ) {
        let mut targets = take_matching(&mut self.any.lock());
        if let Some(key) = key {
            if let Some(mut registrations) = self.keyed.get_mut(key) {
                targets.extend(take_matching(registrations.value_mut()));
            }
            self.keyed.remove_if(key, |_key, registrations| registrations.is_empty());
        }

        for registration in targets {
            if let Err(e) = (registration.listener)(event) {
                warn!(
                    registry = self.name,
                    listener_id = registration.id,
                    "listener failed: {}",
                    e
                );
            }
        }
    }
}

/// Snapshot of the registrations to call, with once-listeners already removed.
fn take_matching<E>(registrations: &mut Vec<Registration<E>>) -> Vec<Registration<E>> {
    let snapshot = registrations.clone();
    registrations.retain(|r| !r.once);
    snapshot
}
