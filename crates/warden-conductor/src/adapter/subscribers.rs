use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{ExitListener, ProcessExit};

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What a listener wants after seeing a value.
pub(crate) enum Listen {
    Keep,
    Detach,
}

type Listener<T> = Arc<dyn Fn(&T) -> Listen + Send + Sync>;

/// Per-process broadcast list. Emission iterates over a copy, so listeners
/// may add or remove subscriptions while being called.
pub(crate) struct Subscribers<T> {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(u64, Listener<T>)>>,
}

impl<T> Default for Subscribers<T> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl<T> Subscribers<T> {
    pub fn add(&self, listener: Listener<T>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.listeners).push((id, listener));
        id
    }

    pub fn remove(&self, id: u64) {
        lock(&self.listeners).retain(|(i, _)| *i != id);
    }

    /// Call every listener in registration order.
    pub fn emit(&self, value: &T) {
        let snapshot: Vec<(u64, Listener<T>)> = lock(&self.listeners).clone();
        for (id, listener) in snapshot {
            if let Listen::Detach = listener(value) {
                self.remove(id);
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        lock(&self.listeners).len()
    }
}

struct ExitState {
    outcome: Option<ProcessExit>,
    next_id: u64,
    listeners: Vec<(u64, ExitListener)>,
}

/// Sticky, fire-once exit notification.
pub(crate) struct ExitSignal {
    state: Mutex<ExitState>,
}

impl Default for ExitSignal {
    fn default() -> Self {
        Self {
            state: Mutex::new(ExitState {
                outcome: None,
                next_id: 1,
                listeners: Vec::new(),
            }),
        }
    }
}

impl ExitSignal {
    /// Register a listener. Returns `None` when the process already exited,
    /// in which case the listener has been called.
    pub fn subscribe(&self, listener: ExitListener) -> Option<u64> {
        let mut state = lock(&self.state);
        if let Some(outcome) = state.outcome.clone() {
            drop(state);
            listener(&outcome);
            return None;
        }
        let id = state.next_id;
        state.next_id += 1;
        state.listeners.push((id, listener));
        Some(id)
    }

    pub fn remove(&self, id: u64) {
        lock(&self.state).listeners.retain(|(i, _)| *i != id);
    }

    /// Record the outcome and notify. Later calls are ignored.
    pub fn fire(&self, outcome: ProcessExit) -> bool {
        let listeners = {
            let mut state = lock(&self.state);
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(outcome.clone());
            std::mem::take(&mut state.listeners)
        };
        for (_, listener) in listeners {
            listener(&outcome);
        }
        true
    }

    pub fn outcome(&self) -> Option<ProcessExit> {
        lock(&self.state).outcome.clone()
    }
}

/// Handle to a registered listener. Dropping it leaves the listener in
/// place until the process entry goes away; call [`Subscription::unsubscribe`]
/// to remove it earlier.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub(crate) fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing left to remove.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn emits_in_registration_order() {
        let subs: Subscribers<u32> = Subscribers::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b"] {
            let seen = seen.clone();
            subs.add(Arc::new(move |v: &u32| {
                seen.lock().unwrap().push(format!("{tag}{v}"));
                Listen::Keep
            }));
        }
        subs.emit(&1);
        assert_eq!(*seen.lock().unwrap(), ["a1", "b1"]);
    }

    #[test]
    fn detaching_listener_runs_once() {
        let subs: Subscribers<u32> = Subscribers::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        subs.add(Arc::new(move |_: &u32| {
            h.fetch_add(1, Ordering::SeqCst);
            Listen::Detach
        }));
        subs.emit(&1);
        subs.emit(&2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(subs.len(), 0);
    }

    #[test]
    fn late_subscriber_misses_earlier_events() {
        let subs: Subscribers<u32> = Subscribers::default();
        subs.emit(&1);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        subs.add(Arc::new(move |v: &u32| {
            s.lock().unwrap().push(*v);
            Listen::Keep
        }));
        subs.emit(&2);
        assert_eq!(*seen.lock().unwrap(), [2]);
    }

    #[test]
    fn exit_is_sticky_and_fires_once() {
        let signal = ExitSignal::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        assert!(signal
            .subscribe(Box::new(move |_: &ProcessExit| {
                h.fetch_add(1, Ordering::SeqCst);
            }))
            .is_some());
        assert!(signal.fire(ProcessExit::ok()));
        assert!(!signal.fire(ProcessExit::failed(Some(1), "again")));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let late = Arc::new(Mutex::new(None));
        let l = late.clone();
        assert!(signal
            .subscribe(Box::new(move |exit: &ProcessExit| {
                *l.lock().unwrap() = Some(exit.clone());
            }))
            .is_none());
        assert_eq!(*late.lock().unwrap(), Some(ProcessExit::ok()));
    }

    #[test]
    fn removed_exit_listener_is_not_called() {
        let signal = ExitSignal::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let id = signal
            .subscribe(Box::new(move |_: &ProcessExit| {
                h.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        signal.remove(id);
        signal.fire(ProcessExit::ok());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unsubscribe_runs_cancel() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        Subscription::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        })
        .unsubscribe();
        Subscription::noop().unsubscribe();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
