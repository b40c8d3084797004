//! Listeners waiting on a promise.
//!
//! A registry holds what has to happen once a promise settles: success
//! continuations, error handlers, dependents to fail and wakers of futures
//! awaiting the result. Settling drains the registry under the promise's
//! lock into a [`Notification`], which is delivered after the lock is
//! released so listeners may touch the promise again.
use crate::Error;
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    task::Waker,
};

static NEXT_NODE: AtomicU64 = AtomicU64::new(1);

/// Stable identifier of a promise node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    pub(crate) fn next() -> Self {
        NodeId(NEXT_NODE.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "promise#{}", self.0)
    }
}

/// Something that can be told to fail.
///
/// Failures cascade from a promise to its dependents through this trait,
/// whatever their value type.
pub trait Dropable: Send + Sync {
    fn id(&self) -> NodeId;

    /// Fails with `error`; a no-op once settled.
    fn drop_with(&self, error: Error);
}

pub(crate) type Continuation<T> = Box<dyn FnOnce(T) + Send + 'static>;
pub(crate) type Handler = Box<dyn FnOnce(Error) + Send + 'static>;

pub(crate) struct Registry<T> {
    continuations: Vec<Continuation<T>>,
    handlers: Vec<Handler>,
    dependents: Vec<Arc<dyn Dropable>>,
    wakers: Vec<Waker>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            continuations: Vec::new(),
            handlers: Vec::new(),
            dependents: Vec::new(),
            wakers: Vec::new(),
        }
    }
}

impl<T> Registry<T> {
    pub(crate) fn push_continuation(&mut self, continuation: Continuation<T>) {
        self.continuations.push(continuation);
    }

    pub(crate) fn push_handler(&mut self, handler: Handler) {
        self.handlers.push(handler);
    }

    /// Adds a fails-into edge. Edges are a set keyed by node id.
    pub(crate) fn push_dependent(&mut self, dependent: Arc<dyn Dropable>) {
        if self.dependents.iter().all(|known| known.id() != dependent.id()) {
            self.dependents.push(dependent);
        }
    }

    pub(crate) fn push_waker(&mut self, waker: &Waker) {
        if !self.wakers.iter().any(|known| known.will_wake(waker)) {
            self.wakers.push(waker.clone());
        }
    }

    pub(crate) fn dependent_ids(&self) -> Vec<NodeId> {
        self.dependents.iter().map(|dependent| dependent.id()).collect()
    }

    /// Takes everything a resolution must notify. Handlers and dependents
    /// will never fire and are released.
    pub(crate) fn drain_resolved(&mut self, value: T) -> Notification<T> {
        self.handlers.clear();
        self.dependents.clear();
        Notification::Resolved {
            value,
            continuations: std::mem::take(&mut self.continuations),
            wakers: std::mem::take(&mut self.wakers),
        }
    }

    /// Takes everything a failure must notify. Continuations will never run
    /// and are released.
    pub(crate) fn drain_failed(&mut self, error: Error) -> Notification<T> {
        self.continuations.clear();
        Notification::Failed {
            error,
            handlers: std::mem::take(&mut self.handlers),
            dependents: std::mem::take(&mut self.dependents),
            wakers: std::mem::take(&mut self.wakers),
        }
    }
}

#[must_use]
pub(crate) enum Notification<T> {
    Resolved {
        value: T,
        continuations: Vec<Continuation<T>>,
        wakers: Vec<Waker>,
    },
    Failed {
        error: Error,
        handlers: Vec<Handler>,
        dependents: Vec<Arc<dyn Dropable>>,
        wakers: Vec<Waker>,
    },
}

impl<T: Clone> Notification<T> {
    /// Runs every drained listener in registration order. Must be called
    /// without holding the owner's lock.
    pub(crate) fn deliver(self) {
        match self {
            Notification::Resolved {
                value,
                continuations,
                wakers,
            } => {
                for continuation in continuations {
                    continuation(value.clone());
                }
                wakers.into_iter().for_each(Waker::wake);
            }
            Notification::Failed {
                error,
                handlers,
                dependents,
                wakers,
            } => {
                for handler in handlers {
                    handler(error.clone());
                }
                cascade(&dependents, &error);
                wakers.into_iter().for_each(Waker::wake);
            }
        }
    }
}

/// Walks the fails-into edges of a failed node.
pub(crate) fn cascade(dependents: &[Arc<dyn Dropable>], error: &Error) {
    for dependent in dependents {
        tracing::trace!(dependent = %dependent.id(), "cascading failure");
        dependent.drop_with(error.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder {
        id: NodeId,
        seen: Mutex<Vec<String>>,
    }

    impl Dropable for Recorder {
        fn id(&self) -> NodeId {
            self.id
        }

        fn drop_with(&self, error: Error) {
            self.seen.lock().push(error.description().to_owned());
        }
    }

    fn recorder() -> Arc<Recorder> {
        Arc::new(Recorder {
            id: NodeId::next(),
            seen: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn test_continuations_drain_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = Registry::<u32>::default();
        for tag in 0..3 {
            let log = log.clone();
            registry.push_continuation(Box::new(move |value| log.lock().push((tag, value))));
        }
        registry.push_handler(Box::new(|_| panic!("handler must not run")));
        registry.drain_resolved(7).deliver();
        assert_eq!(*log.lock(), vec![(0, 7), (1, 7), (2, 7)]);
        // Drained: a second drain notifies nobody.
        registry.drain_resolved(8).deliver();
        assert_eq!(log.lock().len(), 3);
    }

    #[test]
    fn test_failure_reaches_handlers_and_dependents() {
        let handled = Arc::new(Mutex::new(None));
        let dependent = recorder();
        let mut registry = Registry::<u32>::default();
        registry.push_continuation(Box::new(|_| panic!("continuation must not run")));
        let sink = handled.clone();
        registry.push_handler(Box::new(move |error| *sink.lock() = Some(error)));
        registry.push_dependent(dependent.clone());
        registry.drain_failed(Error::new("broken")).deliver();
        assert_eq!(handled.lock().as_ref().map(Error::description), Some("broken"));
        assert_eq!(*dependent.seen.lock(), vec!["broken".to_owned()]);
    }

    #[test]
    fn test_dependents_are_a_set() {
        let dependent = recorder();
        let mut registry = Registry::<()>::default();
        registry.push_dependent(dependent.clone());
        registry.push_dependent(dependent.clone());
        registry.push_dependent(recorder());
        assert_eq!(registry.dependent_ids().len(), 2);
        registry.drain_failed(Error::new("once")).deliver();
        assert_eq!(dependent.seen.lock().len(), 1);
    }
}
