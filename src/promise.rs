//! The promise itself.
//!
//! A [`Promise`] is a shared handle to a node holding a single-assignment
//! [`ResultCell`] and the [`Registry`] of everything waiting on it, both
//! behind one mutex per node. Chaining creates child nodes bound to an
//! execution [`Context`]; a child is registered as a dependent of its
//! parent so a failure reaches it even though its step never runs.
use crate::{
    cell::{ResultCell, State},
    context::Context,
    producer::{self, Mirror, Produce, Resolver},
    registry::{Continuation, Dropable, Handler, NodeId, Notification, Registry},
    timer::{self, TimerId},
    Error,
};
use parking_lot::Mutex;
use std::{
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Weak},
    task::{Poll, Waker},
    time::Duration,
};

pub(crate) struct Node<T> {
    id: NodeId,
    context: Context,
    shared: Mutex<Shared<T>>,
}

struct Shared<T> {
    cell: ResultCell<T>,
    registry: Registry<T>,
    /// Set once a nested step produced the promise this node mirrors.
    inner: Option<Weak<Node<T>>>,
    timer: Option<TimerId>,
}

struct Settled<T> {
    notification: Notification<T>,
    timer: Option<TimerId>,
}

impl<T: Clone + Send + 'static> Node<T> {
    pub(crate) fn new(context: Context) -> Arc<Self> {
        Arc::new(Node {
            id: NodeId::next(),
            context,
            shared: Mutex::new(Shared {
                cell: ResultCell::new(),
                registry: Registry::default(),
                inner: None,
                timer: None,
            }),
        })
    }

    /// Moves the node to its terminal state and notifies every listener.
    /// Returns false, changing nothing, when the node was already settled.
    pub(crate) fn settle(&self, outcome: Result<T, Error>) -> bool {
        let settled = {
            let mut guard = self.shared.lock();
            Self::settle_locked(&mut guard, outcome)
        };
        self.finish(settled)
    }

    /// Performs the transition under the caller's guard. The returned
    /// notification must be delivered once the guard is released.
    fn settle_locked(shared: &mut Shared<T>, outcome: Result<T, Error>) -> Option<Settled<T>> {
        let notification = match outcome {
            Ok(value) => {
                if !shared.cell.try_set(value.clone()) {
                    return None;
                }
                shared.registry.drain_resolved(value)
            }
            Err(error) => {
                if !shared.cell.try_set_error(error.clone()) {
                    return None;
                }
                shared.registry.drain_failed(error)
            }
        };
        shared.inner = None;
        Some(Settled {
            notification,
            timer: shared.timer.take(),
        })
    }

    fn finish(&self, settled: Option<Settled<T>>) -> bool {
        match settled {
            Some(Settled {
                notification,
                timer,
            }) => {
                if let Some(timer) = timer {
                    timer::cancel(timer);
                }
                tracing::trace!(promise = %self.id, context = %self.context.label(), "settled");
                notification.deliver();
                true
            }
            None => {
                tracing::trace!(promise = %self.id, "ignoring late settle");
                false
            }
        }
    }

    /// Ties a timeout to this node; settling disarms it.
    pub(crate) fn attach_timer(&self, id: TimerId) {
        let settled = {
            let mut guard = self.shared.lock();
            if guard.cell.state().is_pending() {
                guard.timer = Some(id);
                false
            } else {
                true
            }
        };
        if settled {
            timer::cancel(id);
        }
    }

    /// Runs `continuation` with the value: now if resolved, at resolution if
    /// pending, never if failed.
    pub(crate) fn on_value(&self, continuation: Continuation<T>) {
        let value = {
            let mut guard = self.shared.lock();
            let shared = &mut *guard;
            match shared.cell.state() {
                State::Pending => {
                    shared.registry.push_continuation(continuation);
                    return;
                }
                State::Resolved(value) => value.clone(),
                State::Failed(_) => return,
            }
        };
        continuation(value);
    }

    pub(crate) fn on_error(&self, handler: Handler) {
        let error = {
            let mut guard = self.shared.lock();
            let shared = &mut *guard;
            match shared.cell.state() {
                State::Pending => {
                    shared.registry.push_handler(handler);
                    return;
                }
                State::Failed(error) => error.clone(),
                State::Resolved(_) => return,
            }
        };
        handler(error);
    }

    pub(crate) fn add_dependent(&self, dependent: Arc<dyn Dropable>) {
        let error = {
            let mut guard = self.shared.lock();
            let shared = &mut *guard;
            match shared.cell.state() {
                State::Pending => {
                    shared.registry.push_dependent(dependent);
                    return;
                }
                State::Failed(error) => error.clone(),
                State::Resolved(_) => return,
            }
        };
        dependent.drop_with(error);
    }

    pub(crate) fn poll_settled(&self, waker: &Waker) -> Poll<Result<T, Error>> {
        let mut guard = self.shared.lock();
        let shared = &mut *guard;
        match shared.cell.state() {
            State::Pending => {
                shared.registry.push_waker(waker);
                Poll::Pending
            }
            State::Resolved(value) => Poll::Ready(Ok(value.clone())),
            State::Failed(error) => Poll::Ready(Err(error.clone())),
        }
    }

    /// Makes this node mirror `inner`. If this node already failed, `inner`
    /// is failed with the same error instead of being left to run unobserved.
    pub(crate) fn set_inner(self: &Arc<Self>, inner: &Arc<Node<T>>) {
        let failed = {
            let mut guard = self.shared.lock();
            let shared = &mut *guard;
            match shared.cell.state() {
                State::Pending => {
                    shared.inner = Some(Arc::downgrade(inner));
                    None
                }
                State::Failed(error) => Some(error.clone()),
                State::Resolved(_) => return,
            }
        };
        if let Some(error) = failed {
            tracing::debug!(promise = %self.id, inner = %inner.id, "nested promise already failed, dropping inner");
            inner.drop_with(error);
            return;
        }
        let nested = self.clone();
        inner.on_value(Box::new(move |value| {
            nested.settle(Ok(value));
        }));
        let nested = self.clone();
        inner.on_error(Box::new(move |error| {
            nested.settle(Err(error));
        }));
    }

    fn snapshot(&self) -> State<T> {
        self.shared.lock().cell.snapshot()
    }
}

impl<T: Clone + Send + 'static> Dropable for Node<T> {
    fn id(&self) -> NodeId {
        self.id
    }

    fn drop_with(&self, error: Error) {
        // Forward or fail under the same guard `set_inner` takes.
        let (inner, settled) = {
            let mut guard = self.shared.lock();
            let inner = guard.inner.as_ref().and_then(Weak::upgrade);
            match inner {
                Some(inner) => (Some(inner), None),
                None => (None, Self::settle_locked(&mut guard, Err(error.clone()))),
            }
        };
        match inner {
            Some(inner) => {
                tracing::trace!(promise = %self.id, inner = %inner.id, "forwarding drop to inner");
                inner.drop_with(error)
            }
            None => {
                if self.finish(settled) {
                    tracing::debug!(promise = %self.id, "dropped");
                }
            }
        }
    }
}

/// Runs a user step, turning a panic into a failure.
pub(crate) fn guarded<R>(step: impl FnOnce() -> Result<R, Error>) -> Result<R, Error> {
    catch_unwind(AssertUnwindSafe(step)).unwrap_or_else(|payload| Err(Error::panicked(payload)))
}

/// A deferred value bound to an execution [`Context`].
///
/// Clones are handles to the same promise. A promise settles exactly once,
/// with a value or an [`Error`], and keeps that outcome forever: listeners
/// attached late are served immediately.
///
/// # Examples
///
/// ```
/// use promise_chain::Promise;
/// use std::thread;
///
/// let (promise, resolver) = Promise::<String>::pending();
/// let greeting = promise.then(|name| Ok(format!("hello {name}")));
/// let task = thread::spawn(move || resolver.resolve("🍓".into()));
/// assert_eq!(greeting.wait().unwrap(), "hello 🍓");
/// task.join().expect("The task thread has panicked");
/// ```
pub struct Promise<T> {
    pub(crate) node: Arc<Node<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
        }
    }
}

impl Promise<()> {
    /// Returns a builder configuring how a promise is created.
    pub fn builder() -> Builder {
        Builder::default()
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    pub(crate) fn from_node(node: Arc<Node<T>>) -> Self {
        Self { node }
    }

    /// A pending promise on the current context (or the background one),
    /// with the resolver that settles it.
    pub fn pending() -> (Self, Resolver<T>) {
        Self::pending_on(Context::current_or_background())
    }

    pub fn pending_on(context: Context) -> (Self, Resolver<T>) {
        let node = Node::new(context);
        (Self::from_node(node.clone()), Resolver::new(node))
    }

    pub fn resolved(value: T) -> Self {
        let node = Node::new(Context::current_or_background());
        node.settle(Ok(value));
        Self::from_node(node)
    }

    pub fn failed(error: Error) -> Self {
        let node = Node::new(Context::current_or_background());
        node.settle(Err(error));
        Self::from_node(node)
    }

    pub fn id(&self) -> NodeId {
        self.node.id
    }

    /// The context chained steps run on unless told otherwise.
    pub fn context(&self) -> &Context {
        &self.node.context
    }

    pub fn state(&self) -> State<T> {
        self.node.snapshot()
    }

    pub fn value(&self) -> Option<T> {
        match self.node.snapshot() {
            State::Resolved(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<Error> {
        match self.node.snapshot() {
            State::Failed(error) => Some(error),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        !self.node.shared.lock().cell.state().is_pending()
    }

    pub fn is_error(&self) -> bool {
        self.node.shared.lock().cell.state().error().is_some()
    }

    /// Ids of the promises this one fails into while pending.
    pub fn dependents(&self) -> Vec<NodeId> {
        self.node.shared.lock().registry.dependent_ids()
    }

    /// Runs `step` with the value once this promise resolves, on this
    /// promise's context.
    ///
    /// The returned promise settles with the step's outcome. If this promise
    /// fails, the step is skipped and the returned promise fails too.
    pub fn then<U, F>(&self, step: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<U, Error> + Send + 'static,
    {
        self.then_on(self.context().clone(), step)
    }

    /// Like [`Promise::then`], running `step` on `context`.
    pub fn then_on<U, F>(&self, context: Context, step: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<U, Error> + Send + 'static,
    {
        let child = Node::new(context.clone());
        self.node.add_dependent(child.clone());
        let target = child.clone();
        self.node.on_value(Box::new(move |value| {
            context.sync_if_possible(move || {
                target.settle(guarded(move || step(value)));
            });
        }));
        Promise::from_node(child)
    }

    /// Runs `step` once this promise resolves and follows the promise it
    /// returns.
    ///
    /// Dropping the returned promise after `step` ran drops the promise
    /// `step` produced.
    pub fn then_continue<U, F>(&self, step: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<Promise<U>, Error> + Send + 'static,
    {
        self.then_continue_on(self.context().clone(), step)
    }

    pub fn then_continue_on<U, F>(&self, context: Context, step: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<Promise<U>, Error> + Send + 'static,
    {
        let nested = Node::new(context.clone());
        self.node.add_dependent(nested.clone());
        let target = nested.clone();
        self.node.on_value(Box::new(move |value| {
            context.sync_if_possible(move || match guarded(move || step(value)) {
                Ok(inner) => Mirror::new(inner).produce(Resolver::new(target)),
                Err(error) => {
                    target.settle(Err(error));
                }
            });
        }));
        Promise::from_node(nested)
    }

    /// Registers `handler` to run once if this promise fails.
    ///
    /// The handler runs on whichever thread delivers the failure. Returns
    /// this promise for further chaining.
    pub fn handle<F>(&self, handler: F) -> Promise<T>
    where
        F: FnOnce(Error) + Send + 'static,
    {
        let id = self.node.id;
        self.node.on_error(Box::new(move |error| {
            if catch_unwind(AssertUnwindSafe(move || handler(error))).is_err() {
                tracing::error!(promise = %id, "error handler panicked");
            }
        }));
        self.clone()
    }

    /// Runs `on_settle` exactly once with this promise's outcome, whichever
    /// it is.
    ///
    /// The returned promise resolves after `on_settle` handled a value, and
    /// fails with this promise's error otherwise, so failures keep flowing
    /// down the chain.
    pub fn finally<F>(&self, on_settle: F) -> Promise<()>
    where
        F: FnOnce(Result<T, Error>) + Send + 'static,
    {
        self.finally_on(self.context().clone(), on_settle)
    }

    pub fn finally_on<F>(&self, context: Context, on_settle: F) -> Promise<()>
    where
        F: FnOnce(Result<T, Error>) + Send + 'static,
    {
        let once = Arc::new(Mutex::new(Some(on_settle)));
        let on_value = once.clone();
        let settled = self.then_on(context.clone(), move |value| {
            let on_settle = on_value.lock().take();
            if let Some(on_settle) = on_settle {
                on_settle(Ok(value));
            }
            Ok(())
        });
        settled.handle(move |error| {
            context.sync_if_possible(move || {
                let on_settle = once.lock().take();
                if let Some(on_settle) = on_settle {
                    on_settle(Err(error));
                }
            });
        })
    }

    /// Fails this promise with `error`. A no-op once settled.
    ///
    /// A nested promise whose inner promise is known forwards the drop to it.
    pub fn drop_with(&self, error: Error) {
        self.node.drop_with(error)
    }

    /// Drops with the default manual drop error.
    pub fn cancel(&self) {
        self.drop_with(Error::dropped())
    }
}

impl<T: Clone + Send + 'static> Dropable for Promise<T> {
    fn id(&self) -> NodeId {
        self.node.id
    }

    fn drop_with(&self, error: Error) {
        self.node.drop_with(error)
    }
}

impl<T: Clone + Send + fmt::Debug + 'static> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("id", &self.node.id)
            .field("context", &self.node.context.label())
            .field("state", &self.node.snapshot())
            .finish()
    }
}

/// Creation options for a [`Promise`].
///
/// Without an explicit context, promises are bound to the calling context or
/// the background context.
///
/// # Examples
///
/// ```
/// use promise_chain::Promise;
/// use std::time::Duration;
///
/// let never = Promise::builder()
///     .timeout(Duration::from_millis(20))
///     .worker(|resolver: promise_chain::Resolver<u8>| std::mem::forget(resolver));
/// assert_eq!(never.wait().unwrap_err().description(), "timed out");
/// ```
#[derive(Debug, Clone, Default)]
pub struct Builder {
    context: Option<Context>,
    timeout: Option<Duration>,
}

impl Builder {
    pub fn context(self, context: Context) -> Self {
        Self {
            context: Some(context),
            ..self
        }
    }

    /// Fails the promise if it is still pending `after` its creation.
    pub fn timeout(self, after: Duration) -> Self {
        Self {
            timeout: Some(after),
            ..self
        }
    }

    /// An externally resolved promise.
    pub fn pending<T: Clone + Send + 'static>(self) -> (Promise<T>, Resolver<T>) {
        let context = self
            .context
            .unwrap_or_else(Context::current_or_background);
        let (promise, resolver) = Promise::pending_on(context);
        if let Some(after) = self.timeout {
            producer::arm_timeout(&promise.node, after);
        }
        (promise, resolver)
    }

    /// A promise driven by `producer`, started on the promise's context.
    pub fn produce<T, P>(self, producer: P) -> Promise<T>
    where
        T: Clone + Send + 'static,
        P: Produce<T>,
    {
        let (promise, resolver) = self.pending();
        let id = promise.id();
        promise.context().sync_if_possible(move || {
            if catch_unwind(AssertUnwindSafe(move || producer.produce(resolver))).is_err() {
                tracing::error!(promise = %id, "producer panicked");
            }
        });
        promise
    }

    /// A promise settled by the outcome of `work`.
    pub fn run<T, F>(self, work: F) -> Promise<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> Result<T, Error> + Send + 'static,
    {
        self.produce(producer::Task::new(work))
    }

    /// A promise settled through the resolver handed to `worker`.
    pub fn worker<T, F>(self, worker: F) -> Promise<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce(Resolver<T>) + Send + 'static,
    {
        self.produce(producer::Callback::new(worker))
    }
}
