//! How a promise gets its value.
//!
//! A promise is either resolved from the outside through its [`Resolver`],
//! or driven by a [`Produce`] strategy started when the promise is built:
//! a [`Task`] closure, a [`Callback`] worker handed the resolver, a
//! [`Mirror`] of another promise, or a future (see [`crate::bridge`]).
use crate::{
    context::Context,
    lane,
    promise::{guarded, Node, Promise},
    registry::Dropable,
    timer,
    Error,
};
use std::{
    sync::{Arc, Weak},
    thread,
    time::Duration,
};

/// Strategy settling a freshly created promise.
pub trait Produce<T: Clone + Send + 'static>: Send + 'static {
    fn produce(self, resolver: Resolver<T>);
}

/// The producing side of a promise.
///
/// Settling consumes the resolver, so one resolver settles at most once. A
/// resolver dropped without settling fails its promise with
/// [`Error::producer_dropped`].
///
/// # Examples
///
/// ```
/// use promise_chain::Promise;
/// use std::thread;
///
/// let (promise, resolver) = Promise::<String>::pending();
/// let task = thread::spawn(move || {
///     // Ensure we move the resolver into this thread but we never settle it.
///     drop(resolver);
/// });
/// task.join().expect("The task thread has panicked");
/// assert_eq!(promise.wait().unwrap_err().description(), "producer dropped");
/// ```
pub struct Resolver<T: Clone + Send + 'static> {
    node: Arc<Node<T>>,
    settled: bool,
}

impl<T: Clone + Send + 'static> Resolver<T> {
    pub(crate) fn new(node: Arc<Node<T>>) -> Self {
        Self {
            node,
            settled: false,
        }
    }

    fn into_node(mut self) -> Arc<Node<T>> {
        self.settled = true;
        self.node.clone()
    }

    /// The promise this resolver settles.
    pub fn promise(&self) -> Promise<T> {
        Promise::from_node(self.node.clone())
    }

    pub fn is_pending(&self) -> bool {
        !self.promise().is_completed()
    }

    /// Returns false if the promise was already settled (dropped, timed out).
    pub fn resolve(self, value: T) -> bool {
        self.settle(Ok(value))
    }

    pub fn reject(self, error: Error) -> bool {
        self.settle(Err(error))
    }

    pub fn settle(self, outcome: Result<T, Error>) -> bool {
        self.into_node().settle(outcome)
    }

    /// Settles from a value/error pair. The value wins when both are given;
    /// neither is an invalid result.
    pub fn complete(self, value: Option<T>, error: Option<Error>) -> bool {
        match (value, error) {
            (Some(value), _) => self.resolve(value),
            (None, error) => self.reject(error.unwrap_or_else(Error::invalid_result)),
        }
    }
}

impl<T: Clone + Send + 'static> Drop for Resolver<T> {
    /// If this is an unsettled resolver, fail the promise.
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let error = if thread::panicking() {
            Error::new("step panicked").with_reason("producer panicked before settling")
        } else {
            Error::producer_dropped()
        };
        if self.node.settle(Err(error)) {
            tracing::debug!(promise = %self.node.id(), "resolver dropped before settling");
        }
    }
}

/// Settles with the outcome of a closure.
pub struct Task<F>(F);

impl<F> Task<F> {
    pub fn new(work: F) -> Self {
        Task(work)
    }
}

impl<T, F> Produce<T> for Task<F>
where
    T: Clone + Send + 'static,
    F: FnOnce() -> Result<T, Error> + Send + 'static,
{
    fn produce(self, resolver: Resolver<T>) {
        resolver.settle(guarded(self.0));
    }
}

/// Hands the resolver to a worker, which settles it whenever it is done.
pub struct Callback<F>(F);

impl<F> Callback<F> {
    pub fn new(worker: F) -> Self {
        Callback(worker)
    }
}

impl<T, F> Produce<T> for Callback<F>
where
    T: Clone + Send + 'static,
    F: FnOnce(Resolver<T>) + Send + 'static,
{
    fn produce(self, resolver: Resolver<T>) {
        (self.0)(resolver)
    }
}

/// Follows another promise's outcome; drops are forwarded to it.
pub struct Mirror<T> {
    inner: Promise<T>,
}

impl<T> Mirror<T> {
    pub fn new(inner: Promise<T>) -> Self {
        Mirror { inner }
    }
}

impl<T: Clone + Send + 'static> Produce<T> for Mirror<T> {
    fn produce(self, resolver: Resolver<T>) {
        resolver.into_node().set_inner(&self.inner.node);
    }
}

/// Fails `node` with a timeout if it is still pending `after` from now. The
/// timer holds no strong reference, so it never keeps a promise alive, and
/// settling the promise disarms it.
pub(crate) fn arm_timeout<T: Clone + Send + 'static>(node: &Arc<Node<T>>, after: Duration) {
    let weak: Weak<Node<T>> = Arc::downgrade(node);
    let id = node.id();
    let fire = Box::new(move || {
        if let Some(node) = weak.upgrade() {
            if node.settle(Err(Error::timeout(after))) {
                tracing::debug!(promise = %id, ?after, "timed out");
            }
        }
    });
    match timer::schedule(after, fire) {
        Ok(timer) => node.attach_timer(timer),
        Err(error) => tracing::warn!(promise = %id, %error, "cannot arm timeout"),
    }
}

/// Perform `work` as a promise on the background context.
///
/// # Examples
///
/// ```
/// use promise_chain::run_promise;
///
/// let sum = run_promise(|| Ok(1 + 1)).then(|v| Ok(v + 1));
/// assert_eq!(sum.wait().unwrap(), 3);
/// ```
pub fn run_promise<T, F>(work: F) -> Promise<T>
where
    T: Clone + Send + 'static,
    F: FnOnce() -> Result<T, Error> + Send + 'static,
{
    run_promise_on(lane::background(), work)
}

pub fn run_promise_on<T, F>(context: Context, work: F) -> Promise<T>
where
    T: Clone + Send + 'static,
    F: FnOnce() -> Result<T, Error> + Send + 'static,
{
    Promise::builder().context(context).run(work)
}

/// Perform a callback-style task as a promise on the background context.
/// `worker` gets the resolver and settles it once, whenever it is done.
pub fn async_promise<T, F>(worker: F) -> Promise<T>
where
    T: Clone + Send + 'static,
    F: FnOnce(Resolver<T>) + Send + 'static,
{
    async_promise_on(lane::background(), worker)
}

pub fn async_promise_on<T, F>(context: Context, worker: F) -> Promise<T>
where
    T: Clone + Send + 'static,
    F: FnOnce(Resolver<T>) + Send + 'static,
{
    Promise::builder().context(context).worker(worker)
}
