//! Bridging promises and Rust futures.
//!
//! A promise can be awaited: [`Promise::result`] (or `.await` on the
//! promise itself) yields its outcome, resuming immediately when it has
//! already settled. The other way round, [`Promise::from_future`] drives a
//! future to completion on its own thread and settles a promise with its
//! output.
use crate::{
    producer::{Produce, Resolver},
    promise::{Builder, Node},
    Error, Promise,
};
use futures::{
    executor::block_on,
    future::{BoxFuture, FutureExt},
};
use std::{
    future::{Future, IntoFuture},
    panic::AssertUnwindSafe,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    thread,
};

/// Waits for a promise's outcome.
///
/// # Examples
///
/// ```
/// use promise_chain::Promise;
/// use futures::executor::block_on;
/// use std::thread;
///
/// let (promise, resolver) = Promise::<String>::pending();
/// let task1 = thread::spawn(move || block_on(async {
///     println!("Received {:?}", promise.await);
/// }));
/// resolver.resolve("Hi".into());
/// task1.join().expect("The task1 thread has panicked.");
/// ```
pub struct ResultFuture<T> {
    node: Arc<Node<T>>,
}

impl<T: Clone + Send + 'static> Future for ResultFuture<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.node.poll_settled(cx.waker())
    }
}

impl<T: Clone + Send + 'static> IntoFuture for Promise<T> {
    type Output = Result<T, Error>;
    type IntoFuture = ResultFuture<T>;

    fn into_future(self) -> Self::IntoFuture {
        self.result()
    }
}

/// Runs a future to completion on a dedicated thread.
pub struct FutureTask<T> {
    future: BoxFuture<'static, Result<T, Error>>,
}

impl<T> FutureTask<T> {
    pub fn new<Fut>(future: Fut) -> Self
    where
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
    {
        Self {
            future: future.boxed(),
        }
    }
}

impl<T: Clone + Send + 'static> Produce<T> for FutureTask<T> {
    fn produce(self, resolver: Resolver<T>) {
        let id = resolver.promise().id();
        let future = self.future;
        // A failed spawn drops the resolver, which fails the promise.
        let spawned = thread::Builder::new()
            .name("promise-future".to_owned())
            .spawn(move || {
                let outcome = block_on(AssertUnwindSafe(future).catch_unwind())
                    .unwrap_or_else(|payload| Err(Error::panicked(payload)));
                resolver.settle(outcome);
            });
        if let Err(error) = spawned {
            tracing::warn!(promise = %id, %error, "cannot spawn future thread");
        }
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// A future resolving with this promise's outcome.
    pub fn result(&self) -> ResultFuture<T> {
        ResultFuture {
            node: self.node.clone(),
        }
    }

    /// Blocks the calling thread until this promise settles.
    ///
    /// Never call this from the context the promise needs to make progress
    /// on: a serial lane waiting on itself never wakes up.
    pub fn wait(&self) -> Result<T, Error> {
        block_on(self.result())
    }

    /// A promise settled by `future`, which runs on its own thread.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_chain::Promise;
    ///
    /// let promise = Promise::from_future(async { Ok(40 + 2) });
    /// assert_eq!(promise.wait().unwrap(), 42);
    /// ```
    pub fn from_future<Fut>(future: Fut) -> Self
    where
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
    {
        Promise::builder().future(future)
    }

    /// Like [`Promise::then`], with a step returning a future.
    pub fn then_async<U, F, Fut>(&self, step: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = Result<U, Error>> + Send + 'static,
    {
        self.then_continue(move |value| Ok(Promise::from_future(step(value))))
    }
}

impl Builder {
    /// A promise settled by `future`, which runs on its own thread.
    pub fn future<T, Fut>(self, future: Fut) -> Promise<T>
    where
        T: Clone + Send + 'static,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
    {
        self.produce(FutureTask::new(future))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lane::Lane;
    use futures::executor::block_on;

    #[test]
    fn test_await_resolved_promise_does_not_suspend() {
        let promise = Promise::resolved(7);
        assert_eq!(block_on(promise.result()).unwrap(), 7);
    }

    #[test]
    fn test_await_failed_promise() {
        let (promise, resolver) = Promise::<u8>::pending();
        let task = thread::spawn(move || block_on(async { promise.await }));
        resolver.reject(Error::new("💥"));
        let error = task.join().expect("The task thread has panicked").unwrap_err();
        assert_eq!(error.description(), "💥");
    }

    #[test]
    fn test_two_awaiters_are_woken() {
        let (promise, resolver) = Promise::<String>::pending();
        let waiters: Vec<_> = (0..2)
            .map(|_| {
                let promise = promise.clone();
                thread::spawn(move || block_on(promise.result()))
            })
            .collect();
        resolver.resolve("🍓".into());
        for waiter in waiters {
            let value = waiter.join().expect("The waiter thread has panicked");
            assert_eq!(value.unwrap(), "🍓");
        }
    }

    #[test]
    fn test_future_error_and_panic_fail_the_promise() {
        let failed = Promise::<u8>::from_future(async { Err(Error::new("async failure")) });
        assert_eq!(failed.wait().unwrap_err().description(), "async failure");
        let panicked = Promise::<u8>::from_future(async { panic!("async panic") });
        assert_eq!(panicked.wait().unwrap_err().reason(), Some("async panic"));
    }

    #[test]
    fn test_then_async_chains_futures() {
        let context = Lane::builder().name("then-async").spawn().unwrap();
        let promise = Promise::builder()
            .context(context)
            .run(|| Ok(1))
            .then_async(|v| async move { Ok(v + 1) })
            .then_async(|v| async move { Err::<u8, _>(Error::new(format!("stop at {v}"))) })
            .then(|v| Ok(v + 1));
        assert_eq!(promise.wait().unwrap_err().description(), "stop at 2");
    }
}
