//! Waiting on several promises at once.
//!
//! A join observes every input with [`Promise::finally`] and records
//! arrivals in one shared slot record. The joined promise resolves once
//! every slot holds a value, and fails with the first error observed; later
//! arrivals hit an already settled promise and change nothing. Partial
//! results stay in the slot record until the last observer lets go of it.
use crate::{context::Context, promise::Node, Error, Promise};
use parking_lot::Mutex;
use std::sync::Arc;

enum Decision<T> {
    Resolve(T),
    Fail(Error),
    Wait,
}

/// The slot record shared by the observers of one join.
trait Slots<T>: Send + 'static {
    /// Records `error`, if any, and tells what the joined promise should do.
    fn decide(&mut self, error: Option<Error>) -> Decision<T>;

    fn arrived(&self) -> usize;
}

struct Join2<A, B> {
    first: Option<A>,
    second: Option<B>,
    error: Option<Error>,
}

impl<A, B> Slots<(A, B)> for Join2<A, B>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
{
    fn decide(&mut self, error: Option<Error>) -> Decision<(A, B)> {
        if let Some(error) = error {
            self.error.get_or_insert(error);
        }
        match (&self.first, &self.second, &self.error) {
            (Some(first), Some(second), _) => Decision::Resolve((first.clone(), second.clone())),
            (_, _, Some(error)) => Decision::Fail(error.clone()),
            _ => Decision::Wait,
        }
    }

    fn arrived(&self) -> usize {
        usize::from(self.first.is_some()) + usize::from(self.second.is_some())
    }
}

struct Join3<A, B, C> {
    first: Option<A>,
    second: Option<B>,
    third: Option<C>,
    error: Option<Error>,
}

impl<A, B, C> Slots<(A, B, C)> for Join3<A, B, C>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    C: Clone + Send + 'static,
{
    fn decide(&mut self, error: Option<Error>) -> Decision<(A, B, C)> {
        if let Some(error) = error {
            self.error.get_or_insert(error);
        }
        match (&self.first, &self.second, &self.third, &self.error) {
            (Some(first), Some(second), Some(third), _) => {
                Decision::Resolve((first.clone(), second.clone(), third.clone()))
            }
            (_, _, _, Some(error)) => Decision::Fail(error.clone()),
            _ => Decision::Wait,
        }
    }

    fn arrived(&self) -> usize {
        usize::from(self.first.is_some())
            + usize::from(self.second.is_some())
            + usize::from(self.third.is_some())
    }
}

struct JoinAll<T> {
    slots: Vec<Option<T>>,
    remaining: usize,
    error: Option<Error>,
}

impl<T: Clone + Send + 'static> Slots<Vec<T>> for JoinAll<T> {
    fn decide(&mut self, error: Option<Error>) -> Decision<Vec<T>> {
        if let Some(error) = error {
            self.error.get_or_insert(error);
        }
        if self.remaining == 0 {
            Decision::Resolve(self.slots.iter().flatten().cloned().collect())
        } else if let Some(error) = &self.error {
            Decision::Fail(error.clone())
        } else {
            Decision::Wait
        }
    }

    fn arrived(&self) -> usize {
        self.slots.len() - self.remaining
    }
}

/// Attaches the observer of one join input: `store` puts a value in its
/// slot, then the record decides whether the joined promise settles.
fn observe<X, T, S, F>(input: &Promise<X>, joined: &Arc<Node<T>>, slots: &Arc<Mutex<S>>, inputs: usize, store: F)
where
    X: Clone + Send + 'static,
    T: Clone + Send + 'static,
    S: Slots<T>,
    F: FnOnce(&mut S, X) + Send + 'static,
{
    let (target, slots) = (joined.clone(), slots.clone());
    input.finally(move |outcome| {
        let (decision, arrived) = {
            let mut slots = slots.lock();
            let error = match outcome {
                Ok(value) => {
                    store(&mut *slots, value);
                    None
                }
                Err(error) => Some(error),
            };
            (slots.decide(error), slots.arrived())
        };
        match decision {
            Decision::Resolve(values) => {
                target.settle(Ok(values));
            }
            Decision::Fail(error) => {
                if target.settle(Err(error)) {
                    tracing::debug!(arrived, inputs, "join failed, discarding partial results");
                }
            }
            Decision::Wait => {}
        }
    });
}

/// Creates a promise that waits for 2 promises to finish and combines their
/// results.
///
/// # Examples
///
/// ```
/// use promise_chain::{join, run_promise};
///
/// let both = join(&run_promise(|| Ok(1)), &run_promise(|| Ok("two")));
/// assert_eq!(both.wait().unwrap(), (1, "two"));
/// ```
pub fn join<A, B>(first: &Promise<A>, second: &Promise<B>) -> Promise<(A, B)>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
{
    let joined = Node::new(Context::current_or_background());
    let slots = Arc::new(Mutex::new(Join2 {
        first: None,
        second: None,
        error: None,
    }));
    observe(first, &joined, &slots, 2, |slots: &mut Join2<A, B>, value| slots.first = Some(value));
    observe(second, &joined, &slots, 2, |slots: &mut Join2<A, B>, value| slots.second = Some(value));
    Promise::from_node(joined)
}

/// Creates a promise that waits for 3 promises to finish and combines their
/// results.
pub fn join3<A, B, C>(first: &Promise<A>, second: &Promise<B>, third: &Promise<C>) -> Promise<(A, B, C)>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    C: Clone + Send + 'static,
{
    let joined = Node::new(Context::current_or_background());
    let slots = Arc::new(Mutex::new(Join3 {
        first: None,
        second: None,
        third: None,
        error: None,
    }));
    observe(first, &joined, &slots, 3, |slots: &mut Join3<A, B, C>, value| slots.first = Some(value));
    observe(second, &joined, &slots, 3, |slots: &mut Join3<A, B, C>, value| slots.second = Some(value));
    observe(third, &joined, &slots, 3, |slots: &mut Join3<A, B, C>, value| slots.third = Some(value));
    Promise::from_node(joined)
}

/// Waits for every promise in `promises`; values keep the input order.
/// An empty input resolves right away with an empty vector.
pub fn join_all<T>(promises: Vec<Promise<T>>) -> Promise<Vec<T>>
where
    T: Clone + Send + 'static,
{
    let joined = Node::new(Context::current_or_background());
    let inputs = promises.len();
    if inputs == 0 {
        joined.settle(Ok(Vec::new()));
        return Promise::from_node(joined);
    }
    let slots = Arc::new(Mutex::new(JoinAll {
        slots: vec![None; inputs],
        remaining: inputs,
        error: None,
    }));
    for (index, promise) in promises.iter().enumerate() {
        observe(promise, &joined, &slots, inputs, move |join: &mut JoinAll<T>, value| {
            if join.slots[index].replace(value).is_none() {
                join.remaining -= 1;
            }
        });
    }
    Promise::from_node(joined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lane::Lane;

    fn entered(name: &str) -> (Context, crate::context::ContextGuard) {
        let context = Lane::builder().name(name).spawn().unwrap();
        let guard = context.enter();
        (context, guard)
    }

    #[test]
    fn test_join_resolves_with_tuple() {
        let (_context, _guard) = entered("join");
        let joined = join(&Promise::resolved(1), &Promise::resolved(2));
        assert_eq!(joined.value(), Some((1, 2)));
    }

    #[test]
    fn test_join_fails_on_first_error() {
        let (_context, _guard) = entered("join-error");
        let (second, resolver) = Promise::<u8>::pending();
        let joined = join(&Promise::<u8>::failed(Error::new("E")), &second);
        assert_eq!(joined.error().unwrap().description(), "E");
        resolver.resolve(2);
        assert!(joined.value().is_none());
        assert_eq!(joined.error().unwrap().description(), "E");
    }

    #[test]
    fn test_join3_waits_for_every_input() {
        let (_context, _guard) = entered("join3");
        let (a, ra) = Promise::<u8>::pending();
        let (b, rb) = Promise::<&str>::pending();
        let (c, rc) = Promise::<bool>::pending();
        let joined = join3(&a, &b, &c);
        rc.resolve(true);
        assert!(!joined.is_completed());
        ra.resolve(1);
        assert!(!joined.is_completed());
        rb.resolve("b");
        assert_eq!(joined.value(), Some((1, "b", true)));
    }

    #[test]
    fn test_join3_two_failures_surface_one_error() {
        let (_context, _guard) = entered("join3-errors");
        let (a, ra) = Promise::<u8>::pending();
        let (b, rb) = Promise::<u8>::pending();
        let (c, _rc) = Promise::<u8>::pending();
        let joined = join3(&a, &b, &c);
        let handled = Arc::new(Mutex::new(0));
        let counter = handled.clone();
        joined.handle(move |_| *counter.lock() += 1);
        rb.reject(Error::new("b failed"));
        ra.reject(Error::new("a failed"));
        assert_eq!(*handled.lock(), 1);
        assert!(joined.is_error());
    }

    #[test]
    fn test_slot_records_wait_for_every_value() {
        let mut pair = Join2::<u8, u8> {
            first: Some(1),
            second: None,
            error: None,
        };
        assert!(matches!(pair.decide(None), Decision::Wait));
        assert_eq!(pair.arrived(), 1);
        assert!(matches!(pair.decide(Some(Error::new("first"))), Decision::Fail(_)));
        pair.second = Some(2);
        // Every slot filled wins over the recorded error.
        assert!(matches!(pair.decide(Some(Error::new("second"))), Decision::Resolve((1, 2))));
        assert_eq!(pair.error.as_ref().map(Error::description), Some("first"));

        let mut all = JoinAll::<u8> {
            slots: vec![None, Some(4)],
            remaining: 1,
            error: None,
        };
        assert_eq!(all.arrived(), 1);
        assert!(matches!(all.decide(None), Decision::Wait));
    }

    #[test]
    fn test_join_all_keeps_input_order() {
        let (_context, _guard) = entered("join-all");
        let pending: Vec<_> = (0..4).map(|_| Promise::<usize>::pending()).collect();
        let joined = join_all(pending.iter().map(|(promise, _)| promise.clone()).collect());
        for (index, (_, resolver)) in pending.into_iter().enumerate().rev() {
            resolver.resolve(index * 10);
        }
        assert_eq!(joined.value(), Some(vec![0, 10, 20, 30]));
    }

    #[test]
    fn test_join_all_empty() {
        let (_context, _guard) = entered("join-all-empty");
        assert_eq!(join_all::<u8>(Vec::new()).value(), Some(Vec::new()));
    }

    #[test]
    fn test_join_across_lanes() {
        let first = Lane::builder().name("join-first").spawn().unwrap();
        let second = Lane::builder().name("join-second").spawn().unwrap();
        let joined = join(
            &crate::run_promise_on(first, || Ok(1)),
            &crate::run_promise_on(second, || Ok(2)),
        );
        assert_eq!(joined.wait().unwrap(), (1, 2));
    }
}
