mod common;

#[cfg(test)]
mod tests {
    use super::common::init_test_logging;
    use parking_lot::Mutex;
    use promise_chain::{
        context::Job, join, join3, join_all, run_promise_on, Context, Error, Executor, Promise,
    };
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        thread,
        time::Duration,
    };

    /// Runs every job on a fresh thread and counts dispatches.
    struct Spawner {
        dispatched: Arc<AtomicUsize>,
    }

    impl Executor for Spawner {
        fn execute(&self, job: Job) {
            self.dispatched.fetch_add(1, Ordering::SeqCst);
            thread::spawn(job);
        }
    }

    fn spawner(label: &str) -> (Context, Arc<AtomicUsize>) {
        let dispatched = Arc::new(AtomicUsize::new(0));
        let context = Context::new(
            label,
            Spawner {
                dispatched: dispatched.clone(),
            },
        );
        (context, dispatched)
    }

    #[test]
    fn test_join_on_host_executor() {
        init_test_logging();
        let (context, dispatched) = spawner("host");
        let avatar = run_promise_on(context.clone(), || {
            thread::sleep(Duration::from_millis(30));
            Ok(vec![1_u8, 2, 3])
        });
        let name = run_promise_on(context.clone(), || Ok("🍓".to_owned()));
        let joined = join(&avatar, &name).then_on(context, |(avatar, name)| Ok(format!("{name}:{}", avatar.len())));
        assert_eq!(joined.wait().unwrap(), "🍓:3");
        assert!(dispatched.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn test_join3_reports_first_failure_and_ignores_the_rest() {
        init_test_logging();
        let (context, _) = spawner("join3");
        let (slow, slow_resolver) = Promise::<u8>::pending_on(context.clone());
        let fast = run_promise_on::<u8, _>(context.clone(), || Err(Error::new("fast failure")));
        let ok = run_promise_on(context, || Ok(true));
        let handled = Arc::new(Mutex::new(Vec::new()));
        let sink = handled.clone();
        let joined = join3(&slow, &fast, &ok).handle(move |error| sink.lock().push(error.description().to_owned()));
        assert_eq!(joined.wait().unwrap_err().description(), "fast failure");
        slow_resolver.reject(Error::new("slow failure"));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(*handled.lock(), vec!["fast failure".to_owned()]);
    }

    #[test]
    fn test_join_all_of_chains() {
        init_test_logging();
        let (context, _) = spawner("join-all");
        let chains = (0..5_u64)
            .map(|i| {
                run_promise_on(context.clone(), move || {
                    thread::sleep(Duration::from_millis(10 * (5 - i)));
                    Ok(i)
                })
                .then(|i| Ok(i * i))
            })
            .collect();
        assert_eq!(join_all(chains).wait().unwrap(), vec![0, 1, 4, 9, 16]);
    }

    #[test]
    fn test_dropping_join_leaves_inputs_alone() {
        init_test_logging();
        let (context, _) = spawner("join-drop");
        let (first, first_resolver) = Promise::<u8>::pending_on(context.clone());
        let (second, _second_resolver) = Promise::<u8>::pending_on(context);
        let joined = join(&first, &second);
        joined.cancel();
        assert_eq!(joined.error().unwrap().description(), "dropping task");
        assert!(first_resolver.resolve(1));
        assert_eq!(first.value(), Some(1));
        assert!(second.state().is_pending());
    }
}
