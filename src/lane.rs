//! Reference executors for hosts that don't bring their own.
//!
//! A [`Lane`] is a serial lane backed by one dedicated thread. It uses a
//! multi-producer, single-consumer channel as its backend, so the context
//! handle may be cloned freely while a single thread drains the jobs in
//! the order they were sent.
//!
//! [`background`] is the process wide concurrent context promises fall back
//! to when they are created off any known context.
use crate::context::{Context, Executor, Job};
use std::{
    io,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        mpsc::{channel, Sender},
        OnceLock,
    },
    thread,
};

/// Serial executor running jobs on its own thread.
///
/// The thread exits once every [`Context`] pointing at the lane is gone and
/// the queued jobs are drained.
///
/// # Examples
///
/// ```
/// use promise_chain::{lane::Lane, Promise};
///
/// let ui = Lane::builder().name("ui").spawn().unwrap();
/// let value = Promise::builder().context(ui).run(|| Ok(21)).then(|v| Ok(v * 2));
/// assert_eq!(value.wait().unwrap(), 42);
/// ```
#[derive(Debug)]
pub struct Lane {
    sender: Sender<Job>,
    name: String,
}

impl Lane {
    pub fn builder() -> LaneBuilder {
        LaneBuilder { name: None }
    }
}

impl Executor for Lane {
    fn execute(&self, job: Job) {
        if self.sender.send(job).is_err() {
            tracing::error!(lane = %self.name, "lane thread is gone, job lost");
        }
    }
}

/// Configures and spawns a [`Lane`].
#[derive(Debug, Clone)]
pub struct LaneBuilder {
    name: Option<String>,
}

impl LaneBuilder {
    /// Sets the name of the lane thread, also used as the context label.
    pub fn name<N: Into<String>>(self, name: N) -> Self {
        Self {
            name: Some(name.into()),
        }
    }

    /// Spawns the lane thread and returns the context dispatching onto it.
    pub fn spawn(self) -> io::Result<Context> {
        let name = self.name.unwrap_or_else(|| "promise-lane".to_owned());
        let (tx, rx) = channel::<Job>();
        let thread_name = name.clone();
        thread::Builder::new().name(name.clone()).spawn(move || {
            tracing::trace!(lane = %thread_name, "lane starting");
            for job in rx {
                run_guarded(&thread_name, job);
            }
            tracing::trace!(lane = %thread_name, "lane exiting");
        })?;
        Ok(Context::new(
            name.clone(),
            Lane {
                sender: tx,
                name,
            },
        ))
    }
}

/// Concurrent executor starting a fresh thread for every job.
#[derive(Debug)]
struct Detached {
    name: String,
}

impl Executor for Detached {
    fn execute(&self, job: Job) {
        // The job has to survive a failed spawn so it can still run inline.
        let slot = std::sync::Arc::new(parking_lot::Mutex::new(Some(job)));
        let remote = slot.clone();
        let name = self.name.clone();
        let spawned = thread::Builder::new().name(self.name.clone()).spawn(move || {
            if let Some(job) = remote.lock().take() {
                run_guarded(&name, job);
            }
        });
        if let Err(error) = spawned {
            tracing::warn!(lane = %self.name, %error, "cannot spawn thread, running job inline");
            if let Some(job) = slot.lock().take() {
                run_guarded(&self.name, job);
            }
        }
    }
}

fn run_guarded(lane: &str, job: Job) {
    if catch_unwind(AssertUnwindSafe(job)).is_err() {
        tracing::error!(lane = %lane, "job panicked");
    }
}

static BACKGROUND: OnceLock<Context> = OnceLock::new();

/// Shared concurrent context, created on first use.
pub fn background() -> Context {
    BACKGROUND
        .get_or_init(|| {
            Context::new(
                "promise-background",
                Detached {
                    name: "promise-background".to_owned(),
                },
            )
        })
        .clone()
}
