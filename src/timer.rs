//! Deadlines for promise timeouts.
//!
//! Every armed timeout lives in one process wide min-heap served by a single
//! `promise-timer` thread. Cancelling a timer releases its callback right
//! away; the heap entry left behind is skipped when its deadline comes up.
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::{
    cmp::Ordering,
    collections::{BinaryHeap, HashMap},
    io,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::OnceLock,
    thread,
    time::{Duration, Instant},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TimerId(u64);

type Fire = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    deadline: Instant,
    id: TimerId,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: earliest deadline on top.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.id.0.cmp(&self.id.0))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct Timers {
    next_id: u64,
    heap: BinaryHeap<Entry>,
    armed: HashMap<TimerId, Fire>,
    started: bool,
}

impl Timers {
    fn pop_expired(&mut self, now: Instant) -> Vec<(TimerId, Fire)> {
        let mut expired = Vec::new();
        while let Some(entry) = self.heap.peek().copied() {
            if entry.deadline > now {
                break;
            }
            self.heap.pop();
            if let Some(fire) = self.armed.remove(&entry.id) {
                expired.push((entry.id, fire));
            }
        }
        expired
    }
}

struct TimerQueue {
    timers: Mutex<Timers>,
    wakeup: Condvar,
}

fn queue() -> &'static TimerQueue {
    static QUEUE: OnceLock<TimerQueue> = OnceLock::new();
    QUEUE.get_or_init(|| TimerQueue {
        timers: Mutex::new(Timers::default()),
        wakeup: Condvar::new(),
    })
}

/// Runs `fire` on the timer thread once `after` has elapsed, unless the
/// timer is cancelled first.
pub(crate) fn schedule(after: Duration, fire: Fire) -> io::Result<TimerId> {
    let queue = queue();
    let mut timers = queue.timers.lock();
    if !timers.started {
        thread::Builder::new()
            .name("promise-timer".to_owned())
            .spawn(move || serve(queue))?;
        timers.started = true;
    }
    timers.next_id += 1;
    let id = TimerId(timers.next_id);
    timers.heap.push(Entry {
        deadline: Instant::now() + after,
        id,
    });
    timers.armed.insert(id, fire);
    queue.wakeup.notify_one();
    Ok(id)
}

/// Disarms a timer. Returns false if it already fired or was cancelled.
pub(crate) fn cancel(id: TimerId) -> bool {
    let fire = queue().timers.lock().armed.remove(&id);
    fire.is_some()
}

#[cfg(test)]
pub(crate) fn is_armed(id: TimerId) -> bool {
    queue().timers.lock().armed.contains_key(&id)
}

fn serve(queue: &'static TimerQueue) {
    let mut timers = queue.timers.lock();
    loop {
        let expired = timers.pop_expired(Instant::now());
        if !expired.is_empty() {
            MutexGuard::unlocked(&mut timers, || {
                for (id, fire) in expired {
                    if catch_unwind(AssertUnwindSafe(fire)).is_err() {
                        tracing::error!(timer = id.0, "timer callback panicked");
                    }
                }
            });
            continue;
        }
        match timers.heap.peek().map(|entry| entry.deadline) {
            Some(deadline) => {
                queue.wakeup.wait_until(&mut timers, deadline);
            }
            None => queue.wakeup.wait(&mut timers),
        }
    }
}
