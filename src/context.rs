//! Execution contexts a promise can be bound to.
//!
//! A [`Context`] is a cheap handle to a lane of execution supplied by the
//! host through the [`Executor`] trait. Every job dispatched through a
//! context runs with that context installed as the thread's current
//! context, which is what [`sync_if_possible`] consults to decide between
//! running inline and dispatching.
use std::{
    cell::RefCell,
    fmt,
    marker::PhantomData,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

/// A unit of work handed to an [`Executor`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Host-supplied lane of execution.
///
/// Implementations decide where and when `job` runs (a dedicated thread, a
/// pool, an event loop...). They must eventually run every job they accept
/// and must not run it inline on the caller's stack.
pub trait Executor: Send + Sync + 'static {
    fn execute(&self, job: Job);
}

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: RefCell<Option<Context>> = const { RefCell::new(None) };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "context#{}", self.0)
    }
}

/// Handle to an execution lane. Clones refer to the same lane.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

struct Inner {
    id: ContextId,
    label: String,
    executor: Box<dyn Executor>,
}

impl Context {
    pub fn new(label: impl Into<String>, executor: impl Executor) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: ContextId(NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed)),
                label: label.into(),
                executor: Box::new(executor),
            }),
        }
    }

    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// The context the calling code is running on, if any.
    pub fn current() -> Option<Context> {
        CURRENT.with(|slot| slot.borrow().clone())
    }

    /// The current context, or the shared background context when the
    /// caller runs on a thread no context knows about.
    pub fn current_or_background() -> Context {
        Self::current().unwrap_or_else(crate::lane::background)
    }

    pub fn is_current(&self) -> bool {
        CURRENT.with(|slot| {
            slot.borrow()
                .as_ref()
                .is_some_and(|current| current.id() == self.id())
        })
    }

    /// Marks the calling thread as running on this context until the
    /// returned guard is dropped.
    ///
    /// Jobs dispatched with [`Context::run`] are entered automatically; hosts
    /// call this for threads they own outright (a UI thread, say).
    #[must_use]
    pub fn enter(&self) -> ContextGuard {
        let prev = CURRENT.with(|slot| slot.borrow_mut().replace(self.clone()));
        ContextGuard {
            prev,
            _not_send: PhantomData,
        }
    }

    /// Dispatches `work` onto this context without waiting for it.
    pub fn run<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let context = self.clone();
        self.inner.executor.execute(Box::new(move || {
            let _guard = context.enter();
            work()
        }));
    }

    /// Runs `work` inline when the caller is already on this context,
    /// dispatches it otherwise.
    pub fn sync_if_possible<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_current() {
            work()
        } else {
            self.run(work)
        }
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Context {}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .finish()
    }
}

/// Restores the previously current context on drop.
///
/// The guard belongs to the thread that entered the context and cannot be
/// sent elsewhere:
///
/// ```compile_fail
/// use promise_chain::lane;
///
/// let guard = lane::background().enter();
/// std::thread::spawn(move || drop(guard));
/// ```
pub struct ContextGuard {
    prev: Option<Context>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let prev = self.prev.take();
        CURRENT.with(|slot| *slot.borrow_mut() = prev);
    }
}

/// Perform `work` on `context`. If the caller already runs on `context`, it
/// runs synchronously.
pub fn sync_if_possible<F>(context: &Context, work: F)
where
    F: FnOnce() + Send + 'static,
{
    context.sync_if_possible(work)
}
