use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::effect::{Effect, untracked};
use crate::scope::register_cleanup;
use crate::signal::SignalNode;

/// Lazily computed, cached derived value
///
/// A Memo is a read-only signal whose value is produced by a function of
/// other signals. Nothing is computed until the first [`get`](Memo::get).
/// That first read creates an internal tracker effect which computes the
/// value and records its dependencies; afterwards the tracker re-runs
/// whenever one of them changes.
///
/// Dependents of the Memo are only re-run when the recomputed value differs
/// from the cached one (`T: PartialEq`), which suppresses propagation through
/// diamonds and chains whose output did not actually change.
///
/// A memo has no setter; its value only ever comes from the compute function.
///
/// # Example
/// ```
/// use filament::{Memo, Signal};
///
/// let count = Signal::new(1);
/// let source = count.clone();
/// let doubled = Memo::new(move || source.get() * 2);
///
/// assert_eq!(doubled.get(), 2);
/// count.set(5);
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Memo<T> {
    inner: Arc<MemoInner<T>>,
}

struct MemoInner<T> {
    /// Graph node dependents of the Memo subscribe to.
    node: SignalNode,

    /// Cached value; None until the first computation.
    value: RwLock<Option<T>>,

    compute: Box<dyn Fn() -> T + Send + Sync>,

    /// Created on the first read.
    tracker: Mutex<Option<Effect>>,

    disposed: AtomicBool,
}

impl<T> Memo<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a memo. `f` does not run until the first [`get`](Memo::get).
    ///
    /// If a cleanup scope is current, disposing it disposes the memo.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let inner = Arc::new(MemoInner {
            node: SignalNode::new(),
            value: RwLock::new(None),
            compute: Box::new(f),
            tracker: Mutex::new(None),
            disposed: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&inner);
        register_cleanup(move || {
            if let Some(inner) = weak.upgrade() {
                inner.dispose();
            }
        });

        Self { inner }
    }

    /// Read the value, computing it on first access.
    ///
    /// Subscribes the running effect (if any) to this memo.
    pub fn get(&self) -> T {
        self.inner.ensure_tracker();
        self.inner.node.track();

        if let Some(value) = self.inner.value.read().clone() {
            return value;
        }
        // Disposed before its first read: compute once without a tracker.
        let value = untracked(|| (self.inner.compute)());
        *self.inner.value.write() = Some(value.clone());
        value
    }

    /// Stop recomputing. The last cached value stays readable.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Whether the tracker has been created, i.e. the memo has been read
    pub fn is_materialized(&self) -> bool {
        self.inner.tracker.lock().is_some()
    }
}

impl<T> MemoInner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn ensure_tracker(self: &Arc<Self>) {
        let tracker = {
            let mut slot = self.tracker.lock();
            if slot.is_some() || self.disposed.load(Ordering::Acquire) {
                return;
            }
            let weak: Weak<Self> = Arc::downgrade(self);
            let effect = Effect::new_detached(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.recompute();
                }
            });
            *slot = Some(effect);
            effect
        };
        // Run outside the slot lock: the compute function may read other memos.
        tracker.run();
    }

    fn recompute(&self) {
        let next = (self.compute)();
        {
            let mut cached = self.value.write();
            match cached.as_ref() {
                // First computation: nobody can depend on us yet.
                None => {
                    *cached = Some(next);
                    return;
                }
                Some(previous) if *previous == next => {
                    cov_mark::hit!(memo_output_unchanged);
                    return;
                }
                Some(_) => *cached = Some(next),
            }
        }
        self.node.notify();
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
        let tracker = self.tracker.lock().take();
        if let Some(tracker) = tracker {
            tracker.dispose();
        }
    }
}

impl<T> Drop for MemoInner<T> {
    fn drop(&mut self) {
        if let Some(tracker) = self.tracker.get_mut().take() {
            tracker.dispose();
        }
    }
}

impl<T> Clone for Memo<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Memo<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memo")
            .field("id", &self.inner.node.id())
            .field("value", &*self.inner.value.read())
            .finish()
    }
}

/// Create a lazily computed memo over `f`
pub fn create_memo<T, F>(f: F) -> Memo<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    Memo::new(f)
}
