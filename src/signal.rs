use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

use crate::arena::{SignalId, SignalMetadata, signal_arena_insert, signal_arena_remove};

/// Untyped reactive node: owns one slot in the signal arena.
///
/// This is the part of a signal the dependency graph sees. Typed handles
/// ([`Signal`], [`Memo`](crate::Memo)) pair it with their own value storage.
/// Dropping the node frees the slot and detaches it from every dependent.
pub(crate) struct SignalNode {
    node_id: SignalId,
}

impl SignalNode {
    pub(crate) fn new() -> Self {
        Self {
            node_id: signal_arena_insert(SignalMetadata::new()),
        }
    }

    pub(crate) fn id(&self) -> SignalId {
        self.node_id
    }

    /// Record an edge to the running effect, if any.
    pub(crate) fn track(&self) {
        self.node_id.track_dependency();
    }

    /// Re-run every dependent synchronously.
    pub(crate) fn notify(&self) {
        self.node_id.notify_subscribers();
    }
}

impl Drop for SignalNode {
    fn drop(&mut self) {
        for effect_id in self.node_id.subscribers() {
            effect_id.remove_source(self.node_id);
        }
        signal_arena_remove(self.node_id);
    }
}

/// A reactive cell holding a value and the set of effects that read it.
///
/// `Signal` is a cheap, cloneable handle; all clones share the same value.
/// Reading with [`get`](Signal::get) inside a running effect subscribes that
/// effect. Writing with [`set`](Signal::set) re-runs the subscribers
/// synchronously, unless the new value equals the stored one.
///
/// ```
/// use filament::{Signal, create_effect};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// let count = Signal::new(1);
/// let runs = Arc::new(AtomicUsize::new(0));
///
/// let observed = count.clone();
/// let counter = runs.clone();
/// create_effect(move || {
///     observed.get();
///     counter.fetch_add(1, Ordering::Relaxed);
/// });
///
/// count.set(1); // equal: suppressed
/// count.set(2); // re-runs the effect
/// assert_eq!(runs.load(Ordering::Relaxed), 2);
/// ```
pub struct Signal<T> {
    inner: Arc<SignalInner<T>>,
}

struct SignalInner<T> {
    node: SignalNode,
    value: RwLock<T>,
}

impl<T> Signal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a signal holding `initial`
    pub fn new(initial: T) -> Self {
        Self {
            inner: Arc::new(SignalInner {
                node: SignalNode::new(),
                value: RwLock::new(initial),
            }),
        }
    }

    /// Read the value, subscribing the running effect (if any)
    pub fn get(&self) -> T {
        self.inner.node.track();
        self.inner.value.read().clone()
    }

    /// Read the value without registering a dependency
    pub fn get_untracked(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Borrow the value for the duration of `f`, subscribing the running effect.
    ///
    /// The value is read-locked while `f` runs, so `f` must not write this signal.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.node.track();
        f(&self.inner.value.read())
    }

    /// Store `value` and re-run dependents, unless it equals the current value.
    pub fn set(&self, value: T) {
        {
            let mut current = self.inner.value.write();
            if *current == value {
                cov_mark::hit!(signal_set_equal_suppressed);
                return;
            }
            *current = value;
        }
        self.inner.node.notify();
    }

    /// Mutate a copy of the value and [`set`](Signal::set) the result.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let mut next = self.get_untracked();
        f(&mut next);
        self.set(next);
    }
}

impl<T> Signal<T> {
    /// Whether two handles refer to the same signal
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn node_id(&self) -> SignalId {
        self.inner.node.id()
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.node.id())
            .field("value", &*self.inner.value.read())
            .finish()
    }
}

impl<T> Default for Signal<T>
where
    T: Clone + Default + PartialEq + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Create a signal holding `initial`
pub fn create_signal<T>(initial: T) -> Signal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    Signal::new(initial)
}
