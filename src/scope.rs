//! Hierarchical disposal.
//!
//! A [`CleanupScope`] owns disposer callbacks and child scopes. Disposing a
//! scope disposes its children first (depth-first, in attach order), then
//! runs its own disposers in registration order, exactly once.
//!
//! One scope per thread can be *current*. Effects created while a scope is
//! current register their own disposal with it, so tearing down the scope
//! tears down every effect created under it.

use parking_lot::Mutex;
use std::cell::RefCell;
use std::fmt;
use std::sync::{Arc, Weak};

use crate::arena::CleanupFn;

thread_local! {
    static CURRENT_SCOPE: RefCell<Option<CleanupScope>> = const { RefCell::new(None) };
}

/// Node in the disposal tree.
///
/// Cheap to clone; clones refer to the same scope and compare equal.
#[derive(Clone)]
pub struct CleanupScope {
    inner: Arc<Mutex<ScopeState>>,
}

#[derive(Default)]
struct ScopeState {
    parent: Option<Weak<Mutex<ScopeState>>>,
    children: Vec<CleanupScope>,
    disposers: Vec<CleanupFn>,
    disposed: bool,
}

impl CleanupScope {
    /// Create a scope, attached as the last child of `parent` if given.
    pub fn new(parent: Option<&CleanupScope>) -> Self {
        let scope = Self {
            inner: Arc::new(Mutex::new(ScopeState::default())),
        };
        scope.set_parent(parent);
        scope
    }

    /// Append a disposer. Ignored once the scope is disposed.
    pub fn register_disposer<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.inner.lock();
        if !state.disposed {
            state.disposers.push(Box::new(f));
        }
    }

    /// The scope this one is attached to, if any
    pub fn parent(&self) -> Option<CleanupScope> {
        let state = self.inner.lock();
        state
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| CleanupScope { inner })
    }

    /// Move this scope (and its whole subtree) under `parent`, or detach it.
    ///
    /// A disposed parent accepts no new children; the scope is left detached.
    pub fn set_parent(&self, parent: Option<&CleanupScope>) {
        let old_parent = self.inner.lock().parent.take();
        if let Some(old) = old_parent.and_then(|weak| weak.upgrade()) {
            old.lock()
                .children
                .retain(|child| !Arc::ptr_eq(&child.inner, &self.inner));
        }

        let Some(parent) = parent else {
            return;
        };
        let attached = {
            let mut parent_state = parent.inner.lock();
            if parent_state.disposed {
                false
            } else {
                parent_state.children.push(self.clone());
                true
            }
        };
        if attached {
            self.inner.lock().parent = Some(Arc::downgrade(&parent.inner));
        }
    }

    /// Dispose every child scope, then run this scope's disposers.
    ///
    /// Idempotent: only the first call does anything. Afterwards the scope
    /// holds no children, disposers or parent link.
    pub fn dispose(&self) {
        let (children, disposers, parent) = {
            let mut state = self.inner.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            (
                std::mem::take(&mut state.children),
                std::mem::take(&mut state.disposers),
                state.parent.take(),
            )
        };
        tracing::debug!(
            children = children.len(),
            disposers = disposers.len(),
            "disposing cleanup scope"
        );

        for child in children {
            child.dispose();
        }
        for disposer in disposers {
            disposer();
        }

        // Detach from a parent that is still alive; a parent that is
        // disposing us has already emptied its list.
        if let Some(parent) = parent.and_then(|weak| weak.upgrade()) {
            parent
                .lock()
                .children
                .retain(|child| !Arc::ptr_eq(&child.inner, &self.inner));
        }
    }

    /// Whether [`dispose`](CleanupScope::dispose) has run
    pub fn is_disposed(&self) -> bool {
        self.inner.lock().disposed
    }

    /// Number of attached child scopes
    pub fn children_len(&self) -> usize {
        self.inner.lock().children.len()
    }
}

impl PartialEq for CleanupScope {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for CleanupScope {}

impl fmt::Debug for CleanupScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("CleanupScope")
            .field("children", &state.children.len())
            .field("disposers", &state.disposers.len())
            .field("disposed", &state.disposed)
            .finish()
    }
}

/// The scope current on this thread, if any
pub fn current_cleanup_scope() -> Option<CleanupScope> {
    CURRENT_SCOPE.with(|current| current.borrow().clone())
}

/// Make `scope` current on this thread, returning the previous one.
pub fn set_current_cleanup_scope(scope: Option<CleanupScope>) -> Option<CleanupScope> {
    CURRENT_SCOPE.with(|current| current.replace(scope))
}

/// Register `f` with the current scope. No-op without one, or if it is disposed.
pub fn register_cleanup<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    if let Some(scope) = current_cleanup_scope() {
        scope.register_disposer(f);
    }
}

/// Restores the previous current scope and disposes the temporary one,
/// on normal return and on unwind alike.
struct ScopeGuard {
    scope: CleanupScope,
    previous: Option<CleanupScope>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        set_current_cleanup_scope(self.previous.take());
        self.scope.dispose();
    }
}

/// Run `f` inside a fresh scope attached to `parent`.
///
/// The new scope is current while `f` runs. When `f` returns or panics the
/// previous current scope is restored and the new scope is disposed.
///
/// ```
/// use filament::{Signal, create_effect, with_cleanup_scope};
///
/// let signal = Signal::new(0);
/// let effect = with_cleanup_scope(None, |_scope| {
///     let s = signal.clone();
///     create_effect(move || {
///         s.get();
///     })
/// });
/// assert!(effect.is_disposed());
/// ```
pub fn with_cleanup_scope<F, R>(parent: Option<&CleanupScope>, f: F) -> R
where
    F: FnOnce(&CleanupScope) -> R,
{
    let scope = CleanupScope::new(parent);
    let previous = set_current_cleanup_scope(Some(scope.clone()));
    let guard = ScopeGuard { scope, previous };
    f(&guard.scope)
}
