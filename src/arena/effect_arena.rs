// Effect arena - storage for effect metadata
//
// This module defines EffectMetadata and provides helper functions for working
// with the effect arena.
//
// The EffectMetadata struct contains:
// - callback: the effect body, stored directly in the arena
// - deps: the signals read during the last completed run
// - cleanups: callbacks registered via on_cleanup during the last run
//
// An effect is alive exactly as long as its arena entry exists. Disposal
// removes the entry, so every EffectId pointing at it goes stale.

use crate::hash::FastHashBuilder;
use indexmap::IndexSet;
use parking_lot::{Mutex, RwLock};
use slab::Slab;
use std::cell::Cell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use super::SignalId;

/// Boxed effect body. `Fn` rather than `FnMut` so a running effect can be
/// re-entered by a write it performs itself.
pub type EffectCallback = Arc<dyn Fn() + Send + Sync>;

/// Boxed cleanup or disposer callback, run at most once.
pub type CleanupFn = Box<dyn FnOnce() + Send>;

/// Global effect arena - stores all effect metadata
static EFFECT_ARENA: RwLock<Slab<EffectMetadata>> = RwLock::new(Slab::new());

/// Generation counter shared by every effect slot.
static EFFECT_GENERATION: AtomicU32 = AtomicU32::new(0);

// Thread-local current effect being executed.
// Signal reads attribute their dependency edge to this effect.
thread_local! {
    static CURRENT_EFFECT: Cell<Option<EffectId>> = const { Cell::new(None) };
}

/// Get the currently executing effect (if any)
pub fn current_effect() -> Option<EffectId> {
    CURRENT_EFFECT.with(Cell::get)
}

/// Set the currently executing effect, returning the previous one
pub fn set_current_effect(effect_id: Option<EffectId>) -> Option<EffectId> {
    CURRENT_EFFECT.with(|c| c.replace(effect_id))
}

/// RAII guard that restores CURRENT_EFFECT when dropped.
/// This ensures CURRENT_EFFECT is always restored even if the callback panics.
pub struct CurrentEffectGuard {
    previous: Option<EffectId>,
}

impl CurrentEffectGuard {
    /// Create a guard that will restore the previous value when dropped.
    /// Sets CURRENT_EFFECT to `new_value` immediately.
    pub fn new(new_value: Option<EffectId>) -> Self {
        let previous = set_current_effect(new_value);
        Self { previous }
    }
}

impl Drop for CurrentEffectGuard {
    fn drop(&mut self) {
        set_current_effect(self.previous);
    }
}

/// Unique identifier for an effect node in the arena.
///
/// A slab index plus the generation the slot was filled with, so a handle to a
/// disposed effect never addresses an effect that later reused the slot.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct EffectId {
    index: u32,
    generation: u32,
}

impl EffectId {
    /// Convert to usize for slab indexing
    pub fn index(self) -> usize {
        self.index as usize
    }

    /// Access the effect metadata with a closure (read-only)
    ///
    /// Returns None if the effect has been removed (stale access).
    pub fn with<F, R>(self, f: F) -> Option<R>
    where
        F: FnOnce(&EffectMetadata) -> R,
    {
        let arena = EFFECT_ARENA.read();
        arena
            .get(self.index())
            .filter(|metadata| metadata.generation == self.generation)
            .map(f)
    }

    /// Whether the effect still exists (has not been disposed)
    pub fn is_alive(self) -> bool {
        self.with(|_| ()).is_some()
    }

    /// Add a source to this effect's dependency list (no duplicates)
    ///
    /// Returns None if the effect has been disposed.
    pub fn add_source(self, source: SignalId) -> Option<()> {
        self.with(|metadata| {
            metadata.deps.lock().insert(source);
        })
    }

    /// Remove a specific source from this effect's dependency list
    ///
    /// Called when a signal is dropped to clean up its subscriptions
    pub fn remove_source(self, source: SignalId) -> Option<()> {
        self.with(|metadata| {
            metadata.deps.lock().shift_remove(&source);
        })
    }

    /// Take all sources out of this effect, leaving the set empty
    pub fn take_sources(self) -> Vec<SignalId> {
        self.with(|metadata| metadata.deps.lock().drain(..).collect())
            .unwrap_or_default()
    }

    /// Check if a signal is a source (dependency) of this effect
    pub fn has_source(self, signal_id: SignalId) -> bool {
        self.with(|metadata| metadata.deps.lock().contains(&signal_id))
            .unwrap_or(false)
    }

    /// Number of sources recorded during the last run
    pub fn source_count(self) -> usize {
        self.with(|metadata| metadata.deps.lock().len())
            .unwrap_or(0)
    }

    /// Clone the effect body out of the arena.
    ///
    /// The arena lock is released before the caller invokes it, because the
    /// body may create new effects, which requires the write lock.
    pub fn callback(self) -> Option<EffectCallback> {
        self.with(|metadata| metadata.callback.clone())
    }

    /// Append a cleanup to run before the next run or at disposal
    ///
    /// Returns None (dropping the cleanup) if the effect has been disposed.
    pub fn push_cleanup(self, cleanup: CleanupFn) -> Option<()> {
        // A rejected cleanup is dropped here, after the arena lock is released.
        let mut cleanup = Some(cleanup);
        self.with(|metadata| {
            metadata.cleanups.lock().extend(cleanup.take());
        })
    }

    /// Take all pending cleanups, in registration order
    pub fn take_cleanups(self) -> Vec<CleanupFn> {
        self.with(|metadata| std::mem::take(&mut *metadata.cleanups.lock()))
            .unwrap_or_default()
    }
}

/// Metadata for an effect stored in the arena.
pub struct EffectMetadata {
    generation: u32,

    /// The effect body. Cloned out before running so no arena lock is held.
    pub(crate) callback: EffectCallback,

    /// Signals read during the last completed run, in first-read order.
    pub(crate) deps: Mutex<IndexSet<SignalId, FastHashBuilder>>,

    /// Cleanups registered via on_cleanup during the last run.
    pub(crate) cleanups: Mutex<Vec<CleanupFn>>,
}

impl EffectMetadata {
    /// Create new effect metadata around a body, with no deps or cleanups
    pub fn new(callback: EffectCallback) -> Self {
        Self {
            generation: EFFECT_GENERATION.fetch_add(1, Ordering::Relaxed),
            callback,
            deps: Mutex::new(IndexSet::with_hasher(FastHashBuilder)),
            cleanups: Mutex::new(Vec::new()),
        }
    }

    /// Consume the metadata, yielding its deps and cleanups for teardown
    pub(crate) fn into_parts(self) -> (Vec<SignalId>, Vec<CleanupFn>) {
        let deps = self.deps.into_inner().into_iter().collect();
        let cleanups = self.cleanups.into_inner();
        (deps, cleanups)
    }
}

/// Insert an effect into the arena and return its ID
pub fn effect_arena_insert(metadata: EffectMetadata) -> EffectId {
    let generation = metadata.generation;
    let mut arena = EFFECT_ARENA.write();
    let key = arena.insert(metadata);
    EffectId {
        index: key as u32,
        generation,
    }
}

/// Remove an effect from the arena
///
/// Returns None if it was already removed, which makes disposal idempotent.
pub fn effect_arena_remove(id: EffectId) -> Option<EffectMetadata> {
    let mut arena = EFFECT_ARENA.write();
    let live = arena
        .get(id.index())
        .is_some_and(|metadata| metadata.generation == id.generation);
    if live {
        Some(arena.remove(id.index()))
    } else {
        None
    }
}
