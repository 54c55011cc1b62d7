// Signal arena - storage for signal metadata
//
// This module defines SignalMetadata, SignalId, and provides helper functions
// for working with the signal arena.
//
// A signal entry only knows its dependents (the effects that read it during
// their last run). The value itself lives in the typed `Signal<T>` handle.
// Dependents are kept in an IndexSet so fan-out happens in registration order.

use crate::hash::FastHashBuilder;
use indexmap::IndexSet;
use parking_lot::{Mutex, RwLock};
use slab::Slab;
use std::sync::atomic::{AtomicU32, Ordering};

use super::EffectId;

/// Global signal arena - stores all signal metadata
static SIGNAL_ARENA: RwLock<Slab<SignalMetadata>> = RwLock::new(Slab::new());

/// Generation counter shared by every signal slot.
static SIGNAL_GENERATION: AtomicU32 = AtomicU32::new(0);

/// Unique identifier for a signal node in the arena.
///
/// A slab index plus the generation the slot was filled with. When the owning
/// signal is dropped the slot is freed and this id goes stale; accessing a
/// stale id returns None even if the slot was reused.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct SignalId {
    index: u32,
    generation: u32,
}

impl SignalId {
    /// Convert to usize for slab indexing
    pub fn index(self) -> usize {
        self.index as usize
    }

    /// Access the signal metadata with a closure (read-only)
    ///
    /// Returns None if the signal has been removed (stale access).
    pub fn with<F, R>(self, f: F) -> Option<R>
    where
        F: FnOnce(&SignalMetadata) -> R,
    {
        let arena = SIGNAL_ARENA.read();
        arena
            .get(self.index())
            .filter(|metadata| metadata.generation == self.generation)
            .map(f)
    }

    /// Register the currently running effect as a dependent of this signal.
    ///
    /// Both directions of the edge are recorded: the effect remembers the
    /// signal in its deps, the signal remembers the effect in its dependents.
    /// A disposed effect records nothing.
    pub fn track_dependency(self) {
        use super::effect_arena::current_effect;

        if let Some(effect_id) = current_effect() {
            if effect_id.add_source(self).is_some() {
                self.add_subscriber(effect_id);
            }
        }
    }

    /// Add a subscriber to this signal (deduplicated)
    pub fn add_subscriber(self, effect_id: EffectId) {
        self.with(|metadata| {
            metadata.subscribers.lock().insert(effect_id);
        });
    }

    /// Remove a subscriber from this signal, keeping the order of the rest
    pub fn remove_subscriber(self, effect_id: EffectId) {
        self.with(|metadata| {
            metadata.subscribers.lock().shift_remove(&effect_id);
        });
    }

    /// Snapshot the current subscribers in registration order.
    ///
    /// Fan-out iterates the snapshot so that effects may subscribe or
    /// unsubscribe while it is in progress.
    pub fn subscribers(self) -> Vec<EffectId> {
        self.with(|metadata| metadata.subscribers.lock().iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of current subscribers (0 for a stale id)
    pub fn subscriber_count(self) -> usize {
        self.with(|metadata| metadata.subscribers.lock().len())
            .unwrap_or(0)
    }

    /// Synchronously re-run every dependent of this signal.
    ///
    /// Runs depth-first on the calling thread: a dependent that writes another
    /// signal will cascade before this call returns. Disposed dependents are
    /// dropped from the set instead of being run.
    ///
    /// Nothing stops an effect that always writes a changed value into a signal
    /// it reads from re-triggering itself forever; callers must avoid such loops.
    pub fn notify_subscribers(self) {
        for effect_id in self.subscribers() {
            if effect_id.is_alive() {
                crate::effect::run_effect(effect_id);
            } else {
                cov_mark::hit!(disposed_dependent_pruned);
                self.remove_subscriber(effect_id);
            }
        }
    }
}

/// Metadata for a signal stored in the arena.
#[derive(Debug)]
pub struct SignalMetadata {
    generation: u32,
    /// Effects that read this signal during their most recent run.
    pub(crate) subscribers: Mutex<IndexSet<EffectId, FastHashBuilder>>,
}

impl SignalMetadata {
    /// Create new signal metadata with a fresh generation and no subscribers
    pub fn new() -> Self {
        Self {
            generation: SIGNAL_GENERATION.fetch_add(1, Ordering::Relaxed),
            subscribers: Mutex::new(IndexSet::with_hasher(FastHashBuilder)),
        }
    }
}

impl Default for SignalMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// Insert a signal into the arena and return its ID
pub fn signal_arena_insert(metadata: SignalMetadata) -> SignalId {
    let generation = metadata.generation;
    let mut arena = SIGNAL_ARENA.write();
    let key = arena.insert(metadata);
    SignalId {
        index: key as u32,
        generation,
    }
}

/// Remove a signal from the arena
pub fn signal_arena_remove(id: SignalId) -> Option<SignalMetadata> {
    let mut arena = SIGNAL_ARENA.write();
    let live = arena
        .get(id.index())
        .is_some_and(|metadata| metadata.generation == id.generation);
    if live {
        Some(arena.remove(id.index()))
    } else {
        None
    }
}
