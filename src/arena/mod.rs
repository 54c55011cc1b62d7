// Arena-based storage for reactive node metadata
//
// This module provides two separate arenas:
// - Signal arena: stores SignalMetadata (dependents)
// - Effect arena: stores EffectMetadata (body, deps, cleanups)
//
// The arenas use global static storage with RwLock for thread-safe access.
// SignalId and EffectId are generational handles into the slabs; neither
// side of a dependency edge owns the other.

// Note: We need to declare effect_arena first because signal_arena depends on EffectId
pub mod effect_arena;
pub mod signal_arena;

// Re-export types from effect_arena
pub use effect_arena::{
    CleanupFn, CurrentEffectGuard, EffectCallback, EffectId, EffectMetadata, current_effect,
    effect_arena_insert, effect_arena_remove,
};

// Re-export types from signal_arena
pub use signal_arena::{SignalId, SignalMetadata, signal_arena_insert, signal_arena_remove};
