use crate::arena::{
    CurrentEffectGuard, EffectId, EffectMetadata, current_effect, effect_arena_insert,
    effect_arena_remove,
};
use crate::scope::current_cleanup_scope;
use std::sync::Arc;

/// Run a single effect by its ID
///
/// This function handles the full lifecycle of one run:
/// 1. Skip if the effect has been disposed
/// 2. Run the cleanups registered during the previous run, in registration order
/// 3. Unsubscribe from old sources, so deps only ever reflect the latest run
/// 4. Run the body with this effect as the current tracking context
///
/// An effect may be re-entered: if its body writes a signal it has already
/// read, the write re-runs it depth-first before the outer run resumes.
pub(crate) fn run_effect(effect_id: EffectId) {
    let Some(callback) = effect_id.callback() else {
        return;
    };

    for cleanup in effect_id.take_cleanups() {
        cleanup();
    }
    // A cleanup may have disposed the effect
    if !effect_id.is_alive() {
        return;
    }

    for source_id in effect_id.take_sources() {
        source_id.remove_subscriber(effect_id);
    }

    tracing::trace!(effect = ?effect_id, "running effect");

    // The guard restores the previous context even if the body panics.
    let _guard = CurrentEffectGuard::new(Some(effect_id));
    callback();
}

/// Tear an effect down: remove it from the arena, run its pending cleanups
/// and detach it from every signal it read. Later calls are no-ops.
pub(crate) fn dispose_effect(effect_id: EffectId) {
    let Some(metadata) = effect_arena_remove(effect_id) else {
        return;
    };
    tracing::trace!(effect = ?effect_id, "disposing effect");

    let (sources, cleanups) = metadata.into_parts();
    for cleanup in cleanups {
        cleanup();
    }
    for source_id in sources {
        source_id.remove_subscriber(effect_id);
    }
}

/// Run a closure without tracking dependencies
///
/// Signals read inside `f` register no edge with the running effect.
///
/// # Example
/// ```
/// use filament::{Signal, create_effect, untracked};
///
/// let tracked = Signal::new(1);
/// let ignored = Signal::new(2);
///
/// let (a, b) = (tracked.clone(), ignored.clone());
/// create_effect(move || {
///     let _sum = a.get() + untracked(|| b.get());
/// });
///
/// ignored.set(3); // does not re-run the effect
/// ```
pub fn untracked<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = CurrentEffectGuard::new(None);
    f()
}

/// Register `f` on the running effect.
///
/// `f` runs once right before the effect's next run, or at its disposal,
/// whichever comes first. Cleanups run in registration order. Outside of a
/// running effect this does nothing.
pub fn on_cleanup<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    if let Some(effect_id) = current_effect() {
        effect_id.push_cleanup(Box::new(f));
    }
}

/// Re-runnable computation that tracks which signals it reads
///
/// An effect runs once on creation and then again, synchronously, every
/// time a signal it read during its latest run changes. `Effect` is a `Copy`
/// handle: dropping it does not stop the effect. Dispose it explicitly, or
/// let the [`CleanupScope`](crate::CleanupScope) that was current at creation
/// dispose it.
///
/// # Example
/// ```
/// use filament::{Effect, Signal, on_cleanup};
///
/// let name = Signal::new("ada".to_string());
///
/// let reader = name.clone();
/// let effect = Effect::new(move || {
///     let current = reader.get();
///     on_cleanup(move || println!("leaving {current}"));
/// });
///
/// name.set("grace".to_string()); // prints "leaving ada", then re-runs
/// effect.dispose();              // prints "leaving grace"
/// assert!(effect.is_disposed());
/// ```
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct Effect {
    id: EffectId,
}

impl Effect {
    /// Create an effect and run it immediately.
    ///
    /// If a cleanup scope is current, the scope disposes the effect when it
    /// is itself disposed.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let effect = Self::new_detached(f);
        if let Some(scope) = current_cleanup_scope() {
            scope.register_disposer(move || effect.dispose());
        }
        effect.run();
        effect
    }

    /// Create an effect and run it immediately, without tying it to the
    /// current cleanup scope. The caller owns its disposal.
    pub fn new_persistent<F>(f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let effect = Self::new_detached(f);
        effect.run();
        effect
    }

    /// Allocate the effect without running it or registering it anywhere.
    pub(crate) fn new_detached<F>(f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = effect_arena_insert(EffectMetadata::new(Arc::new(f)));
        Self { id }
    }

    /// Run the effect now, re-tracking its dependencies
    pub(crate) fn run(&self) {
        run_effect(self.id);
    }

    /// Stop the effect: run its pending cleanups and drop all its edges.
    ///
    /// Idempotent.
    pub fn dispose(&self) {
        dispose_effect(self.id);
    }

    /// Whether [`dispose`](Effect::dispose) has been called
    pub fn is_disposed(&self) -> bool {
        !self.id.is_alive()
    }

    pub(crate) fn id(&self) -> EffectId {
        self.id
    }
}

/// Create an effect that runs now and re-runs whenever a signal it reads changes.
///
/// The effect is disposed along with the current cleanup scope, if any.
pub fn create_effect<F>(f: F) -> Effect
where
    F: Fn() + Send + Sync + 'static,
{
    Effect::new(f)
}

/// Like [`create_effect`], but never registered with the current cleanup scope.
pub fn create_persistent_effect<F>(f: F) -> Effect
where
    F: Fn() + Send + Sync + 'static,
{
    Effect::new_persistent(f)
}
