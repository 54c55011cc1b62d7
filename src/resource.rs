//! Asynchronous fetches exposed as signals.
//!
//! A [`Resource`] watches a source signal. Each time the source changes it
//! starts a new fetch on another thread and exposes the outcome through three
//! signals: `data`, `loading` and `error`. Every fetch carries a request
//! token; a completion whose token is no longer the latest is discarded, so
//! a slow early fetch can never overwrite the result of a later one.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use crate::effect::{Effect, untracked};
use crate::scope::register_cleanup;
use crate::signal::Signal;

/// One fetch, ready to run on whatever thread the spawner picks.
pub type FetchJob = Box<dyn FnOnce() + Send>;

type SpawnFn = Arc<dyn Fn(FetchJob) + Send + Sync>;

/// Builder for configuring how a [`Resource`] dispatches its fetches.
///
/// # Example
///
/// ```
/// use filament::{ResourceBuilder, Signal};
///
/// let user_id = Signal::new(7u32);
/// let profile = ResourceBuilder::new()
///     .spawn_fn(|job| {
///         std::thread::Builder::new()
///             .name("profile-fetch".into())
///             .spawn(job)
///             .expect("spawn fetch thread");
///     })
///     .build(user_id, |id| Ok::<_, String>(format!("user #{id}")));
///
/// assert!(profile.error().is_none());
/// ```
pub struct ResourceBuilder {
    spawn_fn: Option<SpawnFn>,
}

impl Default for ResourceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceBuilder {
    /// Create a builder with default settings.
    ///
    /// Defaults:
    /// - `spawn_fn`: `std::thread::spawn`, one thread per fetch
    pub fn new() -> Self {
        Self { spawn_fn: None }
    }

    /// Set a custom function that runs each fetch job.
    ///
    /// Use this to name threads, hand jobs to a pool, or queue them for
    /// manual execution. The job must eventually be run for the resource to
    /// leave the loading state.
    pub fn spawn_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(FetchJob) + Send + Sync + 'static,
    {
        self.spawn_fn = Some(Arc::new(f));
        self
    }

    /// Create the resource and start the first fetch immediately.
    ///
    /// The watching effect is registered with the current cleanup scope, if
    /// any; disposing the scope stops refetching and discards in-flight
    /// completions.
    pub fn build<S, T, E, F>(self, source: Signal<S>, fetcher: F) -> Resource<T, E>
    where
        S: Clone + PartialEq + Send + Sync + 'static,
        T: Clone + PartialEq + Send + Sync + 'static,
        E: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(S) -> Result<T, E> + Send + Sync + 'static,
    {
        let spawn: SpawnFn = match self.spawn_fn {
            Some(spawn_fn) => spawn_fn,
            None => Arc::new(|job: FetchJob| {
                thread::spawn(job);
            }),
        };
        let state = Arc::new(ResourceState {
            data: Signal::new(None),
            loading: Signal::new(false),
            error: Signal::new(None),
            token: AtomicU64::new(0),
        });
        let fetcher = Arc::new(fetcher);

        let watched = state.clone();
        let effect = Effect::new(move || {
            let value = source.get();
            let token = watched.begin();

            let (state, fetcher) = (watched.clone(), fetcher.clone());
            let job: FetchJob = Box::new(move || {
                let result = fetcher(value);
                state.complete(token, result);
            });
            // A spawner may run the job inline; its reads must not be tracked.
            untracked(|| spawn(job));
        });

        let weak: Weak<ResourceState<T, E>> = Arc::downgrade(&state);
        register_cleanup(move || {
            if let Some(state) = weak.upgrade() {
                state.invalidate();
            }
        });

        Resource { state, effect }
    }
}

/// Signals tracking the latest fetch for a source signal.
///
/// `data` keeps the last successful value (`None` before the first one);
/// a failed fetch sets `error` and leaves `data` untouched.
pub struct Resource<T, E> {
    state: Arc<ResourceState<T, E>>,
    effect: Effect,
}

struct ResourceState<T, E> {
    data: Signal<Option<T>>,
    loading: Signal<bool>,
    error: Signal<Option<E>>,
    /// Token of the most recent fetch; completions carrying any other
    /// token are stale.
    token: AtomicU64,
}

impl<T, E> ResourceState<T, E>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    E: Clone + PartialEq + Send + Sync + 'static,
{
    /// Issue a new token and flag the resource as loading.
    fn begin(&self) -> u64 {
        let token = self.token.fetch_add(1, Ordering::AcqRel) + 1;
        self.loading.set(true);
        self.error.set(None);
        token
    }

    fn complete(&self, token: u64, result: Result<T, E>) {
        if !self.is_latest(token) {
            cov_mark::hit!(resource_stale_completion);
            return;
        }
        match result {
            Ok(data) => self.data.set(Some(data)),
            Err(error) => self.error.set(Some(error)),
        }
        // Dependents of the write above may have started a newer fetch,
        // which now owns the loading flag.
        if !self.is_latest(token) {
            cov_mark::hit!(resource_superseded_during_completion);
            return;
        }
        self.loading.set(false);
    }

    fn is_latest(&self, token: u64) -> bool {
        let latest = self.token.load(Ordering::Acquire);
        if token != latest {
            tracing::debug!(token, latest, "discarding stale resource completion");
        }
        token == latest
    }

    /// Make every in-flight fetch stale.
    fn invalidate(&self) {
        self.token.fetch_add(1, Ordering::AcqRel);
    }
}

impl<T, E> Resource<T, E>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    E: Clone + PartialEq + Send + Sync + 'static,
{
    /// Latest successful value. Tracked.
    pub fn data(&self) -> Option<T> {
        self.state.data.get()
    }

    /// Whether the latest fetch is still running. Tracked.
    pub fn loading(&self) -> bool {
        self.state.loading.get()
    }

    /// Error of the latest fetch, cleared when a new fetch starts. Tracked.
    pub fn error(&self) -> Option<E> {
        self.state.error.get()
    }

    /// The signal behind [`data`](Resource::data)
    pub fn data_signal(&self) -> Signal<Option<T>> {
        self.state.data.clone()
    }

    /// The signal behind [`loading`](Resource::loading)
    pub fn loading_signal(&self) -> Signal<bool> {
        self.state.loading.clone()
    }

    /// The signal behind [`error`](Resource::error)
    pub fn error_signal(&self) -> Signal<Option<E>> {
        self.state.error.clone()
    }

    /// Fetch again for the current source value, superseding any fetch in
    /// flight. No-op once disposed.
    pub fn refetch(&self) {
        self.effect.run();
    }

    /// Stop watching the source and discard any fetch still in flight.
    pub fn dispose(&self) {
        self.effect.dispose();
        self.state.invalidate();
    }

    /// Whether [`dispose`](Resource::dispose) has been called
    pub fn is_disposed(&self) -> bool {
        self.effect.is_disposed()
    }
}

impl<T, E> Clone for Resource<T, E> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            effect: self.effect,
        }
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Resource<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("data", &self.state.data)
            .field("loading", &self.state.loading)
            .field("error", &self.state.error)
            .field("token", &self.state.token.load(Ordering::Relaxed))
            .finish()
    }
}

/// Create a resource over `source` with the default thread-per-fetch spawner.
///
/// Runs `fetcher` once immediately and again every time `source` changes.
pub fn create_resource<S, T, E, F>(source: Signal<S>, fetcher: F) -> Resource<T, E>
where
    S: Clone + PartialEq + Send + Sync + 'static,
    T: Clone + PartialEq + Send + Sync + 'static,
    E: Clone + PartialEq + Send + Sync + 'static,
    F: Fn(S) -> Result<T, E> + Send + Sync + 'static,
{
    ResourceBuilder::new().build(source, fetcher)
}
