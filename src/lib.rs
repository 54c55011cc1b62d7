#![deny(missing_docs)]

//! Push-based fine-grained reactivity with automatic dependency tracking.
//!
//! Signals hold values. Effects read them and re-run, synchronously, when
//! any signal they read changes. Memos cache derived values and only notify
//! when the derived value actually changes. Cleanup scopes dispose whole
//! trees of effects at once, and a path-addressed [`Store`] turns a nested
//! value into a tree of independently tracked signals.
//!
//! # Quick Start
//!
//! ```
//! use filament::{Memo, Signal, create_effect};
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! let count = Signal::new(1);
//!
//! let source = count.clone();
//! let doubled = Memo::new(move || source.get() * 2);
//!
//! let runs = Arc::new(AtomicUsize::new(0));
//! let (memo, counter) = (doubled.clone(), runs.clone());
//! let effect = create_effect(move || {
//!     memo.get();
//!     counter.fetch_add(1, Ordering::Relaxed);
//! });
//!
//! count.set(2); // doubled changes 2 -> 4, the effect re-runs
//! count.set(2); // equal value, nothing happens
//! assert_eq!(runs.load(Ordering::Relaxed), 2);
//! assert_eq!(doubled.get(), 4);
//! effect.dispose();
//! ```
//!
//! # Core Types
//!
//! - [`Signal<T>`] - Value cell. [`get`](Signal::get) subscribes the running
//!   effect, [`set`](Signal::set) notifies subscribers when the value changes.
//! - [`Effect`] - Side-effectful computation. Re-tracks its dependencies on
//!   every run; [`on_cleanup`] callbacks run before the next run.
//! - [`Memo<T>`] - Lazy, cached derived value with change suppression.
//! - [`CleanupScope`] - Tree of disposers; [`with_cleanup_scope`] makes one
//!   current so effects and memos created inside it are disposed with it.
//! - [`Store<T>`] - Reactive mirror of a serde value, addressed by
//!   [`path!`] literals.
//! - [`Resource<T, E>`] - Asynchronous fetch keyed on a source signal, with
//!   stale completions discarded.
//!
//! # Threading
//!
//! Handles are `Send + Sync`. The tracking context and the current cleanup
//! scope are per thread, and propagation runs on the thread that performed
//! the write: a [`Resource`] completing on a worker thread runs dependents
//! there.

// Internal modules
pub(crate) mod arena;
mod effect;
mod error;
mod hash;
mod memo;
mod resource;
mod scope;
mod signal;
mod store;

// Core types
pub use effect::Effect;
pub use memo::Memo;
pub use resource::{FetchJob, Resource, ResourceBuilder};
pub use scope::CleanupScope;
pub use signal::Signal;
pub use store::{Adapted, NodeKind, PathSegment, Selection, Store, StoreSetter};

// Errors
pub use error::StoreError;

// Key functions
pub use effect::{create_effect, create_persistent_effect, on_cleanup, untracked};
pub use memo::create_memo;
pub use resource::create_resource;
pub use scope::{
    current_cleanup_scope, register_cleanup, set_current_cleanup_scope, with_cleanup_scope,
};
pub use signal::create_signal;
pub use store::{adapt, create_store};
