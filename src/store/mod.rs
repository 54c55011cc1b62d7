//! Path-addressed reactive state tree.
//!
//! A [`Store`] mirrors a nested value as a tree of signals: one leaf signal
//! per scalar, named children per struct, indexed children plus a length
//! signal per list. Effects that [`select`](Store::select) a leaf re-run
//! only when that leaf changes; [`set_state`](Store::set_state) rewrites a
//! subtree by reassigning existing signals rather than replacing them.
//!
//! The value is described through serde: `T` is serialized into a
//! `serde_json::Value` once, and snapshots are deserialized back into `T`.
//!
//! ```
//! use filament::{Store, create_effect, path};
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Counter {
//!     a: i64,
//!     b: String,
//! }
//!
//! let store = Store::new(&Counter { a: 1, b: "x".into() }).unwrap();
//! let a = store.select(&path!["a"]).unwrap();
//! let runs = Arc::new(AtomicUsize::new(0));
//!
//! let counter = runs.clone();
//! create_effect(move || {
//!     a.get();
//!     counter.fetch_add(1, Ordering::Relaxed);
//! });
//!
//! store.set_state(&path!["b"], "y").unwrap();
//! assert_eq!(runs.load(Ordering::Relaxed), 1);
//! store.set_state(&path!["a"], 2).unwrap();
//! assert_eq!(runs.load(Ordering::Relaxed), 2);
//! ```

mod node;
mod path;

pub use node::NodeKind;
pub use path::PathSegment;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::StoreError;
use crate::{Memo, Signal};
use node::{Access, StoreNode, Writes, apply, resolve};
use path::display_path;

/// Reactive tree of signals mirroring a value of type `T`.
///
/// Cheap to clone; clones share the same tree.
pub struct Store<T> {
    root: Arc<Mutex<StoreNode>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Store<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Build the signal tree from `initial`.
    pub fn new(initial: &T) -> Result<Self, StoreError> {
        let value = serde_json::to_value(initial)?;
        Ok(Self {
            root: Arc::new(Mutex::new(StoreNode::build(value))),
            _marker: PhantomData,
        })
    }

    /// Snapshot the whole tree as `T`.
    ///
    /// Inside an effect this subscribes to every signal in the store. Use
    /// [`select`](Store::select) for fine-grained reads.
    pub fn get(&self) -> Result<T, StoreError> {
        Ok(serde_json::from_value(self.get_value())?)
    }

    /// Snapshot the whole tree as a raw value. Tracks like [`get`](Store::get).
    pub fn get_value(&self) -> Value {
        self.root.lock().snapshot()
    }

    /// Select the value at `path`.
    ///
    /// Missing struct fields and indices past the end of a list get
    /// placeholders that are adopted once the data arrives, so selecting
    /// before the data exists is fine. Selecting never changes what
    /// [`get`](Store::get) returns.
    pub fn select(&self, path: &[PathSegment]) -> Result<Selection, StoreError> {
        let mut writes = Writes::new();
        let kind = {
            let mut root = self.root.lock();
            resolve(&mut root, path, Access::Read, &mut writes).map(|node| node.kind())
        };
        apply(writes);
        let kind = kind?;
        Ok(Selection {
            value: self.path_memo(path.to_vec()),
            kind,
        })
    }

    /// The length signal of the list at `path`.
    ///
    /// It changes only when the list's length does, not when its elements
    /// change. A `null` at `path` reads as an empty list until an array is
    /// written there.
    pub fn select_len(&self, path: &[PathSegment]) -> Result<Signal<usize>, StoreError> {
        let mut writes = Writes::new();
        let len = {
            let mut root = self.root.lock();
            resolve(&mut root, path, Access::Read, &mut writes).and_then(|node| {
                node.as_list_mut()
                    .map(|list| list.len_signal())
                    .map_err(|found| StoreError::NotAList {
                        path: display_path(path),
                        found,
                    })
            })
        };
        apply(writes);
        len
    }

    /// Write `value` at `path`; an empty path replaces the whole state.
    ///
    /// Nodes along the path are created as needed, and lists grow with
    /// zeroed elements to reach an index. At the destination, existing child
    /// signals are reassigned in place: struct fields by name, list elements
    /// by index (truncating or extending), leaves through [`Signal::set`].
    /// Only leaves whose value changed notify their dependents.
    ///
    /// Fields and elements that disappear, or a `null` written over a struct
    /// or list, keep their signals (reading `null`) until the value returns.
    pub fn set_state<V>(&self, path: &[PathSegment], value: V) -> Result<(), StoreError>
    where
        V: Serialize,
    {
        let value = serde_json::to_value(value)?;
        let mut writes = Writes::new();
        let result = {
            let mut root = self.root.lock();
            resolve(&mut root, path, Access::Write(&value), &mut writes)
                .map(|node| node.assign(value, &mut writes))
        };
        tracing::trace!(path = %display_path(path), writes = writes.len(), "store set_state");
        apply(writes);
        result
    }

    /// A handle that only writes.
    pub fn setter(&self) -> StoreSetter<T> {
        StoreSetter {
            store: self.clone(),
        }
    }

    fn path_memo(&self, path: Vec<PathSegment>) -> Memo<Value> {
        let root = self.root.clone();
        Memo::new(move || {
            let mut writes = Writes::new();
            let value = {
                let mut root = root.lock();
                match resolve(&mut root, &path, Access::Read, &mut writes) {
                    Ok(node) => node.snapshot(),
                    Err(error) => {
                        tracing::warn!(%error, "selected store path no longer resolves");
                        Value::Null
                    }
                }
            };
            apply(writes);
            value
        })
    }
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("root", &self.root.lock().kind())
            .finish()
    }
}

/// Write half of a store, as returned by [`create_store`].
pub struct StoreSetter<T> {
    store: Store<T>,
}

impl<T> StoreSetter<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Same as [`Store::set_state`]
    pub fn set<V>(&self, path: &[PathSegment], value: V) -> Result<(), StoreError>
    where
        V: Serialize,
    {
        self.store.set_state(path, value)
    }
}

impl<T> Clone for StoreSetter<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

/// Build a store from `initial`, returning it alongside its setter.
pub fn create_store<T>(initial: &T) -> Result<(Store<T>, StoreSetter<T>), StoreError>
where
    T: Serialize + DeserializeOwned,
{
    let store = Store::new(initial)?;
    let setter = store.setter();
    Ok((store, setter))
}

/// Result of [`Store::select`]: a memo over the value at a path.
///
/// The path is resolved again whenever something the memo read changes, so
/// the selection follows its node through reshapes, for instance a `null`
/// replaced by an object or a removed field coming back. Selecting a leaf
/// subscribes to that leaf alone; selecting a struct or list subscribes to
/// everything beneath it.
#[derive(Clone, Debug)]
pub struct Selection {
    value: Memo<Value>,
    kind: NodeKind,
}

impl Selection {
    /// Read the selected value, subscribing the running effect
    pub fn get(&self) -> Value {
        self.value.get()
    }

    /// Kind of the selected node when it was selected
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Whether the selected node was a single leaf when it was selected
    pub fn is_leaf(&self) -> bool {
        self.kind == NodeKind::Leaf
    }

    /// Narrow to a concrete type, see [`Adapted`]
    pub fn adapt<V>(self) -> Adapted<V>
    where
        V: DeserializeOwned + Default,
    {
        adapt(self)
    }
}

/// A [`Selection`] read as a concrete type.
///
/// `null` and values that do not deserialize into `V` read as
/// `V::default()`; the latter also log a warning.
pub struct Adapted<V> {
    source: Selection,
    _marker: PhantomData<fn() -> V>,
}

impl<V> Adapted<V>
where
    V: DeserializeOwned + Default,
{
    /// Read and convert the selected value, subscribing the running effect
    pub fn get(&self) -> V {
        let value = self.source.get();
        if value.is_null() {
            return V::default();
        }
        match serde_json::from_value(value) {
            Ok(converted) => converted,
            Err(error) => {
                tracing::warn!(
                    %error,
                    target_type = std::any::type_name::<V>(),
                    "store value does not match the adapted type"
                );
                V::default()
            }
        }
    }
}

impl<V> Clone for Adapted<V> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            _marker: PhantomData,
        }
    }
}

/// Narrow a selection to `V`
pub fn adapt<V>(selection: Selection) -> Adapted<V>
where
    V: DeserializeOwned + Default,
{
    Adapted {
        source: selection,
        _marker: PhantomData,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Effect, path};
    use serde::Deserialize;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Pair {
        a: i64,
        b: String,
    }

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Todo {
        title: String,
        completed: bool,
    }

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Todos {
        todos: Vec<Todo>,
    }

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
    }

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct User {
        profile: Option<Profile>,
    }

    fn profile(name: &str) -> Option<Profile> {
        Some(Profile {
            name: name.to_owned(),
        })
    }

    fn todo(title: &str, completed: bool) -> Todo {
        Todo {
            title: title.to_owned(),
            completed,
        }
    }

    fn counting_effect(read: impl Fn() + Send + Sync + 'static) -> (Effect, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let effect = Effect::new(move || {
            read();
            counter.fetch_add(1, Ordering::Relaxed);
        });
        (effect, runs)
    }

    #[test]
    fn fields_are_isolated() {
        let store = Store::new(&Pair {
            a: 1,
            b: "one".into(),
        })
        .unwrap();
        let a = store.select(&path!["a"]).unwrap();
        let b = store.select(&path!["b"]).unwrap();
        assert!(a.is_leaf());

        let (effect_a, runs_a) = counting_effect(move || {
            a.get();
        });
        let (effect_b, runs_b) = counting_effect(move || {
            b.get();
        });

        store.set_state(&path!["b"], "two").unwrap();
        assert_eq!(runs_a.load(Ordering::Relaxed), 1);
        assert_eq!(runs_b.load(Ordering::Relaxed), 2);

        store.set_state(&path!["a"], 5).unwrap();
        assert_eq!(runs_a.load(Ordering::Relaxed), 2);
        assert_eq!(runs_b.load(Ordering::Relaxed), 2);

        assert_eq!(
            store.get().unwrap(),
            Pair {
                a: 5,
                b: "two".into()
            }
        );
        effect_a.dispose();
        effect_b.dispose();
    }

    #[test]
    fn list_elements_are_isolated_from_each_other_and_length() {
        let (store, set) = create_store(&Todos {
            todos: vec![todo("write", false), todo("test", false)],
        })
        .unwrap();

        let second = store.select(&path!["todos", 1usize, "completed"]).unwrap();
        let len = store.select_len(&path!["todos"]).unwrap();

        let (second_effect, second_runs) = counting_effect(move || {
            second.get();
        });
        let (len_effect, len_runs) = counting_effect(move || {
            len.get();
        });

        set.set(&path!["todos", 0usize, "completed"], true).unwrap();

        assert_eq!(second_runs.load(Ordering::Relaxed), 1);
        assert_eq!(len_runs.load(Ordering::Relaxed), 1);
        assert!(store.get().unwrap().todos[0].completed);
        second_effect.dispose();
        len_effect.dispose();
    }

    #[test]
    fn superset_replacement_only_moves_length() {
        let store = Store::new(&Todos {
            todos: vec![todo("write", false)],
        })
        .unwrap();

        let title = store.select(&path!["todos", 0usize, "title"]).unwrap();
        let len = store.select_len(&path!["todos"]).unwrap();
        let (title_effect, title_runs) = counting_effect(move || {
            title.get();
        });
        let (len_effect, len_runs) = counting_effect(move || {
            len.get();
        });

        store
            .set_state(
                &path!["todos"],
                vec![todo("write", false), todo("ship", false)],
            )
            .unwrap();

        assert_eq!(title_runs.load(Ordering::Relaxed), 1);
        assert_eq!(len_runs.load(Ordering::Relaxed), 2);
        assert_eq!(store.select_len(&path!["todos"]).unwrap().get_untracked(), 2);
        title_effect.dispose();
        len_effect.dispose();
    }

    #[test]
    fn truncation_clears_removed_elements() {
        let store = Store::new(&Todos {
            todos: vec![todo("a", true), todo("b", true)],
        })
        .unwrap();
        let removed = store.select(&path!["todos", 1usize, "completed"]).unwrap();

        store.set_state(&path!["todos"], vec![todo("a", true)]).unwrap();
        assert_eq!(removed.get(), Value::Null);
        assert_eq!(store.get().unwrap().todos.len(), 1);

        // Growing again hands the same signal the new value
        store
            .set_state(&path!["todos"], vec![todo("a", true), todo("c", false)])
            .unwrap();
        assert_eq!(removed.get(), json!(false));
    }

    #[test]
    fn select_past_end_is_adopted_on_growth() {
        cov_mark::check!(store_parked_node_adopted);
        let store = Store::new(&Todos::default()).unwrap();
        let title = store.select(&path!["todos", 0usize, "title"]).unwrap();
        assert_eq!(title.get(), Value::Null);
        assert_eq!(store.get().unwrap(), Todos::default());

        let (effect, runs) = counting_effect({
            let title = title.clone();
            move || {
                title.get();
            }
        });

        store.set_state(&path!["todos"], vec![todo("late", false)]).unwrap();
        assert_eq!(title.get(), json!("late"));
        assert_eq!(runs.load(Ordering::Relaxed), 2);
        effect.dispose();
    }

    #[test]
    fn set_state_grows_list_to_index() {
        let store = Store::new(&Todos {
            todos: vec![todo("a", false)],
        })
        .unwrap();
        let len = store.select_len(&path!["todos"]).unwrap();

        store
            .set_state(&path!["todos", 2usize], todo("c", true))
            .unwrap();

        assert_eq!(len.get_untracked(), 3);
        assert_eq!(
            store.get().unwrap().todos,
            vec![todo("a", false), todo("", false), todo("c", true)]
        );
    }

    #[test]
    fn select_len_on_missing_list_starts_empty() {
        let store = Store::new(&json!({"items": null})).unwrap();
        let len = store.select_len(&path!["items"]).unwrap();
        assert_eq!(len.get_untracked(), 0);
        assert_eq!(store.get_value(), json!({"items": null}));

        store.set_state(&path!["items"], vec![1, 2, 3]).unwrap();
        assert_eq!(len.get_untracked(), 3);
    }

    #[test]
    fn index_write_into_empty_list_pads_with_defaults() {
        let store = Store::new(&Todos::default()).unwrap();

        store
            .set_state(&path!["todos", 1usize], todo("b", true))
            .unwrap();
        assert_eq!(
            store.get().unwrap().todos,
            vec![Todo::default(), todo("b", true)]
        );
    }

    #[test]
    fn optional_struct_survives_none_and_back() {
        let store = Store::new(&User {
            profile: profile("a"),
        })
        .unwrap();
        let name = store.select(&path!["profile", "name"]).unwrap();
        let reader = name.clone();
        let (effect, runs) = counting_effect(move || {
            reader.get();
        });

        store.set_state(&path!["profile"], None::<Profile>).unwrap();
        assert_eq!(name.get(), Value::Null);
        assert_eq!(store.get().unwrap(), User { profile: None });

        store.set_state(&path!["profile"], profile("b")).unwrap();
        assert_eq!(name.get(), json!("b"));
        assert_eq!(runs.load(Ordering::Relaxed), 3);
        assert_eq!(store.get().unwrap().profile, profile("b"));
        effect.dispose();
    }

    #[test]
    fn selection_follows_null_becoming_struct() {
        let store = Store::new(&User::default()).unwrap();
        let whole = store.select(&path!["profile"]).unwrap();
        assert!(whole.is_leaf());
        assert_eq!(whole.get(), Value::Null);

        store.set_state(&path!["profile"], profile("a")).unwrap();
        assert_eq!(whole.get(), json!({"name": "a"}));
        let name = store.select(&path!["profile", "name"]).unwrap();
        assert_eq!(name.get(), json!("a"));

        store.set_state(&path!["profile"], profile("z")).unwrap();
        assert_eq!(whole.get(), json!({"name": "z"}));

        store.set_state(&path!["profile", "name"], "y").unwrap();
        assert_eq!(whole.get(), json!({"name": "y"}));
        assert_eq!(name.get(), json!("y"));
    }

    #[test]
    fn removed_map_key_leaves_the_snapshot() {
        let initial = BTreeMap::from([("x".to_owned(), 1u32), ("y".to_owned(), 2)]);
        let store = Store::new(&initial).unwrap();
        let y = store.select(&path!["y"]).unwrap();
        let all = store.select(&path![]).unwrap();
        let (effect, runs) = counting_effect(move || {
            all.get();
        });

        store
            .set_state(&path![], BTreeMap::from([("x".to_owned(), 1u32)]))
            .unwrap();
        assert_eq!(
            store.get().unwrap(),
            BTreeMap::from([("x".to_owned(), 1)])
        );
        assert_eq!(y.get(), Value::Null);
        assert_eq!(runs.load(Ordering::Relaxed), 2);

        store.set_state(&path!["y"], 5u32).unwrap();
        assert_eq!(y.get(), json!(5));
        assert_eq!(store.get().unwrap().get("y"), Some(&5));
        effect.dispose();
    }

    #[test]
    fn empty_path_replaces_root_in_place() {
        let store = Store::new(&Pair::default()).unwrap();
        let a = store.select(&path!["a"]).unwrap();

        store
            .set_state(
                &path![],
                Pair {
                    a: 9,
                    b: "root".into(),
                },
            )
            .unwrap();

        assert_eq!(a.get(), json!(9));
        assert_eq!(store.get().unwrap().b, "root");
    }

    #[test]
    fn struct_selection_tracks_any_leaf_beneath() {
        let store = Store::new(&Todos {
            todos: vec![todo("a", false)],
        })
        .unwrap();
        let first = store.select(&path!["todos", 0usize]).unwrap();
        assert!(!first.is_leaf());

        let reader = first.clone();
        let (effect, runs) = counting_effect(move || {
            reader.get();
        });

        store
            .set_state(&path!["todos", 0usize, "completed"], true)
            .unwrap();
        assert_eq!(runs.load(Ordering::Relaxed), 2);
        assert_eq!(first.get(), json!({"title": "a", "completed": true}));
        effect.dispose();
    }

    #[test]
    fn path_mismatch_is_reported() {
        let store = Store::new(&Todos::default()).unwrap();

        let error = store.select(&path!["todos", "title"]).unwrap_err();
        assert!(matches!(
            error,
            StoreError::PathMismatch {
                found: NodeKind::List,
                ..
            }
        ));
        assert_eq!(
            error.to_string(),
            "store path $.todos.title: segment `title` cannot address a list node"
        );

        let error = store.select(&path![0usize]).unwrap_err();
        assert!(matches!(
            error,
            StoreError::PathMismatch {
                found: NodeKind::Struct,
                ..
            }
        ));

        let error = store.select_len(&path![]).unwrap_err();
        assert!(matches!(
            error,
            StoreError::NotAList {
                found: NodeKind::Struct,
                ..
            }
        ));
    }

    #[test]
    fn adapted_selection_narrows_type() {
        let store = Store::new(&Pair {
            a: 7,
            b: "seven".into(),
        })
        .unwrap();

        let a: Adapted<i64> = store.select(&path!["a"]).unwrap().adapt();
        let b = adapt::<String>(store.select(&path!["b"]).unwrap());
        let wrong = adapt::<bool>(store.select(&path!["b"]).unwrap());
        let missing = adapt::<u32>(store.select(&path!["c"]).unwrap());

        assert_eq!(a.get(), 7);
        assert_eq!(b.get(), "seven");
        assert!(!wrong.get());
        assert_eq!(missing.get(), 0);
    }
}
