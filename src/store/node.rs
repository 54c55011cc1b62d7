//! The signal tree behind a [`Store`](super::Store).
//!
//! Every node is one of three shapes: a leaf signal holding a scalar (or
//! `null`), a struct node with named children, or a list node with indexed
//! children and a dedicated length signal. Assignments walk the existing
//! tree and reuse child signals, so subscribers only hear about leaves whose
//! value actually changed. Nodes are never dropped while their value comes
//! and goes: a struct or list that is assigned `null` goes vacant, and
//! removed fields and elements are parked.
//!
//! Signal writes are collected in a [`Writes`] buffer while the tree is
//! locked and applied afterwards: applying them runs dependents, which may
//! read the store again.

use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use super::path::{PathSegment, display_path};
use crate::Signal;
use crate::error::StoreError;

/// Structural kind of a store node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    /// A single signal
    Leaf,
    /// Named fields
    Struct,
    /// Indexed elements plus a length signal
    List,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NodeKind::Leaf => "leaf",
            NodeKind::Struct => "struct",
            NodeKind::List => "list",
        })
    }
}

/// A signal write deferred until the tree lock is released.
pub(crate) enum PendingWrite {
    Value(Signal<Value>, Value),
    Count(Signal<usize>, usize),
}

pub(crate) type Writes = Vec<PendingWrite>;

/// Apply deferred writes in the order they were recorded.
pub(crate) fn apply(writes: Writes) {
    for write in writes {
        match write {
            PendingWrite::Value(signal, value) => signal.set(value),
            PendingWrite::Count(signal, count) => signal.set(count),
        }
    }
}

pub(crate) enum StoreNode {
    Leaf(Signal<Value>),
    Struct(StructNode),
    List(ListNode),
}

/// How far a path walk may change the visible tree.
#[derive(Clone, Copy)]
pub(crate) enum Access<'v> {
    /// Missing nodes are parked out of sight; the snapshot is unchanged.
    Read,
    /// Missing nodes are created so the given value can be written at the
    /// end of the path.
    Write(&'v Value),
}

/// Whether a struct or list node currently holds a container value.
///
/// A vacant node stands for the scalar in `held` (normally `null`) and keeps
/// its cleared children for when a container value comes back. An active
/// node keeps an empty container of its own kind in `held`, so every switch
/// between the two states is a real change to that signal.
struct Presence {
    held: Signal<Value>,
    vacant: bool,
}

impl Presence {
    fn active(marker: Value) -> Self {
        Self {
            held: Signal::new(marker),
            vacant: false,
        }
    }

    fn vacant(held: Signal<Value>) -> Self {
        Self { held, vacant: true }
    }

    /// Tracked. `Some` with the held scalar while vacant.
    fn track(&self) -> Option<Value> {
        let held = self.held.get();
        self.vacant.then_some(held)
    }

    fn vacate(&mut self, scalar: Value, writes: &mut Writes) {
        self.vacant = true;
        writes.push(PendingWrite::Value(self.held.clone(), scalar));
    }

    fn activate(&mut self, marker: Value, writes: &mut Writes) {
        if self.vacant {
            cov_mark::hit!(store_node_reactivated);
            self.vacant = false;
            writes.push(PendingWrite::Value(self.held.clone(), marker));
        }
    }
}

fn object_marker() -> Value {
    Value::Object(Map::new())
}

fn array_marker() -> Value {
    Value::Array(Vec::new())
}

pub(crate) struct StructNode {
    fields: IndexMap<String, StoreNode>,
    /// Bumped whenever the set of field names changes; read by snapshots.
    shape: Signal<usize>,
    version: usize,
    /// Nodes for names that are not present: selected before they existed,
    /// or dropped by an assignment. Adopted when the name comes back.
    parked: BTreeMap<String, StoreNode>,
    presence: Presence,
}

pub(crate) struct ListNode {
    elems: Vec<StoreNode>,
    len: Signal<usize>,
    /// Zeroed shape of an element, used when the list grows.
    template: Option<Value>,
    /// Nodes handed out for indices past the end, adopted when the list grows.
    parked: BTreeMap<usize, StoreNode>,
    presence: Presence,
}

impl StoreNode {
    /// Deep-build a node tree from a value.
    pub(crate) fn build(value: Value) -> Self {
        match value {
            Value::Object(map) => StoreNode::Struct(StructNode::new(
                map.into_iter()
                    .map(|(name, value)| (name, StoreNode::build(value)))
                    .collect(),
            )),
            Value::Array(items) => {
                let template = items.first().map(zeroed);
                StoreNode::List(ListNode::new(
                    items.into_iter().map(StoreNode::build).collect(),
                    template,
                ))
            }
            scalar => StoreNode::Leaf(Signal::new(scalar)),
        }
    }

    fn null_leaf() -> Self {
        StoreNode::Leaf(Signal::new(Value::Null))
    }

    /// An empty, vacant node of `kind` standing for the value in `held`.
    fn vacant(held: Signal<Value>, kind: NodeKind) -> Self {
        match kind {
            NodeKind::Leaf => StoreNode::Leaf(held),
            NodeKind::Struct => StoreNode::Struct(StructNode::vacant(held)),
            NodeKind::List => StoreNode::List(ListNode::vacant(held)),
        }
    }

    pub(crate) fn kind(&self) -> NodeKind {
        match self {
            StoreNode::Leaf(_) => NodeKind::Leaf,
            StoreNode::Struct(_) => NodeKind::Struct,
            StoreNode::List(_) => NodeKind::List,
        }
    }

    /// Read the whole subtree, subscribing the running effect to every
    /// leaf, shape and length signal beneath this node.
    pub(crate) fn snapshot(&self) -> Value {
        match self {
            StoreNode::Leaf(signal) => signal.get(),
            StoreNode::Struct(node) => {
                if let Some(held) = node.presence.track() {
                    return held;
                }
                node.shape.get();
                Value::Object(
                    node.fields
                        .iter()
                        .map(|(name, child)| (name.clone(), child.snapshot()))
                        .collect(),
                )
            }
            StoreNode::List(node) => {
                if let Some(held) = node.presence.track() {
                    return held;
                }
                node.len.get();
                Value::Array(node.elems.iter().map(StoreNode::snapshot).collect())
            }
        }
    }

    /// Turn a `null` leaf into a vacant struct or list node so `segment`
    /// can address into it. The leaf signal becomes the node's held signal,
    /// so the snapshot and the leaf's subscribers are unaffected.
    fn promote_for(&mut self, segment: &PathSegment) -> Result<(), NodeKind> {
        let StoreNode::Leaf(signal) = self else {
            return Ok(());
        };
        if !signal.get_untracked().is_null() {
            return Err(NodeKind::Leaf);
        }
        let kind = match segment {
            PathSegment::Field(_) => NodeKind::Struct,
            PathSegment::Index(_) => NodeKind::List,
        };
        cov_mark::hit!(store_leaf_promoted);
        let held = signal.clone();
        *self = StoreNode::vacant(held, kind);
        Ok(())
    }

    /// Step one segment down. `rest` is the remainder of the path below it.
    ///
    /// Writing activates vacant nodes, adds missing fields and grows lists
    /// with zeroed elements; reading parks placeholders instead.
    fn child_mut(
        &mut self,
        segment: &PathSegment,
        rest: &[PathSegment],
        access: Access<'_>,
        writes: &mut Writes,
    ) -> Result<&mut StoreNode, NodeKind> {
        self.promote_for(segment)?;
        match (self, segment) {
            (StoreNode::Struct(node), PathSegment::Field(name)) => {
                Ok(node.field_mut(name, matches!(access, Access::Write(_)), writes))
            }
            (StoreNode::List(node), PathSegment::Index(index)) => {
                Ok(node.element_mut(*index, rest, access, writes))
            }
            (node, _) => Err(node.kind()),
        }
    }

    /// View this node as a list, promoting a `null` leaf.
    pub(crate) fn as_list_mut(&mut self) -> Result<&mut ListNode, NodeKind> {
        self.promote_for(&PathSegment::Index(0))?;
        match self {
            StoreNode::List(node) => Ok(node),
            node => Err(node.kind()),
        }
    }

    /// Write `value` into this subtree, reusing existing child signals.
    ///
    /// Leaves are written through [`Signal::set`], so unchanged leaves notify
    /// nobody. A scalar over a struct or list leaves the node vacant with
    /// its children cleared but kept; a later object or array reassigns
    /// those same children.
    pub(crate) fn assign(&mut self, value: Value, writes: &mut Writes) {
        let target = match &value {
            Value::Object(_) => NodeKind::Struct,
            Value::Array(_) => NodeKind::List,
            _ => NodeKind::Leaf,
        };
        if target != NodeKind::Leaf && target != self.kind() {
            let held = self.release(writes);
            let mut node = StoreNode::vacant(held, target);
            node.assign(value, writes);
            *self = node;
            return;
        }
        match (self, value) {
            (StoreNode::Leaf(signal), value) => {
                writes.push(PendingWrite::Value(signal.clone(), value));
            }
            (StoreNode::Struct(node), Value::Object(map)) => node.assign(map, writes),
            (StoreNode::List(node), Value::Array(items)) => node.assign(items, writes),
            (StoreNode::Struct(node), scalar) => node.vacate(scalar, writes),
            (StoreNode::List(node), scalar) => node.vacate(scalar, writes),
        }
    }

    /// Give up this node's shape, returning the signal its replacement
    /// keeps so existing subscribers hear about the change.
    fn release(&mut self, writes: &mut Writes) -> Signal<Value> {
        match self {
            StoreNode::Leaf(signal) => {
                cov_mark::hit!(store_leaf_expanded);
                signal.clone()
            }
            StoreNode::Struct(node) => {
                cov_mark::hit!(store_node_reshaped);
                node.vacate(Value::Null, writes);
                node.presence.held.clone()
            }
            StoreNode::List(node) => {
                cov_mark::hit!(store_node_reshaped);
                node.vacate(Value::Null, writes);
                node.presence.held.clone()
            }
        }
    }
}

impl StructNode {
    fn new(fields: IndexMap<String, StoreNode>) -> Self {
        Self {
            fields,
            shape: Signal::new(0),
            version: 0,
            parked: BTreeMap::new(),
            presence: Presence::active(object_marker()),
        }
    }

    fn vacant(held: Signal<Value>) -> Self {
        Self {
            presence: Presence::vacant(held),
            ..Self::new(IndexMap::new())
        }
    }

    fn bump_shape(&mut self, writes: &mut Writes) {
        self.version += 1;
        writes.push(PendingWrite::Count(self.shape.clone(), self.version));
    }

    fn field_mut(&mut self, name: &str, grow: bool, writes: &mut Writes) -> &mut StoreNode {
        if grow {
            self.presence.activate(object_marker(), writes);
        }
        if let Some(index) = self.fields.get_index_of(name) {
            return &mut self.fields[index];
        }
        if !grow {
            return self
                .parked
                .entry(name.to_owned())
                .or_insert_with(StoreNode::null_leaf);
        }
        let node = self.parked.remove(name).unwrap_or_else(StoreNode::null_leaf);
        let (index, _) = self.fields.insert_full(name.to_owned(), node);
        self.bump_shape(writes);
        &mut self.fields[index]
    }

    /// Reassign fields by name. Names missing from `map` are cleared and
    /// parked; new names adopt a parked node or get a fresh one.
    fn assign(&mut self, mut map: Map<String, Value>, writes: &mut Writes) {
        self.presence.activate(object_marker(), writes);

        let dropped: Vec<String> = self
            .fields
            .keys()
            .filter(|name| !map.contains_key(name.as_str()))
            .cloned()
            .collect();
        let mut reshaped = !dropped.is_empty();
        for name in dropped {
            if let Some(mut node) = self.fields.shift_remove(&name) {
                cov_mark::hit!(store_field_dropped);
                node.assign(Value::Null, writes);
                self.parked.insert(name, node);
            }
        }

        // Existing fields keep their position; new ones are appended.
        for (name, child) in self.fields.iter_mut() {
            if let Some(value) = map.shift_remove(name) {
                child.assign(value, writes);
            }
        }
        for (name, value) in map {
            reshaped = true;
            let node = match self.parked.remove(&name) {
                Some(mut parked) => {
                    cov_mark::hit!(store_parked_node_adopted);
                    parked.assign(value, writes);
                    parked
                }
                None => StoreNode::build(value),
            };
            self.fields.insert(name, node);
        }
        if reshaped {
            self.bump_shape(writes);
        }
    }

    fn vacate(&mut self, scalar: Value, writes: &mut Writes) {
        for child in self.fields.values_mut() {
            child.assign(Value::Null, writes);
        }
        self.presence.vacate(scalar, writes);
    }
}

impl ListNode {
    fn new(elems: Vec<StoreNode>, template: Option<Value>) -> Self {
        let len = Signal::new(elems.len());
        Self {
            elems,
            len,
            template,
            parked: BTreeMap::new(),
            presence: Presence::active(array_marker()),
        }
    }

    fn vacant(held: Signal<Value>) -> Self {
        Self {
            presence: Presence::vacant(held),
            ..Self::new(Vec::new(), None)
        }
    }

    pub(crate) fn len_signal(&self) -> Signal<usize> {
        self.len.clone()
    }

    /// Take the parked node for `index` (assigning `value` to it) or build one.
    fn adopt_or_build(&mut self, index: usize, value: Value, writes: &mut Writes) -> StoreNode {
        match self.parked.remove(&index) {
            Some(mut parked) => {
                cov_mark::hit!(store_parked_node_adopted);
                parked.assign(value, writes);
                parked
            }
            None => StoreNode::build(value),
        }
    }

    fn element_mut(
        &mut self,
        index: usize,
        rest: &[PathSegment],
        access: Access<'_>,
        writes: &mut Writes,
    ) -> &mut StoreNode {
        if index < self.elems.len() {
            return &mut self.elems[index];
        }
        let Access::Write(value) = access else {
            return self.parked.entry(index).or_insert_with(StoreNode::null_leaf);
        };
        self.presence.activate(array_marker(), writes);

        let zero = match &self.template {
            Some(template) => template.clone(),
            None => {
                let inferred = element_shape(rest, value);
                if rest.is_empty() {
                    cov_mark::hit!(store_template_inferred);
                    self.template = Some(inferred.clone());
                }
                inferred
            }
        };
        while self.elems.len() <= index {
            let next = self.elems.len();
            let node = self.adopt_or_build(next, zero.clone(), writes);
            self.elems.push(node);
        }
        writes.push(PendingWrite::Count(self.len.clone(), self.elems.len()));
        &mut self.elems[index]
    }

    /// Clear and park every element from `new_len` on, so a later regrow
    /// hands their subscribers fresh values.
    fn truncate(&mut self, new_len: usize, writes: &mut Writes) {
        if new_len >= self.elems.len() {
            return;
        }
        let removed: Vec<StoreNode> = self.elems.drain(new_len..).collect();
        for (offset, mut node) in removed.into_iter().enumerate() {
            node.assign(Value::Null, writes);
            self.parked.insert(new_len + offset, node);
        }
    }

    /// Reassign elements by index, truncating or extending to `items.len()`.
    fn assign(&mut self, items: Vec<Value>, writes: &mut Writes) {
        self.presence.activate(array_marker(), writes);
        if self.template.is_none() {
            self.template = items.first().map(zeroed);
        }
        let old_len = self.elems.len();
        let new_len = items.len();
        let mut items = items.into_iter();

        for (node, value) in self.elems.iter_mut().zip(items.by_ref()) {
            node.assign(value, writes);
        }
        self.truncate(new_len, writes);
        for (offset, value) in items.enumerate() {
            let node = self.adopt_or_build(old_len + offset, value, writes);
            self.elems.push(node);
        }
        writes.push(PendingWrite::Count(self.len.clone(), new_len));
    }

    fn vacate(&mut self, scalar: Value, writes: &mut Writes) {
        self.truncate(0, writes);
        writes.push(PendingWrite::Count(self.len.clone(), 0));
        self.presence.vacate(scalar, writes);
    }
}

/// Zero value with the same shape as `value`.
pub(crate) fn zeroed(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Bool(_) => Value::Bool(false),
        Value::Number(number) if number.is_f64() => Value::from(0.0),
        Value::Number(_) => Value::from(0),
        Value::String(_) => Value::String(String::new()),
        Value::Array(_) => Value::Array(Vec::new()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(name, value)| (name.clone(), zeroed(value)))
                .collect(),
        ),
    }
}

/// Zeroed element for a list that has never held one, inferred from the
/// path below the element and the value written at its end.
fn element_shape(rest: &[PathSegment], value: &Value) -> Value {
    rest.iter().rev().fold(zeroed(value), |inner, segment| match segment {
        PathSegment::Field(name) => Value::Object(Map::from_iter([(name.clone(), inner)])),
        PathSegment::Index(_) => Value::Array(Vec::new()),
    })
}

/// Walk `path` from `node`, see [`Access`] for what gets created on the way.
pub(crate) fn resolve<'a>(
    mut node: &'a mut StoreNode,
    path: &[PathSegment],
    access: Access<'_>,
    writes: &mut Writes,
) -> Result<&'a mut StoreNode, StoreError> {
    for (depth, segment) in path.iter().enumerate() {
        node = match node.child_mut(segment, &path[depth + 1..], access, writes) {
            Ok(child) => child,
            Err(found) => {
                return Err(StoreError::PathMismatch {
                    path: display_path(&path[..=depth]),
                    segment: segment.clone(),
                    found,
                });
            }
        };
    }
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path;
    use serde_json::json;

    fn leaf_at(root: &mut StoreNode, path: &[PathSegment]) -> Signal<Value> {
        let mut writes = Writes::new();
        match resolve(root, path, Access::Read, &mut writes) {
            Ok(StoreNode::Leaf(signal)) => signal.clone(),
            _ => panic!("expected a leaf at {}", display_path(path)),
        }
    }

    fn write_at(root: &mut StoreNode, path: &[PathSegment], value: Value) {
        let mut writes = Writes::new();
        resolve(root, path, Access::Write(&value), &mut writes)
            .expect("path resolves")
            .assign(value.clone(), &mut writes);
        apply(writes);
    }

    #[test]
    fn build_mirrors_value_shape() {
        let node = StoreNode::build(json!({"a": 1, "items": [true, false], "none": null}));
        let StoreNode::Struct(root) = &node else {
            panic!("expected struct root");
        };
        assert_eq!(root.fields["a"].kind(), NodeKind::Leaf);
        assert_eq!(root.fields["items"].kind(), NodeKind::List);
        assert_eq!(root.fields["none"].kind(), NodeKind::Leaf);
        assert_eq!(
            node.snapshot(),
            json!({"a": 1, "items": [true, false], "none": null})
        );
    }

    #[test]
    fn zeroed_keeps_nested_shape() {
        assert_eq!(
            zeroed(&json!({"title": "x", "done": true, "n": 3, "f": 1.5, "tags": ["a"]})),
            json!({"title": "", "done": false, "n": 0, "f": 0.0, "tags": []})
        );
    }

    #[test]
    fn growing_path_uses_template() {
        let mut root = StoreNode::build(json!([{"title": "a", "done": true}]));
        let mut writes = Writes::new();

        let node = resolve(&mut root, &path![2usize], Access::Write(&Value::Null), &mut writes)
            .expect("index resolves");
        assert_eq!(node.kind(), NodeKind::Struct);
        apply(writes);

        assert_eq!(
            root.snapshot(),
            json!([
                {"title": "a", "done": true},
                {"title": "", "done": false},
                {"title": "", "done": false}
            ])
        );
    }

    #[test]
    fn empty_list_takes_template_from_written_element() {
        cov_mark::check!(store_template_inferred);
        let mut root = StoreNode::build(json!([]));

        write_at(&mut root, &path![1usize], json!({"title": "b", "done": true}));
        assert_eq!(
            root.snapshot(),
            json!([{"title": "", "done": false}, {"title": "b", "done": true}])
        );
    }

    #[test]
    fn null_leaf_promotes_when_addressed() {
        cov_mark::check!(store_leaf_promoted);
        let mut root = StoreNode::build(json!({"profile": null}));

        write_at(&mut root, &path!["profile", "name"], json!("ada"));
        assert_eq!(root.snapshot(), json!({"profile": {"name": "ada"}}));
    }

    #[test]
    fn reading_through_null_leaves_snapshot_alone() {
        let mut root = StoreNode::build(json!({"profile": null, "items": []}));

        let name = leaf_at(&mut root, &path!["profile", "name"]);
        let third = leaf_at(&mut root, &path!["items", 2usize]);
        assert_eq!(name.get_untracked(), Value::Null);
        assert_eq!(third.get_untracked(), Value::Null);
        assert_eq!(root.snapshot(), json!({"profile": null, "items": []}));
    }

    #[test]
    fn vacated_struct_keeps_its_leaves() {
        let mut root = StoreNode::build(json!({"profile": {"name": "a"}}));
        let name = leaf_at(&mut root, &path!["profile", "name"]);

        write_at(&mut root, &path!["profile"], Value::Null);
        assert_eq!(root.snapshot(), json!({"profile": null}));
        assert_eq!(name.get_untracked(), Value::Null);

        {
            cov_mark::check!(store_node_reactivated);
            write_at(&mut root, &path!["profile"], json!({"name": "b"}));
        }
        assert_eq!(name.get_untracked(), json!("b"));
        assert!(leaf_at(&mut root, &path!["profile", "name"]).ptr_eq(&name));
    }

    #[test]
    fn leaf_expands_in_place_for_container_value() {
        let mut root = StoreNode::build(json!({"profile": null}));
        {
            cov_mark::check!(store_leaf_expanded);
            write_at(&mut root, &path!["profile"], json!({"name": "a", "tags": [1]}));
        }
        assert_eq!(
            root.snapshot(),
            json!({"profile": {"name": "a", "tags": [1]}})
        );
    }

    #[test]
    fn dropped_field_is_parked_and_readopted() {
        let mut root = StoreNode::build(json!({"x": 1, "y": 2}));
        let y = leaf_at(&mut root, &path!["y"]);

        {
            cov_mark::check!(store_field_dropped);
            write_at(&mut root, &path![], json!({"x": 1}));
        }
        assert_eq!(root.snapshot(), json!({"x": 1}));
        assert_eq!(y.get_untracked(), Value::Null);

        write_at(&mut root, &path![], json!({"z": 3, "y": 5, "x": 1}));
        assert_eq!(y.get_untracked(), json!(5));
        assert_eq!(root.snapshot(), json!({"x": 1, "z": 3, "y": 5}));
    }

    #[test]
    fn struct_swapped_for_list_is_rebuilt() {
        cov_mark::check!(store_node_reshaped);
        let mut root = StoreNode::build(json!({"v": {"a": 1}}));
        let a = leaf_at(&mut root, &path!["v", "a"]);

        write_at(&mut root, &path!["v"], json!([1, 2]));
        assert_eq!(root.snapshot(), json!({"v": [1, 2]}));
        assert_eq!(a.get_untracked(), Value::Null);
    }

    #[test]
    fn scalar_leaf_rejects_segments() {
        let mut root = StoreNode::build(json!({"count": 3}));
        let mut writes = Writes::new();

        let error = resolve(&mut root, &path!["count", "x"], Access::Read, &mut writes)
            .err()
            .expect("mismatch");
        assert!(matches!(
            error,
            StoreError::PathMismatch { found: NodeKind::Leaf, .. }
        ));
    }
}
