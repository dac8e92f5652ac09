#![forbid(unsafe_code)]

//! The state cell: the only place values are mutated.
//!
//! # Design
//!
//! An [`Atom`] owns one [`Value`] tree, a version counter, a pointer arena
//! and one identity prism per path that has ever been read inside a prism.
//! Mutations swap the tree and then *announce*: the arena's tree of minted
//! paths is walked alongside the old and new values, and every identity
//! prism whose value is no longer [`Value::same`] is invalidated. Subtrees
//! whose old and new values are the same are skipped whole.
//!
//! Because edits copy every container on the edited path and share the
//! rest, this invalidates the edited path, its ancestors and its changed
//! descendants, while readers of untouched siblings stay clean.
//!
//! # Invariants
//!
//! 1. `set`/`set_in` return only after every affected lazy prism is marked
//!    stale and every affected hot prism is queued.
//! 2. Writing a value that is the same as the current one is a no-op: no
//!    version bump, no invalidation.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::error::Result;
use crate::pointer::{IdentityPrismProvider, Pointer, PointerArena, PointerId, PointerRoot, RootId};
use crate::prism::{Node, Prism, Readable, in_prism, invalidate};
use crate::value::{PathSegment, Value, display_path};

struct AtomInner {
    root_id: RootId,
    this: Weak<AtomInner>,
    value: RefCell<Value>,
    version: Cell<u64>,
    arena: PointerArena,
    identity: RefCell<FxHashMap<PointerId, Prism<Option<Value>>>>,
}

impl AtomInner {
    /// Identity prisms under `id` whose value changed between `old` and
    /// `new`.
    fn collect_changed(
        &self,
        id: PointerId,
        old: Option<&Value>,
        new: Option<&Value>,
        out: &mut Vec<Rc<dyn Node>>,
    ) {
        if Value::same_opt(old, new) {
            return;
        }
        if let Some(prism) = self.identity.borrow().get(&id) {
            out.push(prism.node());
        }
        for (segment, child) in self.arena.children(id) {
            self.collect_changed(
                child,
                old.and_then(|v| v.get(&segment)),
                new.and_then(|v| v.get(&segment)),
                out,
            );
        }
    }

    fn replace(&self, next: Value) {
        let previous = self.value.replace(next.clone());
        if Value::same(&previous, &next) {
            return;
        }
        self.version.set(self.version.get() + 1);

        let mut changed = Vec::new();
        self.collect_changed(PointerId::ROOT, Some(&previous), Some(&next), &mut changed);
        trace!(
            atom = %self.describe(),
            version = self.version.get(),
            changed = changed.len(),
            "announce"
        );
        invalidate(changed);
    }
}

impl IdentityPrismProvider for AtomInner {
    fn identity_prism(&self, path: &[PathSegment]) -> Prism<Option<Value>> {
        let id = self.arena.descend(PointerId::ROOT, path);
        if let Some(existing) = self.identity.borrow().get(&id) {
            return existing.clone();
        }

        let path = self.arena.path(id);
        let label = format!("{}:{}", self.describe(), display_path(&path));
        let atom = self.this.clone();
        let prism = Prism::with_equality(
            move || {
                let Some(atom) = atom.upgrade() else {
                    return Ok(None);
                };
                let value = atom.value.borrow().get_in(&path).cloned();
                Ok(value)
            },
            |a: &Option<Value>, b: &Option<Value>| Value::same_opt(a.as_ref(), b.as_ref()),
        )
        .with_label(label);
        self.identity.borrow_mut().insert(id, prism.clone());
        prism
    }
}

impl PointerRoot for AtomInner {
    fn root_id(&self) -> RootId {
        self.root_id
    }

    fn arena(&self) -> &PointerArena {
        &self.arena
    }

    fn resolve(&self, path: &[PathSegment]) -> Option<Value> {
        self.value.borrow().get_in(path).cloned()
    }

    fn describe(&self) -> String {
        format!("atom#{}", self.root_id.raw())
    }
}

// ---------------------------------------------------------------------------
// Atom
// ---------------------------------------------------------------------------

/// A versioned, path-addressable state cell.
///
/// Cloning an `Atom` yields another handle to the same cell.
#[derive(Clone)]
pub struct Atom {
    inner: Rc<AtomInner>,
}

impl Default for Atom {
    fn default() -> Self {
        Self::new(Value::Null)
    }
}

impl fmt::Debug for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Atom")
            .field("id", &self.inner.root_id)
            .field("version", &self.inner.version.get())
            .field("value", &*self.inner.value.borrow())
            .finish()
    }
}

impl Atom {
    pub fn new(initial: impl Into<Value>) -> Self {
        let inner = Rc::new_cyclic(|this| AtomInner {
            root_id: RootId::next(),
            this: this.clone(),
            value: RefCell::new(initial.into()),
            version: Cell::new(0),
            arena: PointerArena::new(),
            identity: RefCell::new(FxHashMap::default()),
        });
        Self { inner }
    }

    /// Snapshot of the whole value. O(1): containers are shared.
    #[must_use]
    pub fn get(&self) -> Value {
        self.inner.value.borrow().clone()
    }

    /// Value at `path`, or `None` if the path does not exist.
    #[must_use]
    pub fn get_in(&self, path: &[PathSegment]) -> Option<Value> {
        self.inner.resolve(path)
    }

    /// Value at `pointer`'s path.
    #[must_use]
    pub fn get_by_pointer(&self, pointer: &Pointer) -> Option<Value> {
        self.get_in(&pointer.path())
    }

    /// Replace the whole value.
    pub fn set(&self, value: impl Into<Value>) {
        self.inner.replace(value.into());
    }

    /// Replace the value at `path`, creating missing intermediates.
    pub fn set_in(&self, path: &[PathSegment], value: impl Into<Value>) {
        let value = value.into();
        let next = {
            let current = self.inner.value.borrow();
            if current
                .get_in(path)
                .is_some_and(|existing| Value::same(existing, &value))
            {
                return;
            }
            current.set_in(path, value)
        };
        self.inner.replace(next);
    }

    pub fn set_by_pointer(&self, pointer: &Pointer, value: impl Into<Value>) {
        self.set_in(&pointer.path(), value);
    }

    /// Replace the whole value with `f(current)`.
    pub fn reduce(&self, f: impl FnOnce(Value) -> Value) {
        self.set(f(self.get()));
    }

    /// Replace the value at `path` with `f(current at path)`.
    pub fn reduce_in(&self, path: &[PathSegment], f: impl FnOnce(Option<Value>) -> Value) {
        self.set_in(path, f(self.get_in(path)));
    }

    /// Number of effective mutations so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }

    /// The canonical root pointer.
    #[must_use]
    pub fn pointer(&self) -> Pointer {
        let root: Rc<dyn PointerRoot> = self.inner.clone();
        Pointer::at_root(root)
    }

    #[must_use]
    pub fn pointer_at(&self, path: &[PathSegment]) -> Pointer {
        self.pointer().at(path)
    }

    /// Pointers minted so far, the root included.
    #[must_use]
    pub fn pointer_count(&self) -> usize {
        self.inner.arena.len()
    }
}

impl IdentityPrismProvider for Atom {
    fn identity_prism(&self, path: &[PathSegment]) -> Prism<Option<Value>> {
        self.inner.identity_prism(path)
    }
}

impl Readable for Atom {
    type Output = Value;

    fn read(&self) -> Result<Value> {
        if in_prism() {
            Ok(self.inner.identity_prism(&[]).get_value()?.unwrap_or_default())
        } else {
            Ok(self.get())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path;
    use crate::prism::{Status, prism, val};
    use serde_json::json;
    use std::cell::Cell;

    fn counted(pointer: Pointer) -> (Prism<Option<Value>>, Rc<Cell<u32>>) {
        let runs = Rc::new(Cell::new(0));
        let count = Rc::clone(&runs);
        let p = prism(move || {
            count.set(count.get() + 1);
            val(&pointer)
        });
        (p, runs)
    }

    #[test]
    fn reads_whole_and_partial_values() {
        let atom = Atom::new(json!({"a": {"b": [1, 2, 3]}}));
        assert_eq!(atom.get_in(&path!["a", "b", 2usize]), Some(Value::from(3)));
        assert_eq!(atom.get_in(&path!["a", "x"]), None);
        assert_eq!(atom.get(), Value::from(json!({"a": {"b": [1, 2, 3]}})));
    }

    #[test]
    fn sibling_writes_leave_readers_clean() {
        let atom = Atom::new(json!({"a": {"b": 1, "c": 2}}));
        let (reader, runs) = counted(atom.pointer().key("a").key("c"));
        assert_eq!(reader.get_value(), Ok(Some(Value::from(2))));

        atom.set_in(&path!["a", "b"], 99);
        assert_eq!(reader.status(), Status::Clean);
        assert_eq!(reader.peek(), Some(Some(Value::from(2))));
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn leaf_write_invalidates_ancestor_readers() {
        let atom = Atom::new(json!({"a": {"b": 1}}));
        let (reader, runs) = counted(atom.pointer().key("a"));
        let _ = reader.get_value();

        atom.set_in(&path!["a", "b"], 2);
        assert_eq!(reader.status(), Status::Stale);
        assert_eq!(reader.get_value(), Ok(Some(Value::from(json!({"b": 2})))));
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn ancestor_replace_invalidates_leaf_readers() {
        let atom = Atom::new(json!({"a": {"b": 1}}));
        let (reader, _) = counted(atom.pointer().key("a").key("b"));
        let _ = reader.get_value();

        atom.set_in(&path!["a"], json!({"b": 5}));
        assert_eq!(reader.status(), Status::Stale);
        assert_eq!(reader.get_value(), Ok(Some(Value::from(5))));
    }

    #[test]
    fn equal_leaf_after_ancestor_replace_cuts_off() {
        let atom = Atom::new(json!({"a": {"b": 1}}));
        let (reader, runs) = counted(atom.pointer().key("a").key("b"));
        let _ = reader.get_value();

        // New container, same scalar at `a.b`.
        atom.set_in(&path!["a"], json!({"b": 1, "c": 0}));
        assert_eq!(reader.status(), Status::Clean);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn same_value_writes_are_no_ops() {
        let atom = Atom::new(json!({"n": 1, "m": {"k": true}}));
        let (reader, runs) = counted(atom.pointer());
        let _ = reader.get_value();

        atom.set_in(&path!["n"], 1);
        let snapshot = atom.get();
        atom.set(snapshot);
        assert_eq!(atom.version(), 0);
        assert_eq!(reader.status(), Status::Clean);
        assert_eq!(runs.get(), 1);

        atom.set_in(&path!["n"], 2);
        assert_eq!(atom.version(), 1);
    }

    #[test]
    fn set_in_creates_missing_intermediates() {
        let atom = Atom::default();
        atom.set_in(&path!["a", 1usize, "b"], "x");
        assert_eq!(atom.get(), Value::from(json!({"a": [null, {"b": "x"}]})));
    }

    #[test]
    fn huge_index_writes_store_without_padding() {
        let atom = Atom::new(json!({"list": [1, 2]}));
        atom.set_in(&path!["list", usize::MAX], 3);
        assert_eq!(atom.get_in(&path!["list", usize::MAX]), Some(Value::from(3)));

        atom.reduce_in(&path!["list", "99999999999"], |_| Value::from(4));
        assert_eq!(atom.get_in(&path!["list", "99999999999"]), Some(Value::from(4)));
        assert_eq!(atom.get_in(&path!["list", 0usize]), Some(Value::from(1)));
        assert_eq!(atom.version(), 2);
    }

    #[test]
    fn reduce_and_pointer_helpers() {
        let atom = Atom::new(json!({"count": 1}));
        atom.reduce_in(&path!["count"], |v| {
            Value::from(v.and_then(|v| v.as_f64()).unwrap_or(0.0) + 1.0)
        });
        assert_eq!(atom.get_in(&path!["count"]), Some(Value::from(2)));

        let count = atom.pointer_at(&path!["count"]);
        atom.set_by_pointer(&count, 10);
        assert_eq!(atom.get_by_pointer(&count), Some(Value::from(10)));

        atom.reduce(|_| Value::from(json!({"fresh": true})));
        assert_eq!(atom.get_by_pointer(&count), None);
        assert_eq!(atom.version(), 3);
    }

    #[test]
    fn reading_atom_inside_prism_tracks_the_root() {
        let atom = Atom::new(json!({"n": 1}));
        let source = atom.clone();
        let whole = prism(move || val(&source));
        assert_eq!(whole.get_value(), Ok(Value::from(json!({"n": 1}))));

        atom.set_in(&path!["n"], 2);
        assert_eq!(whole.status(), Status::Stale);
        assert_eq!(whole.get_value(), Ok(Value::from(json!({"n": 2}))));
    }

    #[test]
    fn identity_prisms_are_cached_per_path() {
        let atom = Atom::new(json!({"a": 1}));
        let first = atom.identity_prism(&path!["a"]);
        let second = atom.pointer().key("a").to_prism();
        assert_eq!(first.id(), second.id());
        assert!(first.label().ends_with(":/a"));
    }

    #[test]
    fn dropped_readers_unlink_from_identity_prisms() {
        let atom = Atom::new(json!({"a": 1}));
        let p = atom.pointer().key("a");
        {
            let reader = prism({
                let p = p.clone();
                move || val(&p)
            });
            let _ = reader.get_value();
            assert_eq!(p.to_prism().dependent_count(), 1);
        }
        assert_eq!(p.to_prism().dependent_count(), 0);
        atom.set_in(&path!["a"], 2);
        assert_eq!(p.resolve(), Some(Value::from(2)));
    }
}
