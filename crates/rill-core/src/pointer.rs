#![forbid(unsafe_code)]

//! Path pointers: inert addresses into a root's value.
//!
//! # Design
//!
//! A [`Pointer`] is a small handle: the root it addresses plus a
//! [`PointerId`] issued by that root's [`PointerArena`]. The arena stores the
//! path of every id it has issued and caches child ids per
//! `(parent, segment)`, so building the same path twice yields the same id
//! and therefore the same dependency-graph node. Metadata lives in the arena,
//! never on the handle.
//!
//! Reading a pointer inside a prism goes through the root's identity prism
//! for that path, which records the dependency. Outside a prism the value is
//! resolved directly.
//!
//! # Invariants
//!
//! 1. `p.child(s) == p.child(s)` for the lifetime of the root.
//! 2. `root.at(a).at(b) == root.at(a ++ b)`.
//! 3. Building a pointer never reads the addressed value.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;
use crate::prism::{Prism, Readable, in_prism};
use crate::value::{PathSegment, Value, display_path};

static NEXT_ROOT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a pointer root (an atom or a pointer proxy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RootId(u64);

impl RootId {
    pub(crate) fn next() -> Self {
        Self(NEXT_ROOT_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Arena index of a pointer within its root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PointerId(usize);

impl PointerId {
    /// The root pointer (empty path).
    pub const ROOT: Self = Self(0);
}

// ---------------------------------------------------------------------------
// Root traits
// ---------------------------------------------------------------------------

/// Source of the prisms that back pointer reads.
pub trait IdentityPrismProvider {
    /// Prism whose value is whatever lives at `path` right now (`None` when
    /// absent). Repeated calls with the same path return the same prism.
    fn identity_prism(&self, path: &[PathSegment]) -> Prism<Option<Value>>;
}

/// Anything a pointer can be rooted at.
pub trait PointerRoot: IdentityPrismProvider {
    fn root_id(&self) -> RootId;

    fn arena(&self) -> &PointerArena;

    /// Current value at `path`, without dependency tracking.
    fn resolve(&self, path: &[PathSegment]) -> Option<Value>;

    /// Name used in `Debug` output and prism labels.
    fn describe(&self) -> String {
        format!("root#{}", self.root_id().raw())
    }
}

// ---------------------------------------------------------------------------
// Arena
// ---------------------------------------------------------------------------

struct PointerMeta {
    path: Rc<[PathSegment]>,
    children: BTreeMap<PathSegment, PointerId>,
}

/// Side table mapping pointer ids to paths. Lives as long as its root.
pub struct PointerArena {
    nodes: RefCell<Vec<PointerMeta>>,
}

impl Default for PointerArena {
    fn default() -> Self {
        Self::new()
    }
}

impl PointerArena {
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: RefCell::new(vec![PointerMeta {
                path: Rc::from(Vec::new()),
                children: BTreeMap::new(),
            }]),
        }
    }

    /// Id for `parent` extended by `segment`, minted on first use.
    pub fn child(&self, parent: PointerId, segment: &PathSegment) -> PointerId {
        let mut nodes = self.nodes.borrow_mut();
        let index = parent.0;
        if let Some(existing) = nodes[index].children.get(segment) {
            return *existing;
        }

        let id = PointerId(nodes.len());
        let mut path = nodes[index].path.to_vec();
        path.push(segment.clone());
        nodes[index].children.insert(segment.clone(), id);
        nodes.push(PointerMeta {
            path: Rc::from(path),
            children: BTreeMap::new(),
        });
        id
    }

    /// Id for `path` relative to `from`.
    pub fn descend(&self, from: PointerId, path: &[PathSegment]) -> PointerId {
        path.iter().fold(from, |id, segment| self.child(id, segment))
    }

    #[must_use]
    pub fn path(&self, id: PointerId) -> Rc<[PathSegment]> {
        Rc::clone(&self.nodes.borrow()[id.0].path)
    }

    /// Ids already minted directly below `id`.
    #[must_use]
    pub fn children(&self, id: PointerId) -> Vec<(PathSegment, PointerId)> {
        self.nodes.borrow()[id.0]
            .children
            .iter()
            .map(|(segment, child)| (segment.clone(), *child))
            .collect()
    }

    /// Number of ids issued, root included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.borrow().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Pointer
// ---------------------------------------------------------------------------

/// An address `(root, path)` into a root's value.
///
/// Equality and hashing use identity: two pointers are equal iff they come
/// from the same root and the same arena slot.
#[derive(Clone)]
pub struct Pointer {
    root: Rc<dyn PointerRoot>,
    id: PointerId,
}

/// The raw addressing info of a pointer.
#[derive(Clone)]
pub struct PointerParts {
    pub root: Rc<dyn PointerRoot>,
    pub path: Rc<[PathSegment]>,
}

impl fmt::Debug for PointerParts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PointerParts")
            .field("root", &self.root.describe())
            .field("path", &self.path)
            .finish()
    }
}

/// Pointer for `path` under `root`, reusing cached ids.
pub fn pointer(root: Rc<dyn PointerRoot>, path: &[PathSegment]) -> Pointer {
    let id = root.arena().descend(PointerId::ROOT, path);
    Pointer { root, id }
}

#[must_use]
pub fn pointer_parts(pointer: &Pointer) -> PointerParts {
    PointerParts {
        root: Rc::clone(&pointer.root),
        path: pointer.path(),
    }
}

/// Capability test: whether `source` is a pointer.
pub fn is_pointer<R: Readable + ?Sized>(source: &R) -> bool {
    source.as_pointer().is_some()
}

impl Pointer {
    pub(crate) fn at_root(root: Rc<dyn PointerRoot>) -> Self {
        Self {
            root,
            id: PointerId::ROOT,
        }
    }

    /// Child pointer for one more segment.
    #[must_use]
    pub fn child(&self, segment: impl Into<PathSegment>) -> Self {
        let id = self.root.arena().child(self.id, &segment.into());
        Self {
            root: Rc::clone(&self.root),
            id,
        }
    }

    #[must_use]
    pub fn key(&self, key: &str) -> Self {
        self.child(key)
    }

    #[must_use]
    pub fn index(&self, index: usize) -> Self {
        self.child(index)
    }

    /// Descendant pointer for a relative path.
    #[must_use]
    pub fn at(&self, path: &[PathSegment]) -> Self {
        let id = self.root.arena().descend(self.id, path);
        Self {
            root: Rc::clone(&self.root),
            id,
        }
    }

    #[must_use]
    pub fn id(&self) -> PointerId {
        self.id
    }

    #[must_use]
    pub fn root_id(&self) -> RootId {
        self.root.root_id()
    }

    #[must_use]
    pub fn path(&self) -> Rc<[PathSegment]> {
        self.root.arena().path(self.id)
    }

    /// Current value, untracked. `None` when the path does not exist.
    #[must_use]
    pub fn resolve(&self) -> Option<Value> {
        self.root.resolve(&self.path())
    }

    /// The identity prism backing reads of this pointer.
    #[must_use]
    pub fn to_prism(&self) -> Prism<Option<Value>> {
        self.root.identity_prism(&self.path())
    }
}

impl PartialEq for Pointer {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.root.root_id() == other.root.root_id()
    }
}

impl Eq for Pointer {}

impl Hash for Pointer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.root.root_id().hash(state);
        self.id.hash(state);
    }
}

impl fmt::Debug for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pointer({}:{})", self.root.describe(), display_path(&self.path()))
    }
}

impl Readable for Pointer {
    type Output = Option<Value>;

    fn read(&self) -> Result<Option<Value>> {
        if in_prism() {
            self.to_prism().get_value()
        } else {
            Ok(self.resolve())
        }
    }

    fn as_pointer(&self) -> Option<&Pointer> {
        Some(self)
    }
}
