#![forbid(unsafe_code)]

//! Pointer indirection: a stable root whose target can be swapped.
//!
//! # Design
//!
//! A [`PointerProxy`] keeps its current target pointer in a [`Slot`] and
//! acts as a pointer root of its own. Reading `proxy.pointer().key("x")`
//! inside a prism goes through the proxy's identity prism for `["x"]`,
//! which reads the slot (a dependency) and then the target's own pointer
//! at `x` (another dependency). Re-targeting only writes the slot, so
//! exactly the identity prisms this proxy handed out are invalidated and
//! existing readers follow the new target without re-subscribing.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::pointer::{IdentityPrismProvider, Pointer, PointerArena, PointerId, PointerRoot, RootId};
use crate::prism::{Prism, val};
use crate::slot::Slot;
use crate::value::{PathSegment, Value, display_path};

struct ProxyInner {
    root_id: RootId,
    current: Slot<Pointer>,
    arena: PointerArena,
    identity: RefCell<FxHashMap<PointerId, Prism<Option<Value>>>>,
}

impl IdentityPrismProvider for ProxyInner {
    fn identity_prism(&self, path: &[PathSegment]) -> Prism<Option<Value>> {
        let id = self.arena.descend(PointerId::ROOT, path);
        if let Some(existing) = self.identity.borrow().get(&id) {
            return existing.clone();
        }

        let path = self.arena.path(id);
        let label = format!("{}:{}", self.describe(), display_path(&path));
        let current = self.current.clone();
        let prism = Prism::with_equality(
            move || {
                let target = val(&current)?;
                val(&target.at(&path))
            },
            |a: &Option<Value>, b: &Option<Value>| Value::same_opt(a.as_ref(), b.as_ref()),
        )
        .with_label(label);
        self.identity.borrow_mut().insert(id, prism.clone());
        prism
    }
}

impl PointerRoot for ProxyInner {
    fn root_id(&self) -> RootId {
        self.root_id
    }

    fn arena(&self) -> &PointerArena {
        &self.arena
    }

    fn resolve(&self, path: &[PathSegment]) -> Option<Value> {
        self.current.get().at(path).resolve()
    }

    fn describe(&self) -> String {
        format!("proxy#{}", self.root_id.raw())
    }
}

/// A pointer root that forwards to a replaceable target pointer.
#[derive(Clone)]
pub struct PointerProxy {
    inner: Rc<ProxyInner>,
}

impl fmt::Debug for PointerProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PointerProxy")
            .field("id", &self.inner.root_id)
            .field("target", &self.inner.current.get())
            .finish()
    }
}

impl PointerProxy {
    pub fn new(target: Pointer) -> Self {
        Self {
            inner: Rc::new(ProxyInner {
                root_id: RootId::next(),
                current: Slot::new(target),
                arena: PointerArena::new(),
                identity: RefCell::new(FxHashMap::default()),
            }),
        }
    }

    /// Re-aim the proxy. Readers of its pointers follow on their next
    /// refresh.
    pub fn set_pointer(&self, target: Pointer) {
        debug!(proxy = %self.inner.describe(), ?target, "retarget");
        self.inner.current.set(target);
    }

    /// The current target.
    #[must_use]
    pub fn target(&self) -> Pointer {
        self.inner.current.get()
    }

    /// The stable pointer rooted at this proxy.
    #[must_use]
    pub fn pointer(&self) -> Pointer {
        let root: Rc<dyn PointerRoot> = self.inner.clone();
        Pointer::at_root(root)
    }
}

impl IdentityPrismProvider for PointerProxy {
    fn identity_prism(&self, path: &[PathSegment]) -> Prism<Option<Value>> {
        self.inner.identity_prism(path)
    }
}
