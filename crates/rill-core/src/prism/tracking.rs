#![forbid(unsafe_code)]

//! Dependency discovery during prism evaluation.
//!
//! While a prism computes, every prism or pointer it reads through [`val`] is
//! recorded in a per-thread frame. Frames nest: a prism read from inside
//! another prism's compute function gets its own frame while it computes.
//! [`untracked`] pushes an opaque frame so reads inside it are not recorded
//! by the enclosing prism.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashSet;

use super::node::{Node, NodeId};
use crate::error::Result;
use crate::pointer::Pointer;

#[derive(Default)]
struct Frame {
    dependencies: Vec<Rc<dyn Node>>,
    seen: FxHashSet<NodeId>,
}

thread_local! {
    /// `None` frames come from [`untracked`].
    static FRAMES: RefCell<Vec<Option<Frame>>> = const { RefCell::new(Vec::new()) };
}

/// Record `node` as a dependency of the innermost computing prism.
pub(crate) fn record(node: &Rc<dyn Node>) {
    FRAMES.with_borrow_mut(|frames| {
        if let Some(Some(frame)) = frames.last_mut()
            && frame.seen.insert(node.core().id)
        {
            frame.dependencies.push(Rc::clone(node));
        }
    });
}

/// A tracking frame for one compute run. Dropping it without
/// [`finish`](TrackingScope::finish) (a panicking compute) still pops it.
pub(crate) struct TrackingScope {
    finished: bool,
}

impl TrackingScope {
    pub(crate) fn begin() -> Self {
        FRAMES.with_borrow_mut(|frames| frames.push(Some(Frame::default())));
        Self { finished: false }
    }

    /// Pop the frame and return the dependencies in first-read order.
    pub(crate) fn finish(mut self) -> Vec<Rc<dyn Node>> {
        self.finished = true;
        FRAMES
            .with_borrow_mut(Vec::pop)
            .flatten()
            .map(|frame| frame.dependencies)
            .unwrap_or_default()
    }
}

impl Drop for TrackingScope {
    fn drop(&mut self) {
        if !self.finished {
            FRAMES.with_borrow_mut(|frames| {
                frames.pop();
            });
        }
    }
}

/// Run `f` without recording its reads as dependencies of the enclosing
/// prism.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    struct Pop;
    impl Drop for Pop {
        fn drop(&mut self) {
            FRAMES.with_borrow_mut(|frames| {
                frames.pop();
            });
        }
    }

    FRAMES.with_borrow_mut(|frames| frames.push(None));
    let _pop = Pop;
    f()
}

/// Whether the caller is running inside a prism's compute function (and not
/// inside [`untracked`]).
#[must_use]
pub fn in_prism() -> bool {
    FRAMES.with_borrow(|frames| matches!(frames.last(), Some(Some(_))))
}

// ---------------------------------------------------------------------------
// Generic read
// ---------------------------------------------------------------------------

/// Anything that can be read through [`val`].
pub trait Readable {
    type Output;

    /// Current value; records a dependency when called inside a prism.
    fn read(&self) -> Result<Self::Output>;

    /// Capability probe used by [`is_pointer`](crate::pointer::is_pointer).
    fn as_pointer(&self) -> Option<&Pointer> {
        None
    }
}

/// Read a pointer, prism, slot or atom, tracking the read when inside a prism.
pub fn val<R: Readable + ?Sized>(source: &R) -> Result<R::Output> {
    source.read()
}
