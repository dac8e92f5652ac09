#![forbid(unsafe_code)]

//! A single-value state cell.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use tracing::trace;

use crate::error::Result;
use crate::prism::{Prism, Readable, in_prism, invalidate};

struct SlotInner<T> {
    value: Rc<RefCell<T>>,
    version: Cell<u64>,
    prism: Prism<T>,
}

/// Holds one value of any `Clone + PartialEq` type.
///
/// Unlike an [`Atom`](crate::Atom) there are no paths: readers depend on the
/// whole value. Setting an equal value is a no-op.
pub struct Slot<T> {
    inner: Rc<SlotInner<T>>,
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("value", &*self.inner.value.borrow())
            .field("version", &self.inner.version.get())
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Slot<T> {
    pub fn new(initial: T) -> Self {
        let value = Rc::new(RefCell::new(initial));
        let source = Rc::clone(&value);
        let prism = Prism::new(move || Ok(source.borrow().clone())).with_label("slot");
        Self {
            inner: Rc::new(SlotInner {
                value,
                version: Cell::new(0),
                prism,
            }),
        }
    }

    /// Current value, untracked.
    #[must_use]
    pub fn get(&self) -> T {
        self.inner.value.borrow().clone()
    }

    pub fn set(&self, value: T) {
        if *self.inner.value.borrow() == value {
            return;
        }
        *self.inner.value.borrow_mut() = value;
        self.inner.version.set(self.inner.version.get() + 1);
        trace!(prism = %self.inner.prism.label(), version = self.inner.version.get(), "slot set");
        invalidate([self.inner.prism.node()]);
    }

    pub fn reduce(&self, f: impl FnOnce(T) -> T) {
        self.set(f(self.get()));
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }

    /// Prism tracking this slot's value.
    #[must_use]
    pub fn prism(&self) -> Prism<T> {
        self.inner.prism.clone()
    }
}

impl<T: Clone + PartialEq + 'static> Readable for Slot<T> {
    type Output = T;

    fn read(&self) -> Result<T> {
        if in_prism() {
            self.inner.prism.get_value()
        } else {
            Ok(self.get())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prism::{Status, prism, val};

    #[test]
    fn set_and_get() {
        let slot = Slot::new(1);
        slot.set(2);
        slot.reduce(|n| n * 10);
        assert_eq!(slot.get(), 20);
        assert_eq!(slot.version(), 2);
    }

    #[test]
    fn equal_set_is_a_no_op() {
        let slot = Slot::new("a".to_owned());
        let source = slot.clone();
        let reader = prism(move || val(&source));
        assert_eq!(reader.get_value(), Ok("a".to_owned()));

        slot.set("a".to_owned());
        assert_eq!(slot.version(), 0);
        assert_eq!(reader.status(), Status::Clean);
    }

    #[test]
    fn readers_follow_the_slot() {
        let slot = Slot::new(3);
        let source = slot.clone();
        let squared = prism(move || Ok(val(&source)? * val(&source)?));
        assert_eq!(squared.get_value(), Ok(9));
        assert_eq!(squared.dependency_count(), 1);

        slot.set(4);
        assert_eq!(squared.status(), Status::Stale);
        assert_eq!(squared.get_value(), Ok(16));
        assert_eq!(slot.prism().get_value(), Ok(4));
    }
}
