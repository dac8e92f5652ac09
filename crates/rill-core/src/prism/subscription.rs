#![forbid(unsafe_code)]

//! RAII handle for a prism's change subscription.

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::node::Node;

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    pub(crate) fn next() -> Self {
        Self(NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Keeps a prism hot while alive.
///
/// The guard owns the prism, so `prism(..).on_change(..)` keeps working
/// after the `Prism` handle itself is dropped. Dropping the guard (or
/// calling [`unsubscribe`](Subscription::unsubscribe)) removes the
/// subscriber. When the last subscriber goes, the prism drops back to lazy
/// mode: it is no longer queued on tick flushes but stays valid to read.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    node: Rc<dyn Node>,
    id: SubscriberId,
}

impl Subscription {
    pub(crate) fn new(node: Rc<dyn Node>, id: SubscriberId) -> Self {
        Self { node, id }
    }

    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Whether the prism is still hot, from this or any other subscriber.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.node.is_hot()
    }

    /// Unsubscribe now. Equivalent to dropping the guard.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.node.remove_subscriber(self.id);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
