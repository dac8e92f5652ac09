#![forbid(unsafe_code)]

//! Prisms: memoized derivations that track what they read.
//!
//! # Design
//!
//! [`Prism<T>`] wraps a compute function and its cached result in shared,
//! reference-counted storage. Every pointer or prism the function reads
//! through [`val`] during a run becomes a dependency for that run only, so
//! conditional reads are supported and the dependency set is rebuilt each
//! time.
//!
//! A prism without subscribers is *lazy*: invalidation only flags it, and it
//! recomputes on the next [`get_value`](Prism::get_value). A prism with at
//! least one [`on_change`](Prism::on_change) subscriber is *hot*:
//! invalidation also queues it on the subscriber's [`Ticker`], and the next
//! tick recomputes it and fires the callback if the value changed.
//!
//! # Invariants
//!
//! 1. `get_value()` never returns a value computed before the latest
//!    completed mutation of anything the prism read.
//! 2. A recompute that yields a value equal to the cached one (per the
//!    prism's equality rule) leaves the cached value and `changed_at` alone,
//!    so dependents verify clean without recomputing.
//! 3. A prism reading itself, directly or through other prisms, fails with
//!    [`Error::Cycle`] instead of recursing.
//! 4. `version()` increments by exactly 1 per compute run.
//!
//! # Failure Modes
//!
//! - **Compute function returns `Err`**: the error reaches the caller, the
//!   last good value stays cached, and the prism stays stale so the next read
//!   retries.
//! - **Compute function panics**: same as above; the tracking frame is popped
//!   during unwinding.

mod node;
mod subscription;
mod tracking;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use rustc_hash::FxHashSet;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::ticker::{Ticker, TickerId, TickerInner};

pub use node::NodeId;
pub(crate) use node::{Node, invalidate};
pub use subscription::{SubscriberId, Subscription};
pub use tracking::{Readable, in_prism, untracked, val};

use node::{NodeCore, NodeState, bump_revision, current_revision};
use tracking::TrackingScope;

/// Externally visible state of a prism.
///
/// Invalidation is pushed eagerly and verified lazily: a prism whose
/// upstream *might* have changed reports `Stale` until the next read or
/// tick checks it. If every upstream prism cut off (recomputed to an equal
/// value), that check flips it back to `Clean` without running its compute
/// function, so [`Prism::version`] is the way to observe that a cutoff held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The cached value is current.
    Clean,
    /// Something upstream changed or may have changed; the next read
    /// refreshes, recomputing only if a dependency's value actually changed.
    Stale,
    /// The compute function is running.
    Computing,
}

struct Subscriber<T> {
    id: SubscriberId,
    ticker_id: TickerId,
    ticker: Weak<TickerInner>,
    /// `changed_at` of the last value this subscriber saw.
    seen_at: Cell<u64>,
    callback: Option<Rc<dyn Fn(&T)>>,
}

struct PrismInner<T> {
    core: NodeCore,
    this: Weak<PrismInner<T>>,
    compute: Box<dyn Fn() -> Result<T>>,
    equals: Box<dyn Fn(&T, &T) -> bool>,
    cached: RefCell<Option<T>>,
    runs: Cell<u64>,
    subscribers: RefCell<Vec<Subscriber<T>>>,
}

/// Resets a prism to `Stale` if its compute function unwinds.
struct ComputeGuard<'a> {
    core: &'a NodeCore,
    armed: bool,
}

impl ComputeGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ComputeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.core.state.set(NodeState::Stale);
        }
    }
}

impl<T: Clone + 'static> PrismInner<T> {
    fn weak_node(&self) -> Weak<dyn Node> {
        self.this.clone()
    }

    fn reschedule(&self) {
        if let Some(this) = self.this.upgrade() {
            let node: Rc<dyn Node> = this;
            for ticker in node.tickers() {
                ticker.schedule(Rc::clone(&node));
            }
        }
    }

    fn recompute(&self) -> Result<()> {
        let core = &self.core;
        core.state.set(NodeState::Computing);
        core.invalidated_while_computing.set(false);

        let guard = ComputeGuard { core, armed: true };
        let scope = TrackingScope::begin();
        let result = (self.compute)();
        let read = scope.finish();
        guard.disarm();
        self.runs.set(self.runs.get() + 1);

        // Prisms still computing are our own callers; an edge to them would
        // close a reference cycle. A compute that caught the resulting cycle
        // error does not depend on them either.
        let read: Vec<Rc<dyn Node>> = read
            .into_iter()
            .filter(|d| d.core().state.get() != NodeState::Computing)
            .collect();
        let settled_inputs = read
            .iter()
            .all(|d| d.core().state.get() == NodeState::Clean);

        match result {
            Ok(value) => {
                core.rewire(&self.weak_node(), read);
                let changed = self
                    .cached
                    .borrow()
                    .as_ref()
                    .is_none_or(|previous| !(self.equals)(previous, &value));
                if changed {
                    *self.cached.borrow_mut() = Some(value);
                    core.changed_at.set(bump_revision());
                }
                core.verified_at.set(current_revision());

                let settled = settled_inputs && !core.invalidated_while_computing.replace(false);
                if settled {
                    core.state.set(NodeState::Clean);
                } else {
                    core.state.set(NodeState::Stale);
                    self.reschedule();
                }
                trace!(prism = %core.label(), changed, settled, "prism recomputed");
                Ok(())
            }
            Err(err) => {
                let merged = node::union(core.dependencies(), read);
                core.rewire(&self.weak_node(), merged);
                core.state.set(NodeState::Stale);
                trace!(prism = %core.label(), error = %err, "prism compute failed");
                Err(err)
            }
        }
    }
}

impl<T: Clone + 'static> Node for PrismInner<T> {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn refresh(&self) -> Result<()> {
        match self.core.state.get() {
            NodeState::Clean => Ok(()),
            NodeState::Computing => {
                let label = self.core.label();
                debug!(prism = %label, "cycle detected");
                Err(Error::Cycle { label })
            }
            NodeState::Stale => self.recompute(),
            NodeState::MaybeStale => {
                let verified_at = self.core.verified_at.get();
                for dep in self.core.dependencies() {
                    dep.refresh()?;
                    if dep.core().changed_at.get() > verified_at {
                        return self.recompute();
                    }
                }
                self.core.state.set(NodeState::Clean);
                self.core.verified_at.set(current_revision());
                Ok(())
            }
        }
    }

    fn is_hot(&self) -> bool {
        !self.subscribers.borrow().is_empty()
    }

    fn tickers(&self) -> Vec<Ticker> {
        let mut seen = FxHashSet::default();
        self.subscribers
            .borrow()
            .iter()
            .filter(|s| seen.insert(s.ticker_id))
            .filter_map(|s| Ticker::upgrade(&s.ticker))
            .collect()
    }

    fn notify(&self, ticker: TickerId) -> bool {
        let changed_at = self.core.changed_at.get();
        let due: Vec<Rc<dyn Fn(&T)>> = self
            .subscribers
            .borrow()
            .iter()
            .filter(|s| s.ticker_id == ticker && s.seen_at.get() != changed_at)
            .filter_map(|s| {
                s.seen_at.set(changed_at);
                s.callback.clone()
            })
            .collect();
        if due.is_empty() {
            return false;
        }
        let Some(value) = self.cached.borrow().clone() else {
            return false;
        };
        for callback in due {
            callback(&value);
        }
        true
    }

    fn remove_subscriber(&self, id: SubscriberId) {
        self.subscribers.borrow_mut().retain(|s| s.id != id);
    }
}

// ---------------------------------------------------------------------------
// Prism
// ---------------------------------------------------------------------------

/// A memoized derivation over pointers and other prisms.
///
/// Cloning a `Prism` creates a new handle to the **same** node; both handles
/// are the same dependency in the graph.
pub struct Prism<T> {
    inner: Rc<PrismInner<T>>,
}

impl<T> Clone for Prism<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Prism<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prism")
            .field("label", &self.inner.core.label())
            .field("state", &self.inner.core.state.get())
            .field("cached", &self.inner.cached.borrow())
            .field("version", &self.inner.runs.get())
            .finish()
    }
}

/// Build a prism whose cutoff rule is `PartialEq`.
pub fn prism<T: Clone + PartialEq + 'static>(
    compute: impl Fn() -> Result<T> + 'static,
) -> Prism<T> {
    Prism::new(compute)
}

impl<T: Clone + PartialEq + 'static> Prism<T> {
    /// Create a lazy prism. Nothing runs until the first read.
    pub fn new(compute: impl Fn() -> Result<T> + 'static) -> Self {
        Self::with_equality(compute, |a: &T, b: &T| a == b)
    }

    /// Derive a prism from this one.
    pub fn map<U: Clone + PartialEq + 'static>(&self, f: impl Fn(T) -> U + 'static) -> Prism<U> {
        let source = self.clone();
        Prism::new(move || source.get_value().map(&f))
    }
}

impl<T: Clone + 'static> Prism<T> {
    /// Create a lazy prism with a custom cutoff rule. `equals(old, new)`
    /// returning true suppresses downstream invalidation.
    pub fn with_equality(
        compute: impl Fn() -> Result<T> + 'static,
        equals: impl Fn(&T, &T) -> bool + 'static,
    ) -> Self {
        let inner = Rc::new_cyclic(|this| PrismInner {
            core: NodeCore::new(),
            this: this.clone(),
            compute: Box::new(compute),
            equals: Box::new(equals),
            cached: RefCell::new(None),
            runs: Cell::new(0),
            subscribers: RefCell::new(Vec::new()),
        });
        Self { inner }
    }

    /// Name used in logs and errors.
    #[must_use]
    pub fn with_label(self, label: impl AsRef<str>) -> Self {
        self.inner.core.set_label(label.as_ref());
        self
    }

    #[must_use]
    pub fn label(&self) -> String {
        self.inner.core.label()
    }

    #[must_use]
    pub fn id(&self) -> NodeId {
        self.inner.core.id
    }

    pub(crate) fn node(&self) -> Rc<dyn Node> {
        let inner: Rc<PrismInner<T>> = Rc::clone(&self.inner);
        inner
    }

    /// Current value, recomputing first if anything it read has changed.
    ///
    /// Inside another prism's compute function this also records `self` as a
    /// dependency of that prism.
    pub fn get_value(&self) -> Result<T> {
        tracking::record(&self.node());
        self.inner.refresh()?;
        self.inner
            .cached
            .borrow()
            .clone()
            .ok_or_else(|| Error::Unsettled { label: self.label() })
    }

    /// The last cached value, without refreshing or tracking.
    #[must_use]
    pub fn peek(&self) -> Option<T> {
        self.inner.cached.borrow().clone()
    }

    #[must_use]
    pub fn status(&self) -> Status {
        match self.inner.core.state.get() {
            NodeState::Clean => Status::Clean,
            NodeState::MaybeStale | NodeState::Stale => Status::Stale,
            NodeState::Computing => Status::Computing,
        }
    }

    /// Whether the prism has change subscribers.
    #[must_use]
    pub fn is_hot(&self) -> bool {
        self.inner.is_hot()
    }

    /// Number of compute runs so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.runs.get()
    }

    /// Dependencies read during the last run.
    #[must_use]
    pub fn dependency_count(&self) -> usize {
        self.inner.core.dependency_count()
    }

    /// Live prisms that read this one during their last run.
    #[must_use]
    pub fn dependent_count(&self) -> usize {
        self.inner.core.dependent_count()
    }

    /// Force a recompute on the next read (or next tick, if hot).
    pub fn invalidate(&self) {
        invalidate([self.node()]);
    }

    /// Subscribe to value changes, settled by `ticker`.
    ///
    /// The prism is refreshed immediately so `callback` only sees values that
    /// differ from the one current at subscription time. If that refresh
    /// fails, the prism is queued and the error surfaces on the next tick.
    pub fn on_change(&self, ticker: &Ticker, callback: impl Fn(&T) + 'static) -> Subscription {
        self.subscribe(ticker, Some(Rc::new(callback)))
    }

    /// Keep the prism hot on `ticker` without a callback.
    pub fn keep_hot(&self, ticker: &Ticker) -> Subscription {
        self.subscribe(ticker, None)
    }

    fn subscribe(&self, ticker: &Ticker, callback: Option<Rc<dyn Fn(&T)>>) -> Subscription {
        let settled = self.inner.refresh();
        if let Err(err) = &settled {
            debug!(prism = %self.label(), error = %err, "subscribed to a failing prism");
        }

        let id = SubscriberId::next();
        self.inner.subscribers.borrow_mut().push(Subscriber {
            id,
            ticker_id: ticker.id(),
            ticker: ticker.downgrade(),
            seen_at: Cell::new(self.inner.core.changed_at.get()),
            callback,
        });
        if settled.is_err() || self.inner.core.state.get() != NodeState::Clean {
            ticker.schedule(self.node());
        }
        Subscription::new(self.node(), id)
    }
}

impl<T: Clone + 'static> Readable for Prism<T> {
    type Output = T;

    fn read(&self) -> Result<T> {
        self.get_value()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
