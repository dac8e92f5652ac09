#![forbid(unsafe_code)]

//! Type-erased dependency-graph node shared by every prism.
//!
//! # Design
//!
//! Each prism owns a [`NodeCore`] holding its state, its revision stamps and
//! both edge sets. Dependencies are held strongly (a prism keeps what it reads
//! alive); dependents are held weakly and pruned lazily when they fail to
//! upgrade.
//!
//! Revisions come from a per-thread counter. `changed_at` is the revision at
//! which a node's cached value last actually changed; `verified_at` is the
//! revision at which the node last confirmed it was up to date. A node whose
//! dependencies all have `changed_at <= verified_at` needs no recompute.
//!
//! # Invariants
//!
//! 1. A `Clean` node has only `Clean` dependencies.
//! 2. When a node leaves `Clean`, every transitive dependent leaves `Clean`
//!    in the same invalidation pass.
//! 3. No user code runs during invalidation.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use rustc_hash::FxHashSet;

use super::subscription::SubscriberId;
use crate::error::Result;
use crate::ticker::{Ticker, TickerId};

// ---------------------------------------------------------------------------
// Ids and revisions
// ---------------------------------------------------------------------------

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a prism in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    pub(crate) fn next() -> Self {
        Self(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

thread_local! {
    static REVISION: Cell<u64> = const { Cell::new(0) };
}

pub(crate) fn current_revision() -> u64 {
    REVISION.with(Cell::get)
}

pub(crate) fn bump_revision() -> u64 {
    REVISION.with(|rev| {
        let next = rev.get() + 1;
        rev.set(next);
        next
    })
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeState {
    Clean,
    /// An upstream prism may have changed; verify before recomputing.
    MaybeStale,
    /// A direct source changed; recompute on next refresh.
    Stale,
    Computing,
}

/// Behavior every graph node exposes to the engine.
pub(crate) trait Node {
    fn core(&self) -> &NodeCore;

    /// Bring the cached value up to date.
    fn refresh(&self) -> Result<()>;

    fn is_hot(&self) -> bool;

    /// Tickers of live subscribers, deduplicated.
    fn tickers(&self) -> Vec<Ticker>;

    /// Fire callbacks of `ticker`'s subscribers that have not yet seen the
    /// current value. Returns whether any fired.
    fn notify(&self, ticker: TickerId) -> bool;

    fn remove_subscriber(&self, id: SubscriberId);
}

pub(crate) struct NodeCore {
    pub(crate) id: NodeId,
    label: RefCell<Option<Rc<str>>>,
    pub(crate) state: Cell<NodeState>,
    pub(crate) changed_at: Cell<u64>,
    pub(crate) verified_at: Cell<u64>,
    pub(crate) invalidated_while_computing: Cell<bool>,
    dependencies: RefCell<Vec<Rc<dyn Node>>>,
    dependents: RefCell<BTreeMap<NodeId, Weak<dyn Node>>>,
}

impl NodeCore {
    pub(crate) fn new() -> Self {
        Self {
            id: NodeId::next(),
            label: RefCell::new(None),
            state: Cell::new(NodeState::Stale),
            changed_at: Cell::new(0),
            verified_at: Cell::new(0),
            invalidated_while_computing: Cell::new(false),
            dependencies: RefCell::new(Vec::new()),
            dependents: RefCell::new(BTreeMap::new()),
        }
    }

    pub(crate) fn label(&self) -> String {
        match &*self.label.borrow() {
            Some(label) => label.to_string(),
            None => format!("prism#{}", self.id.raw()),
        }
    }

    pub(crate) fn set_label(&self, label: &str) {
        *self.label.borrow_mut() = Some(Rc::from(label));
    }

    pub(crate) fn dependencies(&self) -> Vec<Rc<dyn Node>> {
        self.dependencies.borrow().clone()
    }

    pub(crate) fn dependency_count(&self) -> usize {
        self.dependencies.borrow().len()
    }

    pub(crate) fn dependent_count(&self) -> usize {
        self.dependents
            .borrow()
            .values()
            .filter(|d| d.strong_count() > 0)
            .count()
    }

    /// Upgrade every dependent, dropping the dead ones.
    fn live_dependents(&self) -> Vec<Rc<dyn Node>> {
        let mut dependents = self.dependents.borrow_mut();
        let mut live = Vec::with_capacity(dependents.len());
        dependents.retain(|_, weak| match weak.upgrade() {
            Some(node) => {
                live.push(node);
                true
            }
            None => false,
        });
        live
    }

    /// Swap in a new dependency list, moving dependent edges to match.
    pub(crate) fn rewire(&self, this: &Weak<dyn Node>, next: Vec<Rc<dyn Node>>) {
        let previous = self.dependencies.replace(Vec::new());
        let kept: FxHashSet<NodeId> = next.iter().map(|d| d.core().id).collect();
        let had: FxHashSet<NodeId> = previous.iter().map(|d| d.core().id).collect();

        for dep in &previous {
            if !kept.contains(&dep.core().id) {
                dep.core().dependents.borrow_mut().remove(&self.id);
            }
        }
        for dep in &next {
            if !had.contains(&dep.core().id) {
                dep.core()
                    .dependents
                    .borrow_mut()
                    .insert(self.id, this.clone());
            }
        }
        *self.dependencies.borrow_mut() = next;
    }
}

/// Merge two dependency lists, keeping first-seen order.
pub(crate) fn union(first: Vec<Rc<dyn Node>>, second: Vec<Rc<dyn Node>>) -> Vec<Rc<dyn Node>> {
    let mut seen = FxHashSet::default();
    first
        .into_iter()
        .chain(second)
        .filter(|d| seen.insert(d.core().id))
        .collect()
}

// ---------------------------------------------------------------------------
// Invalidation
// ---------------------------------------------------------------------------

/// Mark `sources` as needing recompute and every transitive dependent as
/// possibly stale. Hot nodes are queued on their subscribers' tickers.
pub(crate) fn invalidate(sources: impl IntoIterator<Item = Rc<dyn Node>>) {
    let mut work: VecDeque<(Rc<dyn Node>, NodeState)> = sources
        .into_iter()
        .map(|node| (node, NodeState::Stale))
        .collect();

    while let Some((node, level)) = work.pop_front() {
        let core = node.core();
        match core.state.get() {
            NodeState::Clean => core.state.set(level),
            NodeState::MaybeStale => {
                if level == NodeState::Stale {
                    core.state.set(NodeState::Stale);
                }
                continue;
            }
            NodeState::Stale => continue,
            NodeState::Computing => core.invalidated_while_computing.set(true),
        }

        if node.is_hot() {
            for ticker in node.tickers() {
                ticker.schedule(Rc::clone(&node));
            }
        }
        for dependent in core.live_dependents() {
            work.push_back((dependent, NodeState::MaybeStale));
        }
    }
}
