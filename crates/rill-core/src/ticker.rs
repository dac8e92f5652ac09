#![forbid(unsafe_code)]

//! Tick scheduler: batches push-mode recomputation.
//!
//! # Design
//!
//! A [`Ticker`] owns a queue of hot prisms that were invalidated since the
//! last flush. Mutations only enqueue; nothing recomputes until the driver
//! calls [`Ticker::tick`]. One flush:
//!
//! 1. Runs settle passes: each pass drains the queue and refreshes every
//!    queued prism in order. Prisms scheduled during a pass are handled by
//!    the next pass.
//! 2. Fires change callbacks of every refreshed prism whose value actually
//!    changed, once all passes are done.
//! 3. Runs the tick callbacks (`on_next_tick` ones first). If callbacks
//!    mutated state, the flush goes back to step 1.
//!
//! The total number of settle passes per tick, and the number of rounds
//! through steps 1 to 3, are each bounded by [`TickerConfig::max_passes`];
//! exceeding either fails with [`Error::RunawayFlush`].
//!
//! # Failure Modes
//!
//! - **Compute error during a pass**: the flush stops and returns the error.
//!   The failing prism and the rest of its batch stay queued for the next
//!   tick; pending notifications and callbacks are kept too.
//! - **`tick` called from a callback of the same ticker**: fails with
//!   [`Error::ReentrantTick`] without touching the queue.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::env;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use rustc_hash::FxHashSet;
use tracing::{debug_span, field, trace, warn};

use crate::error::{Error, Result};
use crate::prism::{Node, NodeId};

/// Environment variable overriding [`TickerConfig::max_passes`].
pub const MAX_PASSES_ENV: &str = "RILL_TICKER_MAX_PASSES";

static NEXT_TICKER_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_CALLBACK_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TickerId(u64);

/// Handle for cancelling a tick callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TickCallbackId(u64);

impl TickCallbackId {
    fn next() -> Self {
        Self(NEXT_CALLBACK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Ticker settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickerConfig {
    /// Upper bound on settle passes in one tick. Never below 1.
    pub max_passes: usize,
    /// Name used in logs and errors.
    pub label: Option<String>,
}

impl Default for TickerConfig {
    fn default() -> Self {
        Self {
            max_passes: 10,
            label: None,
        }
    }
}

impl TickerConfig {
    /// Defaults, overridden by `RILL_TICKER_MAX_PASSES` when set and valid.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Defaults, overridden by whatever `lookup` returns for the
    /// environment keys.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(val) = lookup(MAX_PASSES_ENV)
            && let Ok(n) = val.trim().parse::<usize>()
        {
            config = config.with_max_passes(n);
        }
        config
    }

    #[must_use]
    pub fn with_max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes.max(1);
        self
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// What one call to [`Ticker::tick`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// 1-based tick counter.
    pub tick: u64,
    pub passes: usize,
    /// Queued prisms refreshed (a refresh may verify without recomputing).
    pub refreshed: usize,
    /// Prisms whose change callbacks fired.
    pub notified: usize,
    /// Tick callbacks run.
    pub callbacks: usize,
}

// ---------------------------------------------------------------------------
// Ticker
// ---------------------------------------------------------------------------

type TickCallback = (TickCallbackId, Box<dyn FnOnce(f64)>);

pub(crate) struct TickerInner {
    id: TickerId,
    label: String,
    max_passes: usize,
    queue: RefCell<VecDeque<Rc<dyn Node>>>,
    queued: RefCell<FxHashSet<NodeId>>,
    /// Refreshed since the last notification round.
    touched: RefCell<Vec<Rc<dyn Node>>>,
    this_or_next: RefCell<Vec<TickCallback>>,
    next: RefCell<Vec<TickCallback>>,
    time: Cell<f64>,
    ticks: Cell<u64>,
    flushing: Cell<bool>,
}

struct FlushGuard<'a>(&'a Cell<bool>);

impl<'a> FlushGuard<'a> {
    fn new(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self(flag)
    }
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Explicit scheduler for hot prisms. The application owns the drive loop.
///
/// Cloning a `Ticker` yields another handle to the same queue.
#[derive(Clone)]
pub struct Ticker {
    inner: Rc<TickerInner>,
}

impl Default for Ticker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticker")
            .field("label", &self.inner.label)
            .field("pending", &self.pending())
            .field("ticks", &self.inner.ticks.get())
            .field("time", &self.inner.time.get())
            .finish()
    }
}

impl Ticker {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(TickerConfig::default())
    }

    #[must_use]
    pub fn with_config(config: TickerConfig) -> Self {
        let id = TickerId(NEXT_TICKER_ID.fetch_add(1, Ordering::Relaxed));
        let label = config
            .label
            .unwrap_or_else(|| format!("ticker#{}", id.0));
        Self {
            inner: Rc::new(TickerInner {
                id,
                label,
                max_passes: config.max_passes.max(1),
                queue: RefCell::new(VecDeque::new()),
                queued: RefCell::new(FxHashSet::default()),
                touched: RefCell::new(Vec::new()),
                this_or_next: RefCell::new(Vec::new()),
                next: RefCell::new(Vec::new()),
                time: Cell::new(0.0),
                ticks: Cell::new(0),
                flushing: Cell::new(false),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> TickerId {
        self.inner.id
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Time passed to the latest `tick`.
    #[must_use]
    pub fn time(&self) -> f64 {
        self.inner.time.get()
    }

    /// Number of `tick` calls so far.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.inner.ticks.get()
    }

    /// Prisms waiting for the next flush.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.queue.borrow().len()
    }

    #[must_use]
    pub fn is_flushing(&self) -> bool {
        self.inner.flushing.get()
    }

    pub(crate) fn downgrade(&self) -> Weak<TickerInner> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<TickerInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// Queue a hot prism for the next settle pass. Idempotent per pass.
    pub(crate) fn schedule(&self, node: Rc<dyn Node>) {
        if self.inner.queued.borrow_mut().insert(node.core().id) {
            trace!(ticker = %self.inner.label, prism = %node.core().label(), "scheduled");
            self.inner.queue.borrow_mut().push_back(node);
        }
    }

    /// Run `callback` during the current flush if one is in progress,
    /// otherwise during the next tick.
    pub fn on_this_or_next_tick(&self, callback: impl FnOnce(f64) + 'static) -> TickCallbackId {
        let id = TickCallbackId::next();
        self.inner
            .this_or_next
            .borrow_mut()
            .push((id, Box::new(callback)));
        id
    }

    /// Run `callback` during the next tick, even if called mid-flush.
    pub fn on_next_tick(&self, callback: impl FnOnce(f64) + 'static) -> TickCallbackId {
        let id = TickCallbackId::next();
        self.inner.next.borrow_mut().push((id, Box::new(callback)));
        id
    }

    /// Cancel a callback registered with [`on_this_or_next_tick`](Self::on_this_or_next_tick).
    /// Returns whether it was still pending.
    pub fn off_this_or_next_tick(&self, id: TickCallbackId) -> bool {
        remove_callback(&self.inner.this_or_next, id)
    }

    /// Cancel a callback registered with [`on_next_tick`](Self::on_next_tick).
    pub fn off_next_tick(&self, id: TickCallbackId) -> bool {
        remove_callback(&self.inner.next, id)
    }

    /// Flush: settle every queued prism, then notify, then run tick
    /// callbacks. `time` is handed to the callbacks.
    pub fn tick(&self, time: f64) -> Result<TickReport> {
        let inner = &self.inner;
        if inner.flushing.get() {
            return Err(Error::ReentrantTick {
                label: inner.label.clone(),
            });
        }
        let _flushing = FlushGuard::new(&inner.flushing);

        let tick = inner.ticks.get() + 1;
        inner.ticks.set(tick);
        inner.time.set(time);

        let span = debug_span!(
            "rill.tick",
            ticker = %inner.label,
            tick,
            passes = field::Empty,
            refreshed = field::Empty,
            notified = field::Empty,
        );
        let _enter = span.enter();

        // Callbacks deferred to this tick run ahead of the ones registered
        // for "this or next".
        let mut due = inner.next.take();
        due.append(&mut inner.this_or_next.borrow_mut());
        *inner.this_or_next.borrow_mut() = due;

        let mut report = TickReport {
            tick,
            ..TickReport::default()
        };
        let mut rounds = 0;
        loop {
            rounds += 1;
            if rounds > inner.max_passes {
                return Err(self.runaway(report.passes));
            }
            self.settle(&mut report)?;
            self.notify(&mut report);

            let callbacks = inner.this_or_next.take();
            for (_, callback) in callbacks {
                callback(time);
                report.callbacks += 1;
            }

            if inner.queue.borrow().is_empty() && inner.this_or_next.borrow().is_empty() {
                break;
            }
        }

        span.record("passes", report.passes);
        span.record("refreshed", report.refreshed);
        span.record("notified", report.notified);
        Ok(report)
    }

    fn settle(&self, report: &mut TickReport) -> Result<()> {
        let inner = &self.inner;
        while !inner.queue.borrow().is_empty() {
            if report.passes >= inner.max_passes {
                return Err(self.runaway(report.passes));
            }
            report.passes += 1;

            let batch: Vec<Rc<dyn Node>> = inner.queue.borrow_mut().drain(..).collect();
            inner.queued.borrow_mut().clear();

            for (index, node) in batch.iter().enumerate() {
                // Unsubscribed since it was queued.
                if !node.is_hot() {
                    continue;
                }
                if let Err(err) = node.refresh() {
                    for rest in &batch[index..] {
                        self.schedule(Rc::clone(rest));
                    }
                    return Err(err);
                }
                report.refreshed += 1;
                inner.touched.borrow_mut().push(Rc::clone(node));
            }
        }
        Ok(())
    }

    fn runaway(&self, passes: usize) -> Error {
        let labels: Vec<String> = self
            .inner
            .queue
            .borrow()
            .iter()
            .map(|node| node.core().label())
            .collect();
        warn!(
            ticker = %self.inner.label,
            passes,
            pending = ?labels,
            "tick flush did not settle"
        );
        Error::RunawayFlush { passes, labels }
    }

    fn notify(&self, report: &mut TickReport) {
        let touched = self.inner.touched.take();
        let mut seen = FxHashSet::default();
        for node in touched {
            if seen.insert(node.core().id) && node.notify(self.inner.id) {
                report.notified += 1;
            }
        }
    }
}

fn remove_callback(list: &RefCell<Vec<TickCallback>>, id: TickCallbackId) -> bool {
    let mut list = list.borrow_mut();
    let before = list.len();
    list.retain(|(existing, _)| *existing != id);
    list.len() != before
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
