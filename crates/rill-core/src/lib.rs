#![forbid(unsafe_code)]

//! Reactive dataflow core.
//!
//! - [`Atom`]: versioned, path-addressable state cell; the only mutation
//!   entry point.
//! - [`Pointer`]: inert `(root, path)` address into an atom or a
//!   [`PointerProxy`]. Child pointers are cached, so building a path twice
//!   yields the same pointer.
//! - [`Prism`]: memoized derivation that tracks every pointer and prism it
//!   reads through [`val`].
//! - [`Ticker`]: explicit scheduler that settles hot prisms once per
//!   `tick()`.
//! - [`PointerProxy`]: stable pointer root whose target can be swapped.
//!
//! # Example
//!
//! ```
//! use rill_core::{Atom, Ticker, path, prism, val};
//! use serde_json::json;
//!
//! let atom = Atom::new(json!({"a": {"b": 1, "c": 2}}));
//! let c = atom.pointer().key("a").key("c");
//! let doubled = prism(move || Ok(val(&c)?.and_then(|v| v.as_f64()).unwrap_or(0.0) * 2.0));
//! assert_eq!(doubled.get_value(), Ok(4.0));
//!
//! let ticker = Ticker::new();
//! let _sub = doubled.on_change(&ticker, |v| println!("doubled = {v}"));
//! atom.set_in(&path!["a", "c"], 5);
//! ticker.tick(0.0)?;
//! assert_eq!(doubled.peek(), Some(10.0));
//! # Ok::<(), rill_core::Error>(())
//! ```
//!
//! Everything here is single-threaded: handles are `!Send` and share state
//! through `Rc`.

pub mod atom;
pub mod error;
pub mod pointer;
pub mod prism;
pub mod proxy;
pub mod slot;
pub mod ticker;
pub mod value;

pub use atom::Atom;
pub use error::{Error, Result};
pub use pointer::{
    IdentityPrismProvider, Pointer, PointerArena, PointerId, PointerParts, PointerRoot, RootId,
    is_pointer, pointer, pointer_parts,
};
pub use prism::{
    NodeId, Prism, Readable, Status, SubscriberId, Subscription, in_prism, prism, untracked, val,
};
pub use proxy::PointerProxy;
pub use slot::Slot;
pub use ticker::{TickCallbackId, TickReport, Ticker, TickerConfig, TickerId};
pub use value::{MAX_LIST_GAP, Path, PathSegment, Value, display_path, paths_related};
