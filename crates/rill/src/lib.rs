#![forbid(unsafe_code)]

//! rill public facade crate.
//!
//! This crate provides the stable, ergonomic surface area for users.
//!
//! ```
//! use rill::prelude::*;
//!
//! let scene = Atom::new(Value::map());
//! let proxy = PointerProxy::new(scene.pointer());
//! let title = proxy.pointer().key("title");
//! let shown = prism(move || Ok(val(&title)?.unwrap_or_default()));
//!
//! scene.set_in(&path!["title"], "intro");
//! assert_eq!(shown.get_value()?, Value::from("intro"));
//!
//! let other = Atom::new(serde_json::json!({"title": "outro"}));
//! proxy.set_pointer(other.pointer());
//! assert_eq!(shown.get_value()?, Value::from("outro"));
//! # Ok::<(), Error>(())
//! ```

pub use rill_core::path;

pub mod prelude {
    pub use rill_core as core;
    pub use rill_core::{
        Atom, Error, IdentityPrismProvider, Pointer, PointerParts, PointerProxy, Prism, Readable,
        Result, Slot, Status, Subscription, TickReport, Ticker, TickerConfig, Value, in_prism,
        is_pointer, path, pointer_parts, prism, untracked, val,
    };
}
