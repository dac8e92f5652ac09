#![forbid(unsafe_code)]

//! Dynamic value tree held by [`Atom`](crate::atom::Atom)s.
//!
//! # Design
//!
//! [`Value`] is a JSON-shaped tree whose containers live behind `Rc`, so a
//! snapshot clone is O(1) and an edit at a path allocates only the containers
//! on that path. Every untouched sibling subtree is shared with the previous
//! tree. Atoms rely on this to find changed paths by identity instead of by
//! deep comparison.
//!
//! # Invariants
//!
//! 1. [`Value::set_in`] never mutates `self`; it returns a new tree.
//! 2. Every container on the edited path gets a fresh `Rc` in the result.
//! 3. Every container off the edited path is `Rc::ptr_eq` to the original.
//! 4. [`Value::same`] implies `==`, never the other way around for containers.
//!
//! # Failure Modes
//!
//! - **Unindexable segment**: reading through a scalar, a missing key, or an
//!   out-of-range index yields `None` rather than an error.
//! - **Shape conflict on write**: writing through a scalar replaces it with a
//!   container; writing a non-numeric key into a list turns the list into a
//!   map keyed by the stringified indices.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde::de::Deserializer;
use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// One step of a path into a [`Value`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PathSegment {
    /// A map key.
    Key(String),
    /// A list position.
    Index(usize),
}

impl PathSegment {
    /// The list position this segment addresses, if any.
    ///
    /// A `Key` made only of ASCII digits also addresses a list position.
    #[must_use]
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Self::Index(i) => Some(*i),
            Self::Key(k) => k.parse().ok(),
        }
    }

    /// The map key this segment addresses.
    #[must_use]
    pub fn to_key(&self) -> String {
        match self {
            Self::Key(k) => k.clone(),
            Self::Index(i) => i.to_string(),
        }
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(k) => f.write_str(k),
            Self::Index(i) => write!(f, "{i}"),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        Self::Key(key.to_owned())
    }
}

impl From<String> for PathSegment {
    fn from(key: String) -> Self {
        Self::Key(key)
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl From<&PathSegment> for PathSegment {
    fn from(segment: &PathSegment) -> Self {
        segment.clone()
    }
}

/// An owned path.
pub type Path = Vec<PathSegment>;

/// Build a [`Path`] from keys and indices.
///
/// ```
/// use rill_core::{PathSegment, path};
///
/// let p = path!["tracks", 2usize, "name"];
/// assert_eq!(p[1], PathSegment::Index(2));
/// ```
#[macro_export]
macro_rules! path {
    () => {
        ::std::vec::Vec::<$crate::PathSegment>::new()
    };
    ($($segment:expr),+ $(,)?) => {
        ::std::vec![$($crate::PathSegment::from($segment)),+]
    };
}

/// Whether a change at one path affects a reader of the other.
///
/// Two paths are related when either is a prefix of the other (equal paths
/// included).
#[must_use]
pub fn paths_related(a: &[PathSegment], b: &[PathSegment]) -> bool {
    a.iter().zip(b).all(|(x, y)| x == y)
}

/// Render a path as `/a/0/b` for logs and labels.
#[must_use]
pub fn display_path(path: &[PathSegment]) -> String {
    if path.is_empty() {
        return "/".to_owned();
    }
    path.iter().fold(String::new(), |mut out, segment| {
        out.push('/');
        out.push_str(&segment.to_string());
        out
    })
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A structurally arbitrary, cheaply clonable value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    List(Rc<Vec<Value>>),
    Map(Rc<BTreeMap<String, Value>>),
}

/// Most `Null` slots `set_in` pads a list with to reach an index.
pub const MAX_LIST_GAP: usize = 1024;

fn within_gap(len: usize, index: usize) -> bool {
    index.saturating_sub(len) <= MAX_LIST_GAP
}

impl Value {
    /// An empty map.
    #[must_use]
    pub fn map() -> Self {
        Self::Map(Rc::new(BTreeMap::new()))
    }

    /// An empty list.
    #[must_use]
    pub fn list() -> Self {
        Self::List(Rc::new(Vec::new()))
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Whether this value can be indexed by a path segment.
    #[must_use]
    pub fn is_container(&self) -> bool {
        matches!(self, Self::List(_) | Self::Map(_))
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The number as an integer, if it has no fractional part.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) if n.fract() == 0.0 && n.abs() <= i64::MAX as f64 => Some(*n as i64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Short name of the variant, for diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    /// Look up one segment.
    #[must_use]
    pub fn get(&self, segment: &PathSegment) -> Option<&Value> {
        match (self, segment) {
            (Self::Map(entries), PathSegment::Key(key)) => entries.get(key),
            (Self::Map(entries), PathSegment::Index(i)) => entries.get(&i.to_string()),
            (Self::List(items), segment) => segment.as_index().and_then(|i| items.get(i)),
            _ => None,
        }
    }

    /// Follow `path`; `None` when any step is unindexable.
    #[must_use]
    pub fn get_in(&self, path: &[PathSegment]) -> Option<&Value> {
        path.iter().try_fold(self, |value, segment| value.get(segment))
    }

    /// Return a copy of this tree with `value` stored at `path`.
    ///
    /// Missing intermediates are created: a list when the next segment is an
    /// [`PathSegment::Index`], a map otherwise. An index more than
    /// [`MAX_LIST_GAP`] past the end of a list turns that list into a map
    /// keyed by position, so the value is still reachable through the same
    /// path.
    #[must_use]
    pub fn set_in(&self, path: &[PathSegment], value: Value) -> Value {
        let Some((head, rest)) = path.split_first() else {
            return value;
        };
        let child = self.get(head).cloned().unwrap_or_default();
        self.with_child(head, child.set_in(rest, value))
    }

    /// Replace (or insert) one direct child, allocating a new container.
    fn with_child(&self, segment: &PathSegment, child: Value) -> Value {
        match (self, segment) {
            (Self::Map(entries), _) => {
                let mut entries = (**entries).clone();
                entries.insert(segment.to_key(), child);
                Self::Map(Rc::new(entries))
            }
            (Self::List(items), _) => match segment.as_index() {
                Some(i) if within_gap(items.len(), i) => {
                    let mut items = (**items).clone();
                    if i >= items.len() {
                        items.resize(i + 1, Value::Null);
                    }
                    items[i] = child;
                    Self::List(Rc::new(items))
                }
                _ => {
                    let mut entries: BTreeMap<String, Value> = items
                        .iter()
                        .enumerate()
                        .map(|(i, v)| (i.to_string(), v.clone()))
                        .collect();
                    entries.insert(segment.to_key(), child);
                    Self::Map(Rc::new(entries))
                }
            },
            (_, PathSegment::Index(i)) if within_gap(0, *i) => {
                let mut items = vec![Value::Null; i + 1];
                items[*i] = child;
                Self::List(Rc::new(items))
            }
            (_, segment) => {
                let mut entries = BTreeMap::new();
                entries.insert(segment.to_key(), child);
                Self::Map(Rc::new(entries))
            }
        }
    }

    /// Identity comparison: containers by reference, scalars by value.
    ///
    /// This is the cutoff rule used by identity prisms. A freshly built
    /// container with equal contents is *not* the same.
    #[must_use]
    pub fn same(a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(x), Self::Bool(y)) => x == y,
            (Self::Number(x), Self::Number(y)) => numbers_equal(*x, *y),
            (Self::String(x), Self::String(y)) => x == y,
            (Self::List(x), Self::List(y)) => Rc::ptr_eq(x, y),
            (Self::Map(x), Self::Map(y)) => Rc::ptr_eq(x, y),
            _ => false,
        }
    }

    /// [`Value::same`] lifted over absence.
    #[must_use]
    pub fn same_opt(a: Option<&Value>, b: Option<&Value>) -> bool {
        match (a, b) {
            (None, None) => true,
            (Some(x), Some(y)) => Self::same(x, y),
            _ => false,
        }
    }
}

/// NaN compares equal to itself so a NaN-valued derivation settles.
fn numbers_equal(x: f64, y: f64) -> bool {
    x == y || (x.is_nan() && y.is_nan())
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::List(x), Self::List(y)) => Rc::ptr_eq(x, y) || x == y,
            (Self::Map(x), Self::Map(y)) => Rc::ptr_eq(x, y) || x == y,
            _ => Self::same(self, other),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::Value::from(self);
        write!(f, "{json}")
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

macro_rules! impl_from_number {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(n: $ty) -> Self {
                    Self::Number(n as f64)
                }
            }
        )*
    };
}

impl_from_number!(f32, f64, i32, i64, u32, u64, usize);

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(Rc::from(s))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(Rc::new(items))
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(entries: BTreeMap<String, Value>) -> Self {
        Self::Map(Rc::new(entries))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl FromIterator<Value> for Value {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::List(Rc::new(iter.into_iter().collect()))
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Value {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self::Map(Rc::new(
            iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Self::from(s),
            serde_json::Value::Array(items) => items.into_iter().map(Self::from).collect(),
            serde_json::Value::Object(entries) => entries
                .into_iter()
                .map(|(k, v)| (k, Self::from(v)))
                .collect(),
        }
    }
}

impl From<&Value> for serde_json::Value {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => match integral(*n) {
                Some(i) => Self::from(i),
                None => serde_json::Number::from_f64(*n).map_or(Self::Null, Self::Number),
            },
            Value::String(s) => Self::String(s.to_string()),
            Value::List(items) => Self::Array(items.iter().map(Self::from).collect()),
            Value::Map(entries) => Self::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::from(v)))
                    .collect(),
            ),
        }
    }
}

/// `Some(i)` when `n` round-trips through `i64`.
fn integral(n: f64) -> Option<i64> {
    if n.fract() == 0.0 && n >= i64::MIN as f64 && n < i64::MAX as f64 {
        Some(n as i64)
    } else {
        None
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Number(n) => match integral(*n) {
                Some(i) => serializer.serialize_i64(i),
                None => serializer.serialize_f64(*n),
            },
            Self::String(s) => serializer.serialize_str(s),
            Self::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items.iter() {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries.iter() {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Self::from)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
