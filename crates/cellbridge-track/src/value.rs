#![forbid(unsafe_code)]

//! Immutable, structurally shared value trees.
//!
//! # Design
//!
//! [`Snapshot`] is a JSON-like tree whose compound nodes (objects, arrays)
//! live behind `Rc`, with persistent `im` containers inside. Cloning any
//! subtree is O(1) and identity preserving, and rebuilding a mutation path
//! leaves every untouched sibling holding the exact same node — which is
//! what lets change detection run on node identity instead of deep
//! comparison.
//!
//! # Invariants
//!
//! 1. `same()` implies `==` (identity is a refinement of structural
//!    equality).
//! 2. A path rebuild changes the identity of the nodes on the path and of
//!    nothing else.
//! 3. Scalars compare by value in both `same()` and `==`; floats compare by
//!    bit pattern, so NaN is `same` as NaN.

use std::fmt;
use std::rc::Rc;

use im::{OrdMap, Vector};

/// One step in a path through a [`Snapshot`] tree.
///
/// The empty path designates the root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathSeg {
    /// A named field of an object node.
    Key(String),
    /// An element of an array node.
    Index(usize),
}

impl PathSeg {
    /// Shorthand for `PathSeg::Key(name.into())`.
    pub fn key(name: impl Into<String>) -> Self {
        Self::Key(name.into())
    }
}

impl fmt::Display for PathSeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(k) => write!(f, ".{k}"),
            Self::Index(i) => write!(f, "[{i}]"),
        }
    }
}

/// An immutable, structurally shared value tree.
///
/// Compound variants share their node allocation across clones; two clones
/// of the same subtree are [`same`](Snapshot::same) until one of them is
/// rebuilt by a mutation.
#[derive(Clone)]
pub enum Snapshot {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Object(Rc<OrdMap<String, Snapshot>>),
    Array(Rc<Vector<Snapshot>>),
}

impl Snapshot {
    /// Build an object node from key/value pairs.
    pub fn object<K: Into<String>, I: IntoIterator<Item = (K, Snapshot)>>(entries: I) -> Self {
        let map: OrdMap<String, Snapshot> =
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self::Object(Rc::new(map))
    }

    /// Build an array node from a sequence of values.
    pub fn array<I: IntoIterator<Item = Snapshot>>(items: I) -> Self {
        Self::Array(Rc::new(items.into_iter().collect()))
    }

    /// An object node with no fields.
    #[must_use]
    pub fn empty_object() -> Self {
        Self::Object(Rc::new(OrdMap::new()))
    }

    /// Whether this node is an object or array (a node that can be diffed
    /// field by field).
    #[must_use]
    pub fn is_compound(&self) -> bool {
        matches!(self, Self::Object(_) | Self::Array(_))
    }

    /// Identity comparison: pointer equality for compound nodes, value
    /// equality for scalars (floats by bit pattern).
    ///
    /// This is the change-detection primitive: an unchanged subtree keeps
    /// its node across mutations elsewhere in the tree, so `same` returning
    /// `false` means the subtree was structurally rebuilt.
    #[must_use]
    pub fn same(&self, other: &Snapshot) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Str(a), Self::Str(b)) => Rc::ptr_eq(a, b) || a == b,
            (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(a, b),
            (Self::Array(a), Self::Array(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Look up a field of an object node.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Snapshot> {
        match self {
            Self::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// Look up an element of an array node.
    #[must_use]
    pub fn at(&self, index: usize) -> Option<&Snapshot> {
        match self {
            Self::Array(vec) => vec.get(index),
            _ => None,
        }
    }

    /// Follow a path from this node.
    #[must_use]
    pub fn get_path(&self, path: &[PathSeg]) -> Option<&Snapshot> {
        match path.split_first() {
            None => Some(self),
            Some((PathSeg::Key(k), rest)) => self.get(k)?.get_path(rest),
            Some((PathSeg::Index(i), rest)) => self.at(*i)?.get_path(rest),
        }
    }

    /// Number of fields (object) or elements (array); `None` for scalars.
    #[must_use]
    pub fn len(&self) -> Option<usize> {
        match self {
            Self::Object(map) => Some(map.len()),
            Self::Array(vec) => Some(vec.len()),
            _ => None,
        }
    }

    /// Whether this is a compound node with no children.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(n) => Some(*n),
            Self::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        if self.same(other) {
            return true;
        }
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| b.get(k).is_some_and(|w| v == w))
            }
            (Self::Array(a), Self::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(v, w)| v == w)
            }
            // Scalar cases are fully covered by `same`.
            _ => false,
        }
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Object(map) => f
                .debug_map()
                .entries(map.iter().map(|(k, v)| (k.as_str(), v)))
                .finish(),
            Self::Array(vec) => f.debug_list().entries(vec.iter()).finish(),
        }
    }
}

impl From<bool> for Snapshot {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Snapshot {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Snapshot {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for Snapshot {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Snapshot {
    fn from(v: &str) -> Self {
        Self::Str(Rc::from(v))
    }
}

impl From<String> for Snapshot {
    fn from(v: String) -> Self {
        Self::Str(Rc::from(v.as_str()))
    }
}

// ---------------------------------------------------------------------------
// Copy-on-write path editing
// ---------------------------------------------------------------------------

/// Rebuild `node` with `value` placed at `path`.
///
/// Returns `None` when nothing changed: either the leaf is already
/// [`same`](Snapshot::same) as `value`, or the path cannot be reached
/// (missing intermediate node, index past the end, key on a non-object).
/// Unreachable paths are a silent no-op by contract.
///
/// An index equal to the array length with nothing left to descend appends.
pub(crate) fn set_at(node: &Snapshot, path: &[PathSeg], value: Snapshot) -> Option<Snapshot> {
    match path.split_first() {
        None => {
            if node.same(&value) {
                None
            } else {
                Some(value)
            }
        }
        Some((PathSeg::Key(key), rest)) => match node {
            Snapshot::Object(map) => {
                let new_child = match map.get(key) {
                    Some(child) => set_at(child, rest, value)?,
                    None if rest.is_empty() => value,
                    None => return None,
                };
                Some(Snapshot::Object(Rc::new(map.update(key.clone(), new_child))))
            }
            _ => None,
        },
        Some((PathSeg::Index(index), rest)) => match node {
            Snapshot::Array(vec) => {
                if *index < vec.len() {
                    let child = vec.get(*index)?;
                    let new_child = set_at(child, rest, value)?;
                    Some(Snapshot::Array(Rc::new(vec.update(*index, new_child))))
                } else if *index == vec.len() && rest.is_empty() {
                    let mut grown = (**vec).clone();
                    grown.push_back(value);
                    Some(Snapshot::Array(Rc::new(grown)))
                } else {
                    None
                }
            }
            _ => None,
        },
    }
}

/// Rebuild `node` with the child at `path` removed.
///
/// Removing an array index shifts later elements down. Returns `None` when
/// the path does not exist.
pub(crate) fn remove_at(node: &Snapshot, path: &[PathSeg]) -> Option<Snapshot> {
    match path.split_first() {
        None => None,
        Some((seg, rest)) if rest.is_empty() => match (node, seg) {
            (Snapshot::Object(map), PathSeg::Key(key)) => {
                if !map.contains_key(key) {
                    return None;
                }
                Some(Snapshot::Object(Rc::new(map.without(key))))
            }
            (Snapshot::Array(vec), PathSeg::Index(index)) => {
                if *index >= vec.len() {
                    return None;
                }
                let mut shrunk = (**vec).clone();
                shrunk.remove(*index);
                Some(Snapshot::Array(Rc::new(shrunk)))
            }
            _ => None,
        },
        Some((PathSeg::Key(key), rest)) => match node {
            Snapshot::Object(map) => {
                let new_child = remove_at(map.get(key)?, rest)?;
                Some(Snapshot::Object(Rc::new(map.update(key.clone(), new_child))))
            }
            _ => None,
        },
        Some((PathSeg::Index(index), rest)) => match node {
            Snapshot::Array(vec) => {
                let new_child = remove_at(vec.get(*index)?, rest)?;
                Some(Snapshot::Array(Rc::new(vec.update(*index, new_child))))
            }
            _ => None,
        },
    }
}

/// Rebuild `node` with the array at `path` truncated to `len` elements.
///
/// Returns `None` when the path does not name an array or the array is
/// already at most `len` long.
pub(crate) fn truncate_at(node: &Snapshot, path: &[PathSeg], len: usize) -> Option<Snapshot> {
    match path.split_first() {
        None => match node {
            Snapshot::Array(vec) if vec.len() > len => {
                Some(Snapshot::Array(Rc::new(vec.take(len))))
            }
            _ => None,
        },
        Some((PathSeg::Key(key), rest)) => match node {
            Snapshot::Object(map) => {
                let new_child = truncate_at(map.get(key)?, rest, len)?;
                Some(Snapshot::Object(Rc::new(map.update(key.clone(), new_child))))
            }
            _ => None,
        },
        Some((PathSeg::Index(index), rest)) => match node {
            Snapshot::Array(vec) => {
                let new_child = truncate_at(vec.get(*index)?, rest, len)?;
                Some(Snapshot::Array(Rc::new(vec.update(*index, new_child))))
            }
            _ => None,
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
