//! The dynamic value model backing reactive documents.
//!
//! A [`Value`] is either a scalar, a shared heap object ([`Obj`]), a proxy
//! handle ([`Reactive`](crate::Reactive)), or a reference cell
//! ([`Ref`](crate::Ref)). Heap objects have reference identity: cloning a
//! `Value::Obj` clones the handle, not the data, exactly like assigning an
//! object in a dynamic language.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};

use crate::dep::TargetId;
use crate::reactive::Reactive;
use crate::refs::Ref;
use crate::runtime;

/// A dynamically typed reactive value.
#[derive(Clone)]
pub enum Value {
    /// The unit (absent/null) value. Missing keys read as `Unit`.
    Unit,
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A double-precision float.
    Float(f64),
    /// An immutable string.
    Str(Rc<str>),
    /// A raw (untracked) heap object.
    Obj(Obj),
    /// A reactive proxy handle stored as a value.
    Reactive(Reactive),
    /// A reference cell stored as a value.
    Ref(Ref),
}

/// The payload of a heap object.
pub enum RawData {
    /// A string-keyed record (a "plain object"). Insertion-ordered.
    Record(IndexMap<String, Value>),
    /// A dense list (an "array").
    List(Vec<Value>),
    /// A value-keyed collection. Insertion-ordered.
    Map(IndexMap<MapKey, Value>),
    /// A value-keyed set. Insertion-ordered.
    Set(IndexSet<MapKey>),
}

/// The shape of a heap object, used to resolve trigger semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// String-keyed record.
    Record,
    /// Dense list.
    List,
    /// Keyed collection.
    Map,
    /// Keyed set.
    Set,
}

pub(crate) struct RawObj {
    pub(crate) data: RefCell<RawData>,
    /// Lazily assigned when the object is first tracked.
    pub(crate) target: Cell<Option<TargetId>>,
    /// Set by `mark_raw`; a skipped object is never wrapped.
    pub(crate) skip: Cell<bool>,
}

impl Drop for RawObj {
    fn drop(&mut self) {
        // Registry weakness: dropping the last handle releases the key map.
        // try_with because drops can run during thread teardown.
        if let Some(target) = self.target.get() {
            let _ = runtime::try_with(|rt| rt.release_target(target));
        }
    }
}

/// A shared, reference-identified heap object: the target of a proxy.
#[derive(Clone)]
pub struct Obj(pub(crate) Rc<RawObj>);

impl Obj {
    fn from_data(data: RawData) -> Self {
        Obj(Rc::new(RawObj {
            data: RefCell::new(data),
            target: Cell::new(None),
            skip: Cell::new(false),
        }))
    }

    /// Creates a record from `(key, value)` entries.
    pub fn record<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Obj::from_data(RawData::Record(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ))
    }

    /// Creates a list from values.
    pub fn list<V, I>(items: I) -> Self
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        Obj::from_data(RawData::List(items.into_iter().map(Into::into).collect()))
    }

    /// Creates a keyed collection from `(key, value)` entries.
    pub fn map<K, V, I>(entries: I) -> Self
    where
        K: Into<Value>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Obj::from_data(RawData::Map(
            entries
                .into_iter()
                .map(|(k, v)| (MapKey::new(k.into()), v.into()))
                .collect(),
        ))
    }

    /// Creates a keyed set from values.
    pub fn set<V, I>(items: I) -> Self
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        Obj::from_data(RawData::Set(
            items.into_iter().map(|v| MapKey::new(v.into())).collect(),
        ))
    }

    /// The shape of this object.
    pub fn kind(&self) -> TargetKind {
        match &*self.0.data.borrow() {
            RawData::Record(_) => TargetKind::Record,
            RawData::List(_) => TargetKind::List,
            RawData::Map(_) => TargetKind::Map,
            RawData::Set(_) => TargetKind::Set,
        }
    }

    /// Stable address-based identity for seen-sets and map keys.
    pub(crate) fn heap_id(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub(crate) fn is_skipped(&self) -> bool {
        self.0.skip.get()
    }

    /// The registry id for this target, assigned on first use.
    pub(crate) fn target_id(&self) -> TargetId {
        match self.0.target.get() {
            Some(id) => id,
            None => {
                let id = runtime::with(|rt| rt.alloc_target());
                self.0.target.set(Some(id));
                id
            }
        }
    }

    /// Whether the two handles point at the same heap object.
    pub fn same_object(&self, other: &Obj) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Reads a record property directly, without tracking. Missing keys
    /// read as `Unit`.
    pub fn get(&self, key: &str) -> Value {
        match &*self.0.data.borrow() {
            RawData::Record(map) => map.get(key).cloned().unwrap_or_default(),
            _ => panic!("expected a record target"),
        }
    }

    /// Reads a list element directly, without tracking. Out-of-bounds reads
    /// yield `Unit`.
    pub fn at(&self, index: usize) -> Value {
        match &*self.0.data.borrow() {
            RawData::List(items) => items.get(index).cloned().unwrap_or_default(),
            _ => panic!("expected a list target"),
        }
    }

    /// The number of properties, elements, or entries, without tracking.
    pub fn len(&self) -> usize {
        match &*self.0.data.borrow() {
            RawData::Record(map) => map.len(),
            RawData::List(items) => items.len(),
            RawData::Map(map) => map.len(),
            RawData::Set(set) => set.len(),
        }
    }

    /// Whether the object holds no data.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PartialEq for Obj {
    fn eq(&self, other: &Self) -> bool {
        self.same_object(other)
    }
}
impl Eq for Obj {}

impl fmt::Debug for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Deliberately shallow: documents can be cyclic.
        write!(f, "{:?}@{:#x}", self.kind(), self.heap_id())
    }
}

/// Marks an object as opaque: it will never be wrapped by a proxy and deep
/// traversal stops at it. Returns the object for chaining.
pub fn mark_raw(obj: Obj) -> Obj {
    obj.0.skip.set(true);
    obj
}

impl Value {
    /// Whether this value is an object (raw or proxied).
    pub fn is_object(&self) -> bool {
        matches!(self, Value::Obj(_) | Value::Reactive(_))
    }

    /// The raw heap object behind this value, if it is one.
    pub fn as_obj(&self) -> Option<&Obj> {
        match self {
            Value::Obj(o) => Some(o),
            Value::Reactive(r) => Some(r.target()),
            _ => None,
        }
    }

    /// The proxy handle, if this value is one.
    pub fn as_reactive(&self) -> Option<&Reactive> {
        match self {
            Value::Reactive(r) => Some(r),
            _ => None,
        }
    }

    /// Converts into a proxy handle. Panics if the value is not one.
    #[track_caller]
    pub fn into_reactive(self) -> Reactive {
        match self {
            Value::Reactive(r) => r,
            other => panic!("expected a reactive proxy, got {other:?}"),
        }
    }

    /// The reference cell, if this value is one.
    pub fn as_ref_cell(&self) -> Option<&Ref> {
        match self {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }

    /// The boolean payload, if any.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The integer payload, if any.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// The numeric payload as a float, if the value is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(n) => Some(*n),
            _ => None,
        }
    }

    /// The string payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this value is `Unit`.
    pub fn is_unit(&self) -> bool {
        matches!(self, Value::Unit)
    }
}

/// Identity-style equality used for change detection: numbers compare
/// numerically with `NaN == NaN`, strings by content, objects and cells by
/// reference, proxies by reference and flavor.
pub fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Unit, Value::Unit) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => (a.is_nan() && b.is_nan()) || a == b,
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => *a as f64 == *b,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Obj(a), Value::Obj(b)) => a.same_object(b),
        (Value::Reactive(a), Value::Reactive(b)) => a == b,
        (Value::Ref(a), Value::Ref(b)) => a.same_cell(b),
        _ => false,
    }
}

/// Equality on values is [`same_value`] identity semantics.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        same_value(self, other)
    }
}

/// A canonicalized key for keyed collections.
///
/// Proxies canonicalize to their raw object so an entry inserted with a
/// reactive key is found when looked up with the raw key and vice versa.
/// Integral floats canonicalize to integers so `1` and `1.0` are one key.
#[derive(Clone)]
pub struct MapKey(Value);

impl MapKey {
    /// Canonicalizes `value` into a key.
    pub fn new(value: Value) -> Self {
        let value = match value {
            Value::Reactive(r) => Value::Obj(r.target().clone()),
            Value::Float(f) if f == f.trunc() && f.is_finite() && f as i64 as f64 == f => {
                Value::Int(f as i64)
            }
            other => other,
        };
        MapKey(value)
    }

    /// The canonical value of this key.
    pub fn value(&self) -> &Value {
        &self.0
    }
}

impl PartialEq for MapKey {
    fn eq(&self, other: &Self) -> bool {
        same_value(&self.0, &other.0)
    }
}
impl Eq for MapKey {}

impl Hash for MapKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.0 {
            Value::Unit => 0u8.hash(state),
            Value::Bool(b) => (1u8, b).hash(state),
            Value::Int(n) => (2u8, n).hash(state),
            // NaN keys hash together; canonicalization removed integral floats.
            Value::Float(f) => {
                let bits = if f.is_nan() { f64::NAN.to_bits() } else { f.to_bits() };
                (3u8, bits).hash(state)
            }
            Value::Str(s) => (4u8, &**s).hash(state),
            Value::Obj(o) => (5u8, o.heap_id()).hash(state),
            // Unreachable after canonicalization, but keep it total.
            Value::Reactive(r) => (5u8, r.target().heap_id()).hash(state),
            Value::Ref(r) => (6u8, r.cell_id()).hash(state),
        }
    }
}

impl fmt::Debug for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => write!(f, "Unit"),
            Value::Bool(b) => b.fmt(f),
            Value::Int(n) => n.fmt(f),
            Value::Float(n) => n.fmt(f),
            Value::Str(s) => s.fmt(f),
            Value::Obj(o) => o.fmt(f),
            Value::Reactive(r) => r.fmt(f),
            Value::Ref(r) => r.fmt(f),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Unit
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Unit
    }
}
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}
impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}
impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Int(v as i64)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.into())
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v.into())
    }
}
impl From<Obj> for Value {
    fn from(v: Obj) -> Self {
        Value::Obj(v)
    }
}
impl From<Reactive> for Value {
    fn from(v: Reactive) -> Self {
        Value::Reactive(v)
    }
}
impl From<Ref> for Value {
    fn from(v: Ref) -> Self {
        Value::Ref(v)
    }
}

#[cfg(feature = "serde")]
mod serde_impls {
    use serde::de::{MapAccess, SeqAccess, Visitor};
    use serde::ser::{SerializeMap, SerializeSeq};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::*;

    impl Serialize for Value {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            match self {
                Value::Unit => serializer.serialize_unit(),
                Value::Bool(b) => serializer.serialize_bool(*b),
                Value::Int(n) => serializer.serialize_i64(*n),
                Value::Float(n) => serializer.serialize_f64(*n),
                Value::Str(s) => serializer.serialize_str(s),
                Value::Obj(o) => o.serialize(serializer),
                Value::Reactive(r) => r.target().serialize(serializer),
                Value::Ref(r) => r.get_untracked().serialize(serializer),
            }
        }
    }

    impl Serialize for Obj {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            match &*self.0.data.borrow() {
                RawData::Record(map) => {
                    let mut s = serializer.serialize_map(Some(map.len()))?;
                    for (k, v) in map {
                        s.serialize_entry(k, v)?;
                    }
                    s.end()
                }
                RawData::List(items) => {
                    let mut s = serializer.serialize_seq(Some(items.len()))?;
                    for v in items {
                        s.serialize_element(v)?;
                    }
                    s.end()
                }
                RawData::Map(map) => {
                    let mut s = serializer.serialize_map(Some(map.len()))?;
                    for (k, v) in map {
                        s.serialize_entry(k.value(), v)?;
                    }
                    s.end()
                }
                RawData::Set(items) => {
                    let mut s = serializer.serialize_seq(Some(items.len()))?;
                    for v in items {
                        s.serialize_element(v.value())?;
                    }
                    s.end()
                }
            }
        }
    }

    impl<'de> Deserialize<'de> for Value {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            struct ValueVisitor;

            impl<'de> Visitor<'de> for ValueVisitor {
                type Value = Value;

                fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str("a scalar, sequence, or map")
                }

                fn visit_unit<E: serde::de::Error>(self) -> Result<Value, E> {
                    Ok(Value::Unit)
                }
                fn visit_bool<E: serde::de::Error>(self, v: bool) -> Result<Value, E> {
                    Ok(Value::Bool(v))
                }
                fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Value, E> {
                    Ok(Value::Int(v))
                }
                fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Value, E> {
                    i64::try_from(v)
                        .map(Value::Int)
                        .map_err(|_| E::custom("integer out of range"))
                }
                fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<Value, E> {
                    Ok(Value::Float(v))
                }
                fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Value, E> {
                    Ok(Value::Str(v.into()))
                }

                fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
                    let mut items = Vec::new();
                    while let Some(v) = seq.next_element::<Value>()? {
                        items.push(v);
                    }
                    Ok(Value::Obj(Obj::list(items)))
                }

                fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Value, A::Error> {
                    let mut entries = Vec::new();
                    while let Some((k, v)) = map.next_entry::<String, Value>()? {
                        entries.push((k, v));
                    }
                    Ok(Value::Obj(Obj::record(entries)))
                }
            }

            deserializer.deserialize_any(ValueVisitor)
        }
    }
}
