//! Reactive proxies over records and lists.
//!
//! A [`Reactive`] is a cheap handle pairing a target object with a flavor:
//! mutable or readonly, deep or shallow. Every accessor is a trap: reads
//! call `track`, writes call `trigger`. The four flavors share one
//! implementation and dispatch on the handle flags.
//!
//! Keyed collections (maps and sets) get their own trap family in
//! [`collections`](crate::collections).

use std::fmt;

use crate::dep::{self, DepKey, TrackOp, TriggerOp};
use crate::runtime::PauseGuard;
use crate::value::{same_value, Obj, RawData, TargetKind, Value};

/// A proxy handle over a target object.
///
/// Handles are value types: identity is the pair (target, flavor), so
/// wrapping the same target in the same flavor twice yields equal handles.
#[derive(Clone)]
pub struct Reactive {
    pub(crate) obj: Obj,
    pub(crate) readonly: bool,
    pub(crate) shallow: bool,
    /// Whether the underlying target is mutation-tracked. True for every
    /// handle created through the reactive path, including a readonly
    /// wrapper over a reactive one.
    pub(crate) base_reactive: bool,
}

impl PartialEq for Reactive {
    fn eq(&self, other: &Self) -> bool {
        self.obj.same_object(&other.obj)
            && self.readonly == other.readonly
            && self.shallow == other.shallow
            && self.base_reactive == other.base_reactive
    }
}
impl Eq for Reactive {}

impl fmt::Debug for Reactive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flavor = match (self.readonly, self.shallow) {
            (false, false) => "Reactive",
            (false, true) => "ShallowReactive",
            (true, false) => "Readonly",
            (true, true) => "ShallowReadonly",
        };
        write!(f, "{flavor}({:?})", self.obj)
    }
}

fn make_proxy(value: Value, readonly: bool, shallow: bool) -> Value {
    match value {
        Value::Reactive(r) => {
            if readonly && !r.readonly {
                // A readonly view over a reactive target is a distinct
                // wrapper; everything else passes through unchanged.
                Value::Reactive(Reactive {
                    obj: r.obj,
                    readonly: true,
                    shallow,
                    base_reactive: r.base_reactive,
                })
            } else {
                Value::Reactive(r)
            }
        }
        Value::Obj(obj) => {
            if obj.is_skipped() {
                return Value::Obj(obj);
            }
            Value::Reactive(Reactive {
                obj,
                readonly,
                shallow,
                base_reactive: !readonly,
            })
        }
        other => other,
    }
}

fn proxy_entry(value: Value, readonly: bool, shallow: bool) -> Value {
    if !value.is_object() {
        tracing::warn!(value = ?value, "value cannot be made reactive");
        return value;
    }
    make_proxy(value, readonly, shallow)
}

/// Returns a deep mutable proxy over the given object.
///
/// The same target always yields the same proxy identity; passing an
/// existing proxy returns it unchanged; non-object values and
/// [`mark_raw`](crate::mark_raw)ed objects are returned unchanged with a
/// warning for the former.
///
/// # Example
/// ```
/// # use mimosa_reactive::*;
/// let p = create_reactive(Obj::record([("count", 0)])).into_reactive();
/// let seen = create_ref(-1);
/// create_effect({
///     let (p, seen) = (p.clone(), seen.clone());
///     move || seen.set(p.get("count"))
/// });
/// p.set("count", 1);
/// assert_eq!(seen.get_untracked().as_int(), Some(1));
/// ```
pub fn create_reactive(value: impl Into<Value>) -> Value {
    proxy_entry(value.into(), false, false)
}

/// Returns a mutable proxy that tracks only one level deep: nested objects
/// are returned raw and stored values are not normalized.
pub fn create_shallow_reactive(value: impl Into<Value>) -> Value {
    proxy_entry(value.into(), false, true)
}

/// Returns a deep readonly proxy. Writes are refused with a warning while
/// still reporting success, so caller code paths stay uniform.
pub fn create_readonly(value: impl Into<Value>) -> Value {
    proxy_entry(value.into(), true, false)
}

/// Returns a readonly proxy that is only readonly one level deep.
pub fn create_shallow_readonly(value: impl Into<Value>) -> Value {
    proxy_entry(value.into(), true, true)
}

/// Deep-wrap helper: objects become reactive, everything else passes
/// through.
pub(crate) fn to_reactive(value: Value) -> Value {
    if value.is_object() {
        make_proxy(value, false, false)
    } else {
        value
    }
}

pub(crate) fn to_readonly(value: Value) -> Value {
    if value.is_object() {
        make_proxy(value, true, false)
    } else {
        value
    }
}

/// Whether the value is a proxy whose target is mutation-tracked. True
/// also for a readonly wrapper over a reactive target.
pub fn is_reactive(value: &Value) -> bool {
    matches!(value, Value::Reactive(r) if r.base_reactive)
}

/// Whether the value is a readonly proxy.
pub fn is_readonly(value: &Value) -> bool {
    matches!(value, Value::Reactive(r) if r.readonly)
}

/// Whether the value is a shallow proxy or a shallow ref.
pub fn is_shallow(value: &Value) -> bool {
    match value {
        Value::Reactive(r) => r.shallow,
        Value::Ref(r) => r.is_shallow(),
        _ => false,
    }
}

/// Whether the value is a proxy of any flavor.
pub fn is_proxy(value: &Value) -> bool {
    matches!(value, Value::Reactive(_))
}

/// Strips any proxy wrapper, returning the raw target.
pub fn to_raw(value: Value) -> Value {
    match value {
        Value::Reactive(r) => Value::Obj(r.obj),
        other => other,
    }
}

impl Reactive {
    pub(crate) fn target(&self) -> &Obj {
        &self.obj
    }

    /// The raw target object behind this proxy.
    pub fn raw(&self) -> Obj {
        self.obj.clone()
    }

    /// The shape of the target.
    pub fn kind(&self) -> TargetKind {
        self.obj.kind()
    }

    /// Whether this handle refuses writes.
    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// Whether this handle tracks and wraps only one level deep.
    pub fn is_shallow(&self) -> bool {
        self.shallow
    }

    /// Whether the underlying target is mutation-tracked.
    pub fn is_reactive(&self) -> bool {
        self.base_reactive
    }

    /// Readonly handles over plain targets observe nothing: their reads can
    /// never change. A readonly view over a *reactive* target still tracks,
    /// because the underlying target can change through the mutable proxy.
    fn tracks(&self) -> bool {
        self.base_reactive
    }

    pub(crate) fn track_key(&self, op: TrackOp, key: DepKey) {
        if self.tracks() {
            dep::track(self.obj.target_id(), op, key);
        }
    }

    pub(crate) fn trigger_key(&self, op: TriggerOp, key: Option<DepKey>, new_len: Option<usize>) {
        dep::trigger(self.obj.target_id(), self.kind(), op, key, new_len);
    }

    /// Wraps a fetched value per this handle's flavor. Deep handles wrap
    /// nested objects lazily; shallow handles return them raw.
    pub(crate) fn wrap(&self, value: Value) -> Value {
        if self.shallow {
            return value;
        }
        match value {
            Value::Obj(obj) => {
                if obj.is_skipped() {
                    Value::Obj(obj)
                } else {
                    Value::Reactive(Reactive {
                        obj,
                        readonly: self.readonly,
                        shallow: false,
                        base_reactive: self.base_reactive,
                    })
                }
            }
            Value::Reactive(r) => {
                if self.readonly && !r.readonly {
                    Value::Reactive(Reactive {
                        obj: r.obj,
                        readonly: true,
                        shallow: false,
                        base_reactive: r.base_reactive,
                    })
                } else {
                    Value::Reactive(r)
                }
            }
            other => other,
        }
    }

    pub(crate) fn refuse_write(&self, what: &str) -> bool {
        if self.readonly {
            tracing::warn!(target_obj = ?self.obj, "{what} on a readonly proxy was ignored");
            return true;
        }
        false
    }

    fn with_record<T>(&self, f: impl FnOnce(&indexmap::IndexMap<String, Value>) -> T) -> T {
        match &*self.obj.0.data.borrow() {
            RawData::Record(map) => f(map),
            _ => panic!("expected a record target"),
        }
    }

    fn with_record_mut<T>(
        &self,
        f: impl FnOnce(&mut indexmap::IndexMap<String, Value>) -> T,
    ) -> T {
        match &mut *self.obj.0.data.borrow_mut() {
            RawData::Record(map) => f(map),
            _ => panic!("expected a record target"),
        }
    }

    fn with_list<T>(&self, f: impl FnOnce(&Vec<Value>) -> T) -> T {
        match &*self.obj.0.data.borrow() {
            RawData::List(items) => f(items),
            _ => panic!("expected a list target"),
        }
    }

    fn with_list_mut<T>(&self, f: impl FnOnce(&mut Vec<Value>) -> T) -> T {
        match &mut *self.obj.0.data.borrow_mut() {
            RawData::List(items) => f(items),
            _ => panic!("expected a list target"),
        }
    }

    // --- record traps ---

    /// Reads a property. Missing keys read as `Unit`. In deep mode a stored
    /// ref is unwrapped to its inner value.
    pub fn get(&self, key: &str) -> Value {
        let value = self.with_record(|map| map.get(key).cloned()).unwrap_or_default();
        self.track_key(TrackOp::Get, DepKey::Prop(key.to_string()));
        if !self.shallow {
            if let Value::Ref(r) = &value {
                return r.get();
            }
        }
        self.wrap(value)
    }

    /// Writes a property, distinguishing adds from sets and triggering only
    /// on an actual (NaN-aware) change. In deep mode, writing a plain value
    /// over a stored ref assigns through the ref instead.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        if self.refuse_write("set") {
            return;
        }
        let mut value = value.into();
        let old = self.with_record(|map| map.get(key).cloned());
        if !self.shallow {
            if let Some(Value::Ref(r)) = &old {
                if !matches!(value, Value::Ref(_)) {
                    r.set(value);
                    return;
                }
            }
            value = to_raw(value);
        }
        self.with_record_mut(|map| map.insert(key.to_string(), value.clone()));
        match old {
            None => self.trigger_key(TriggerOp::Add, Some(DepKey::Prop(key.to_string())), None),
            Some(old) if !same_value(&old, &value) => {
                self.trigger_key(TriggerOp::Set, Some(DepKey::Prop(key.to_string())), None)
            }
            Some(_) => {}
        }
    }

    /// Whether the record has the property.
    pub fn has(&self, key: &str) -> bool {
        let found = self.with_record(|map| map.contains_key(key));
        self.track_key(TrackOp::Has, DepKey::Prop(key.to_string()));
        found
    }

    /// Removes a property. Returns whether it existed. On a readonly handle
    /// the write is refused with a warning and reported as a success.
    pub fn delete(&self, key: &str) -> bool {
        if self.refuse_write("delete") {
            return true;
        }
        let removed = self.with_record_mut(|map| map.shift_remove(key));
        match removed {
            Some(_) => {
                self.trigger_key(TriggerOp::Delete, Some(DepKey::Prop(key.to_string())), None);
                true
            }
            None => false,
        }
    }

    /// The record's keys, in insertion order. Tracks key enumeration.
    pub fn keys(&self) -> Vec<String> {
        let keys = self.with_record(|map| map.keys().cloned().collect());
        self.track_key(TrackOp::Iterate, DepKey::Iterate);
        keys
    }

    /// The record's entries, wrapped per flavor.
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.keys()
            .into_iter()
            .map(|key| {
                let value = self.get(&key);
                (key, value)
            })
            .collect()
    }

    // --- list traps ---

    /// The list length.
    pub fn len(&self) -> usize {
        let len = self.with_list(|items| items.len());
        self.track_key(TrackOp::Get, DepKey::Length);
        len
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads the element at `index`. Out-of-bounds reads yield `Unit`.
    ///
    /// A stored ref is returned as-is: unwrapping by integer index would
    /// break index-based algorithms.
    pub fn at(&self, index: usize) -> Value {
        let value = self.with_list(|items| items.get(index).cloned()).unwrap_or_default();
        self.track_key(TrackOp::Get, DepKey::Index(index));
        self.wrap(value)
    }

    /// Writes the element at `index`, growing the list with `Unit` holes
    /// when the index is past the end.
    pub fn set_at(&self, index: usize, value: impl Into<Value>) {
        if self.refuse_write("set") {
            return;
        }
        let mut value = value.into();
        if !self.shallow {
            value = to_raw(value);
        }
        let old = self.with_list_mut(|items| {
            if index < items.len() {
                let old = items[index].clone();
                items[index] = value.clone();
                Some(old)
            } else {
                items.resize(index, Value::Unit);
                items.push(value.clone());
                None
            }
        });
        match old {
            None => self.trigger_key(TriggerOp::Add, Some(DepKey::Index(index)), None),
            Some(old) if !same_value(&old, &value) => {
                self.trigger_key(TriggerOp::Set, Some(DepKey::Index(index)), None)
            }
            Some(_) => {}
        }
    }

    /// Appends an element and returns the new length. Tracking is paused
    /// for the duration, as for every length-reading mutator.
    pub fn push(&self, value: impl Into<Value>) -> usize {
        if self.refuse_write("push") {
            return self.with_list(|items| items.len());
        }
        let _guard = PauseGuard::new();
        let index = self.with_list(|items| items.len());
        self.set_at(index, value);
        index + 1
    }

    /// Removes and returns the last element, or `Unit` when empty.
    pub fn pop(&self) -> Value {
        if self.refuse_write("pop") {
            return Value::Unit;
        }
        let _guard = PauseGuard::new();
        let removed = self.with_list_mut(|items| {
            let value = items.pop()?;
            Some((value, items.len()))
        });
        match removed {
            None => Value::Unit,
            Some((value, new_len)) => {
                self.trigger_key(TriggerOp::Delete, Some(DepKey::Index(new_len)), None);
                self.trigger_key(TriggerOp::Set, Some(DepKey::Length), Some(new_len));
                self.wrap(value)
            }
        }
    }

    /// Removes and returns the first element, or `Unit` when empty.
    pub fn shift(&self) -> Value {
        if self.refuse_write("shift") {
            return Value::Unit;
        }
        let _guard = PauseGuard::new();
        let removed = self.with_list_mut(|items| {
            if items.is_empty() {
                None
            } else {
                let v = items.remove(0);
                Some((v, items.len()))
            }
        });
        match removed {
            None => Value::Unit,
            Some((value, new_len)) => {
                for i in 0..new_len {
                    self.trigger_key(TriggerOp::Set, Some(DepKey::Index(i)), None);
                }
                self.trigger_key(TriggerOp::Delete, Some(DepKey::Index(new_len)), None);
                self.trigger_key(TriggerOp::Set, Some(DepKey::Length), Some(new_len));
                self.wrap(value)
            }
        }
    }

    /// Prepends an element and returns the new length.
    pub fn unshift(&self, value: impl Into<Value>) -> usize {
        if self.refuse_write("unshift") {
            return self.with_list(|items| items.len());
        }
        let _guard = PauseGuard::new();
        let mut value = value.into();
        if !self.shallow {
            value = to_raw(value);
        }
        let old_len = self.with_list_mut(|items| {
            let old_len = items.len();
            items.insert(0, value.clone());
            old_len
        });
        for i in 0..old_len {
            self.trigger_key(TriggerOp::Set, Some(DepKey::Index(i)), None);
        }
        self.trigger_key(TriggerOp::Add, Some(DepKey::Index(old_len)), None);
        old_len + 1
    }

    /// Inserts an element at `index`, shifting the tail.
    pub fn insert(&self, index: usize, value: impl Into<Value>) {
        if self.refuse_write("insert") {
            return;
        }
        let _guard = PauseGuard::new();
        let mut value = value.into();
        if !self.shallow {
            value = to_raw(value);
        }
        let old_len = self.with_list_mut(|items| {
            let old_len = items.len();
            let index = index.min(old_len);
            items.insert(index, value.clone());
            old_len
        });
        for i in index.min(old_len)..old_len {
            self.trigger_key(TriggerOp::Set, Some(DepKey::Index(i)), None);
        }
        self.trigger_key(TriggerOp::Add, Some(DepKey::Index(old_len)), None);
    }

    /// Removes and returns the element at `index`, shifting the tail.
    pub fn remove(&self, index: usize) -> Value {
        if self.refuse_write("remove") {
            return Value::Unit;
        }
        let _guard = PauseGuard::new();
        let removed = self.with_list_mut(|items| {
            if index < items.len() {
                let v = items.remove(index);
                Some((v, items.len()))
            } else {
                None
            }
        });
        match removed {
            None => Value::Unit,
            Some((value, new_len)) => {
                for i in index..new_len {
                    self.trigger_key(TriggerOp::Set, Some(DepKey::Index(i)), None);
                }
                self.trigger_key(TriggerOp::Delete, Some(DepKey::Index(new_len)), None);
                self.trigger_key(TriggerOp::Set, Some(DepKey::Length), Some(new_len));
                self.wrap(value)
            }
        }
    }

    /// Sets the list length directly, truncating or growing with `Unit`.
    /// Truncation notifies the length dep and every index dep at or beyond
    /// the new length.
    pub fn set_len(&self, new_len: usize) {
        if self.refuse_write("set_len") {
            return;
        }
        let changed = self.with_list_mut(|items| {
            if items.len() == new_len {
                false
            } else {
                items.resize(new_len, Value::Unit);
                true
            }
        });
        if changed {
            self.trigger_key(TriggerOp::Set, Some(DepKey::Length), Some(new_len));
        }
    }

    /// The index of the first element equal to `needle`, with strict
    /// equality (`NaN` is never found). Tracks every index, and retries
    /// with the raw-unwrapped needle when the proxy-eq pass finds nothing.
    pub fn index_of(&self, needle: &Value) -> Option<usize> {
        self.search(needle, false, false)
    }

    /// The index of the last element equal to `needle`.
    pub fn last_index_of(&self, needle: &Value) -> Option<usize> {
        self.search(needle, true, false)
    }

    /// Whether some element equals `needle`, NaN-aware.
    pub fn contains(&self, needle: &Value) -> bool {
        self.search(needle, false, true).is_some()
    }

    fn search(&self, needle: &Value, from_end: bool, nan_aware: bool) -> Option<usize> {
        let items = self.with_list(|items| items.clone());
        for i in 0..items.len() {
            self.track_key(TrackOp::Get, DepKey::Index(i));
        }
        let matches = |candidate: &Value, needle: &Value| {
            if !nan_aware {
                if let Value::Float(f) = needle {
                    if f.is_nan() {
                        return false;
                    }
                }
            }
            same_value(candidate, needle)
        };
        let find = |needle: &Value| {
            if from_end {
                items.iter().rposition(|v| matches(v, needle))
            } else {
                items.iter().position(|v| matches(v, needle))
            }
        };
        find(needle).or_else(|| {
            // Deep handles store raw values; a proxy needle can only match
            // after unwrapping.
            let raw = to_raw(needle.clone());
            if same_value(&raw, needle) {
                None
            } else {
                find(&raw)
            }
        })
    }

    /// Snapshots the list, wrapped per flavor. Tracks the length and every
    /// index.
    pub fn values(&self) -> Vec<Value> {
        let len = self.len();
        (0..len).map(|i| self.at(i)).collect()
    }
}
