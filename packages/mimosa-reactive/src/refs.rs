//! Reference cells: single-slot observables.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::dep::{self, DepId, TrackEvent, TrackOp, TriggerOp};
use crate::reactive::{is_readonly, is_shallow, to_raw, to_reactive, Reactive};
use crate::runtime::{self, PauseGuard};
use crate::value::{same_value, Value};

pub(crate) struct RefInner {
    kind: RefKind,
    /// Created lazily on first tracked read.
    dep: Cell<Option<DepId>>,
    shallow: bool,
}

enum RefKind {
    Plain {
        /// The exposed value; object writes are wrapped reactive unless the
        /// ref is shallow.
        value: RefCell<Value>,
        /// The pre-wrapping value, used for change comparison.
        raw_value: RefCell<Value>,
    },
    Custom {
        get: RefCell<Box<dyn FnMut() -> Value>>,
        set: RefCell<Box<dyn FnMut(Value)>>,
    },
    /// A view onto one property of a reactive record; reads and writes go
    /// through the proxy path and its deps.
    Prop { source: Reactive, key: String },
}

/// A single-slot observable.
///
/// Reading [`get`](Ref::get) inside an effect subscribes the effect to the
/// cell; writing a different value (NaN-aware) notifies subscribers. A deep
/// ref wraps object values as reactive proxies on write; a
/// [shallow](crate::create_shallow_ref) ref stores them untouched.
#[derive(Clone)]
pub struct Ref {
    pub(crate) inner: Rc<RefInner>,
}

/// Creates a deep reference cell.
///
/// # Example
/// ```
/// # use mimosa_reactive::*;
/// let count = create_ref(1);
/// let doubled = create_computed({
///     let count = count.clone();
///     move || count.get().as_int().unwrap() * 2
/// });
/// assert_eq!(doubled.get(), 2);
/// count.set(3);
/// assert_eq!(doubled.get(), 6);
/// ```
pub fn create_ref(value: impl Into<Value>) -> Ref {
    let value = value.into();
    Ref {
        inner: Rc::new(RefInner {
            kind: RefKind::Plain {
                raw_value: RefCell::new(to_raw(value.clone())),
                value: RefCell::new(to_reactive(value)),
            },
            dep: Cell::new(None),
            shallow: false,
        }),
    }
}

/// Creates a shallow reference cell: the value is stored as given, and only
/// replacing the value itself triggers.
pub fn create_shallow_ref(value: impl Into<Value>) -> Ref {
    let value = value.into();
    Ref {
        inner: Rc::new(RefInner {
            kind: RefKind::Plain {
                raw_value: RefCell::new(value.clone()),
                value: RefCell::new(value),
            },
            dep: Cell::new(None),
            shallow: true,
        }),
    }
}

impl Ref {
    /// Reads the value, tracking the cell on the active effect.
    pub fn get(&self) -> Value {
        match &self.inner.kind {
            RefKind::Plain { value, .. } => {
                track_ref_value(self);
                value.borrow().clone()
            }
            RefKind::Custom { get, .. } => (get.borrow_mut())(),
            RefKind::Prop { source, key } => source.get(key),
        }
    }

    /// Reads the value without tracking.
    pub fn get_untracked(&self) -> Value {
        let _guard = PauseGuard::new();
        self.get()
    }

    /// Writes the value. Triggers subscribers when the new value differs
    /// (NaN-aware) from the stored raw value.
    pub fn set(&self, value: impl Into<Value>) {
        let value = value.into();
        match &self.inner.kind {
            RefKind::Plain {
                value: slot,
                raw_value,
            } => {
                let direct =
                    self.inner.shallow || is_shallow(&value) || is_readonly(&value);
                let normalized = if direct { value } else { to_raw(value) };
                let changed = !same_value(&normalized, &raw_value.borrow());
                if changed {
                    *raw_value.borrow_mut() = normalized.clone();
                    *slot.borrow_mut() = if direct {
                        normalized
                    } else {
                        to_reactive(normalized)
                    };
                    trigger_ref_value(self);
                }
            }
            RefKind::Custom { set, .. } => (set.borrow_mut())(value),
            RefKind::Prop { source, key } => source.set(key, value),
        }
    }

    /// Whether this is a shallow cell.
    pub fn is_shallow(&self) -> bool {
        self.inner.shallow
    }

    /// Whether the two handles point at the same cell.
    pub fn same_cell(&self, other: &Ref) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn cell_id(&self) -> usize {
        Rc::as_ptr(&self.inner) as *const () as usize
    }
}

impl PartialEq for Ref {
    fn eq(&self, other: &Self) -> bool {
        self.same_cell(other)
    }
}
impl Eq for Ref {}

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner.kind {
            RefKind::Plain { raw_value, .. } => {
                write!(f, "Ref({:?})", raw_value.borrow())
            }
            RefKind::Custom { .. } => write!(f, "CustomRef"),
            RefKind::Prop { key, .. } => write!(f, "PropRef({key:?})"),
        }
    }
}

/// Tracks a read of the ref's private dep on the active effect.
pub(crate) fn track_ref_value(cell: &Ref) {
    runtime::with(|rt| {
        if !rt.tracking.get() || rt.active_effect.get().is_none() {
            return;
        }
        let dep = match cell.inner.dep.get() {
            Some(dep) => dep,
            None => {
                let dep = dep::create_dep(rt);
                cell.inner.dep.set(Some(dep));
                dep
            }
        };
        dep::track_dep(rt, dep, || TrackEvent {
            op: TrackOp::Get,
            target: None,
            key: None,
        });
    });
}

/// Notifies every subscriber of the ref's private dep.
pub(crate) fn trigger_ref_value(cell: &Ref) {
    if let Some(dep) = cell.inner.dep.get() {
        dep::trigger_deps(&[dep], TriggerOp::Set, None, None);
    }
}

/// Whether the value is a reference cell.
pub fn is_ref(value: &Value) -> bool {
    matches!(value, Value::Ref(_))
}

/// Unwraps a ref to its inner value (tracked); other values pass through.
pub fn unref(value: Value) -> Value {
    match value {
        Value::Ref(r) => r.get(),
        other => other,
    }
}

/// Force-notifies a ref's subscribers, for shallow refs whose inner value
/// was mutated in place.
pub fn trigger_ref(cell: &Ref) {
    trigger_ref_value(cell);
}

/// Lets a custom ref factory track reads of the cell at will.
#[derive(Clone)]
pub struct RefTracker {
    cell: Weak<RefInner>,
}

impl RefTracker {
    /// Records the cell as a dependency of the active effect.
    pub fn track(&self) {
        if let Some(inner) = self.cell.upgrade() {
            track_ref_value(&Ref { inner });
        }
    }
}

/// Lets a custom ref factory notify the cell's subscribers at will.
#[derive(Clone)]
pub struct RefTrigger {
    cell: Weak<RefInner>,
}

impl RefTrigger {
    /// Notifies every effect subscribed to the cell.
    pub fn trigger(&self) {
        if let Some(inner) = self.cell.upgrade() {
            trigger_ref_value(&Ref { inner });
        }
    }
}

/// Creates a ref with explicit control over tracking and triggering.
///
/// The factory receives a tracker and a trigger handle and returns the
/// getter and setter.
///
/// # Example
/// ```
/// # use mimosa_reactive::*;
/// # use std::cell::Cell;
/// # use std::rc::Rc;
/// let stored = Rc::new(Cell::new(0));
/// let cell = create_custom_ref(|tracker, trigger| {
///     let stored_get = stored.clone();
///     let stored_set = stored.clone();
///     (
///         move || {
///             tracker.track();
///             Value::Int(stored_get.get())
///         },
///         move |v: Value| {
///             stored_set.set(v.as_int().unwrap());
///             trigger.trigger();
///         },
///     )
/// });
/// cell.set(5);
/// assert_eq!(cell.get().as_int(), Some(5));
/// ```
pub fn create_custom_ref<G, S>(factory: impl FnOnce(RefTracker, RefTrigger) -> (G, S)) -> Ref
where
    G: FnMut() -> Value + 'static,
    S: FnMut(Value) + 'static,
{
    let inner = Rc::new_cyclic(|weak: &Weak<RefInner>| {
        let (get, set) = factory(
            RefTracker { cell: weak.clone() },
            RefTrigger { cell: weak.clone() },
        );
        RefInner {
            kind: RefKind::Custom {
                get: RefCell::new(Box::new(get)),
                set: RefCell::new(Box::new(set)),
            },
            dep: Cell::new(None),
            shallow: false,
        }
    });
    Ref { inner }
}

/// Creates a ref-shaped view onto one property of a reactive record.
/// Reads track the underlying `(target, key)`; writes go through the proxy.
pub fn to_value_ref(source: &Reactive, key: &str) -> Ref {
    Ref {
        inner: Rc::new(RefInner {
            kind: RefKind::Prop {
                source: source.clone(),
                key: key.to_string(),
            },
            dep: Cell::new(None),
            shallow: false,
        }),
    }
}

/// Expands a reactive record into one property ref per key.
pub fn to_value_refs(source: &Reactive) -> Vec<(String, Ref)> {
    let keys = runtime::untrack(|| source.keys());
    keys.into_iter()
        .map(|key| {
            let cell = to_value_ref(source, &key);
            (key, cell)
        })
        .collect()
}
