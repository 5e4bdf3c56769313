//! Computed cells: lazily recomputed derived observables.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::dep::{self, DepId, TrackEvent, TrackOp, TriggerEvent, TriggerOp};
use crate::effect::{self, EffectId, EffectOptions};
use crate::runtime;

/// A derived observable.
///
/// The getter runs inside an internal effect, so every observable it reads
/// becomes an upstream dependency. An upstream change only flips a dirty
/// bit and re-notifies subscribers; the value is recomputed on the next
/// read. Reads are cached while the cell is clean.
pub struct Computed<T: 'static> {
    effect: EffectId,
    dep: DepId,
    setter: Option<Rc<RefCell<dyn FnMut(T)>>>,
    cacheable: bool,
    _phantom: PhantomData<T>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Computed {
            effect: self.effect,
            dep: self.dep,
            setter: self.setter.clone(),
            cacheable: self.cacheable,
            _phantom: PhantomData,
        }
    }
}

/// Options for [`create_computed_with`].
pub struct ComputedOptions<T> {
    /// Makes the cell writable: invoked with the value passed to
    /// [`Computed::set`].
    pub setter: Option<Box<dyn FnMut(T)>>,
    /// Debug hook fired when the inner effect tracks a new dependency.
    pub on_track: Option<Box<dyn FnMut(&TrackEvent)>>,
    /// Debug hook fired when one of the inner effect's deps triggers.
    pub on_trigger: Option<Box<dyn FnMut(&TriggerEvent)>>,
}

impl<T> Default for ComputedOptions<T> {
    fn default() -> Self {
        ComputedOptions {
            setter: None,
            on_track: None,
            on_trigger: None,
        }
    }
}

/// Creates a readonly computed cell from a getter.
///
/// # Example
/// ```
/// # use mimosa_reactive::*;
/// let a = create_ref(1);
/// let b = create_computed({
///     let a = a.clone();
///     move || a.get().as_int().unwrap() + 1
/// });
/// let c = create_computed({
///     let b = b.clone();
///     move || b.get() * 10
/// });
/// assert_eq!(c.get(), 20);
/// a.set(2);
/// assert_eq!(c.get(), 30);
/// ```
pub fn create_computed<T: 'static>(getter: impl FnMut() -> T + 'static) -> Computed<T> {
    create_computed_with(getter, ComputedOptions::default())
}

/// Creates a writable computed cell from a getter and a setter.
pub fn create_writable_computed<T: 'static>(
    getter: impl FnMut() -> T + 'static,
    setter: impl FnMut(T) + 'static,
) -> Computed<T> {
    create_computed_with(
        getter,
        ComputedOptions {
            setter: Some(Box::new(setter)),
            ..Default::default()
        },
    )
}

/// Creates a computed cell with explicit [`ComputedOptions`].
pub fn create_computed_with<T: 'static>(
    mut getter: impl FnMut() -> T + 'static,
    options: ComputedOptions<T>,
) -> Computed<T> {
    let dep = runtime::with(dep::create_dep);
    let effect = effect::create_effect_node(
        Box::new(move |slot| {
            *slot = Some(Box::new(getter()));
        }),
        EffectOptions {
            lazy: true,
            on_track: options.on_track,
            on_trigger: options.on_trigger,
            ..Default::default()
        },
        true,
    );
    // An upstream trigger only marks the cell dirty; subscribers are
    // re-notified once per dirtying.
    effect::set_scheduler(
        effect,
        Rc::new(move || {
            let was_dirty = runtime::with(|rt| {
                let mut effects = rt.effects.borrow_mut();
                match effects.get_mut(effect) {
                    Some(node) => std::mem::replace(&mut node.dirty, true),
                    None => true,
                }
            });
            if !was_dirty {
                dep::trigger_deps(&[dep], TriggerOp::Set, None, None);
            }
        }),
    );
    let cacheable = !runtime::is_ssr();
    if !cacheable {
        // Under SSR the cell never subscribes: the getter runs untracked on
        // every read.
        runtime::with(|rt| {
            if let Some(node) = rt.effects.borrow_mut().get_mut(effect) {
                node.active = false;
            }
        });
    }
    Computed {
        effect,
        dep,
        setter: options.setter.map(|s| Rc::new(RefCell::new(s)) as Rc<RefCell<dyn FnMut(T)>>),
        cacheable,
        _phantom: PhantomData,
    }
}

impl<T: 'static> Computed<T> {
    /// Reads the value, tracking the cell on the active effect and
    /// recomputing first if an upstream dependency changed since the last
    /// read.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        runtime::with(|rt| {
            dep::track_dep(rt, self.dep, || TrackEvent {
                op: TrackOp::Get,
                target: None,
                key: None,
            });
        });
        let dirty = runtime::with(|rt| {
            rt.effects
                .borrow()
                .get(self.effect)
                .is_some_and(|node| node.dirty)
        });
        if dirty || !self.cacheable {
            runtime::with(|rt| {
                if let Some(node) = rt.effects.borrow_mut().get_mut(self.effect) {
                    node.dirty = false;
                }
            });
            effect::run_effect(self.effect);
        }
        effect::effect_value(self.effect)
    }

    /// Invokes the setter. Writing to a computed without one warns and does
    /// nothing.
    pub fn set(&self, value: T) {
        match &self.setter {
            Some(setter) => (setter.borrow_mut())(value),
            None => tracing::warn!("write to a computed cell without a setter was ignored"),
        }
    }

    /// Whether the cell has a setter.
    pub fn is_writable(&self) -> bool {
        self.setter.is_some()
    }

    /// Records the cell as a dependency of the active effect without
    /// reading or recomputing it.
    pub(crate) fn track_cell(&self) {
        runtime::with(|rt| {
            dep::track_dep(rt, self.dep, || TrackEvent {
                op: TrackOp::Get,
                target: None,
                key: None,
            });
        });
    }

    /// Stops the inner effect: the cell detaches from its upstream deps.
    /// Reads keep serving the last computed value, since nothing marks the
    /// cell dirty anymore.
    pub fn stop(&self) {
        effect::stop_effect(self.effect);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use crate::*;

    #[test]
    fn computed_chain_propagates() {
        let a = create_ref(1);
        let b = create_computed({
            let a = a.clone();
            move || a.get().as_int().unwrap() + 1
        });
        let c = create_computed({
            let b = b.clone();
            move || b.get() * 10
        });
        let runs: Rc<std::cell::RefCell<Vec<i64>>> = Rc::default();
        create_effect({
            let (c, runs) = (c.clone(), runs.clone());
            move || runs.borrow_mut().push(c.get())
        });
        assert_eq!(*runs.borrow(), vec![20]);
        a.set(2);
        assert_eq!(*runs.borrow(), vec![20, 30]);
    }

    #[test]
    fn reads_are_cached_while_clean() {
        let a = create_ref(1);
        let computations = Rc::new(Cell::new(0));
        let b = create_computed({
            let (a, computations) = (a.clone(), computations.clone());
            move || {
                computations.set(computations.get() + 1);
                a.get().as_int().unwrap() * 2
            }
        });
        assert_eq!(b.get(), 2);
        assert_eq!(b.get(), 2);
        assert_eq!(computations.get(), 1);
        a.set(2);
        assert_eq!(computations.get(), 1); // lazy: nothing recomputed yet
        assert_eq!(b.get(), 4);
        assert_eq!(computations.get(), 2);
    }

    #[test]
    fn unobserved_computed_stays_lazy() {
        let a = create_ref(1);
        let computations = Rc::new(Cell::new(0));
        let b = create_computed({
            let (a, computations) = (a.clone(), computations.clone());
            move || {
                computations.set(computations.get() + 1);
                a.get().as_int().unwrap()
            }
        });
        assert_eq!(computations.get(), 0); // not even computed yet
        assert_eq!(b.get(), 1);
        a.set(2);
        a.set(3);
        // No subscriber forced a recompute.
        assert_eq!(computations.get(), 1);
        assert_eq!(b.get(), 3);
        assert_eq!(computations.get(), 2);
    }

    #[test]
    fn dirtying_notifies_subscribers_once() {
        let a = create_ref(1);
        let b = create_computed({
            let a = a.clone();
            move || a.get().as_int().unwrap()
        });
        let runs = Rc::new(Cell::new(0));
        create_effect({
            let (b, runs) = (b.clone(), runs.clone());
            move || {
                b.get();
                runs.set(runs.get() + 1);
            }
        });
        assert_eq!(runs.get(), 1);
        a.set(2);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn writable_computed_routes_through_setter() {
        let a = create_ref(1);
        let plus_one = create_writable_computed(
            {
                let a = a.clone();
                move || a.get().as_int().unwrap() + 1
            },
            {
                let a = a.clone();
                move |v: i64| a.set(v - 1)
            },
        );
        assert_eq!(plus_one.get(), 2);
        plus_one.set(10);
        assert_eq!(a.get_untracked().as_int(), Some(9));
        assert_eq!(plus_one.get(), 10);
    }

    #[test]
    fn readonly_computed_warns_on_set() {
        let c = create_computed(|| 1);
        assert!(!c.is_writable());
        c.set(5); // warns, no effect
        assert_eq!(c.get(), 1);
    }

    #[test]
    fn ssr_computed_neither_caches_nor_subscribes() {
        set_ssr_mode(true);
        let a = create_ref(1);
        let computations = Rc::new(Cell::new(0));
        let b = create_computed({
            let (a, computations) = (a.clone(), computations.clone());
            move || {
                computations.set(computations.get() + 1);
                a.get().as_int().unwrap()
            }
        });
        set_ssr_mode(false);
        assert_eq!(b.get(), 1);
        assert_eq!(b.get(), 1);
        // Every read recomputes.
        assert_eq!(computations.get(), 2);
        // And no subscription was established.
        let runs = Rc::new(Cell::new(0));
        create_effect({
            let (b, runs) = (b.clone(), runs.clone());
            move || {
                b.get();
                runs.set(runs.get() + 1);
            }
        });
        a.set(2);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn stopped_computed_serves_the_cached_value() {
        let a = create_ref(1);
        let b = create_computed({
            let a = a.clone();
            move || a.get().as_int().unwrap()
        });
        assert_eq!(b.get(), 1);
        b.stop();
        a.set(2);
        // Nothing marks the cell dirty anymore.
        assert_eq!(b.get(), 1);
    }
}
