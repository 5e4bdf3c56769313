//! Tracked computations.
//!
//! An effect owns a body closure and the list of deps it subscribed to on
//! its last run. Running an effect installs it as the active tracker, stamps
//! every dep it reads with the run serial, and sweeps edges that were not
//! re-stamped — dependencies are pruned exactly when the body stops reading
//! them.

use std::any::Any;
use std::marker::PhantomData;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::rc::Rc;

use slotmap::new_key_type;
use smallvec::SmallVec;

use crate::dep::{DepId, TrackEvent, TriggerEvent};
use crate::runtime::{self, Runtime, TrackGuard};
use crate::scope;

new_key_type! {
    pub(crate) struct EffectId;
}

type EffectBody = Box<dyn FnMut(&mut Option<Box<dyn Any>>)>;

pub(crate) struct EffectNode {
    /// Body; writes its result into the value slot. Taken out while running.
    pub callback: Option<EffectBody>,
    /// Result of the last run.
    pub value: Option<Box<dyn Any>>,
    /// Invoked on trigger instead of `run` when present. `Rc<dyn Fn>` so a
    /// scheduler can re-enter itself (a sync watcher writing its own
    /// source).
    pub scheduler: Option<Rc<dyn Fn()>>,
    pub on_stop: Option<Box<dyn FnOnce()>>,
    pub on_track: Option<Box<dyn FnMut(&TrackEvent)>>,
    pub on_trigger: Option<Box<dyn FnMut(&TriggerEvent)>>,
    /// Deps this effect currently subscribes to.
    pub deps: SmallVec<[DepId; 4]>,
    /// The previously active effect, restored when the run exits.
    pub parent: Option<EffectId>,
    /// Serial of the current (or last) run; edges stamped with it survive
    /// the post-run sweep.
    pub run_serial: u64,
    pub active: bool,
    pub running: bool,
    pub defer_stop: bool,
    pub allow_recurse: bool,
    /// Computed effects are notified before plain effects.
    pub computed: bool,
    /// Dirty marker for computed cells.
    pub dirty: bool,
}

/// Options for [`create_effect_with`].
#[derive(Default)]
pub struct EffectOptions {
    /// Do not run the effect on creation.
    pub lazy: bool,
    /// Invoked on trigger instead of re-running the effect.
    pub scheduler: Option<Rc<dyn Fn()>>,
    /// Allow the effect to be scheduled by its own trigger.
    pub allow_recurse: bool,
    /// Invoked once when the effect is stopped.
    pub on_stop: Option<Box<dyn FnOnce()>>,
    /// Debug hook fired when the effect tracks a new dependency.
    pub on_track: Option<Box<dyn FnMut(&TrackEvent)>>,
    /// Debug hook fired when one of the effect's deps triggers.
    pub on_trigger: Option<Box<dyn FnMut(&TriggerEvent)>>,
}

pub(crate) fn create_effect_node(
    callback: EffectBody,
    options: EffectOptions,
    computed: bool,
) -> EffectId {
    let id = runtime::with(|rt| {
        rt.effects.borrow_mut().insert(EffectNode {
            callback: Some(callback),
            value: None,
            scheduler: options.scheduler,
            on_stop: options.on_stop,
            on_track: options.on_track,
            on_trigger: options.on_trigger,
            deps: SmallVec::new(),
            parent: None,
            run_serial: 0,
            active: true,
            running: false,
            defer_stop: false,
            allow_recurse: options.allow_recurse,
            computed,
            dirty: computed,
        })
    });
    scope::record_effect(id);
    if !options.lazy {
        run_effect(id);
    }
    id
}

/// Executes the effect's body.
///
/// A stopped effect's body is evaluated without installing the effect as
/// the tracker. A run that would re-enter an effect already on the active
/// chain is a no-op unless the effect allows recursion.
pub(crate) fn run_effect(id: EffectId) {
    runtime::with(|rt| {
        let (active, allow_recurse) = {
            let effects = rt.effects.borrow();
            let Some(node) = effects.get(id) else {
                return;
            };
            (node.active, node.allow_recurse)
        };

        if active {
            let mut cursor = rt.active_effect.get();
            while let Some(e) = cursor {
                if e == id {
                    if !allow_recurse {
                        return;
                    }
                    break;
                }
                cursor = rt.effects.borrow()[e].parent;
            }
        }

        let (mut callback, mut value) = {
            let mut effects = rt.effects.borrow_mut();
            let node = &mut effects[id];
            match node.callback.take() {
                // Already taken: a recursive run got through; nothing to do.
                None => return,
                Some(callback) => (callback, node.value.take()),
            }
        };

        if !active {
            let outcome = catch_unwind(AssertUnwindSafe(|| callback(&mut value)));
            restore_body(rt, id, callback, value);
            if let Err(payload) = outcome {
                resume_unwind(payload);
            }
            return;
        }

        let serial = rt.run_serial.get() + 1;
        rt.run_serial.set(serial);
        {
            let mut effects = rt.effects.borrow_mut();
            let node = &mut effects[id];
            node.parent = rt.active_effect.get();
            node.run_serial = serial;
            node.running = true;
        }
        rt.active_effect.set(Some(id));
        let track_guard = TrackGuard::new();

        let outcome = catch_unwind(AssertUnwindSafe(|| callback(&mut value)));

        restore_body(rt, id, callback, value);
        sweep_stale_deps(rt, id, serial);
        let parent = {
            let mut effects = rt.effects.borrow_mut();
            let node = &mut effects[id];
            node.running = false;
            node.parent.take()
        };
        rt.active_effect.set(parent);
        drop(track_guard);

        let defer = rt.effects.borrow()[id].defer_stop;
        if defer {
            stop_effect(id);
        }
        if let Err(payload) = outcome {
            resume_unwind(payload);
        }
    });
}

fn restore_body(
    rt: &Runtime,
    id: EffectId,
    callback: EffectBody,
    value: Option<Box<dyn Any>>,
) {
    let mut effects = rt.effects.borrow_mut();
    if let Some(node) = effects.get_mut(id) {
        node.callback = Some(callback);
        node.value = value;
    }
}

/// Removes every edge that was not re-stamped during the run with `serial`.
fn sweep_stale_deps(rt: &Runtime, id: EffectId, serial: u64) {
    let deps = {
        let mut effects = rt.effects.borrow_mut();
        std::mem::take(&mut effects[id].deps)
    };
    let mut kept = SmallVec::new();
    {
        let mut dep_arena = rt.deps.borrow_mut();
        for dep_id in deps {
            let Some(dep) = dep_arena.get_mut(dep_id) else {
                continue;
            };
            match dep.subscribers.get(&id) {
                Some(&stamp) if stamp == serial => kept.push(dep_id),
                Some(_) => {
                    dep.subscribers.shift_remove(&id);
                }
                None => {}
            }
        }
    }
    rt.effects.borrow_mut()[id].deps = kept;
}

/// Detaches the effect from every dep and marks it inactive. Idempotent.
/// Stopping a running effect defers the teardown to the end of the run.
pub(crate) fn stop_effect(id: EffectId) {
    runtime::with(|rt| {
        let deps = {
            let mut effects = rt.effects.borrow_mut();
            let Some(node) = effects.get_mut(id) else {
                return;
            };
            if !node.active {
                return;
            }
            if node.running {
                node.defer_stop = true;
                return;
            }
            node.active = false;
            node.defer_stop = false;
            std::mem::take(&mut node.deps)
        };
        {
            let mut dep_arena = rt.deps.borrow_mut();
            for dep in deps {
                if let Some(dep) = dep_arena.get_mut(dep) {
                    dep.subscribers.shift_remove(&id);
                }
            }
        }
        let on_stop = rt.effects.borrow_mut()[id].on_stop.take();
        if let Some(on_stop) = on_stop {
            on_stop();
        }
    });
}

pub(crate) fn is_effect_active(id: EffectId) -> bool {
    runtime::with(|rt| rt.effects.borrow().get(id).is_some_and(|n| n.active))
}

/// Clones the value produced by the effect's last run.
#[track_caller]
pub(crate) fn effect_value<T: Clone + 'static>(id: EffectId) -> T {
    runtime::with(|rt| {
        let effects = rt.effects.borrow();
        effects[id]
            .value
            .as_ref()
            .expect("effect has not produced a value")
            .downcast_ref::<T>()
            .expect("wrong effect value type")
            .clone()
    })
}

pub(crate) fn fire_on_track(
    rt: &Runtime,
    id: EffectId,
    event: impl FnOnce() -> TrackEvent,
) {
    let hook = match rt.effects.borrow_mut().get_mut(id) {
        Some(node) => node.on_track.take(),
        None => None,
    };
    if let Some(mut hook) = hook {
        hook(&event());
        if let Some(node) = rt.effects.borrow_mut().get_mut(id) {
            node.on_track = Some(hook);
        }
    }
}

pub(crate) fn fire_on_trigger(
    rt: &Runtime,
    id: EffectId,
    event: impl FnOnce() -> TriggerEvent,
) {
    let hook = match rt.effects.borrow_mut().get_mut(id) {
        Some(node) => node.on_trigger.take(),
        None => None,
    };
    if let Some(mut hook) = hook {
        hook(&event());
        if let Some(node) = rt.effects.borrow_mut().get_mut(id) {
            node.on_trigger = Some(hook);
        }
    }
}

pub(crate) fn set_scheduler(id: EffectId, scheduler: Rc<dyn Fn()>) {
    runtime::with(|rt| {
        if let Some(node) = rt.effects.borrow_mut().get_mut(id) {
            node.scheduler = Some(scheduler);
        }
    });
}

pub(crate) fn set_effect_on_stop(id: EffectId, on_stop: Box<dyn FnOnce()>) {
    runtime::with(|rt| {
        if let Some(node) = rt.effects.borrow_mut().get_mut(id) {
            node.on_stop = Some(on_stop);
        }
    });
}

/// A handle to a tracked computation.
///
/// The handle is `Copy` and refers to state owned by the thread-local
/// runtime, so it can be moved into closures freely.
pub struct Effect<T: 'static = ()> {
    pub(crate) id: EffectId,
    _phantom: PhantomData<T>,
}

impl<T> Clone for Effect<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Effect<T> {}

impl<T> Effect<T> {
    /// Re-runs the effect body while tracking its reads, and returns the
    /// result.
    pub fn run(&self) -> T
    where
        T: Clone,
    {
        run_effect(self.id);
        effect_value(self.id)
    }

    /// Stops the effect: detaches it from every dep it subscribes to and
    /// fires its `on_stop` handler. Idempotent. A stopped effect can still
    /// be [`run`](Effect::run), but no longer tracks anything.
    pub fn stop(&self) {
        stop_effect(self.id);
    }

    /// Whether the effect has not been stopped.
    pub fn is_active(&self) -> bool {
        is_effect_active(self.id)
    }
}

/// Creates an effect: runs `f` immediately while tracking every observable
/// read, and re-runs it whenever one of those observables changes.
///
/// # Example
/// ```
/// # use mimosa_reactive::*;
/// let count = create_ref(0);
/// let seen = create_ref(-1);
/// create_effect({
///     let (count, seen) = (count.clone(), seen.clone());
///     move || seen.set(count.get())
/// });
/// assert_eq!(seen.get_untracked().as_int(), Some(0));
/// count.set(1);
/// assert_eq!(seen.get_untracked().as_int(), Some(1));
/// ```
pub fn create_effect<T: 'static>(f: impl FnMut() -> T + 'static) -> Effect<T> {
    create_effect_with(f, EffectOptions::default())
}

/// Creates an effect with explicit [`EffectOptions`].
pub fn create_effect_with<T: 'static>(
    mut f: impl FnMut() -> T + 'static,
    options: EffectOptions,
) -> Effect<T> {
    let callback: EffectBody = Box::new(move |slot| {
        *slot = Some(Box::new(f()));
    });
    let id = create_effect_node(callback, options, false);
    Effect {
        id,
        _phantom: PhantomData,
    }
}

/// Stops the given effect. Equivalent to [`Effect::stop`].
pub fn stop<T>(runner: Effect<T>) {
    runner.stop();
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use crate::*;

    #[test]
    fn effect_runs_on_creation_and_on_change() {
        let state = create_ref(1);
        let runs = Rc::new(Cell::new(0));
        create_effect({
            let (state, runs) = (state.clone(), runs.clone());
            move || {
                state.get();
                runs.set(runs.get() + 1);
            }
        });
        assert_eq!(runs.get(), 1);
        state.set(2);
        assert_eq!(runs.get(), 2);
        // Same value: no trigger.
        state.set(2);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn effect_subscribes_once_per_dep() {
        let state = create_ref(0);
        let runs = Rc::new(Cell::new(0));
        create_effect({
            let (state, runs) = (state.clone(), runs.clone());
            move || {
                runs.set(runs.get() + 1);
                state.get();
                state.get();
            }
        });
        assert_eq!(runs.get(), 1);
        state.set(1);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn dependencies_are_pruned_between_runs() {
        let condition = create_ref(true);
        let left = create_ref(0);
        let right = create_ref(0);
        let runs = Rc::new(Cell::new(0));
        create_effect({
            let (condition, left, right, runs) = (
                condition.clone(),
                left.clone(),
                right.clone(),
                runs.clone(),
            );
            move || {
                runs.set(runs.get() + 1);
                if condition.get().as_bool().unwrap() {
                    left.get();
                } else {
                    right.get();
                }
            }
        });
        assert_eq!(runs.get(), 1);

        left.set(1);
        assert_eq!(runs.get(), 2);
        right.set(1);
        assert_eq!(runs.get(), 2); // not tracked

        condition.set(false);
        assert_eq!(runs.get(), 3);

        left.set(2);
        assert_eq!(runs.get(), 3); // no longer tracked
        right.set(2);
        assert_eq!(runs.get(), 4);
    }

    #[test]
    fn stop_is_idempotent() {
        let state = create_ref(0);
        let runs = Rc::new(Cell::new(0));
        let effect = create_effect({
            let (state, runs) = (state.clone(), runs.clone());
            move || {
                state.get();
                runs.set(runs.get() + 1);
            }
        });
        assert_eq!(runs.get(), 1);
        effect.stop();
        effect.stop();
        state.set(1);
        assert_eq!(runs.get(), 1);
        assert!(!effect.is_active());
    }

    #[test]
    fn stopped_effect_runs_untracked() {
        let state = create_ref(0);
        let runs = Rc::new(Cell::new(0));
        let effect = create_effect({
            let (state, runs) = (state.clone(), runs.clone());
            move || {
                state.get();
                runs.set(runs.get() + 1);
            }
        });
        effect.stop();
        effect.run();
        assert_eq!(runs.get(), 2);
        // The manual run did not resubscribe.
        state.set(1);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn stopping_inside_the_run_is_deferred() {
        let state = create_ref(0);
        let handle: Rc<Cell<Option<Effect<()>>>> = Rc::new(Cell::new(None));
        let effect = create_effect_with(
            {
                let (state, handle) = (state.clone(), handle.clone());
                move || {
                    state.get();
                    if let Some(own) = handle.get() {
                        own.stop();
                    }
                }
            },
            EffectOptions {
                lazy: true,
                ..Default::default()
            },
        );
        handle.set(Some(effect));
        effect.run();
        assert!(!effect.is_active());
        state.set(1); // must not re-run the stopped effect
    }

    #[test]
    fn effect_cannot_trigger_itself() {
        let state = create_ref(0);
        let runs = Rc::new(Cell::new(0));
        create_effect({
            let (state, runs) = (state.clone(), runs.clone());
            move || {
                runs.set(runs.get() + 1);
                let n = state.get().as_int().unwrap();
                state.set(n + 1);
            }
        });
        // Ran once; the self-write did not re-enter.
        assert_eq!(runs.get(), 1);
        assert_eq!(state.get_untracked().as_int(), Some(1));
    }

    #[test]
    fn on_stop_fires_once() {
        let stopped = Rc::new(Cell::new(0));
        let effect = create_effect_with(
            || {},
            EffectOptions {
                on_stop: Some(Box::new({
                    let stopped = stopped.clone();
                    move || stopped.set(stopped.get() + 1)
                })),
                ..Default::default()
            },
        );
        effect.stop();
        effect.stop();
        assert_eq!(stopped.get(), 1);
    }

    #[test]
    fn scheduler_replaces_run() {
        let state = create_ref(0);
        let scheduled = Rc::new(Cell::new(0));
        let runs = Rc::new(Cell::new(0));
        create_effect_with(
            {
                let (state, runs) = (state.clone(), runs.clone());
                move || {
                    state.get();
                    runs.set(runs.get() + 1);
                }
            },
            EffectOptions {
                scheduler: Some(Rc::new({
                    let scheduled = scheduled.clone();
                    move || scheduled.set(scheduled.get() + 1)
                })),
                ..Default::default()
            },
        );
        assert_eq!((runs.get(), scheduled.get()), (1, 0));
        state.set(1);
        assert_eq!((runs.get(), scheduled.get()), (1, 1));
    }

    #[test]
    fn on_track_reports_new_edges() {
        let state = create_ref(0);
        let tracked = Rc::new(Cell::new(0));
        create_effect_with(
            {
                let state = state.clone();
                move || {
                    state.get();
                    state.get();
                }
            },
            EffectOptions {
                on_track: Some(Box::new({
                    let tracked = tracked.clone();
                    move |_event| tracked.set(tracked.get() + 1)
                })),
                ..Default::default()
            },
        );
        // Two reads, one edge.
        assert_eq!(tracked.get(), 1);
    }
}
