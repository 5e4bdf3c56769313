//! Watchers: user-facing subscriptions over reactive sources.
//!
//! A watcher normalizes its source into a getter, runs the getter inside a
//! lazy effect, and wraps re-runs in a job dispatched according to the
//! flush mode: `Sync` runs inline inside the trigger, `Pre` and `Post` go
//! through the scheduler surface.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use crate::dep::{TrackEvent, TriggerEvent};
use crate::effect::{self, EffectId, EffectOptions};
use crate::errors::{self, ErrorCode};
use crate::reactive::Reactive;
use crate::refs::Ref;
use crate::scheduler::{self, Job};
use crate::scope::{self, ScopeId};
use crate::computed::Computed;
use crate::value::{same_value, Obj, RawData, TargetKind, Value};

/// When a watcher's job runs relative to the host's render cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushMode {
    /// Queue the job to run before render (the default).
    #[default]
    Pre,
    /// Queue the job to run after render.
    Post,
    /// Run the job inline, inside the mutating call that triggered it.
    Sync,
}

/// Options for [`watch_with`] and [`watch_effect_with`].
#[derive(Default)]
pub struct WatchOptions {
    /// Call the callback immediately with the initial value.
    pub immediate: bool,
    /// Deeply traverse the source so nested mutations trigger, and fire the
    /// callback even when the top-level value compares equal.
    pub deep: bool,
    /// When the job runs.
    pub flush: FlushMode,
    /// Debug hook fired when the watcher's effect tracks a new dependency.
    pub on_track: Option<Box<dyn FnMut(&TrackEvent)>>,
    /// Debug hook fired when one of the watcher's deps triggers.
    pub on_trigger: Option<Box<dyn FnMut(&TriggerEvent)>>,
}

/// A normalized watch source.
pub enum WatchSource {
    /// A reference cell; the getter reads its value.
    Ref(Ref),
    /// A reactive proxy; implies a deep, force-triggered watcher.
    Reactive(Reactive),
    /// An arbitrary getter.
    Getter(Box<dyn FnMut() -> Value>),
    /// Several sources watched together; the callback sees lists of values.
    Many(Vec<WatchSource>),
}

/// Conversion into a [`WatchSource`], implemented for refs, computed cells,
/// reactive proxies, closures, and tuples thereof.
pub trait IntoWatchSource {
    /// Performs the conversion.
    fn into_watch_source(self) -> WatchSource;
}

impl IntoWatchSource for WatchSource {
    fn into_watch_source(self) -> WatchSource {
        self
    }
}
impl IntoWatchSource for Ref {
    fn into_watch_source(self) -> WatchSource {
        WatchSource::Ref(self)
    }
}
impl IntoWatchSource for &Ref {
    fn into_watch_source(self) -> WatchSource {
        WatchSource::Ref(self.clone())
    }
}
impl IntoWatchSource for Reactive {
    fn into_watch_source(self) -> WatchSource {
        WatchSource::Reactive(self)
    }
}
impl IntoWatchSource for &Reactive {
    fn into_watch_source(self) -> WatchSource {
        WatchSource::Reactive(self.clone())
    }
}
impl<T: Into<Value> + Clone + 'static> IntoWatchSource for Computed<T> {
    fn into_watch_source(self) -> WatchSource {
        WatchSource::Getter(Box::new(move || self.get().into()))
    }
}
impl<F: FnMut() -> Value + 'static> IntoWatchSource for F {
    fn into_watch_source(self) -> WatchSource {
        WatchSource::Getter(Box::new(self))
    }
}
impl IntoWatchSource for Vec<WatchSource> {
    fn into_watch_source(self) -> WatchSource {
        WatchSource::Many(self)
    }
}

macro_rules! impl_into_watch_source_for_tuple {
    ($($T:ident),*) => {
        paste::paste! {
            impl<$($T: IntoWatchSource),*> IntoWatchSource for ($($T,)*) {
                fn into_watch_source(self) -> WatchSource {
                    let ($([<$T:lower>],)*) = self;
                    WatchSource::Many(vec![$([<$T:lower>].into_watch_source()),*])
                }
            }
        }
    };
}

impl_into_watch_source_for_tuple!(A, B);
impl_into_watch_source_for_tuple!(A, B, C);
impl_into_watch_source_for_tuple!(A, B, C, D);
impl_into_watch_source_for_tuple!(A, B, C, D, E);
impl_into_watch_source_for_tuple!(A, B, C, D, E, F);
impl_into_watch_source_for_tuple!(A, B, C, D, E, F, G);
impl_into_watch_source_for_tuple!(A, B, C, D, E, F, G, H);

/// Registers a cleanup to run before the next callback invocation and when
/// the watcher stops.
pub struct OnCleanup {
    slot: Rc<RefCell<Option<Box<dyn FnOnce()>>>>,
}

impl OnCleanup {
    /// Registers `f`, replacing any cleanup registered earlier in the same
    /// run.
    pub fn register(&self, f: impl FnOnce() + 'static) {
        *self.slot.borrow_mut() = Some(Box::new(f));
    }
}

/// A stop handle for a watcher.
///
/// Dropping the handle does not stop the watcher; call
/// [`stop`](WatchHandle::stop), or stop the owning scope.
pub struct WatchHandle {
    effect: EffectId,
    scope: Option<ScopeId>,
}

impl WatchHandle {
    /// Stops the watcher: detaches its effect and removes it from the
    /// owning scope's registry. Pending queued jobs become no-ops.
    pub fn stop(&self) {
        effect::stop_effect(self.effect);
        if let Some(scope) = self.scope {
            scope::remove_effect(scope, self.effect);
        }
    }
}

type CleanupSlot = Rc<RefCell<Option<Box<dyn FnOnce()>>>>;
type WatchCallback = Box<dyn FnMut(&Value, &Value, &OnCleanup)>;

/// Watches a source and calls `cb(new, old, on_cleanup)` once per change.
/// The old value is `Unit` on the first call.
///
/// # Example
/// ```
/// # use mimosa_reactive::*;
/// # use std::cell::RefCell;
/// # use std::rc::Rc;
/// let count = create_ref(0);
/// let log: Rc<RefCell<Vec<i64>>> = Rc::default();
/// let handle = watch(&count, {
///     let log = log.clone();
///     move |new, _old, _cleanup| log.borrow_mut().push(new.as_int().unwrap())
/// });
/// count.set(1);
/// flush_jobs(); // watchers default to the pre-flush queue
/// assert_eq!(*log.borrow(), vec![1]);
/// handle.stop();
/// ```
pub fn watch(
    source: impl IntoWatchSource,
    cb: impl FnMut(&Value, &Value, &OnCleanup) + 'static,
) -> WatchHandle {
    watch_with(source, cb, WatchOptions::default())
}

/// [`watch`] with explicit [`WatchOptions`].
pub fn watch_with(
    source: impl IntoWatchSource,
    cb: impl FnMut(&Value, &Value, &OnCleanup) + 'static,
    options: WatchOptions,
) -> WatchHandle {
    let cleanup: CleanupSlot = Rc::default();
    let normalized = normalize_source(source.into_watch_source());
    do_watch(normalized, Some(Box::new(cb)), cleanup, options)
}

/// Runs `f` immediately and re-runs it whenever any observable it read
/// changes. `f` receives an [`OnCleanup`] registrar.
pub fn watch_effect(f: impl FnMut(&OnCleanup) + 'static) -> WatchHandle {
    watch_effect_with(f, WatchOptions::default())
}

/// [`watch_effect`] with explicit flush mode and debug hooks; the
/// `immediate` and `deep` options have no meaning here and are ignored.
pub fn watch_effect_with(
    mut f: impl FnMut(&OnCleanup) + 'static,
    options: WatchOptions,
) -> WatchHandle {
    let cleanup: CleanupSlot = Rc::default();
    let getter = {
        let cleanup = cleanup.clone();
        Box::new(move || {
            if let Some(pending) = cleanup.borrow_mut().take() {
                errors::call_with_handling(ErrorCode::WatchCleanup, pending);
            }
            let registrar = OnCleanup {
                slot: cleanup.clone(),
            };
            errors::call_with_handling(ErrorCode::WatchCallback, || f(&registrar));
            Value::Unit
        })
    };
    let normalized = NormalizedSource {
        getter,
        multi: false,
        force_trigger: false,
        deep: false,
    };
    do_watch(normalized, None, cleanup, options)
}

/// [`watch_effect`] flushed after render.
pub fn watch_post_effect(f: impl FnMut(&OnCleanup) + 'static) -> WatchHandle {
    watch_effect_with(
        f,
        WatchOptions {
            flush: FlushMode::Post,
            ..Default::default()
        },
    )
}

/// [`watch_effect`] flushed synchronously inside the mutating call.
pub fn watch_sync_effect(f: impl FnMut(&OnCleanup) + 'static) -> WatchHandle {
    watch_effect_with(
        f,
        WatchOptions {
            flush: FlushMode::Sync,
            ..Default::default()
        },
    )
}

struct NormalizedSource {
    getter: Box<dyn FnMut() -> Value>,
    multi: bool,
    force_trigger: bool,
    /// Deep forced by the source shape (a reactive proxy), regardless of
    /// the option.
    deep: bool,
}

fn normalize_source(source: WatchSource) -> NormalizedSource {
    match source {
        WatchSource::Ref(cell) => NormalizedSource {
            force_trigger: cell.is_shallow(),
            getter: Box::new(move || cell.get()),
            multi: false,
            deep: false,
        },
        WatchSource::Reactive(proxy) => NormalizedSource {
            getter: Box::new(move || Value::Reactive(proxy.clone())),
            multi: false,
            force_trigger: true,
            deep: true,
        },
        WatchSource::Getter(mut f) => NormalizedSource {
            getter: Box::new(move || {
                errors::call_with_handling(ErrorCode::WatchGetter, &mut f).unwrap_or_default()
            }),
            multi: false,
            force_trigger: false,
            deep: false,
        },
        WatchSource::Many(sources) => {
            let mut force_trigger = false;
            let mut getters: Vec<Box<dyn FnMut() -> Value>> = Vec::with_capacity(sources.len());
            for source in sources {
                match source {
                    WatchSource::Ref(cell) => {
                        force_trigger |= cell.is_shallow();
                        getters.push(Box::new(move || cell.get()));
                    }
                    WatchSource::Reactive(proxy) => {
                        force_trigger = true;
                        getters.push(Box::new(move || {
                            let value = Value::Reactive(proxy.clone());
                            traverse(&value);
                            value
                        }));
                    }
                    WatchSource::Getter(mut f) => {
                        getters.push(Box::new(move || {
                            errors::call_with_handling(ErrorCode::WatchGetter, &mut f)
                                .unwrap_or_default()
                        }));
                    }
                    WatchSource::Many(_) => {
                        tracing::warn!("invalid nested multi-source in watch; ignored");
                        getters.push(Box::new(|| Value::Unit));
                    }
                }
            }
            NormalizedSource {
                getter: Box::new(move || {
                    Value::Obj(Obj::list(getters.iter_mut().map(|g| g()).collect::<Vec<_>>()))
                }),
                multi: true,
                force_trigger,
                deep: false,
            }
        }
    }
}

fn do_watch(
    source: NormalizedSource,
    cb: Option<WatchCallback>,
    cleanup: CleanupSlot,
    options: WatchOptions,
) -> WatchHandle {
    let NormalizedSource {
        mut getter,
        multi,
        force_trigger,
        deep: deep_forced,
    } = source;
    let deep = options.deep || deep_forced;
    let has_cb = cb.is_some();

    if deep && has_cb {
        let mut inner = getter;
        getter = Box::new(move || {
            let value = inner();
            traverse(&value);
            value
        });
    }

    let effect_id = effect::create_effect_node(
        Box::new(move |slot| *slot = Some(Box::new(getter()))),
        EffectOptions {
            lazy: true,
            on_track: options.on_track,
            on_trigger: options.on_trigger,
            ..Default::default()
        },
        false,
    );

    // A pending cleanup also runs when the watcher is stopped.
    effect::set_effect_on_stop(effect_id, {
        let cleanup = cleanup.clone();
        Box::new(move || {
            if let Some(pending) = cleanup.borrow_mut().take() {
                errors::call_with_handling(ErrorCode::WatchCleanup, pending);
            }
        })
    });

    let old_value: Rc<RefCell<Value>> = Rc::default();
    let job: Rc<dyn Fn()> = match cb {
        Some(cb) => {
            let cb = Rc::new(RefCell::new(cb));
            let (old_value, cleanup) = (old_value.clone(), cleanup.clone());
            Rc::new(move || {
                if !effect::is_effect_active(effect_id) {
                    return;
                }
                effect::run_effect(effect_id);
                let new: Value = effect::effect_value(effect_id);
                let old = old_value.borrow().clone();
                let changed = if multi {
                    multi_changed(&new, &old)
                } else {
                    !same_value(&new, &old)
                };
                if deep || force_trigger || changed {
                    if let Some(pending) = cleanup.borrow_mut().take() {
                        errors::call_with_handling(ErrorCode::WatchCleanup, pending);
                    }
                    let registrar = OnCleanup {
                        slot: cleanup.clone(),
                    };
                    let mut cb = cb.borrow_mut();
                    errors::call_with_handling(ErrorCode::WatchCallback, || {
                        (*cb)(&new, &old, &registrar)
                    });
                    drop(cb);
                    *old_value.borrow_mut() = new;
                }
            })
        }
        None => Rc::new(move || {
            if effect::is_effect_active(effect_id) {
                effect::run_effect(effect_id);
            }
        }),
    };

    let scheduler: Rc<dyn Fn()> = match options.flush {
        FlushMode::Sync => {
            let job = job.clone();
            Rc::new(move || job())
        }
        FlushMode::Post => {
            let queued = Job::new(None, false, job.clone());
            Rc::new(move || scheduler::queue_post(queued.clone()))
        }
        FlushMode::Pre => {
            let queued = Job::new(scheduler::current_instance(), true, job.clone());
            Rc::new(move || scheduler::queue_job(queued.clone()))
        }
    };
    effect::set_scheduler(effect_id, scheduler);

    if has_cb {
        if options.immediate {
            job();
        } else {
            effect::run_effect(effect_id);
            *old_value.borrow_mut() = effect::effect_value(effect_id);
        }
    } else if options.flush == FlushMode::Post {
        scheduler::queue_post(Job::new(
            None,
            false,
            Rc::new(move || effect::run_effect(effect_id)),
        ));
    } else {
        effect::run_effect(effect_id);
    }

    WatchHandle {
        effect: effect_id,
        scope: scope::current_scope_id(),
    }
}

fn multi_changed(new: &Value, old: &Value) -> bool {
    let (Some(new_obj), Some(old_obj)) = (new.as_obj(), old.as_obj()) else {
        // First run: the stored old value is still Unit.
        return true;
    };
    let read = |obj: &Obj| match &*obj.0.data.borrow() {
        RawData::List(items) => items.clone(),
        _ => Vec::new(),
    };
    let (new_items, old_items) = (read(new_obj), read(old_obj));
    new_items.len() != old_items.len()
        || new_items
            .iter()
            .zip(&old_items)
            .any(|(a, b)| !same_value(a, b))
}

/// Recursively reads every property, element, and entry reachable from
/// `value`, so a deep watcher depends on all of them. A seen-set breaks
/// cycles; `mark_raw`ed objects are opaque.
pub(crate) fn traverse(value: &Value) {
    let mut seen = HashSet::new();
    traverse_inner(value, &mut seen);
}

fn traverse_inner(value: &Value, seen: &mut HashSet<usize>) {
    match value {
        Value::Ref(cell) => traverse_inner(&cell.get(), seen),
        Value::Reactive(proxy) => {
            if proxy.target().is_skipped() || !seen.insert(proxy.target().heap_id()) {
                return;
            }
            match proxy.kind() {
                TargetKind::Record => {
                    for key in proxy.keys() {
                        traverse_inner(&proxy.get(&key), seen);
                    }
                }
                TargetKind::List => {
                    for i in 0..proxy.len() {
                        traverse_inner(&proxy.at(i), seen);
                    }
                }
                TargetKind::Map => {
                    for (key, value) in proxy.map_entries() {
                        traverse_inner(&key, seen);
                        traverse_inner(&value, seen);
                    }
                }
                TargetKind::Set => {
                    for value in proxy.set_values() {
                        traverse_inner(&value, seen);
                    }
                }
            }
        }
        Value::Obj(obj) => {
            if obj.is_skipped() || !seen.insert(obj.heap_id()) {
                return;
            }
            let children: Vec<Value> = match &*obj.0.data.borrow() {
                RawData::Record(map) => map.values().cloned().collect(),
                RawData::List(items) => items.clone(),
                RawData::Map(map) => map
                    .iter()
                    .flat_map(|(k, v)| [k.value().clone(), v.clone()])
                    .collect(),
                RawData::Set(set) => set.iter().map(|k| k.value().clone()).collect(),
            };
            for child in children {
                traverse_inner(&child, seen);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use crate::*;

    #[test]
    fn watch_ref_batches_through_pre_queue() {
        let count = create_ref(0);
        let log: Rc<RefCell<Vec<(i64, i64)>>> = Rc::default();
        let handle = watch(&count, {
            let log = log.clone();
            move |new, old, _cleanup| {
                log.borrow_mut()
                    .push((new.as_int().unwrap(), old.as_int().unwrap_or(-1)))
            }
        });
        count.set(1);
        count.set(2);
        assert!(log.borrow().is_empty()); // nothing until the host flushes
        flush_jobs();
        // Two writes, one (deduplicated) job run.
        assert_eq!(*log.borrow(), vec![(2, 0)]);
        handle.stop();
    }

    #[test]
    fn sync_watcher_fires_inside_the_write() {
        let count = create_ref(0);
        let log: Rc<RefCell<Vec<i64>>> = Rc::default();
        watch_with(
            &count,
            {
                let log = log.clone();
                move |new, _old, _cleanup| log.borrow_mut().push(new.as_int().unwrap())
            },
            WatchOptions {
                flush: FlushMode::Sync,
                ..Default::default()
            },
        );
        count.set(1);
        assert_eq!(*log.borrow(), vec![1]);
        count.set(1); // unchanged: no callback
        assert_eq!(*log.borrow(), vec![1]);
    }

    #[test]
    fn flush_modes_order_sync_pre_post() {
        let count = create_ref(0);
        let order: Rc<RefCell<Vec<&'static str>>> = Rc::default();
        for (mode, tag) in [
            (FlushMode::Pre, "pre"),
            (FlushMode::Post, "post"),
            (FlushMode::Sync, "sync"),
        ] {
            watch_with(
                &count,
                {
                    let order = order.clone();
                    move |_new, _old, _cleanup| order.borrow_mut().push(tag)
                },
                WatchOptions {
                    flush: mode,
                    ..Default::default()
                },
            );
        }
        count.set(1);
        assert_eq!(*order.borrow(), vec!["sync"]);
        flush_jobs();
        assert_eq!(*order.borrow(), vec!["sync", "pre"]);
        flush_post_jobs();
        assert_eq!(*order.borrow(), vec!["sync", "pre", "post"]);
    }

    #[test]
    fn immediate_calls_back_with_unit_old_value() {
        let count = create_ref(5);
        let log: Rc<RefCell<Vec<(i64, bool)>>> = Rc::default();
        watch_with(
            &count,
            {
                let log = log.clone();
                move |new, old, _cleanup| {
                    log.borrow_mut().push((new.as_int().unwrap(), old.is_unit()))
                }
            },
            WatchOptions {
                immediate: true,
                ..Default::default()
            },
        );
        assert_eq!(*log.borrow(), vec![(5, true)]);
    }

    #[test]
    fn deep_watch_sees_nested_mutations() {
        let src = create_reactive(Obj::record([("x", Obj::record([("y", 1)]))]))
            .into_reactive();
        let calls: Rc<RefCell<Vec<bool>>> = Rc::default();
        watch_with(
            &src,
            {
                let (calls, src) = (calls.clone(), src.clone());
                move |new, old, _cleanup| {
                    // Both sides are the source proxy itself.
                    let same = matches!(new, Value::Reactive(r) if *r == src)
                        && matches!(old, Value::Reactive(r) if *r == src);
                    calls.borrow_mut().push(same);
                }
            },
            WatchOptions {
                flush: FlushMode::Sync,
                deep: true,
                ..Default::default()
            },
        );
        src.get("x").into_reactive().set("y", 2);
        assert_eq!(*calls.borrow(), vec![true]);
    }

    #[test]
    fn getter_source_watches_a_projection() {
        let src = create_reactive(Obj::record([("a", 1), ("b", 10)])).into_reactive();
        let log: Rc<RefCell<Vec<i64>>> = Rc::default();
        watch_with(
            {
                let src = src.clone();
                move || src.get("a")
            },
            {
                let log = log.clone();
                move |new, _old, _cleanup| log.borrow_mut().push(new.as_int().unwrap())
            },
            WatchOptions {
                flush: FlushMode::Sync,
                ..Default::default()
            },
        );
        src.set("b", 20); // unrelated key
        assert!(log.borrow().is_empty());
        src.set("a", 2);
        assert_eq!(*log.borrow(), vec![2]);
    }

    #[test]
    fn multi_source_compares_elementwise() {
        let a = create_ref(1);
        let b = create_ref(10);
        let log: Rc<RefCell<Vec<(i64, i64)>>> = Rc::default();
        watch_with(
            (a.clone(), b.clone()),
            {
                let log = log.clone();
                move |new, _old, _cleanup| {
                    let items = new.as_obj().unwrap();
                    log.borrow_mut()
                        .push((items.at(0).as_int().unwrap(), items.at(1).as_int().unwrap()));
                }
            },
            WatchOptions {
                flush: FlushMode::Sync,
                ..Default::default()
            },
        );
        a.set(2);
        b.set(20);
        assert_eq!(*log.borrow(), vec![(2, 10), (2, 20)]);
    }

    #[test]
    fn watch_effect_tracks_and_reruns() {
        let count = create_ref(0);
        let seen: Rc<RefCell<Vec<i64>>> = Rc::default();
        let handle = watch_sync_effect({
            let (count, seen) = (count.clone(), seen.clone());
            move |_cleanup| seen.borrow_mut().push(count.get().as_int().unwrap())
        });
        assert_eq!(*seen.borrow(), vec![0]);
        count.set(1);
        assert_eq!(*seen.borrow(), vec![0, 1]);
        handle.stop();
        count.set(2);
        assert_eq!(*seen.borrow(), vec![0, 1]);
    }

    #[test]
    fn cleanup_runs_before_next_callback_and_on_stop() {
        let count = create_ref(0);
        let cleanups = Rc::new(Cell::new(0));
        let handle = watch_with(
            &count,
            {
                let cleanups = cleanups.clone();
                move |_new, _old, cleanup: &OnCleanup| {
                    let cleanups = cleanups.clone();
                    cleanup.register(move || cleanups.set(cleanups.get() + 1));
                }
            },
            WatchOptions {
                flush: FlushMode::Sync,
                ..Default::default()
            },
        );
        count.set(1);
        assert_eq!(cleanups.get(), 0);
        count.set(2);
        assert_eq!(cleanups.get(), 1);
        handle.stop();
        assert_eq!(cleanups.get(), 2);
    }

    #[test]
    fn stopped_watcher_short_circuits_pending_jobs() {
        let count = create_ref(0);
        let runs = Rc::new(Cell::new(0));
        let handle = watch(&count, {
            let runs = runs.clone();
            move |_new, _old, _cleanup| runs.set(runs.get() + 1)
        });
        count.set(1); // queued
        handle.stop();
        flush_jobs();
        assert_eq!(runs.get(), 0);
    }

    #[test]
    fn getter_errors_are_routed_to_the_handler() {
        let reported: Rc<RefCell<Vec<ErrorCode>>> = Rc::default();
        set_error_handler({
            let reported = reported.clone();
            move |code, _payload| reported.borrow_mut().push(code)
        });
        let count = create_ref(0);
        watch_with(
            {
                let count = count.clone();
                move || {
                    if count.get().as_int().unwrap() > 0 {
                        panic!("getter failure");
                    }
                    Value::Unit
                }
            },
            |_new, _old, _cleanup| {},
            WatchOptions {
                flush: FlushMode::Sync,
                ..Default::default()
            },
        );
        count.set(1);
        assert_eq!(*reported.borrow(), vec![ErrorCode::WatchGetter]);
        clear_error_handler();
    }

    #[test]
    fn computed_sources_are_watchable() {
        let a = create_ref(1);
        let doubled = create_computed({
            let a = a.clone();
            move || a.get().as_int().unwrap() * 2
        });
        let log: Rc<RefCell<Vec<i64>>> = Rc::default();
        watch_with(
            doubled,
            {
                let log = log.clone();
                move |new, _old, _cleanup| log.borrow_mut().push(new.as_int().unwrap())
            },
            WatchOptions {
                flush: FlushMode::Sync,
                ..Default::default()
            },
        );
        a.set(3);
        assert_eq!(*log.borrow(), vec![6]);
    }

    #[test]
    fn traverse_terminates_on_cycles() {
        let a = Obj::record([("x", 1)]);
        let b = Obj::record([("back", a.clone())]);
        let pa = create_reactive(a).into_reactive();
        pa.set("next", Value::Obj(b));
        let seen = Rc::new(Cell::new(0));
        watch_with(
            &pa,
            {
                let seen = seen.clone();
                move |_new, _old, _cleanup| seen.set(seen.get() + 1)
            },
            WatchOptions {
                flush: FlushMode::Sync,
                deep: true,
                ..Default::default()
            },
        );
        pa.set("x", 2);
        assert_eq!(seen.get(), 1);
    }
}
