//! The dependency registry: the edges between observable keys and effects.
//!
//! Every `(target, key)` pair that has been read while an effect was active
//! owns a [`DepNode`]: an insertion-ordered set of subscribed effects. Edges
//! are stamped with the subscriber's run serial so that stale edges can be
//! swept after each run.

use std::any::Any;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};

use indexmap::IndexMap;
use slotmap::new_key_type;

use crate::effect::{self, EffectId};
use crate::runtime::{self, Runtime};
use crate::value::{MapKey, TargetKind};

new_key_type! {
    pub(crate) struct DepId;
}

/// Identifies a reactive target in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetId(u64);

impl TargetId {
    pub(crate) fn new(raw: u64) -> Self {
        TargetId(raw)
    }
}

/// The key of a dep within a target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DepKey {
    /// A record property.
    Prop(String),
    /// A list index.
    Index(usize),
    /// The list length.
    Length,
    /// The iteration sentinel: `has`, key enumeration, size.
    Iterate,
    /// The map key-iteration sentinel: `keys()` on a keyed collection.
    MapKeyIterate,
    /// A collection key.
    Key(MapKey),
}

/// The kind of read reported to [`on_track`](crate::EffectOptions::on_track)
/// debug hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOp {
    /// A keyed read.
    Get,
    /// A key-presence check.
    Has,
    /// An iteration over keys or entries.
    Iterate,
}

/// The kind of write reported to
/// [`on_trigger`](crate::EffectOptions::on_trigger) debug hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOp {
    /// An existing key changed value.
    Set,
    /// A new key appeared.
    Add,
    /// A key was removed.
    Delete,
    /// The whole collection was cleared.
    Clear,
}

/// Payload of the `on_track` debug hook.
#[derive(Debug, Clone)]
pub struct TrackEvent {
    /// The read kind.
    pub op: TrackOp,
    /// The target read from, if the dep belongs to one. Private deps of
    /// refs and computed cells have no target.
    pub target: Option<TargetId>,
    /// The key read, if any.
    pub key: Option<DepKey>,
}

/// Payload of the `on_trigger` debug hook.
#[derive(Debug, Clone)]
pub struct TriggerEvent {
    /// The write kind.
    pub op: TriggerOp,
    /// The target written to, if the dep belongs to one.
    pub target: Option<TargetId>,
    /// The key written, if any.
    pub key: Option<DepKey>,
}

pub(crate) struct DepNode {
    /// Subscribed effects in insertion order, each stamped with the run
    /// serial it was last tracked in.
    pub subscribers: IndexMap<EffectId, u64>,
    /// Bumped on every trigger that touches this dep.
    pub version: u64,
}

pub(crate) fn create_dep(rt: &Runtime) -> DepId {
    rt.deps.borrow_mut().insert(DepNode {
        subscribers: IndexMap::new(),
        version: 0,
    })
}

/// Records an edge from the active effect onto `(target, key)`.
pub(crate) fn track(target: TargetId, op: TrackOp, key: DepKey) {
    runtime::with(|rt| {
        if !rt.tracking.get() || rt.active_effect.get().is_none() {
            return;
        }
        #[cfg(feature = "trace")]
        tracing::trace!(target_id = ?target, op = ?op, key = ?key, "track");
        let dep = {
            let mut targets = rt.targets.borrow_mut();
            let key_map = targets.entry(target).or_default();
            match key_map.get(&key) {
                Some(&dep) => dep,
                None => {
                    let dep = create_dep(rt);
                    key_map.insert(key.clone(), dep);
                    dep
                }
            }
        };
        track_dep(rt, dep, || TrackEvent {
            op,
            target: Some(target),
            key: Some(key),
        });
    });
}

/// Records an edge from the active effect onto a bare dep (ref or computed).
pub(crate) fn track_dep(
    rt: &'static Runtime,
    dep: DepId,
    event: impl FnOnce() -> TrackEvent,
) {
    if !rt.tracking.get() {
        return;
    }
    let Some(effect) = rt.active_effect.get() else {
        return;
    };
    let serial = match rt.effects.borrow().get(effect) {
        Some(node) => node.run_serial,
        None => return,
    };
    let newly_tracked = {
        let mut deps = rt.deps.borrow_mut();
        let Some(node) = deps.get_mut(dep) else {
            return;
        };
        let newly = !node.subscribers.contains_key(&effect);
        node.subscribers.insert(effect, serial);
        newly
    };
    if newly_tracked {
        rt.effects.borrow_mut()[effect].deps.push(dep);
        effect::fire_on_track(rt, effect, event);
    }
}

/// Collects and notifies every effect affected by a write.
///
/// `new_len` carries the new length for list length writes so that index
/// deps at or beyond it are included.
pub(crate) fn trigger(
    target: TargetId,
    kind: TargetKind,
    op: TriggerOp,
    key: Option<DepKey>,
    new_len: Option<usize>,
) {
    let deps: Vec<DepId> = runtime::with(|rt| {
        let targets = rt.targets.borrow();
        let Some(key_map) = targets.get(&target) else {
            return Vec::new();
        };
        let mut deps = Vec::new();
        let mut push = |dep: Option<&DepId>| {
            if let Some(&dep) = dep {
                if !deps.contains(&dep) {
                    deps.push(dep);
                }
            }
        };
        if op == TriggerOp::Clear {
            // Everything observed on the target is affected.
            for dep in key_map.values() {
                push(Some(dep));
            }
        } else if key == Some(DepKey::Length) && kind == TargetKind::List {
            push(key_map.get(&DepKey::Length));
            let new_len = new_len.unwrap_or(0);
            for (k, dep) in key_map.iter() {
                if let DepKey::Index(i) = k {
                    if *i >= new_len {
                        push(Some(dep));
                    }
                }
            }
        } else {
            if let Some(key) = &key {
                push(key_map.get(key));
            }
            match op {
                TriggerOp::Add => match kind {
                    TargetKind::List => {
                        if matches!(key, Some(DepKey::Index(_))) {
                            push(key_map.get(&DepKey::Length));
                        }
                    }
                    TargetKind::Map => {
                        push(key_map.get(&DepKey::Iterate));
                        push(key_map.get(&DepKey::MapKeyIterate));
                    }
                    _ => push(key_map.get(&DepKey::Iterate)),
                },
                TriggerOp::Delete => match kind {
                    TargetKind::List => {}
                    TargetKind::Map => {
                        push(key_map.get(&DepKey::Iterate));
                        push(key_map.get(&DepKey::MapKeyIterate));
                    }
                    _ => push(key_map.get(&DepKey::Iterate)),
                },
                TriggerOp::Set => {
                    if kind == TargetKind::Map {
                        push(key_map.get(&DepKey::Iterate));
                    }
                }
                TriggerOp::Clear => unreachable!(),
            }
        }
        deps
    });
    if !deps.is_empty() {
        trigger_deps(&deps, op, Some(target), key);
    }
}

/// Notifies every subscriber of the given deps, computed effects first.
///
/// Notification is best-effort: a panicking scheduler or effect does not
/// prevent the rest of the batch from being notified; the first captured
/// panic is resumed once the batch is done.
pub(crate) fn trigger_deps(
    deps: &[DepId],
    op: TriggerOp,
    target: Option<TargetId>,
    key: Option<DepKey>,
) {
    let ordered: Vec<EffectId> = runtime::with(|rt| {
        // Bump versions and flatten to a unique, insertion-ordered effect
        // set with computed effects in front.
        let mut seen: Vec<EffectId> = Vec::new();
        {
            let mut dep_arena = rt.deps.borrow_mut();
            for &dep in deps {
                if let Some(node) = dep_arena.get_mut(dep) {
                    node.version += 1;
                    for &effect in node.subscribers.keys() {
                        if !seen.contains(&effect) {
                            seen.push(effect);
                        }
                    }
                }
            }
        }
        let effects = rt.effects.borrow();
        let mut ordered = Vec::with_capacity(seen.len());
        ordered.extend(
            seen.iter()
                .copied()
                .filter(|&e| effects.get(e).is_some_and(|n| n.computed)),
        );
        ordered.extend(
            seen.iter()
                .copied()
                .filter(|&e| effects.get(e).is_some_and(|n| !n.computed)),
        );
        ordered
    });

    #[cfg(feature = "trace")]
    tracing::trace!(op = ?op, key = ?key, effects = ordered.len(), "trigger");
    let mut first_panic: Option<Box<dyn Any + Send>> = None;
    for effect in ordered {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            notify_effect(effect, op, target, key.clone());
        }));
        if let Err(payload) = outcome {
            first_panic.get_or_insert(payload);
        }
    }
    if let Some(payload) = first_panic {
        resume_unwind(payload);
    }
}

fn notify_effect(effect: EffectId, op: TriggerOp, target: Option<TargetId>, key: Option<DepKey>) {
    runtime::with(|rt| {
        let (allow_recurse, scheduler) = {
            let effects = rt.effects.borrow();
            let Some(node) = effects.get(effect) else {
                return;
            };
            (node.allow_recurse, node.scheduler.clone())
        };
        // An effect is never re-entered by its own trigger.
        if rt.active_effect.get() == Some(effect) && !allow_recurse {
            return;
        }
        effect::fire_on_trigger(rt, effect, || TriggerEvent { op, target, key });
        match scheduler {
            Some(scheduler) => scheduler(),
            None => effect::run_effect(effect),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::*;

    #[test]
    fn dep_version_is_monotonic() {
        let p = create_reactive(Obj::record([("n", 1)])).into_reactive();
        let runs = create_effect({
            let p = p.clone();
            move || p.get("n")
        });
        let version = |key: &DepKey| {
            runtime::with(|rt| {
                let targets = rt.targets.borrow();
                let key_map = &targets[&p.target().target_id()];
                rt.deps.borrow()[key_map[key]].version
            })
        };
        let key = DepKey::Prop("n".to_string());
        let v0 = version(&key);
        p.set("n", 2);
        let v1 = version(&key);
        p.set("n", 3);
        let v2 = version(&key);
        assert!(v0 < v1 && v1 < v2);
        runs.stop();
    }

    #[test]
    fn trigger_is_best_effort() {
        let p = create_reactive(Obj::record([("n", 1)])).into_reactive();
        let ran = create_ref(false);
        let panicking = create_effect_with(
            {
                let p = p.clone();
                move || {
                    p.get("n");
                }
            },
            EffectOptions {
                scheduler: Some(std::rc::Rc::new(|| panic!("bad scheduler"))),
                ..Default::default()
            },
        );
        let observer = create_effect({
            let (p, ran) = (p.clone(), ran.clone());
            move || {
                p.get("n");
                untrack(|| ran.set(true));
            }
        });
        ran.set(false);
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            p.set("n", 2);
        }));
        // The scheduler panic resurfaces, but the second effect still ran.
        assert!(outcome.is_err());
        assert_eq!(ran.get_untracked().as_bool(), Some(true));
        panicking.stop();
        observer.stop();
    }
}
