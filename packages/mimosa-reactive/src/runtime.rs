//! The thread-local reactive runtime.
//!
//! All state of the reactivity system lives here: the effect and dep arenas,
//! the target registry, the active-effect cell and the tracking flag stack.
//! The runtime is leaked once per thread so that handles can borrow it
//! without lifetime gymnastics; it lives for the duration of the thread.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use slotmap::SlotMap;

use crate::dep::{DepId, DepKey, DepNode, TargetId};
use crate::effect::{EffectId, EffectNode};
use crate::scope::{ScopeId, ScopeNode};

pub(crate) struct Runtime {
    /// All effect nodes created on this thread.
    pub effects: RefCell<SlotMap<EffectId, EffectNode>>,
    /// All deps created on this thread.
    pub deps: RefCell<SlotMap<DepId, DepNode>>,
    /// target → key → dep. Entries are released when the target is dropped.
    pub targets: RefCell<HashMap<TargetId, HashMap<DepKey, DepId>>>,
    /// All effect scopes created on this thread.
    pub scopes: RefCell<SlotMap<ScopeId, ScopeNode>>,
    /// The effect currently capturing dependencies, if any.
    pub active_effect: Cell<Option<EffectId>>,
    /// The scope new effects register themselves on, if any.
    pub current_scope: Cell<Option<ScopeId>>,
    /// Whether reads are currently tracked.
    pub tracking: Cell<bool>,
    /// Saved tracking flags for balanced pause/reset pairs.
    track_stack: RefCell<Vec<bool>>,
    /// Bumped once per effect run; used to stamp dep edges.
    pub run_serial: Cell<u64>,
    next_target: Cell<u64>,
    /// Server-side rendering mode: computed cells neither cache nor subscribe.
    ssr: Cell<bool>,
}

impl Runtime {
    fn new() -> Self {
        Self {
            effects: RefCell::new(SlotMap::default()),
            deps: RefCell::new(SlotMap::default()),
            targets: RefCell::new(HashMap::new()),
            scopes: RefCell::new(SlotMap::default()),
            active_effect: Cell::new(None),
            current_scope: Cell::new(None),
            tracking: Cell::new(true),
            track_stack: RefCell::new(Vec::new()),
            run_serial: Cell::new(0),
            next_target: Cell::new(0),
            ssr: Cell::new(false),
        }
    }

    pub fn alloc_target(&self) -> TargetId {
        let id = self.next_target.get();
        self.next_target.set(id + 1);
        TargetId::new(id)
    }

    /// Drops a target's key map and every dep in it. Called when the target
    /// object is dropped, which makes the registry weak in effect.
    pub fn release_target(&self, target: TargetId) {
        let Some(key_map) = self.targets.borrow_mut().remove(&target) else {
            return;
        };
        let mut deps = self.deps.borrow_mut();
        for dep in key_map.into_values() {
            deps.remove(dep);
        }
    }
}

thread_local! {
    static RUNTIME: &'static Runtime = Box::leak(Box::new(Runtime::new()));
}

pub(crate) fn with<T>(f: impl FnOnce(&'static Runtime) -> T) -> T {
    RUNTIME.with(|rt| f(*rt))
}

/// Fallible access for drop paths that may run during thread teardown.
pub(crate) fn try_with<T>(f: impl FnOnce(&'static Runtime) -> T) -> Option<T> {
    RUNTIME.try_with(|rt| f(*rt)).ok()
}

/// Disables dependency tracking until the matching [`reset_tracking`].
///
/// Pairs must stay balanced on every exit path; prefer [`untrack`] unless
/// the paused region cannot be expressed as a closure.
pub fn pause_tracking() {
    with(|rt| {
        rt.track_stack.borrow_mut().push(rt.tracking.get());
        rt.tracking.set(false);
    });
}

/// Re-enables dependency tracking until the matching [`reset_tracking`].
pub(crate) fn enable_tracking() {
    with(|rt| {
        rt.track_stack.borrow_mut().push(rt.tracking.get());
        rt.tracking.set(true);
    });
}

/// Restores the tracking state saved by the matching
/// [`pause_tracking`] call.
pub fn reset_tracking() {
    with(|rt| {
        let last = rt.track_stack.borrow_mut().pop();
        rt.tracking.set(last.unwrap_or(true));
    });
}

/// Balances a `pause_tracking` on drop, including unwinds.
pub(crate) struct PauseGuard(());

impl PauseGuard {
    pub fn new() -> Self {
        pause_tracking();
        PauseGuard(())
    }
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        reset_tracking();
    }
}

/// Same as [`PauseGuard`] but for `enable_tracking`.
pub(crate) struct TrackGuard(());

impl TrackGuard {
    pub fn new() -> Self {
        enable_tracking();
        TrackGuard(())
    }
}

impl Drop for TrackGuard {
    fn drop(&mut self) {
        reset_tracking();
    }
}

/// Runs the closure with dependency tracking disabled.
///
/// Reads made inside the closure are not recorded on the running effect.
///
/// # Example
/// ```
/// # use mimosa_reactive::*;
/// let a = create_ref(1);
/// let b = create_ref(10);
/// let sum = create_computed({
///     let (a, b) = (a.clone(), b.clone());
///     move || a.get().as_int().unwrap() + untrack(|| b.get().as_int().unwrap())
/// });
/// assert_eq!(sum.get(), 11);
/// b.set(20); // not tracked: sum does not recompute
/// assert_eq!(sum.get(), 11);
/// a.set(2);
/// assert_eq!(sum.get(), 22);
/// ```
pub fn untrack<T>(f: impl FnOnce() -> T) -> T {
    let _guard = PauseGuard::new();
    f()
}

/// Whether reads are currently being tracked onto an active effect.
pub fn is_tracking() -> bool {
    with(|rt| rt.tracking.get() && rt.active_effect.get().is_some())
}

/// Puts the runtime in server-side rendering mode: computed cells created
/// while enabled neither cache nor subscribe.
pub fn set_ssr_mode(ssr: bool) {
    with(|rt| rt.ssr.set(ssr));
}

pub(crate) fn is_ssr() -> bool {
    with(|rt| rt.ssr.get())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_reset_symmetry() {
        let before = with(|rt| rt.tracking.get());
        pause_tracking();
        pause_tracking();
        assert!(!with(|rt| rt.tracking.get()));
        reset_tracking();
        reset_tracking();
        assert_eq!(with(|rt| rt.tracking.get()), before);
    }

    #[test]
    fn untrack_restores_on_unwind() {
        let before = with(|rt| rt.tracking.get());
        let _ = std::panic::catch_unwind(|| {
            untrack(|| panic!("boom"));
        });
        assert_eq!(with(|rt| rt.tracking.get()), before);
    }
}
