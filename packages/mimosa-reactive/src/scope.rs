//! Effect scopes: collective ownership of effects and watchers.

use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};

use slotmap::new_key_type;

use crate::effect::{self, EffectId};
use crate::runtime::{self, untrack};

new_key_type! {
    pub(crate) struct ScopeId;
}

pub(crate) struct ScopeNode {
    pub effects: Vec<EffectId>,
    pub cleanups: Vec<Box<dyn FnOnce()>>,
    pub children: Vec<ScopeId>,
    pub parent: Option<ScopeId>,
    pub active: bool,
}

/// A handle to an effect scope.
///
/// Effects and watchers created inside [`run`](EffectScope::run) are owned
/// by the scope and stopped together when the scope stops.
///
/// # Example
/// ```
/// # use mimosa_reactive::*;
/// let count = create_ref(0);
/// let scope = create_effect_scope(false);
/// scope.run(|| {
///     let count = count.clone();
///     create_effect(move || {
///         count.get();
///     });
/// });
/// scope.stop(); // the effect no longer re-runs
/// count.set(1);
/// ```
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct EffectScope {
    id: ScopeId,
}

/// Creates an effect scope. A detached scope is not collected by its parent
/// and must be stopped explicitly.
pub fn create_effect_scope(detached: bool) -> EffectScope {
    runtime::with(|rt| {
        let parent = if detached {
            None
        } else {
            rt.current_scope.get()
        };
        let id = rt.scopes.borrow_mut().insert(ScopeNode {
            effects: Vec::new(),
            cleanups: Vec::new(),
            children: Vec::new(),
            parent,
            active: true,
        });
        if let Some(parent) = parent {
            rt.scopes.borrow_mut()[parent].children.push(id);
        }
        EffectScope { id }
    })
}

impl EffectScope {
    /// Runs `f` with this scope as the current scope, so that effects
    /// created inside register on it. Returns `None` if the scope has
    /// already been stopped.
    pub fn run<T>(&self, f: impl FnOnce() -> T) -> Option<T> {
        runtime::with(|rt| {
            if !rt.scopes.borrow().get(self.id).is_some_and(|s| s.active) {
                tracing::warn!("cannot run an inactive effect scope");
                return None;
            }
            let prev = rt.current_scope.replace(Some(self.id));
            let outcome = catch_unwind(AssertUnwindSafe(f));
            rt.current_scope.set(prev);
            match outcome {
                Ok(value) => Some(value),
                Err(payload) => resume_unwind(payload),
            }
        })
    }

    /// Stops every effect and child scope owned by this scope and runs its
    /// dispose callbacks. Idempotent.
    pub fn stop(&self) {
        stop_scope(self.id);
    }

    /// Whether the scope has not been stopped.
    pub fn is_active(&self) -> bool {
        runtime::with(|rt| rt.scopes.borrow().get(self.id).is_some_and(|s| s.active))
    }
}

fn stop_scope(id: ScopeId) {
    runtime::with(|rt| {
        let (effects, cleanups, children, parent) = {
            let mut scopes = rt.scopes.borrow_mut();
            let Some(node) = scopes.get_mut(id) else {
                return;
            };
            if !node.active {
                return;
            }
            node.active = false;
            (
                std::mem::take(&mut node.effects),
                std::mem::take(&mut node.cleanups),
                std::mem::take(&mut node.children),
                node.parent.take(),
            )
        };
        for child in children {
            stop_scope(child);
        }
        for effect in effects {
            effect::stop_effect(effect);
        }
        untrack(|| {
            for cleanup in cleanups {
                cleanup();
            }
        });
        if let Some(parent) = parent {
            if let Some(parent) = rt.scopes.borrow_mut().get_mut(parent) {
                parent.children.retain(|&c| c != id);
            }
        }
    });
}

/// The scope new effects currently register on, if any.
pub fn get_current_scope() -> Option<EffectScope> {
    runtime::with(|rt| rt.current_scope.get().map(|id| EffectScope { id }))
}

/// Registers a callback to run when the current scope is stopped. Warns and
/// does nothing when called outside a scope.
pub fn on_scope_dispose(f: impl FnOnce() + 'static) {
    runtime::with(|rt| match rt.current_scope.get() {
        Some(id) => {
            if let Some(node) = rt.scopes.borrow_mut().get_mut(id) {
                node.cleanups.push(Box::new(f));
            }
        }
        None => {
            tracing::warn!("on_scope_dispose called outside an active effect scope");
        }
    });
}

/// Records an effect on the current scope.
pub(crate) fn record_effect(effect: EffectId) {
    runtime::with(|rt| {
        if let Some(id) = rt.current_scope.get() {
            if let Some(node) = rt.scopes.borrow_mut().get_mut(id) {
                if node.active {
                    node.effects.push(effect);
                }
            }
        }
    });
}

/// Removes an effect from a scope's list, used when a watcher is stopped
/// individually.
pub(crate) fn remove_effect(scope: ScopeId, effect: EffectId) {
    runtime::with(|rt| {
        if let Some(node) = rt.scopes.borrow_mut().get_mut(scope) {
            node.effects.retain(|&e| e != effect);
        }
    });
}

pub(crate) fn current_scope_id() -> Option<ScopeId> {
    runtime::with(|rt| rt.current_scope.get())
}
