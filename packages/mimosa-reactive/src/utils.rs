//! A few handy utilities.

use crate::computed::Computed;
use crate::refs::{track_ref_value, Ref};

/// Reactive data whose reads can be recorded explicitly.
///
/// Also implemented for tuples of `Trackable`s.
pub trait Trackable {
    /// Records the data as a dependency of the active effect.
    fn track(&self);
}

impl Trackable for Ref {
    fn track(&self) {
        track_ref_value(self);
    }
}

impl<T: 'static> Trackable for Computed<T> {
    fn track(&self) {
        self.track_cell();
    }
}

macro_rules! impl_trackable_for_tuple {
    ($($T:tt),*) => {
        paste::paste! {
            impl<$($T,)*> Trackable for ($($T,)*)
            where
                $($T: Trackable,)*
            {
                fn track(&self) {
                    let ($([<$T:lower>],)*) = self;
                    $(
                        [<$T:lower>].track();
                    )*
                }
            }
        }
    }
}

impl_trackable_for_tuple!(A);
impl_trackable_for_tuple!(A, B);
impl_trackable_for_tuple!(A, B, C);
impl_trackable_for_tuple!(A, B, C, D);
impl_trackable_for_tuple!(A, B, C, D, E);
impl_trackable_for_tuple!(A, B, C, D, E, F);
impl_trackable_for_tuple!(A, B, C, D, E, F, G);
impl_trackable_for_tuple!(A, B, C, D, E, F, G, H);

/// A helper for making an effect's dependencies explicit.
///
/// The returned closure tracks `deps` and then calls `f`; reads inside `f`
/// still track as usual, so pair it with untracked reads when exact
/// dependencies matter.
///
/// # Example
/// ```
/// # use mimosa_reactive::*;
/// let state = create_ref(0);
/// let seen = create_ref(-1);
/// create_effect(on(state.clone(), {
///     let (state, seen) = (state.clone(), seen.clone());
///     move || seen.set(state.get_untracked())
/// }));
/// state.set(1);
/// assert_eq!(seen.get_untracked().as_int(), Some(1));
/// ```
pub fn on<T>(
    deps: impl Trackable + 'static,
    mut f: impl FnMut() -> T + 'static,
) -> impl FnMut() -> T + 'static {
    move || {
        deps.track();
        f()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use crate::*;

    #[test]
    fn on_makes_dependencies_explicit() {
        let state = create_ref(0);
        let other = create_ref(0);
        let runs = Rc::new(Cell::new(0));
        create_effect(on(state.clone(), {
            let (other, runs) = (other.clone(), runs.clone());
            move || {
                other.get_untracked();
                runs.set(runs.get() + 1);
            }
        }));
        assert_eq!(runs.get(), 1);
        other.set(1);
        assert_eq!(runs.get(), 1); // untracked
        state.set(1);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn tuple_deps_all_track() {
        let a = create_ref(0);
        let b = create_ref(0);
        let runs = Rc::new(Cell::new(0));
        create_effect(on((a.clone(), b.clone()), {
            let runs = runs.clone();
            move || runs.set(runs.get() + 1)
        }));
        a.set(1);
        b.set(1);
        assert_eq!(runs.get(), 3);
    }
}
