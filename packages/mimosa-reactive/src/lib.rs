//! Fine-grained reactive state primitives for Mimosa.
//!
//! The core of the crate is a tracking/trigger engine: reads of observable
//! values record dependencies from the running computation onto the value,
//! and writes re-run (or re-schedule) exactly the computations that read
//! what changed. On top of the engine sit four public abstractions:
//!
//! * [`create_reactive`] and friends — proxies over records, lists, maps,
//!   and sets that intercept every read and write, in four flavors
//!   (mutable/readonly × deep/shallow).
//! * [`create_ref`] — a single-slot observable cell.
//! * [`create_computed`] — a lazily recomputed derived observable.
//! * [`watch`] / [`watch_effect`] — subscriptions that run a callback once
//!   per change or re-run an auto-tracking effect body, flushed
//!   synchronously or through the scheduler surface.
//!
//! # Example
//! ```
//! use mimosa_reactive::*;
//!
//! let todo = create_reactive(Obj::record([
//!     ("title", Value::from("learn reactivity")),
//!     ("done", Value::from(false)),
//! ]))
//! .into_reactive();
//!
//! let label = create_computed({
//!     let todo = todo.clone();
//!     move || {
//!         let mark = if todo.get("done").as_bool().unwrap() { "x" } else { " " };
//!         format!("[{mark}] {}", todo.get("title").as_str().unwrap())
//!     }
//! });
//! assert_eq!(label.get(), "[ ] learn reactivity");
//!
//! todo.set("done", true);
//! assert_eq!(label.get(), "[x] learn reactivity");
//! ```
//!
//! All state is thread-local: handles are cheap to clone and move into
//! closures, but never cross threads.

#![warn(missing_docs)]

mod collections;
mod computed;
mod dep;
mod effect;
mod errors;
mod reactive;
mod refs;
mod runtime;
mod scheduler;
mod scope;
mod utils;
mod value;
mod watch;

pub use computed::*;
pub use dep::{DepKey, TargetId, TrackEvent, TrackOp, TriggerEvent, TriggerOp};
pub use effect::*;
pub use errors::*;
pub use reactive::*;
pub use refs::*;
pub use runtime::{is_tracking, pause_tracking, reset_tracking, set_ssr_mode, untrack};
pub use scheduler::*;
pub use scope::*;
pub use utils::*;
pub use value::{mark_raw, same_value, MapKey, Obj, TargetKind, Value};
pub use watch::*;
