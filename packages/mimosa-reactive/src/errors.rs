//! Routing of failures in user-provided callbacks.
//!
//! Watch getters, callbacks, and cleanups run through
//! [`call_with_handling`]: an unwind is captured and reported to the
//! installed handler so one misbehaving callback cannot corrupt runtime
//! state. Without an installed handler the unwind is logged and resumed.

use std::any::Any;
use std::cell::RefCell;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};

/// Identifies which user callback failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// A watch source getter.
    WatchGetter,
    /// A watch callback or watch-effect body.
    WatchCallback,
    /// A cleanup registered through `on_cleanup`.
    WatchCleanup,
}

impl ErrorCode {
    fn as_str(self) -> &'static str {
        match self {
            ErrorCode::WatchGetter => "watch getter",
            ErrorCode::WatchCallback => "watch callback",
            ErrorCode::WatchCleanup => "watch cleanup",
        }
    }
}

type Handler = Box<dyn Fn(ErrorCode, Box<dyn Any + Send>)>;

thread_local! {
    static HANDLER: RefCell<Option<Handler>> = const { RefCell::new(None) };
}

/// Installs the error handler user-callback failures are reported to.
/// Replaces any previously installed handler.
pub fn set_error_handler(handler: impl Fn(ErrorCode, Box<dyn Any + Send>) + 'static) {
    HANDLER.with(|h| *h.borrow_mut() = Some(Box::new(handler)));
}

/// Removes the installed error handler; failures propagate again.
pub fn clear_error_handler() {
    HANDLER.with(|h| *h.borrow_mut() = None);
}

/// Runs a user callback, capturing an unwind and reporting it.
///
/// Returns `None` when the callback failed and the failure was handled.
pub(crate) fn call_with_handling<T>(code: ErrorCode, f: impl FnOnce() -> T) -> Option<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            // Take the handler out for the call so a handler installing a
            // replacement does not deadlock on the slot.
            let handler = HANDLER.with(|h| h.borrow_mut().take());
            match handler {
                Some(handler) => {
                    handler(code, payload);
                    HANDLER.with(|h| {
                        let mut slot = h.borrow_mut();
                        if slot.is_none() {
                            *slot = Some(handler);
                        }
                    });
                }
                None => {
                    tracing::error!(code = code.as_str(), "unhandled error in user callback");
                    resume_unwind(payload);
                }
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn handled_failures_are_swallowed() {
        let reported: Rc<RefCell<Vec<ErrorCode>>> = Rc::default();
        set_error_handler({
            let reported = reported.clone();
            move |code, _| reported.borrow_mut().push(code)
        });
        let out = call_with_handling(ErrorCode::WatchCallback, || -> i32 { panic!("boom") });
        assert_eq!(out, None);
        assert_eq!(*reported.borrow(), vec![ErrorCode::WatchCallback]);
        clear_error_handler();
    }

    #[test]
    fn unhandled_failures_propagate() {
        clear_error_handler();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            call_with_handling(ErrorCode::WatchGetter, || panic!("boom"))
        }));
        assert!(outcome.is_err());
    }

    #[test]
    fn successful_calls_pass_the_value_through() {
        assert_eq!(call_with_handling(ErrorCode::WatchGetter, || 7), Some(7));
    }
}
