//! Issue Reporting
//!
//! Programmer errors (sending to an invalidated scoped store, an effect
//! failing without a catch handler, a child action for absent child state)
//! are reported here instead of being returned as `Err`.
//!
//! - Under [`Strictness::Strict`] the report panics.
//! - Under [`Strictness::Lenient`] it is logged at `error` level and the
//!   caller continues with a no-op.
//!
//! While a capture is active on the current thread (a `TestStore` holds
//! one), reports are recorded instead so the harness can fail the test at
//! its next assertion. This matters for issues raised inside effect tasks,
//! where a panic would be swallowed by the executor.

use std::cell::{Cell, RefCell};

use crate::config::{self, Strictness};

thread_local! {
    static CAPTURE_DEPTH: Cell<usize> = const { Cell::new(0) };
    static CAPTURED: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// Report a programmer error.
#[track_caller]
pub fn report_issue(message: impl Into<String>) {
    let message = message.into();

    if CAPTURE_DEPTH.with(Cell::get) > 0 {
        tracing::error!(%message, "issue captured");
        CAPTURED.with(|captured| captured.borrow_mut().push(message));
        return;
    }

    match config::strictness() {
        Strictness::Strict => panic!("{message}"),
        Strictness::Lenient => {
            let location = std::panic::Location::caller();
            tracing::error!(%message, %location, "issue reported");
        }
    }
}

/// Records issues reported on this thread while alive.
///
/// Captures nest; reports are kept until [`IssueCapture::take`] drains them.
pub(crate) struct IssueCapture {
    _private: (),
}

impl IssueCapture {
    pub(crate) fn begin() -> Self {
        CAPTURE_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self { _private: () }
    }

    /// Drain every issue captured so far on this thread.
    pub(crate) fn take(&self) -> Vec<String> {
        CAPTURED.with(|captured| std::mem::take(&mut *captured.borrow_mut()))
    }
}

impl Drop for IssueCapture {
    fn drop(&mut self) {
        let remaining = CAPTURE_DEPTH.with(|depth| {
            let next = depth.get().saturating_sub(1);
            depth.set(next);
            next
        });
        if remaining == 0 {
            CAPTURED.with(|captured| captured.borrow_mut().clear());
        }
    }
}
