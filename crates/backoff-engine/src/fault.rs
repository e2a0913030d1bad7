//! Stack traces for contained panics.
//!
//! Once `catch_unwind` returns, the panicking frames are gone. A panic
//! hook records the trace on the panicking thread and the attempt runner
//! takes it right after the catch, still on that thread.

use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::sync::Once;

thread_local! {
    static LAST_TRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

static INSTALL: Once = Once::new();

/// Install the recording hook once, chained in front of the current one.
pub(crate) fn install_hook() {
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let trace = Backtrace::force_capture();
            let _ = LAST_TRACE.try_with(|slot| {
                if let Ok(mut slot) = slot.try_borrow_mut() {
                    *slot = Some(trace);
                }
            });
            previous(info);
        }));
    });
}

/// Trace recorded by the latest panic on this thread, if any.
pub(crate) fn take_trace() -> Option<Backtrace> {
    LAST_TRACE
        .try_with(|slot| slot.try_borrow_mut().ok().and_then(|mut slot| slot.take()))
        .ok()
        .flatten()
}
