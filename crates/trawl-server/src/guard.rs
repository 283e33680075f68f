//! Panic containment for spawned handlers.
//!
//! A process-wide panic hook records a backtrace on the panicking thread
//! before unwinding starts; [`catch_panic`] picks it up on the same thread
//! once the unwind reaches it.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Once;

use futures_util::FutureExt;
use tracing::error;

thread_local! {
    static PANIC_BACKTRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

/// Installs the backtrace-recording panic hook, chaining the previous one.
///
/// Idempotent; [`catch_panic`] calls it on first use.
pub fn install_panic_hook() {
    HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let backtrace = Backtrace::force_capture();
            PANIC_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(backtrace));
            previous(info);
        }));
    });
}

fn take_panic_backtrace() -> Option<Backtrace> {
    PANIC_BACKTRACE.with(|slot| slot.borrow_mut().take())
}

/// A contained panic.
#[derive(Debug)]
pub struct PanicReport {
    /// Panic payload rendered as text.
    pub message: String,
    /// Stack of the panicking thread at the panic site.
    pub backtrace: Option<Backtrace>,
}

/// Runs `future`, capturing a panic as a [`PanicReport`].
pub async fn contain<F>(future: F) -> Result<F::Output, PanicReport>
where
    F: Future,
{
    install_panic_hook();
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .map_err(|payload| PanicReport {
            message: panic_message(payload.as_ref()),
            backtrace: take_panic_backtrace(),
        })
}

/// Runs `future`, turning a panic into `None`.
///
/// The panic payload and the backtrace taken at the panic site are logged
/// under `task`.
pub async fn catch_panic<F>(task: &str, future: F) -> Option<F::Output>
where
    F: Future,
{
    match contain(future).await {
        Ok(output) => Some(output),
        Err(report) => {
            let backtrace = report
                .backtrace
                .map_or_else(|| "unavailable".to_string(), |bt| bt.to_string());
            error!(
                task,
                panic = %report.message,
                backtrace = %backtrace,
                "task panicked"
            );
            None
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
