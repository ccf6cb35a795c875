//! Process-wide panic reporting for session tasks.
//!
//! Session read/write tasks catch panics instead of letting them unwind
//! into the runtime. The caught payload is handed to a single pluggable
//! handler; the default one logs it with `tracing`.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};

use futures::FutureExt;

/// Payload of a caught panic.
pub type PanicPayload = Box<dyn Any + Send + 'static>;

/// Callback invoked with every caught panic.
pub type PanicHandler = Arc<dyn Fn(&PanicPayload) + Send + Sync>;

static PANIC_HANDLER: RwLock<Option<PanicHandler>> = RwLock::new(None);

/// Replace the process-wide panic handler.
pub fn set_panic_handler(handler: PanicHandler) {
    let mut slot = PANIC_HANDLER.write().unwrap_or_else(|e| e.into_inner());
    *slot = Some(handler);
}

/// Restore the default logging handler.
pub fn reset_panic_handler() {
    let mut slot = PANIC_HANDLER.write().unwrap_or_else(|e| e.into_inner());
    *slot = None;
}

/// Hand a caught panic to the installed handler.
pub fn report_panic(payload: &PanicPayload) {
    let handler = PANIC_HANDLER
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .clone();
    match handler {
        Some(handler) => handler(payload),
        None => log_panic(payload),
    }
}

/// Default handler.
pub fn log_panic(payload: &PanicPayload) {
    tracing::error!(panic = %panic_message(payload), "Recovered from panic");
}

/// Best-effort textual form of a panic payload.
pub fn panic_message(payload: &PanicPayload) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Run a future, reporting a panic instead of propagating it.
///
/// Returns `None` when the future panicked.
pub async fn with_recover<F>(fut: F) -> Option<F::Output>
where
    F: Future,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(output) => Some(output),
        Err(payload) => {
            report_panic(&payload);
            None
        }
    }
}
