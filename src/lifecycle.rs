//! Shutdown signaling.
//!
//! `SIGINT`/`SIGTERM` set a process-global flag; the coordinator polls it
//! between outcomes and takes the clean-shutdown path (save history, stop
//! accounting, exit). In-flight grants are never cancelled; they complete
//! or fail on their own, and the processed-keys set is the authority on
//! resume.
//!
//! Tests use a local flag via [`ShutdownFlag::new`] and trigger it with
//! [`ShutdownFlag::request`]; only `install` touches process signal state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Set by the signal handler. Signal-handler-safe: a single atomic store.
static SIGNALED: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
extern "C" fn on_signal(_signal: libc::c_int) {
    SIGNALED.store(true, Ordering::SeqCst);
}

/// Cooperative shutdown token checked by the coordinator.
#[derive(Clone, Default)]
pub struct ShutdownFlag {
    local: Arc<AtomicBool>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `SIGINT`/`SIGTERM` handlers feeding this flag.
    ///
    /// No-op on non-unix targets.
    pub fn install(&self) {
        #[cfg(unix)]
        unsafe {
            let handler = on_signal as extern "C" fn(libc::c_int);
            libc::signal(libc::SIGINT, handler as libc::sighandler_t);
            libc::signal(libc::SIGTERM, handler as libc::sighandler_t);
        }
    }

    /// Request shutdown programmatically (used by tests).
    pub fn request(&self) {
        self.local.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.local.load(Ordering::SeqCst) || SIGNALED.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unset_and_latches() {
        let flag = ShutdownFlag::new();
        assert!(!flag.is_requested());
        flag.request();
        assert!(flag.is_requested());
        assert!(flag.is_requested());
    }

    #[test]
    fn clones_share_state() {
        let flag = ShutdownFlag::new();
        let other = flag.clone();
        other.request();
        assert!(flag.is_requested());
    }
}
