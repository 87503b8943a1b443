//! Atomic switches shared between the control thread and the engine bridge

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// State read by the hardware thread every period
///
/// - `ready`: the engine has finished initialising
/// - `paused`: reversible; periods short-circuit to `Continue`
/// - `exit`: one-way; the next period returns `Abort`
/// - `input_started`: hardware input is forwarded instead of zeros
#[derive(Debug, Default)]
pub struct EngineFlags {
    ready: AtomicBool,
    paused: AtomicBool,
    exit: AtomicBool,
    input_started: AtomicBool,
}

impl EngineFlags {
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    #[inline]
    pub fn exit_requested(&self) -> bool {
        self.exit.load(Ordering::Acquire)
    }

    #[inline]
    pub fn input_started(&self) -> bool {
        self.input_started.load(Ordering::Acquire)
    }
}

/// Control-thread handle over [`EngineFlags`]
#[derive(Debug, Clone, Default)]
pub struct EngineControl {
    flags: Arc<EngineFlags>,
}

impl EngineControl {
    pub fn new(flags: Arc<EngineFlags>) -> Self {
        Self { flags }
    }

    pub fn flags(&self) -> &Arc<EngineFlags> {
        &self.flags
    }

    pub fn set_ready(&self, ready: bool) {
        self.flags.ready.store(ready, Ordering::Release);
    }

    pub fn start_input(&self) {
        self.flags.input_started.store(true, Ordering::Release);
    }

    pub fn stop_input(&self) {
        self.flags.input_started.store(false, Ordering::Release);
    }

    pub fn pause(&self) {
        self.flags.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.flags.paused.store(false, Ordering::Release);
    }

    /// Make the next period end the stream; cannot be undone
    pub fn request_exit(&self) {
        self.flags.exit.store(true, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.flags.is_paused()
    }

    pub fn exit_requested(&self) -> bool {
        self.flags.exit_requested()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_toggles_flags() {
        let control = EngineControl::default();
        let flags = Arc::clone(control.flags());
        assert!(!flags.is_ready());

        control.set_ready(true);
        control.start_input();
        control.pause();
        assert!(flags.is_ready() && flags.input_started() && flags.is_paused());

        control.resume();
        control.stop_input();
        assert!(!flags.is_paused());
        assert!(!flags.input_started());

        control.request_exit();
        assert!(control.exit_requested());
    }
}
