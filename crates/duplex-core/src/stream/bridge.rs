//! Real-time entry point invoked by the native layer once per period
//!
//! ```text
//!  hardware thread                         control thread
//!  ───────────────                         ──────────────
//!  process(id, io)                         open / close
//!    │ registry.get(id)  ◄── lock-free ──►   registry.insert / remove
//!    │ try_lock(context)                     (copy-on-write map swap)
//!    │ input  → context.input
//!    │ callback.process(data)
//!    │ context.output → output (truncated)
//!    └ record duration
//! ```
//!
//! The registry is a `basedrop::SharedCell` holding an immutable map of
//! stream contexts. The control thread replaces the whole map on every open
//! or close; the hardware thread only clones the current snapshot. Old
//! snapshots and closed contexts are freed on the GC thread, so a context
//! stays valid for as long as any in-flight period still references it.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, TryLockError};
use std::time::Instant;

use basedrop::{Handle, Shared, SharedCell};

use super::context::{CallbackContext, ContextCell};
use super::diagnostics::Diagnostic;
use crate::host::PeriodIo;
use crate::types::{SampleFormat, StreamId, Verdict};

type ContextMap = HashMap<StreamId, Shared<ContextCell>>;

/// Stream identity → context table
pub struct ContextRegistry {
    map: SharedCell<ContextMap>,
    handle: Handle,
    /// Serializes writers; never taken on the hardware thread
    writer: Mutex<()>,
}

impl ContextRegistry {
    pub fn new(handle: Handle) -> Self {
        Self {
            map: SharedCell::new(Shared::new(&handle, HashMap::new())),
            handle,
            writer: Mutex::new(()),
        }
    }

    /// Look up a context. Lock-free, safe on the hardware thread.
    #[inline]
    pub fn get(&self, id: StreamId) -> Option<Shared<ContextCell>> {
        self.map.get().get(&id).cloned()
    }

    pub fn contains(&self, id: StreamId) -> bool {
        self.map.get().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.map.get().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<StreamId> {
        let mut ids: Vec<_> = self.map.get().keys().copied().collect();
        ids.sort();
        ids
    }

    pub(crate) fn insert(&self, cell: Shared<ContextCell>) {
        self.update(|map| {
            map.insert(cell.id(), cell);
        });
    }

    pub(crate) fn remove(&self, id: StreamId) -> Option<Shared<ContextCell>> {
        let mut removed = None;
        self.update(|map| removed = map.remove(&id));
        removed
    }

    fn update(&self, edit: impl FnOnce(&mut ContextMap)) {
        let _writer = self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut next: ContextMap = (*self.map.get()).clone();
        edit(&mut next);
        self.map.set(Shared::new(&self.handle, next));
    }
}

/// The callback trampoline target shared by every stream of a manager
pub struct StreamBridge {
    registry: ContextRegistry,
    unknown_handles: AtomicU64,
}

impl StreamBridge {
    pub fn new(handle: Handle) -> Self {
        Self {
            registry: ContextRegistry::new(handle),
            unknown_handles: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &ContextRegistry {
        &self.registry
    }

    /// Invocations that referenced no registered context, since last taken
    pub fn take_unknown_handle_hits(&self) -> u64 {
        self.unknown_handles.swap(0, Ordering::Relaxed)
    }

    /// Run one period for `id`
    ///
    /// Returns [`Verdict::Abort`] without touching any buffer when the stream
    /// has no context. A period that finds the context busy emits silence.
    /// Never blocks.
    pub fn process(&self, id: StreamId, io: PeriodIo<'_>) -> Verdict {
        let started = Instant::now();

        let Some(cell) = self.registry.get(id) else {
            self.unknown_handles.fetch_add(1, Ordering::Relaxed);
            return Verdict::Abort;
        };

        let mut context = match cell.state.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                cell.metrics().record_busy();
                if let Some(hardware) = io.output {
                    hardware.fill(cell.output_silence());
                }
                return Verdict::Continue;
            }
        };

        let verdict = run_period(&mut context, io);

        let elapsed = started.elapsed();
        context.data.last_call_duration = elapsed;
        cell.metrics().record_call(elapsed);
        verdict
    }

    /// Run the finished callback of `id`, at most once per started run
    pub fn notify_finished(&self, id: StreamId) {
        let Some(cell) = self.registry.get(id) else {
            return;
        };
        if !cell.metrics().take_finished() {
            return;
        }
        let finished = cell.finished();
        let Some(callback) = &*finished else {
            return;
        };

        let mut context = match cell.state.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                // Leave it armed for the next notification
                cell.metrics().arm_finished();
                return;
            }
        };

        let CallbackContext {
            data, diagnostics, ..
        } = &mut *context;
        if panic::catch_unwind(AssertUnwindSafe(|| callback(&*data))).is_err() {
            diagnostics.report(Diagnostic::FinishedCallbackPanicked);
        }
    }
}

/// Steps 2..6 of a period, on an exclusively held context
fn run_period(context: &mut CallbackContext, io: PeriodIo<'_>) -> Verdict {
    let PeriodIo {
        input,
        output,
        frames,
        time,
        status,
    } = io;
    let CallbackContext {
        data,
        callback,
        diagnostics,
    } = context;

    if frames > data.frames_per_buffer() {
        diagnostics.report(Diagnostic::FrameCountExceeded {
            frames,
            frames_per_buffer: data.frames_per_buffer(),
        });
    }

    data.has_input = false;
    if let (Some(src), Some(buffer)) = (input, data.input.as_mut()) {
        let kept = buffer.fill(src);
        if kept < src.len() {
            diagnostics.report(Diagnostic::InputTruncated {
                received: src.len(),
                capacity: buffer.capacity(),
            });
        }
        data.has_input = true;
    }

    data.frames = frames;
    data.time = time;
    data.status = status;

    data.has_output = output.is_some() && data.output.is_some();
    if let Some(buffer) = data.output.as_mut() {
        buffer.reset();
    }

    let (verdict, panicked) =
        match panic::catch_unwind(AssertUnwindSafe(|| callback.process(&mut *data))) {
            Ok(result) => match result.validate() {
                Ok(verdict) => (verdict, false),
                Err(diagnostic) => {
                    diagnostics.report(diagnostic);
                    (Verdict::Continue, false)
                }
            },
            Err(_) => {
                diagnostics.report(Diagnostic::CallbackPanicked);
                (Verdict::Abort, true)
            }
        };

    if let Some(hardware) = output {
        let silence = data.output_format().map_or(0, SampleFormat::silence_byte);
        match data.output.as_ref().filter(|_| !panicked) {
            Some(buffer) => {
                let produced = buffer.as_bytes();
                let n = produced.len().min(hardware.len());
                hardware[..n].copy_from_slice(&produced[..n]);
                hardware[n..].fill(silence);
                if buffer.requested() > hardware.len() {
                    diagnostics.report(Diagnostic::BufferOverrun {
                        produced: buffer.requested(),
                        capacity: hardware.len(),
                    });
                }
            }
            None => hardware.fill(silence),
        }
    }

    verdict
}
