//! RT-safe diagnostics for the stream bridge
//!
//! The hardware thread never logs. Anything worth reporting from inside a
//! period is pushed as a small [`Diagnostic`] value into a pre-allocated
//! `rtrb` queue owned by the stream's context. The control thread drains the
//! queue and forwards each entry to the `log` facade.
//!
//! A full queue drops the new entry and bumps a counter instead of blocking.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::types::StreamId;

/// Default number of diagnostics buffered per stream
pub const DEFAULT_DIAGNOSTICS_CAPACITY: usize = 64;

/// Something the bridge noticed during a period
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Diagnostic {
    /// Callback returned an integer outside {0, 1, 2}
    InvalidVerdict { raw: i64 },
    /// Callback returned a value that is not an integer at all
    InvalidVerdictKind { kind: &'static str },
    /// Callback produced more output than the hardware period holds
    BufferOverrun { produced: usize, capacity: usize },
    /// Hardware delivered more input than the context buffer holds
    InputTruncated { received: usize, capacity: usize },
    /// Hardware asked for more frames than the stream was opened with
    FrameCountExceeded { frames: usize, frames_per_buffer: usize },
    /// Processing callback panicked; the period was aborted
    CallbackPanicked,
    /// Finished callback panicked
    FinishedCallbackPanicked,
}

impl Diagnostic {
    /// Whether this entry describes a fault rather than a recoverable glitch
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            Diagnostic::CallbackPanicked | Diagnostic::FinishedCallbackPanicked
        )
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::InvalidVerdict { raw } => {
                write!(f, "callback returned invalid verdict {}, continuing", raw)
            }
            Diagnostic::InvalidVerdictKind { kind } => {
                write!(f, "callback returned a {} instead of a verdict, continuing", kind)
            }
            Diagnostic::BufferOverrun { produced, capacity } => write!(
                f,
                "callback produced {} output bytes but the hardware period holds {}, truncated",
                produced, capacity
            ),
            Diagnostic::InputTruncated { received, capacity } => write!(
                f,
                "hardware delivered {} input bytes but the context holds {}, truncated",
                received, capacity
            ),
            Diagnostic::FrameCountExceeded {
                frames,
                frames_per_buffer,
            } => write!(
                f,
                "hardware requested {} frames, stream was opened with {}",
                frames, frames_per_buffer
            ),
            Diagnostic::CallbackPanicked => write!(f, "processing callback panicked, aborting"),
            Diagnostic::FinishedCallbackPanicked => write!(f, "finished callback panicked"),
        }
    }
}

/// A diagnostic tagged with the stream it came from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamDiagnostic {
    pub stream: StreamId,
    pub diagnostic: Diagnostic,
}

/// Producer half, owned by the stream context and used on the RT thread
pub struct DiagnosticsSender {
    producer: rtrb::Producer<Diagnostic>,
    dropped: Arc<AtomicU64>,
}

impl DiagnosticsSender {
    /// Queue a diagnostic without blocking
    #[inline]
    pub fn report(&mut self, diagnostic: Diagnostic) {
        if self.producer.push(diagnostic).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Consumer half, kept by the stream manager on the control thread
pub struct DiagnosticsReceiver {
    stream: StreamId,
    consumer: rtrb::Consumer<Diagnostic>,
    dropped: Arc<AtomicU64>,
}

impl DiagnosticsReceiver {
    pub fn stream(&self) -> StreamId {
        self.stream
    }

    /// Pop everything queued so far, logging each entry
    pub fn drain_into(&mut self, out: &mut Vec<StreamDiagnostic>) {
        while let Ok(diagnostic) = self.consumer.pop() {
            if diagnostic.is_fault() {
                log::error!("{}: {}", self.stream, diagnostic);
            } else {
                log::warn!("{}: {}", self.stream, diagnostic);
            }
            out.push(StreamDiagnostic {
                stream: self.stream,
                diagnostic,
            });
        }
        let dropped = self.dropped.swap(0, Ordering::Relaxed);
        if dropped > 0 {
            log::warn!("{}: {} diagnostics dropped (queue full)", self.stream, dropped);
        }
    }
}

/// Create the diagnostics queue for one stream
pub fn diagnostics_channel(
    stream: StreamId,
    capacity: usize,
) -> (DiagnosticsSender, DiagnosticsReceiver) {
    let (producer, consumer) = rtrb::RingBuffer::new(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    (
        DiagnosticsSender {
            producer,
            dropped: Arc::clone(&dropped),
        },
        DiagnosticsReceiver {
            stream,
            consumer,
            dropped,
        },
    )
}
