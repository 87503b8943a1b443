//! Stream contexts, the real-time bridge and the stream lifecycle
//!
//! # Architecture
//!
//! - **Control thread**: owns the [`StreamManager`], opens and closes streams,
//!   drains diagnostics
//! - **Hardware thread**: enters through [`StreamBridge::process`], finds the
//!   stream's [`ContextCell`] in a lock-free registry and runs the user
//!   [`AudioCallback`]
//! - **GC thread**: frees retired registry maps and closed contexts

mod blocking;
mod bridge;
mod callback;
mod context;
mod diagnostics;
mod lifecycle;

pub use blocking::{BLOCKING_QUEUE_PERIODS, DEFAULT_BLOCKING_TIMEOUT};
pub use bridge::{ContextRegistry, StreamBridge};
pub use callback::{AudioCallback, CallbackResult, FinishedCallback};
pub use context::{CallbackContext, CallbackData, ContextCell, ContextMetrics, InputBuffer, OutputBuffer};
pub use diagnostics::{
    diagnostics_channel, Diagnostic, DiagnosticsReceiver, DiagnosticsSender, StreamDiagnostic,
    DEFAULT_DIAGNOSTICS_CAPACITY,
};
pub use lifecycle::{Stream, StreamManager, StreamState};
