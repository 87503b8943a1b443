//! Duplex Core - Real-time bridge between native audio callbacks and stream contexts

pub mod config;
pub mod engine;
pub mod error;
pub mod gc;
pub mod host;
pub mod ring;
pub mod stream;
pub mod types;
pub mod util;

pub use error::{BridgeError, BridgeResult, NativeCode, ParameterKind};
pub use stream::{AudioCallback, CallbackData, CallbackResult, Stream, StreamManager, StreamState};
pub use types::*;
