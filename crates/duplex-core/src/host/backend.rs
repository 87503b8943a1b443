//! Native audio layer boundary
//!
//! The [`StreamManager`](crate::stream::StreamManager) drives every native
//! layer through [`AudioHost`]. A host owns the hardware threads; the manager
//! hands it two trampolines when a stream opens:
//!
//! - a [`NativeCallback`], run once per period on the hardware thread,
//! - a [`NativeFinished`], run once whenever a running stream stops.
//!
//! Hosts must serialize callbacks of one stream, and `stop`/`abort`/`close`
//! must not return while a callback of that stream is still executing.

use crate::error::BridgeResult;
use crate::types::{StatusFlags, StreamConfig, TimeInfo, Verdict};

use super::catalog::DeviceCatalog;

/// Opaque native stream handle, unique per host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeHandle(pub u64);

/// Hardware buffers and metadata for one period
pub struct PeriodIo<'a> {
    /// Interleaved input, `frames × channels × sample_size` bytes
    pub input: Option<&'a [u8]>,
    /// Interleaved output region to fill
    pub output: Option<&'a mut [u8]>,
    pub frames: usize,
    pub time: TimeInfo,
    pub status: StatusFlags,
}

/// Per-period trampoline registered at open time
pub type NativeCallback = Box<dyn FnMut(PeriodIo<'_>) -> Verdict + Send + 'static>;

/// Stop notification registered at open time
pub type NativeFinished = Box<dyn FnMut() + Send + 'static>;

/// Latency and rate the native layer actually granted
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NativeStreamInfo {
    pub input_latency: f64,
    pub output_latency: f64,
    pub sample_rate: f64,
}

/// A native audio layer (real hardware or virtual)
pub trait AudioHost: DeviceCatalog {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// Check a configuration without opening anything
    fn is_format_supported(&self, config: &StreamConfig) -> BridgeResult<()>;

    fn open(
        &mut self,
        config: &StreamConfig,
        callback: NativeCallback,
        finished: NativeFinished,
    ) -> BridgeResult<NativeHandle>;

    fn start(&mut self, handle: NativeHandle) -> BridgeResult<()>;

    /// Stop after the buffered output has played
    fn stop(&mut self, handle: NativeHandle) -> BridgeResult<()>;

    /// Stop immediately, discarding buffered samples
    fn abort(&mut self, handle: NativeHandle) -> BridgeResult<()>;

    /// Release the native stream; no callback runs after this returns
    fn close(&mut self, handle: NativeHandle) -> BridgeResult<()>;

    /// Whether the stream is currently producing callbacks
    fn is_active(&self, handle: NativeHandle) -> BridgeResult<bool>;

    fn stream_info(&self, handle: NativeHandle) -> BridgeResult<NativeStreamInfo>;

    /// Host clock in seconds
    fn stream_time(&self, handle: NativeHandle) -> BridgeResult<f64>;
}
