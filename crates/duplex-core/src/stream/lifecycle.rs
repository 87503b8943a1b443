//! Stream lifecycle: open, start, stop, abort, close
//!
//! ```text
//!            open            start
//!  Created ───────► Opened ───────► Started ◄──────┐
//!     ▲                               │  │    start │
//!     │                          stop │  │ abort    │
//!     │                               ▼  ▼          │
//!     │                         Stopped / Aborted ──┘
//!     │  open (fresh id)              │
//!     └─────────── Closed ◄───────────┘ close
//! ```
//!
//! A context is reachable from the registry exactly while the stream is
//! between `Opened` and `Stopped`/`Aborted`. Close erases the registry entry
//! before the native handle is released and drops the context only once the
//! native layer has confirmed no callback is in flight.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, TryLockError};
use std::time::Duration;

use basedrop::{Handle, Shared};

use super::blocking::{blocking_channel, BlockingEndpoint, DEFAULT_BLOCKING_TIMEOUT};
use super::bridge::StreamBridge;
use super::callback::{AudioCallback, FinishedCallback};
use super::context::{CallbackContext, CallbackData, ContextCell};
use super::diagnostics::{
    diagnostics_channel, DiagnosticsReceiver, StreamDiagnostic, DEFAULT_DIAGNOSTICS_CAPACITY,
};
use crate::error::{BridgeError, BridgeResult, NativeCode};
use crate::gc::GcThread;
use crate::host::{
    AudioHost, DeviceCatalog, NativeCallback, NativeFinished, NativeHandle, NativeStreamInfo, PeriodIo,
};
use crate::types::{SampleFormat, StatusFlags, StreamConfig, StreamId, StreamParameters};

/// Position of a stream in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StreamState {
    #[default]
    Created,
    Opened,
    Started,
    Stopped,
    Aborted,
    Closed,
}

impl StreamState {
    pub fn name(self) -> &'static str {
        match self {
            StreamState::Created => "created",
            StreamState::Opened => "opened",
            StreamState::Started => "started",
            StreamState::Stopped => "stopped",
            StreamState::Aborted => "aborted",
            StreamState::Closed => "closed",
        }
    }

    /// Whether a native stream and a registry entry exist
    pub fn is_open(self) -> bool {
        matches!(
            self,
            StreamState::Opened | StreamState::Started | StreamState::Stopped | StreamState::Aborted
        )
    }
}

/// A stream description plus its lifecycle position
///
/// The value is reusable: after `close` it can be opened again and receives
/// a fresh identity and a fresh context.
#[derive(Debug, Clone)]
pub struct Stream {
    config: StreamConfig,
    id: Option<StreamId>,
    state: StreamState,
}

impl Stream {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            id: None,
            state: StreamState::Created,
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Replace the configuration; only while the stream is not open
    pub fn set_config(&mut self, config: StreamConfig) -> BridgeResult<()> {
        self.ensure_closed("configure")?;
        self.config = config;
        Ok(())
    }

    pub fn set_input(&mut self, input: Option<StreamParameters>) -> BridgeResult<()> {
        self.ensure_closed("configure")?;
        self.config.input = input;
        Ok(())
    }

    pub fn set_output(&mut self, output: Option<StreamParameters>) -> BridgeResult<()> {
        self.ensure_closed("configure")?;
        self.config.output = output;
        Ok(())
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) -> BridgeResult<()> {
        self.ensure_closed("configure")?;
        self.config.sample_rate = sample_rate;
        Ok(())
    }

    pub fn set_frames_per_buffer(&mut self, frames: u32) -> BridgeResult<()> {
        self.ensure_closed("configure")?;
        self.config.frames_per_buffer = frames;
        Ok(())
    }

    /// Identity of the current open run, if any
    pub fn id(&self) -> Option<StreamId> {
        self.id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    fn ensure_closed(&self, operation: &'static str) -> BridgeResult<()> {
        if self.state.is_open() {
            return Err(BridgeError::InvalidState {
                operation,
                state: self.state.name(),
            });
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Manager
// ═══════════════════════════════════════════════════════════════════════════════

/// Coordinator for every stream opened on one native host
///
/// Owns the host, the shared [`StreamBridge`] and the GC thread that frees
/// retired contexts. Construct one explicitly and pass it where needed.
pub struct StreamManager<H: AudioHost> {
    host: H,
    bridge: Arc<StreamBridge>,
    /// Every `Handle` clone lives in this struct; all drop before `gc`
    handle: Handle,
    next_id: u64,
    natives: HashMap<StreamId, NativeHandle>,
    diagnostics: HashMap<StreamId, DiagnosticsReceiver>,
    diagnostics_capacity: usize,
    /// Queue ends of streams opened without a callback
    blocking: HashMap<StreamId, BlockingEndpoint>,
    blocking_timeout: Duration,
    /// Declared last so retired allocations are collected on drop
    gc: GcThread,
}

impl<H: AudioHost> StreamManager<H> {
    pub fn new(host: H) -> BridgeResult<Self> {
        let (gc, handle) = GcThread::spawn()?;
        log::info!("Stream manager started on {} host", host.name());
        Ok(Self {
            host,
            bridge: Arc::new(StreamBridge::new(handle.clone())),
            handle,
            next_id: 1,
            natives: HashMap::new(),
            diagnostics: HashMap::new(),
            diagnostics_capacity: DEFAULT_DIAGNOSTICS_CAPACITY,
            blocking: HashMap::new(),
            blocking_timeout: DEFAULT_BLOCKING_TIMEOUT,
            gc,
        })
    }

    /// Capacity of the diagnostics queue of streams opened from now on
    pub fn with_diagnostics_capacity(mut self, capacity: usize) -> Self {
        self.set_diagnostics_capacity(capacity);
        self
    }

    pub fn set_diagnostics_capacity(&mut self, capacity: usize) {
        self.diagnostics_capacity = capacity.max(1);
    }

    pub fn diagnostics_capacity(&self) -> usize {
        self.diagnostics_capacity
    }

    /// Longest a single blocking read or write waits
    pub fn set_blocking_timeout(&mut self, timeout: Duration) {
        self.blocking_timeout = timeout;
    }

    pub fn blocking_timeout(&self) -> Duration {
        self.blocking_timeout
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn bridge(&self) -> &Arc<StreamBridge> {
        &self.bridge
    }

    /// Native handle backing an open stream
    pub fn native_handle(&self, stream: &Stream) -> Option<NativeHandle> {
        stream.id.and_then(|id| self.natives.get(&id).copied())
    }

    /// Open `stream` with `callback` as its per-period processor
    pub fn open(
        &mut self,
        stream: &mut Stream,
        callback: impl AudioCallback,
    ) -> BridgeResult<StreamId> {
        stream.ensure_closed("open")?;
        stream.config.validate()?;
        // Refuse before any per-stream buffer is allocated
        if let Err(err) = self.host.is_format_supported(&stream.config) {
            log::warn!("{} host refused stream configuration: {}", self.host.name(), err);
            return Err(err);
        }

        let id = StreamId(self.next_id);
        self.next_id += 1;

        let (sender, receiver) = diagnostics_channel(id, self.diagnostics_capacity);
        let context = CallbackContext::new(&stream.config, Box::new(callback), sender);
        let cell = Shared::new(
            &self.handle,
            ContextCell::new(&self.handle, id, &stream.config, context),
        );

        let bridge = Arc::clone(&self.bridge);
        let on_period: NativeCallback = Box::new(move |io: PeriodIo<'_>| bridge.process(id, io));
        let bridge = Arc::clone(&self.bridge);
        let on_finished: NativeFinished = Box::new(move || bridge.notify_finished(id));

        let native = match self.host.open(&stream.config, on_period, on_finished) {
            Ok(native) => native,
            Err(err) => {
                log::warn!("Failed to open {}: {}", id, err);
                return Err(err);
            }
        };

        self.bridge.registry().insert(cell);
        self.natives.insert(id, native);
        self.diagnostics.insert(id, receiver);
        stream.id = Some(id);
        stream.state = StreamState::Opened;

        log::info!(
            "Opened {} ({} in / {} out, {} Hz, {} frames)",
            id,
            stream.config.input_channels(),
            stream.config.output_channels(),
            stream.config.sample_rate,
            stream.config.frames_per_buffer
        );
        Ok(id)
    }

    /// Open `stream` without a callback, for [`read_stream`](Self::read_stream)
    /// and [`write_stream`](Self::write_stream)
    pub fn open_blocking(&mut self, stream: &mut Stream) -> BridgeResult<StreamId> {
        stream.ensure_closed("open")?;
        self.is_format_supported(&stream.config)?;
        let (callback, endpoint) = blocking_channel(&stream.config);
        let id = self.open(stream, callback)?;
        self.blocking.insert(id, endpoint);
        Ok(id)
    }

    /// Read `frames` frames of input into `buf`
    ///
    /// Blocks until the frames arrive. Returns [`StatusFlags::INPUT_OVERFLOW`]
    /// when input was dropped since the previous read.
    pub fn read_stream(&mut self, stream: &Stream, buf: &mut [u8], frames: usize) -> BridgeResult<StatusFlags> {
        let (id, native) = self.resolve(stream)?;
        let host = &self.host;
        let endpoint = self
            .blocking
            .get_mut(&id)
            .ok_or_else(|| NativeCode::CanNotReadFromACallbackStream.into_error(None))?;
        endpoint.read(buf, frames, self.blocking_timeout, || {
            host.is_active(native).unwrap_or(false)
        })
    }

    /// Write `frames` frames of output from `buf`
    ///
    /// Blocks until the queue has room. Returns
    /// [`StatusFlags::OUTPUT_UNDERFLOW`] when silence was played since the
    /// previous write.
    pub fn write_stream(&mut self, stream: &Stream, buf: &[u8], frames: usize) -> BridgeResult<StatusFlags> {
        let (id, native) = self.resolve(stream)?;
        let host = &self.host;
        let endpoint = self
            .blocking
            .get_mut(&id)
            .ok_or_else(|| NativeCode::CanNotWriteToACallbackStream.into_error(None))?;
        endpoint.write(buf, frames, self.blocking_timeout, || {
            host.is_active(native).unwrap_or(false)
        })
    }

    /// Frames a read can take without waiting
    pub fn stream_read_available(&self, stream: &Stream) -> BridgeResult<usize> {
        let (id, _) = self.resolve(stream)?;
        self.blocking
            .get(&id)
            .ok_or_else(|| NativeCode::CanNotReadFromACallbackStream.into_error(None))?
            .read_available()
    }

    /// Frames a write can queue without waiting
    pub fn stream_write_available(&self, stream: &Stream) -> BridgeResult<usize> {
        let (id, _) = self.resolve(stream)?;
        self.blocking
            .get(&id)
            .ok_or_else(|| NativeCode::CanNotWriteToACallbackStream.into_error(None))?
            .write_available()
    }

    /// Open a stream on the host's default devices
    ///
    /// A channel count of zero leaves that direction out.
    pub fn open_default(
        &mut self,
        input_channels: u16,
        output_channels: u16,
        format: SampleFormat,
        sample_rate: f64,
        frames_per_buffer: u32,
        callback: impl AudioCallback,
    ) -> BridgeResult<Stream> {
        let input = if input_channels > 0 {
            let device = self.host.default_input_device().ok_or_else(|| {
                BridgeError::DeviceUnavailable("no default input device".to_string())
            })?;
            let latency = self
                .host
                .device_info(device)
                .map_or(0.0, |d| d.default_low_input_latency);
            Some(StreamParameters::new(device, input_channels, format).with_suggested_latency(latency))
        } else {
            None
        };
        let output = if output_channels > 0 {
            let device = self.host.default_output_device().ok_or_else(|| {
                BridgeError::DeviceUnavailable("no default output device".to_string())
            })?;
            let latency = self
                .host
                .device_info(device)
                .map_or(0.0, |d| d.default_low_output_latency);
            Some(StreamParameters::new(device, output_channels, format).with_suggested_latency(latency))
        } else {
            None
        };

        let mut stream = Stream::new(StreamConfig::new(input, output, sample_rate, frames_per_buffer));
        self.open(&mut stream, callback)?;
        Ok(stream)
    }

    pub fn start(&mut self, stream: &mut Stream) -> BridgeResult<()> {
        let (id, native) = self.resolve(stream)?;
        let cell = self.cell(id)?;
        cell.metrics().arm_finished();
        if let Err(err) = self.host.start(native) {
            cell.metrics().take_finished();
            return Err(err);
        }
        stream.state = StreamState::Started;
        log::debug!("Started {}", id);
        Ok(())
    }

    /// Stop after buffered output has played
    pub fn stop(&mut self, stream: &mut Stream) -> BridgeResult<()> {
        let (id, native) = self.resolve(stream)?;
        let stopped = self.host.stop(native);
        Self::settle_halt(stream, stopped, StreamState::Stopped)?;
        log::debug!("Stopped {}", id);
        Ok(())
    }

    /// Stop immediately, discarding buffered samples
    pub fn abort(&mut self, stream: &mut Stream) -> BridgeResult<()> {
        let (id, native) = self.resolve(stream)?;
        let aborted = self.host.abort(native);
        Self::settle_halt(stream, aborted, StreamState::Aborted)?;
        log::debug!("Aborted {}", id);
        Ok(())
    }

    /// A stream the callback already ended reports `StreamIsStopped`
    /// natively while it is still `Started` here; that still counts.
    fn settle_halt(
        stream: &mut Stream,
        result: BridgeResult<()>,
        halted: StreamState,
    ) -> BridgeResult<()> {
        match result {
            Ok(()) => {}
            Err(BridgeError::StreamIsStopped) if stream.state == StreamState::Started => {}
            Err(err) => return Err(err),
        }
        stream.state = halted;
        Ok(())
    }

    /// Close the stream, aborting it first if it is running
    ///
    /// Fails with [`BridgeError::StreamNotFound`] for a stream that was never
    /// opened or is already closed, leaving the registry untouched.
    pub fn close(&mut self, stream: &mut Stream) -> BridgeResult<()> {
        let (id, native) = self.resolve(stream)?;
        let closed = self.release(id, native);
        stream.id = None;
        stream.state = StreamState::Closed;
        closed
    }

    fn release(&mut self, id: StreamId, native: NativeHandle) -> BridgeResult<()> {
        if self.host.is_active(native).unwrap_or(false) {
            if let Err(err) = self.host.abort(native) {
                log::warn!("Abort before closing {} failed: {}", id, err);
            }
        }

        let cell = self.bridge.registry().remove(id);
        let closed = self.host.close(native);
        self.natives.remove(&id);
        self.blocking.remove(&id);

        if let Some(mut receiver) = self.diagnostics.remove(&id) {
            let mut tail = Vec::new();
            receiver.drain_into(&mut tail);
        }
        // Native close has returned, no period references the context now
        drop(cell);
        self.gc.wake();

        match &closed {
            Ok(()) => log::info!("Closed {}", id),
            Err(err) => log::error!("Native close of {} failed: {}", id, err),
        }
        closed
    }

    /// Swap the finished callback; allowed while the stream runs
    pub fn set_finished_callback(
        &self,
        stream: &Stream,
        callback: Option<FinishedCallback>,
    ) -> BridgeResult<()> {
        let (id, _) = self.resolve(stream)?;
        let cell = self.cell(id)?;
        cell.set_finished(&self.handle, callback);
        Ok(())
    }

    pub fn is_stream_active(&self, stream: &Stream) -> BridgeResult<bool> {
        let (_, native) = self.resolve(stream)?;
        self.host.is_active(native)
    }

    pub fn is_stream_stopped(&self, stream: &Stream) -> BridgeResult<bool> {
        self.is_stream_active(stream).map(|active| !active)
    }

    pub fn stream_info(&self, stream: &Stream) -> BridgeResult<NativeStreamInfo> {
        let (_, native) = self.resolve(stream)?;
        self.host.stream_info(native)
    }

    pub fn stream_time(&self, stream: &Stream) -> BridgeResult<f64> {
        let (_, native) = self.resolve(stream)?;
        self.host.stream_time(native)
    }

    /// Last period's processing time over the period length
    pub fn stream_cpu_load(&self, stream: &Stream) -> BridgeResult<f64> {
        let (id, _) = self.resolve(stream)?;
        Ok(self.cell(id)?.cpu_load())
    }

    pub fn last_call_duration(&self, stream: &Stream) -> BridgeResult<Duration> {
        let (id, _) = self.resolve(stream)?;
        Ok(self.cell(id)?.metrics().last_call_duration())
    }

    /// Periods skipped because the context was held by the control thread
    pub fn busy_periods(&self, stream: &Stream) -> BridgeResult<u64> {
        let (id, _) = self.resolve(stream)?;
        Ok(self.cell(id)?.metrics().busy_periods())
    }

    /// Check a configuration against local rules and the native layer
    pub fn is_format_supported(&self, config: &StreamConfig) -> BridgeResult<()> {
        config.validate()?;
        self.host.is_format_supported(config)
    }

    /// Inspect the callback data of a stream that is not running
    pub fn inspect<R>(&self, stream: &Stream, read: impl FnOnce(&CallbackData) -> R) -> BridgeResult<R> {
        let (id, native) = self.resolve(stream)?;
        if self.host.is_active(native)? {
            return Err(BridgeError::InvalidState {
                operation: "inspect",
                state: stream.state.name(),
            });
        }
        let cell = self.cell(id)?;
        let context = match cell.state.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return Err(BridgeError::TimedOut),
        };
        Ok(read(context.data()))
    }

    /// Collect and log everything the hardware threads reported
    pub fn drain_diagnostics(&mut self) -> Vec<StreamDiagnostic> {
        let mut drained = Vec::new();
        let mut ids: Vec<_> = self.diagnostics.keys().copied().collect();
        ids.sort();
        for id in ids {
            if let Some(receiver) = self.diagnostics.get_mut(&id) {
                receiver.drain_into(&mut drained);
            }
        }
        let unknown = self.bridge.take_unknown_handle_hits();
        if unknown > 0 {
            log::warn!("{} periods referenced a stream with no context", unknown);
        }
        drained
    }

    /// Close every remaining native stream and join the GC thread
    ///
    /// Returns whether every retired context was reclaimed and the collector
    /// freed. That fails only while something outside the manager still
    /// holds a context or the bridge.
    pub fn shutdown(self) -> bool {
        let cleaned = self.gc.cleanup_flag();
        // Drop closes the streams, then releases the bridge and handle before the GC thread
        drop(self);
        cleaned.load(Ordering::Acquire)
    }

    fn close_all(&mut self) {
        let mut open: Vec<_> = self.natives.iter().map(|(id, native)| (*id, *native)).collect();
        open.sort_by_key(|(id, _)| *id);
        for (id, native) in open {
            // Errors are logged by release
            let _ = self.release(id, native);
        }
    }

    fn resolve(&self, stream: &Stream) -> BridgeResult<(StreamId, NativeHandle)> {
        if !stream.state.is_open() {
            return Err(BridgeError::StreamNotFound);
        }
        let id = stream.id.ok_or(BridgeError::StreamNotFound)?;
        let native = self.natives.get(&id).copied().ok_or(BridgeError::StreamNotFound)?;
        Ok((id, native))
    }

    fn cell(&self, id: StreamId) -> BridgeResult<Shared<ContextCell>> {
        self.bridge.registry().get(id).ok_or(BridgeError::ContextNotFound)
    }
}

impl<H: AudioHost> Drop for StreamManager<H> {
    fn drop(&mut self) {
        self.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::VirtualHost;
    use crate::stream::diagnostics::Diagnostic;
    use crate::types::Verdict;
    use crate::error::ParameterKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manager() -> StreamManager<VirtualHost> {
        let _ = env_logger::builder().is_test(true).try_init();
        StreamManager::new(VirtualHost::new()).unwrap()
    }

    fn duplex_stream(frames: u32) -> Stream {
        let p = StreamParameters::new(0, 2, SampleFormat::Float32);
        Stream::new(StreamConfig::new(Some(p), Some(p), 48000.0, frames))
    }

    fn silent(_: &mut CallbackData) -> Verdict {
        Verdict::Continue
    }

    fn counter() -> (Arc<AtomicUsize>, FinishedCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let hits = Arc::clone(&count);
        let callback: FinishedCallback = Box::new(move |_: &CallbackData| {
            hits.fetch_add(1, Ordering::SeqCst);
        });
        (count, callback)
    }

    fn f32_bytes(samples: &[f32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
    }

    fn f32_samples(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    #[test]
    fn test_lifecycle_ordering() {
        let mut mgr = manager();
        let mut stream = duplex_stream(256);

        let id = mgr.open(&mut stream, silent).unwrap();
        assert_eq!(stream.state(), StreamState::Opened);
        assert!(mgr.bridge().registry().contains(id));
        assert!(!mgr.is_stream_active(&stream).unwrap());

        mgr.start(&mut stream).unwrap();
        assert_eq!(stream.state(), StreamState::Started);
        assert!(mgr.is_stream_active(&stream).unwrap());

        mgr.stop(&mut stream).unwrap();
        assert_eq!(stream.state(), StreamState::Stopped);
        assert!(mgr.is_stream_stopped(&stream).unwrap());
        assert!(mgr.bridge().registry().contains(id));

        mgr.close(&mut stream).unwrap();
        assert_eq!(stream.state(), StreamState::Closed);
        assert!(!mgr.bridge().registry().contains(id));
        assert_eq!(mgr.host().open_streams(), 0);
    }

    #[test]
    fn test_close_twice_returns_stream_not_found() {
        let mut mgr = manager();
        let mut other = duplex_stream(64);
        mgr.open(&mut other, silent).unwrap();

        let mut stream = duplex_stream(64);
        mgr.open(&mut stream, silent).unwrap();
        mgr.close(&mut stream).unwrap();
        let before = mgr.bridge().registry().ids();

        assert_eq!(mgr.close(&mut stream), Err(BridgeError::StreamNotFound));
        assert_eq!(mgr.bridge().registry().ids(), before);
        assert_eq!(mgr.host().open_streams(), 1);
    }

    #[test]
    fn test_close_before_open() {
        let mut mgr = manager();
        let mut stream = duplex_stream(64);
        assert_eq!(mgr.close(&mut stream), Err(BridgeError::StreamNotFound));
        assert!(mgr.bridge().registry().is_empty());
        assert_eq!(stream.state(), StreamState::Created);
    }

    #[test]
    fn test_rejected_open_leaves_no_registry_entry() {
        let mut mgr = manager();
        let mut stream = duplex_stream(64);
        stream.set_sample_rate(12345.0).unwrap();

        let err = mgr.open(&mut stream, silent).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::InvalidParameter { parameter: ParameterKind::SampleRate, .. }
        ));
        assert!(mgr.bridge().registry().is_empty());
        assert_eq!(stream.state(), StreamState::Created);
        assert_eq!(stream.id(), None);

        let mut too_wide = Stream::new(StreamConfig::new(
            None,
            Some(StreamParameters::new(0, 6, SampleFormat::Float32)),
            48000.0,
            64,
        ));
        let err = mgr.open(&mut too_wide, silent).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::InvalidParameter { parameter: ParameterKind::ChannelCount, .. }
        ));
        assert!(mgr.bridge().registry().is_empty());
    }

    #[test]
    fn test_oversized_buffer_refused_before_allocation() {
        let mut mgr = manager();
        for frames in [u32::MAX, crate::host::VIRTUAL_MAX_FRAMES + 1] {
            let mut stream = duplex_stream(frames);
            let err = mgr.open(&mut stream, silent).unwrap_err();
            assert!(matches!(
                err,
                BridgeError::InvalidParameter { parameter: ParameterKind::BufferSize, .. }
            ));
            assert_eq!(stream.state(), StreamState::Created);
        }
        assert!(mgr.bridge().registry().is_empty());
        assert_eq!(mgr.host().open_streams(), 0);

        let mut fits = duplex_stream(crate::host::VIRTUAL_MAX_FRAMES);
        mgr.open(&mut fits, silent).unwrap();
        assert_eq!(mgr.bridge().registry().len(), 1);
    }

    #[test]
    fn test_local_validation_runs_before_native() {
        let mut mgr = manager();
        let mut stream = Stream::new(StreamConfig::new(None, None, 48000.0, 64));
        let err = mgr.open(&mut stream, silent).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::InvalidParameter { parameter: ParameterKind::ChannelCount, .. }
        ));
        assert_eq!(mgr.host().open_streams(), 0);
    }

    #[test]
    fn test_open_twice_is_invalid_state() {
        let mut mgr = manager();
        let mut stream = duplex_stream(64);
        mgr.open(&mut stream, silent).unwrap();
        assert!(matches!(
            mgr.open(&mut stream, silent),
            Err(BridgeError::InvalidState { operation: "open", .. })
        ));
        assert!(stream.set_sample_rate(44100.0).is_err());
        assert_eq!(mgr.bridge().registry().len(), 1);
    }

    #[test]
    fn test_pass_through_period() {
        let mut mgr = manager();
        let mut stream = duplex_stream(256);
        mgr.open(&mut stream, |data: &mut CallbackData| {
            data.pass_through();
            Verdict::Continue
        })
        .unwrap();
        mgr.start(&mut stream).unwrap();

        let native = mgr.native_handle(&stream).unwrap();
        let driver = mgr.host().driver(native).unwrap();
        let input = f32_bytes(&[0.1f32; 512]);
        let mut output = vec![0u8; driver.output_bytes()];
        assert_eq!(output.len(), 512 * 4);

        let verdict = driver.run_period(Some(&input[..]), Some(&mut output[..]));

        assert_eq!(verdict, Some(Verdict::Continue));
        assert_eq!(f32_samples(&output), vec![0.1f32; 512]);
        assert!(mgr.drain_diagnostics().is_empty());
    }

    #[test]
    fn test_finished_fires_once_per_run() {
        let mut mgr = manager();
        let mut stream = duplex_stream(64);
        mgr.open(&mut stream, |data: &mut CallbackData| {
            if data.frames() == 16 {
                Verdict::Complete
            } else {
                Verdict::Continue
            }
        })
        .unwrap();
        let (count, callback) = counter();
        mgr.set_finished_callback(&stream, Some(callback)).unwrap();

        mgr.start(&mut stream).unwrap();
        mgr.stop(&mut stream).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(mgr.stop(&mut stream), Err(BridgeError::StreamIsStopped));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Second run ends from the callback side
        mgr.start(&mut stream).unwrap();
        let driver = mgr.host().driver(mgr.native_handle(&stream).unwrap()).unwrap();
        let mut short = vec![0u8; 16 * 8];
        assert_eq!(driver.run_period(None, Some(&mut short[..])), Some(Verdict::Complete));
        assert!(!driver.is_active());
        assert_eq!(count.load(Ordering::SeqCst), 2);

        mgr.stop(&mut stream).unwrap();
        assert_eq!(stream.state(), StreamState::Stopped);
        mgr.close(&mut stream).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_abort_leaves_aborted_state() {
        let mut mgr = manager();
        let mut stream = duplex_stream(64);
        mgr.open(&mut stream, silent).unwrap();
        mgr.start(&mut stream).unwrap();
        mgr.abort(&mut stream).unwrap();
        assert_eq!(stream.state(), StreamState::Aborted);
        assert!(!mgr.is_stream_active(&stream).unwrap());

        mgr.start(&mut stream).unwrap();
        assert_eq!(stream.state(), StreamState::Started);
    }

    #[test]
    fn test_close_running_stream_aborts_first() {
        let mut mgr = manager();
        let mut stream = duplex_stream(64);
        mgr.open(&mut stream, silent).unwrap();
        let (count, callback) = counter();
        mgr.set_finished_callback(&stream, Some(callback)).unwrap();
        mgr.start(&mut stream).unwrap();
        let driver = mgr.host().driver(mgr.native_handle(&stream).unwrap()).unwrap();

        mgr.close(&mut stream).unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(mgr.host().open_streams(), 0);
        let mut out = vec![0u8; driver.output_bytes()];
        assert_eq!(driver.run_period(None, Some(&mut out[..])), None);
    }

    #[test]
    fn test_set_finished_callback_errors() {
        let mut mgr = manager();
        let mut stream = duplex_stream(64);
        assert!(matches!(
            mgr.set_finished_callback(&stream, None),
            Err(BridgeError::StreamNotFound)
        ));

        let id = mgr.open(&mut stream, silent).unwrap();
        mgr.set_finished_callback(&stream, None).unwrap();
        mgr.bridge().registry().remove(id);
        assert!(matches!(
            mgr.set_finished_callback(&stream, None),
            Err(BridgeError::ContextNotFound)
        ));
    }

    #[test]
    fn test_reopen_gets_fresh_identity() {
        let mut mgr = manager();
        let mut stream = duplex_stream(64);
        let first = mgr.open(&mut stream, silent).unwrap();
        mgr.close(&mut stream).unwrap();
        assert_eq!(stream.id(), None);

        stream.set_frames_per_buffer(128).unwrap();
        let second = mgr.open(&mut stream, silent).unwrap();
        assert_ne!(first, second);
        assert_eq!(mgr.bridge().registry().ids(), vec![second]);
        let frames = mgr.inspect(&stream, |data| data.frames_per_buffer()).unwrap();
        assert_eq!(frames, 128);
    }

    #[test]
    fn test_malformed_verdict_is_drained_as_diagnostic() {
        let mut mgr = manager();
        let mut stream = duplex_stream(32);
        mgr.open(&mut stream, |_: &mut CallbackData| 7i64).unwrap();
        mgr.start(&mut stream).unwrap();
        let driver = mgr.host().driver(mgr.native_handle(&stream).unwrap()).unwrap();
        let mut out = vec![0u8; driver.output_bytes()];

        assert_eq!(driver.run_period(None, Some(&mut out[..])), Some(Verdict::Continue));

        let drained = mgr.drain_diagnostics();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].stream, stream.id().unwrap());
        assert_eq!(drained[0].diagnostic, Diagnostic::InvalidVerdict { raw: 7 });
    }

    #[test]
    fn test_open_default_uses_default_devices() {
        let mut mgr = manager();
        let stream = mgr
            .open_default(0, 2, SampleFormat::Int16, 44100.0, 128, silent)
            .unwrap();
        let output = stream.config().output.unwrap();
        assert_eq!(Some(output.device), mgr.host().default_output_device());
        assert_eq!(output.sample_format, SampleFormat::Int16);
        assert!(stream.config().input.is_none());
        assert!(mgr.stream_info(&stream).unwrap().output_latency > 0.0);
    }

    #[test]
    fn test_inspect_rejected_while_running() {
        let mut mgr = manager();
        let mut stream = duplex_stream(64);
        mgr.open(&mut stream, silent).unwrap();
        mgr.start(&mut stream).unwrap();
        assert!(matches!(
            mgr.inspect(&stream, |_| ()),
            Err(BridgeError::InvalidState { operation: "inspect", .. })
        ));
    }

    #[test]
    fn test_cpu_load_tracks_last_call() {
        let mut mgr = manager();
        let mut stream = duplex_stream(480);
        mgr.open(&mut stream, |_: &mut CallbackData| {
            std::thread::sleep(Duration::from_millis(1));
            Verdict::Continue
        })
        .unwrap();
        mgr.start(&mut stream).unwrap();
        let driver = mgr.host().driver(mgr.native_handle(&stream).unwrap()).unwrap();
        let mut out = vec![0u8; driver.output_bytes()];
        driver.run_period(None, Some(&mut out[..]));

        assert!(mgr.last_call_duration(&stream).unwrap() >= Duration::from_millis(1));
        // 480 frames at 48 kHz is a 10 ms period
        assert!(mgr.stream_cpu_load(&stream).unwrap() >= 0.1);
        assert!(mgr.stream_time(&stream).unwrap() >= 0.0);
    }

    #[test]
    fn test_shutdown_closes_remaining_streams() {
        let mut mgr = manager();
        let mut a = duplex_stream(64);
        let mut b = duplex_stream(64);
        mgr.open(&mut a, silent).unwrap();
        mgr.open(&mut b, silent).unwrap();
        mgr.start(&mut b).unwrap();
        let driver = mgr.host().driver(mgr.native_handle(&b).unwrap()).unwrap();

        assert!(mgr.shutdown());
        assert!(!driver.is_active());
        let mut out = vec![0u8; driver.output_bytes()];
        assert_eq!(driver.run_period(None, Some(&mut out[..])), None);
    }

    #[test]
    fn test_shutdown_reclaims_every_context() {
        let mut mgr = manager();
        for frames in [64, 128, 256] {
            let mut stream = duplex_stream(frames);
            mgr.open(&mut stream, silent).unwrap();
            let (_, callback) = counter();
            mgr.set_finished_callback(&stream, Some(callback)).unwrap();
            mgr.start(&mut stream).unwrap();
            let driver = mgr.host().driver(mgr.native_handle(&stream).unwrap()).unwrap();
            let mut out = vec![0u8; driver.output_bytes()];
            driver.run_period(None, Some(&mut out[..]));
            mgr.close(&mut stream).unwrap();
        }
        let mut left_open = duplex_stream(64);
        mgr.open(&mut left_open, silent).unwrap();

        assert!(mgr.shutdown());
    }

    #[test]
    fn test_shutdown_reports_context_held_outside() {
        let mut mgr = manager();
        let mut stream = duplex_stream(64);
        let id = mgr.open(&mut stream, silent).unwrap();
        let held = mgr.bridge().registry().get(id).unwrap();

        assert!(!mgr.shutdown());
        assert_eq!(held.id(), id);
    }

    #[test]
    fn test_blocking_duplex_round_trip() {
        let mut mgr = manager();
        let mut stream = duplex_stream(4);
        mgr.open_blocking(&mut stream).unwrap();
        mgr.start(&mut stream).unwrap();
        assert_eq!(mgr.stream_read_available(&stream), Ok(0));
        assert_eq!(mgr.stream_write_available(&stream), Ok(16));

        let played = f32_bytes(&[0.1, -0.1, 0.2, -0.2, 0.3, -0.3, 0.4, -0.4]);
        assert_eq!(mgr.write_stream(&stream, &played, 4), Ok(StatusFlags::empty()));
        assert_eq!(mgr.stream_write_available(&stream), Ok(12));

        let driver = mgr.host().driver(mgr.native_handle(&stream).unwrap()).unwrap();
        let captured = f32_bytes(&[0.5; 8]);
        let mut out = vec![0u8; driver.output_bytes()];
        assert_eq!(
            driver.run_period(Some(&captured[..]), Some(&mut out[..])),
            Some(Verdict::Continue)
        );
        assert_eq!(out, played);
        assert_eq!(mgr.stream_read_available(&stream), Ok(4));

        let mut buf = vec![0u8; captured.len()];
        assert_eq!(mgr.read_stream(&stream, &mut buf, 4), Ok(StatusFlags::empty()));
        assert_eq!(f32_samples(&buf), vec![0.5; 8]);
    }

    #[test]
    fn test_blocking_read_waits_for_hardware_thread() {
        let mut mgr = manager();
        let mut stream = duplex_stream(4);
        mgr.open_blocking(&mut stream).unwrap();
        mgr.start(&mut stream).unwrap();
        let driver = mgr.host().driver(mgr.native_handle(&stream).unwrap()).unwrap();

        let hardware = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            let captured = f32_bytes(&[0.25; 8]);
            let mut out = vec![0u8; driver.output_bytes()];
            driver.run_period(Some(&captured[..]), Some(&mut out[..]))
        });

        let mut buf = vec![0u8; 32];
        assert_eq!(mgr.read_stream(&stream, &mut buf, 4), Ok(StatusFlags::empty()));
        assert_eq!(f32_samples(&buf), vec![0.25; 8]);
        assert_eq!(hardware.join().unwrap(), Some(Verdict::Continue));
    }

    #[test]
    fn test_blocking_flags_report_underflow_and_overflow() {
        let mut mgr = manager();
        let mut stream = duplex_stream(4);
        mgr.open_blocking(&mut stream).unwrap();
        mgr.start(&mut stream).unwrap();
        let driver = mgr.host().driver(mgr.native_handle(&stream).unwrap()).unwrap();

        // Nothing queued for output and five periods of input for a four period queue
        let captured = f32_bytes(&[1.0; 8]);
        for _ in 0..5 {
            let mut out = vec![0xAAu8; driver.output_bytes()];
            driver.run_period(Some(&captured[..]), Some(&mut out[..]));
            assert_eq!(out, vec![0u8; 32]);
        }

        let frames = vec![0u8; 32];
        assert_eq!(mgr.write_stream(&stream, &frames, 4), Ok(StatusFlags::OUTPUT_UNDERFLOW));
        assert_eq!(mgr.write_stream(&stream, &frames, 4), Ok(StatusFlags::empty()));

        let mut buf = vec![0u8; 128];
        assert_eq!(mgr.read_stream(&stream, &mut buf, 16), Ok(StatusFlags::INPUT_OVERFLOW));
        assert_eq!(mgr.stream_read_available(&stream), Ok(0));
    }

    #[test]
    fn test_blocking_read_times_out() {
        let mut mgr = manager();
        mgr.set_blocking_timeout(Duration::from_millis(10));
        let mut stream = duplex_stream(4);
        mgr.open_blocking(&mut stream).unwrap();
        mgr.start(&mut stream).unwrap();

        let mut buf = vec![0u8; 32];
        assert_eq!(mgr.read_stream(&stream, &mut buf, 4), Err(BridgeError::TimedOut));
    }

    #[test]
    fn test_stopped_blocking_stream_returns_stream_is_stopped() {
        let mut mgr = manager();
        let mut stream = duplex_stream(4);
        mgr.open_blocking(&mut stream).unwrap();

        let mut buf = vec![0u8; 32];
        assert_eq!(mgr.read_stream(&stream, &mut buf, 4), Err(BridgeError::StreamIsStopped));

        // The output queue still takes what fits before the stream starts
        let primed = vec![0u8; 128];
        assert_eq!(mgr.write_stream(&stream, &primed, 16), Ok(StatusFlags::empty()));
        assert_eq!(mgr.write_stream(&stream, &buf, 4), Err(BridgeError::StreamIsStopped));
    }

    #[test]
    fn test_blocking_io_refused_on_callback_and_one_way_streams() {
        let mut mgr = manager();
        let mut callback_stream = duplex_stream(4);
        mgr.open(&mut callback_stream, silent).unwrap();
        let mut buf = vec![0u8; 32];
        assert!(matches!(
            mgr.read_stream(&callback_stream, &mut buf, 4),
            Err(BridgeError::HostApiError { code: -9977, .. })
        ));
        assert!(matches!(
            mgr.stream_write_available(&callback_stream),
            Err(BridgeError::HostApiError { code: -9976, .. })
        ));

        let p = StreamParameters::new(0, 2, SampleFormat::Float32);
        let mut output_only = Stream::new(StreamConfig::new(None, Some(p), 48000.0, 4));
        mgr.open_blocking(&mut output_only).unwrap();
        assert!(matches!(
            mgr.read_stream(&output_only, &mut buf, 4),
            Err(BridgeError::HostApiError { code: -9975, .. })
        ));
        assert_eq!(mgr.stream_write_available(&output_only), Ok(16));

        mgr.close(&mut output_only).unwrap();
        assert_eq!(mgr.stream_write_available(&output_only), Err(BridgeError::StreamNotFound));
        mgr.open(&mut output_only, silent).unwrap();
        assert!(matches!(
            mgr.write_stream(&output_only, &buf, 4),
            Err(BridgeError::HostApiError { code: -9976, .. })
        ));
    }
}
