//! CPAL native layer
//!
//! Each bridge stream maps onto one CPAL output stream, one CPAL input
//! stream, or, for duplex, both. CPAL drives input and output from separate
//! callbacks, so a duplex stream forwards captured bytes through a
//! lock-free `rtrb` byte queue and runs the bridge from the output callback:
//!
//! ```text
//!  input callback ──push──► rtrb::Producer<u8> ──► rtrb::Consumer<u8> ──pull──┐
//!                                                                             ▼
//!  output callback ─────────────────► NativeCallback(PeriodIo { input, output })
//! ```
//!
//! Samples are streamed in the stream's own format; typed CPAL buffers are
//! viewed as bytes with `bytemuck`. Packed 24-bit samples are not available.
//!
//! CPAL has no drain. `stop` pauses the device and lets periods already in
//! progress render normally; whatever the backend buffered past that point
//! is lost. `abort` silences in-progress periods before pausing and drops
//! queued duplex input. Both wait for running callbacks to return.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, StreamTrait};

use super::backend::{AudioHost, NativeCallback, NativeFinished, NativeHandle, NativeStreamInfo, PeriodIo};
use super::catalog::{DeviceCatalog, DeviceInfo, HostApiInfo};
use super::cpal_device::{cpal_format, enumerate, CpalDeviceEntry};
use crate::error::{BridgeError, BridgeResult, NativeCode, ParameterKind};
use crate::types::{SampleFormat, StatusFlags, StreamConfig, StreamParameters, TimeInfo, Verdict};

/// Periods of captured input a duplex stream can queue
const DUPLEX_QUEUE_PERIODS: usize = 4;

/// Longest `stop`/`abort` waits for a running callback
const HALT_TIMEOUT: Duration = Duration::from_secs(1);

fn host_error(text: String) -> BridgeError {
    BridgeError::HostApiError {
        code: NativeCode::UnanticipatedHostError.raw(),
        text,
    }
}

fn build_error(err: cpal::BuildStreamError) -> BridgeError {
    match &err {
        cpal::BuildStreamError::DeviceNotAvailable => BridgeError::DeviceUnavailable(err.to_string()),
        cpal::BuildStreamError::StreamConfigNotSupported | cpal::BuildStreamError::InvalidArgument => {
            BridgeError::invalid(ParameterKind::HostApiSpecificInfo, err.to_string())
        }
        _ => host_error(err.to_string()),
    }
}

fn play_error(err: cpal::PlayStreamError) -> BridgeError {
    match &err {
        cpal::PlayStreamError::DeviceNotAvailable => BridgeError::DeviceUnavailable(err.to_string()),
        _ => host_error(err.to_string()),
    }
}

fn pause_error(err: cpal::PauseStreamError) -> BridgeError {
    match &err {
        cpal::PauseStreamError::DeviceNotAvailable => BridgeError::DeviceUnavailable(err.to_string()),
        _ => host_error(err.to_string()),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Shared run state
// ═══════════════════════════════════════════════════════════════════════════════

/// Flags shared by the control thread and the CPAL callbacks of one stream
struct StreamControl {
    /// Callbacks forward periods only while set
    active: AtomicBool,
    /// Raised on start, consumed by the single finished notification of a run
    finish_pending: AtomicBool,
    /// Drop queued duplex input before the next period
    flush_input: AtomicBool,
    input_overflow: AtomicBool,
    device_lost: AtomicBool,
    /// Callbacks currently between `enter` and guard drop
    in_flight: AtomicUsize,
    finished: Mutex<NativeFinished>,
}

/// Marks one callback invocation as running
///
/// The last guard of a halted run fires the finished notification if the
/// control thread did not get to it.
struct CallbackGuard<'a> {
    control: &'a StreamControl,
}

impl Drop for CallbackGuard<'_> {
    fn drop(&mut self) {
        if !self.control.running() {
            self.control.finish_run();
        }
        self.control.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl StreamControl {
    fn new(finished: NativeFinished) -> Self {
        Self {
            active: AtomicBool::new(false),
            finish_pending: AtomicBool::new(false),
            flush_input: AtomicBool::new(false),
            input_overflow: AtomicBool::new(false),
            device_lost: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            finished: Mutex::new(finished),
        }
    }

    #[inline]
    fn running(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Register a callback invocation; `None` while the stream is halted
    #[inline]
    fn enter(&self) -> Option<CallbackGuard<'_>> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if !self.active.load(Ordering::SeqCst) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return None;
        }
        Some(CallbackGuard { control: self })
    }

    /// Wait until no callback holds a guard
    fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.in_flight.load(Ordering::SeqCst) > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_micros(200));
        }
        true
    }

    fn begin_run(&self) {
        self.flush_input.store(true, Ordering::Release);
        self.finish_pending.store(true, Ordering::Release);
        self.active.store(true, Ordering::Release);
    }

    /// Fire the finished notification if this run has not fired it yet
    ///
    /// Never blocks: only the caller that consumed `finish_pending` reaches
    /// the mutex, so it is uncontended.
    fn finish_run(&self) {
        if !self.finish_pending.swap(false, Ordering::AcqRel) {
            return;
        }
        let mut finished = match self.finished.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return,
        };
        (*finished)();
    }

    /// End the run from a callback after a non-continue verdict
    #[inline]
    fn end_from_callback(&self) {
        self.active.store(false, Ordering::Release);
        self.finish_run();
    }

    /// Control-thread half of `stop` (`discard = false`) and `abort`
    ///
    /// `pause` halts the native callbacks. Returns only after running
    /// callbacks have left and the finished notification has fired, unless
    /// a callback outlives [`HALT_TIMEOUT`].
    fn halt(&self, discard: bool, pause: impl FnOnce() -> BridgeResult<()>) -> BridgeResult<()> {
        if !self.running() {
            return Err(BridgeError::StreamIsStopped);
        }
        if discard {
            self.active.store(false, Ordering::SeqCst);
            self.flush_input.store(true, Ordering::Release);
        }
        let paused = pause();
        self.active.store(false, Ordering::SeqCst);
        if self.wait_idle(HALT_TIMEOUT) {
            self.finish_run();
        } else {
            log::warn!("CPAL callback still running {:?} after halt", HALT_TIMEOUT);
        }
        paused
    }

    fn report(&self, err: cpal::StreamError) {
        match err {
            cpal::StreamError::DeviceNotAvailable => {
                log::error!("Audio device lost");
                self.device_lost.store(true, Ordering::Release);
                self.end_from_callback();
            }
            other => log::error!("Audio stream error: {}", other),
        }
    }
}

/// Seconds since the first timestamp a stream delivered
#[derive(Default)]
struct PeriodClock {
    origin: Option<cpal::StreamInstant>,
}

impl PeriodClock {
    fn seconds(&mut self, instant: &cpal::StreamInstant) -> f64 {
        let origin = *self.origin.get_or_insert(*instant);
        instant
            .duration_since(&origin)
            .map_or(0.0, |elapsed| elapsed.as_secs_f64())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Callback state
// ═══════════════════════════════════════════════════════════════════════════════

/// Consumer end of a duplex stream's input queue, owned by the output callback
struct DuplexInput {
    consumer: rtrb::Consumer<u8>,
    scratch: Vec<u8>,
    frame_bytes: usize,
    silence: u8,
    control: Arc<StreamControl>,
}

impl DuplexInput {
    /// Take `frames` of queued input, padding with silence on underflow
    fn pull(&mut self, frames: usize, status: &mut StatusFlags) -> &[u8] {
        if self.control.flush_input.swap(false, Ordering::AcqRel) {
            let stale = self.consumer.slots();
            if let Ok(chunk) = self.consumer.read_chunk(stale) {
                chunk.commit_all();
            }
        }

        let frame_bytes = self.frame_bytes.max(1);
        let need = (frames * frame_bytes).min(self.scratch.len());
        let available = self.consumer.slots().min(need) / frame_bytes * frame_bytes;
        let mut filled = 0;
        if let Ok(chunk) = self.consumer.read_chunk(available) {
            let (first, second) = chunk.as_slices();
            self.scratch[..first.len()].copy_from_slice(first);
            self.scratch[first.len()..first.len() + second.len()].copy_from_slice(second);
            filled = first.len() + second.len();
            chunk.commit_all();
        }

        if filled < need {
            self.scratch[filled..need].fill(self.silence);
            status.insert(StatusFlags::INPUT_UNDERFLOW);
        }
        if self.control.input_overflow.swap(false, Ordering::AcqRel) {
            status.insert(StatusFlags::INPUT_OVERFLOW);
        }
        &self.scratch[..need]
    }
}

/// State moved into an output callback
struct OutputSink {
    callback: NativeCallback,
    control: Arc<StreamControl>,
    duplex: Option<DuplexInput>,
    frame_bytes: usize,
    silence: u8,
    clock: PeriodClock,
}

impl OutputSink {
    fn render(&mut self, out: &mut [u8], info: &cpal::OutputCallbackInfo) {
        let Some(_guard) = self.control.enter() else {
            out.fill(self.silence);
            return;
        };

        let frames = out.len() / self.frame_bytes.max(1);
        let stamp = info.timestamp();
        let current = self.clock.seconds(&stamp.callback);
        let time = TimeInfo {
            input_buffer_adc_time: current,
            current_time: current,
            output_buffer_dac_time: self.clock.seconds(&stamp.playback),
        };

        let mut status = StatusFlags::empty();
        let input = match self.duplex.as_mut() {
            Some(duplex) => Some(duplex.pull(frames, &mut status)),
            None => None,
        };

        let verdict = (self.callback)(PeriodIo {
            input,
            output: Some(&mut *out),
            frames,
            time,
            status,
        });

        if verdict == Verdict::Abort {
            out.fill(self.silence);
        }
        if !verdict.is_continue() {
            self.control.end_from_callback();
        }
    }
}

/// Receiver of captured input bytes
trait Capture: Send + 'static {
    fn control(&self) -> &Arc<StreamControl>;

    fn capture(&mut self, data: &[u8], info: &cpal::InputCallbackInfo);
}

/// Input-only stream: the bridge runs from the input callback
struct InputSink {
    callback: NativeCallback,
    control: Arc<StreamControl>,
    frame_bytes: usize,
    clock: PeriodClock,
}

impl Capture for InputSink {
    fn control(&self) -> &Arc<StreamControl> {
        &self.control
    }

    fn capture(&mut self, data: &[u8], info: &cpal::InputCallbackInfo) {
        let Some(_guard) = self.control.enter() else {
            return;
        };

        let stamp = info.timestamp();
        let current = self.clock.seconds(&stamp.callback);
        let age = stamp
            .callback
            .duration_since(&stamp.capture)
            .map_or(0.0, |d| d.as_secs_f64());
        let verdict = (self.callback)(PeriodIo {
            input: Some(data),
            output: None,
            frames: data.len() / self.frame_bytes.max(1),
            time: TimeInfo {
                input_buffer_adc_time: current - age,
                current_time: current,
                output_buffer_dac_time: current,
            },
            status: StatusFlags::empty(),
        });

        if !verdict.is_continue() {
            self.control.end_from_callback();
        }
    }
}

/// Input half of a duplex stream: queue whole frames for the output callback
struct DuplexFeed {
    producer: rtrb::Producer<u8>,
    control: Arc<StreamControl>,
    frame_bytes: usize,
}

impl Capture for DuplexFeed {
    fn control(&self) -> &Arc<StreamControl> {
        &self.control
    }

    fn capture(&mut self, data: &[u8], _info: &cpal::InputCallbackInfo) {
        let Some(_guard) = self.control.enter() else {
            return;
        };
        let frame_bytes = self.frame_bytes.max(1);
        let room = self.producer.slots() / frame_bytes * frame_bytes;
        let n = data.len().min(room);
        if n < data.len() {
            self.control.input_overflow.store(true, Ordering::Release);
        }
        if let Ok(chunk) = self.producer.write_chunk_uninit(n) {
            chunk.fill_from_iter(data[..n].iter().copied());
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Stream builders
// ═══════════════════════════════════════════════════════════════════════════════

fn unsupported_format(format: SampleFormat) -> BridgeError {
    BridgeError::invalid(
        ParameterKind::SampleFormat,
        format!("{:?} cannot be streamed through CPAL", format),
    )
}

fn build_output_typed<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut sink: OutputSink,
) -> BridgeResult<cpal::Stream>
where
    T: cpal::SizedSample + bytemuck::Pod,
{
    let control = Arc::clone(&sink.control);
    device
        .build_output_stream(
            config,
            move |data: &mut [T], info: &cpal::OutputCallbackInfo| {
                sink.render(bytemuck::cast_slice_mut(data), info);
            },
            move |err| control.report(err),
            None,
        )
        .map_err(build_error)
}

fn build_input_typed<T, S>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut sink: S,
) -> BridgeResult<cpal::Stream>
where
    T: cpal::SizedSample + bytemuck::Pod,
    S: Capture,
{
    let control = Arc::clone(sink.control());
    device
        .build_input_stream(
            config,
            move |data: &[T], info: &cpal::InputCallbackInfo| {
                sink.capture(bytemuck::cast_slice(data), info);
            },
            move |err| control.report(err),
            None,
        )
        .map_err(build_error)
}

fn build_output(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    format: SampleFormat,
    sink: OutputSink,
) -> BridgeResult<cpal::Stream> {
    match format {
        SampleFormat::Float32 => build_output_typed::<f32>(device, config, sink),
        SampleFormat::Int32 => build_output_typed::<i32>(device, config, sink),
        SampleFormat::Int16 => build_output_typed::<i16>(device, config, sink),
        SampleFormat::Int8 => build_output_typed::<i8>(device, config, sink),
        SampleFormat::UInt8 => build_output_typed::<u8>(device, config, sink),
        SampleFormat::Int24 => Err(unsupported_format(format)),
    }
}

fn build_input<S: Capture>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    format: SampleFormat,
    sink: S,
) -> BridgeResult<cpal::Stream> {
    match format {
        SampleFormat::Float32 => build_input_typed::<f32, S>(device, config, sink),
        SampleFormat::Int32 => build_input_typed::<i32, S>(device, config, sink),
        SampleFormat::Int16 => build_input_typed::<i16, S>(device, config, sink),
        SampleFormat::Int8 => build_input_typed::<i8, S>(device, config, sink),
        SampleFormat::UInt8 => build_input_typed::<u8, S>(device, config, sink),
        SampleFormat::Int24 => Err(unsupported_format(format)),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Host
// ═══════════════════════════════════════════════════════════════════════════════

struct CpalStream {
    /// Dropped before `output` so the queue producer goes first
    input: Option<cpal::Stream>,
    output: Option<cpal::Stream>,
    control: Arc<StreamControl>,
    info: NativeStreamInfo,
}

impl CpalStream {
    fn play(&self) -> BridgeResult<()> {
        if let Some(input) = &self.input {
            input.play().map_err(play_error)?;
        }
        if let Some(output) = &self.output {
            output.play().map_err(play_error)?;
        }
        Ok(())
    }

    fn pause(&self) -> BridgeResult<()> {
        if let Some(output) = &self.output {
            output.pause().map_err(pause_error)?;
        }
        if let Some(input) = &self.input {
            input.pause().map_err(pause_error)?;
        }
        Ok(())
    }
}

/// Native layer over every host CPAL can reach
pub struct CpalHost {
    host_apis: Vec<HostApiInfo>,
    devices: Vec<CpalDeviceEntry>,
    streams: HashMap<u64, CpalStream>,
    next_handle: u64,
    origin: Instant,
}

impl Default for CpalHost {
    fn default() -> Self {
        Self::new()
    }
}

impl CpalHost {
    /// Enumerate all hosts and their devices
    pub fn new() -> Self {
        let enumeration = enumerate();
        Self {
            host_apis: enumeration.host_apis,
            devices: enumeration.devices,
            streams: HashMap::new(),
            next_handle: 1,
            origin: Instant::now(),
        }
    }

    /// Re-enumerate devices; device indices may change
    pub fn refresh(&mut self) -> BridgeResult<()> {
        if !self.streams.is_empty() {
            return Err(BridgeError::InvalidState {
                operation: "refresh devices",
                state: "streams open",
            });
        }
        let enumeration = enumerate();
        self.host_apis = enumeration.host_apis;
        self.devices = enumeration.devices;
        Ok(())
    }

    fn stream(&self, handle: NativeHandle) -> BridgeResult<&CpalStream> {
        self.streams.get(&handle.0).ok_or(BridgeError::StreamNotFound)
    }

    fn entry(&self, params: &StreamParameters) -> BridgeResult<&CpalDeviceEntry> {
        self.devices.get(params.device).ok_or_else(|| {
            BridgeError::invalid(ParameterKind::Device, format!("device {} does not exist", params.device))
        })
    }

    fn check_direction(&self, input: bool, params: &StreamParameters, sample_rate: u32) -> BridgeResult<()> {
        let entry = self.entry(params)?;
        let max = if input {
            entry.info.max_input_channels
        } else {
            entry.info.max_output_channels
        };
        if params.channel_count > max {
            return Err(BridgeError::invalid(
                ParameterKind::ChannelCount,
                format!("{} has {} channels, {} requested", entry.info.name, max, params.channel_count),
            ));
        }
        let format = cpal_format(params.sample_format).ok_or_else(|| unsupported_format(params.sample_format))?;
        if !entry.supports(input, params.channel_count, format, sample_rate) {
            return Err(BridgeError::invalid(
                ParameterKind::SampleRate,
                format!(
                    "{} cannot stream {} channels of {:?} at {} Hz",
                    entry.info.name, params.channel_count, params.sample_format, sample_rate
                ),
            ));
        }
        Ok(())
    }

    fn halt(&mut self, handle: NativeHandle, discard: bool) -> BridgeResult<()> {
        let stream = self.stream(handle)?;
        stream.control.halt(discard, || stream.pause())
    }
}

impl DeviceCatalog for CpalHost {
    fn host_apis(&self) -> Vec<HostApiInfo> {
        self.host_apis.clone()
    }

    fn devices(&self) -> Vec<DeviceInfo> {
        self.devices.iter().map(|entry| entry.info.clone()).collect()
    }

    fn device_info(&self, index: usize) -> Option<DeviceInfo> {
        self.devices.get(index).map(|entry| entry.info.clone())
    }

    fn default_input_device(&self) -> Option<usize> {
        self.host_apis.iter().find_map(|api| api.default_input_device)
    }

    fn default_output_device(&self) -> Option<usize> {
        self.host_apis.iter().find_map(|api| api.default_output_device)
    }
}

impl AudioHost for CpalHost {
    fn name(&self) -> &str {
        "CPAL"
    }

    fn is_format_supported(&self, config: &StreamConfig) -> BridgeResult<()> {
        let rate = config.sample_rate.round() as u32;
        if let Some(input) = &config.input {
            self.check_direction(true, input, rate)?;
        }
        if let Some(output) = &config.output {
            self.check_direction(false, output, rate)?;
        }
        Ok(())
    }

    fn open(
        &mut self,
        config: &StreamConfig,
        callback: NativeCallback,
        finished: NativeFinished,
    ) -> BridgeResult<NativeHandle> {
        self.is_format_supported(config)?;
        if !config.flags.is_empty() {
            log::debug!("CPAL ignores stream flags {:#x}", config.flags.bits());
        }

        let control = Arc::new(StreamControl::new(finished));
        let frames = config.frames_per_buffer as usize;
        let cpal_config = |channels: u16| cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(config.sample_rate.round() as u32),
            buffer_size: cpal::BufferSize::Fixed(config.frames_per_buffer),
        };
        let period = config.period_seconds();

        let (input, output) = match (config.input, config.output) {
            (None, Some(out)) => {
                let sink = OutputSink {
                    callback,
                    control: Arc::clone(&control),
                    duplex: None,
                    frame_bytes: out.frame_bytes(),
                    silence: out.sample_format.silence_byte(),
                    clock: PeriodClock::default(),
                };
                let device = &self.entry(&out)?.device;
                let stream = build_output(device, &cpal_config(out.channel_count), out.sample_format, sink)?;
                (None, Some(stream))
            }
            (Some(inp), None) => {
                let sink = InputSink {
                    callback,
                    control: Arc::clone(&control),
                    frame_bytes: inp.frame_bytes(),
                    clock: PeriodClock::default(),
                };
                let device = &self.entry(&inp)?.device;
                let stream = build_input(device, &cpal_config(inp.channel_count), inp.sample_format, sink)?;
                (Some(stream), None)
            }
            (Some(inp), Some(out)) => {
                let capacity = DUPLEX_QUEUE_PERIODS * frames * inp.frame_bytes();
                let (producer, consumer) = rtrb::RingBuffer::new(capacity);
                let feed = DuplexFeed {
                    producer,
                    control: Arc::clone(&control),
                    frame_bytes: inp.frame_bytes(),
                };
                let sink = OutputSink {
                    callback,
                    control: Arc::clone(&control),
                    duplex: Some(DuplexInput {
                        consumer,
                        scratch: vec![inp.sample_format.silence_byte(); capacity],
                        frame_bytes: inp.frame_bytes(),
                        silence: inp.sample_format.silence_byte(),
                        control: Arc::clone(&control),
                    }),
                    frame_bytes: out.frame_bytes(),
                    silence: out.sample_format.silence_byte(),
                    clock: PeriodClock::default(),
                };
                let input_device = &self.entry(&inp)?.device;
                let input = build_input(input_device, &cpal_config(inp.channel_count), inp.sample_format, feed)?;
                let output_device = &self.entry(&out)?.device;
                let output = build_output(output_device, &cpal_config(out.channel_count), out.sample_format, sink)?;
                (Some(input), Some(output))
            }
            (None, None) => {
                return Err(BridgeError::invalid(
                    ParameterKind::ChannelCount,
                    "stream needs at least one direction",
                ))
            }
        };

        let latency = |params: Option<StreamParameters>, default: fn(&DeviceInfo) -> f64| {
            params.map_or(0.0, |p| {
                let device_default = self.devices.get(p.device).map_or(0.0, |e| default(&e.info));
                period.max(device_default).max(p.suggested_latency)
            })
        };
        let info = NativeStreamInfo {
            input_latency: latency(config.input, |d| d.default_low_input_latency),
            output_latency: latency(config.output, |d| d.default_low_output_latency),
            sample_rate: config.sample_rate.round(),
        };

        let handle = NativeHandle(self.next_handle);
        self.next_handle += 1;
        self.streams.insert(
            handle.0,
            CpalStream {
                input,
                output,
                control,
                info,
            },
        );
        log::info!(
            "CPAL stream {} opened ({} in / {} out)",
            handle.0,
            config.input_channels(),
            config.output_channels()
        );
        Ok(handle)
    }

    fn start(&mut self, handle: NativeHandle) -> BridgeResult<()> {
        let stream = self.stream(handle)?;
        if stream.control.running() {
            return Err(BridgeError::StreamIsNotStopped);
        }
        stream.control.device_lost.store(false, Ordering::Release);
        stream.control.begin_run();
        if let Err(err) = stream.play() {
            stream.control.active.store(false, Ordering::Release);
            stream.control.finish_pending.store(false, Ordering::Release);
            return Err(err);
        }
        Ok(())
    }

    /// Pause without a drain; periods in progress finish normally
    fn stop(&mut self, handle: NativeHandle) -> BridgeResult<()> {
        self.halt(handle, false)
    }

    /// Silence periods in progress, drop queued duplex input, then pause
    fn abort(&mut self, handle: NativeHandle) -> BridgeResult<()> {
        self.halt(handle, true)
    }

    fn close(&mut self, handle: NativeHandle) -> BridgeResult<()> {
        let stream = self.streams.remove(&handle.0).ok_or(BridgeError::StreamNotFound)?;
        stream.control.active.store(false, Ordering::Release);
        let CpalStream {
            input,
            output,
            control,
            ..
        } = stream;
        // Dropping a CPAL stream joins its callback thread
        drop(input);
        drop(output);
        control.finish_run();
        log::info!("CPAL stream {} closed", handle.0);
        Ok(())
    }

    fn is_active(&self, handle: NativeHandle) -> BridgeResult<bool> {
        let control = &self.stream(handle)?.control;
        Ok(control.running() && !control.device_lost.load(Ordering::Acquire))
    }

    fn stream_info(&self, handle: NativeHandle) -> BridgeResult<NativeStreamInfo> {
        Ok(self.stream(handle)?.info)
    }

    fn stream_time(&self, handle: NativeHandle) -> BridgeResult<f64> {
        self.stream(handle)?;
        Ok(self.origin.elapsed().as_secs_f64())
    }
}
