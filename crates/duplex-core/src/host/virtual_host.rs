//! In-process native layer driven period by period
//!
//! `VirtualHost` behaves like a PortAudio-style host: it validates stream
//! parameters against its device table, reports failures as numeric native
//! status codes (translated through [`BridgeError::from_native_code`]), and
//! runs the registered trampolines. Periods are not clocked by hardware;
//! whoever holds a [`VirtualDriver`] plays the role of the hardware thread.
//!
//! ```ignore
//! let mut host = VirtualHost::new();
//! let handle = host.open(&config, callback, finished)?;
//! host.start(handle)?;
//! let driver = host.driver(handle).unwrap();
//! std::thread::spawn(move || {
//!     let mut out = vec![0u8; driver.output_bytes()];
//!     while driver.run_period(None, Some(&mut out)).is_some() {}
//! });
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use crate::error::{BridgeError, BridgeResult, NativeCode};
use crate::types::{SampleFormat, StatusFlags, StreamConfig, StreamParameters, TimeInfo, Verdict};

use super::backend::{AudioHost, NativeCallback, NativeFinished, NativeHandle, NativeStreamInfo, PeriodIo};
use super::catalog::{DeviceCatalog, DeviceInfo, HostApiInfo};

/// Sample rates the virtual devices accept
pub const VIRTUAL_SAMPLE_RATES: [f64; 6] = [22050.0, 32000.0, 44100.0, 48000.0, 88200.0, 96000.0];

/// Largest period the virtual host accepts
pub const VIRTUAL_MAX_FRAMES: u32 = 8192;

fn native_error(code: NativeCode, detail: String) -> BridgeError {
    match BridgeError::from_native_code(code.raw(), Some(&detail)) {
        Err(err) => err,
        Ok(_) => BridgeError::UndefinedNativeError(code.raw()),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct VirtualStream {
    config: StreamConfig,
    origin: Instant,
    active: AtomicBool,
    periods: AtomicU64,
    /// Taken on close; `None` afterwards
    callback: Mutex<Option<NativeCallback>>,
    /// Replaced by a no-op on close
    finished: Mutex<NativeFinished>,
}

impl VirtualStream {
    fn frames_for(&self, input: Option<&[u8]>, output: Option<&[u8]>) -> usize {
        let by_len = |bytes: Option<&[u8]>, params: Option<StreamParameters>| {
            bytes
                .zip(params)
                .map(|(b, p)| b.len() / p.frame_bytes().max(1))
        };
        by_len(output, self.config.output)
            .or_else(|| by_len(input, self.config.input))
            .unwrap_or(self.config.frames_per_buffer as usize)
    }

    fn time_info(&self, frames: usize) -> TimeInfo {
        let now = self.origin.elapsed().as_secs_f64();
        let period = frames as f64 / self.config.sample_rate;
        TimeInfo {
            input_buffer_adc_time: now - period,
            current_time: now,
            output_buffer_dac_time: now + period,
        }
    }

    fn finish(&self) {
        let mut finished = lock(&self.finished);
        (*finished)();
    }
}

/// Hardware-thread stand-in for one virtual stream
#[derive(Clone)]
pub struct VirtualDriver {
    stream: Arc<VirtualStream>,
}

impl VirtualDriver {
    pub fn is_active(&self) -> bool {
        self.stream.active.load(Ordering::Acquire)
    }

    pub fn frames_per_buffer(&self) -> usize {
        self.stream.config.frames_per_buffer as usize
    }

    /// Input bytes of a full period
    pub fn input_bytes(&self) -> usize {
        self.stream
            .config
            .input
            .map_or(0, |p| p.frame_bytes() * self.frames_per_buffer())
    }

    /// Output bytes of a full period
    pub fn output_bytes(&self) -> usize {
        self.stream
            .config
            .output
            .map_or(0, |p| p.frame_bytes() * self.frames_per_buffer())
    }

    pub fn periods(&self) -> u64 {
        self.stream.periods.load(Ordering::Relaxed)
    }

    /// Run one period; `None` if the stream is not running
    ///
    /// The frame count is derived from the buffer lengths. A non-continue
    /// verdict deactivates the stream and fires the finished notification;
    /// on [`Verdict::Abort`] this period's output is discarded.
    pub fn run_period(&self, input: Option<&[u8]>, output: Option<&mut [u8]>) -> Option<Verdict> {
        self.run_period_with_status(input, output, StatusFlags::empty())
    }

    pub fn run_period_with_status(
        &self,
        input: Option<&[u8]>,
        mut output: Option<&mut [u8]>,
        status: StatusFlags,
    ) -> Option<Verdict> {
        let stream = &self.stream;
        let verdict = {
            let mut slot = lock(&stream.callback);
            if !stream.active.load(Ordering::Acquire) {
                return None;
            }
            let callback = slot.as_mut()?;
            let frames = stream.frames_for(input, output.as_deref());
            let io = PeriodIo {
                input,
                output: output.as_deref_mut(),
                frames,
                time: stream.time_info(frames),
                status,
            };
            let verdict = callback(io);
            stream.periods.fetch_add(1, Ordering::Relaxed);
            verdict
        };

        if verdict == Verdict::Abort {
            if let Some(out) = output {
                let silence = stream
                    .config
                    .output
                    .map_or(0, |p| p.sample_format.silence_byte());
                out.fill(silence);
            }
        }
        if !verdict.is_continue() && stream.active.swap(false, Ordering::AcqRel) {
            stream.finish();
        }
        Some(verdict)
    }
}

/// A virtual native layer with a fixed device table
pub struct VirtualHost {
    name: String,
    devices: Vec<DeviceInfo>,
    formats: Vec<SampleFormat>,
    streams: HashMap<u64, Arc<VirtualStream>>,
    next_handle: u64,
    origin: Instant,
}

impl Default for VirtualHost {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualHost {
    /// Host with a stereo duplex device, an 8-channel output and a mono input
    pub fn new() -> Self {
        let device = |index: usize, name: &str, inputs: u16, outputs: u16| DeviceInfo {
            index,
            name: name.to_string(),
            host_api: 0,
            max_input_channels: inputs,
            max_output_channels: outputs,
            default_low_input_latency: 0.005,
            default_low_output_latency: 0.005,
            default_high_input_latency: 0.04,
            default_high_output_latency: 0.04,
            default_sample_rate: 48000.0,
        };
        Self::with_devices(vec![
            device(0, "Virtual Duplex", 2, 2),
            device(1, "Virtual Surround Out", 0, 8),
            device(2, "Virtual Mic", 1, 0),
        ])
    }

    pub fn with_devices(devices: Vec<DeviceInfo>) -> Self {
        Self {
            name: "Virtual".to_string(),
            devices,
            formats: SampleFormat::ALL.to_vec(),
            streams: HashMap::new(),
            next_handle: 1,
            origin: Instant::now(),
        }
    }

    /// Restrict the accepted sample formats
    pub fn with_formats(mut self, formats: &[SampleFormat]) -> Self {
        self.formats = formats.to_vec();
        self
    }

    /// Driver for an open stream
    pub fn driver(&self, handle: NativeHandle) -> Option<VirtualDriver> {
        self.streams.get(&handle.0).map(|stream| VirtualDriver {
            stream: Arc::clone(stream),
        })
    }

    pub fn open_streams(&self) -> usize {
        self.streams.len()
    }

    fn stream(&self, handle: NativeHandle) -> BridgeResult<&Arc<VirtualStream>> {
        self.streams.get(&handle.0).ok_or_else(|| {
            native_error(NativeCode::BadStreamPtr, format!("unknown handle {}", handle.0))
        })
    }

    fn check_direction(&self, direction: &str, params: &StreamParameters) -> BridgeResult<()> {
        let device = self.devices.get(params.device).ok_or_else(|| {
            native_error(
                NativeCode::InvalidDevice,
                format!("{} device {} does not exist", direction, params.device),
            )
        })?;
        let max = if direction == "input" {
            device.max_input_channels
        } else {
            device.max_output_channels
        };
        if params.channel_count == 0 || params.channel_count > max {
            return Err(native_error(
                NativeCode::InvalidChannelCount,
                format!(
                    "{} has {} {} channels, {} requested",
                    device.name, max, direction, params.channel_count
                ),
            ));
        }
        if !self.formats.contains(&params.sample_format) {
            return Err(native_error(
                NativeCode::SampleFormatNotSupported,
                format!("{:?} is not supported", params.sample_format),
            ));
        }
        Ok(())
    }

    fn stop_stream(&mut self, handle: NativeHandle) -> BridgeResult<()> {
        let stream = Arc::clone(self.stream(handle)?);
        if !stream.active.swap(false, Ordering::AcqRel) {
            return Err(native_error(NativeCode::StreamIsStopped, "stream is stopped".to_string()));
        }
        // Wait out a period that is still running
        drop(lock(&stream.callback));
        stream.finish();
        Ok(())
    }
}

impl DeviceCatalog for VirtualHost {
    fn host_apis(&self) -> Vec<HostApiInfo> {
        vec![HostApiInfo {
            index: 0,
            name: self.name.clone(),
            device_count: self.devices.len(),
            default_input_device: self.default_input_device(),
            default_output_device: self.default_output_device(),
        }]
    }

    fn devices(&self) -> Vec<DeviceInfo> {
        self.devices.clone()
    }

    fn default_input_device(&self) -> Option<usize> {
        self.devices.iter().find(|d| d.is_input()).map(|d| d.index)
    }

    fn default_output_device(&self) -> Option<usize> {
        self.devices.iter().find(|d| d.is_output()).map(|d| d.index)
    }
}

impl AudioHost for VirtualHost {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_format_supported(&self, config: &StreamConfig) -> BridgeResult<()> {
        if let Some(input) = &config.input {
            self.check_direction("input", input)?;
        }
        if let Some(output) = &config.output {
            self.check_direction("output", output)?;
        }
        if !VIRTUAL_SAMPLE_RATES.contains(&config.sample_rate) {
            return Err(native_error(
                NativeCode::InvalidSampleRate,
                format!("{} Hz is not supported", config.sample_rate),
            ));
        }
        if config.frames_per_buffer > VIRTUAL_MAX_FRAMES {
            return Err(native_error(
                NativeCode::BufferTooBig,
                format!("{} frames exceeds {}", config.frames_per_buffer, VIRTUAL_MAX_FRAMES),
            ));
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
        let handle = NativeHandle(self.next_handle);
        self.next_handle += 1;
        self.streams.insert(
            handle.0,
            Arc::new(VirtualStream {
                config: config.clone(),
                origin: self.origin,
                active: AtomicBool::new(false),
                periods: AtomicU64::new(0),
                callback: Mutex::new(Some(callback)),
                finished: Mutex::new(finished),
            }),
        );
        log::debug!("{} host: opened stream {}", self.name, handle.0);
        Ok(handle)
    }

    fn start(&mut self, handle: NativeHandle) -> BridgeResult<()> {
        let stream = self.stream(handle)?;
        if stream.active.swap(true, Ordering::AcqRel) {
            return Err(native_error(
                NativeCode::StreamIsNotStopped,
                "stream is already running".to_string(),
            ));
        }
        Ok(())
    }

    fn stop(&mut self, handle: NativeHandle) -> BridgeResult<()> {
        self.stop_stream(handle)
    }

    fn abort(&mut self, handle: NativeHandle) -> BridgeResult<()> {
        // Nothing is buffered beyond the current period
        self.stop_stream(handle)
    }

    fn close(&mut self, handle: NativeHandle) -> BridgeResult<()> {
        let stream = self.streams.remove(&handle.0).ok_or_else(|| {
            native_error(NativeCode::BadStreamPtr, format!("unknown handle {}", handle.0))
        })?;
        let was_active = stream.active.swap(false, Ordering::AcqRel);
        let callback = lock(&stream.callback).take();
        drop(callback);
        if was_active {
            stream.finish();
        }
        // Drivers may outlive the handle; they must not keep the trampolines
        let finished = std::mem::replace(&mut *lock(&stream.finished), Box::new(|| {}));
        drop(finished);
        log::debug!("{} host: closed stream {}", self.name, handle.0);
        Ok(())
    }

    fn is_active(&self, handle: NativeHandle) -> BridgeResult<bool> {
        Ok(self.stream(handle)?.active.load(Ordering::Acquire))
    }

    fn stream_info(&self, handle: NativeHandle) -> BridgeResult<NativeStreamInfo> {
        let stream = self.stream(handle)?;
        let latency = |params: Option<StreamParameters>, default: fn(&DeviceInfo) -> f64| {
            params.map_or(0.0, |p| {
                let device_default = self.devices.get(p.device).map_or(0.0, default);
                p.suggested_latency.max(device_default)
            })
        };
        Ok(NativeStreamInfo {
            input_latency: latency(stream.config.input, |d| d.default_low_input_latency),
            output_latency: latency(stream.config.output, |d| d.default_low_output_latency),
            sample_rate: stream.config.sample_rate,
        })
    }

    fn stream_time(&self, handle: NativeHandle) -> BridgeResult<f64> {
        Ok(self.stream(handle)?.origin.elapsed().as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParameterKind;
    use std::sync::atomic::AtomicUsize;

    fn stereo(rate: f64, frames: u32) -> StreamConfig {
        let p = StreamParameters::new(0, 2, SampleFormat::Float32);
        StreamConfig::new(Some(p), Some(p), rate, frames)
    }

    fn counting_finished() -> (NativeFinished, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        (
            Box::new(move || {
                inner.fetch_add(1, Ordering::SeqCst);
            }),
            count,
        )
    }

    #[test]
    fn test_rejects_parameters_with_native_codes() {
        let host = VirtualHost::new();

        let err = host.is_format_supported(&stereo(12345.0, 256)).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::InvalidParameter { parameter: ParameterKind::SampleRate, .. }
        ));

        let p = StreamParameters::new(0, 3, SampleFormat::Float32);
        let err = host
            .is_format_supported(&StreamConfig::new(None, Some(p), 48000.0, 256))
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::InvalidParameter { parameter: ParameterKind::ChannelCount, .. }
        ));

        let p = StreamParameters::new(7, 2, SampleFormat::Float32);
        let err = host
            .is_format_supported(&StreamConfig::new(None, Some(p), 48000.0, 256))
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::InvalidParameter { parameter: ParameterKind::Device, .. }
        ));

        let host = VirtualHost::new().with_formats(&[SampleFormat::Int16]);
        let err = host.is_format_supported(&stereo(48000.0, 256)).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::InvalidParameter { parameter: ParameterKind::SampleFormat, .. }
        ));
    }

    #[test]
    fn test_period_runs_only_while_active() {
        let mut host = VirtualHost::new();
        let (finished, finished_count) = counting_finished();
        let handle = host
            .open(
                &stereo(48000.0, 4),
                Box::new(|io: PeriodIo<'_>| {
                    if let Some(out) = io.output {
                        out.fill(1);
                    }
                    Verdict::Continue
                }),
                finished,
            )
            .unwrap();
        let driver = host.driver(handle).unwrap();
        let mut out = vec![0u8; driver.output_bytes()];

        assert_eq!(driver.run_period(None, Some(&mut out[..])), None);
        host.start(handle).unwrap();
        assert!(host.is_active(handle).unwrap());
        assert_eq!(driver.run_period(None, Some(&mut out[..])), Some(Verdict::Continue));
        assert!(out.iter().all(|&b| b == 1));

        host.stop(handle).unwrap();
        assert_eq!(finished_count.load(Ordering::SeqCst), 1);
        assert_eq!(driver.run_period(None, Some(&mut out[..])), None);
        assert_eq!(host.stop(handle), Err(BridgeError::StreamIsStopped));

        host.start(handle).unwrap();
        assert_eq!(host.start(handle), Err(BridgeError::StreamIsNotStopped));
        host.close(handle).unwrap();
        assert_eq!(finished_count.load(Ordering::SeqCst), 2);
        assert_eq!(driver.run_period(None, Some(&mut out[..])), None);
        assert_eq!(host.close(handle), Err(BridgeError::StreamNotFound));
    }

    #[test]
    fn test_close_releases_trampolines_held_by_drivers() {
        let mut host = VirtualHost::new();
        let owner = Arc::new(());
        let (in_period, in_finished) = (Arc::clone(&owner), Arc::clone(&owner));
        let handle = host
            .open(
                &stereo(48000.0, 4),
                Box::new(move |_: PeriodIo<'_>| {
                    let _ = &in_period;
                    Verdict::Continue
                }),
                Box::new(move || {
                    let _ = &in_finished;
                }),
            )
            .unwrap();
        let driver = host.driver(handle).unwrap();
        assert_eq!(Arc::strong_count(&owner), 3);

        host.close(handle).unwrap();

        assert_eq!(Arc::strong_count(&owner), 1);
        assert_eq!(driver.run_period(None, None), None);
    }

    #[test]
    fn test_abort_verdict_discards_output_and_finishes() {
        let mut host = VirtualHost::new();
        let (finished, finished_count) = counting_finished();
        let handle = host
            .open(
                &stereo(48000.0, 2),
                Box::new(|io: PeriodIo<'_>| {
                    if let Some(out) = io.output {
                        out.fill(9);
                    }
                    Verdict::Abort
                }),
                finished,
            )
            .unwrap();
        host.start(handle).unwrap();
        let driver = host.driver(handle).unwrap();

        let mut out = vec![5u8; driver.output_bytes()];
        assert_eq!(driver.run_period(None, Some(&mut out[..])), Some(Verdict::Abort));
        assert!(out.iter().all(|&b| b == 0));
        assert!(!driver.is_active());
        assert_eq!(finished_count.load(Ordering::SeqCst), 1);
        assert_eq!(host.stop(handle), Err(BridgeError::StreamIsStopped));
    }

    #[test]
    fn test_frames_follow_buffer_length() {
        let mut host = VirtualHost::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let frames = Arc::clone(&seen);
        let (finished, _) = counting_finished();
        let handle = host
            .open(
                &stereo(48000.0, 256),
                Box::new(move |io: PeriodIo<'_>| {
                    frames.store(io.frames, Ordering::SeqCst);
                    assert!(io.time.output_buffer_dac_time > io.time.input_buffer_adc_time);
                    Verdict::Continue
                }),
                finished,
            )
            .unwrap();
        host.start(handle).unwrap();
        let driver = host.driver(handle).unwrap();

        let mut out = vec![0u8; 64 * 8];
        driver.run_period(None, Some(&mut out[..]));
        assert_eq!(seen.load(Ordering::SeqCst), 64);
        driver.run_period(None, None);
        assert_eq!(seen.load(Ordering::SeqCst), 256);
        assert_eq!(driver.periods(), 2);
    }

    #[test]
    fn test_stream_info_prefers_larger_latency() {
        let mut host = VirtualHost::new();
        let p = StreamParameters::new(0, 2, SampleFormat::Int16).with_suggested_latency(0.02);
        let config = StreamConfig::new(None, Some(p), 44100.0, 128);
        let (finished, _) = counting_finished();
        let handle = host
            .open(&config, Box::new(|_: PeriodIo<'_>| Verdict::Continue), finished)
            .unwrap();

        let info = host.stream_info(handle).unwrap();
        assert_eq!(info.output_latency, 0.02);
        assert_eq!(info.input_latency, 0.0);
        assert_eq!(info.sample_rate, 44100.0);
        assert!(host.stream_time(handle).unwrap() >= 0.0);
    }

    #[test]
    fn test_catalog_defaults() {
        let host = VirtualHost::new();
        assert_eq!(host.default_input_device(), Some(0));
        assert_eq!(host.default_output_device(), Some(0));
        assert_eq!(host.host_apis()[0].device_count, 3);
        assert_eq!(host.find_device(Some("virtual"), "Virtual Mic").unwrap().index, 2);
        assert!(host.find_device(None, "Missing").is_err());
        assert!(host.find_device(Some("ALSA"), "Virtual Mic").is_err());
        assert_eq!(host.device_host_api(2), Ok(0));
        assert!(matches!(
            host.device_host_api(9),
            Err(BridgeError::InvalidParameter { parameter: ParameterKind::Device, .. })
        ));
    }
}
