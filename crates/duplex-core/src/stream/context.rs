//! Per-stream callback context
//!
//! A [`ContextCell`] is created when a stream opens and lives in the bridge
//! registry until the stream closes. It splits into two parts:
//!
//! - [`CallbackContext`]: buffers, metadata and the processing callback.
//!   Mutated only by the hardware thread, behind a mutex the hardware thread
//!   only ever `try_lock`s.
//! - [`ContextMetrics`] and the finished callback slot: shared with the
//!   control thread through atomics and a `basedrop::SharedCell`.
//!
//! Buffers are sized once at open time:
//! `frames_per_buffer × channels × sample_size` bytes per direction.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use basedrop::{Handle, Shared, SharedCell};
use bytemuck::Pod;

use super::callback::{AudioCallback, FinishedCallback};
use super::diagnostics::DiagnosticsSender;
use crate::types::{SampleFormat, StatusFlags, StreamConfig, StreamId, TimeInfo};

// ═══════════════════════════════════════════════════════════════════════════════
// Buffers
// ═══════════════════════════════════════════════════════════════════════════════

/// Hardware input for the current period, read front to back
pub struct InputBuffer {
    bytes: Box<[u8]>,
    len: usize,
    cursor: usize,
}

impl InputBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: vec![0; capacity].into_boxed_slice(),
            len: 0,
            cursor: 0,
        }
    }

    /// Copy in a period of hardware input, returning the bytes kept
    pub(crate) fn fill(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.bytes.len());
        self.bytes[..n].copy_from_slice(&src[..n]);
        self.len = n;
        self.cursor = 0;
        n
    }

    pub(crate) fn fill_silence(&mut self, len: usize, silence: u8) {
        let n = len.min(self.bytes.len());
        self.bytes[..n].fill(silence);
        self.len = n;
        self.cursor = 0;
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Valid bytes this period
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.len - self.cursor
    }

    pub fn seek(&mut self, position: usize) {
        self.cursor = position.min(self.len);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn read_bytes(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.remaining());
        out[..n].copy_from_slice(&self.bytes[self.cursor..self.cursor + n]);
        self.cursor += n;
        n
    }

    /// Read one native-endian sample, or `None` at the end of the period
    pub fn read_sample<T: Pod>(&mut self) -> Option<T> {
        let size = std::mem::size_of::<T>();
        if self.remaining() < size {
            return None;
        }
        let sample = bytemuck::pod_read_unaligned(&self.bytes[self.cursor..self.cursor + size]);
        self.cursor += size;
        Some(sample)
    }

    /// Read as many whole samples as fit into `out`
    pub fn read_samples<T: Pod>(&mut self, out: &mut [T]) -> usize {
        let mut count = 0;
        for slot in out.iter_mut() {
            match self.read_sample() {
                Some(sample) => *slot = sample,
                None => break,
            }
            count += 1;
        }
        count
    }
}

/// Output the callback produces for the current period
///
/// Writes beyond capacity are dropped but still counted, so the bridge can
/// report how much the callback tried to produce.
pub struct OutputBuffer {
    bytes: Box<[u8]>,
    requested: usize,
}

impl OutputBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: vec![0; capacity].into_boxed_slice(),
            requested: 0,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.requested = 0;
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Bytes actually stored
    pub fn len(&self) -> usize {
        self.requested.min(self.bytes.len())
    }

    pub fn is_empty(&self) -> bool {
        self.requested == 0
    }

    /// Bytes the callback asked to write, including dropped ones
    pub fn requested(&self) -> usize {
        self.requested
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len()]
    }

    /// Append raw bytes, returning how many were stored
    pub fn write_bytes(&mut self, src: &[u8]) -> usize {
        let start = self.len();
        let n = src.len().min(self.bytes.len() - start);
        self.bytes[start..start + n].copy_from_slice(&src[..n]);
        self.requested = self.requested.saturating_add(src.len());
        n
    }

    pub fn write_sample<T: Pod>(&mut self, sample: T) -> bool {
        let bytes = bytemuck::bytes_of(&sample);
        self.write_bytes(bytes) == bytes.len()
    }

    /// Append samples, returning how many were stored whole
    pub fn write_samples<T: Pod>(&mut self, samples: &[T]) -> usize {
        let stored = self.write_bytes(bytemuck::cast_slice(samples));
        stored / std::mem::size_of::<T>().max(1)
    }

    pub fn write_silence(&mut self, len: usize, silence: u8) -> usize {
        let start = self.len();
        let n = len.min(self.bytes.len() - start);
        self.bytes[start..start + n].fill(silence);
        self.requested = self.requested.saturating_add(len);
        n
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Callback data
// ═══════════════════════════════════════════════════════════════════════════════

/// Everything a processing callback sees for one period
pub struct CallbackData {
    pub(crate) input: Option<InputBuffer>,
    pub(crate) output: Option<OutputBuffer>,
    pub(crate) has_input: bool,
    pub(crate) has_output: bool,
    input_channels: u16,
    output_channels: u16,
    input_format: Option<SampleFormat>,
    output_format: Option<SampleFormat>,
    frames_per_buffer: usize,
    sample_rate: f64,
    pub(crate) frames: usize,
    pub(crate) time: TimeInfo,
    pub(crate) status: StatusFlags,
    pub(crate) last_call_duration: Duration,
}

impl CallbackData {
    pub(crate) fn new(config: &StreamConfig) -> Self {
        let frames = config.frames_per_buffer as usize;
        Self {
            input: config
                .input
                .map(|p| InputBuffer::with_capacity(frames * p.frame_bytes())),
            output: config
                .output
                .map(|p| OutputBuffer::with_capacity(frames * p.frame_bytes())),
            has_input: false,
            has_output: false,
            input_channels: config.input_channels(),
            output_channels: config.output_channels(),
            input_format: config.input.map(|p| p.sample_format),
            output_format: config.output.map(|p| p.sample_format),
            frames_per_buffer: frames,
            sample_rate: config.sample_rate,
            frames: 0,
            time: TimeInfo::default(),
            status: StatusFlags::empty(),
            last_call_duration: Duration::ZERO,
        }
    }

    /// Hardware input, if this period has any
    pub fn input(&self) -> Option<&InputBuffer> {
        self.input.as_ref().filter(|_| self.has_input)
    }

    pub fn input_mut(&mut self) -> Option<&mut InputBuffer> {
        let present = self.has_input;
        self.input.as_mut().filter(|_| present)
    }

    /// Output for this period, if the hardware expects any
    pub fn output(&self) -> Option<&OutputBuffer> {
        self.output.as_ref().filter(|_| self.has_output)
    }

    pub fn output_mut(&mut self) -> Option<&mut OutputBuffer> {
        let present = self.has_output;
        self.output.as_mut().filter(|_| present)
    }

    /// Borrow both directions at once
    pub fn io_mut(&mut self) -> (Option<&mut InputBuffer>, Option<&mut OutputBuffer>) {
        let (has_input, has_output) = (self.has_input, self.has_output);
        (
            self.input.as_mut().filter(|_| has_input),
            self.output.as_mut().filter(|_| has_output),
        )
    }

    /// Copy the unread input straight to the output
    ///
    /// Returns the number of bytes written. Only meaningful when both
    /// directions share a frame layout.
    pub fn pass_through(&mut self) -> usize {
        match self.io_mut() {
            (Some(input), Some(output)) => {
                let start = input.position();
                let stored = output.write_bytes(&input.as_bytes()[start..]);
                input.seek(start + stored);
                stored
            }
            _ => 0,
        }
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn frames_per_buffer(&self) -> usize {
        self.frames_per_buffer
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn time(&self) -> TimeInfo {
        self.time
    }

    pub fn status(&self) -> StatusFlags {
        self.status
    }

    /// Wall-clock duration of the previous invocation
    pub fn last_call_duration(&self) -> Duration {
        self.last_call_duration
    }

    pub fn input_channels(&self) -> u16 {
        self.input_channels
    }

    pub fn output_channels(&self) -> u16 {
        self.output_channels
    }

    pub fn input_format(&self) -> Option<SampleFormat> {
        self.input_format
    }

    pub fn output_format(&self) -> Option<SampleFormat> {
        self.output_format
    }

    /// Input sample size in bytes, 0 for output-only streams
    pub fn input_sample_size(&self) -> usize {
        self.input_format.map_or(0, SampleFormat::sample_size)
    }

    pub fn output_sample_size(&self) -> usize {
        self.output_format.map_or(0, SampleFormat::sample_size)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Context
// ═══════════════════════════════════════════════════════════════════════════════

/// Hardware-thread side of a stream context
pub struct CallbackContext {
    pub(crate) data: CallbackData,
    pub(crate) callback: Box<dyn AudioCallback>,
    pub(crate) diagnostics: DiagnosticsSender,
}

impl CallbackContext {
    pub fn new(
        config: &StreamConfig,
        callback: Box<dyn AudioCallback>,
        diagnostics: DiagnosticsSender,
    ) -> Self {
        Self {
            data: CallbackData::new(config),
            callback,
            diagnostics,
        }
    }

    pub fn data(&self) -> &CallbackData {
        &self.data
    }
}

/// Lock-free counters readable from the control thread
#[derive(Debug, Default)]
pub struct ContextMetrics {
    last_call_nanos: AtomicU64,
    periods: AtomicU64,
    busy_periods: AtomicU64,
    /// Raised on start, consumed by the first finished notification
    finished_pending: AtomicBool,
}

impl ContextMetrics {
    #[inline]
    pub fn last_call_duration(&self) -> Duration {
        Duration::from_nanos(self.last_call_nanos.load(Ordering::Relaxed))
    }

    #[inline]
    pub(crate) fn record_call(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.last_call_nanos.store(nanos, Ordering::Relaxed);
        self.periods.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn periods(&self) -> u64 {
        self.periods.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn record_busy(&self) {
        self.busy_periods.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn busy_periods(&self) -> u64 {
        self.busy_periods.load(Ordering::Relaxed)
    }

    pub(crate) fn arm_finished(&self) {
        self.finished_pending.store(true, Ordering::Release);
    }

    pub(crate) fn take_finished(&self) -> bool {
        self.finished_pending.swap(false, Ordering::AcqRel)
    }
}

/// Registry entry for one open stream
pub struct ContextCell {
    id: StreamId,
    period_seconds: f64,
    output_silence: u8,
    pub(crate) state: Mutex<CallbackContext>,
    finished: SharedCell<Option<FinishedCallback>>,
    metrics: ContextMetrics,
}

impl ContextCell {
    pub fn new(
        handle: &Handle,
        id: StreamId,
        config: &StreamConfig,
        context: CallbackContext,
    ) -> Self {
        Self {
            id,
            period_seconds: config.period_seconds(),
            output_silence: config
                .output
                .map_or(0, |p| p.sample_format.silence_byte()),
            state: Mutex::new(context),
            finished: SharedCell::new(Shared::new(handle, None)),
            metrics: ContextMetrics::default(),
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn metrics(&self) -> &ContextMetrics {
        &self.metrics
    }

    /// Byte value of silence in the output format
    pub fn output_silence(&self) -> u8 {
        self.output_silence
    }

    /// Fraction of the period the last invocation took
    pub fn cpu_load(&self) -> f64 {
        if self.period_seconds <= 0.0 {
            return 0.0;
        }
        self.metrics.last_call_duration().as_secs_f64() / self.period_seconds
    }

    /// Swap the finished callback; safe while the stream is running
    pub fn set_finished(&self, handle: &Handle, callback: Option<FinishedCallback>) {
        self.finished.set(Shared::new(handle, callback));
    }

    pub fn has_finished_callback(&self) -> bool {
        self.finished.get().is_some()
    }

    pub(crate) fn finished(&self) -> Shared<Option<FinishedCallback>> {
        self.finished.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StreamParameters;

    fn stereo_config(frames: u32) -> StreamConfig {
        let p = StreamParameters::new(0, 2, SampleFormat::Float32);
        StreamConfig::new(Some(p), Some(p), 48000.0, frames)
    }

    #[test]
    fn test_buffers_sized_from_config() {
        let data = CallbackData::new(&stereo_config(256));
        assert_eq!(data.input.as_ref().unwrap().capacity(), 256 * 2 * 4);
        assert_eq!(data.output.as_ref().unwrap().capacity(), 256 * 2 * 4);
        assert_eq!(data.input_sample_size(), 4);
        assert_eq!(data.output_channels(), 2);
    }

    #[test]
    fn test_directions_hidden_when_period_lacks_them() {
        let mut data = CallbackData::new(&stereo_config(16));
        assert!(data.input().is_none());
        assert!(data.output_mut().is_none());
        data.has_input = true;
        data.has_output = true;
        assert!(data.input().is_some());
        assert!(data.output_mut().is_some());

        let p = StreamParameters::new(0, 1, SampleFormat::Int16);
        let mut output_only = CallbackData::new(&StreamConfig::new(None, Some(p), 48000.0, 16));
        output_only.has_input = true;
        assert!(output_only.input().is_none());
        assert_eq!(output_only.input_sample_size(), 0);
    }

    #[test]
    fn test_input_sample_reads() {
        let mut input = InputBuffer::with_capacity(8);
        let src: Vec<u8> = bytemuck::cast_slice(&[1.5f32, -2.0f32]).to_vec();
        assert_eq!(input.fill(&src), 8);
        assert_eq!(input.read_sample::<f32>(), Some(1.5));
        assert_eq!(input.read_sample::<f32>(), Some(-2.0));
        assert_eq!(input.read_sample::<f32>(), None);

        input.seek(0);
        let mut out = [0i16; 8];
        assert_eq!(input.read_samples(&mut out), 4);
    }

    #[test]
    fn test_input_fill_truncates() {
        let mut input = InputBuffer::with_capacity(4);
        assert_eq!(input.fill(&[1, 2, 3, 4, 5, 6]), 4);
        assert_eq!(input.as_bytes(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_output_counts_dropped_writes() {
        let mut output = OutputBuffer::with_capacity(8);
        assert_eq!(output.write_samples(&[1i32, 2, 3]), 2);
        assert_eq!(output.len(), 8);
        assert_eq!(output.requested(), 12);
        assert!(!output.write_sample(4u8));

        output.reset();
        assert!(output.is_empty());
        assert!(output.write_sample(0x0102u16));
        assert_eq!(output.as_bytes(), bytemuck::bytes_of(&0x0102u16));
    }

    #[test]
    fn test_pass_through_copies_unread_input() {
        let mut data = CallbackData::new(&stereo_config(4));
        data.has_input = true;
        data.has_output = true;
        let samples = [0.25f32; 8];
        data.input.as_mut().unwrap().fill(bytemuck::cast_slice(&samples));
        data.output.as_mut().unwrap().reset();

        assert_eq!(data.pass_through(), 32);
        assert_eq!(
            data.output().unwrap().as_bytes(),
            bytemuck::cast_slice::<f32, u8>(&samples)
        );
        assert_eq!(data.input().unwrap().remaining(), 0);
    }

    #[test]
    fn test_metrics_and_cpu_load() {
        let (_gc, handle) = crate::gc::GcThread::spawn().unwrap();
        let config = stereo_config(480);
        let (tx, _rx) = crate::stream::diagnostics::diagnostics_channel(StreamId(1), 4);
        let context = CallbackContext::new(
            &config,
            Box::new(|_: &mut CallbackData| crate::types::Verdict::Continue),
            tx,
        );
        let cell = ContextCell::new(&handle, StreamId(1), &config, context);

        cell.metrics().record_call(Duration::from_millis(5));
        assert_eq!(cell.metrics().last_call_duration(), Duration::from_millis(5));
        assert_eq!(cell.metrics().periods(), 1);
        assert!((cell.cpu_load() - 0.5).abs() < 1e-9);

        assert!(!cell.has_finished_callback());
        cell.set_finished(&handle, Some(Box::new(|_: &CallbackData| {})));
        assert!(cell.has_finished_callback());

        cell.metrics().arm_finished();
        assert!(cell.metrics().take_finished());
        assert!(!cell.metrics().take_finished());
    }
}
