//! Callback-less streams: blocking reads and writes
//!
//! A blocking stream is an ordinary stream whose processing callback only
//! moves bytes between the period buffers and two `rtrb` byte queues. The
//! control thread reads and writes the other ends:
//!
//! ```text
//!  hardware thread (BlockingCallback)        caller (BlockingEndpoint)
//!  ──────────────────────────────────        ─────────────────────────
//!  period input  ──push──► input queue  ──►  read(buf, frames)
//!  period output ◄──pull── output queue ◄──  write(buf, frames)
//! ```
//!
//! Queues hold [`BLOCKING_QUEUE_PERIODS`] periods and only ever carry whole
//! frames. An empty output queue plays silence and is reported to the next
//! write as [`StatusFlags::OUTPUT_UNDERFLOW`]; input that finds the queue
//! full is dropped and reported to the next read as
//! [`StatusFlags::INPUT_OVERFLOW`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::callback::{AudioCallback, CallbackResult};
use super::context::CallbackData;
use crate::error::{BridgeError, BridgeResult, NativeCode, ParameterKind};
use crate::types::{StatusFlags, StreamConfig, Verdict};

/// Periods each direction can queue
pub const BLOCKING_QUEUE_PERIODS: usize = 4;

/// Default limit for one blocking read or write
pub const DEFAULT_BLOCKING_TIMEOUT: Duration = Duration::from_secs(2);

/// Interval between queue polls while blocked
const POLL_INTERVAL: Duration = Duration::from_micros(500);

fn native_error(code: NativeCode) -> BridgeError {
    code.into_error(None)
}

/// Build the callback and the caller-side endpoint of a blocking stream
pub(crate) fn blocking_channel(config: &StreamConfig) -> (BlockingCallback, BlockingEndpoint) {
    let frames = config.frames_per_buffer as usize;
    let overflow = Arc::new(AtomicBool::new(false));
    let underflow = Arc::new(AtomicBool::new(false));

    let (input_tx, input_rx) = match config.input {
        Some(p) => {
            let (tx, rx) = rtrb::RingBuffer::new(BLOCKING_QUEUE_PERIODS * frames * p.frame_bytes());
            (Some(tx), Some(rx))
        }
        None => (None, None),
    };
    let (output_tx, output_rx) = match config.output {
        Some(p) => {
            let (tx, rx) = rtrb::RingBuffer::new(BLOCKING_QUEUE_PERIODS * frames * p.frame_bytes());
            (Some(tx), Some(rx))
        }
        None => (None, None),
    };
    let input_frame_bytes = config.input.map_or(1, |p| p.frame_bytes().max(1));
    let output_frame_bytes = config.output.map_or(1, |p| p.frame_bytes().max(1));

    let callback = BlockingCallback {
        input: input_tx,
        output: output_rx,
        input_frame_bytes,
        output_frame_bytes,
        overflow: Arc::clone(&overflow),
        underflow: Arc::clone(&underflow),
    };
    let endpoint = BlockingEndpoint {
        input: input_rx,
        output: output_tx,
        input_frame_bytes,
        output_frame_bytes,
        overflow,
        underflow,
    };
    (callback, endpoint)
}

/// Queue pump run on the hardware thread
pub(crate) struct BlockingCallback {
    input: Option<rtrb::Producer<u8>>,
    output: Option<rtrb::Consumer<u8>>,
    input_frame_bytes: usize,
    output_frame_bytes: usize,
    overflow: Arc<AtomicBool>,
    underflow: Arc<AtomicBool>,
}

impl AudioCallback for BlockingCallback {
    fn process(&mut self, data: &mut CallbackData) -> CallbackResult {
        let frames = data.frames();
        let (input, output) = data.io_mut();

        if let (Some(queue), Some(buffer)) = (self.input.as_mut(), input) {
            let bytes = buffer.as_bytes();
            let room = queue.slots() / self.input_frame_bytes * self.input_frame_bytes;
            let n = bytes.len().min(room);
            if n < bytes.len() {
                self.overflow.store(true, Ordering::Release);
            }
            if let Ok(chunk) = queue.write_chunk_uninit(n) {
                chunk.fill_from_iter(bytes[..n].iter().copied());
            }
        }

        if let (Some(queue), Some(buffer)) = (self.output.as_mut(), output) {
            let need = (frames * self.output_frame_bytes).min(buffer.capacity());
            let available = queue.slots().min(need) / self.output_frame_bytes * self.output_frame_bytes;
            if let Ok(chunk) = queue.read_chunk(available) {
                let (first, second) = chunk.as_slices();
                buffer.write_bytes(first);
                buffer.write_bytes(second);
                chunk.commit_all();
            }
            // The bridge pads the rest of the period with silence
            if available < need {
                self.underflow.store(true, Ordering::Release);
            }
        }

        Verdict::Continue.into()
    }
}

/// Caller side of a blocking stream, kept by the stream manager
pub(crate) struct BlockingEndpoint {
    input: Option<rtrb::Consumer<u8>>,
    output: Option<rtrb::Producer<u8>>,
    input_frame_bytes: usize,
    output_frame_bytes: usize,
    overflow: Arc<AtomicBool>,
    underflow: Arc<AtomicBool>,
}

impl BlockingEndpoint {
    /// Frames that can be read without waiting
    pub fn read_available(&self) -> BridgeResult<usize> {
        let queue = self
            .input
            .as_ref()
            .ok_or_else(|| native_error(NativeCode::CanNotReadFromAnOutputOnlyStream))?;
        Ok(queue.slots() / self.input_frame_bytes)
    }

    /// Frames that can be written without waiting
    pub fn write_available(&self) -> BridgeResult<usize> {
        let queue = self
            .output
            .as_ref()
            .ok_or_else(|| native_error(NativeCode::CanNotWriteToAnInputOnlyStream))?;
        Ok(queue.slots() / self.output_frame_bytes)
    }

    /// Fill `buf` with `frames` frames of input
    ///
    /// Waits for the hardware thread while the stream is active. Fails with
    /// [`BridgeError::StreamIsStopped`] when the queue runs dry on a stopped
    /// stream, and with [`BridgeError::TimedOut`] after `timeout`; frames
    /// already copied stay in `buf` either way.
    pub fn read(
        &mut self,
        buf: &mut [u8],
        frames: usize,
        timeout: Duration,
        is_active: impl Fn() -> bool,
    ) -> BridgeResult<StatusFlags> {
        let frame_bytes = self.input_frame_bytes;
        let queue = self
            .input
            .as_mut()
            .ok_or_else(|| native_error(NativeCode::CanNotReadFromAnOutputOnlyStream))?;
        let total = checked_len(buf.len(), frames, frame_bytes)?;

        let deadline = Instant::now() + timeout;
        let mut done = 0;
        while done < total {
            let n = queue.slots().min(total - done) / frame_bytes * frame_bytes;
            if n == 0 {
                wait(deadline, &is_active)?;
                continue;
            }
            if let Ok(chunk) = queue.read_chunk(n) {
                let (first, second) = chunk.as_slices();
                buf[done..done + first.len()].copy_from_slice(first);
                buf[done + first.len()..done + n].copy_from_slice(second);
                chunk.commit_all();
            }
            done += n;
        }

        let mut status = StatusFlags::empty();
        if self.overflow.swap(false, Ordering::AcqRel) {
            status.insert(StatusFlags::INPUT_OVERFLOW);
        }
        Ok(status)
    }

    /// Queue `frames` frames of output from `buf`
    ///
    /// Waits for room while the stream is active; a stopped stream accepts
    /// writes only up to the queue capacity.
    pub fn write(
        &mut self,
        buf: &[u8],
        frames: usize,
        timeout: Duration,
        is_active: impl Fn() -> bool,
    ) -> BridgeResult<StatusFlags> {
        let frame_bytes = self.output_frame_bytes;
        let queue = self
            .output
            .as_mut()
            .ok_or_else(|| native_error(NativeCode::CanNotWriteToAnInputOnlyStream))?;
        let total = checked_len(buf.len(), frames, frame_bytes)?;

        let deadline = Instant::now() + timeout;
        let mut done = 0;
        while done < total {
            let n = queue.slots().min(total - done) / frame_bytes * frame_bytes;
            if n == 0 {
                wait(deadline, &is_active)?;
                continue;
            }
            if let Ok(chunk) = queue.write_chunk_uninit(n) {
                chunk.fill_from_iter(buf[done..done + n].iter().copied());
            }
            done += n;
        }

        let mut status = StatusFlags::empty();
        if self.underflow.swap(false, Ordering::AcqRel) {
            status.insert(StatusFlags::OUTPUT_UNDERFLOW);
        }
        Ok(status)
    }
}

fn checked_len(buf_len: usize, frames: usize, frame_bytes: usize) -> BridgeResult<usize> {
    let total = frames.checked_mul(frame_bytes).unwrap_or(usize::MAX);
    if total > buf_len {
        return Err(BridgeError::invalid(
            ParameterKind::BufferSize,
            format!("{} frames need {} bytes, buffer holds {}", frames, total, buf_len),
        ));
    }
    Ok(total)
}

fn wait(deadline: Instant, is_active: &impl Fn() -> bool) -> BridgeResult<()> {
    if !is_active() {
        return Err(BridgeError::StreamIsStopped);
    }
    if Instant::now() >= deadline {
        return Err(BridgeError::TimedOut);
    }
    thread::sleep(POLL_INTERVAL);
    Ok(())
}
