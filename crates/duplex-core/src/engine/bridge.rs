//! Hardware-thread and consumer-thread halves of the engine stream
//!
//! ```text
//!  hardware thread (EngineBridge)             engine thread (EngineEndpoint)
//!  ──────────────────────────────             ──────────────────────────────
//!  input bytes ─► input ring ──── ready ───►  read_input()
//!               wake.try_send(()) ────────►   wait_for_period()
//!  output  ◄────── output ring ◄── ready ───  push_output()
//! ```
//!
//! The hardware side never waits for the engine. When the engine is late the
//! output ring still holds its previous block, which is emitted again.

use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};

use super::flags::EngineFlags;
use crate::ring::{RingConsumer, RingProducer, SampleRingBuffer};
use crate::stream::{AudioCallback, CallbackData, CallbackResult};
use crate::types::Verdict;

/// Build a connected bridge/endpoint pair with `ring_len` samples per block
pub fn engine_channel(flags: Arc<EngineFlags>, ring_len: usize) -> (EngineBridge, EngineEndpoint) {
    let (input_tx, input_rx) = SampleRingBuffer::new::<i32>(ring_len);
    let (output_tx, output_rx) = SampleRingBuffer::new::<i32>(ring_len);
    // One pending wake-up is enough; the engine always reads the latest block
    let (wake_tx, wake_rx) = channel::bounded(1);

    let bridge = EngineBridge {
        flags: Arc::clone(&flags),
        input: input_tx,
        output: output_rx,
        wake: wake_tx,
    };
    let endpoint = EngineEndpoint {
        flags,
        input: input_rx,
        output: output_tx,
        wake: wake_rx,
        scratch: vec![0; ring_len],
    };
    (bridge, endpoint)
}

/// [`AudioCallback`] feeding interleaved `Int32` periods to an engine
pub struct EngineBridge {
    flags: Arc<EngineFlags>,
    input: RingProducer<i32>,
    output: RingConsumer<i32>,
    wake: Sender<()>,
}

impl AudioCallback for EngineBridge {
    fn process(&mut self, data: &mut CallbackData) -> CallbackResult {
        // Exit wins over pause and readiness
        if self.flags.exit_requested() {
            return Verdict::Abort.into();
        }
        if !self.flags.is_ready() || self.flags.is_paused() {
            return Verdict::Continue.into();
        }

        let input_live = self.flags.input_started();
        let out_samples = data.frames() * data.output_channels() as usize;
        let (input, output) = data.io_mut();

        self.input.write_with(|block| {
            let read = match input.filter(|_| input_live) {
                Some(buffer) => buffer.read_samples(block),
                None => 0,
            };
            block[read..].fill(0);
        });
        let _ = self.wake.try_send(());

        if let Some(output) = output {
            let held = self.output.peek_if_ready(|block| {
                output.write_samples(&block[..out_samples.min(block.len())]);
            });
            if held.is_none() {
                output.write_silence(out_samples * std::mem::size_of::<i32>(), 0);
            }
        }

        Verdict::Continue.into()
    }
}

/// Engine-side view of the stream
pub struct EngineEndpoint {
    flags: Arc<EngineFlags>,
    input: RingConsumer<i32>,
    output: RingProducer<i32>,
    wake: Receiver<()>,
    scratch: Vec<i32>,
}

impl EngineEndpoint {
    /// Samples per ring block
    pub fn block_len(&self) -> usize {
        self.scratch.len()
    }

    pub fn flags(&self) -> &Arc<EngineFlags> {
        &self.flags
    }

    /// Block until the hardware thread publishes a period, or `timeout`
    pub fn wait_for_period(&self, timeout: Duration) -> bool {
        self.wake.recv_timeout(timeout).is_ok()
    }

    /// Copy the latest input block into `buf`; 0 when nothing was published yet
    pub fn read_input(&mut self, buf: &mut [i32]) -> usize {
        if self.input.read_if_ready(buf) {
            buf.len().min(self.input.len())
        } else {
            0
        }
    }

    /// Publish an output block for the next hardware periods
    pub fn push_output(&mut self, buf: &[i32]) -> usize {
        self.output.write(buf)
    }

    /// Wait for a period, then run `process(input, output)` on the blocks
    ///
    /// Returns `false` on timeout without calling `process`.
    pub fn process_period(
        &mut self,
        timeout: Duration,
        process: impl FnOnce(&[i32], &mut [i32]),
    ) -> bool {
        if !self.wait_for_period(timeout) {
            return false;
        }
        if !self.input.read_if_ready(&mut self.scratch) {
            self.scratch.fill(0);
        }
        let scratch = &self.scratch;
        self.output.write_with(|block| process(scratch, block));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineControl;
    use crate::host::{AudioHost, VirtualDriver, VirtualHost};
    use crate::stream::{Stream, StreamManager};
    use crate::types::{SampleFormat, StreamConfig, StreamParameters};

    const FRAMES: usize = 4;

    fn i32_bytes(samples: &[i32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
    }

    fn i32_samples(bytes: &[u8]) -> Vec<i32> {
        bytes
            .chunks_exact(4)
            .map(|c| i32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    struct Rig {
        manager: StreamManager<VirtualHost>,
        stream: Stream,
        driver: VirtualDriver,
        control: EngineControl,
        endpoint: EngineEndpoint,
    }

    impl Rig {
        fn period(&self, input: &[i32]) -> (Option<Verdict>, Vec<i32>) {
            let bytes = i32_bytes(input);
            let mut out = vec![0xAAu8; self.driver.output_bytes()];
            let verdict = self.driver.run_period(Some(&bytes[..]), Some(&mut out[..]));
            (verdict, i32_samples(&out))
        }
    }

    fn rig() -> Rig {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut manager = StreamManager::new(VirtualHost::new()).unwrap();
        let p = StreamParameters::new(0, 2, SampleFormat::Int32);
        let mut stream = Stream::new(StreamConfig::new(Some(p), Some(p), 48000.0, FRAMES as u32));

        let control = EngineControl::default();
        let (bridge, endpoint) = engine_channel(Arc::clone(control.flags()), FRAMES * 2);
        manager.open(&mut stream, bridge).unwrap();
        manager.start(&mut stream).unwrap();
        let native = manager.native_handle(&stream).unwrap();
        let driver = manager.host().driver(native).unwrap();
        Rig {
            manager,
            stream,
            driver,
            control,
            endpoint,
        }
    }

    #[test]
    fn test_not_ready_leaves_rings_untouched() {
        let mut rig = rig();
        let (verdict, out) = rig.period(&[9; 8]);

        assert_eq!(verdict, Some(Verdict::Continue));
        assert_eq!(out, vec![0; 8]);
        let mut buf = [0i32; 8];
        assert_eq!(rig.endpoint.read_input(&mut buf), 0);
        assert!(!rig.endpoint.wait_for_period(Duration::ZERO));
    }

    #[test]
    fn test_pause_short_circuits_until_resumed() {
        let mut rig = rig();
        rig.control.set_ready(true);
        rig.control.start_input();
        rig.control.pause();
        rig.period(&[3; 8]);
        let mut buf = [0i32; 8];
        assert_eq!(rig.endpoint.read_input(&mut buf), 0);

        rig.control.resume();
        rig.period(&[3; 8]);
        assert_eq!(rig.endpoint.read_input(&mut buf), 8);
        assert_eq!(buf, [3; 8]);
    }

    #[test]
    fn test_input_forwarded_and_engine_woken() {
        let mut rig = rig();
        rig.control.set_ready(true);
        rig.control.start_input();

        let input: Vec<i32> = (1..=8).collect();
        rig.period(&input);

        assert!(rig.endpoint.wait_for_period(Duration::from_millis(100)));
        let mut buf = [0i32; 8];
        assert_eq!(rig.endpoint.read_input(&mut buf), 8);
        assert_eq!(buf.to_vec(), input);
    }

    #[test]
    fn test_input_zeroed_until_started() {
        let mut rig = rig();
        rig.control.set_ready(true);
        rig.period(&[5; 8]);

        let mut buf = [1i32; 8];
        assert_eq!(rig.endpoint.read_input(&mut buf), 8);
        assert_eq!(buf, [0; 8]);
    }

    #[test]
    fn test_silence_until_engine_produces() {
        let rig = rig();
        rig.control.set_ready(true);
        let (_, out) = rig.period(&[5; 8]);
        assert_eq!(out, vec![0; 8]);
    }

    #[test]
    fn test_late_engine_repeats_last_block() {
        let mut rig = rig();
        rig.control.set_ready(true);
        rig.endpoint.push_output(&[7, -7, 7, -7, 7, -7, 7, -7]);

        let (_, first) = rig.period(&[0; 8]);
        let (_, second) = rig.period(&[0; 8]);

        assert_eq!(first, vec![7, -7, 7, -7, 7, -7, 7, -7]);
        assert_eq!(second, first);
    }

    #[test]
    fn test_exit_aborts_stream() {
        let mut rig = rig();
        rig.control.set_ready(true);
        rig.control.request_exit();

        let (verdict, out) = rig.period(&[1; 8]);

        assert_eq!(verdict, Some(Verdict::Abort));
        assert_eq!(out, vec![0; 8]);
        assert!(!rig.driver.is_active());
        assert!(!rig.manager.is_stream_active(&rig.stream).unwrap());
        assert_eq!(rig.period(&[1; 8]).0, None);
    }

    #[test]
    fn test_exit_overrides_pause() {
        let rig = rig();
        rig.control.set_ready(true);
        rig.control.pause();
        assert_eq!(rig.period(&[1; 8]).0, Some(Verdict::Continue));

        rig.control.request_exit();
        let (verdict, out) = rig.period(&[1; 8]);

        assert_eq!(verdict, Some(Verdict::Abort));
        assert_eq!(out, vec![0; 8]);
        assert!(!rig.driver.is_active());
    }

    #[test]
    fn test_exit_before_ready_ends_stream() {
        let mut rig = rig();
        rig.control.request_exit();

        assert_eq!(rig.period(&[4; 8]).0, Some(Verdict::Abort));
        assert!(!rig.manager.is_stream_active(&rig.stream).unwrap());
        let mut buf = [0i32; 8];
        assert_eq!(rig.endpoint.read_input(&mut buf), 0);
    }

    #[test]
    fn test_engine_thread_round_trip() {
        let Rig {
            manager: _manager,
            stream: _stream,
            driver,
            control,
            mut endpoint,
        } = rig();
        control.set_ready(true);
        control.start_input();

        let engine = std::thread::spawn(move || {
            let processed = endpoint.process_period(Duration::from_secs(5), |input, output| {
                for (o, i) in output.iter_mut().zip(input) {
                    *o = i * 2;
                }
            });
            (processed, endpoint)
        });

        let input = i32_bytes(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let mut out = vec![0u8; driver.output_bytes()];
        driver.run_period(Some(&input[..]), Some(&mut out[..]));
        assert_eq!(i32_samples(&out), vec![0; 8]);

        let (processed, _endpoint) = engine.join().unwrap();
        assert!(processed);

        driver.run_period(Some(&input[..]), Some(&mut out[..]));
        assert_eq!(i32_samples(&out), vec![2, 4, 6, 8, 10, 12, 14, 16]);
    }

    #[test]
    fn test_process_period_times_out() {
        let (_bridge, mut endpoint) = engine_channel(Arc::new(EngineFlags::default()), 8);
        let mut called = false;
        assert!(!endpoint.process_period(Duration::from_millis(1), |_, _| called = true));
        assert!(!called);
        assert_eq!(endpoint.block_len(), 8);
    }

    #[test]
    fn test_stream_keeps_running_while_engine_idle() {
        let rig = rig();
        for _ in 0..3 {
            assert_eq!(rig.period(&[0; 8]).0, Some(Verdict::Continue));
        }
        let native = rig.manager.native_handle(&rig.stream).unwrap();
        assert!(rig.manager.host().is_active(native).unwrap());
        assert_eq!(rig.driver.periods(), 3);
    }
}
