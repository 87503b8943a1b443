//! Latest-value sample hand-off between the hardware thread and a consumer
//!
//! A [`SampleRingBuffer`] carries one block of interleaved samples from a
//! single writer to a single reader. It is not a queue: every write replaces
//! the previous block, and a read always yields the most recently published
//! block in full.
//!
//! ```text
//!   RingProducer                                   RingConsumer
//!  ┌────────────┐   publish (swap)   ┌────────┐   acquire (swap)  ┌────────────┐
//!  │ back slot  │───────────────────►│ middle │──────────────────►│ front slot │
//!  └────────────┘                    └────────┘                   └────────────┘
//!        ▲ write() fills                                read_if_ready() copies ▼
//! ```
//!
//! Three equally sized slots rotate through an atomic index word, so the
//! writer never waits for the reader and the reader never sees a block that
//! is half old and half new. The `ready` flag is a separate atomic boolean:
//! it is raised by every publish and only lowered explicitly, which gives the
//! output side its hold-last-value behaviour.
//!
//! Slots are allocated once in [`SampleRingBuffer::new`]. The write and read
//! paths never allocate.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use crate::error::{BridgeError, BridgeResult, ParameterKind};

const INDEX_MASK: u8 = 0b011;
const FRESH: u8 = 0b100;

struct RingShared<T> {
    slots: [UnsafeCell<Box<[T]>>; 3],
    /// Index of the middle slot, plus the FRESH bit when it holds an unread block
    middle: AtomicU8,
    ready: AtomicBool,
}

// SAFETY: each slot is accessed by at most one half at a time. The producer
// only touches `slots[back]`, the consumer only touches `slots[front]`, and
// ownership of the middle slot moves between them through the AcqRel swap on
// `middle`. Resizing requires `&mut` on both halves.
unsafe impl<T: Send> Sync for RingShared<T> {}

impl<T: Copy + Default> RingShared<T> {
    fn with_len(len: usize) -> Self {
        let slot = || UnsafeCell::new(vec![T::default(); len].into_boxed_slice());
        Self {
            slots: [slot(), slot(), slot()],
            middle: AtomicU8::new(1),
            ready: AtomicBool::new(false),
        }
    }
}

/// Constructor namespace for the producer/consumer pair
pub struct SampleRingBuffer;

impl SampleRingBuffer {
    /// Create a hand-off holding `len` samples per block
    #[allow(clippy::new_ret_no_self)]
    pub fn new<T: Copy + Default + Send>(len: usize) -> (RingProducer<T>, RingConsumer<T>) {
        let shared = Arc::new(RingShared::with_len(len));
        (
            RingProducer {
                shared: Arc::clone(&shared),
                back: 0,
                len,
            },
            RingConsumer {
                shared,
                front: 2,
                len,
            },
        )
    }

    /// Reallocate both halves to `len` samples
    ///
    /// Holding `&mut` to both halves proves neither side is in use, so this is
    /// only reachable while the owning stream is stopped. Contents are
    /// silenced and the ready flag is cleared.
    pub fn resize<T: Copy + Default + Send>(
        producer: &mut RingProducer<T>,
        consumer: &mut RingConsumer<T>,
        len: usize,
    ) -> BridgeResult<()> {
        if !Arc::ptr_eq(&producer.shared, &consumer.shared) {
            return Err(BridgeError::invalid(
                ParameterKind::BufferSize,
                "producer and consumer belong to different ring buffers",
            ));
        }
        for slot in &producer.shared.slots {
            // SAFETY: both halves are exclusively borrowed and no other
            // handle to the shared slots exists.
            unsafe {
                *slot.get() = vec![T::default(); len].into_boxed_slice();
            }
        }
        producer.shared.middle.store(1, Ordering::Release);
        producer.shared.ready.store(false, Ordering::Release);
        producer.back = 0;
        producer.len = len;
        consumer.front = 2;
        consumer.len = len;
        Ok(())
    }
}

/// Writing half of a [`SampleRingBuffer`]
pub struct RingProducer<T> {
    shared: Arc<RingShared<T>>,
    back: u8,
    len: usize,
}

impl<T: Copy + Default> RingProducer<T> {
    /// Samples per block
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Replace the block with `samples`
    ///
    /// Samples beyond the block length are dropped; a short write is padded
    /// with silence. Returns the number of samples copied.
    pub fn write(&mut self, samples: &[T]) -> usize {
        self.write_with(|block| {
            let n = samples.len().min(block.len());
            block[..n].copy_from_slice(&samples[..n]);
            block[n..].fill(T::default());
            n
        })
    }

    /// Fill the block in place, then publish it
    pub fn write_with<R>(&mut self, fill: impl FnOnce(&mut [T]) -> R) -> R {
        // SAFETY: the back slot is owned by the producer until it is swapped
        // into the middle below.
        let block = unsafe { &mut *self.shared.slots[self.back as usize].get() };
        let result = fill(block);
        let previous = self.shared.middle.swap(self.back | FRESH, Ordering::AcqRel);
        self.back = previous & INDEX_MASK;
        self.shared.ready.store(true, Ordering::Release);
        result
    }

    /// Lower the ready flag until the next write
    #[inline]
    pub fn clear_ready(&self) {
        self.shared.ready.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::Acquire)
    }
}

/// Reading half of a [`SampleRingBuffer`]
pub struct RingConsumer<T> {
    shared: Arc<RingShared<T>>,
    front: u8,
    len: usize,
}

impl<T: Copy + Default> RingConsumer<T> {
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::Acquire)
    }

    /// Copy the latest block into `out` if the buffer is ready
    ///
    /// The ready flag is left raised: reading again without a new write
    /// yields the same block. `out` is left untouched when not ready.
    pub fn read_if_ready(&mut self, out: &mut [T]) -> bool {
        self.peek_if_ready(|block| {
            let n = out.len().min(block.len());
            out[..n].copy_from_slice(&block[..n]);
        })
        .is_some()
    }

    /// Borrow the latest block in place if the buffer is ready
    pub fn peek_if_ready<R>(&mut self, read: impl FnOnce(&[T]) -> R) -> Option<R> {
        if !self.is_ready() {
            return None;
        }
        if self.shared.middle.load(Ordering::Acquire) & FRESH != 0 {
            let previous = self.shared.middle.swap(self.front, Ordering::AcqRel);
            self.front = previous & INDEX_MASK;
        }
        // SAFETY: the front slot is owned by the consumer until it is swapped
        // back into the middle.
        let block = unsafe { &*self.shared.slots[self.front as usize].get() };
        Some(read(block))
    }
}
