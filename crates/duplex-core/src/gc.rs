//! RT-safe deferred reclamation for stream contexts
//!
//! Stream contexts and registry snapshots are wrapped in `basedrop::Shared`.
//! When the last reference is dropped on the hardware thread the value is
//! only enqueued; the memory is released here, on a dedicated GC thread.
//!
//! Unlike a process-global collector, a [`GcThread`] is owned by the
//! [`StreamManager`](crate::stream::StreamManager) that created it: it starts
//! in the manager's constructor and is joined when the manager shuts down.
//! The thread keeps no `Handle` of its own. The collector is torn down only
//! once every handle and allocation handed out by `spawn` is gone.
//!
//! ```ignore
//! let (gc, handle) = GcThread::spawn()?;
//! let context = Shared::new(&handle, ContextCell::new(..));
//! drop(context); // queued, freed on "duplex-gc"
//! drop(handle);
//! assert!(gc.shutdown());
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use basedrop::{Collector, Handle};

use crate::error::{BridgeError, BridgeResult};

/// Interval between collection passes
const COLLECT_INTERVAL: Duration = Duration::from_millis(50);

/// How long a stopping thread waits for the last handles and allocations
const CLEANUP_TIMEOUT: Duration = Duration::from_millis(250);

/// Owner of the collector thread
pub struct GcThread {
    running: Arc<AtomicBool>,
    /// Set once the collector was torn down with nothing outstanding
    cleaned: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl GcThread {
    /// Spawn the collector thread and return it with the only `Handle`
    pub fn spawn() -> BridgeResult<(Self, Handle)> {
        let (tx, rx) = mpsc::channel();
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);
        let cleaned = Arc::new(AtomicBool::new(false));
        let thread_cleaned = Arc::clone(&cleaned);

        let join = thread::Builder::new()
            .name("duplex-gc".to_string())
            .spawn(move || {
                // Collector is !Sync, so it is created on the thread that owns it
                let mut collector = Collector::new();
                if tx.send(collector.handle()).is_err() {
                    return;
                }
                log::debug!("GC thread started");

                while thread_running.load(Ordering::Acquire) {
                    collector.collect();
                    thread::park_timeout(COLLECT_INTERVAL);
                }

                if cleanup(collector) {
                    thread_cleaned.store(true, Ordering::Release);
                }
                log::debug!("GC thread stopped");
            })
            .map_err(|e| BridgeError::HostApiError {
                code: 0,
                text: format!("failed to spawn GC thread: {}", e),
            })?;

        let handle = rx.recv().map_err(|_| BridgeError::HostApiError {
            code: 0,
            text: "GC thread exited before handing out its collector".to_string(),
        })?;

        Ok((
            Self {
                running,
                cleaned,
                join: Some(join),
            },
            handle,
        ))
    }

    /// Flag that turns true once the collector has been torn down cleanly
    pub fn cleanup_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cleaned)
    }

    /// Run one collection pass as soon as possible
    pub fn wake(&self) {
        if let Some(join) = &self.join {
            join.thread().unpark();
        }
    }

    /// Stop the collector thread after a final pass
    ///
    /// Returns whether every allocation was reclaimed and the collector
    /// freed. Drop all handles first.
    pub fn shutdown(mut self) -> bool {
        self.stop();
        self.cleaned.load(Ordering::Acquire)
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(join) = self.join.take() {
            join.thread().unpark();
            if join.join().is_err() {
                log::error!("GC thread panicked");
            }
        }
    }
}

impl Drop for GcThread {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Collect until the collector can be freed or [`CLEANUP_TIMEOUT`] passes
///
/// Freeing a `Shared` can queue further drops, so one pass is not enough.
fn cleanup(mut collector: Collector) -> bool {
    let deadline = Instant::now() + CLEANUP_TIMEOUT;
    loop {
        collector.collect();
        match collector.try_cleanup() {
            Ok(()) => return true,
            Err(remaining) if Instant::now() >= deadline => {
                log::warn!(
                    "GC thread exiting with {} handles and {} allocations outstanding",
                    remaining.handle_count(),
                    remaining.alloc_count()
                );
                // Outstanding handles keep the shared state; it is not freed
                drop(remaining);
                return false;
            }
            Err(remaining) => {
                collector = remaining;
                thread::sleep(Duration::from_millis(5));
            }
        }
    }
}
