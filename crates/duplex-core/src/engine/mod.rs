//! Bridge between the hardware thread and an internal mixing engine
//!
//! The engine runs on its own thread and exchanges fixed-size `Int32` blocks
//! with the hardware callback through two [`SampleRingBuffer`]s. The
//! hardware side signals each period without waiting; the engine side waits
//! for that signal, reads the latest input and publishes its output for the
//! next period.
//!
//! # Example Usage
//!
//! ```ignore
//! let (mut engine, mut endpoint) = EngineStream::open(&mut manager, &config)?;
//! std::thread::spawn(move || loop {
//!     endpoint.process_period(Duration::from_millis(100), |input, output| {
//!         output.copy_from_slice(input);
//!     });
//! });
//! engine.control().set_ready(true);
//! engine.start(&mut manager)?;
//! ```
//!
//! [`SampleRingBuffer`]: crate::ring::SampleRingBuffer

mod bridge;
mod flags;
mod stream;

pub use bridge::{engine_channel, EngineBridge, EngineEndpoint};
pub use flags::{EngineControl, EngineFlags};
pub use stream::{main_stream_config, ring_len, EngineStream};
