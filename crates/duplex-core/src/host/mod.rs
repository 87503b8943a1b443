//! Native audio layers
//!
//! Two hosts implement [`AudioHost`]:
//! - **CpalHost**: real devices on every platform CPAL supports (ALSA, JACK
//!   with the `jack` feature, CoreAudio, WASAPI, ...)
//! - **VirtualHost**: an in-process host driven period by period, used for
//!   tests and headless runs
//!
//! # Example Usage
//!
//! ```ignore
//! use duplex_core::host::{CpalHost, DeviceCatalog};
//!
//! let host = CpalHost::new();
//! for device in host.devices() {
//!     println!("{}: {} in / {} out", device.name, device.max_input_channels, device.max_output_channels);
//! }
//! ```

mod backend;
mod catalog;
mod cpal_device;
mod cpal_host;
mod virtual_host;

pub use backend::{AudioHost, NativeCallback, NativeFinished, NativeHandle, NativeStreamInfo, PeriodIo};
pub use catalog::{DeviceCatalog, DeviceInfo, HostApiInfo};
pub use cpal_host::CpalHost;
pub use virtual_host::{VirtualDriver, VirtualHost, VIRTUAL_MAX_FRAMES, VIRTUAL_SAMPLE_RATES};
