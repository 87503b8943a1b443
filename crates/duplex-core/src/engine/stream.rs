//! The engine's main stream, derived from [`BridgeConfig`]

use std::sync::Arc;

use super::bridge::{engine_channel, EngineEndpoint};
use super::flags::{EngineControl, EngineFlags};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult, ParameterKind};
use crate::host::{AudioHost, DeviceCatalog};
use crate::stream::{Stream, StreamManager};
use crate::types::{SampleFormat, StreamConfig, StreamParameters};

/// Output channels used when no device is named
const DEFAULT_OUTPUT_CHANNELS: u16 = 2;

/// Resolve the stream configuration of the main stream
///
/// A named device is looked up (optionally within the named host API) and
/// contributes its maximum channel counts. Without a name the host's default
/// output device is used with stereo output and no input. Explicit channel
/// counts in the config override either choice; zero drops a direction.
pub fn main_stream_config<C>(catalog: &C, config: &BridgeConfig) -> BridgeResult<StreamConfig>
where
    C: DeviceCatalog + ?Sized,
{
    if config.sample_format != SampleFormat::Int32 {
        return Err(BridgeError::invalid(
            ParameterKind::SampleFormat,
            format!("engine streams carry Int32 samples, not {:?}", config.sample_format),
        ));
    }
    let config = config.normalized();

    let (device, input_channels, output_channels) = match config.device.as_deref() {
        Some(name) => {
            let device = catalog.find_device(config.host_api.as_deref(), name)?;
            let (inputs, outputs) = (device.max_input_channels, device.max_output_channels);
            (device, inputs, outputs)
        }
        None => {
            let index = catalog
                .default_output_device()
                .or_else(|| catalog.default_input_device())
                .ok_or_else(|| BridgeError::DeviceUnavailable("no default device".to_string()))?;
            let device = catalog.device_info(index).ok_or_else(|| {
                BridgeError::invalid(ParameterKind::Device, format!("device {} vanished", index))
            })?;
            let outputs = DEFAULT_OUTPUT_CHANNELS.min(device.max_output_channels);
            (device, 0, outputs)
        }
    };

    let input_channels = config.input_channels.unwrap_or(input_channels);
    let output_channels = config.output_channels.unwrap_or(output_channels);

    let direction = |channels: u16, default_latency: f64| {
        (channels > 0).then(|| {
            StreamParameters::new(device.index, channels, SampleFormat::Int32)
                .with_suggested_latency(config.suggested_latency.unwrap_or(default_latency))
        })
    };
    let input = direction(input_channels, device.default_low_input_latency);
    let output = direction(output_channels, device.default_low_output_latency);

    log::info!(
        "Main stream on '{}': {} in / {} out, {} Hz, {} frames",
        device.name,
        input_channels,
        output_channels,
        config.sample_rate,
        config.samples_per_block
    );

    Ok(StreamConfig::new(
        input,
        output,
        config.sample_rate,
        config.samples_per_block,
    ))
}

/// Samples per ring block: one period of the wider direction
pub fn ring_len(config: &StreamConfig) -> usize {
    let channels = config.input_channels().max(config.output_channels()) as usize;
    config.frames_per_buffer as usize * channels
}

/// The opened main stream and its control handle
pub struct EngineStream {
    stream: Stream,
    control: EngineControl,
}

impl EngineStream {
    /// Open the main stream on `manager`; the endpoint goes to the engine thread
    ///
    /// The stream is opened but not started, and the engine is not ready yet.
    /// The config's diagnostics capacity applies to this and later streams
    /// of `manager`.
    pub fn open<H: AudioHost>(
        manager: &mut StreamManager<H>,
        config: &BridgeConfig,
    ) -> BridgeResult<(Self, EngineEndpoint)> {
        let stream_config = main_stream_config(manager.host(), config)?;
        manager.set_diagnostics_capacity(config.normalized().diagnostics_capacity);
        let flags = Arc::new(EngineFlags::default());
        let (bridge, endpoint) = engine_channel(Arc::clone(&flags), ring_len(&stream_config));

        let mut stream = Stream::new(stream_config);
        manager.open(&mut stream, bridge)?;

        Ok((
            Self {
                stream,
                control: EngineControl::new(flags),
            },
            endpoint,
        ))
    }

    pub fn stream(&self) -> &Stream {
        &self.stream
    }

    pub fn control(&self) -> &EngineControl {
        &self.control
    }

    pub fn start<H: AudioHost>(&mut self, manager: &mut StreamManager<H>) -> BridgeResult<()> {
        manager.start(&mut self.stream)
    }

    pub fn stop<H: AudioHost>(&mut self, manager: &mut StreamManager<H>) -> BridgeResult<()> {
        manager.stop(&mut self.stream)
    }

    /// Request exit, stop if still running, then close
    pub fn finish<H: AudioHost>(mut self, manager: &mut StreamManager<H>) -> BridgeResult<()> {
        self.control.request_exit();
        if manager.is_stream_active(&self.stream)? {
            manager.stop(&mut self.stream)?;
        }
        manager.close(&mut self.stream)
    }
}
