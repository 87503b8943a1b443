//! Device enumeration across every available CPAL host
//!
//! Devices from all hosts (ALSA, JACK, PulseAudio, CoreAudio, WASAPI, ...)
//! are flattened into one indexed table. Input and output capabilities of the
//! same physical device share one entry.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{HostId, SupportedBufferSize, SupportedStreamConfigRange};

use super::catalog::{DeviceInfo, HostApiInfo};
use crate::types::SampleFormat;

/// Latencies reported when a host does not expose its buffer size range
const FALLBACK_LOW_LATENCY: f64 = 0.01;
const FALLBACK_HIGH_LATENCY: f64 = 0.1;

/// Get a human-readable name for a host ID
pub(crate) fn host_name(host_id: HostId) -> String {
    let name = format!("{:?}", host_id);
    match name.as_str() {
        "Alsa" => "ALSA".to_string(),
        "Jack" => "JACK".to_string(),
        "Wasapi" => "WASAPI".to_string(),
        "Asio" => "ASIO".to_string(),
        _ => name,
    }
}

/// Map a bridge sample format to CPAL's, if CPAL can stream it
pub(crate) fn cpal_format(format: SampleFormat) -> Option<cpal::SampleFormat> {
    match format {
        SampleFormat::Float32 => Some(cpal::SampleFormat::F32),
        SampleFormat::Int32 => Some(cpal::SampleFormat::I32),
        SampleFormat::Int16 => Some(cpal::SampleFormat::I16),
        SampleFormat::Int8 => Some(cpal::SampleFormat::I8),
        SampleFormat::UInt8 => Some(cpal::SampleFormat::U8),
        // Packed 24-bit has no CPAL sample type
        SampleFormat::Int24 => None,
    }
}

/// One enumerated device with the configuration ranges it supports
pub(crate) struct CpalDeviceEntry {
    pub device: cpal::Device,
    pub info: DeviceInfo,
    pub input_configs: Vec<SupportedStreamConfigRange>,
    pub output_configs: Vec<SupportedStreamConfigRange>,
}

impl CpalDeviceEntry {
    /// Whether some range carries `channels` of `format` at `sample_rate`
    pub fn supports(
        &self,
        input: bool,
        channels: u16,
        format: cpal::SampleFormat,
        sample_rate: u32,
    ) -> bool {
        let configs = if input {
            &self.input_configs
        } else {
            &self.output_configs
        };
        configs.iter().any(|c| {
            c.channels() >= channels
                && c.sample_format() == format
                && sample_rate >= c.min_sample_rate().0
                && sample_rate <= c.max_sample_rate().0
        })
    }
}

/// Result of a full enumeration pass
pub(crate) struct Enumeration {
    pub host_apis: Vec<HostApiInfo>,
    pub devices: Vec<CpalDeviceEntry>,
}

fn latency_range(buffer: &SupportedBufferSize, sample_rate: u32) -> (f64, f64) {
    match buffer {
        SupportedBufferSize::Range { min, max } if sample_rate > 0 => (
            *min as f64 / sample_rate as f64,
            *max as f64 / sample_rate as f64,
        ),
        _ => (FALLBACK_LOW_LATENCY, FALLBACK_HIGH_LATENCY),
    }
}

/// Enumerate devices from all available hosts
pub(crate) fn enumerate() -> Enumeration {
    let mut host_apis = Vec::new();
    let mut devices: Vec<CpalDeviceEntry> = Vec::new();

    for host_id in cpal::available_hosts() {
        let host = match cpal::host_from_id(host_id) {
            Ok(h) => h,
            Err(e) => {
                log::debug!("Could not initialize host {:?}: {}", host_id, e);
                continue;
            }
        };

        let api_index = host_apis.len();
        let first_device = devices.len();
        let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
        let default_output_name = host.default_output_device().and_then(|d| d.name().ok());
        let mut default_input_device = None;
        let mut default_output_device = None;

        let devices_iter = match host.devices() {
            Ok(d) => d,
            Err(e) => {
                log::debug!("Could not enumerate devices for {:?}: {}", host_id, e);
                continue;
            }
        };

        for device in devices_iter {
            let name = match device.name() {
                Ok(n) => n,
                Err(_) => continue,
            };

            let input_configs: Vec<_> = device
                .supported_input_configs()
                .map(|c| c.collect())
                .unwrap_or_default();
            let output_configs: Vec<_> = device
                .supported_output_configs()
                .map(|c| c.collect())
                .unwrap_or_default();
            if input_configs.is_empty() && output_configs.is_empty() {
                continue;
            }

            let max_input_channels = input_configs.iter().map(|c| c.channels()).max().unwrap_or(0);
            let max_output_channels = output_configs.iter().map(|c| c.channels()).max().unwrap_or(0);

            let default_input = device.default_input_config().ok();
            let default_output = device.default_output_config().ok();
            let default_sample_rate = default_output
                .as_ref()
                .or(default_input.as_ref())
                .map_or(0.0, |c| c.sample_rate().0 as f64);
            let (low_in, high_in) = default_input
                .as_ref()
                .map_or((0.0, 0.0), |c| latency_range(c.buffer_size(), c.sample_rate().0));
            let (low_out, high_out) = default_output
                .as_ref()
                .map_or((0.0, 0.0), |c| latency_range(c.buffer_size(), c.sample_rate().0));

            let index = devices.len();
            if max_input_channels > 0 && default_input_name.as_ref() == Some(&name) {
                default_input_device = Some(index);
            }
            if max_output_channels > 0 && default_output_name.as_ref() == Some(&name) {
                default_output_device = Some(index);
            }

            devices.push(CpalDeviceEntry {
                device,
                info: DeviceInfo {
                    index,
                    name,
                    host_api: api_index,
                    max_input_channels,
                    max_output_channels,
                    default_low_input_latency: low_in,
                    default_low_output_latency: low_out,
                    default_high_input_latency: high_in,
                    default_high_output_latency: high_out,
                    default_sample_rate,
                },
                input_configs,
                output_configs,
            });
        }

        host_apis.push(HostApiInfo {
            index: api_index,
            name: host_name(host_id),
            device_count: devices.len() - first_device,
            default_input_device,
            default_output_device,
        });
    }

    log::info!(
        "Enumerated {} audio devices across {} hosts",
        devices.len(),
        host_apis.len()
    );

    Enumeration { host_apis, devices }
}
