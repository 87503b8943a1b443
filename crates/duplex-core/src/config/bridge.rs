//! Bridge settings
//!
//! Device selection, rate and block size of the engine's main stream.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::io::{load_config, save_config};
use crate::stream::DEFAULT_DIAGNOSTICS_CAPACITY;
use crate::types::SampleFormat;

/// Sample rate used when none (or a non-positive one) is configured
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Block size used when none is configured (frames)
pub const DEFAULT_SAMPLES_PER_BLOCK: u32 = 512;

/// Sample rates offered to the user, ascending
pub const STANDARD_SAMPLE_RATES: [u32; 13] = [
    8000, 9600, 11025, 12000, 16000, 22050, 24000, 32000, 44100, 48000, 88200, 96000, 192000,
];

/// Block sizes offered to the user, ascending (frames)
pub const STANDARD_SAMPLES_PER_BLOCK: [u32; 13] = [
    32, 48, 64, 96, 128, 192, 256, 384, 512, 768, 1024, 1536, 2048,
];

/// Nearest entry of an ascending table; ties go to the larger entry
fn nearest(table: &[u32], value: f64) -> u32 {
    let mut best = table[0];
    for &candidate in table {
        if (candidate as f64 - value).abs() <= (best as f64 - value).abs() {
            best = candidate;
        }
    }
    best
}

/// Snap a sample rate to [`STANDARD_SAMPLE_RATES`]
///
/// Non-positive or non-finite rates fall back to [`DEFAULT_SAMPLE_RATE`].
pub fn snap_sample_rate(rate: f64) -> u32 {
    if !(rate.is_finite() && rate > 0.0) {
        log::warn!(
            "Invalid sample rate {}, defaulting to {}",
            rate,
            DEFAULT_SAMPLE_RATE
        );
        return DEFAULT_SAMPLE_RATE;
    }
    nearest(&STANDARD_SAMPLE_RATES, rate)
}

/// Snap a block size to [`STANDARD_SAMPLES_PER_BLOCK`]
pub fn snap_samples_per_block(frames: u32) -> u32 {
    nearest(&STANDARD_SAMPLES_PER_BLOCK, frames as f64)
}

fn default_sample_rate() -> f64 {
    DEFAULT_SAMPLE_RATE as f64
}

fn default_samples_per_block() -> u32 {
    DEFAULT_SAMPLES_PER_BLOCK
}

fn default_sample_format() -> SampleFormat {
    SampleFormat::Int32
}

fn default_diagnostics_capacity() -> usize {
    DEFAULT_DIAGNOSTICS_CAPACITY
}

/// Settings of the engine's main stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Host API name (e.g. "ALSA", "JACK"); None = first host with the device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_api: Option<String>,

    /// Device name as reported by the host; None = host default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,

    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,

    /// Frames per period
    #[serde(default = "default_samples_per_block")]
    pub samples_per_block: u32,

    #[serde(default = "default_sample_format")]
    pub sample_format: SampleFormat,

    /// Input channels; None = the device maximum
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_channels: Option<u16>,

    /// Output channels; None = the device maximum
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_channels: Option<u16>,

    /// Requested latency in seconds; None = the device's low latency
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_latency: Option<f64>,

    #[serde(default = "default_diagnostics_capacity")]
    pub diagnostics_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host_api: None,
            device: None,
            sample_rate: default_sample_rate(),
            samples_per_block: DEFAULT_SAMPLES_PER_BLOCK,
            sample_format: default_sample_format(),
            input_channels: None,
            output_channels: None,
            suggested_latency: None,
            diagnostics_capacity: DEFAULT_DIAGNOSTICS_CAPACITY,
        }
    }
}

impl BridgeConfig {
    /// Load from YAML and snap rate and block size to the standard tables
    pub fn load(path: &Path) -> Self {
        load_config::<Self>(path).normalized()
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        save_config(self, path)
    }

    pub fn with_host_api(mut self, host_api: impl Into<String>) -> Self {
        self.host_api = Some(host_api.into());
        self
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_samples_per_block(mut self, frames: u32) -> Self {
        self.samples_per_block = frames;
        self
    }

    pub fn with_sample_format(mut self, format: SampleFormat) -> Self {
        self.sample_format = format;
        self
    }

    pub fn with_channels(mut self, input: Option<u16>, output: Option<u16>) -> Self {
        self.input_channels = input;
        self.output_channels = output;
        self
    }

    pub fn with_suggested_latency(mut self, seconds: f64) -> Self {
        self.suggested_latency = Some(seconds);
        self
    }

    pub fn with_diagnostics_capacity(mut self, capacity: usize) -> Self {
        self.diagnostics_capacity = capacity;
        self
    }

    /// Copy with rate and block size snapped to the standard tables
    pub fn normalized(&self) -> Self {
        let mut config = self.clone();
        config.sample_rate = snap_sample_rate(self.sample_rate) as f64;
        config.samples_per_block = snap_samples_per_block(self.samples_per_block);
        config.diagnostics_capacity = self.diagnostics_capacity.max(1);
        config
    }
}
