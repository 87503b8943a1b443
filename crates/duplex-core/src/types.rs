//! Core stream types shared by the bridge, the hosts and the engine side

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult, ParameterKind};

/// Largest period any stream may request, in frames
pub const MAX_FRAMES_PER_BUFFER: u32 = 1 << 16;

/// Identity of an opened stream inside the context registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u64);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream#{}", self.0)
    }
}

/// Interleaved sample encoding of one stream direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SampleFormat {
    #[default]
    Float32,
    Int32,
    /// Packed little-endian 24-bit
    Int24,
    Int16,
    Int8,
    UInt8,
}

impl SampleFormat {
    /// Size of one sample in bytes
    #[inline]
    pub const fn sample_size(self) -> usize {
        match self {
            SampleFormat::Float32 | SampleFormat::Int32 => 4,
            SampleFormat::Int24 => 3,
            SampleFormat::Int16 => 2,
            SampleFormat::Int8 | SampleFormat::UInt8 => 1,
        }
    }

    /// Byte value that encodes silence when repeated
    #[inline]
    pub const fn silence_byte(self) -> u8 {
        match self {
            SampleFormat::UInt8 => 0x80,
            _ => 0,
        }
    }

    pub const ALL: [SampleFormat; 6] = [
        SampleFormat::Float32,
        SampleFormat::Int32,
        SampleFormat::Int24,
        SampleFormat::Int16,
        SampleFormat::Int8,
        SampleFormat::UInt8,
    ];
}

/// Parameters of one stream direction (input or output)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamParameters {
    /// Index into the host's device catalog
    pub device: usize,
    pub channel_count: u16,
    pub sample_format: SampleFormat,
    /// Desired latency in seconds
    pub suggested_latency: f64,
}

impl StreamParameters {
    pub fn new(device: usize, channel_count: u16, sample_format: SampleFormat) -> Self {
        Self {
            device,
            channel_count,
            sample_format,
            suggested_latency: 0.0,
        }
    }

    pub fn with_suggested_latency(mut self, seconds: f64) -> Self {
        self.suggested_latency = seconds;
        self
    }

    /// Bytes occupied by one interleaved frame
    #[inline]
    pub fn frame_bytes(&self) -> usize {
        self.channel_count as usize * self.sample_format.sample_size()
    }
}

macro_rules! flag_set {
    ($(#[$meta:meta])* $name:ident { $($(#[$fmeta:meta])* $flag:ident = $bit:expr,)* }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name(u32);

        impl $name {
            $($(#[$fmeta])* pub const $flag: $name = $name($bit);)*

            pub const fn empty() -> Self {
                $name(0)
            }

            pub const fn from_bits(bits: u32) -> Self {
                $name(bits)
            }

            pub const fn bits(self) -> u32 {
                self.0
            }

            pub const fn contains(self, other: $name) -> bool {
                self.0 & other.0 == other.0
            }

            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            pub fn insert(&mut self, other: $name) {
                self.0 |= other.0;
            }
        }

        impl std::ops::BitOr for $name {
            type Output = $name;

            fn bitor(self, rhs: $name) -> $name {
                $name(self.0 | rhs.0)
            }
        }
    };
}

flag_set! {
    /// Per-period status markers reported by the host
    StatusFlags {
        INPUT_UNDERFLOW = 0x01,
        INPUT_OVERFLOW = 0x02,
        OUTPUT_UNDERFLOW = 0x04,
        OUTPUT_OVERFLOW = 0x08,
        PRIMING_OUTPUT = 0x10,
    }
}

flag_set! {
    /// Options passed to the native layer when opening a stream
    StreamFlags {
        CLIP_OFF = 0x01,
        DITHER_OFF = 0x02,
        NEVER_DROP_INPUT = 0x04,
        PRIME_OUTPUT_BUFFERS_USING_STREAM_CALLBACK = 0x08,
    }
}

/// Host clock timestamps for one period, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TimeInfo {
    pub input_buffer_adc_time: f64,
    pub current_time: f64,
    pub output_buffer_dac_time: f64,
}

/// Verdict a processing callback hands back to the native layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum Verdict {
    /// Keep calling
    #[default]
    Continue = 0,
    /// Play out the current buffer, then stop
    Complete = 1,
    /// Stop immediately, discarding pending output
    Abort = 2,
}

impl Verdict {
    /// Validate a raw integer verdict
    pub fn from_raw(raw: i64) -> Option<Self> {
        match raw {
            0 => Some(Verdict::Continue),
            1 => Some(Verdict::Complete),
            2 => Some(Verdict::Abort),
            _ => None,
        }
    }

    #[inline]
    pub fn is_continue(self) -> bool {
        self == Verdict::Continue
    }
}

/// Full description of a stream to open
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    pub input: Option<StreamParameters>,
    pub output: Option<StreamParameters>,
    pub sample_rate: f64,
    pub frames_per_buffer: u32,
    pub flags: StreamFlags,
}

impl StreamConfig {
    pub fn new(
        input: Option<StreamParameters>,
        output: Option<StreamParameters>,
        sample_rate: f64,
        frames_per_buffer: u32,
    ) -> Self {
        Self {
            input,
            output,
            sample_rate,
            frames_per_buffer,
            flags: StreamFlags::empty(),
        }
    }

    pub fn with_flags(mut self, flags: StreamFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn input_channels(&self) -> u16 {
        self.input.map_or(0, |p| p.channel_count)
    }

    pub fn output_channels(&self) -> u16 {
        self.output.map_or(0, |p| p.channel_count)
    }

    /// Period length in seconds
    pub fn period_seconds(&self) -> f64 {
        self.frames_per_buffer as f64 / self.sample_rate
    }

    /// Checks that do not need the native layer
    pub fn validate(&self) -> BridgeResult<()> {
        if self.input.is_none() && self.output.is_none() {
            return Err(BridgeError::invalid(
                ParameterKind::ChannelCount,
                "stream needs at least one direction",
            ));
        }
        for (direction, params) in [("input", &self.input), ("output", &self.output)] {
            if let Some(p) = params {
                if p.channel_count == 0 {
                    return Err(BridgeError::invalid(
                        ParameterKind::ChannelCount,
                        format!("{} channel count must be positive", direction),
                    ));
                }
                if p.suggested_latency < 0.0 || !p.suggested_latency.is_finite() {
                    return Err(BridgeError::invalid(
                        ParameterKind::HostApiSpecificInfo,
                        format!("{} latency {} is not usable", direction, p.suggested_latency),
                    ));
                }
            }
        }
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(BridgeError::invalid(
                ParameterKind::SampleRate,
                format!("{} Hz", self.sample_rate),
            ));
        }
        if self.frames_per_buffer == 0 {
            return Err(BridgeError::invalid(
                ParameterKind::BufferSize,
                "frames per buffer must be positive",
            ));
        }
        if self.frames_per_buffer > MAX_FRAMES_PER_BUFFER {
            return Err(BridgeError::invalid(
                ParameterKind::BufferSize,
                format!(
                    "{} frames per buffer exceeds {}",
                    self.frames_per_buffer, MAX_FRAMES_PER_BUFFER
                ),
            ));
        }
        Ok(())
    }
}
