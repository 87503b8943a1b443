//! Bridge error types
//!
//! Every control-thread operation returns [`BridgeResult`]. Native audio
//! layers that speak numeric status codes are translated through
//! [`BridgeError::from_native_code`]; non-negative codes are successes.

use std::fmt;

use thiserror::Error;

/// Which stream parameter a native layer rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    ChannelCount,
    SampleRate,
    Device,
    Flag,
    SampleFormat,
    DeviceCombination,
    BufferSize,
    HostApiSpecificInfo,
    HostApi,
}

impl fmt::Display for ParameterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParameterKind::ChannelCount => "channel count",
            ParameterKind::SampleRate => "sample rate",
            ParameterKind::Device => "device",
            ParameterKind::Flag => "stream flag",
            ParameterKind::SampleFormat => "sample format",
            ParameterKind::DeviceCombination => "input/output device combination",
            ParameterKind::BufferSize => "buffer size",
            ParameterKind::HostApiSpecificInfo => "host API specific stream info",
            ParameterKind::HostApi => "host API",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while opening, running or tearing down a stream
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    /// A stream parameter was refused locally or by the native layer
    #[error("Invalid {parameter}: {detail}")]
    InvalidParameter {
        parameter: ParameterKind,
        detail: String,
    },

    /// The device went away or cannot be opened right now
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Host-specific failure with the host's own description
    #[error("Host API error {code}: {text}")]
    HostApiError { code: i32, text: String },

    /// The stream was never opened or has already been closed
    #[error("Stream not found")]
    StreamNotFound,

    /// The stream is open but its callback context is missing
    #[error("Stream callback context not found")]
    ContextNotFound,

    /// The processing callback cannot be used
    #[error("Invalid callback: {0}")]
    InvalidCallback(String),

    /// The callback produced more output than the hardware period holds
    #[error("Buffer overrun: produced {produced} bytes, capacity {capacity} bytes")]
    BufferOverrun { produced: usize, capacity: usize },

    /// Native status code outside the known table
    #[error("Undefined native error code {0}")]
    UndefinedNativeError(i32),

    /// Operation requires a running stream
    #[error("Stream is stopped")]
    StreamIsStopped,

    /// Operation requires a stopped stream
    #[error("Stream is not stopped")]
    StreamIsNotStopped,

    /// Operation is not valid in the current lifecycle state
    #[error("Cannot {operation} a stream in state {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    /// The native layer has not been initialised
    #[error("Audio host not initialized")]
    NotInitialized,

    #[error("Insufficient memory")]
    InsufficientMemory,

    #[error("Native operation timed out")]
    TimedOut,
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

impl BridgeError {
    pub fn invalid(parameter: ParameterKind, detail: impl Into<String>) -> Self {
        BridgeError::InvalidParameter {
            parameter,
            detail: detail.into(),
        }
    }

    /// Translate a numeric native status code
    ///
    /// Returns `Ok(code)` for non-negative codes (successes and counts).
    /// `host_text` carries the host's own description for host-specific
    /// failures.
    pub fn from_native_code(code: i32, host_text: Option<&str>) -> BridgeResult<i32> {
        if code >= 0 {
            return Ok(code);
        }
        let Some(native) = NativeCode::from_raw(code) else {
            log::error!("Native audio layer returned undefined error code {}", code);
            return Err(BridgeError::UndefinedNativeError(code));
        };
        Err(native.into_error(host_text))
    }
}

/// Numeric status codes of a PortAudio-style native layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum NativeCode {
    NotInitialized = -10000,
    UnanticipatedHostError = -9999,
    InvalidChannelCount = -9998,
    InvalidSampleRate = -9997,
    InvalidDevice = -9996,
    InvalidFlag = -9995,
    SampleFormatNotSupported = -9994,
    BadIoDeviceCombination = -9993,
    InsufficientMemory = -9992,
    BufferTooBig = -9991,
    BufferTooSmall = -9990,
    NullCallback = -9989,
    BadStreamPtr = -9988,
    TimedOut = -9987,
    InternalError = -9986,
    DeviceUnavailable = -9985,
    IncompatibleHostApiSpecificStreamInfo = -9984,
    StreamIsStopped = -9983,
    StreamIsNotStopped = -9982,
    InputOverflowed = -9981,
    OutputUnderflowed = -9980,
    HostApiNotFound = -9979,
    InvalidHostApi = -9978,
    CanNotReadFromACallbackStream = -9977,
    CanNotWriteToACallbackStream = -9976,
    CanNotReadFromAnOutputOnlyStream = -9975,
    CanNotWriteToAnInputOnlyStream = -9974,
    IncompatibleStreamHostApi = -9973,
    BadBufferPtr = -9972,
}

impl NativeCode {
    const ALL: [NativeCode; 29] = [
        NativeCode::NotInitialized,
        NativeCode::UnanticipatedHostError,
        NativeCode::InvalidChannelCount,
        NativeCode::InvalidSampleRate,
        NativeCode::InvalidDevice,
        NativeCode::InvalidFlag,
        NativeCode::SampleFormatNotSupported,
        NativeCode::BadIoDeviceCombination,
        NativeCode::InsufficientMemory,
        NativeCode::BufferTooBig,
        NativeCode::BufferTooSmall,
        NativeCode::NullCallback,
        NativeCode::BadStreamPtr,
        NativeCode::TimedOut,
        NativeCode::InternalError,
        NativeCode::DeviceUnavailable,
        NativeCode::IncompatibleHostApiSpecificStreamInfo,
        NativeCode::StreamIsStopped,
        NativeCode::StreamIsNotStopped,
        NativeCode::InputOverflowed,
        NativeCode::OutputUnderflowed,
        NativeCode::HostApiNotFound,
        NativeCode::InvalidHostApi,
        NativeCode::CanNotReadFromACallbackStream,
        NativeCode::CanNotWriteToACallbackStream,
        NativeCode::CanNotReadFromAnOutputOnlyStream,
        NativeCode::CanNotWriteToAnInputOnlyStream,
        NativeCode::IncompatibleStreamHostApi,
        NativeCode::BadBufferPtr,
    ];

    pub fn from_raw(code: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| *c as i32 == code)
    }

    pub fn raw(self) -> i32 {
        self as i32
    }

    /// Fixed description of the code, as a native layer would report it
    pub fn text(self) -> &'static str {
        match self {
            NativeCode::NotInitialized => "Not initialized",
            NativeCode::UnanticipatedHostError => "Unanticipated host error",
            NativeCode::InvalidChannelCount => "Invalid number of channels",
            NativeCode::InvalidSampleRate => "Invalid sample rate",
            NativeCode::InvalidDevice => "Invalid device",
            NativeCode::InvalidFlag => "Invalid flag",
            NativeCode::SampleFormatNotSupported => "Sample format not supported",
            NativeCode::BadIoDeviceCombination => "Illegal combination of I/O devices",
            NativeCode::InsufficientMemory => "Insufficient memory",
            NativeCode::BufferTooBig => "Buffer too big",
            NativeCode::BufferTooSmall => "Buffer too small",
            NativeCode::NullCallback => "No callback routine specified",
            NativeCode::BadStreamPtr => "Invalid stream pointer",
            NativeCode::TimedOut => "Wait timed out",
            NativeCode::InternalError => "Internal error",
            NativeCode::DeviceUnavailable => "Device unavailable",
            NativeCode::IncompatibleHostApiSpecificStreamInfo => {
                "Incompatible host API specific stream info"
            }
            NativeCode::StreamIsStopped => "Stream is stopped",
            NativeCode::StreamIsNotStopped => "Stream is not stopped",
            NativeCode::InputOverflowed => "Input overflowed",
            NativeCode::OutputUnderflowed => "Output underflowed",
            NativeCode::HostApiNotFound => "Host API not found",
            NativeCode::InvalidHostApi => "Invalid host API",
            NativeCode::CanNotReadFromACallbackStream => "Can't read from a callback stream",
            NativeCode::CanNotWriteToACallbackStream => "Can't write to a callback stream",
            NativeCode::CanNotReadFromAnOutputOnlyStream => {
                "Can't read from an output only stream"
            }
            NativeCode::CanNotWriteToAnInputOnlyStream => "Can't write to an input only stream",
            NativeCode::IncompatibleStreamHostApi => {
                "Incompatible stream host API for this operation"
            }
            NativeCode::BadBufferPtr => "Bad buffer pointer",
        }
    }

    pub(crate) fn into_error(self, host_text: Option<&str>) -> BridgeError {
        let detail = || host_text.unwrap_or(self.text()).to_string();
        match self {
            NativeCode::InvalidChannelCount => BridgeError::invalid(ParameterKind::ChannelCount, detail()),
            NativeCode::InvalidSampleRate => BridgeError::invalid(ParameterKind::SampleRate, detail()),
            NativeCode::InvalidDevice => BridgeError::invalid(ParameterKind::Device, detail()),
            NativeCode::InvalidFlag => BridgeError::invalid(ParameterKind::Flag, detail()),
            NativeCode::SampleFormatNotSupported => {
                BridgeError::invalid(ParameterKind::SampleFormat, detail())
            }
            NativeCode::BadIoDeviceCombination => {
                BridgeError::invalid(ParameterKind::DeviceCombination, detail())
            }
            NativeCode::BufferTooBig | NativeCode::BufferTooSmall => {
                BridgeError::invalid(ParameterKind::BufferSize, detail())
            }
            NativeCode::IncompatibleHostApiSpecificStreamInfo => {
                BridgeError::invalid(ParameterKind::HostApiSpecificInfo, detail())
            }
            NativeCode::HostApiNotFound | NativeCode::InvalidHostApi => {
                BridgeError::invalid(ParameterKind::HostApi, detail())
            }
            NativeCode::DeviceUnavailable => BridgeError::DeviceUnavailable(detail()),
            NativeCode::NullCallback => BridgeError::InvalidCallback(detail()),
            NativeCode::BadStreamPtr => BridgeError::StreamNotFound,
            NativeCode::StreamIsStopped => BridgeError::StreamIsStopped,
            NativeCode::StreamIsNotStopped => BridgeError::StreamIsNotStopped,
            NativeCode::NotInitialized => BridgeError::NotInitialized,
            NativeCode::InsufficientMemory => BridgeError::InsufficientMemory,
            NativeCode::TimedOut => BridgeError::TimedOut,
            other => BridgeError::HostApiError {
                code: other.raw(),
                text: detail(),
            },
        }
    }
}
