//! Device catalog records
//!
//! Hosts expose their devices as a flat, indexed list. A device index is what
//! [`StreamParameters::device`](crate::types::StreamParameters) refers to.

use crate::error::{BridgeError, BridgeResult, ParameterKind};

/// One host API (ALSA, JACK, CoreAudio, ...)
#[derive(Debug, Clone, PartialEq)]
pub struct HostApiInfo {
    pub index: usize,
    pub name: String,
    pub device_count: usize,
    pub default_input_device: Option<usize>,
    pub default_output_device: Option<usize>,
}

/// Capabilities of one device
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub index: usize,
    pub name: String,
    /// Index of the owning host API
    pub host_api: usize,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
    pub default_low_input_latency: f64,
    pub default_low_output_latency: f64,
    pub default_high_input_latency: f64,
    pub default_high_output_latency: f64,
    pub default_sample_rate: f64,
}

impl DeviceInfo {
    pub fn is_input(&self) -> bool {
        self.max_input_channels > 0
    }

    pub fn is_output(&self) -> bool {
        self.max_output_channels > 0
    }
}

/// Enumeration side of a host
pub trait DeviceCatalog {
    fn host_apis(&self) -> Vec<HostApiInfo>;

    fn devices(&self) -> Vec<DeviceInfo>;

    fn device_info(&self, index: usize) -> Option<DeviceInfo> {
        self.devices().into_iter().find(|d| d.index == index)
    }

    fn default_input_device(&self) -> Option<usize>;

    fn default_output_device(&self) -> Option<usize>;

    /// Host API that owns a device
    fn device_host_api(&self, device: usize) -> BridgeResult<usize> {
        self.device_info(device).map(|d| d.host_api).ok_or_else(|| {
            BridgeError::invalid(ParameterKind::Device, format!("no device with index {}", device))
        })
    }

    /// Index of a host API by its name
    fn host_api_by_name(&self, name: &str) -> Option<usize> {
        self.host_apis()
            .into_iter()
            .find(|api| api.name.eq_ignore_ascii_case(name))
            .map(|api| api.index)
    }

    /// Find a device by name, optionally restricted to one host API
    fn find_device(&self, host_api: Option<&str>, name: &str) -> BridgeResult<DeviceInfo> {
        let api = match host_api {
            Some(api_name) => Some(self.host_api_by_name(api_name).ok_or_else(|| {
                BridgeError::invalid(ParameterKind::HostApi, format!("no host API named {}", api_name))
            })?),
            None => None,
        };
        self.devices()
            .into_iter()
            .find(|d| d.name == name && api.map_or(true, |a| d.host_api == a))
            .ok_or_else(|| {
                BridgeError::invalid(ParameterKind::Device, format!("no device named {}", name))
            })
    }
}
