//! Standard locations for duplex configuration files

use std::path::PathBuf;

/// File name of the bridge settings
pub const DEFAULT_CONFIG_FILE: &str = "bridge.yaml";

/// Directory holding duplex configuration
///
/// Returns: `<config dir>/duplex`, e.g. `~/.config/duplex` on Linux
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("duplex")
}

/// Full path of a configuration file inside [`default_config_dir`]
pub fn default_config_path(filename: &str) -> PathBuf {
    default_config_dir().join(filename)
}
