//! Bridge configuration
//!
//! - Generic YAML config loading/saving
//! - Default config locations
//! - [`BridgeConfig`] with the standard rate and block-size tables
//!
//! # Usage
//!
//! ```ignore
//! use duplex_core::config::{default_config_path, BridgeConfig, DEFAULT_CONFIG_FILE};
//!
//! let path = default_config_path(DEFAULT_CONFIG_FILE);
//! let config = BridgeConfig::load(&path);
//! config.with_samples_per_block(256).save(&path)?;
//! ```

mod bridge;
mod io;
mod paths;

pub use bridge::{
    snap_sample_rate, snap_samples_per_block, BridgeConfig, DEFAULT_SAMPLES_PER_BLOCK,
    DEFAULT_SAMPLE_RATE, STANDARD_SAMPLES_PER_BLOCK, STANDARD_SAMPLE_RATES,
};
pub use io::{load_config, save_config};
pub use paths::{default_config_dir, default_config_path, DEFAULT_CONFIG_FILE};
