//! Configuration management for fpga-bench.
//!
//! Configuration is loaded from multiple sources in priority order:
//! 1. Environment variables (FPGA_BENCH_PLATFORM, etc.)
//! 2. Project-local config file (`./fpga-bench.toml`)
//! 3. User config file (`~/.config/fpga-bench/config.toml`)
//! 4. Built-in defaults
//!
//! # Config File Format
//!
//! ```toml
//! # fpga-bench.toml
//!
//! # Substring used to select the accelerator platform
//! platform = "Intel(R) FPGA"
//!
//! # Data width between the RTL modules and external memory, in bits
//! burst_width_bits = 512
//!
//! # Operating frequency assumed when none is given on the command line (MHz)
//! default_frequency_mhz = 200.0
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Global cached configuration.
static CONFIG: OnceLock<Config> = OnceLock::new();

/// fpga-bench configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Substring matched against platform names when selecting a device.
    pub platform: Option<String>,

    /// Data width between the RTL modules and external memory, in bits.
    /// Determines the alignment stride of the latency experiment.
    pub burst_width_bits: Option<u32>,

    /// Operating frequency assumed when none is given on the command line (MHz).
    pub default_frequency_mhz: Option<f64>,

    /// Clock period of the emulated backend, in nanoseconds per cycle.
    pub emulated_ns_per_cycle: Option<f64>,
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Project-local `fpga-bench.toml`
    /// 3. User config `~/.config/fpga-bench/config.toml`
    /// 4. Defaults
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load user config first (lowest priority of file configs)
        if let Some(user_config) = Self::load_user_config() {
            config.merge(user_config);
        }

        // Load project-local config (higher priority)
        if let Some(local_config) = Self::load_local_config() {
            config.merge(local_config);
        }

        // Environment variables override everything
        config.apply_env_overrides();

        config
    }

    /// Get the cached global configuration.
    ///
    /// Loads configuration on first call and caches it.
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(|| {
            let config = Self::load();
            log::debug!("Loaded configuration: {:?}", config);
            config
        })
    }

    /// Platform selection substring, with fallback to the Intel FPGA SDK name.
    pub fn platform(&self) -> String {
        self.platform
            .clone()
            .unwrap_or_else(|| "Intel(R) FPGA".to_string())
    }

    /// Burst width in bits, with fallback to 512.
    pub fn burst_width_bits(&self) -> u32 {
        self.burst_width_bits.unwrap_or(512)
    }

    /// Alignment stride in elements for a given element size in bytes.
    ///
    /// A 512-bit burst over 32-bit elements gives a stride of 16 elements;
    /// addresses below this granularity are not distinguishable to the RTL.
    pub fn alignment_elems(&self, elem_size: usize) -> usize {
        (self.burst_width_bits() as usize) / (elem_size * 8)
    }

    /// Default operating frequency in MHz, with fallback to 200.0.
    pub fn default_frequency_mhz(&self) -> f64 {
        self.default_frequency_mhz.unwrap_or(200.0)
    }

    /// Emulated clock period in nanoseconds, with fallback to 5.0 (200 MHz).
    pub fn emulated_ns_per_cycle(&self) -> f64 {
        self.emulated_ns_per_cycle.unwrap_or(5.0)
    }

    /// Load user configuration from ~/.config/fpga-bench/config.toml
    fn load_user_config() -> Option<Self> {
        let config_dir = dirs::config_dir()?;
        let config_path = config_dir.join("fpga-bench").join("config.toml");
        Self::load_from_file(&config_path)
    }

    /// Load project-local configuration from ./fpga-bench.toml
    fn load_local_config() -> Option<Self> {
        // Try current directory
        let local_path = Path::new("fpga-bench.toml");
        if let Some(config) = Self::load_from_file(local_path) {
            return Some(config);
        }

        // Try to find project root by looking for Cargo.toml
        if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
            let project_path = Path::new(&manifest_dir).join("fpga-bench.toml");
            if let Some(config) = Self::load_from_file(&project_path) {
                return Some(config);
            }
        }

        None
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    Some(config)
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Merge another config into this one.
    /// Only overrides fields that are Some in the other config.
    fn merge(&mut self, other: Self) {
        if other.platform.is_some() {
            self.platform = other.platform;
        }
        if other.burst_width_bits.is_some() {
            self.burst_width_bits = other.burst_width_bits;
        }
        if other.default_frequency_mhz.is_some() {
            self.default_frequency_mhz = other.default_frequency_mhz;
        }
        if other.emulated_ns_per_cycle.is_some() {
            self.emulated_ns_per_cycle = other.emulated_ns_per_cycle;
        }
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(name) = std::env::var("FPGA_BENCH_PLATFORM") {
            log::info!("Using FPGA_BENCH_PLATFORM from environment: {}", name);
            self.platform = Some(name);
        }
        if let Ok(bits) = std::env::var("FPGA_BENCH_BURST_WIDTH_BITS") {
            match bits.parse() {
                Ok(bits) => self.burst_width_bits = Some(bits),
                Err(e) => log::warn!("Ignoring FPGA_BENCH_BURST_WIDTH_BITS: {}", e),
            }
        }
        if let Ok(freq) = std::env::var("FPGA_BENCH_FREQUENCY_MHZ") {
            match freq.parse() {
                Ok(freq) => self.default_frequency_mhz = Some(freq),
                Err(e) => log::warn!("Ignoring FPGA_BENCH_FREQUENCY_MHZ: {}", e),
            }
        }
    }

    /// Get the path to the user config file (for display/creation).
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("fpga-bench").join("config.toml"))
    }

    /// Generate a sample config file content.
    pub fn sample_config() -> String {
        r#"# fpga-bench configuration
# Place this file at ~/.config/fpga-bench/config.toml or ./fpga-bench.toml

# Substring used to select the accelerator platform
# platform = "Intel(R) FPGA"

# Data width between the RTL modules and external memory, in bits
# burst_width_bits = 512

# Operating frequency assumed when none is given on the command line (MHz)
# default_frequency_mhz = 200.0
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.platform(), "Intel(R) FPGA");
        assert_eq!(config.burst_width_bits(), 512);
        assert_eq!(config.default_frequency_mhz(), 200.0);
    }

    #[test]
    fn test_alignment_stride() {
        let config = Config::default();
        // 512-bit bursts over 32-bit elements
        assert_eq!(config.alignment_elems(4), 16);
        // 512-bit bursts over 64-bit elements
        assert_eq!(config.alignment_elems(8), 8);
    }

    #[test]
    fn test_config_merge() {
        let mut base = Config {
            platform: Some("Intel(R) FPGA".to_string()),
            burst_width_bits: None,
            default_frequency_mhz: Some(100.0),
            emulated_ns_per_cycle: None,
        };

        let overlay = Config {
            platform: None,
            burst_width_bits: Some(256),
            default_frequency_mhz: Some(250.0),
            emulated_ns_per_cycle: None,
        };

        base.merge(overlay);

        // platform unchanged (overlay was None)
        assert_eq!(base.platform, Some("Intel(R) FPGA".to_string()));
        // burst_width_bits set from overlay
        assert_eq!(base.burst_width_bits, Some(256));
        // default_frequency_mhz overridden by overlay
        assert_eq!(base.default_frequency_mhz, Some(250.0));
    }

    #[test]
    fn test_sample_config_parses() {
        let sample = Config::sample_config();
        let _: Config = toml::from_str(&sample).expect("Sample config should parse");
    }
}
