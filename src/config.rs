use serde::{Deserialize, Serialize};

const DEFAULT_CONFIG_PATH: &str = "/etc/tsn-nic/config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(#[from] toml::de::Error),
}

/// How the pipeline treats outgoing frames.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Gate-scheduled egress with periodic gPTP bursts.
    #[default]
    Tsn,
    /// Plain burst forwarding.
    Normal,
}

/// CPU assignment for the pipeline stages.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize)]
pub struct PipelineCpus {
    pub receiver: Option<usize>,
    pub parser: Option<usize>,
    pub sender: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// C2H character device used for `MULTI_READ`.
    pub rx_device: String,
    /// H2C character device used for `MULTI_WRITE`.
    pub tx_device: String,
    /// PCI sysfs directory holding the BAR0 resource file.
    pub sysfs_path: String,
    /// Station MAC address.
    pub mac: [u8; 6],
    pub mode: RunMode,
    /// Whether hardware TX timestamping is requested.
    pub hw_tstamp: bool,
    #[serde(default)]
    pub cpus: PipelineCpus,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            rx_device: "/dev/xdma0_c2h_0".into(),
            tx_device: "/dev/xdma0_h2c_0".into(),
            sysfs_path: "/sys/bus/pci/devices/0000:01:00.0".into(),
            mac: [0x00, 0x11, 0x22, 0x33, 0x44, 0x55],
            mode: RunMode::Tsn,
            hw_tstamp: true,
            cpus: PipelineCpus::default(),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads the configuration from the default path.
    pub fn load_default() -> Result<DriverConfig, ConfigError> {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    /// Loads the configuration from the specified path.
    pub fn load_from_path(path: &str) -> Result<DriverConfig, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: DriverConfig = toml::from_str(&content)?;
        Ok(config)
    }
}
