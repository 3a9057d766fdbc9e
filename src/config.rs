//! Every tunable of the probe, with built-in defaults that can be overridden one `section.KEY`
//! string pair at a time.
//!
//! Where the pairs come from (a file, flash, a provisioning portal) is up to the caller. A key that
//! is never supplied keeps its default; a key that cannot be applied is reported and also keeps its
//! default, so a bad setting never stops the probe from running.

use alloc::string::{String, ToString};
use core::str::FromStr;
use core::time::Duration;

use crate::addr::InvalidAddressFormat;
use crate::eth_ctrl::{InterfaceConfig, Timeouts};
use crate::ftp::FtpTarget;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The key does not name any setting.
    UnknownKey(String),
    /// The value could not be parsed into the setting's type.
    InvalidValue { key: String, value: String },
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConfigError::UnknownKey(key) => write!(f, "unknown setting {key}"),
            ConfigError::InvalidValue { key, value } => {
                write!(f, "invalid value {value:?} for {key}")
            }
        }
    }
}

/// The `speedtest` section: targets, sizes and intervals of the measurements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeedtestConfig {
    pub ping_target: String,
    pub ping_count: u16,
    pub ping_timeout: Duration,
    pub ping_interval: Duration,
    pub download_interval: Duration,
    pub upload_interval: Duration,
    pub download_server: String,
    pub download_port: u16,
    pub download_path: String,
    pub download_block_size: usize,
    pub download_max_bytes: usize,
    pub upload_server: String,
    pub upload_port: u16,
    pub upload_size: usize,
    pub upload_block_size: usize,
}

impl Default for SpeedtestConfig {
    fn default() -> Self {
        SpeedtestConfig {
            ping_target: "8.8.8.8".into(),
            ping_count: crate::icmp::DEFAULT_COUNT,
            ping_timeout: crate::icmp::DEFAULT_TIMEOUT,
            ping_interval: Duration::from_secs(300),
            download_interval: Duration::from_secs(300),
            upload_interval: Duration::from_secs(300),
            download_server: "example.com".into(),
            download_port: 80,
            download_path: "/largefile.bin".into(),
            download_block_size: crate::throughput::DEFAULT_BLOCK_SIZE,
            download_max_bytes: crate::throughput::DEFAULT_MAX_BYTES,
            upload_server: "example.com".into(),
            upload_port: 80,
            upload_size: 64 * 1024,
            upload_block_size: crate::throughput::DEFAULT_BLOCK_SIZE,
        }
    }
}

/// The `network` section: socket timeouts and the addresses the controller is brought up with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    pub connect_timeout: Duration,
    pub recv_timeout: Duration,
    pub mac: String,
    pub ip: String,
    pub gateway: String,
    pub subnet: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            connect_timeout: Duration::from_secs(5),
            recv_timeout: Duration::from_secs(5),
            mac: "02:00:00:00:00:01".into(),
            ip: "192.168.1.100".into(),
            gateway: "192.168.1.1".into(),
            subnet: "255.255.255.0".into(),
        }
    }
}

impl NetworkConfig {
    /// Validates the four interface addresses as a set.
    pub fn interface(&self) -> Result<InterfaceConfig, InvalidAddressFormat> {
        InterfaceConfig::parse(&self.mac, &self.ip, &self.gateway, &self.subnet)
    }

    /// Socket timeouts for the hardware-socket stack. Sends share the receive timeout.
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            connect: self.connect_timeout,
            recv: self.recv_timeout,
            send: self.recv_timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    pub speedtest: SpeedtestConfig,
    /// The `ftp` section, minus the flush interval.
    pub ftp: FtpTarget,
    pub flush_interval: Duration,
    /// How often the buffer-maintenance task runs (`system.MAINTENANCE_INTERVAL`).
    pub maintenance_interval: Duration,
    pub network: NetworkConfig,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfig {
            speedtest: SpeedtestConfig::default(),
            ftp: FtpTarget::default(),
            flush_interval: Duration::from_secs(60),
            maintenance_interval: Duration::from_secs(60),
            network: NetworkConfig::default(),
        }
    }
}

impl ProbeConfig {
    /// The built-in defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides one setting. `key` is `section.KEY`, matched case-insensitively. Intervals are in
    /// seconds and `*_MS` settings in milliseconds; an interval of 0 disables that task.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let (section, name) = key
            .split_once('.')
            .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
        let value = value.trim();
        let invalid = || ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };
        let s = &mut self.speedtest;
        let n = &mut self.network;
        let f = &mut self.ftp;
        match (
            section.to_ascii_lowercase().as_str(),
            name.to_ascii_uppercase().as_str(),
        ) {
            ("speedtest", "PING_TARGET") => s.ping_target = non_empty(value).ok_or_else(invalid)?,
            ("speedtest", "PING_COUNT") => s.ping_count = parse(value).ok_or_else(invalid)?,
            ("speedtest", "PING_TIMEOUT_MS") => s.ping_timeout = millis(value).ok_or_else(invalid)?,
            ("speedtest", "PING_TEST_INTERVAL") => s.ping_interval = secs(value).ok_or_else(invalid)?,
            ("speedtest", "SPEED_TEST_INTERVAL") => {
                s.download_interval = secs(value).ok_or_else(invalid)?
            }
            ("speedtest", "UPLOAD_TEST_INTERVAL") => {
                s.upload_interval = secs(value).ok_or_else(invalid)?
            }
            ("speedtest", "DOWNLOAD_SERVER") => {
                s.download_server = non_empty(value).ok_or_else(invalid)?
            }
            ("speedtest", "DOWNLOAD_PORT") => s.download_port = parse(value).ok_or_else(invalid)?,
            ("speedtest", "DOWNLOAD_PATH") => s.download_path = non_empty(value).ok_or_else(invalid)?,
            ("speedtest", "DOWNLOAD_BLOCK_SIZE") => {
                s.download_block_size = positive(value).ok_or_else(invalid)?
            }
            ("speedtest", "DOWNLOAD_MAX_BYTES") => {
                s.download_max_bytes = parse(value).ok_or_else(invalid)?
            }
            ("speedtest", "UPLOAD_SERVER") => s.upload_server = non_empty(value).ok_or_else(invalid)?,
            ("speedtest", "UPLOAD_PORT") => s.upload_port = parse(value).ok_or_else(invalid)?,
            ("speedtest", "UPLOAD_SIZE") => s.upload_size = parse(value).ok_or_else(invalid)?,
            ("speedtest", "UPLOAD_BLOCK_SIZE") => {
                s.upload_block_size = positive(value).ok_or_else(invalid)?
            }
            ("ftp", "SERVER") => f.host = non_empty(value).ok_or_else(invalid)?,
            ("ftp", "PORT") => f.port = parse(value).ok_or_else(invalid)?,
            ("ftp", "USERNAME") => f.username = value.to_string(),
            ("ftp", "PASSWORD") => f.password = value.to_string(),
            ("ftp", "REMOTE_PATH") => f.remote_path = non_empty(value).ok_or_else(invalid)?,
            ("ftp", "FLUSH_INTERVAL") => self.flush_interval = secs(value).ok_or_else(invalid)?,
            ("system", "MAINTENANCE_INTERVAL") => {
                self.maintenance_interval = secs(value).ok_or_else(invalid)?
            }
            ("network", "CONNECT_TIMEOUT_MS") => {
                n.connect_timeout = millis(value).ok_or_else(invalid)?
            }
            ("network", "RECV_TIMEOUT_MS") => n.recv_timeout = millis(value).ok_or_else(invalid)?,
            ("network", "MAC") => n.mac = non_empty(value).ok_or_else(invalid)?,
            ("network", "IP") => n.ip = non_empty(value).ok_or_else(invalid)?,
            ("network", "GATEWAY") => n.gateway = non_empty(value).ok_or_else(invalid)?,
            ("network", "SUBNET") => n.subnet = non_empty(value).ok_or_else(invalid)?,
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }
}

fn parse<T: FromStr>(value: &str) -> Option<T> {
    value.parse().ok()
}

fn positive(value: &str) -> Option<usize> {
    parse(value).filter(|&n: &usize| n > 0)
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn secs(value: &str) -> Option<Duration> {
    parse(value).map(Duration::from_secs)
}

fn millis(value: &str) -> Option<Duration> {
    parse(value).map(Duration::from_millis)
}
