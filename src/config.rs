//! Configuration module for the deimos engine
//!
//! One immutable `EngineConfig` is built at startup (defaults, optionally
//! overlaid by a TOML file) and handed to each orchestrator as
//! `Arc<EngineConfig>`. Nothing reads configuration mid-operation.

use crate::error::ScanError;
use crate::top_ports::{COMMON_PORTS, WELL_KNOWN_SERVICES};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One entry of the well-known port -> service table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub port: u16,
    pub name: String,
}

/// Main configuration structure for engine operations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default number of pool workers
    pub concurrency: usize,

    /// Workers for plain connect probing
    pub connect_concurrency: usize,

    /// Workers for half-open probing (raw sockets are expensive)
    pub syn_concurrency: usize,

    /// Deadline for a single pool job in milliseconds
    pub job_timeout: u64,

    /// Connect handshake timeout in milliseconds
    pub connect_timeout: u64,

    /// Reachability probe timeout in milliseconds
    pub ping_timeout: u64,

    /// Banner capture timeout in milliseconds
    pub banner_timeout: u64,

    /// Maximum bytes read while capturing a banner
    pub banner_max_bytes: usize,

    /// Ceiling on hosts produced by CIDR expansion
    pub max_cidr_hosts: usize,

    /// Latency monitor tick interval in milliseconds
    pub monitor_interval: u64,

    /// Latency monitor sample buffer capacity
    pub monitor_capacity: usize,

    /// Number of samples rendered in the sparkline
    pub sparkline_width: usize,

    /// Render frames that may queue before new ones are dropped
    pub frame_buffer: usize,

    /// Upper bound on bytes read by the throughput probe
    pub throughput_max_bytes: u64,

    /// Read chunk size for the raw throughput probe
    pub throughput_chunk: usize,

    /// Connect/read timeout for the throughput probe in milliseconds
    pub throughput_timeout: u64,

    /// External scanner binary
    pub nmap_path: String,

    /// External ping binary
    pub ping_path: String,

    /// External traceroute binary
    pub traceroute_path: String,

    /// External DNS query binary
    pub dig_path: String,

    /// Deadline for one DNS lookup in milliseconds
    pub dns_timeout: u64,

    /// Overall deadline for one external tool invocation in seconds
    pub external_timeout: u64,

    /// Ports probed when the caller gives no port specification
    pub common_ports: Vec<u16>,

    /// Well-known port -> service name table
    pub services: Vec<ServiceEntry>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: 15,
            connect_concurrency: 50,
            syn_concurrency: 5,
            job_timeout: 1000,
            connect_timeout: 750,
            ping_timeout: 1000,
            banner_timeout: 1000,
            banner_max_bytes: 256,
            max_cidr_hosts: 1000,
            monitor_interval: 1000,
            monitor_capacity: 100,
            sparkline_width: 60,
            frame_buffer: 16,
            throughput_max_bytes: 10 * 1024 * 1024,
            throughput_chunk: 64 * 1024,
            throughput_timeout: 5000,
            nmap_path: "nmap".to_string(),
            ping_path: "ping".to_string(),
            traceroute_path: "traceroute".to_string(),
            dig_path: "dig".to_string(),
            dns_timeout: 5000,
            external_timeout: 300,
            common_ports: COMMON_PORTS.to_vec(),
            services: WELL_KNOWN_SERVICES
                .iter()
                .map(|(port, name)| ServiceEntry { port: *port, name: name.to_string() })
                .collect(),
        }
    }
}

impl EngineConfig {
    /// Load a configuration file, falling back to defaults for missing fields
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content)
            .map_err(|e| ScanError::ConfigError(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, else `~/.deimos.toml` if it exists, else defaults
    pub fn discover(path: Option<&Path>) -> crate::Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        match Self::default_path() {
            Some(path) if path.exists() => {
                log::debug!("Loading configuration from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Default configuration file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".deimos.toml"))
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        let positive = [
            ("concurrency", self.concurrency as u64),
            ("connect_concurrency", self.connect_concurrency as u64),
            ("syn_concurrency", self.syn_concurrency as u64),
            ("job_timeout", self.job_timeout),
            ("connect_timeout", self.connect_timeout),
            ("ping_timeout", self.ping_timeout),
            ("banner_timeout", self.banner_timeout),
            ("banner_max_bytes", self.banner_max_bytes as u64),
            ("max_cidr_hosts", self.max_cidr_hosts as u64),
            ("monitor_interval", self.monitor_interval),
            ("monitor_capacity", self.monitor_capacity as u64),
            ("sparkline_width", self.sparkline_width as u64),
            ("frame_buffer", self.frame_buffer as u64),
            ("throughput_max_bytes", self.throughput_max_bytes),
            ("throughput_chunk", self.throughput_chunk as u64),
            ("throughput_timeout", self.throughput_timeout),
            ("external_timeout", self.external_timeout),
            ("dns_timeout", self.dns_timeout),
        ];

        for (name, value) in positive {
            if value == 0 {
                return Err(ScanError::ConfigError(format!("{} must be greater than 0", name)));
            }
        }

        if self.common_ports.iter().any(|&p| p == 0) {
            return Err(ScanError::ConfigError("common_ports contains port 0".to_string()));
        }

        Ok(())
    }

    /// Look up the well-known service name for a port
    pub fn service_name(&self, port: u16) -> Option<&str> {
        self.services
            .iter()
            .find(|entry| entry.port == port)
            .map(|entry| entry.name.as_str())
    }

    pub fn job_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.job_timeout)
    }

    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.connect_timeout)
    }

    pub fn ping_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.ping_timeout)
    }

    pub fn banner_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.banner_timeout)
    }

    pub fn monitor_interval_duration(&self) -> Duration {
        Duration::from_millis(self.monitor_interval)
    }

    pub fn throughput_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.throughput_timeout)
    }

    pub fn external_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.external_timeout)
    }

    pub fn dns_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.dns_timeout)
    }
}
