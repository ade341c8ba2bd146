//! Deimos - network reconnaissance and diagnostics engine
//!
//! Host sweeps, multi-strategy port probing, service and OS fingerprinting,
//! live latency monitoring and rough throughput estimates, all driven by one
//! bounded worker pool and one cancellation token. Local interface listing
//! and DNS lookups round out the toolkit.

pub mod config;
pub mod discovery;
pub mod error;
pub mod external;
pub mod intelligence;
pub mod monitor;
pub mod network;
pub mod pool;
pub mod scanner;
pub mod throughput;
pub mod top_ports;
pub mod utils;

// Re-export commonly used types
pub use config::EngineConfig;
pub use discovery::{HostDiscovery, SweepReport};
pub use error::{Notice, ScanError};
pub use intelligence::os_fingerprinting::{classify, Confidence, OsFamily, OsFingerprintGuess};
pub use intelligence::service_detection::{ServiceFingerprinter, ServiceGuess};
pub use monitor::{LatencyMonitor, LatencySample, LatencyStatistics, MonitorState};
pub use network::dns::{DnsLookup, DnsReport};
pub use network::interfaces::NetworkInterface;
pub use network::{ProbeResult, ProbeState};
pub use pool::{Job, PoolReport, WorkerPool};
pub use scanner::{PortScanReport, PortScanner, ProbeStrategy};
pub use throughput::{ThroughputProber, ThroughputReport};
pub use utils::target_parser::{Resolution, TargetResolver};

pub type Result<T> = std::result::Result<T, ScanError>;
