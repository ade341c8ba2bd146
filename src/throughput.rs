//! Throughput prober
//!
//! One bounded download from a single target. The figure is a rough
//! estimate: no retries, one stream, and whatever the server sends for `/`.

use crate::config::EngineConfig;
use crate::ScanError;
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ThroughputMethod {
    #[serde(rename = "http")]
    Http,
    #[serde(rename = "raw-tcp")]
    RawTcp,
}

impl std::fmt::Display for ThroughputMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThroughputMethod::Http => f.write_str("http"),
            ThroughputMethod::RawTcp => f.write_str("raw-tcp"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ThroughputReport {
    pub target: String,
    pub method: ThroughputMethod,
    /// Time to the first response (HTTP) or to the completed handshake (raw)
    #[serde(serialize_with = "serialize_secs")]
    pub connect_time: Duration,
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    pub bytes: u64,
    /// Bytes per second over the transfer
    pub rate_bps: f64,
    pub mbps: f64,
    /// Download stopped at the configured size cap
    pub capped: bool,
}

impl ThroughputReport {
    fn new(target: &str, method: ThroughputMethod, connect_time: Duration, transfer: Duration, bytes: u64, capped: bool) -> Self {
        let secs = transfer.as_secs_f64();
        let rate_bps = if secs > 0.0 { bytes as f64 / secs } else { 0.0 };
        Self {
            target: target.to_string(),
            method,
            connect_time,
            elapsed: connect_time + transfer,
            bytes,
            rate_bps,
            mbps: rate_bps * 8.0 / 1024.0 / 1024.0,
            capped,
        }
    }
}

pub struct ThroughputProber {
    config: Arc<EngineConfig>,
}

impl ThroughputProber {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self { config }
    }

    /// Download from `host`, over HTTP when possible, otherwise by counting
    /// raw bytes from a plain TCP connection to `address:port`.
    /// `on_progress` receives the running byte count.
    pub async fn measure<F>(&self, host: &str, address: IpAddr, port: u16, mut on_progress: F) -> crate::Result<ThroughputReport>
    where
        F: FnMut(u64),
    {
        match self.measure_http(host, port, &mut on_progress).await {
            Ok(report) => Ok(report),
            Err(e) => {
                log::warn!("HTTP download from {} failed ({}), using raw TCP", host, e);
                self.measure_raw(host, SocketAddr::new(address, port), on_progress).await
            }
        }
    }

    pub async fn measure_http<F>(&self, host: &str, port: u16, mut on_progress: F) -> crate::Result<ThroughputReport>
    where
        F: FnMut(u64),
    {
        let io_timeout = self.config.throughput_timeout_duration();
        let client = reqwest::Client::builder()
            .connect_timeout(io_timeout)
            .no_proxy()
            .build()?;
        let url = http_url(host, port);
        log::info!("Downloading {} (cap {} bytes)", url, self.config.throughput_max_bytes);

        let started = Instant::now();
        let mut response = timeout(io_timeout, client.get(&url).send())
            .await
            .map_err(|_| ScanError::TimeoutError(format!("no response from {}", url)))??;
        let connect_time = started.elapsed();
        log::debug!("{} answered {} after {:?}", url, response.status(), connect_time);

        let transfer_started = Instant::now();
        let max = self.config.throughput_max_bytes;
        let mut bytes = 0u64;
        let mut capped = false;

        loop {
            let chunk = timeout(io_timeout, response.chunk())
                .await
                .map_err(|_| ScanError::TimeoutError(format!("download from {} stalled", url)))??;
            let Some(chunk) = chunk else { break };

            bytes += chunk.len() as u64;
            on_progress(bytes.min(max));
            if bytes >= max {
                bytes = max;
                capped = true;
                break;
            }
        }

        Ok(ThroughputReport::new(
            host,
            ThroughputMethod::Http,
            connect_time,
            transfer_started.elapsed(),
            bytes,
            capped,
        ))
    }

    pub async fn measure_raw<F>(&self, host: &str, address: SocketAddr, mut on_progress: F) -> crate::Result<ThroughputReport>
    where
        F: FnMut(u64),
    {
        let io_timeout = self.config.throughput_timeout_duration();

        let started = Instant::now();
        let mut stream = timeout(io_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| ScanError::TimeoutError(format!("connect to {} timed out", address)))?
            .map_err(|e| ScanError::NetworkError(format!("connect to {}: {}", address, e)))?;
        let connect_time = started.elapsed();

        let transfer_started = Instant::now();
        let request = format!("GET / HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n", host);
        stream.write_all(request.as_bytes()).await?;

        let max = self.config.throughput_max_bytes;
        let mut buf = vec![0u8; self.config.throughput_chunk.max(1)];
        let mut bytes = 0u64;
        let mut capped = false;

        loop {
            let n = match timeout(io_timeout, stream.read(&mut buf)).await {
                Ok(read) => read?,
                Err(_) => {
                    log::warn!("{} went quiet after {} bytes", address, bytes);
                    break;
                }
            };
            if n == 0 {
                break;
            }

            bytes += n as u64;
            on_progress(bytes.min(max));
            if bytes >= max {
                bytes = max;
                capped = true;
                break;
            }
        }

        Ok(ThroughputReport::new(
            host,
            ThroughputMethod::RawTcp,
            connect_time,
            transfer_started.elapsed(),
            bytes,
            capped,
        ))
    }
}

fn http_url(host: &str, port: u16) -> String {
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V6(v6)) => format!("http://[{}]:{}/", v6, port),
        _ => format!("http://{}:{}/", host, port),
    }
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}
