//! Service identification from the well-known table or a captured banner

use crate::config::EngineConfig;
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Minimal protocol-agnostic nudge for services that wait for the client
const GENERIC_PROBE: &[u8] = b"\r\n";

/// Where a service guess came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    WellKnown,
    Banner,
    None,
}

/// Best-effort service identity for an open port
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceGuess {
    pub name: String,
    pub provenance: Provenance,
}

impl ServiceGuess {
    pub fn well_known(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provenance: Provenance::WellKnown,
        }
    }

    pub fn banner(text: impl Into<String>) -> Self {
        Self {
            name: text.into(),
            provenance: Provenance::Banner,
        }
    }

    pub fn unknown() -> Self {
        Self {
            name: "unknown".to_string(),
            provenance: Provenance::None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.provenance == Provenance::None
    }
}

/// Service fingerprinter consulting the table before touching the network
#[derive(Debug, Clone)]
pub struct ServiceFingerprinter {
    config: Arc<EngineConfig>,
}

impl ServiceFingerprinter {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self { config }
    }

    /// Table lookup only
    pub fn lookup(&self, port: u16) -> Option<ServiceGuess> {
        self.config.service_name(port).map(ServiceGuess::well_known)
    }

    /// Identify the service on `address:port`. Never fails: a closed, reset
    /// or silent port yields `unknown`.
    pub async fn identify(&self, address: IpAddr, port: u16) -> ServiceGuess {
        if let Some(guess) = self.lookup(port) {
            return guess;
        }

        match self.grab_banner(address, port).await {
            Some(text) => ServiceGuess::banner(text),
            None => ServiceGuess::unknown(),
        }
    }

    /// Capture whatever the service says first.
    ///
    /// Half the budget waits for a spontaneous greeting (SSH, FTP, SMTP);
    /// if none arrives the generic probe is sent and the rest of the budget
    /// waits for a reply.
    pub async fn grab_banner(&self, address: IpAddr, port: u16) -> Option<String> {
        let addr = SocketAddr::new(address, port);
        let budget = self.config.banner_timeout_duration();

        let mut stream = match timeout(self.config.connect_timeout_duration(), TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                log::trace!("Banner connect to {} failed: {}", addr, e);
                return None;
            }
            Err(_) => {
                log::trace!("Banner connect to {} timed out", addr);
                return None;
            }
        };

        let mut buffer = vec![0u8; self.config.banner_max_bytes];
        let greeting_wait = budget / 2;

        if let Some(n) = read_some(&mut stream, &mut buffer, greeting_wait).await {
            return Some(String::from_utf8_lossy(&buffer[..n]).into_owned());
        }

        if stream.write_all(GENERIC_PROBE).await.is_err() {
            return None;
        }

        read_some(&mut stream, &mut buffer, budget.saturating_sub(greeting_wait))
            .await
            .map(|n| String::from_utf8_lossy(&buffer[..n]).into_owned())
    }
}

async fn read_some(stream: &mut TcpStream, buffer: &mut [u8], wait: Duration) -> Option<usize> {
    match timeout(wait, stream.read(buffer)).await {
        Ok(Ok(n)) if n > 0 => Some(n),
        _ => None,
    }
}
