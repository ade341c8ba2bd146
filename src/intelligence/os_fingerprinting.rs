//! Heuristic OS fingerprinting from TTL and initial window size
//!
//! The window table is a seed heuristic: a handful of literal values that
//! were common years ago. Guesses always carry their confidence so callers
//! can discount them; an external OS detector is preferred when present.

use crate::config::EngineConfig;
use crate::external::NmapScanner;
use crate::network::icmp::Pinger;
use crate::scanner::{PortProbe, PortScanner, ProbeStrategy, SynProbe};
use crate::utils::{has_raw_socket_privilege, is_root};
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// How much a guess should be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    None,
    Low,
    Medium,
    High,
}

impl Confidence {
    /// Map an external tool's accuracy percentage onto the same scale
    pub fn from_accuracy(percent: u8) -> Self {
        match percent {
            90..=u8::MAX => Confidence::High,
            70..=89 => Confidence::Medium,
            1..=69 => Confidence::Low,
            0 => Confidence::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::None => "none",
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }
}

/// Coarse operating system family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OsFamily {
    Linux,
    #[serde(rename = "BSD")]
    Bsd,
    #[serde(rename = "macOS")]
    MacOs,
    Windows,
    #[serde(rename = "unknown")]
    Unknown,
}

impl OsFamily {
    pub fn name(&self) -> &'static str {
        match self {
            OsFamily::Linux => "Linux",
            OsFamily::Bsd => "BSD",
            OsFamily::MacOs => "macOS",
            OsFamily::Windows => "Windows",
            OsFamily::Unknown => "unknown",
        }
    }

    /// Best-effort family from a free-form OS name
    pub fn from_name(name: &str) -> Self {
        let name = name.to_ascii_lowercase();
        if name.contains("windows") {
            OsFamily::Windows
        } else if ["mac os", "macos", "os x", "darwin"].iter().any(|k| name.contains(k)) {
            OsFamily::MacOs
        } else if name.contains("bsd") {
            OsFamily::Bsd
        } else if name.contains("linux") || name.contains("android") {
            OsFamily::Linux
        } else {
            OsFamily::Unknown
        }
    }
}

impl std::fmt::Display for OsFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a guess came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GuessSource {
    Heuristic,
    External,
}

/// Best-effort OS guess; derived per request and never cached
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OsFingerprintGuess {
    pub os_family: OsFamily,
    pub confidence: Confidence,
    pub observed_ttl: Option<u8>,
    pub observed_window: Option<u16>,
    /// Families consistent with the observed TTL
    pub candidates: Vec<OsFamily>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_hint: Option<String>,
    pub source: GuessSource,
}

impl OsFingerprintGuess {
    fn unknown(ttl: Option<u8>, window: Option<u16>) -> Self {
        Self {
            os_family: OsFamily::Unknown,
            confidence: Confidence::None,
            observed_ttl: ttl,
            observed_window: window,
            candidates: Vec::new(),
            release_hint: None,
            source: GuessSource::Heuristic,
        }
    }

    /// Guess reported by an external detector with an accuracy percentage
    pub fn from_external(name: &str, accuracy: u8) -> Self {
        let family = OsFamily::from_name(name);
        Self {
            os_family: family,
            confidence: Confidence::from_accuracy(accuracy),
            observed_ttl: None,
            observed_window: None,
            candidates: vec![family],
            release_hint: Some(name.to_string()),
            source: GuessSource::External,
        }
    }
}

/// Classify a remote stack by reply TTL and TCP window size.
///
/// A window of 0 means "not observed".
pub fn classify(ttl: u8, window_size: u16) -> OsFingerprintGuess {
    let observed_ttl = (ttl > 0).then_some(ttl);
    let observed_window = (window_size > 0).then_some(window_size);

    let candidates = match ttl {
        60..=64 => vec![OsFamily::Linux, OsFamily::Bsd, OsFamily::MacOs],
        128..=132 => vec![OsFamily::Windows],
        _ => return OsFingerprintGuess::unknown(observed_ttl, observed_window),
    };

    let (os_family, confidence, release_hint) = match (candidates[0], window_size) {
        (OsFamily::Linux, 65535) => (OsFamily::Linux, Confidence::High, Some("modern stack")),
        (OsFamily::Windows, 65535) => (OsFamily::Windows, Confidence::High, Some("modern stack")),
        (OsFamily::Windows, 8192 | 16384) => (OsFamily::Windows, Confidence::High, Some("older Windows release")),
        (family, _) => (family, Confidence::Medium, None),
    };

    OsFingerprintGuess {
        os_family,
        confidence,
        observed_ttl,
        observed_window,
        candidates,
        release_hint: release_hint.map(str::to_string),
        source: GuessSource::Heuristic,
    }
}

/// Gathers TTL/window evidence for one address and classifies it
pub struct OsFingerprinter {
    config: Arc<EngineConfig>,
    pinger: Arc<dyn Pinger>,
    nmap: Option<NmapScanner>,
}

impl OsFingerprinter {
    pub fn new(config: Arc<EngineConfig>, pinger: Arc<dyn Pinger>) -> Self {
        Self {
            nmap: Some(NmapScanner::from_config(&config)),
            config,
            pinger,
        }
    }

    /// Heuristics only, never the external detector
    pub fn without_external(mut self) -> Self {
        self.nmap = None;
        self
    }

    /// Evidence sources, best first:
    /// 1. external detector (needs root)
    /// 2. SYN-ACK/RST of a half-open probe against `port` or the first open common port
    /// 3. TTL of an echo reply (window unknown, so at most medium confidence)
    pub async fn fingerprint(&self, address: IpAddr, port: Option<u16>, cancel: &CancellationToken) -> OsFingerprintGuess {
        if let Some(guess) = self.external_guess(address, cancel).await {
            return guess;
        }

        if let Some(guess) = self.tcp_guess(address, port, cancel).await {
            return guess;
        }

        match self.pinger.ping(address, self.config.ping_timeout_duration()).await {
            Ok(Some(reply)) => match reply.ttl {
                Some(ttl) => classify(ttl, 0),
                None => OsFingerprintGuess::unknown(None, None),
            },
            Ok(None) => OsFingerprintGuess::unknown(None, None),
            Err(e) => {
                log::warn!("Echo probe to {} failed: {}", address, e);
                OsFingerprintGuess::unknown(None, None)
            }
        }
    }

    async fn external_guess(&self, address: IpAddr, cancel: &CancellationToken) -> Option<OsFingerprintGuess> {
        let nmap = self.nmap.as_ref()?;
        if !is_root() || !nmap.is_available() {
            return None;
        }

        match nmap.detect_os(address, cancel).await {
            Ok(guess) => guess,
            Err(e) => {
                log::debug!("External OS detection unavailable: {}", e);
                None
            }
        }
    }

    async fn tcp_guess(&self, address: IpAddr, port: Option<u16>, cancel: &CancellationToken) -> Option<OsFingerprintGuess> {
        if address.is_ipv6() || !has_raw_socket_privilege() {
            return None;
        }

        let port = match port {
            Some(port) => port,
            None => {
                let report = PortScanner::new(self.config.clone())
                    .probe(address, &[], ProbeStrategy::Connect, cancel, |_| {})
                    .await
                    .ok()?;
                let open = report.results.iter().find(|r| r.is_open())?.port?;
                open
            }
        };

        let probe = SynProbe::new(self.config.connect_timeout_duration()).ok()?;
        let signal = probe.probe(address, port).await.signal?;
        log::debug!("{}:{} replied with ttl={} window={}", address, port, signal.ttl, signal.window);
        Some(classify(signal.ttl, signal.window))
    }
}
