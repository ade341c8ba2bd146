//! nmap delegation for port probing and OS detection

use super::run_tool;
use crate::config::EngineConfig;
use crate::intelligence::os_fingerprinting::OsFingerprintGuess;
use crate::intelligence::service_detection::ServiceGuess;
use crate::network::{ProbeResult, ProbeState};
use crate::utils::find_executable;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

static PORT_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)/tcp\s+(\S+)\s*(\S*)").expect("port line pattern is valid"));
static NOT_SHOWN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Not shown: \d+ (closed|filtered)").expect("not-shown pattern is valid")
});
static ALL_PORTS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^All \d+ scanned ports on .+ are (?:in ignored states|(closed|filtered))")
        .expect("all-ports pattern is valid")
});
static OS_GUESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:Aggressive OS guesses|Running \(JUST GUESSING\)):\s*([^,(]+?)\s*\((\d+)%\)")
        .expect("os guess pattern is valid")
});
static OS_DETAILS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^OS details:\s*([^,]+)").expect("os details pattern is valid"));

/// nmap invoked as a subprocess
#[derive(Debug, Clone)]
pub struct NmapScanner {
    program: String,
    deadline: Duration,
}

impl NmapScanner {
    pub fn new(program: impl Into<String>, deadline: Duration) -> Self {
        Self {
            program: program.into(),
            deadline,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.nmap_path.clone(), config.external_timeout_duration())
    }

    pub fn is_available(&self) -> bool {
        find_executable(&self.program).is_some()
    }

    /// Probe `ports` on `address`; `Ok(None)` if cancelled before nmap finished
    pub async fn scan_ports(
        &self,
        address: IpAddr,
        ports: &[u16],
        cancel: &CancellationToken,
    ) -> crate::Result<Option<Vec<ProbeResult>>> {
        let port_list = ports.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(",");
        let mut args = vec!["-Pn".to_string(), "-n".to_string()];
        if address.is_ipv6() {
            args.push("-6".to_string());
        }
        args.extend(["-p".to_string(), port_list, address.to_string()]);

        let output = match run_tool(&self.program, &args, self.deadline, cancel).await? {
            Some(output) => output,
            None => return Ok(None),
        };

        if !output.success {
            log::warn!("nmap exited with failure: {}", output.stderr.trim());
        }

        Ok(Some(parse_port_report(&output.stdout, address, ports)))
    }

    /// Ask nmap for an OS guess. Needs privileges; `Ok(None)` when nmap
    /// produced no usable guess or the run was cancelled.
    pub async fn detect_os(&self, address: IpAddr, cancel: &CancellationToken) -> crate::Result<Option<OsFingerprintGuess>> {
        let mut args = vec!["-O".to_string(), "--osscan-guess".to_string(), "-Pn".to_string(), "-n".to_string()];
        if address.is_ipv6() {
            args.push("-6".to_string());
        }
        args.push(address.to_string());

        let output = match run_tool(&self.program, &args, self.deadline, cancel).await? {
            Some(output) => output,
            None => return Ok(None),
        };

        if !output.success {
            log::debug!("nmap OS detection failed: {}", output.stderr.trim());
            return Ok(None);
        }

        Ok(parse_os_report(&output.stdout).map(|(name, accuracy)| OsFingerprintGuess::from_external(&name, accuracy)))
    }
}

/// Map nmap's normal output onto one result per requested port.
///
/// Ports nmap folded into a "Not shown" summary take that summary's state.
/// Output with no recognizable port information yields `unreachable`
/// results carrying a diagnostic note.
pub fn parse_port_report(output: &str, address: IpAddr, ports: &[u16]) -> Vec<ProbeResult> {
    let mut listed: HashMap<u16, ProbeResult> = HashMap::new();
    let mut default_state: Option<ProbeState> = None;

    for line in output.lines().map(str::trim) {
        if let Some(caps) = PORT_LINE.captures(line) {
            let port: u16 = match caps[1].parse() {
                Ok(port) => port,
                Err(_) => continue,
            };
            let mut result = ProbeResult::port(address, port, map_state(&caps[2]));
            if &caps[2] != "open" && &caps[2] != "closed" && &caps[2] != "filtered" {
                result = result.with_note(format!("nmap: {}", &caps[2]));
            }
            let service = caps.get(3).map(|m| m.as_str()).unwrap_or("");
            if result.is_open() && !service.is_empty() && service != "unknown" {
                result = result.with_service(ServiceGuess::well_known(service));
            }
            listed.insert(port, result);
        } else if let Some(caps) = NOT_SHOWN.captures(line) {
            default_state = Some(map_state(&caps[1]));
        } else if let Some(caps) = ALL_PORTS.captures(line) {
            default_state = Some(caps.get(1).map(|m| map_state(m.as_str())).unwrap_or(ProbeState::Closed));
        }
    }

    if listed.is_empty() && default_state.is_none() {
        log::warn!("Could not parse nmap output for {}", address);
        return ports
            .iter()
            .map(|&port| {
                ProbeResult::port(address, port, ProbeState::Unreachable).with_note("could not parse nmap output")
            })
            .collect();
    }

    let default_state = default_state.unwrap_or(ProbeState::Closed);
    ports
        .iter()
        .map(|&port| {
            listed
                .remove(&port)
                .unwrap_or_else(|| ProbeResult::port(address, port, default_state))
        })
        .collect()
}

fn map_state(state: &str) -> ProbeState {
    match state {
        "open" => ProbeState::Open,
        "closed" => ProbeState::Closed,
        _ => ProbeState::Filtered,
    }
}

/// Extract the best OS guess and its accuracy percentage
pub fn parse_os_report(output: &str) -> Option<(String, u8)> {
    for line in output.lines().map(str::trim) {
        if let Some(caps) = OS_DETAILS.captures(line) {
            return Some((caps[1].trim().to_string(), 100));
        }
        if let Some(caps) = OS_GUESS.captures(line) {
            let accuracy = caps[2].parse::<u8>().ok()?.min(100);
            return Some((caps[1].trim().to_string(), accuracy));
        }
    }
    None
}
