//! traceroute delegation

use super::run_tool;
use crate::config::EngineConfig;
use crate::ScanError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::net::IpAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Seconds traceroute waits for each probe reply
const PROBE_WAIT_SECS: u32 = 5;

static HOP_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+)\s+(.*)$").expect("hop line pattern is valid"));
static RTT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*ms").expect("rtt pattern is valid"));
static PAREN_ADDR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(([0-9a-fA-F:.]+)\)").expect("address pattern is valid"));

/// One line of a route trace
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceHop {
    pub hop: u8,
    /// `None` when every probe for this hop went unanswered
    pub host: Option<String>,
    pub address: Option<String>,
    /// Round-trip times in milliseconds
    pub rtts: Vec<f64>,
    pub avg_rtt: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct Traceroute {
    program: String,
    deadline: Duration,
}

impl Traceroute {
    pub fn new(program: impl Into<String>, deadline: Duration) -> Self {
        Self {
            program: program.into(),
            deadline,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.traceroute_path.clone(), config.external_timeout_duration())
    }

    /// Trace the route to `address`; hops seen before cancellation are not
    /// available since traceroute output is parsed after exit.
    pub async fn trace(&self, address: IpAddr, max_hops: u8, cancel: &CancellationToken) -> crate::Result<Vec<TraceHop>> {
        if max_hops == 0 {
            return Err(ScanError::ConfigError("max_hops must be greater than 0".to_string()));
        }

        let mut args = Vec::new();
        if address.is_ipv6() {
            args.push("-6".to_string());
        }
        args.extend([
            "-m".to_string(),
            max_hops.to_string(),
            "-w".to_string(),
            PROBE_WAIT_SECS.to_string(),
            address.to_string(),
        ]);

        match run_tool(&self.program, &args, self.deadline, cancel).await? {
            Some(output) => {
                if !output.success {
                    log::warn!("traceroute exited with failure: {}", output.stderr.trim());
                }
                Ok(parse_traceroute(&output.stdout))
            }
            None => Ok(Vec::new()),
        }
    }
}

/// Parse traceroute's hop lines, skipping the header
pub fn parse_traceroute(output: &str) -> Vec<TraceHop> {
    output
        .lines()
        .filter(|line| !line.starts_with("traceroute to"))
        .filter_map(parse_hop_line)
        .collect()
}

fn parse_hop_line(line: &str) -> Option<TraceHop> {
    let caps = HOP_LINE.captures(line)?;
    let hop: u8 = caps[1].parse().ok()?;
    let rest = caps.get(2)?.as_str();

    let host = rest
        .split_whitespace()
        .next()
        .filter(|token| *token != "*")
        .map(str::to_string);
    let address = PAREN_ADDR
        .captures(rest)
        .map(|c| c[1].to_string())
        .or_else(|| host.clone());

    let rtts: Vec<f64> = RTT
        .captures_iter(rest)
        .filter_map(|c| c[1].parse().ok())
        .collect();
    let avg_rtt = if rtts.is_empty() {
        None
    } else {
        Some(rtts.iter().sum::<f64>() / rtts.len() as f64)
    };

    Some(TraceHop {
        hop,
        host,
        address,
        rtts,
        avg_rtt,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "traceroute to example.com (93.184.216.34), 30 hops max, 60 byte packets\n \
 1  _gateway (192.168.1.1)  0.412 ms  0.389 ms  0.371 ms\n \
 2  * * *\n \
 3  93.184.216.34  10.000 ms  12.000 ms  14.000 ms\n";

    #[test]
    fn test_parse_hops() {
        let hops = parse_traceroute(SAMPLE);
        assert_eq!(hops.len(), 3);

        assert_eq!(hops[0].hop, 1);
        assert_eq!(hops[0].host.as_deref(), Some("_gateway"));
        assert_eq!(hops[0].address.as_deref(), Some("192.168.1.1"));
        assert_eq!(hops[0].rtts.len(), 3);

        assert_eq!(hops[1].host, None);
        assert_eq!(hops[1].avg_rtt, None);

        assert_eq!(hops[2].address.as_deref(), Some("93.184.216.34"));
        assert_eq!(hops[2].avg_rtt, Some(12.0));
    }

    #[tokio::test]
    async fn test_missing_traceroute() {
        let tracer = Traceroute::new("/nonexistent/traceroute", Duration::from_secs(1));
        let result = tracer
            .trace("127.0.0.1".parse().unwrap(), 5, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ScanError::ToolUnavailable(_))));
    }
}
