//! Host discovery: a single-shot ping sweep over resolved addresses
//!
//! Every address gets exactly one reachability probe. Hosts that drop it are
//! reported unreachable for the sweep; nothing is retried.

use crate::config::EngineConfig;
use crate::network::icmp::Pinger;
use crate::network::{ProbeResult, ProbeState};
use crate::pool::{Job, WorkerPool};
use async_trait::async_trait;
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Slack given to the pool deadline so the pinger's own timeout fires first
const POOL_GRACE: Duration = Duration::from_secs(1);

/// Outcome of one sweep
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    /// Reachable subset, sorted
    pub reachable: Vec<IpAddr>,
    pub requested: usize,
    /// One host-level result per probed address, sorted by address
    pub results: Vec<ProbeResult>,
    /// Addresses never probed because the sweep was cancelled
    pub not_started: usize,
    pub cancelled: bool,
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
}

impl SweepReport {
    pub fn probed(&self) -> usize {
        self.requested - self.not_started
    }

    /// Share of probed addresses that did not answer, in percent
    pub fn loss_rate(&self) -> f64 {
        let probed = self.probed();
        if probed == 0 {
            return 0.0;
        }
        (probed - self.reachable.len()) as f64 * 100.0 / probed as f64
    }
}

struct PingJob {
    address: IpAddr,
    pinger: Arc<dyn Pinger>,
    timeout: Duration,
}

#[async_trait]
impl Job for PingJob {
    type Output = ProbeResult;

    async fn execute(&self) -> ProbeResult {
        match self.pinger.ping(self.address, self.timeout).await {
            Ok(Some(reply)) => ProbeResult::host(self.address, ProbeState::Open).with_latency(reply.rtt),
            Ok(None) => ProbeResult::host(self.address, ProbeState::Unreachable),
            Err(e) => {
                log::warn!("Probe of {} failed: {}", self.address, e);
                ProbeResult::host(self.address, ProbeState::Unreachable).with_note(e.to_string())
            }
        }
    }

    fn timed_out(&self) -> ProbeResult {
        ProbeResult::host(self.address, ProbeState::Timeout)
    }
}

/// Concurrent ping sweep
pub struct HostDiscovery {
    config: Arc<EngineConfig>,
    pinger: Arc<dyn Pinger>,
}

impl HostDiscovery {
    pub fn new(config: Arc<EngineConfig>, pinger: Arc<dyn Pinger>) -> Self {
        Self { config, pinger }
    }

    /// Probe every address once. `on_result` sees each result as it lands,
    /// which is how callers render live progress.
    pub async fn discover<F>(&self, addresses: &[IpAddr], cancel: &CancellationToken, on_result: F) -> SweepReport
    where
        F: FnMut(&ProbeResult),
    {
        let started = Instant::now();
        let ping_timeout = self.config.ping_timeout_duration();
        let pool = WorkerPool::new(self.config.concurrency, ping_timeout + POOL_GRACE);

        log::info!(
            "Sweeping {} addresses with {} ({} workers)",
            addresses.len(),
            self.pinger.name(),
            pool.concurrency()
        );

        let jobs: Vec<PingJob> = addresses
            .iter()
            .map(|&address| PingJob {
                address,
                pinger: self.pinger.clone(),
                timeout: ping_timeout,
            })
            .collect();

        let pool_report = pool.run(jobs, cancel, on_result).await;

        let mut results = pool_report.results;
        results.sort_by_key(|r| r.address);

        let reachable: Vec<IpAddr> = results.iter().filter(|r| r.is_open()).map(|r| r.address).collect();

        log::info!(
            "Sweep finished: {}/{} hosts up in {:.2}s",
            reachable.len(),
            pool_report.submitted,
            started.elapsed().as_secs_f64()
        );

        SweepReport {
            reachable,
            requested: pool_report.submitted,
            results,
            not_started: pool_report.not_started,
            cancelled: pool_report.cancelled,
            elapsed: started.elapsed(),
        }
    }
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}
