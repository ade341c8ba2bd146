//! Port scanning engine

use super::techniques::{ConnectProbe, PortProbe, SynProbe};
use super::{PortScanReport, ProbeStrategy};
use crate::config::EngineConfig;
use crate::error::Notice;
use crate::external::NmapScanner;
use crate::intelligence::service_detection::{ServiceFingerprinter, ServiceGuess};
use crate::network::{ProbeResult, ProbeState};
use crate::pool::{Job, WorkerPool};
use crate::ScanError;
use async_trait::async_trait;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Probes the ports of one address with a chosen strategy
pub struct PortScanner {
    config: Arc<EngineConfig>,
    services: ServiceFingerprinter,
    nmap: NmapScanner,
    grab_banners: bool,
}

/// Probe one port, then attach a service guess if it is open
struct PortJob {
    address: IpAddr,
    port: u16,
    probe: Arc<dyn PortProbe>,
    services: ServiceFingerprinter,
    grab_banners: bool,
}

#[async_trait]
impl Job for PortJob {
    type Output = ProbeResult;

    async fn execute(&self) -> ProbeResult {
        let result = self.probe.probe(self.address, self.port).await;
        if !result.is_open() {
            return result;
        }

        let guess = if self.grab_banners {
            self.services.identify(self.address, self.port).await
        } else {
            self.services.lookup(self.port).unwrap_or_else(ServiceGuess::unknown)
        };
        result.with_service(guess)
    }

    fn timed_out(&self) -> ProbeResult {
        ProbeResult::port(self.address, self.port, ProbeState::Timeout)
    }
}

impl PortScanner {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self {
            services: ServiceFingerprinter::new(config.clone()),
            nmap: NmapScanner::from_config(&config),
            config,
            grab_banners: false,
        }
    }

    /// Capture banners for open ports missing from the well-known table
    pub fn with_banners(mut self, enabled: bool) -> Self {
        self.grab_banners = enabled;
        self
    }

    /// Probe `ports` on `address`. An empty port list means the common-port
    /// table. `on_result` sees each result as it completes.
    pub async fn probe<F>(
        &self,
        address: IpAddr,
        ports: &[u16],
        strategy: ProbeStrategy,
        cancel: &CancellationToken,
        on_result: F,
    ) -> crate::Result<PortScanReport>
    where
        F: FnMut(&ProbeResult),
    {
        let ports = self.validate_ports(ports)?;
        let mut notices = Vec::new();

        let (used, probe) = match strategy {
            ProbeStrategy::Auto | ProbeStrategy::Connect => (ProbeStrategy::Connect, self.connect_probe()),
            ProbeStrategy::Syn => match self.syn_probe(address) {
                Ok(probe) => (ProbeStrategy::Syn, probe),
                Err(reason) => {
                    let notice = Notice::PrivilegeDowngraded {
                        requested: ProbeStrategy::Syn.to_string(),
                        used: ProbeStrategy::Connect.to_string(),
                        reason,
                    };
                    log::warn!("{}", notice);
                    notices.push(notice);
                    (ProbeStrategy::Connect, self.connect_probe())
                }
            },
            ProbeStrategy::External => {
                if self.nmap.is_available() {
                    return Ok(self.probe_external(address, &ports, cancel, on_result).await);
                }
                log::warn!("External scanner not found, using connect probing");
                (ProbeStrategy::Connect, self.connect_probe())
            }
        };

        let concurrency = match used {
            ProbeStrategy::Syn => self.config.syn_concurrency,
            _ => self.config.connect_concurrency,
        };

        let mut report = self
            .probe_with(address, &ports, probe, used, concurrency, cancel, on_result)
            .await;
        report.strategy_requested = strategy;
        report.notices = notices;
        Ok(report)
    }

    /// Run `probe` over every port on the worker pool. `strategy` is what
    /// the report records as both requested and used.
    pub async fn probe_with<F>(
        &self,
        address: IpAddr,
        ports: &[u16],
        probe: Arc<dyn PortProbe>,
        strategy: ProbeStrategy,
        concurrency: usize,
        cancel: &CancellationToken,
        on_result: F,
    ) -> PortScanReport
    where
        F: FnMut(&ProbeResult),
    {
        let started = Instant::now();
        let pool = WorkerPool::new(concurrency, self.job_timeout());

        log::info!(
            "Probing {} ports on {} ({} probe, {} workers)",
            ports.len(),
            address,
            probe.name(),
            pool.concurrency()
        );

        let jobs: Vec<PortJob> = ports
            .iter()
            .map(|&port| PortJob {
                address,
                port,
                probe: probe.clone(),
                services: self.services.clone(),
                grab_banners: self.grab_banners,
            })
            .collect();

        let pool_report = pool.run(jobs, cancel, on_result).await;
        let mut results = pool_report.results;
        results.sort_by_key(|r| r.sort_key());

        PortScanReport {
            address,
            strategy_requested: strategy,
            strategy_used: strategy,
            results,
            notices: Vec::new(),
            submitted: pool_report.submitted,
            not_started: pool_report.not_started,
            cancelled: pool_report.cancelled,
            elapsed: started.elapsed(),
        }
    }

    async fn probe_external<F>(
        &self,
        address: IpAddr,
        ports: &[u16],
        cancel: &CancellationToken,
        mut on_result: F,
    ) -> PortScanReport
    where
        F: FnMut(&ProbeResult),
    {
        let started = Instant::now();

        let (results, not_started) = match self.nmap.scan_ports(address, ports, cancel).await {
            Ok(Some(results)) => (results, 0),
            Ok(None) => (Vec::new(), ports.len()),
            Err(e) => {
                log::warn!("External scan of {} failed: {}", address, e);
                let note = format!("external scanner failed: {}", e);
                let results = ports
                    .iter()
                    .map(|&port| ProbeResult::port(address, port, ProbeState::Unreachable).with_note(note.clone()))
                    .collect();
                (results, 0)
            }
        };

        let mut results: Vec<ProbeResult> = results
            .into_iter()
            .map(|result| self.enrich_external(result))
            .inspect(|result| on_result(result))
            .collect();
        results.sort_by_key(|r| r.sort_key());

        PortScanReport {
            address,
            strategy_requested: ProbeStrategy::External,
            strategy_used: ProbeStrategy::External,
            results,
            notices: Vec::new(),
            submitted: ports.len(),
            not_started,
            cancelled: cancel.is_cancelled(),
            elapsed: started.elapsed(),
        }
    }

    // Table names win over the tool's own service names.
    fn enrich_external(&self, result: ProbeResult) -> ProbeResult {
        if !result.is_open() {
            return result;
        }
        let port = result.port.unwrap_or(0);
        match (self.services.lookup(port), &result.service) {
            (Some(guess), _) => result.with_service(guess),
            (None, Some(_)) => result,
            (None, None) => result.with_service(ServiceGuess::unknown()),
        }
    }

    fn validate_ports(&self, ports: &[u16]) -> crate::Result<Vec<u16>> {
        let ports = if ports.is_empty() {
            self.config.common_ports.clone()
        } else {
            let mut seen = HashSet::new();
            ports.iter().copied().filter(|port| seen.insert(*port)).collect()
        };

        if ports.contains(&0) {
            return Err(ScanError::PortRangeError("port 0 is not a valid probe target".to_string()));
        }
        Ok(ports)
    }

    fn connect_probe(&self) -> Arc<dyn PortProbe> {
        Arc::new(ConnectProbe::new(self.config.connect_timeout_duration()))
    }

    fn syn_probe(&self, address: IpAddr) -> std::result::Result<Arc<dyn PortProbe>, String> {
        if address.is_ipv6() {
            return Err("IPv6 target".to_string());
        }
        SynProbe::new(self.config.connect_timeout_duration())
            .map(|probe| Arc::new(probe) as Arc<dyn PortProbe>)
            .map_err(|e| e.to_string())
    }

    // Banner capture runs inside the job, so its budget extends the deadline.
    fn job_timeout(&self) -> Duration {
        let base = self.config.job_timeout_duration();
        if self.grab_banners {
            base + self.config.connect_timeout_duration() + self.config.banner_timeout_duration()
        } else {
            base
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::net::TcpListener;

    fn scanner() -> PortScanner {
        PortScanner::new(Arc::new(EngineConfig::default()))
    }

    #[tokio::test]
    async fn test_zero_port_rejected_before_probing() {
        let mut seen = 0;
        let result = scanner()
            .probe(
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                &[22, 0],
                ProbeStrategy::Connect,
                &CancellationToken::new(),
                |_| seen += 1,
            )
            .await;
        assert!(matches!(result, Err(ScanError::PortRangeError(_))));
        assert_eq!(seen, 0);
    }

    #[tokio::test]
    async fn test_repeated_port_yields_one_result() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        let mut streamed = 0;
        let report = scanner()
            .probe(
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                &[port, port, port],
                ProbeStrategy::Connect,
                &CancellationToken::new(),
                |_| streamed += 1,
            )
            .await
            .unwrap();

        assert_eq!(report.submitted, 1);
        assert_eq!(report.results.len(), 1);
        assert_eq!(streamed, 1);
        assert_eq!(report.results[0].state, ProbeState::Open);
    }

    #[test]
    fn test_validate_ports_keeps_first_occurrence_order() {
        let ports = scanner().validate_ports(&[443, 22, 443, 80, 22]).unwrap();
        assert_eq!(ports, vec![443, 22, 80]);
    }

    #[tokio::test]
    async fn test_auto_resolves_to_connect_and_sorts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });
        let closed_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let closed = closed_listener.local_addr().unwrap().port();
        drop(closed_listener);

        let report = scanner()
            .probe(
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                &[open.max(closed), open.min(closed)],
                ProbeStrategy::Auto,
                &CancellationToken::new(),
                |_| {},
            )
            .await
            .unwrap();

        assert_eq!(report.strategy_used, ProbeStrategy::Connect);
        assert_eq!(report.results.len(), 2);
        assert!(report.results[0].port < report.results[1].port);

        let open_result = report.results.iter().find(|r| r.port == Some(open)).unwrap();
        assert_eq!(open_result.state, ProbeState::Open);
        assert_eq!(open_result.service, Some(ServiceGuess::unknown()));

        let closed_result = report.results.iter().find(|r| r.port == Some(closed)).unwrap();
        assert_eq!(closed_result.state, ProbeState::Closed);
    }

    #[tokio::test]
    async fn test_syn_without_privilege_is_downgraded_with_notice() {
        if crate::utils::has_raw_socket_privilege() {
            return;
        }

        let report = scanner()
            .probe(
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                &[1],
                ProbeStrategy::Syn,
                &CancellationToken::new(),
                |_| {},
            )
            .await
            .unwrap();

        assert_eq!(report.strategy_requested, ProbeStrategy::Syn);
        assert_eq!(report.strategy_used, ProbeStrategy::Connect);
        assert!(matches!(report.notices.as_slice(), [Notice::PrivilegeDowngraded { .. }]));
    }

    #[tokio::test]
    async fn test_syn_on_ipv6_is_downgraded() {
        let report = scanner()
            .probe(
                "::1".parse().unwrap(),
                &[1],
                ProbeStrategy::Syn,
                &CancellationToken::new(),
                |_| {},
            )
            .await
            .unwrap();

        assert_eq!(report.strategy_used, ProbeStrategy::Connect);
        assert_eq!(report.notices.len(), 1);
    }
}
