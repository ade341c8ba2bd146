//! Probe strategy tests driven through mock probes

use async_trait::async_trait;
use deimos::scanner::{ConnectProbe, PortProbe};
use deimos::{EngineConfig, PortScanner, ProbeResult, ProbeState, ProbeStrategy};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const TARGET: IpAddr = IpAddr::V4(Ipv4Addr::new(198, 51, 100, 7));

/// Deterministic network: ports divisible by 10 are open, odd ports closed,
/// the rest filtered.
struct ModelNetwork {
    delay: Duration,
    calls: AtomicUsize,
}

impl ModelNetwork {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PortProbe for ModelNetwork {
    async fn probe(&self, address: IpAddr, port: u16) -> ProbeResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let state = if port % 10 == 0 {
            ProbeState::Open
        } else if port % 2 == 1 {
            ProbeState::Closed
        } else {
            ProbeState::Filtered
        };
        ProbeResult::port(address, port, state).with_latency(self.delay)
    }

    fn name(&self) -> &'static str {
        "model"
    }
}

fn scanner() -> PortScanner {
    PortScanner::new(Arc::new(EngineConfig::default()))
}

#[tokio::test]
async fn test_repeated_probes_agree() {
    let ports: Vec<u16> = (1..=60).collect();
    let probe: Arc<dyn PortProbe> = Arc::new(ModelNetwork::new(Duration::from_millis(1)));
    let cancel = CancellationToken::new();

    let connect = ProbeStrategy::Connect;
    let first = scanner().probe_with(TARGET, &ports, probe.clone(), connect, 8, &cancel, |_| {}).await;
    let second = scanner().probe_with(TARGET, &ports, probe, connect, 8, &cancel, |_| {}).await;

    let states = |r: &deimos::PortScanReport| r.results.iter().map(|p| (p.port, p.state)).collect::<Vec<_>>();
    assert_eq!(states(&first), states(&second));
    assert_eq!(first.count(ProbeState::Open), 6);
}

#[tokio::test]
async fn test_custom_technique_reports_given_strategy() {
    let probe: Arc<dyn PortProbe> = Arc::new(ModelNetwork::new(Duration::ZERO));
    let report = scanner()
        .probe_with(TARGET, &[10, 11], probe, ProbeStrategy::Syn, 2, &CancellationToken::new(), |_| {})
        .await;

    assert_eq!(report.strategy_requested, ProbeStrategy::Syn);
    assert_eq!(report.strategy_used, ProbeStrategy::Syn);
    assert!(report.notices.is_empty());
}

#[tokio::test]
async fn test_open_results_carry_table_names() {
    let probe: Arc<dyn PortProbe> = Arc::new(ModelNetwork::new(Duration::ZERO));
    let report = scanner()
        .probe_with(TARGET, &[80, 3389, 8080, 1230], probe, ProbeStrategy::Connect, 4, &CancellationToken::new(), |_| {})
        .await;

    let services: Vec<(u16, String)> = report
        .open()
        .map(|r| (r.port.unwrap(), r.service.as_ref().unwrap().name.clone()))
        .collect();
    assert_eq!(
        services,
        vec![
            (80, "HTTP".to_string()),
            (1230, "unknown".to_string()),
            (8080, "HTTP-ALT".to_string()),
        ]
    );
    // 3389 is odd, so closed in the model, and gets no service.
    let rdp = report.results.iter().find(|r| r.port == Some(3389)).unwrap();
    assert_eq!(rdp.state, ProbeState::Closed);
    assert!(rdp.service.is_none());
}

#[tokio::test]
async fn test_cancellation_keeps_partial_results() {
    let ports: Vec<u16> = (1..=200).collect();
    let network = Arc::new(ModelNetwork::new(Duration::from_millis(20)));
    let probe: Arc<dyn PortProbe> = network.clone();
    let cancel = CancellationToken::new();

    let stopper = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(70)).await;
        stopper.cancel();
    });

    let mut streamed = 0;
    let report = scanner()
        .probe_with(TARGET, &ports, probe, ProbeStrategy::Connect, 4, &cancel, |_| streamed += 1)
        .await;

    assert!(report.cancelled);
    assert!(report.not_started > 0);
    assert_eq!(report.results.len() + report.not_started, report.submitted);
    assert_eq!(report.results.len(), streamed);
    assert_eq!(network.calls.load(Ordering::SeqCst), report.results.len());
}

#[tokio::test]
async fn test_slow_probe_times_out_without_stalling_the_scan() {
    let config = EngineConfig {
        job_timeout: 50,
        ..EngineConfig::default()
    };
    let scanner = PortScanner::new(Arc::new(config));
    let probe: Arc<dyn PortProbe> = Arc::new(ModelNetwork::new(Duration::from_secs(5)));

    let started = std::time::Instant::now();
    let report = scanner
        .probe_with(TARGET, &[10, 20, 30], probe, ProbeStrategy::Connect, 3, &CancellationToken::new(), |_| {})
        .await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(report.count(ProbeState::Timeout), 3);
}

#[tokio::test]
async fn test_connect_probe_against_listener() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let _ = listener.accept().await;
        }
    });

    let probe = ConnectProbe::new(Duration::from_millis(500));
    let result = probe.probe(IpAddr::V4(Ipv4Addr::LOCALHOST), port).await;
    assert_eq!(result.state, ProbeState::Open);
    assert!(result.latency.is_some());
}

#[tokio::test]
async fn test_external_strategy_without_tool_falls_back() {
    let config = EngineConfig {
        nmap_path: "/nonexistent/nmap".to_string(),
        ..EngineConfig::default()
    };
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let report = PortScanner::new(Arc::new(config))
        .probe(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            &[port],
            ProbeStrategy::External,
            &CancellationToken::new(),
            |_| {},
        )
        .await
        .unwrap();

    assert_eq!(report.strategy_requested, ProbeStrategy::External);
    assert_eq!(report.strategy_used, ProbeStrategy::Connect);
    assert_eq!(report.results[0].state, ProbeState::Closed);
}
