//! Integration tests for the deimos engine

use async_trait::async_trait;
use deimos::intelligence::Provenance;
use deimos::monitor::MonitorState;
use deimos::network::icmp::{PingReply, Pinger};
use deimos::{
    classify, Confidence, EngineConfig, HostDiscovery, LatencyMonitor, OsFamily, PortScanner, ProbeState,
    ProbeStrategy, TargetResolver,
};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Replies with a fixed RTT, except for addresses ending in .255
struct StaticPinger;

#[async_trait]
impl Pinger for StaticPinger {
    async fn ping(&self, target: IpAddr, _timeout: Duration) -> deimos::Result<Option<PingReply>> {
        match target {
            IpAddr::V4(v4) if v4.octets()[3] == 255 => Ok(None),
            _ => Ok(Some(PingReply {
                rtt: Duration::from_millis(3),
                ttl: Some(64),
            })),
        }
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

#[tokio::test]
async fn test_resolve_slash_30_yields_usable_hosts() {
    let resolution = TargetResolver::default().resolve("10.0.0.0/30").await.unwrap();
    assert_eq!(
        resolution.addresses,
        vec![
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
        ]
    );
    assert!(resolution.notices.is_empty());
}

#[tokio::test]
async fn test_sweep_over_resolved_subnet() {
    let config = Arc::new(EngineConfig::default());
    let resolution = TargetResolver::from_config(&config)
        .resolve("192.168.7.248/29")
        .await
        .unwrap();
    assert_eq!(resolution.addresses.len(), 6);

    let discovery = HostDiscovery::new(config, Arc::new(StaticPinger));
    let report = discovery
        .discover(&resolution.addresses, &CancellationToken::new(), |_| {})
        .await;

    assert_eq!(report.requested, 6);
    assert_eq!(report.reachable, resolution.addresses);
    assert!(report.results.iter().all(|r| r.latency == Some(Duration::from_millis(3))));
}

#[tokio::test]
async fn test_connect_probe_on_closed_localhost_port() {
    let port = closed_port().await;
    let scanner = PortScanner::new(Arc::new(EngineConfig::default()));

    let started = std::time::Instant::now();
    let report = scanner
        .probe(LOCALHOST, &[port], ProbeStrategy::Connect, &CancellationToken::new(), |_| {})
        .await
        .unwrap();

    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].state, ProbeState::Closed);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_scan_with_banners_reports_captured_text() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else { break };
            tokio::spawn(async move {
                let _ = socket.write_all(b"220 mail.example ESMTP\r\n").await;
                tokio::time::sleep(Duration::from_millis(500)).await;
            });
        }
    });

    let scanner = PortScanner::new(Arc::new(EngineConfig::default())).with_banners(true);
    let report = scanner
        .probe(LOCALHOST, &[port], ProbeStrategy::Auto, &CancellationToken::new(), |_| {})
        .await
        .unwrap();

    let open: Vec<_> = report.open().collect();
    assert_eq!(open.len(), 1);
    let service = open[0].service.as_ref().unwrap();
    assert_eq!(service.provenance, Provenance::Banner);
    assert_eq!(service.name, "220 mail.example ESMTP\r\n");
}

#[test]
fn test_classify_reference_values() {
    let linux = classify(64, 65535);
    assert_eq!(linux.os_family, OsFamily::Linux);
    assert_eq!(linux.confidence, Confidence::High);

    let unknown = classify(200, 0);
    assert_eq!(unknown.os_family, OsFamily::Unknown);
    assert_eq!(unknown.confidence, Confidence::None);

    let json = serde_json::to_value(&linux).unwrap();
    assert_eq!(json["os_family"], "Linux");
    assert_eq!(json["confidence"], "high");
}

#[tokio::test]
async fn test_monitor_count_five_completes() {
    let mut monitor = LatencyMonitor::new(Arc::new(EngineConfig::default()), Arc::new(StaticPinger));
    let report = monitor
        .run(LOCALHOST, 5, Duration::from_millis(10), &CancellationToken::new(), None)
        .await;

    assert_eq!(report.samples.len(), 5);
    assert_eq!(report.state, MonitorState::Completed);
    assert_eq!(report.statistics.loss_count, 0);
    assert_eq!(report.statistics.avg_rtt, Some(Duration::from_millis(3)));
}

#[tokio::test]
async fn test_monitor_window_evicts_but_counters_persist() {
    let config = EngineConfig {
        monitor_capacity: 4,
        ..EngineConfig::default()
    };
    let mut monitor = LatencyMonitor::new(Arc::new(config), Arc::new(StaticPinger));
    let report = monitor
        .run(LOCALHOST, 10, Duration::from_millis(2), &CancellationToken::new(), None)
        .await;

    assert_eq!(report.samples.len(), 4);
    assert_eq!(report.sent(), 10);
    assert_eq!(report.samples.first().map(|s| s.sequence), Some(7));
}

#[tokio::test]
async fn test_local_inventory_and_dns_lookup() {
    use deimos::network::dns::DnsLookup;
    use deimos::network::interfaces::{address_table, list_interfaces, AddressReport};

    let config = EngineConfig::default();
    let report = DnsLookup::new(&config)
        .without_dig()
        .lookup("localhost", &CancellationToken::new())
        .await
        .unwrap();
    assert!(report.addresses().iter().any(|ip| ip.is_loopback()));

    let interfaces = list_interfaces(true);
    let table = address_table(&interfaces);
    assert!(table.keys().all(|name| interfaces.iter().any(|iface| &iface.name == name)));

    let json = serde_json::to_value(AddressReport::collect()).unwrap();
    assert!(json["interfaces"].is_object());
}
