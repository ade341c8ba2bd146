//! Latency monitor
//!
//! One sequential probe per tick against a single target. Each sample lands
//! in a bounded window, the statistics are recomputed and a render frame is
//! offered to the presentation layer through a bounded channel. A full
//! channel drops the frame; it never delays probing.

pub mod render;
pub mod window;

use crate::config::EngineConfig;
use crate::network::icmp::Pinger;
use crate::network::serialize_latency_ms;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub use render::{Sparkline, Trend};
pub use window::SampleWindow;

/// One probe cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencySample {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    /// `None` on loss or timeout
    #[serde(serialize_with = "serialize_latency_ms")]
    pub rtt: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct LatencyStatistics {
    #[serde(serialize_with = "serialize_latency_ms")]
    pub min_rtt: Option<Duration>,
    #[serde(serialize_with = "serialize_latency_ms")]
    pub max_rtt: Option<Duration>,
    #[serde(serialize_with = "serialize_latency_ms")]
    pub avg_rtt: Option<Duration>,
    pub loss_count: u64,
    pub total_count: u64,
}

impl LatencyStatistics {
    pub fn received(&self) -> u64 {
        self.total_count - self.loss_count
    }

    pub fn loss_percent(&self) -> f64 {
        if self.total_count == 0 {
            return 0.0;
        }
        self.loss_count as f64 * 100.0 / self.total_count as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    Idle,
    Running,
    /// Cancelled by the operator
    Stopped,
    /// Requested sample count reached
    Completed,
}

/// What the presentation layer draws after each tick
#[derive(Debug, Clone, Serialize)]
pub struct RenderFrame {
    pub state: MonitorState,
    pub sample: LatencySample,
    pub statistics: LatencyStatistics,
    pub sparkline: Sparkline,
}

/// Final summary of a monitor session
#[derive(Debug, Clone, Serialize)]
pub struct MonitorReport {
    pub address: IpAddr,
    pub state: MonitorState,
    /// Samples still in the window, oldest first
    pub samples: Vec<LatencySample>,
    pub statistics: LatencyStatistics,
    pub sparkline: Sparkline,
}

impl MonitorReport {
    pub fn sent(&self) -> u64 {
        self.statistics.total_count
    }

    pub fn received(&self) -> u64 {
        self.statistics.received()
    }
}

pub struct LatencyMonitor {
    config: Arc<EngineConfig>,
    pinger: Arc<dyn Pinger>,
    state: MonitorState,
}

impl LatencyMonitor {
    pub fn new(config: Arc<EngineConfig>, pinger: Arc<dyn Pinger>) -> Self {
        Self {
            config,
            pinger,
            state: MonitorState::Idle,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// Probe `address` every `interval` until `count` samples are taken
    /// (0 means until cancelled). Frames go to `frames` when given.
    pub async fn run(
        &mut self,
        address: IpAddr,
        count: u64,
        every: Duration,
        cancel: &CancellationToken,
        frames: Option<mpsc::Sender<RenderFrame>>,
    ) -> MonitorReport {
        let probe_timeout = self.config.ping_timeout_duration();
        let width = self.config.sparkline_width;
        let mut window = SampleWindow::new(self.config.monitor_capacity);

        let mut ticker = interval(every.max(Duration::from_millis(1)));
        // A slow probe pushes the schedule back instead of bunching ticks.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.state = MonitorState::Running;
        log::info!("Monitoring {} with {} every {:?}", address, self.pinger.name(), every);

        let mut sequence = 0u64;
        while count == 0 || sequence < count {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let rtt = tokio::select! {
                _ = cancel.cancelled() => break,
                reply = self.pinger.ping(address, probe_timeout) => match reply {
                    Ok(reply) => reply.map(|r| r.rtt),
                    Err(e) => {
                        log::warn!("Probe of {} failed: {}", address, e);
                        None
                    }
                },
            };

            sequence += 1;
            let sample = LatencySample {
                sequence,
                timestamp: Utc::now(),
                rtt,
            };
            log::debug!("Sample {} from {}: {:?}", sequence, address, rtt);

            let statistics = window.push(sample.clone());
            if count > 0 && sequence == count {
                self.state = MonitorState::Completed;
            }

            if let Some(frames) = &frames {
                let frame = RenderFrame {
                    state: self.state,
                    sample,
                    statistics,
                    sparkline: Sparkline::render(window.samples(), width, statistics.avg_rtt),
                };
                if frames.try_send(frame).is_err() {
                    log::debug!("Render frame {} dropped", sequence);
                }
            }
        }

        if self.state == MonitorState::Running {
            self.state = MonitorState::Stopped;
        }

        let statistics = window.statistics();
        log::info!(
            "Monitor of {} {}: {} sent, {} received, {:.1}% loss",
            address,
            if self.state == MonitorState::Completed { "completed" } else { "stopped" },
            statistics.total_count,
            statistics.received(),
            statistics.loss_percent()
        );

        MonitorReport {
            address,
            state: self.state,
            samples: window.samples().cloned().collect(),
            sparkline: Sparkline::render(window.samples(), width, statistics.avg_rtt),
            statistics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::icmp::PingReply;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Every third probe is lost
    struct Flaky {
        calls: AtomicU64,
    }

    #[async_trait]
    impl Pinger for Flaky {
        async fn ping(&self, _target: IpAddr, _timeout: Duration) -> crate::Result<Option<PingReply>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n % 3 == 0 {
                return Ok(None);
            }
            Ok(Some(PingReply {
                rtt: Duration::from_millis(n * 2),
                ttl: Some(64),
            }))
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    fn monitor() -> LatencyMonitor {
        LatencyMonitor::new(
            Arc::new(EngineConfig::default()),
            Arc::new(Flaky { calls: AtomicU64::new(0) }),
        )
    }

    fn localhost() -> IpAddr {
        "127.0.0.1".parse().unwrap()
    }

    #[tokio::test]
    async fn test_bounded_run_completes_with_exact_count() {
        let mut monitor = monitor();
        assert_eq!(monitor.state(), MonitorState::Idle);

        let report = monitor
            .run(localhost(), 5, Duration::from_millis(5), &CancellationToken::new(), None)
            .await;

        assert_eq!(report.state, MonitorState::Completed);
        assert_eq!(monitor.state(), MonitorState::Completed);
        assert_eq!(report.samples.len(), 5);
        assert_eq!(report.sent(), 5);
        assert_eq!(report.received(), 4);
        let sequences: Vec<u64> = report.samples.iter().map(|s| s.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_frames_are_emitted_per_tick() {
        let (tx, mut rx) = mpsc::channel(16);
        let report = monitor()
            .run(localhost(), 3, Duration::from_millis(5), &CancellationToken::new(), Some(tx))
            .await;

        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].state, MonitorState::Running);
        assert_eq!(frames[2].state, MonitorState::Completed);
        assert_eq!(frames[2].sparkline.text.chars().last(), Some('×'));
        assert_eq!(report.statistics.loss_count, 1);
    }

    #[tokio::test]
    async fn test_cancel_stops_unbounded_run_with_partial_samples() {
        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            stopper.cancel();
        });

        let report = monitor().run(localhost(), 0, Duration::from_millis(10), &cancel, None).await;
        assert_eq!(report.state, MonitorState::Stopped);
        assert!(report.sent() >= 1);
        assert_eq!(report.samples.len() as u64, report.sent());
    }

    #[tokio::test]
    async fn test_full_frame_channel_does_not_stall_probing() {
        let (tx, _rx) = mpsc::channel(1);
        let report = monitor()
            .run(localhost(), 4, Duration::from_millis(2), &CancellationToken::new(), Some(tx))
            .await;
        assert_eq!(report.sent(), 4);
    }
}
