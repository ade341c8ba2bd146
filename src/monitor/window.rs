//! Fixed-capacity sample buffer with session counters

use super::{LatencySample, LatencyStatistics};
use std::collections::VecDeque;
use std::time::Duration;

/// Circular buffer of the most recent samples.
///
/// `total` and `lost` count every sample of the session and survive
/// eviction; min/max/avg only look at what is still buffered.
#[derive(Debug, Clone)]
pub struct SampleWindow {
    capacity: usize,
    samples: VecDeque<LatencySample>,
    total: u64,
    lost: u64,
}

impl SampleWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
            total: 0,
            lost: 0,
        }
    }

    /// Append a sample, evicting the oldest when full, and return the
    /// refreshed statistics
    pub fn push(&mut self, sample: LatencySample) -> LatencyStatistics {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.total += 1;
        if sample.rtt.is_none() {
            self.lost += 1;
        }
        self.samples.push_back(sample);
        self.statistics()
    }

    pub fn statistics(&self) -> LatencyStatistics {
        let mut min: Option<Duration> = None;
        let mut max: Option<Duration> = None;
        let mut sum = Duration::ZERO;
        let mut answered = 0u32;

        for rtt in self.samples.iter().filter_map(|s| s.rtt) {
            min = Some(min.map_or(rtt, |m| m.min(rtt)));
            max = Some(max.map_or(rtt, |m| m.max(rtt)));
            sum += rtt;
            answered += 1;
        }

        LatencyStatistics {
            min_rtt: min,
            max_rtt: max,
            avg_rtt: if answered == 0 { None } else { Some(sum / answered) },
            loss_count: self.lost,
            total_count: self.total,
        }
    }

    pub fn samples(&self) -> impl Iterator<Item = &LatencySample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;

    fn sample(sequence: u64, rtt_ms: Option<u64>) -> LatencySample {
        LatencySample {
            sequence,
            timestamp: Utc::now(),
            rtt: rtt_ms.map(Duration::from_millis),
        }
    }

    #[test]
    fn test_statistics_follow_buffer_contents() {
        let mut window = SampleWindow::new(3);
        window.push(sample(1, Some(100)));
        window.push(sample(2, Some(10)));
        window.push(sample(3, None));
        let stats = window.push(sample(4, Some(20)));

        // The 100 ms sample has been evicted.
        assert_eq!(window.len(), 3);
        assert_eq!(stats.max_rtt, Some(Duration::from_millis(20)));
        assert_eq!(stats.min_rtt, Some(Duration::from_millis(10)));
        assert_eq!(stats.avg_rtt, Some(Duration::from_millis(15)));
        assert_eq!(stats.total_count, 4);
        assert_eq!(stats.loss_count, 1);
    }

    #[test]
    fn test_all_lost_has_no_rtt_figures() {
        let mut window = SampleWindow::new(5);
        let stats = window.push(sample(1, None));
        assert_eq!(stats.min_rtt, None);
        assert_eq!(stats.avg_rtt, None);
        assert!((stats.loss_percent() - 100.0).abs() < f64::EPSILON);
    }

    proptest! {
        #[test]
        fn prop_buffer_bounded_and_counters_monotonic(
            capacity in 1usize..32,
            rtts in prop::collection::vec(prop::option::of(1u64..500), 0..200),
        ) {
            let mut window = SampleWindow::new(capacity);
            let mut previous_total = 0;
            let mut previous_lost = 0;

            for (i, rtt) in rtts.iter().enumerate() {
                let stats = window.push(sample(i as u64 + 1, *rtt));
                prop_assert!(window.len() <= capacity);
                prop_assert!(stats.total_count > previous_total);
                prop_assert!(stats.loss_count >= previous_lost);
                previous_total = stats.total_count;
                previous_lost = stats.loss_count;
            }

            let answered = rtts.iter().filter(|r| r.is_some()).count() as u64;
            let stats = window.statistics();
            prop_assert_eq!(stats.total_count, rtts.len() as u64);
            prop_assert_eq!(stats.total_count - stats.loss_count, answered);
        }
    }
}
