//! Sparkline rendering of the sample window

use super::LatencySample;
use serde::Serialize;
use std::time::Duration;

const BARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
const LOSS_MARK: char = '×';

/// Narrowest vertical range of the sparkline, so jitter of a few
/// microseconds does not fill the whole height
const MIN_SPAN: Duration = Duration::from_millis(5);

/// How one sample compares with the window average
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Lost,
    /// Below 80% of the average
    Fast,
    Normal,
    /// Above 120% of the average
    Slow,
}

/// Textual rendering of the most recent samples
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sparkline {
    pub text: String,
    /// One entry per character of `text`
    pub trends: Vec<Trend>,
}

impl Sparkline {
    /// Render the last `width` samples. `avg` comes from the window statistics.
    pub fn render<'a, I>(samples: I, width: usize, avg: Option<Duration>) -> Self
    where
        I: IntoIterator<Item = &'a LatencySample>,
    {
        let samples: Vec<&LatencySample> = samples.into_iter().collect();
        let tail = &samples[samples.len().saturating_sub(width)..];

        let answered = tail.iter().filter_map(|s| s.rtt);
        let low = answered.clone().min().unwrap_or(Duration::ZERO);
        let high = answered.max().unwrap_or(Duration::ZERO);
        let span = (high - low).max(MIN_SPAN).as_secs_f64();

        let mut text = String::with_capacity(tail.len() * 3);
        let mut trends = Vec::with_capacity(tail.len());

        for sample in tail {
            match sample.rtt {
                None => {
                    text.push(LOSS_MARK);
                    trends.push(Trend::Lost);
                }
                Some(rtt) => {
                    let level = ((rtt - low).as_secs_f64() / span * (BARS.len() - 1) as f64).round() as usize;
                    text.push(BARS[level.min(BARS.len() - 1)]);
                    trends.push(trend(rtt, avg));
                }
            }
        }

        Self { text, trends }
    }

    pub fn is_empty(&self) -> bool {
        self.trends.is_empty()
    }
}

fn trend(rtt: Duration, avg: Option<Duration>) -> Trend {
    let Some(avg) = avg else {
        return Trend::Normal;
    };
    let ratio = rtt.as_secs_f64() / avg.as_secs_f64().max(f64::MIN_POSITIVE);
    if ratio < 0.8 {
        Trend::Fast
    } else if ratio < 1.2 {
        Trend::Normal
    } else {
        Trend::Slow
    }
}
