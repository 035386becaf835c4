//! Cross-channel coherence scoring for candidate templates.
//!
//! A genuine event produces waveforms that agree across the network; an
//! incoherent brightness peak (noise, a single-station glitch) does not.
//! The score is the mean absolute zero-lag normalized cross-correlation
//! over every unordered channel pair, bounded in [0, 1] by
//! Cauchy-Schwarz. A candidate template is retained only if its score
//! exceeds the configured coherence threshold.

use crate::stack::ChannelTrace;
use chrono::Timelike;
use tracing::warn;

/// Network coherence of an aligned set of single-channel windows.
///
/// Channels shorter than the longest one are zero-padded to the common
/// length first: a window that starts exactly on a whole-hour boundary
/// is missing its leading samples, so it pads at the front; any other
/// start pads at the back. Fewer than two channels cannot correlate and
/// score 0.
pub fn coherence(traces: &[ChannelTrace]) -> f64 {
    if traces.len() < 2 {
        return 0.0;
    }
    let max_len = traces.iter().map(|tr| tr.data.len()).max().unwrap_or(0);

    let padded: Vec<Vec<f64>> = traces
        .iter()
        .map(|tr| {
            if tr.data.len() == max_len {
                return tr.data.clone();
            }
            warn!(
                station = %tr.station,
                channel = %tr.channel,
                len = tr.data.len(),
                max_len,
                "channel shorter than the template window, padding"
            );
            let missing = max_len - tr.data.len();
            let mut data = Vec::with_capacity(max_len);
            if starts_on_whole_hour(tr) {
                data.extend(std::iter::repeat(0.0).take(missing));
                data.extend_from_slice(&tr.data);
            } else {
                data.extend_from_slice(&tr.data);
                data.extend(std::iter::repeat(0.0).take(missing));
            }
            data
        })
        .collect();

    let n = padded.len();
    let mut total = 0.0;
    for i in 0..n {
        for j in (i + 1)..n {
            total += zero_lag_normxcorr(&padded[i], &padded[j]).abs();
        }
    }
    2.0 * total / (n * (n - 1)) as f64
}

fn starts_on_whole_hour(tr: &ChannelTrace) -> bool {
    tr.start_time.minute() == 0 && tr.start_time.second() == 0 && tr.start_time.nanosecond() == 0
}

/// Normalized cross-correlation of two equal-length series at zero lag.
fn zero_lag_normxcorr(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|y| y * y).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn trace_at(minute: u32, data: Vec<f64>) -> ChannelTrace {
        ChannelTrace {
            station: "AAA".to_string(),
            channel: "SHZ".to_string(),
            start_time: Utc.with_ymd_and_hms(2024, 3, 1, 6, minute, 0).unwrap(),
            sample_rate: 100.0,
            data,
        }
    }

    #[test]
    fn identical_channels_score_the_maximum() {
        let data = vec![0.1, -0.4, 0.9, -0.2, 0.3];
        let traces = vec![trace_at(30, data.clone()), trace_at(30, data)];
        let score = coherence(&traces);
        assert!((score - 1.0).abs() < 1e-12);
    }

    #[test]
    fn orthogonal_channels_score_zero() {
        let traces = vec![
            trace_at(30, vec![1.0, 0.0, 1.0, 0.0]),
            trace_at(30, vec![0.0, 1.0, 0.0, 1.0]),
        ];
        assert_eq!(coherence(&traces), 0.0);
    }

    #[test]
    fn score_is_bounded() {
        let traces = vec![
            trace_at(30, vec![1.0, 2.0, -1.0]),
            trace_at(30, vec![-1.0, 2.0, 0.5]),
            trace_at(30, vec![0.3, -0.3, 0.9]),
        ];
        let score = coherence(&traces);
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn fewer_than_two_channels_scores_zero() {
        assert_eq!(coherence(&[]), 0.0);
        assert_eq!(coherence(&[trace_at(30, vec![1.0, 2.0])]), 0.0);
    }

    #[test]
    fn short_channel_on_whole_hour_pads_front() {
        // Whole-hour start: available samples are the end of the true
        // window, so zeros go in front
        let mut short = trace_at(0, vec![3.0, 4.0]);
        short.start_time = Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap();
        let long = trace_at(30, vec![0.0, 0.0, 3.0, 4.0]);
        let score = coherence(&[short, long]);
        assert!((score - 1.0).abs() < 1e-12);
    }

    #[test]
    fn short_channel_off_hour_pads_back() {
        let short = trace_at(30, vec![3.0, 4.0]);
        let long = trace_at(30, vec![3.0, 4.0, 0.0, 0.0]);
        let score = coherence(&[short, long]);
        assert!((score - 1.0).abs() < 1e-12);
    }
}
