//! Lag-shifted, clipped, RMS-normalized energy envelope for one channel.

/// Square a channel into an energy envelope with the station lag applied.
///
/// The series is shifted backward by `lag_secs`: the envelope at sample
/// `t` is the squared amplitude at sample `t + lag`, with zeros filling
/// the tail once the shift runs off the end of the data. Envelope values
/// are then capped at `clip_level × mean(envelope)` and the result is
/// divided by its own RMS.
///
/// An all-zero channel stays all-zero (no normalization by a zero RMS).
pub(crate) fn lag_shifted_energy(
    data: &[f64],
    lag_secs: f64,
    sample_rate: f64,
    clip_level: f64,
) -> Vec<f64> {
    let n = data.len();
    let shift = (lag_secs * sample_rate).round() as usize;

    let mut envelope: Vec<f64> = (0..n)
        .map(|t| match data.get(t + shift) {
            Some(&v) => v * v,
            None => 0.0,
        })
        .collect();

    if n == 0 {
        return envelope;
    }

    // Cap transient spikes at a multiple of the mean energy
    let mean = envelope.iter().sum::<f64>() / n as f64;
    let ceiling = clip_level * mean;
    for v in envelope.iter_mut() {
        if *v > ceiling {
            *v = ceiling;
        }
    }

    // Normalize by RMS so amplitude scale alone cannot dominate the stack
    let rms = (envelope.iter().map(|v| v * v).sum::<f64>() / n as f64).sqrt();
    if rms > 0.0 {
        for v in envelope.iter_mut() {
            *v /= rms;
        }
    }
    envelope
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shift_fills_tail_with_zeros() {
        let env = lag_shifted_energy(&[1.0, 2.0, 3.0, 4.0], 2.0, 1.0, f64::MAX);
        assert_eq!(env.len(), 4);
        assert_eq!(env[2], 0.0);
        assert_eq!(env[3], 0.0);
        assert!(env[0] > 0.0 && env[1] > 0.0);
    }

    #[test]
    fn fractional_lag_rounds_to_nearest_sample() {
        // 0.6 s at 10 Hz = 6 samples
        let mut data = vec![0.0; 20];
        data[6] = 1.0;
        let env = lag_shifted_energy(&data, 0.6, 10.0, f64::MAX);
        assert!(env[0] > 0.0);
        assert_eq!(env.iter().filter(|&&v| v > 0.0).count(), 1);
    }

    #[test]
    fn all_zero_channel_stays_zero() {
        let env = lag_shifted_energy(&[0.0; 8], 0.0, 1.0, 10.0);
        assert!(env.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn output_rms_is_unity_after_normalization() {
        let env = lag_shifted_energy(&[1.0, -2.0, 3.0, -1.0, 2.0], 0.0, 1.0, f64::MAX);
        let rms = (env.iter().map(|v| v * v).sum::<f64>() / env.len() as f64).sqrt();
        assert!((rms - 1.0).abs() < 1e-12);
    }
}
