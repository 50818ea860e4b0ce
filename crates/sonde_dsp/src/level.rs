//! Level conversions and buffer measurements

/// Convert decibels to linear amplitude
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert linear amplitude to decibels (floored at -200dB for silence)
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    20.0 * linear.abs().max(1e-10).log10()
}

/// Largest absolute sample value in a buffer
pub fn peak(buffer: &[f32]) -> f32 {
    buffer.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()))
}

/// Root-mean-square of a buffer (0.0 for an empty buffer)
pub fn rms(buffer: &[f32]) -> f32 {
    if buffer.is_empty() {
        return 0.0;
    }
    let sum: f64 = buffer.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    (sum / buffer.len() as f64).sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_round_trip_points() {
        assert!((db_to_linear(0.0) - 1.0).abs() < 1e-6);
        assert!((db_to_linear(-6.0) - 0.501).abs() < 0.001);
        assert!((linear_to_db(0.5) + 6.02).abs() < 0.01);
    }

    #[test]
    fn test_silence_is_finite() {
        assert!(linear_to_db(0.0).is_finite());
        assert_eq!(rms(&[]), 0.0);
        assert_eq!(peak(&[]), 0.0);
    }

    #[test]
    fn test_sine_rms() {
        let sine: Vec<f32> = (0..4800)
            .map(|i| (2.0 * std::f32::consts::PI * 100.0 * i as f32 / 48000.0).sin())
            .collect();
        assert!((rms(&sine) - std::f32::consts::FRAC_1_SQRT_2).abs() < 0.001);
        assert!((peak(&sine) - 1.0).abs() < 0.001);
    }
}
