//! DC Removal
//!
//! One-pole high-pass per channel:
//!
//! ```text
//! y[n] = x[n] - x[n-1] + POLE * y[n-1]
//! ```
//!
//! Expressed as a first-order section on top of `biquad::DirectForm1`
//! (b0 = 1, b1 = -1, a1 = -POLE), so every channel carries its own
//! x[n-1] / y[n-1] history.

use biquad::{Biquad, Coefficients, DirectForm1};

use crate::error::DspError;

/// Pole of the DC blocker. The filter forgets a DC step with a time
/// constant of roughly `1 / (1 - POLE)` = 10000 samples.
pub const DC_POLE: f32 = 0.9999;

fn dc_coefficients() -> Coefficients<f32> {
    Coefficients {
        a1: -DC_POLE,
        a2: 0.0,
        b0: 1.0,
        b1: -1.0,
        b2: 0.0,
    }
}

/// Multi-channel DC blocker
///
/// Channel filters are grown lazily to match the channel count of the
/// buffers it is fed; existing channel history is preserved when the
/// count grows.
#[derive(Default)]
pub struct DcBlocker {
    filters: Vec<DirectForm1<f32>>,
}

impl DcBlocker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of channels with filter state
    pub fn channels(&self) -> usize {
        self.filters.len()
    }

    /// Filter an interleaved buffer in place
    pub fn process_interleaved(&mut self, buffer: &mut [f32], channels: usize) -> Result<(), DspError> {
        if channels == 0 {
            return Err(DspError::InvalidChannelCount(channels));
        }
        if buffer.len() % channels != 0 {
            return Err(DspError::RaggedBuffer {
                len: buffer.len(),
                channels,
            });
        }

        while self.filters.len() < channels {
            self.filters.push(DirectForm1::<f32>::new(dc_coefficients()));
        }

        for frame in buffer.chunks_exact_mut(channels) {
            for (sample, filter) in frame.iter_mut().zip(self.filters.iter_mut()) {
                *sample = filter.run(*sample);
            }
        }
        Ok(())
    }

    /// Clear the filter history of every channel
    pub fn reset(&mut self) {
        for filter in &mut self.filters {
            filter.reset_state();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_input_decays_to_zero() {
        let mut blocker = DcBlocker::new();
        let mut buffer = vec![1.0_f32; 60_000];
        blocker.process_interleaved(&mut buffer, 1).unwrap();

        // First output passes the step, then decays as POLE^n
        assert!((buffer[0] - 1.0).abs() < 1e-6);
        assert!((buffer[1] - DC_POLE).abs() < 1e-5);

        // About five time constants in, less than 1% of the step is left
        assert!(buffer[50_000].abs() < 0.01, "residual {}", buffer[50_000]);
        assert!(buffer[59_999].abs() < buffer[50_000].abs());
    }

    #[test]
    fn test_channels_are_independent() {
        let mut blocker = DcBlocker::new();
        // Left carries DC, right is silent
        let mut buffer: Vec<f32> = (0..2000).map(|i| if i % 2 == 0 { 0.5 } else { 0.0 }).collect();
        blocker.process_interleaved(&mut buffer, 2).unwrap();

        assert!(buffer.iter().skip(1).step_by(2).all(|&s| s == 0.0));
        assert!(buffer[0] > 0.49);
    }

    #[test]
    fn test_grows_to_channel_count() {
        let mut blocker = DcBlocker::new();
        let mut mono = vec![0.1_f32; 16];
        blocker.process_interleaved(&mut mono, 1).unwrap();
        assert_eq!(blocker.channels(), 1);

        let mut stereo = vec![0.1_f32; 16];
        blocker.process_interleaved(&mut stereo, 2).unwrap();
        assert_eq!(blocker.channels(), 2);
        // Channel 0 kept its history, so its first output is not the raw step
        assert!(stereo[0] < 0.1);
        assert!((stereo[1] - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_ragged_buffer_rejected() {
        let mut blocker = DcBlocker::new();
        let mut buffer = vec![0.0_f32; 5];
        assert_eq!(
            blocker.process_interleaved(&mut buffer, 2),
            Err(DspError::RaggedBuffer { len: 5, channels: 2 })
        );
        assert!(blocker.process_interleaved(&mut buffer, 0).is_err());
    }

    #[test]
    fn test_sine_passes_through() {
        let mut blocker = DcBlocker::new();
        let mut buffer: Vec<f32> = (0..48_000)
            .map(|i| 0.25 + (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / 48000.0).sin() * 0.5)
            .collect();
        blocker.process_interleaved(&mut buffer, 1).unwrap();

        let tail = &buffer[40_000..];
        let mean: f32 = tail.iter().sum::<f32>() / tail.len() as f32;
        assert!(mean.abs() < 0.01, "offset should be removed, mean {}", mean);
        assert!(crate::level::peak(tail) > 0.45, "1kHz content should survive");
    }
}
