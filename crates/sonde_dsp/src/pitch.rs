//! Harmonic Pitch Detection
//!
//! Sharpens fundamentals by multiplying the spectrum with integer-strided
//! copies of itself (a harmonic product spectrum): bin `i` is multiplied
//! by bins `2i`, `3i`, ... so only frequencies whose overtones are present
//! survive. Local maxima above a fraction of the strongest product are
//! reported, strongest first.

use std::cmp::Ordering;

/// Peaks below this fraction of the strongest product are ignored
pub const PEAK_THRESHOLD: f32 = 0.2;

/// Number of spectrum copies multiplied together (fundamental included)
pub const DEFAULT_HARMONICS: usize = 3;

/// Upper bound for the number of spectrum copies
pub const MAX_HARMONICS: usize = 8;

/// Spectra whose loudest bin is below this are treated as silence
pub const NOISE_FLOOR: f32 = 1e-3;

/// A detected pitch candidate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pitch {
    /// Interpolated frequency in Hz
    pub frequency: f32,
    /// Amplitude of the spectrum at the peak bin
    pub magnitude: f32,
    /// Harmonic product relative to the strongest peak (0.0 - 1.0]
    pub salience: f32,
}

/// Pitch detector with reusable working buffers
#[derive(Debug, Clone)]
pub struct PitchDetector {
    harmonics: usize,
    threshold: f32,
    sharpened: Vec<f32>,
    pitches: Vec<Pitch>,
}

impl Default for PitchDetector {
    fn default() -> Self {
        Self::new(DEFAULT_HARMONICS, PEAK_THRESHOLD)
    }
}

impl PitchDetector {
    pub fn new(harmonics: usize, threshold: f32) -> Self {
        Self {
            harmonics: harmonics.clamp(1, MAX_HARMONICS),
            threshold: threshold.clamp(0.0, 1.0),
            sharpened: Vec::new(),
            pitches: Vec::new(),
        }
    }

    pub fn harmonics(&self) -> usize {
        self.harmonics
    }

    pub fn set_harmonics(&mut self, harmonics: usize) {
        self.harmonics = harmonics.clamp(1, MAX_HARMONICS);
    }

    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold.clamp(0.0, 1.0);
    }

    /// Candidates from the last detection, strongest first
    pub fn pitches(&self) -> &[Pitch] {
        &self.pitches
    }

    /// Strongest candidate from the last detection
    pub fn fundamental(&self) -> Option<Pitch> {
        self.pitches.first().copied()
    }

    /// The harmonic product spectrum from the last detection
    pub fn sharpened(&self) -> &[f32] {
        &self.sharpened
    }

    /// Detect pitches in an amplitude spectrum whose bins are `bin_hz` apart
    pub fn detect(&mut self, magnitudes: &[f32], bin_hz: f32) -> &[Pitch] {
        self.pitches.clear();
        self.sharpened.clear();
        self.sharpened.extend_from_slice(magnitudes);

        let loudest = magnitudes.iter().skip(1).fold(0.0_f32, |acc, &m| acc.max(m));
        if loudest < NOISE_FLOOR || magnitudes.len() < 3 {
            return &self.pitches;
        }

        let len = magnitudes.len();
        for harmonic in 2..=self.harmonics {
            // Bins whose harmonic lies past the spectrum have no product
            let reach = (len - 1) / harmonic + 1;
            for (i, value) in self.sharpened[..reach].iter_mut().enumerate() {
                *value *= magnitudes[i * harmonic];
            }
            self.sharpened[reach..].fill(0.0);
        }

        // DC never carries a pitch
        let strongest = self.sharpened[1..].iter().fold(0.0_f32, |acc, &v| acc.max(v));
        if strongest <= 0.0 {
            return &self.pitches;
        }
        let cutoff = strongest * self.threshold;

        for i in 1..len - 1 {
            let (left, centre, right) = (self.sharpened[i - 1], self.sharpened[i], self.sharpened[i + 1]);
            if centre > left && centre >= right && centre > cutoff {
                // Parabolic interpolation of the peak position
                let curvature = left - 2.0 * centre + right;
                let offset = if curvature.abs() > f32::EPSILON {
                    (0.5 * (left - right) / curvature).clamp(-0.5, 0.5)
                } else {
                    0.0
                };
                self.pitches.push(Pitch {
                    frequency: (i as f32 + offset) * bin_hz,
                    magnitude: magnitudes[i],
                    salience: centre / strongest,
                });
            }
        }

        self.pitches
            .sort_by(|a, b| b.salience.partial_cmp(&a.salience).unwrap_or(Ordering::Equal));
        &self.pitches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spectrum::{SpectrumAnalyzer, WindowShape};

    const RATE: f32 = 48000.0;

    fn harmonic_spectrum(fundamental: f32, partials: &[f32]) -> SpectrumAnalyzer {
        let mut analyzer = SpectrumAnalyzer::with_window_len(RATE, 4096, WindowShape::Hann).unwrap();
        let signal: Vec<f32> = (0..4096)
            .map(|i| {
                let t = i as f32 / RATE;
                partials
                    .iter()
                    .enumerate()
                    .map(|(k, amp)| {
                        amp * (2.0 * std::f32::consts::PI * fundamental * (k + 1) as f32 * t).sin()
                    })
                    .sum::<f32>()
            })
            .collect();
        analyzer.push_interleaved(&signal, 1).unwrap();
        analyzer.analyze();
        analyzer
    }

    #[test]
    fn test_detects_fundamental_of_harmonic_tone() {
        let analyzer = harmonic_spectrum(220.0, &[0.6, 0.3, 0.2]);
        let mut detector = PitchDetector::default();
        detector.detect(analyzer.magnitudes(), analyzer.bin_hz());

        let fundamental = detector.fundamental().expect("a pitch should be found");
        assert!(
            (fundamental.frequency - 220.0).abs() < analyzer.bin_hz(),
            "detected {} Hz",
            fundamental.frequency
        );
        assert_eq!(fundamental.salience, 1.0);
    }

    #[test]
    fn test_sorted_by_salience() {
        let analyzer = harmonic_spectrum(330.0, &[0.5, 0.4, 0.3, 0.2]);
        let mut detector = PitchDetector::new(2, 0.0001);
        let pitches = detector.detect(analyzer.magnitudes(), analyzer.bin_hz());
        assert!(pitches.len() > 1);
        assert!(pitches.windows(2).all(|p| p[0].salience >= p[1].salience));
    }

    #[test]
    fn test_silence_has_no_pitch() {
        let mut detector = PitchDetector::default();
        let silence = vec![0.0_f32; 1025];
        assert!(detector.detect(&silence, 23.4).is_empty());
        assert!(detector.fundamental().is_none());
    }

    #[test]
    fn test_single_harmonic_is_plain_peak_picking() {
        let mut magnitudes = vec![0.0_f32; 64];
        magnitudes[10] = 1.0;
        magnitudes[30] = 0.5;
        magnitudes[50] = 0.1;
        let mut detector = PitchDetector::new(1, PEAK_THRESHOLD);
        let pitches = detector.detect(&magnitudes, 10.0).to_vec();

        // 0.1 is below 20% of the strongest peak
        assert_eq!(pitches.len(), 2);
        assert_eq!(pitches[0].frequency, 100.0);
        assert_eq!(pitches[1].frequency, 300.0);
        assert_eq!(pitches[1].salience, 0.5);
    }

    #[test]
    fn test_peak_at_threshold_is_ignored() {
        let mut magnitudes = vec![0.0_f32; 64];
        magnitudes[10] = 1.0;
        magnitudes[30] = 0.2;
        let mut detector = PitchDetector::new(1, 0.2);
        let pitches = detector.detect(&magnitudes, 10.0);
        assert_eq!(pitches.len(), 1);
        assert_eq!(pitches[0].frequency, 100.0);
    }

    #[test]
    fn test_harmonics_are_bounded() {
        let mut detector = PitchDetector::new(usize::MAX, PEAK_THRESHOLD);
        assert_eq!(detector.harmonics(), MAX_HARMONICS);
        let analyzer = harmonic_spectrum(220.0, &[0.6, 0.3, 0.2]);
        detector.detect(analyzer.magnitudes(), analyzer.bin_hz());
        assert_eq!(detector.sharpened().len(), analyzer.magnitudes().len());

        let mut bounded = PitchDetector::new(MAX_HARMONICS, PEAK_THRESHOLD);
        bounded.detect(analyzer.magnitudes(), analyzer.bin_hz());
        assert_eq!(detector.sharpened(), bounded.sharpened());

        detector.set_harmonics(1_000_000);
        detector.detect(analyzer.magnitudes(), analyzer.bin_hz());
        assert_eq!(detector.sharpened(), bounded.sharpened());
    }

    #[test]
    fn test_products_past_the_spectrum_are_zero() {
        let magnitudes = vec![1.0_f32; 10];
        let mut detector = PitchDetector::new(3, 0.0);
        detector.detect(&magnitudes, 1.0);
        // 3 * 3 = 9 is the last bin with a third harmonic in range
        assert_eq!(&detector.sharpened()[..4], &[1.0; 4]);
        assert_eq!(&detector.sharpened()[4..], &[0.0; 6]);
    }
}
