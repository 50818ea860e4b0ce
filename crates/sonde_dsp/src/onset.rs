//! Spectral Flux Onset Detection
//!
//! Flux is the summed rise of every spectrum bin since the previous
//! analysis. An onset fires when the flux exceeds the recent mean by
//! `sensitivity` standard deviations (and an absolute floor), no sooner
//! than `REFRACTORY_TIME` after the previous onset.

use std::collections::VecDeque;

/// Flux history length used for the adaptive threshold
pub const FLUX_HISTORY: usize = 43;
/// Default number of standard deviations above the mean
pub const DEFAULT_SENSITIVITY: f32 = 1.5;
/// Flux below this never counts as an onset
pub const MIN_FLUX: f32 = 0.01;
/// Minimum spacing between two onsets, in seconds
pub const REFRACTORY_TIME: f32 = 0.1;

/// Onset detector state
#[derive(Debug, Clone)]
pub struct OnsetDetector {
    previous: Vec<f32>,
    history: VecDeque<f32>,
    sensitivity: f32,
    since_onset: f32,
    flux: f32,
    onsets: u64,
    is_onset: bool,
}

impl Default for OnsetDetector {
    fn default() -> Self {
        Self::new(DEFAULT_SENSITIVITY)
    }
}

impl OnsetDetector {
    pub fn new(sensitivity: f32) -> Self {
        Self {
            previous: Vec::new(),
            history: VecDeque::with_capacity(FLUX_HISTORY),
            sensitivity: sensitivity.max(0.0),
            since_onset: f32::INFINITY,
            flux: 0.0,
            onsets: 0,
            is_onset: false,
        }
    }

    pub fn set_sensitivity(&mut self, sensitivity: f32) {
        self.sensitivity = sensitivity.max(0.0);
    }

    /// Flux measured by the last call to [`process`](Self::process)
    pub fn flux(&self) -> f32 {
        self.flux
    }

    /// Whether the last processed spectrum was an onset
    pub fn is_onset(&self) -> bool {
        self.is_onset
    }

    /// Total onsets detected so far
    pub fn onsets(&self) -> u64 {
        self.onsets
    }

    /// Feed the next amplitude spectrum, `interval` seconds after the last
    pub fn process(&mut self, magnitudes: &[f32], interval: f32) -> bool {
        if self.previous.len() != magnitudes.len() {
            self.previous.clear();
            self.previous.resize(magnitudes.len(), 0.0);
        }

        self.flux = magnitudes
            .iter()
            .zip(self.previous.iter())
            .map(|(now, before)| (now - before).max(0.0))
            .sum();
        self.previous.copy_from_slice(magnitudes);
        self.since_onset += interval.max(0.0);

        let threshold = self.threshold();
        self.is_onset =
            self.flux > MIN_FLUX && self.flux > threshold && self.since_onset >= REFRACTORY_TIME;
        if self.is_onset {
            self.onsets += 1;
            self.since_onset = 0.0;
        }

        if self.history.len() == FLUX_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(self.flux);
        self.is_onset
    }

    /// Adaptive threshold from the flux history (mean + k * stddev)
    fn threshold(&self) -> f32 {
        if self.history.is_empty() {
            return 0.0;
        }
        let n = self.history.len() as f32;
        let mean = self.history.iter().sum::<f32>() / n;
        let variance = self.history.iter().map(|f| (f - mean) * (f - mean)).sum::<f32>() / n;
        mean + self.sensitivity * variance.sqrt()
    }

    pub fn reset(&mut self) {
        self.previous.clear();
        self.history.clear();
        self.since_onset = f32::INFINITY;
        self.flux = 0.0;
        self.onsets = 0;
        self.is_onset = false;
    }
}
