//! Windowed FFT Spectrum
//!
//! Keeps a mono history of the most recent `window_len` samples and
//! turns it into an amplitude spectrum on demand.
//!
//! # Architecture
//!
//! The analysis window is measured in seconds, so its length in samples
//! depends on the sample rate. The FFT itself runs at the next power of
//! two (zero-padded), which interpolates the spectrum and keeps rustfft on
//! its fastest path. Magnitudes are normalised by the window sum, so a
//! sine of amplitude `A` sitting on a bin reads as `A`.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::error::DspError;

/// Window function applied before the FFT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowShape {
    Hann,
    Hamming,
    Blackman,
    Rectangular,
}

impl WindowShape {
    /// All shapes, in parameter item order
    pub const ALL: [WindowShape; 4] = [
        WindowShape::Hann,
        WindowShape::Hamming,
        WindowShape::Blackman,
        WindowShape::Rectangular,
    ];

    pub fn name(self) -> &'static str {
        match self {
            WindowShape::Hann => "Hann",
            WindowShape::Hamming => "Hamming",
            WindowShape::Blackman => "Blackman",
            WindowShape::Rectangular => "Rectangular",
        }
    }

    /// Look a shape up by its position in [`WindowShape::ALL`]
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Window coefficient `n` of a window `size` samples long
    pub fn coefficient(self, n: usize, size: usize) -> f32 {
        let x = 2.0 * std::f32::consts::PI * n as f32 / (size - 1) as f32;
        match self {
            WindowShape::Hann => 0.5 * (1.0 - x.cos()),
            WindowShape::Hamming => 0.54 - 0.46 * x.cos(),
            WindowShape::Blackman => 0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos(),
            WindowShape::Rectangular => 1.0,
        }
    }
}

/// Spectrum analyzer over a sliding mono window
pub struct SpectrumAnalyzer {
    sample_rate: f32,
    shape: WindowShape,
    /// Ring buffer of the most recent mono samples
    history: Vec<f32>,
    write_pos: usize,
    /// Pre-computed window coefficients and their sum
    window: Vec<f32>,
    window_sum: f32,
    fft: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    /// Amplitude spectrum, `fft_size / 2 + 1` bins
    magnitudes: Vec<f32>,
    analyses: u64,
}

impl SpectrumAnalyzer {
    /// Create an analyzer whose window spans `window_seconds`
    pub fn new(sample_rate: f32, window_seconds: f32, shape: WindowShape) -> Result<Self, DspError> {
        if !(sample_rate > 0.0) || !sample_rate.is_finite() {
            return Err(DspError::InvalidSampleRate(sample_rate));
        }
        let window_len = (window_seconds * sample_rate).round().max(0.0) as usize;
        Self::with_window_len(sample_rate, window_len, shape)
    }

    /// Create an analyzer with an explicit window length in samples
    pub fn with_window_len(sample_rate: f32, window_len: usize, shape: WindowShape) -> Result<Self, DspError> {
        if !(sample_rate > 0.0) || !sample_rate.is_finite() {
            return Err(DspError::InvalidSampleRate(sample_rate));
        }
        if window_len < 2 {
            return Err(DspError::InvalidWindow(window_len));
        }

        let fft_size = window_len.next_power_of_two();
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);
        let scratch_len = fft.get_inplace_scratch_len();

        let window: Vec<f32> = (0..window_len).map(|n| shape.coefficient(n, window_len)).collect();
        let window_sum = window.iter().sum::<f32>().max(f32::EPSILON);

        Ok(Self {
            sample_rate,
            shape,
            history: vec![0.0; window_len],
            write_pos: 0,
            window,
            window_sum,
            fft,
            buffer: vec![Complex::new(0.0, 0.0); fft_size],
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            magnitudes: vec![0.0; fft_size / 2 + 1],
            analyses: 0,
        })
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn shape(&self) -> WindowShape {
        self.shape
    }

    /// Number of real samples in the analysis window
    pub fn window_len(&self) -> usize {
        self.history.len()
    }

    /// Transform length (window zero-padded to a power of two)
    pub fn fft_size(&self) -> usize {
        self.buffer.len()
    }

    /// Frequency spacing of adjacent bins in Hz
    pub fn bin_hz(&self) -> f32 {
        self.sample_rate / self.fft_size() as f32
    }

    /// Centre frequency of a (possibly fractional) bin
    pub fn frequency_of(&self, bin: f32) -> f32 {
        bin * self.bin_hz()
    }

    /// Fractional bin for a frequency
    pub fn bin_of(&self, frequency: f32) -> f32 {
        frequency / self.bin_hz()
    }

    /// Amplitude spectrum from the last [`analyze`](Self::analyze)
    pub fn magnitudes(&self) -> &[f32] {
        &self.magnitudes
    }

    /// How many times the spectrum has been computed
    pub fn analyses(&self) -> u64 {
        self.analyses
    }

    /// Mix an interleaved buffer to mono and append it to the history
    pub fn push_interleaved(&mut self, buffer: &[f32], channels: usize) -> Result<(), DspError> {
        if channels == 0 {
            return Err(DspError::InvalidChannelCount(channels));
        }
        if buffer.len() % channels != 0 {
            return Err(DspError::RaggedBuffer {
                len: buffer.len(),
                channels,
            });
        }

        let scale = 1.0 / channels as f32;
        let len = self.history.len();
        for frame in buffer.chunks_exact(channels) {
            self.history[self.write_pos] = frame.iter().sum::<f32>() * scale;
            self.write_pos = (self.write_pos + 1) % len;
        }
        Ok(())
    }

    /// Window the history (oldest sample first) and compute magnitudes
    pub fn analyze(&mut self) {
        let len = self.history.len();
        for i in 0..len {
            let sample = self.history[(self.write_pos + i) % len];
            self.buffer[i] = Complex::new(sample * self.window[i], 0.0);
        }
        for slot in &mut self.buffer[len..] {
            *slot = Complex::new(0.0, 0.0);
        }

        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        let last = self.magnitudes.len() - 1;
        let norm = 1.0 / self.window_sum;
        for (bin, magnitude) in self.magnitudes.iter_mut().enumerate() {
            // DC and Nyquist have no mirrored half to fold in
            let fold = if bin == 0 || bin == last { 1.0 } else { 2.0 };
            *magnitude = self.buffer[bin].norm() * norm * fold;
        }
        self.analyses += 1;
    }

    /// Clear the history and the last spectrum
    pub fn reset(&mut self) {
        self.history.iter_mut().for_each(|s| *s = 0.0);
        self.magnitudes.iter_mut().for_each(|m| *m = 0.0);
        self.write_pos = 0;
        self.analyses = 0;
    }
}
