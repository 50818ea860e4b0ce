//! Spectrum Stage
//!
//! Computes the windowed amplitude spectrum of every frame. Downstream
//! stages read it through a [`StateHandle<SpectrumState>`] taken from the
//! `Fft` stage, so one transform per target serves all of them.

use sonde_dsp::{SpectrumAnalyzer, WindowShape};

use crate::command::{Command, RenderCommand, RenderContext, Stage};
use crate::error::RenderResult;
use crate::parameter::{Parameter, ParameterSet};
use crate::state::StateHandle;
use crate::target::{RenderTarget, TargetInfo};

const WINDOW: usize = 0;
const SHAPE: usize = 1;

/// Shortest and longest analysis windows in milliseconds
const MIN_WINDOW_MS: f32 = 5.0;
const MAX_WINDOW_MS: f32 = 1000.0;

/// Windowed FFT over the most recent `window` milliseconds of audio
pub struct Fft {
    parameters: ParameterSet,
}

impl Fft {
    pub fn new(window_ms: f32, shape: WindowShape) -> Self {
        let names: Vec<&str> = WindowShape::ALL.iter().map(|s| s.name()).collect();
        let shape_index = WindowShape::ALL.iter().position(|s| *s == shape).unwrap_or(0);
        Self {
            parameters: ParameterSet::new(&[
                Parameter::range(
                    "window",
                    "Analysis window in milliseconds",
                    MIN_WINDOW_MS,
                    MAX_WINDOW_MS,
                    window_ms,
                ),
                Parameter::items("shape", "Window function", &names, shape_index),
            ]),
        }
    }

    fn window_ms(&self) -> f32 {
        self.parameters.value(WINDOW).clamp(MIN_WINDOW_MS, MAX_WINDOW_MS)
    }

    fn shape(&self) -> WindowShape {
        let index = self.parameters.value(SHAPE).round().max(0.0) as usize;
        WindowShape::from_index(index).unwrap_or(WindowShape::Hann)
    }

    fn analyzer(&self, sample_rate: u32) -> RenderResult<SpectrumAnalyzer> {
        Ok(SpectrumAnalyzer::new(
            sample_rate as f32,
            self.window_ms() / 1000.0,
            self.shape(),
        )?)
    }
}

/// Spectrum of the latest frame on one target
pub struct SpectrumState {
    analyzer: SpectrumAnalyzer,
    window_ms: f32,
    /// Stream time covered by the latest frame
    interval: f32,
}

impl SpectrumState {
    /// Amplitude spectrum, `fft_size / 2 + 1` bins
    pub fn magnitudes(&self) -> &[f32] {
        self.analyzer.magnitudes()
    }

    pub fn bin_hz(&self) -> f32 {
        self.analyzer.bin_hz()
    }

    pub fn fft_size(&self) -> usize {
        self.analyzer.fft_size()
    }

    pub fn window_len(&self) -> usize {
        self.analyzer.window_len()
    }

    pub fn shape(&self) -> WindowShape {
        self.analyzer.shape()
    }

    /// Seconds between the previous analysis and the latest one
    pub fn interval(&self) -> f32 {
        self.interval
    }

    /// Number of spectra computed; changes whenever a new one is ready
    pub fn analyses(&self) -> u64 {
        self.analyzer.analyses()
    }

    /// Frequency of the strongest bin
    pub fn peak_frequency(&self) -> f32 {
        let peak_bin = self
            .magnitudes()
            .iter()
            .enumerate()
            .fold((0, 0.0_f32), |best, (bin, &m)| if m > best.1 { (bin, m) } else { best })
            .0;
        self.analyzer.frequency_of(peak_bin as f32)
    }
}

impl Command for Fft {
    type State = SpectrumState;

    fn name(&self) -> &'static str {
        "Fft"
    }

    fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    fn create_state(&self, target: &TargetInfo) -> RenderResult<SpectrumState> {
        Ok(SpectrumState {
            analyzer: self.analyzer(target.sample_rate())?,
            window_ms: self.window_ms(),
            interval: 0.0,
        })
    }
}

impl RenderCommand for Fft {
    fn run(&self, state: &mut SpectrumState, cx: &mut RenderContext<'_>) -> RenderResult<()> {
        // Rebuild when the window parameters changed since the last frame
        if self.window_ms() != state.window_ms || self.shape() != state.analyzer.shape() {
            state.analyzer = self.analyzer(cx.target().sample_rate())?;
            state.window_ms = self.window_ms();
        }

        let frame = cx.frame();
        state
            .analyzer
            .push_interleaved(frame.samples(), frame.channels() as usize)?;
        state.analyzer.analyze();
        state.interval = frame.duration() as f32;
        Ok(())
    }
}

impl Stage<Fft> {
    /// Handle for stages that consume this spectrum
    pub fn spectrum(&self) -> StateHandle<SpectrumState> {
        self.state_handle()
    }

    /// Strongest frequency on `target`, if the stage has run there
    pub fn peak_frequency(&self, target: &RenderTarget) -> RenderResult<Option<f32>> {
        self.state_handle()
            .with_target(target, SpectrumState::peak_frequency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Pacing, TargetConfig};
    use crate::program::RenderProgram;
    use crate::sink::NullSink;
    use crate::source::ToneSource;

    fn target() -> RenderTarget {
        let config = TargetConfig {
            sample_rate: 44100,
            channels: 2,
            pacing: Pacing::Freewheel,
            ..Default::default()
        };
        RenderTarget::new(config, NullSink).unwrap()
    }

    #[test]
    fn test_peak_follows_tone() {
        let mut target = target();
        let tone = Stage::source(ToneSource::new(1000.0, 0.5, None));
        let fft = Stage::new(Fft::new(50.0, WindowShape::Hann));
        let program = Stage::new(RenderProgram::new(&tone));
        program.add_last(&fft).unwrap();
        target.use_program(&program);

        for _ in 0..4 {
            target.run_one_cycle().unwrap();
        }
        let peak = fft.peak_frequency(&target).unwrap().unwrap();
        let bin_hz = fft.spectrum().with_target(&target, |s| s.bin_hz()).unwrap().unwrap();
        assert!((peak - 1000.0).abs() <= bin_hz, "peak at {} Hz", peak);
    }

    #[test]
    fn test_rebuilds_on_parameter_change() {
        let mut target = target();
        let tone = Stage::source(ToneSource::new(440.0, 0.5, None));
        let fft = Stage::new(Fft::new(25.0, WindowShape::Hann));
        let program = Stage::new(RenderProgram::new(&tone));
        program.add_last(&fft).unwrap();
        target.use_program(&program);

        target.run_one_cycle().unwrap();
        let spectrum = fft.spectrum();
        assert_eq!(spectrum.with_target(&target, |s| s.fft_size()).unwrap(), Some(2048));

        fft.parameters.set_value(WINDOW, 100.0).unwrap();
        fft.parameters.by_name("shape").unwrap().select("Blackman").unwrap();
        target.run_one_cycle().unwrap();
        assert_eq!(spectrum.with_target(&target, |s| s.fft_size()).unwrap(), Some(8192));
        assert_eq!(
            spectrum.with_target(&target, |s| s.shape()).unwrap(),
            Some(WindowShape::Blackman)
        );
        let interval = spectrum.with_target(&target, |s| s.interval()).unwrap().unwrap();
        assert!((interval - 1024.0 / 44100.0).abs() < 1e-6);
    }
}
