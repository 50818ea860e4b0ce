//! Sine Tone Source

use std::f64::consts::TAU;

use crate::command::{Command, FrameSource, Pull, RenderContext};
use crate::error::{RenderError, RenderResult};
use crate::parameter::{Parameter, ParameterSet};
use crate::target::TargetInfo;

const FREQUENCY: usize = 0;
const AMPLITUDE: usize = 1;
const HARMONICS: usize = 2;

/// Sample frames per block unless configured otherwise
pub const DEFAULT_BLOCK: usize = 1024;

/// Constant sine tone, optionally with overtones, for a fixed duration or
/// forever
///
/// Overtone `h` has amplitude `1/h`; the sum is normalized so the peak
/// never exceeds `amplitude`. The same signal is written to every channel.
pub struct ToneSource {
    parameters: ParameterSet,
    duration: Option<f64>,
    block: usize,
}

/// Oscillator phase and stream position for one target
#[derive(Debug, Clone, Default)]
pub struct ToneState {
    phase: f64,
    position: u64,
}

impl ToneState {
    /// Sample frames emitted so far
    pub fn position(&self) -> u64 {
        self.position
    }
}

impl ToneSource {
    /// Tone lasting `duration` seconds (`None` for endless)
    pub fn new(frequency: f32, amplitude: f32, duration: Option<f64>) -> Self {
        let parameters = ParameterSet::new(&[
            Parameter::range("frequency", "Tone frequency in Hz", 20.0, 20000.0, frequency),
            Parameter::range("amplitude", "Peak amplitude", 0.0, 1.0, amplitude),
            Parameter::range("harmonics", "Overtones added above the fundamental", 0.0, 8.0, 0.0),
        ]);
        Self {
            parameters,
            duration,
            block: DEFAULT_BLOCK,
        }
    }

    /// Use blocks of `frames` sample frames
    pub fn with_block(mut self, frames: usize) -> Self {
        self.block = frames.max(1);
        self
    }

    /// Add `count` overtones
    pub fn with_harmonics(self, count: usize) -> Self {
        if let Ok(harmonics) = self.parameters.get(HARMONICS) {
            harmonics.set_value(count as f32);
        }
        self
    }

    pub fn block(&self) -> usize {
        self.block
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    fn total_frames(&self, sample_rate: u32) -> Option<u64> {
        self.duration
            .map(|seconds| (seconds.max(0.0) * sample_rate as f64).round() as u64)
    }
}

impl Command for ToneSource {
    type State = ToneState;

    fn name(&self) -> &'static str {
        "Tone"
    }

    fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    fn create_state(&self, _target: &TargetInfo) -> RenderResult<ToneState> {
        Ok(ToneState::default())
    }
}

impl FrameSource for ToneSource {
    fn frame_rate(&self, target: &TargetInfo) -> f64 {
        target.sample_rate() as f64 / self.block as f64
    }

    fn frame_count(&self, target: &TargetInfo) -> Option<u64> {
        self.total_frames(target.sample_rate())
            .map(|total| (total + self.block as u64 - 1) / self.block as u64)
    }

    fn pull(&self, state: &mut ToneState, cx: &mut RenderContext<'_>) -> RenderResult<Pull> {
        let sample_rate = cx.target().sample_rate();
        let channels = cx.target().channels() as usize;
        if channels == 0 {
            return Err(RenderError::InvalidFrame("target has no channels".into()));
        }

        let frames = match self.total_frames(sample_rate) {
            Some(total) if state.position >= total => return Ok(Pull::EndOfSource),
            Some(total) => (total - state.position).min(self.block as u64) as usize,
            None => self.block,
        };

        let frequency = self.parameters.value(FREQUENCY).max(0.0) as f64;
        let amplitude = self.parameters.value(AMPLITUDE);
        let overtones = self.parameters.value(HARMONICS).round().clamp(0.0, 8.0) as usize;
        let partials = overtones + 1;
        let norm: f32 = (1..=partials).map(|h| 1.0 / h as f32).sum();
        let step = TAU * frequency / sample_rate as f64;

        let frame = cx.frame_mut();
        frame.reset(frames);
        frame.set_timestamp(state.position as f64 / sample_rate as f64);
        for slot in frame.samples_mut().chunks_exact_mut(channels) {
            let mut value = 0.0_f32;
            for h in 1..=partials {
                value += (state.phase * h as f64).sin() as f32 / h as f32;
            }
            slot.fill(amplitude * value / norm);
            state.phase = (state.phase + step) % TAU;
        }
        frame.mark_modified();

        state.position += frames as u64;
        Ok(Pull::Frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Stage;
    use crate::config::{Pacing, TargetConfig};
    use crate::program::RenderProgram;
    use crate::sink::CaptureSink;
    use crate::target::{Cycle, RenderTarget};

    fn target(sample_rate: u32, channels: u16, capture: &CaptureSink) -> RenderTarget {
        let config = TargetConfig {
            sample_rate,
            channels,
            pacing: Pacing::Freewheel,
            ..Default::default()
        };
        RenderTarget::new(config, capture.clone()).unwrap()
    }

    #[test]
    fn test_frame_count() {
        let info = TargetInfo::new("t", 44100, 1);
        let tone = ToneSource::new(440.0, 0.5, Some(1.0)).with_block(1024);
        assert_eq!(tone.frame_count(&info), Some(44));
        assert!((tone.frame_rate(&info) - 44100.0 / 1024.0).abs() < 1e-9);
        assert_eq!(ToneSource::new(440.0, 0.5, None).frame_count(&info), None);
    }

    #[test]
    fn test_renders_exact_duration() {
        let capture = CaptureSink::new();
        let mut target = target(8000, 2, &capture);
        let tone = Stage::source(ToneSource::new(440.0, 0.5, Some(0.25)).with_block(512));
        target.use_program(&Stage::new(RenderProgram::new(&tone)));

        while target.run_one_cycle().unwrap() == Cycle::Rendered {}

        let frames = capture.frames();
        let total: usize = frames.iter().map(|f| f.frames()).sum();
        assert_eq!(total, 2000);
        assert_eq!(frames.last().unwrap().frames(), 2000 - 3 * 512);
        assert!((frames[1].timestamp() - 512.0 / 8000.0).abs() < 1e-12);
        // Channels carry the same signal
        for pair in frames[0].samples().chunks(2) {
            assert_eq!(pair[0], pair[1]);
        }
    }

    #[test]
    fn test_amplitude_and_continuity() {
        let capture = CaptureSink::new();
        let mut target = target(48000, 1, &capture);
        let tone = Stage::source(ToneSource::new(1000.0, 0.5, None).with_block(480));
        target.use_program(&Stage::new(RenderProgram::new(&tone)));

        for _ in 0..4 {
            target.run_one_cycle().unwrap();
        }
        let samples: Vec<f32> = capture.frames().iter().flat_map(|f| f.samples().to_vec()).collect();
        let peak = sonde_dsp::peak(&samples);
        assert!((peak - 0.5).abs() < 0.01, "peak {}", peak);

        // No jump across block boundaries: the largest step is one sample of slope
        let max_step = samples.windows(2).map(|w| (w[1] - w[0]).abs()).fold(0.0, f32::max);
        let slope = 0.5 * std::f32::consts::TAU * 1000.0 / 48000.0;
        assert!(max_step <= slope * 1.01);
    }

    #[test]
    fn test_harmonics_stay_within_amplitude() {
        let capture = CaptureSink::new();
        let mut target = target(48000, 1, &capture);
        let tone = Stage::source(ToneSource::new(200.0, 0.8, None).with_harmonics(4));
        target.use_program(&Stage::new(RenderProgram::new(&tone)));
        target.run_one_cycle().unwrap();

        let peak = sonde_dsp::peak(capture.frames()[0].samples());
        assert!(peak <= 0.8 + 1e-4);
        assert!(peak > 0.4);
    }
}
