//! Pitch Detection Stage

use sonde_dsp::{Pitch, DEFAULT_HARMONICS, MAX_HARMONICS, PEAK_THRESHOLD};

use crate::command::{Command, RenderCommand, RenderContext, Stage};
use crate::error::RenderResult;
use crate::parameter::{Parameter, ParameterSet};
use crate::stages::fft::{Fft, SpectrumState};
use crate::state::StateHandle;
use crate::target::{RenderTarget, TargetInfo};

const THRESHOLD: usize = 0;
const HARMONICS: usize = 1;

/// Harmonic-product pitch detection on the spectrum of an [`Fft`] stage
pub struct PitchDetector {
    parameters: ParameterSet,
    spectrum: StateHandle<SpectrumState>,
}

impl PitchDetector {
    pub fn new(fft: &Stage<Fft>) -> Self {
        Self {
            parameters: ParameterSet::new(&[
                Parameter::range(
                    "threshold",
                    "Peaks below this fraction of the strongest are ignored",
                    0.0,
                    1.0,
                    PEAK_THRESHOLD,
                ),
                Parameter::range(
                    "harmonics",
                    "Spectrum copies multiplied together",
                    1.0,
                    MAX_HARMONICS as f32,
                    DEFAULT_HARMONICS as f32,
                ),
            ]),
            spectrum: fft.spectrum(),
        }
    }
}

/// Pitch candidates for one target
#[derive(Debug, Default)]
pub struct PitchState {
    detector: sonde_dsp::PitchDetector,
    last_analysis: Option<u64>,
}

impl PitchState {
    /// Candidates from the latest spectrum, strongest first
    pub fn pitches(&self) -> &[Pitch] {
        self.detector.pitches()
    }

    pub fn fundamental(&self) -> Option<Pitch> {
        self.detector.fundamental()
    }
}

impl Command for PitchDetector {
    type State = PitchState;

    fn name(&self) -> &'static str {
        "PitchDetector"
    }

    fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    fn create_state(&self, _target: &TargetInfo) -> RenderResult<PitchState> {
        Ok(PitchState::default())
    }
}

impl RenderCommand for PitchDetector {
    fn run(&self, state: &mut PitchState, cx: &mut RenderContext<'_>) -> RenderResult<()> {
        state.detector.set_threshold(self.parameters.value(THRESHOLD));
        let harmonics = self.parameters.value(HARMONICS).round();
        state
            .detector
            .set_harmonics(harmonics.clamp(1.0, MAX_HARMONICS as f32) as usize);

        self.spectrum.with(cx, |spectrum| {
            if state.last_analysis != Some(spectrum.analyses()) {
                state.last_analysis = Some(spectrum.analyses());
                state.detector.detect(spectrum.magnitudes(), spectrum.bin_hz());
            }
        })
    }
}

impl Stage<PitchDetector> {
    /// Strongest pitch on `target`
    pub fn fundamental(&self, target: &RenderTarget) -> RenderResult<Option<Pitch>> {
        Ok(self
            .state_handle()
            .with_target(target, PitchState::fundamental)?
            .flatten())
    }

    /// Every candidate on `target`, strongest first
    pub fn pitches(&self, target: &RenderTarget) -> RenderResult<Vec<Pitch>> {
        Ok(self
            .state_handle()
            .with_target(target, |state| state.pitches().to_vec())?
            .unwrap_or_default())
    }
}
