//! Onset Detection Stage

use sonde_dsp::DEFAULT_SENSITIVITY;

use crate::command::{Command, RenderCommand, RenderContext, Stage};
use crate::error::RenderResult;
use crate::parameter::{Parameter, ParameterSet};
use crate::stages::fft::{Fft, SpectrumState};
use crate::state::StateHandle;
use crate::target::{RenderTarget, TargetInfo};

const SENSITIVITY: usize = 0;

/// Spectral-flux onset detection on the spectrum of an [`Fft`] stage
pub struct OnsetDetector {
    parameters: ParameterSet,
    spectrum: StateHandle<SpectrumState>,
}

impl OnsetDetector {
    pub fn new(fft: &Stage<Fft>) -> Self {
        Self {
            parameters: ParameterSet::new(&[Parameter::range(
                "sensitivity",
                "Standard deviations above the mean flux",
                0.0,
                5.0,
                DEFAULT_SENSITIVITY,
            )]),
            spectrum: fft.spectrum(),
        }
    }
}

/// Flux history for one target
#[derive(Debug, Default)]
pub struct OnsetState {
    detector: sonde_dsp::OnsetDetector,
    last_analysis: Option<u64>,
}

impl OnsetState {
    pub fn is_onset(&self) -> bool {
        self.detector.is_onset()
    }

    pub fn onsets(&self) -> u64 {
        self.detector.onsets()
    }

    pub fn flux(&self) -> f32 {
        self.detector.flux()
    }
}

impl Command for OnsetDetector {
    type State = OnsetState;

    fn name(&self) -> &'static str {
        "OnsetDetector"
    }

    fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    fn create_state(&self, _target: &TargetInfo) -> RenderResult<OnsetState> {
        Ok(OnsetState::default())
    }
}

impl RenderCommand for OnsetDetector {
    fn run(&self, state: &mut OnsetState, cx: &mut RenderContext<'_>) -> RenderResult<()> {
        state.detector.set_sensitivity(self.parameters.value(SENSITIVITY));
        self.spectrum.with(cx, |spectrum| {
            if state.last_analysis != Some(spectrum.analyses()) {
                state.last_analysis = Some(spectrum.analyses());
                state.detector.process(spectrum.magnitudes(), spectrum.interval());
            }
        })
    }
}

impl Stage<OnsetDetector> {
    /// Onsets detected on `target` so far
    pub fn onsets(&self, target: &RenderTarget) -> RenderResult<u64> {
        Ok(self
            .state_handle()
            .with_target(target, OnsetState::onsets)?
            .unwrap_or(0))
    }

    /// Whether the latest frame on `target` started an onset
    pub fn is_onset(&self, target: &RenderTarget) -> RenderResult<bool> {
        Ok(self
            .state_handle()
            .with_target(target, OnsetState::is_onset)?
            .unwrap_or(false))
    }
}
