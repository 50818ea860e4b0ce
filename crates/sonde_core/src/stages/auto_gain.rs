//! Automatic Gain Control Stage

use sonde_dsp::AutoGainControl;

use crate::command::{Command, RenderCommand, RenderContext, Stage};
use crate::error::RenderResult;
use crate::parameter::ParameterSet;
use crate::target::{RenderTarget, TargetInfo};

/// Drives the output peak into the [-4 dB, -3 dB] window
///
/// Attack and decay factors depend on the target's sample rate, so each
/// target gets its own [`AutoGainControl`].
#[derive(Default)]
pub struct AutoGain {
    parameters: ParameterSet,
}

impl AutoGain {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Command for AutoGain {
    type State = AutoGainControl;

    fn name(&self) -> &'static str {
        "AutoGain"
    }

    fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    fn create_state(&self, target: &TargetInfo) -> RenderResult<AutoGainControl> {
        Ok(AutoGainControl::new(target.sample_rate() as f32)?)
    }
}

impl RenderCommand for AutoGain {
    fn run(&self, agc: &mut AutoGainControl, cx: &mut RenderContext<'_>) -> RenderResult<()> {
        let frame = cx.frame_mut();
        let channels = frame.channels() as usize;
        agc.process_interleaved(frame.samples_mut(), channels)?;
        frame.mark_modified();
        Ok(())
    }
}

impl Stage<AutoGain> {
    /// Correction gain currently applied on `target`
    pub fn gain(&self, target: &RenderTarget) -> RenderResult<Option<f32>> {
        self.state_handle().with_target(target, AutoGainControl::gain)
    }
}
