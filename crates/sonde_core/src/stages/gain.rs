//! Fixed Gain Stage

use sonde_dsp::db_to_linear;

use crate::command::{Command, RenderCommand, RenderContext};
use crate::error::{ParameterError, RenderResult};
use crate::parameter::{Parameter, ParameterSet};
use crate::target::TargetInfo;

const GAIN: usize = 0;

/// Multiplies every sample by a gain set in dB
pub struct Gain {
    parameters: ParameterSet,
}

impl Gain {
    pub fn new(gain_db: f32) -> Self {
        Self {
            parameters: ParameterSet::new(&[Parameter::range(
                "gain",
                "Gain in dB",
                -60.0,
                24.0,
                gain_db,
            )]),
        }
    }

    pub fn gain_db(&self) -> f32 {
        self.parameters.value(GAIN)
    }

    pub fn set_gain_db(&self, gain_db: f32) -> Result<(), ParameterError> {
        self.parameters.set_value(GAIN, gain_db)
    }
}

impl Command for Gain {
    type State = ();

    fn name(&self) -> &'static str {
        "Gain"
    }

    fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    fn create_state(&self, _target: &TargetInfo) -> RenderResult<()> {
        Ok(())
    }
}

impl RenderCommand for Gain {
    fn run(&self, _state: &mut (), cx: &mut RenderContext<'_>) -> RenderResult<()> {
        let gain_db = self.gain_db();
        if gain_db == 0.0 {
            return Ok(());
        }
        let gain = db_to_linear(gain_db);
        let frame = cx.frame_mut();
        for sample in frame.samples_mut() {
            *sample *= gain;
        }
        frame.mark_modified();
        Ok(())
    }
}
