//! DC Removal Stage

use sonde_dsp::DcBlocker;

use crate::command::{Command, RenderCommand, RenderContext};
use crate::error::RenderResult;
use crate::parameter::ParameterSet;
use crate::target::TargetInfo;

/// Removes DC offset with a one-pole high-pass per channel
#[derive(Default)]
pub struct DcRemove {
    parameters: ParameterSet,
}

impl DcRemove {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Command for DcRemove {
    type State = DcBlocker;

    fn name(&self) -> &'static str {
        "DcRemove"
    }

    fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    fn create_state(&self, _target: &TargetInfo) -> RenderResult<DcBlocker> {
        Ok(DcBlocker::new())
    }
}

impl RenderCommand for DcRemove {
    fn run(&self, blocker: &mut DcBlocker, cx: &mut RenderContext<'_>) -> RenderResult<()> {
        let frame = cx.frame_mut();
        let channels = frame.channels() as usize;
        blocker.process_interleaved(frame.samples_mut(), channels)?;
        frame.mark_modified();
        Ok(())
    }
}
