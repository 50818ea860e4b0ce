//! In-Memory Clip Source

use std::sync::Arc;

use crate::command::{Command, FrameSource, Pull, RenderContext, Stage};
use crate::error::{RenderError, RenderResult};
use crate::parameter::ParameterSet;
use crate::source::tone::DEFAULT_BLOCK;
use crate::target::{RenderTarget, TargetInfo};

/// Plays an interleaved clip once, in blocks
///
/// Random access: [`Stage::seek`] moves the read position for one target.
/// The clip must already match the target's sample rate and channel count.
pub struct BufferSource {
    parameters: ParameterSet,
    samples: Arc<[f32]>,
    sample_rate: u32,
    channels: u16,
    block: usize,
}

/// Read position for one target, in sample frames
#[derive(Debug, Clone, Default)]
pub struct BufferState {
    position: usize,
}

impl BufferState {
    pub fn position(&self) -> usize {
        self.position
    }
}

impl BufferSource {
    pub fn new(samples: impl Into<Arc<[f32]>>, sample_rate: u32, channels: u16) -> RenderResult<Self> {
        let samples = samples.into();
        if channels == 0 || samples.len() % channels as usize != 0 {
            return Err(RenderError::InvalidFrame(format!(
                "{} samples do not divide into {} channels",
                samples.len(),
                channels
            )));
        }
        Ok(Self {
            parameters: ParameterSet::empty(),
            samples,
            sample_rate,
            channels,
            block: DEFAULT_BLOCK,
        })
    }

    pub fn with_block(mut self, frames: usize) -> Self {
        self.block = frames.max(1);
        self
    }

    /// Clip length in sample frames
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Clip length in seconds
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    fn check_format(&self, target: &TargetInfo) -> RenderResult<()> {
        if target.sample_rate() != self.sample_rate || target.channels() != self.channels {
            return Err(RenderError::command(
                "Buffer",
                format!(
                    "clip is {} Hz / {} ch, target is {} Hz / {} ch",
                    self.sample_rate,
                    self.channels,
                    target.sample_rate(),
                    target.channels()
                ),
            ));
        }
        Ok(())
    }
}

impl Command for BufferSource {
    type State = BufferState;

    fn name(&self) -> &'static str {
        "Buffer"
    }

    fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    fn create_state(&self, target: &TargetInfo) -> RenderResult<BufferState> {
        self.check_format(target)?;
        Ok(BufferState::default())
    }
}

impl FrameSource for BufferSource {
    fn frame_rate(&self, _target: &TargetInfo) -> f64 {
        self.sample_rate as f64 / self.block as f64
    }

    fn frame_count(&self, _target: &TargetInfo) -> Option<u64> {
        Some(((self.frames() + self.block - 1) / self.block) as u64)
    }

    fn pull(&self, state: &mut BufferState, cx: &mut RenderContext<'_>) -> RenderResult<Pull> {
        let total = self.frames();
        if state.position >= total {
            return Ok(Pull::EndOfSource);
        }
        let frames = (total - state.position).min(self.block);
        let channels = self.channels as usize;
        let start = state.position * channels;
        let end = start + frames * channels;

        let frame = cx.frame_mut();
        frame.copy_from(&self.samples[start..end]);
        frame.set_timestamp(state.position as f64 / self.sample_rate as f64);
        frame.mark_modified();

        state.position += frames;
        Ok(Pull::Frame)
    }
}

impl Stage<BufferSource> {
    /// Move the read position on `target` to `seconds` (clamped to the clip)
    pub fn seek(&self, target: &RenderTarget, seconds: f64) -> RenderResult<()> {
        let frame = (seconds.max(0.0) * self.sample_rate as f64).round() as usize;
        let frame = frame.min(self.frames());
        target.with_state_mut(self.handle(), |state: &mut BufferState| {
            state.position = frame;
        })
    }

    /// Read position on `target` in seconds, if the clip has played there
    pub fn position(&self, target: &RenderTarget) -> RenderResult<Option<f64>> {
        let sample_rate = self.sample_rate as f64;
        self.state_handle()
            .with_target(target, |state| state.position as f64 / sample_rate)
    }
}
