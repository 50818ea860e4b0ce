//! Sonde Core - Render Engine
//!
//! This crate provides the pull-based render pipeline for Sonde, including:
//! - Commands: named stages with their own parameters and per-target state
//! - Render programs: ordered, atomically published lists of commands
//! - Render targets: a dedicated thread pacing frames into a sink
//! - Sources and analysis stages (tone, clip, FFT, bands, pitch, onsets)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Control Thread                         │
//! │  RenderProgram::add_last/remove ──▶ ArcSwap<Vec<Command>>   │
//! │  Parameter::set_value ──▶ AtomicU32                         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ snapshot per cycle
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Render Thread (per target)                  │
//! │   Source ──▶ Stage ──▶ Stage ──▶ ... ──▶ FrameSink          │
//! │     │          │         │                  │               │
//! │     └──────────┴─ StateCache (per target) ──┘               │
//! │   sleep_until(frame end) ◀── stop channel                   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ crossbeam-channel per subscriber
//!                              ▼
//!                      EventReceiver (drops oldest when full)
//! ```
//!
//! The same command may appear in programs used by several targets at
//! once; each target keeps its own copy of the command's state.

mod command;
mod config;
#[cfg(feature = "device")]
mod device;
mod error;
mod frame;
mod message;
mod parameter;
mod program;
mod sink;
mod source;
mod stages;
mod state;
mod target;

pub use command::{
    Command, CommandHandle, CommandId, FrameSource, Pull, RenderCommand, RenderContext, Stage,
};
pub use config::{Pacing, RenderPriority, TargetConfig};
#[cfg(feature = "device")]
pub use device::{DeviceOutput, OutputDevice};
pub use error::{ParameterError, RenderError, RenderResult};
pub use frame::Frame;
pub use message::{EventReceiver, TargetEvent};
pub use parameter::{Parameter, ParameterKind, ParameterSet};
pub use program::{ListenerId, ProgramUpdate, RenderProgram, UpdateKind};
pub use sink::{CaptureSink, FrameSink, NullSink, RingBufferReader, RingBufferSink, RunFlag};
pub use source::{BufferSource, BufferState, ToneSource, ToneState, DEFAULT_BLOCK};
pub use stages::{
    AutoGain, BandSplitter, BandState, DcRemove, Fft, Gain, OnsetDetector, OnsetState,
    PitchDetector, PitchState, SpectrumState,
};
pub use state::{reachable, StateCache, StateHandle};
pub use target::{Cycle, RenderTarget, TargetInfo};

// Re-export DSP types used in stage constructors
pub use sonde_dsp::{BandSpacing, Pitch, WindowShape};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_exports() {
        // Verify public API is accessible
        let _config = TargetConfig::default();
        let fft = Stage::new(Fft::new(25.0, WindowShape::Hann));
        let _bands = BandSplitter::new(&fft, 80.0, 10000.0, 10, BandSpacing::Logarithmic);
    }
}
