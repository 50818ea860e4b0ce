//! Render Stages
//!
//! Concrete commands that transform or analyze frames. Analysis stages
//! share one spectrum per target by reading the `Fft` stage's state through
//! a [`StateHandle`](crate::state::StateHandle).

mod auto_gain;
mod band_split;
mod dc_remove;
mod fft;
mod gain;
mod onset;
mod pitch;

pub use auto_gain::AutoGain;
pub use band_split::{BandSplitter, BandState};
pub use dc_remove::DcRemove;
pub use fft::{Fft, SpectrumState};
pub use gain::Gain;
pub use onset::{OnsetDetector, OnsetState};
pub use pitch::{PitchDetector, PitchState};
