//! Sonde DSP - Digital Signal Processing Kernels
//!
//! This crate provides the signal-processing algorithms behind the Sonde
//! render stages, including:
//! - DC removal (one-pole high-pass per channel)
//! - Automatic gain control with an attack/sustain/decay envelope
//! - Windowed FFT amplitude spectrum
//! - Linear/logarithmic band splitting with smoothed band power
//! - Harmonic-product pitch detection and spectral-flux onset detection
//!
//! # Architecture
//!
//! Every kernel is a plain struct holding its own history. None of them
//! know about render targets or threads; the engine crate owns one
//! instance per (stage, target) pair and feeds it interleaved buffers.

mod agc;
mod bands;
mod dc_block;
mod error;
mod level;
mod onset;
mod pitch;
mod spectrum;

pub use agc::{
    AutoGainControl, EnvelopePhase, ATTACK_TIME, DECAY_TIME, HEADROOM_DB, JUMP_DB, MIN_LEVEL_DB,
    SMOOTH_DELAY, SUSTAIN_TIME, TARGET_LOWER_DB, TARGET_UPPER_DB,
};
pub use bands::{band_edges, BandPowers, BandSpacing, LOG_BASE, SMOOTHING_TIME};
pub use dc_block::{DcBlocker, DC_POLE};
pub use error::DspError;
pub use level::{db_to_linear, linear_to_db, peak, rms};
pub use onset::{OnsetDetector, DEFAULT_SENSITIVITY, REFRACTORY_TIME};
pub use pitch::{Pitch, PitchDetector, DEFAULT_HARMONICS, MAX_HARMONICS, PEAK_THRESHOLD};
pub use spectrum::{SpectrumAnalyzer, WindowShape};
