//! Automatic Gain Control
//!
//! Envelope follower driving a correction gain so that the output peak
//! level lands in a narrow target window just below full scale.
//!
//! # Algorithm
//!
//! 1. A running RMS over the last `SMOOTH_DELAY` seconds is kept in a
//!    circular buffer of mean squares (one entry per sample frame). The
//!    RMS is scaled by sqrt(2) to a peak-equivalent level.
//! 2. The envelope follows that level through a small state machine:
//!    - `Attack`: level at or above the envelope. Within `JUMP_DB` of the
//!      envelope it snaps to the level, beyond that it rises
//!      multiplicatively (one doubling per `ATTACK_TIME`).
//!    - `Sustain`: level dropped below the envelope; the envelope holds
//!      for `SUSTAIN_TIME`.
//!    - `Decay`: the envelope falls multiplicatively (one halving per
//!      `DECAY_TIME`), never below the level or `MIN_LEVEL_DB`.
//! 3. The correction gain only moves when `envelope * gain` leaves the
//!    window [`TARGET_LOWER_DB`, `TARGET_UPPER_DB`], and then only as far
//!    as the nearest window edge.
//!
//! Per-sample attack/decay factors are derived from the sample rate once,
//! per-buffer factors use `powi` so no transcendental runs per sample.

use crate::error::DspError;
use crate::level::db_to_linear;

/// Length of the RMS history window in seconds
pub const SMOOTH_DELAY: f32 = 0.05;
/// How long the envelope holds after the level starts falling
pub const SUSTAIN_TIME: f32 = 2.0;
/// Seconds for the envelope to double while attacking
pub const ATTACK_TIME: f32 = 0.1;
/// Seconds for the envelope to halve while decaying
pub const DECAY_TIME: f32 = 1.0;
/// Rises smaller than this snap the envelope instantly
pub const JUMP_DB: f32 = 6.0;
/// Envelope floor
pub const MIN_LEVEL_DB: f32 = -40.0;
/// Upper edge of the output window
pub const TARGET_UPPER_DB: f32 = -3.0;
/// Width of the output window below the upper edge
pub const HEADROOM_DB: f32 = 1.0;
/// Lower edge of the output window
pub const TARGET_LOWER_DB: f32 = TARGET_UPPER_DB - HEADROOM_DB;

/// Phase of the envelope state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopePhase {
    Attack,
    Sustain,
    Decay,
}

/// Automatic gain control for interleaved buffers
pub struct AutoGainControl {
    history: Vec<f64>,
    history_pos: usize,
    history_sum: f64,

    attack_factor: f32,
    decay_factor: f32,
    sustain_frames: u64,
    jump_ratio: f32,
    min_level: f32,
    target_lower: f32,
    target_upper: f32,

    level: f32,
    envelope: f32,
    gain: f32,
    phase: EnvelopePhase,
    held_frames: u64,
}

impl AutoGainControl {
    /// Create a gain controller for the given sample rate
    pub fn new(sample_rate: f32) -> Result<Self, DspError> {
        if !(sample_rate > 0.0) || !sample_rate.is_finite() {
            return Err(DspError::InvalidSampleRate(sample_rate));
        }

        let history_len = ((SMOOTH_DELAY * sample_rate).round() as usize).max(1);
        let min_level = db_to_linear(MIN_LEVEL_DB);

        Ok(Self {
            history: vec![0.0; history_len],
            history_pos: 0,
            history_sum: 0.0,
            attack_factor: 2.0_f32.powf(1.0 / (ATTACK_TIME * sample_rate)),
            decay_factor: 0.5_f32.powf(1.0 / (DECAY_TIME * sample_rate)),
            sustain_frames: (SUSTAIN_TIME * sample_rate) as u64,
            jump_ratio: db_to_linear(JUMP_DB),
            min_level,
            target_lower: db_to_linear(TARGET_LOWER_DB),
            target_upper: db_to_linear(TARGET_UPPER_DB),
            level: 0.0,
            envelope: min_level,
            gain: 1.0,
            phase: EnvelopePhase::Attack,
            held_frames: 0,
        })
    }

    /// Correction gain currently applied
    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Peak-equivalent input level measured over the history window
    pub fn level(&self) -> f32 {
        self.level
    }

    /// Smoothed envelope of the input level
    pub fn envelope(&self) -> f32 {
        self.envelope
    }

    pub fn phase(&self) -> EnvelopePhase {
        self.phase
    }

    /// Measure, update the envelope and apply the correction gain in place
    ///
    /// Returns the gain that was applied to the buffer.
    pub fn process_interleaved(&mut self, buffer: &mut [f32], channels: usize) -> Result<f32, DspError> {
        if channels == 0 {
            return Err(DspError::InvalidChannelCount(channels));
        }
        if buffer.len() % channels != 0 {
            return Err(DspError::RaggedBuffer {
                len: buffer.len(),
                channels,
            });
        }
        let frames = buffer.len() / channels;
        if frames == 0 {
            return Ok(self.gain);
        }

        for frame in buffer.chunks_exact(channels) {
            let mean_square =
                frame.iter().map(|&s| f64::from(s) * f64::from(s)).sum::<f64>() / channels as f64;
            self.push_history(mean_square);
        }

        let rms = (self.history_sum.max(0.0) / self.history.len() as f64).sqrt() as f32;
        self.level = rms * std::f32::consts::SQRT_2;
        self.update_envelope(frames);
        self.update_gain();

        let gain = self.gain;
        for sample in buffer.iter_mut() {
            *sample *= gain;
        }
        Ok(gain)
    }

    /// Forget all measured history and return to unity gain
    pub fn reset(&mut self) {
        self.history.iter_mut().for_each(|v| *v = 0.0);
        self.history_pos = 0;
        self.history_sum = 0.0;
        self.level = 0.0;
        self.envelope = self.min_level;
        self.gain = 1.0;
        self.phase = EnvelopePhase::Attack;
        self.held_frames = 0;
    }

    #[inline]
    fn push_history(&mut self, mean_square: f64) {
        self.history_sum += mean_square - self.history[self.history_pos];
        self.history[self.history_pos] = mean_square;
        self.history_pos += 1;
        if self.history_pos == self.history.len() {
            self.history_pos = 0;
            // Re-sum once per lap so the running total cannot drift
            self.history_sum = self.history.iter().sum();
        }
    }

    fn update_envelope(&mut self, frames: usize) {
        let frames_i = frames.min(i32::MAX as usize) as i32;

        if self.level >= self.envelope {
            self.phase = EnvelopePhase::Attack;
            self.held_frames = 0;
            if self.level < self.envelope * self.jump_ratio {
                self.envelope = self.level;
            } else {
                self.envelope = (self.envelope * self.attack_factor.powi(frames_i)).min(self.level);
            }
        } else {
            match self.phase {
                EnvelopePhase::Attack => {
                    self.phase = EnvelopePhase::Sustain;
                    self.held_frames = frames as u64;
                }
                EnvelopePhase::Sustain => {
                    self.held_frames += frames as u64;
                    if self.held_frames >= self.sustain_frames {
                        self.phase = EnvelopePhase::Decay;
                    }
                }
                EnvelopePhase::Decay => {
                    self.envelope = (self.envelope * self.decay_factor.powi(frames_i)).max(self.level);
                }
            }
        }

        self.envelope = self.envelope.max(self.min_level);
    }

    fn update_gain(&mut self) {
        let output = self.envelope * self.gain;
        if output > self.target_upper {
            self.gain = self.target_upper / self.envelope;
        } else if output < self.target_lower {
            self.gain = self.target_lower / self.envelope;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::{linear_to_db, peak};

    const RATE: f32 = 48000.0;
    const BLOCK: usize = 1024;

    /// Feed `seconds` of a 440Hz sine and return the peak (dB) of the last block
    fn run_sine(agc: &mut AutoGainControl, amplitude: f32, seconds: f32) -> f32 {
        let total = (seconds * RATE) as usize;
        let mut phase_index = 0usize;
        let mut last_peak = 0.0;
        while phase_index < total {
            let mut block: Vec<f32> = (0..BLOCK)
                .map(|i| {
                    let t = (phase_index + i) as f32 / RATE;
                    amplitude * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
                })
                .collect();
            agc.process_interleaved(&mut block, 1).unwrap();
            last_peak = peak(&block);
            phase_index += BLOCK;
        }
        linear_to_db(last_peak)
    }

    #[test]
    fn test_quiet_signal_is_raised_into_window() {
        let mut agc = AutoGainControl::new(RATE).unwrap();
        let peak_db = run_sine(&mut agc, 0.015, 3.0);
        assert!(
            peak_db >= TARGET_LOWER_DB - 0.05 && peak_db <= TARGET_UPPER_DB + 0.05,
            "quiet input corrected to {} dB",
            peak_db
        );
        assert!(agc.gain() > 30.0);
    }

    #[test]
    fn test_loud_signal_is_lowered_into_window() {
        let mut agc = AutoGainControl::new(RATE).unwrap();
        let peak_db = run_sine(&mut agc, 1.5, 3.0);
        assert!(
            peak_db >= TARGET_LOWER_DB - 0.05 && peak_db <= TARGET_UPPER_DB + 0.05,
            "loud input corrected to {} dB",
            peak_db
        );
        assert!(agc.gain() < 0.5);
    }

    #[test]
    fn test_large_rise_attacks_gradually() {
        let mut agc = AutoGainControl::new(RATE).unwrap();
        // 100x above the floor: far beyond the jump threshold
        let mut block = vec![1.0_f32; BLOCK];
        agc.process_interleaved(&mut block, 1).unwrap();
        assert_eq!(agc.phase(), EnvelopePhase::Attack);
        assert!(agc.envelope() < agc.level(), "envelope should not snap on a large jump");
        assert!(agc.envelope() > db_to_linear(MIN_LEVEL_DB));
    }

    #[test]
    fn test_sustain_then_decay() {
        let mut agc = AutoGainControl::new(RATE).unwrap();
        // A constant level keeps the follower in Attack with a stable envelope
        let mut steady = vec![0.5_f32; BLOCK];
        for _ in 0..((2.0 * RATE) as usize / BLOCK) {
            steady.iter_mut().for_each(|s| *s = 0.5);
            agc.process_interleaved(&mut steady, 1).unwrap();
        }
        assert_eq!(agc.phase(), EnvelopePhase::Attack);
        let held = agc.envelope();

        // Silence: envelope holds for SUSTAIN_TIME, then decays
        let mut silence = vec![0.0_f32; BLOCK];
        agc.process_interleaved(&mut silence, 1).unwrap();
        assert_eq!(agc.phase(), EnvelopePhase::Sustain);
        for _ in 0..((1.0 * RATE) as usize / BLOCK) {
            agc.process_interleaved(&mut silence, 1).unwrap();
        }
        assert_eq!(agc.phase(), EnvelopePhase::Sustain);
        assert_eq!(agc.envelope(), held);

        for _ in 0..((2.0 * RATE) as usize / BLOCK) {
            agc.process_interleaved(&mut silence, 1).unwrap();
        }
        assert_eq!(agc.phase(), EnvelopePhase::Decay);
        assert!(agc.envelope() < held);
        assert!(agc.envelope() >= db_to_linear(MIN_LEVEL_DB));
    }

    #[test]
    fn test_invalid_input() {
        assert!(AutoGainControl::new(0.0).is_err());
        let mut agc = AutoGainControl::new(RATE).unwrap();
        let mut buffer = vec![0.0_f32; 3];
        assert!(agc.process_interleaved(&mut buffer, 2).is_err());
    }

    #[test]
    fn test_reset() {
        let mut agc = AutoGainControl::new(RATE).unwrap();
        run_sine(&mut agc, 0.1, 0.5);
        agc.reset();
        assert_eq!(agc.gain(), 1.0);
        assert_eq!(agc.level(), 0.0);
        assert_eq!(agc.phase(), EnvelopePhase::Attack);
    }
}
