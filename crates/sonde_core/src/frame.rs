//! Audio Frame
//!
//! One block of interleaved samples flowing through a program. Sources fill
//! it, stages mutate it in place and call [`Frame::mark_modified`] after
//! doing so, and the target hands the finished frame to its sink.

/// A block of interleaved audio
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    sample_rate: u32,
    channels: u16,
    samples: Vec<f32>,
    /// Stream time of the first sample in seconds
    timestamp: f64,
    /// Bumped by every stage that mutates the samples
    revision: u64,
}

impl Frame {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            samples: Vec::new(),
            timestamp: 0.0,
            revision: 0,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Mutable access; call [`mark_modified`](Self::mark_modified) after writing
    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.samples
    }

    /// Number of sample frames (samples per channel)
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn set_timestamp(&mut self, timestamp: f64) {
        self.timestamp = timestamp;
    }

    /// Length of the block in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Stream time just past the last sample
    pub fn end_time(&self) -> f64 {
        self.timestamp + self.duration()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Signal that the samples changed
    pub fn mark_modified(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }

    /// Resize to `frames` sample frames of silence, keeping the allocation
    pub fn reset(&mut self, frames: usize) {
        self.samples.clear();
        self.samples.resize(frames * self.channels as usize, 0.0);
    }

    /// Replace the samples with a copy of `interleaved`
    pub fn copy_from(&mut self, interleaved: &[f32]) {
        self.samples.clear();
        self.samples.extend_from_slice(interleaved);
    }
}
