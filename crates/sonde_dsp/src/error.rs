//! DSP Error Types

use thiserror::Error;

/// Errors that can occur during DSP operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DspError {
    #[error("Sample rate must be positive, got {0}")]
    InvalidSampleRate(f32),

    #[error("Channel count must be at least 1, got {0}")]
    InvalidChannelCount(usize),

    #[error("Buffer of {len} samples is not a whole number of {channels}-channel frames")]
    RaggedBuffer { len: usize, channels: usize },

    #[error("Invalid band layout: {bands} bands between {low}Hz and {high}Hz")]
    InvalidBandLayout { low: f32, high: f32, bands: usize },

    #[error("Window length must be at least 2 samples, got {0}")]
    InvalidWindow(usize),

    #[error("Buffer size mismatch: expected {expected}, got {got}")]
    BufferSizeMismatch { expected: usize, got: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DspError::InvalidSampleRate(-1.0);
        assert!(err.to_string().contains("-1"));

        let err = DspError::InvalidBandLayout {
            low: 80.0,
            high: 40.0,
            bands: 10,
        };
        let message = err.to_string();
        assert!(message.contains("80"));
        assert!(message.contains("40"));

        let err = DspError::RaggedBuffer { len: 5, channels: 2 };
        assert!(err.to_string().contains("5 samples"));
    }
}
