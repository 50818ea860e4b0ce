//! Render Target Configuration

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RenderError, RenderResult};

/// How the render thread paces cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pacing {
    /// Sleep until each frame's deadline (wall-clock playback)
    RealTime,
    /// Run cycles back to back; the sink alone provides backpressure
    Freewheel,
}

/// OS scheduling priority requested for the render thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenderPriority {
    /// Leave the thread at the platform default
    Default,
    Min,
    Max,
}

/// Render target configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Name given to the render thread and used in log lines
    pub name: String,

    /// Sample rate in Hz (e.g., 44100, 48000, 96000)
    pub sample_rate: u32,

    /// Number of audio channels (1 = mono, 2 = stereo)
    pub channels: u16,

    /// Deadline pacing of the render loop
    pub pacing: Pacing,

    /// Render thread priority
    pub priority: RenderPriority,

    /// Queue length per event subscriber; the oldest event is dropped when full
    pub event_capacity: usize,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            name: "sonde-render".to_string(),
            sample_rate: 48000,
            channels: 2,
            pacing: Pacing::RealTime,
            priority: RenderPriority::Default,
            event_capacity: 64,
        }
    }
}

impl TargetConfig {
    /// Config for playback to a device: deadline pacing at maximum priority
    pub fn realtime() -> Self {
        Self {
            pacing: Pacing::RealTime,
            priority: RenderPriority::Max,
            ..Default::default()
        }
    }

    /// Config for offline analysis: no sleeping, default priority
    pub fn offline() -> Self {
        Self {
            name: "sonde-offline".to_string(),
            pacing: Pacing::Freewheel,
            priority: RenderPriority::Default,
            ..Default::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate < 8000 || self.sample_rate > 192000 {
            return Err(format!("Invalid sample rate: {}", self.sample_rate));
        }
        if self.channels == 0 || self.channels > 8 {
            return Err(format!("Invalid channel count: {}", self.channels));
        }
        if self.event_capacity == 0 {
            return Err("Event capacity must be at least 1".to_string());
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> RenderResult<Self> {
        let config: TargetConfig = serde_json::from_str(json)?;
        config.validate().map_err(RenderError::Config)?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> RenderResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TargetConfig::default();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.channels, 2);
        assert_eq!(config.pacing, Pacing::RealTime);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let invalid_rate = TargetConfig {
            sample_rate: 100,
            ..Default::default()
        };
        assert!(invalid_rate.validate().is_err());

        let invalid_channels = TargetConfig {
            channels: 0,
            ..Default::default()
        };
        assert!(invalid_channels.validate().is_err());

        let invalid_capacity = TargetConfig {
            event_capacity: 0,
            ..Default::default()
        };
        assert!(invalid_capacity.validate().is_err());
    }

    #[test]
    fn test_preset_configs() {
        assert_eq!(TargetConfig::realtime().priority, RenderPriority::Max);
        assert_eq!(TargetConfig::offline().pacing, Pacing::Freewheel);
    }

    #[test]
    fn test_config_serialization() {
        let config = TargetConfig::offline();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized = TargetConfig::from_json_str(&json).unwrap();

        assert_eq!(config.sample_rate, deserialized.sample_rate);
        assert_eq!(config.pacing, deserialized.pacing);
        assert_eq!(config.name, deserialized.name);
    }

    #[test]
    fn test_invalid_json_rejected() {
        let json = r#"{"name":"x","sample_rate":1,"channels":2,"pacing":"RealTime","priority":"Default","event_capacity":4}"#;
        assert!(matches!(
            TargetConfig::from_json_str(json),
            Err(RenderError::Config(_))
        ));
        assert!(matches!(
            TargetConfig::from_json_str("not json"),
            Err(RenderError::Json(_))
        ));
    }
}
