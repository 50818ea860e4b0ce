//! Audio Output Device
//!
//! Plays a target's frames on a sound card. The render thread writes into a
//! [`RingBufferSink`]; the device callback drains the matching reader. The
//! ring buffer is the only link between the two threads, so the callback
//! never blocks and never allocates.
//!
//! CPAL streams are not `Send` on every platform, so [`DeviceOutput`] stays
//! on the thread that opened it and only the sink moves to the target.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{RenderError, RenderResult};
use crate::sink::{RingBufferReader, RingBufferSink};
use crate::target::TargetInfo;

/// Sample rates probed when listing devices
const COMMON_RATES: [u32; 6] = [44100, 48000, 88200, 96000, 176400, 192000];

/// Ring buffer length, in device callbacks of this many sample frames
const DEFAULT_LATENCY_FRAMES: usize = 4096;

/// Output device description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputDevice {
    pub name: String,
    pub is_default: bool,
    /// Supported sample rates (may be empty if querying failed)
    pub sample_rates: Vec<u32>,
    pub max_channels: u16,
}

impl OutputDevice {
    /// Enumerate every output device on the default host
    pub fn list() -> RenderResult<Vec<OutputDevice>> {
        let host = cpal::default_host();
        let default_name = host.default_output_device().and_then(|d| d.name().ok());

        let devices: Vec<OutputDevice> = host
            .output_devices()
            .map_err(|e| RenderError::Sink(e.to_string()))?
            .filter_map(|device| Self::from_cpal(&device, default_name.as_deref()).ok())
            .collect();

        if devices.is_empty() {
            return Err(RenderError::Sink("no output devices found".into()));
        }
        Ok(devices)
    }

    fn from_cpal(device: &Device, default_name: Option<&str>) -> RenderResult<Self> {
        let name = device.name().map_err(|e| RenderError::Sink(e.to_string()))?;
        let is_default = default_name == Some(name.as_str());

        let mut sample_rates = Vec::new();
        let mut max_channels = 0u16;
        if let Ok(configs) = device.supported_output_configs() {
            for config in configs {
                max_channels = max_channels.max(config.channels());
                let (min, max) = (config.min_sample_rate().0, config.max_sample_rate().0);
                for &rate in &COMMON_RATES {
                    if rate >= min && rate <= max && !sample_rates.contains(&rate) {
                        sample_rates.push(rate);
                    }
                }
            }
        }
        sample_rates.sort_unstable();

        Ok(Self {
            name,
            is_default,
            sample_rates,
            max_channels,
        })
    }
}

/// A playing output stream fed by a [`RingBufferSink`]
pub struct DeviceOutput {
    stream: Stream,
    underruns: Arc<AtomicU64>,
    device_name: String,
}

impl DeviceOutput {
    /// Open the default output device in the target's format
    pub fn open_default(target: &TargetInfo) -> RenderResult<(Self, RingBufferSink)> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or_else(|| RenderError::Sink("no default output device".into()))?;
        Self::open(&device, target, DEFAULT_LATENCY_FRAMES)
    }

    /// Open an output device by name
    pub fn open_named(name: &str, target: &TargetInfo) -> RenderResult<(Self, RingBufferSink)> {
        let device = cpal::default_host()
            .output_devices()
            .map_err(|e| RenderError::Sink(e.to_string()))?
            .find(|d| d.name().map_or(false, |n| n == name))
            .ok_or_else(|| RenderError::Sink(format!("output device {} not found", name)))?;
        Self::open(&device, target, DEFAULT_LATENCY_FRAMES)
    }

    /// Start a stream on `device`, buffering up to `latency_frames` frames
    pub fn open(
        device: &Device,
        target: &TargetInfo,
        latency_frames: usize,
    ) -> RenderResult<(Self, RingBufferSink)> {
        let config = StreamConfig {
            channels: target.channels(),
            sample_rate: cpal::SampleRate(target.sample_rate()),
            buffer_size: cpal::BufferSize::Default,
        };
        let (sink, reader) = RingBufferSink::new(latency_frames.max(1) * target.channels() as usize);
        let underruns = Arc::new(AtomicU64::new(0));
        let stream = Self::build_stream(device, &config, reader, Arc::clone(&underruns))?;
        stream.play().map_err(|e| RenderError::Sink(e.to_string()))?;

        let device_name = device.name().unwrap_or_else(|_| "unknown".into());
        info!(
            "Output stream on {} at {} Hz, {} channels",
            device_name,
            target.sample_rate(),
            target.channels()
        );
        Ok((
            Self {
                stream,
                underruns,
                device_name,
            },
            sink,
        ))
    }

    fn build_stream(
        device: &Device,
        config: &StreamConfig,
        mut reader: RingBufferReader,
        underruns: Arc<AtomicU64>,
    ) -> RenderResult<Stream> {
        device
            .build_output_stream(
                config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    // Real-time callback: no allocation, no locks
                    if reader.read_into(data) < data.len() {
                        underruns.fetch_add(1, Ordering::Relaxed);
                    }
                },
                move |err| {
                    warn!("Output stream error: {}", err);
                },
                None,
            )
            .map_err(|e| RenderError::Sink(e.to_string()))
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Device callbacks that found the ring buffer short
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    pub fn pause(&self) -> RenderResult<()> {
        self.stream.pause().map_err(|e| RenderError::Sink(e.to_string()))
    }

    pub fn resume(&self) -> RenderResult<()> {
        self.stream.play().map_err(|e| RenderError::Sink(e.to_string()))
    }
}
