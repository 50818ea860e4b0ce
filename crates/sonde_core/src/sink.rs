//! Frame Sinks
//!
//! A sink receives every finished frame from the render thread. Sinks may
//! block until the consumer has room; that blocking is the pipeline's only
//! backpressure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rtrb::{Consumer, Producer, RingBuffer};

use crate::error::{RenderError, RenderResult};
use crate::frame::Frame;

/// Poll interval while waiting for ring buffer space
const FULL_WAIT: Duration = Duration::from_millis(1);

/// Read-only view of a target's running flag
#[derive(Debug, Clone)]
pub struct RunFlag(Arc<AtomicBool>);

impl RunFlag {
    pub(crate) fn new(flag: Arc<AtomicBool>) -> Self {
        Self(flag)
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Destination for finished frames
pub trait FrameSink: Send {
    /// Deliver one frame. May block until the consumer has room.
    fn render(&mut self, frame: &Frame) -> RenderResult<()>;

    /// Called once when the sink is handed to a target
    fn attach(&mut self, _running: RunFlag) {}
}

/// Discards every frame
#[derive(Debug, Default)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn render(&mut self, _frame: &Frame) -> RenderResult<()> {
        Ok(())
    }
}

/// Writes interleaved samples into a single-producer ring buffer
pub struct RingBufferSink {
    producer: Producer<f32>,
    running: Option<RunFlag>,
}

/// Consumer half of a [`RingBufferSink`]
pub struct RingBufferReader {
    consumer: Consumer<f32>,
}

impl RingBufferSink {
    /// Ring buffer holding `capacity` samples
    pub fn new(capacity: usize) -> (Self, RingBufferReader) {
        let (producer, consumer) = RingBuffer::<f32>::new(capacity.max(1));
        (
            Self {
                producer,
                running: None,
            },
            RingBufferReader { consumer },
        )
    }

    fn stopped(&self) -> bool {
        self.running.as_ref().map_or(false, |flag| !flag.is_running())
    }
}

impl FrameSink for RingBufferSink {
    fn render(&mut self, frame: &Frame) -> RenderResult<()> {
        let mut pending = frame.samples();
        while !pending.is_empty() {
            let n = self.producer.slots().min(pending.len());
            if n == 0 {
                if self.producer.is_abandoned() {
                    return Err(RenderError::Sink("ring buffer reader was dropped".into()));
                }
                if self.stopped() {
                    // Target is shutting down; the rest of the frame is dropped
                    return Ok(());
                }
                thread::sleep(FULL_WAIT);
                continue;
            }

            let mut chunk = self
                .producer
                .write_chunk(n)
                .map_err(|e| RenderError::Sink(e.to_string()))?;
            let (first, second) = chunk.as_mut_slices();
            let split = first.len();
            first.copy_from_slice(&pending[..split]);
            second.copy_from_slice(&pending[split..n]);
            chunk.commit_all();
            pending = &pending[n..];
        }
        Ok(())
    }

    fn attach(&mut self, running: RunFlag) {
        self.running = Some(running);
    }
}

impl RingBufferReader {
    /// Samples ready to read
    pub fn available(&self) -> usize {
        self.consumer.slots()
    }

    /// Fill `out` from the buffer; missing samples are zeroed. Returns how
    /// many samples were real.
    pub fn read_into(&mut self, out: &mut [f32]) -> usize {
        let to_read = out.len().min(self.consumer.slots());
        if let Ok(chunk) = self.consumer.read_chunk(to_read) {
            let (first, second) = chunk.as_slices();
            out[..first.len()].copy_from_slice(first);
            out[first.len()..first.len() + second.len()].copy_from_slice(second);
            chunk.commit_all();
        }
        out[to_read..].fill(0.0);
        to_read
    }

    /// Drain everything currently buffered
    pub fn drain(&mut self) -> Vec<f32> {
        let mut out = vec![0.0; self.available()];
        let read = self.read_into(&mut out);
        out.truncate(read);
        out
    }
}

/// Keeps a copy of every frame; used to inspect output
#[derive(Debug, Clone, Default)]
pub struct CaptureSink {
    frames: Arc<Mutex<Vec<Frame>>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames captured so far; shared with clones of this sink
    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }
}

impl FrameSink for CaptureSink {
    fn render(&mut self, frame: &Frame) -> RenderResult<()> {
        self.frames.lock().push(frame.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(samples: &[f32]) -> Frame {
        let mut frame = Frame::new(48000, 1);
        frame.copy_from(samples);
        frame
    }

    #[test]
    fn test_ring_buffer_round_trip() {
        let (mut sink, mut reader) = RingBufferSink::new(8);
        sink.render(&frame(&[0.1, 0.2, 0.3])).unwrap();
        assert_eq!(reader.available(), 3);

        let mut out = [1.0; 5];
        assert_eq!(reader.read_into(&mut out), 3);
        assert_eq!(out, [0.1, 0.2, 0.3, 0.0, 0.0]);
    }

    #[test]
    fn test_ring_buffer_blocks_until_read() {
        let (mut sink, mut reader) = RingBufferSink::new(4);
        let writer = thread::spawn(move || {
            sink.render(&frame(&[1.0; 10])).unwrap();
        });

        let mut received = Vec::new();
        while received.len() < 10 {
            received.extend(reader.drain());
            thread::sleep(Duration::from_millis(1));
        }
        writer.join().unwrap();
        assert_eq!(received, vec![1.0; 10]);
    }

    #[test]
    fn test_ring_buffer_gives_up_when_stopped() {
        let (mut sink, _reader) = RingBufferSink::new(2);
        let flag = Arc::new(AtomicBool::new(false));
        sink.attach(RunFlag::new(flag));
        // Full buffer and a stopped target: returns instead of blocking
        sink.render(&frame(&[1.0; 6])).unwrap();
    }

    #[test]
    fn test_ring_buffer_reader_dropped() {
        let (mut sink, reader) = RingBufferSink::new(2);
        drop(reader);
        assert!(matches!(
            sink.render(&frame(&[1.0; 6])),
            Err(RenderError::Sink(_))
        ));
    }

    #[test]
    fn test_capture_sink_shares_frames() {
        let capture = CaptureSink::new();
        let mut sink = capture.clone();
        sink.render(&frame(&[0.5])).unwrap();
        assert_eq!(capture.len(), 1);
        assert_eq!(capture.frames()[0].samples(), &[0.5]);
    }
}
