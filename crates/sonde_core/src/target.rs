//! Render Target
//!
//! A target drives one program on a dedicated render thread:
//!
//! ```text
//! IDLE ──start()──▶ RENDERING ──stop() / end of source / error──▶ STOPPED
//!                      │
//!                      └─ loop: run program ─▶ sink.render ─▶ publish frame ─▶ sleep_until
//! ```
//!
//! Other threads reach the loop only through the atomic running flag, the
//! program's published command list, the state cache and the published
//! current frame.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use thread_priority::{set_current_thread_priority, ThreadPriority};
use tracing::{debug, error, info, warn};

use crate::command::{CommandHandle, RenderContext, Stage};
use crate::config::{Pacing, RenderPriority, TargetConfig};
use crate::error::{RenderError, RenderResult};
use crate::frame::Frame;
use crate::message::{EventBus, EventReceiver, TargetEvent};
use crate::program::{ListenerId, RenderProgram};
use crate::sink::{FrameSink, RunFlag};
use crate::state::{reachable, StateCache, StateHandle};

/// Back-off when a source yields an empty frame
const IDLE_WAIT: Duration = Duration::from_millis(1);

/// Format of the frames a target renders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetInfo {
    name: String,
    sample_rate: u32,
    channels: u16,
}

impl TargetInfo {
    pub fn new(name: &str, sample_rate: u32, channels: u16) -> Self {
        Self {
            name: name.to_string(),
            sample_rate,
            channels,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

/// Result of one render cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cycle {
    /// A frame went to the sink and was published
    Rendered,
    /// The source produced no samples this time
    Idle,
    /// The source is exhausted; nothing was delivered
    EndOfSource,
}

/// State shared between a target, its render thread and its program listener
struct TargetShared {
    info: TargetInfo,
    pacing: Pacing,
    priority: RenderPriority,
    start: Instant,
    states: StateCache,
    program: ArcSwap<Option<Stage<RenderProgram>>>,
    rendering: Arc<AtomicBool>,
    cycles: AtomicU64,
    overruns: AtomicU64,
    current_frame: ArcSwap<Frame>,
    events: EventBus,
    stop_tx: Sender<()>,
    stop_rx: Receiver<()>,
}

impl TargetShared {
    fn time(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    fn is_rendering(&self) -> bool {
        self.rendering.load(Ordering::Acquire)
    }

    /// Sleep until `time` seconds after creation, waking early on stop.
    /// A deadline already in the past counts as an overrun.
    fn sleep_until(&self, time: f64) {
        let remaining = time - self.time();
        if remaining <= 0.0 {
            self.overruns.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.wait(Duration::from_secs_f64(remaining));
    }

    fn wait(&self, timeout: Duration) {
        // Either a stop request or the timeout ends the wait
        let _ = self.stop_rx.recv_timeout(timeout);
    }

    fn new_frame(&self) -> Frame {
        Frame::new(self.info.sample_rate, self.info.channels)
    }

    /// Publish `frame` as current and hand back the previous one for reuse
    fn publish(&self, frame: Frame) -> Frame {
        let previous = self.current_frame.swap(Arc::new(frame));
        Arc::try_unwrap(previous).unwrap_or_else(|_| self.new_frame())
    }

    fn cycle(&self, sink: &mut dyn FrameSink, frame: &mut Frame) -> RenderResult<Cycle> {
        let program = self.program.load_full();
        let program = Option::as_ref(&program).ok_or(RenderError::NoProgram)?;

        let end_of_source = {
            let mut cx = RenderContext::new(&self.info, &self.states, self.start, frame);
            cx.run_command(program.handle())?;
            cx.end_of_source()
        };
        if end_of_source {
            return Ok(Cycle::EndOfSource);
        }
        if frame.is_empty() {
            return Ok(Cycle::Idle);
        }

        sink.render(frame)?;
        self.cycles.fetch_add(1, Ordering::Relaxed);
        let finished = std::mem::replace(frame, self.new_frame());
        *frame = self.publish(finished);
        Ok(Cycle::Rendered)
    }

    /// Drop cached states of commands no longer reachable from the program
    fn prune(&self) -> usize {
        let program = self.program.load_full();
        let keep: HashSet<_> = match Option::as_ref(&program) {
            Some(program) => reachable(program.handle()),
            None => HashSet::new(),
        };
        let pruned = self.states.retain(&keep);
        if pruned > 0 {
            debug!("Target '{}' pruned {} stale states", self.info.name, pruned);
        }
        pruned
    }
}

/// Drives a program on a dedicated thread and delivers frames to a sink
pub struct RenderTarget {
    shared: Arc<TargetShared>,
    sink: Mutex<Option<Box<dyn FrameSink>>>,
    thread: Option<JoinHandle<Box<dyn FrameSink>>>,
    listener: Option<(Stage<RenderProgram>, ListenerId)>,
}

impl RenderTarget {
    pub fn new(config: TargetConfig, sink: impl FrameSink + 'static) -> RenderResult<Self> {
        Self::with_sink(config, Box::new(sink))
    }

    pub fn with_sink(config: TargetConfig, mut sink: Box<dyn FrameSink>) -> RenderResult<Self> {
        config.validate().map_err(RenderError::Config)?;

        let info = TargetInfo::new(&config.name, config.sample_rate, config.channels);
        let rendering = Arc::new(AtomicBool::new(false));
        sink.attach(RunFlag::new(rendering.clone()));
        let (stop_tx, stop_rx) = bounded(1);

        let shared = Arc::new(TargetShared {
            current_frame: ArcSwap::from_pointee(Frame::new(info.sample_rate, info.channels)),
            info,
            pacing: config.pacing,
            priority: config.priority,
            start: Instant::now(),
            states: StateCache::new(),
            program: ArcSwap::from_pointee(None),
            rendering,
            cycles: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            events: EventBus::new(config.event_capacity),
            stop_tx,
            stop_rx,
        });

        Ok(Self {
            shared,
            sink: Mutex::new(Some(sink)),
            thread: None,
            listener: None,
        })
    }

    pub fn info(&self) -> &TargetInfo {
        &self.shared.info
    }

    /// Install `program`, replacing any previous one
    ///
    /// Takes effect at the next cycle if the target is rendering. Cached
    /// states of commands not reachable from the new program are dropped.
    pub fn use_program(&mut self, program: &Stage<RenderProgram>) {
        if let Some((previous, id)) = self.listener.take() {
            previous.remove_listener(id);
        }

        let weak: Weak<TargetShared> = Arc::downgrade(&self.shared);
        let id = program.add_listener(move |update| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            shared.events.publish(TargetEvent::ProgramChanged {
                commands: update.current.len(),
            });
            if !update.removed().is_empty() {
                shared.prune();
            }
        });
        self.listener = Some((program.clone(), id));

        self.shared.program.store(Arc::new(Some(program.clone())));
        let pruned = self.shared.prune();
        info!(
            "Target '{}' using program with {} commands ({} stale states dropped)",
            self.shared.info.name,
            program.len(),
            pruned
        );
    }

    /// The installed program
    pub fn program(&self) -> Option<Stage<RenderProgram>> {
        Option::clone(&self.shared.program.load())
    }

    /// Start rendering
    ///
    /// A source with exactly one frame is rendered synchronously on the
    /// calling thread. Otherwise a render thread is spawned and this
    /// returns immediately.
    pub fn start(&mut self) -> RenderResult<()> {
        if self.is_rendering() {
            return Err(RenderError::AlreadyRendering);
        }
        self.join();

        let program = self.program().ok_or(RenderError::NoProgram)?;
        let source = program.frame_source().ok_or(RenderError::NoFrameSource)?;
        let mut sink = self
            .sink
            .get_mut()
            .take()
            .ok_or_else(|| RenderError::Sink("sink is not available".into()))?;

        // Discard a stop request left over from a previous run
        while self.shared.stop_rx.try_recv().is_ok() {}
        self.shared.rendering.store(true, Ordering::Release);

        if source.frame_count(&self.shared.info) == Some(1) {
            debug!("Target '{}' rendering a single frame", self.shared.info.name);
            let mut frame = self.shared.new_frame();
            let result = self.shared.cycle(sink.as_mut(), &mut frame);
            self.shared.rendering.store(false, Ordering::Release);
            *self.sink.get_mut() = Some(sink);
            if let Err(e) = &result {
                self.shared.events.publish(TargetEvent::Error {
                    message: e.to_string(),
                });
            }
            return result.map(|_| ());
        }

        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name(self.shared.info.name.clone())
            .spawn(move || render_loop(shared, sink));
        match spawned {
            Ok(handle) => {
                self.thread = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.rendering.store(false, Ordering::Release);
                Err(RenderError::ThreadSpawn(e.to_string()))
            }
        }
    }

    /// Ask the render thread to exit after its current cycle
    pub fn stop(&self) {
        if self.shared.rendering.swap(false, Ordering::AcqRel) {
            let _ = self.shared.stop_tx.try_send(());
            debug!("Target '{}' stop requested", self.shared.info.name);
        }
    }

    /// Wait for the render thread to exit and reclaim the sink
    pub fn join(&mut self) {
        if let Some(handle) = self.thread.take() {
            match handle.join() {
                Ok(sink) => *self.sink.get_mut() = Some(sink),
                Err(_) => error!("Render thread '{}' panicked", self.shared.info.name),
            }
        }
    }

    pub fn is_rendering(&self) -> bool {
        self.shared.is_rendering()
    }

    /// Run a single cycle on the calling thread
    ///
    /// Fails with [`RenderError::AlreadyRendering`] while the render thread
    /// owns the sink.
    pub fn run_one_cycle(&mut self) -> RenderResult<Cycle> {
        let sink = self
            .sink
            .get_mut()
            .as_mut()
            .ok_or(RenderError::AlreadyRendering)?;
        let mut frame = self.shared.new_frame();
        self.shared.cycle(sink.as_mut(), &mut frame)
    }

    /// Seconds since the target was created
    pub fn time(&self) -> f64 {
        self.shared.time()
    }

    /// Sleep until `time` seconds after creation; returns early on stop
    pub fn sleep_until(&self, time: f64) {
        self.shared.sleep_until(time);
    }

    /// Frames delivered to the sink
    pub fn cycles(&self) -> u64 {
        self.shared.cycles.load(Ordering::Relaxed)
    }

    /// Deadlines that had already passed when the loop went to sleep
    pub fn overruns(&self) -> u64 {
        self.shared.overruns.load(Ordering::Relaxed)
    }

    /// The most recently delivered frame
    pub fn current_frame(&self) -> Arc<Frame> {
        self.shared.current_frame.load_full()
    }

    pub fn states(&self) -> &StateCache {
        &self.shared.states
    }

    /// Forget the state cached for `command`
    pub fn remove_state(&self, command: &CommandHandle) -> bool {
        self.shared.states.remove(command.id())
    }

    /// Read the state behind `handle` on this target, creating it if absent
    ///
    /// Safe to call from any thread while the target renders; the render
    /// thread waits for `f` if it needs the same state meanwhile.
    pub fn with_state<S: Send + 'static, R>(
        &self,
        handle: &StateHandle<S>,
        f: impl FnOnce(&S) -> R,
    ) -> RenderResult<R> {
        let command = handle.command();
        let state = self.shared.states.get_or_create(command, &self.shared.info)?;
        let state = state.lock();
        let typed = state.downcast_ref::<S>().ok_or(RenderError::StateType {
            command: command.name(),
        })?;
        Ok(f(typed))
    }

    /// Mutate the state of `command` on this target, creating it if absent
    pub(crate) fn with_state_mut<S: Send + 'static, R>(
        &self,
        command: &CommandHandle,
        f: impl FnOnce(&mut S) -> R,
    ) -> RenderResult<R> {
        let state = self.shared.states.get_or_create(command, &self.shared.info)?;
        let mut state = state.lock();
        let typed = state
            .downcast_mut::<S>()
            .ok_or(RenderError::StateType {
                command: command.name(),
            })?;
        Ok(f(typed))
    }

    /// Drop states of commands not reachable from the installed program
    pub fn prune_states(&self) -> usize {
        self.shared.prune()
    }

    /// Subscribe to lifecycle events
    ///
    /// Every subscriber sees every event published after it subscribed.
    pub fn events(&self) -> EventReceiver {
        self.shared.events.subscribe()
    }
}

impl fmt::Debug for RenderTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderTarget")
            .field("info", &self.shared.info)
            .field("rendering", &self.is_rendering())
            .field("cycles", &self.cycles())
            .finish()
    }
}

impl Drop for RenderTarget {
    fn drop(&mut self) {
        self.stop();
        self.join();
        if let Some((program, id)) = self.listener.take() {
            program.remove_listener(id);
        }
    }
}

fn apply_priority(priority: RenderPriority) {
    let level = match priority {
        RenderPriority::Default => return,
        RenderPriority::Min => ThreadPriority::Min,
        RenderPriority::Max => ThreadPriority::Max,
    };
    if let Err(e) = set_current_thread_priority(level) {
        warn!("Could not set render thread priority to {:?}: {:?}", priority, e);
    }
}

/// Maps frame timestamps to wall-clock deadlines
///
/// Anchored on the first frame. A frame that does not start where the
/// previous one ended (a seek or a source restart) re-anchors at the current
/// time, so a backward jump is not rushed and a forward jump does not stall.
#[derive(Debug)]
struct Pacer {
    origin: f64,
    anchor: Option<(f64, f64)>,
    expected: Option<f64>,
}

impl Pacer {
    /// Largest gap between consecutive frames still treated as continuous
    const TOLERANCE: f64 = 1e-6;

    fn new(origin: f64) -> Self {
        Self {
            origin,
            anchor: None,
            expected: None,
        }
    }

    /// Wall-clock time at which the frame spanning `timestamp..end` is over
    fn deadline(&mut self, now: f64, timestamp: f64, end: f64) -> f64 {
        let (wall, stream) = match (self.anchor, self.expected) {
            (Some(anchor), Some(expected))
                if (timestamp - expected).abs() <= Self::TOLERANCE =>
            {
                anchor
            }
            (Some(_), _) => {
                debug!("Frame timestamp jumped to {:.3}s, re-anchoring pacing", timestamp);
                (now, timestamp)
            }
            (None, _) => (self.origin, timestamp),
        };
        self.anchor = Some((wall, stream));
        self.expected = Some(end);
        wall + end - stream
    }
}

fn render_loop(shared: Arc<TargetShared>, mut sink: Box<dyn FrameSink>) -> Box<dyn FrameSink> {
    apply_priority(shared.priority);
    info!(
        "Render thread '{}' started ({} Hz, {} channels, {:?})",
        shared.info.name, shared.info.sample_rate, shared.info.channels, shared.pacing
    );
    shared.events.publish(TargetEvent::Started);

    let mut pacer = Pacer::new(shared.time());
    let mut frame = shared.new_frame();

    while shared.is_rendering() {
        match shared.cycle(sink.as_mut(), &mut frame) {
            Ok(Cycle::Rendered) => {
                if shared.pacing == Pacing::RealTime {
                    let (timestamp, end) = {
                        let current = shared.current_frame.load();
                        (current.timestamp(), current.end_time())
                    };
                    let deadline = pacer.deadline(shared.time(), timestamp, end);
                    shared.sleep_until(deadline);
                }
            }
            Ok(Cycle::Idle) => shared.wait(IDLE_WAIT),
            Ok(Cycle::EndOfSource) => {
                info!("Render target '{}' reached end of source", shared.info.name);
                shared.events.publish(TargetEvent::EndOfSource);
                break;
            }
            Err(e) => {
                error!("Render target '{}' stopped: {}", shared.info.name, e);
                shared.events.publish(TargetEvent::Error {
                    message: e.to_string(),
                });
                break;
            }
        }
    }

    shared.rendering.store(false, Ordering::Release);
    let cycles = shared.cycles.load(Ordering::Relaxed);
    let overruns = shared.overruns.load(Ordering::Relaxed);
    info!(
        "Render thread '{}' stopped after {} cycles ({} overruns)",
        shared.info.name, cycles, overruns
    );
    shared.events.publish(TargetEvent::Stopped { cycles, overruns });
    sink
}
