//! Render Commands
//!
//! A command is one stage of a program. The command object itself is shared
//! and immutable apart from its [`ParameterSet`]; everything a stage mutates
//! while rendering lives in its per-target `State`, created on first use by
//! [`Command::create_state`] and owned by the target's state cache.
//!
//! Programs store commands type-erased as [`CommandHandle`]s. Identity is a
//! process-wide [`CommandId`]: two commands are never equal, whatever their
//! configuration.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::error::{RenderError, RenderResult};
use crate::frame::Frame;
use crate::parameter::ParameterSet;
use crate::state::{StateCache, StateHandle};
use crate::target::TargetInfo;

/// Process-unique command identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId(u64);

impl CommandId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        CommandId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Behaviour shared by stages and frame sources
pub trait Command: Send + Sync + 'static {
    /// Mutable per-target state; `()` for stateless commands
    type State: Send + 'static;

    fn name(&self) -> &'static str;

    fn parameters(&self) -> &ParameterSet;

    /// Build the state for one target. Called exactly once per
    /// (command, target) pair.
    fn create_state(&self, target: &TargetInfo) -> RenderResult<Self::State>;
}

/// A stage that transforms the frame in place
pub trait RenderCommand: Command {
    fn run(&self, state: &mut Self::State, cx: &mut RenderContext<'_>) -> RenderResult<()>;

    /// Commands this one runs itself (a nested program's children)
    fn nested(&self) -> Vec<CommandHandle> {
        Vec::new()
    }
}

/// Outcome of pulling from a source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pull {
    /// The frame holds fresh samples
    Frame,
    /// The source is exhausted
    EndOfSource,
}

/// A command that produces the frame consumed by the rest of the program
pub trait FrameSource: Command {
    /// Frames per second this source produces for `target`
    fn frame_rate(&self, target: &TargetInfo) -> f64;

    /// Total frames, or `None` when unknown or unbounded
    fn frame_count(&self, target: &TargetInfo) -> Option<u64>;

    /// Fill the context's frame with the next block. May block.
    fn pull(&self, state: &mut Self::State, cx: &mut RenderContext<'_>) -> RenderResult<Pull>;
}

/// Object-safe view of a command used by programs and targets
pub(crate) trait ErasedCommand: Send + Sync {
    fn name(&self) -> &'static str;
    fn parameters(&self) -> &ParameterSet;
    fn create_state(&self, target: &TargetInfo) -> RenderResult<Box<dyn Any + Send>>;
    fn run(&self, state: &mut (dyn Any + Send), cx: &mut RenderContext<'_>) -> RenderResult<()>;
    fn nested(&self) -> Vec<CommandHandle>;
    fn is_source(&self) -> bool;
    fn source_timing(&self, target: &TargetInfo) -> Option<(f64, Option<u64>)>;
}

fn downcast<'s, S: 'static>(
    state: &'s mut (dyn Any + Send),
    command: &'static str,
) -> RenderResult<&'s mut S> {
    state
        .downcast_mut::<S>()
        .ok_or(RenderError::StateType { command })
}

struct StageAdapter<C>(Arc<C>);

impl<C: RenderCommand> ErasedCommand for StageAdapter<C> {
    fn name(&self) -> &'static str {
        self.0.name()
    }

    fn parameters(&self) -> &ParameterSet {
        self.0.parameters()
    }

    fn create_state(&self, target: &TargetInfo) -> RenderResult<Box<dyn Any + Send>> {
        Ok(Box::new(self.0.create_state(target)?))
    }

    fn run(&self, state: &mut (dyn Any + Send), cx: &mut RenderContext<'_>) -> RenderResult<()> {
        let state = downcast::<C::State>(state, self.0.name())?;
        self.0.run(state, cx)
    }

    fn nested(&self) -> Vec<CommandHandle> {
        self.0.nested()
    }

    fn is_source(&self) -> bool {
        false
    }

    fn source_timing(&self, _target: &TargetInfo) -> Option<(f64, Option<u64>)> {
        None
    }
}

struct SourceAdapter<S>(Arc<S>);

impl<S: FrameSource> ErasedCommand for SourceAdapter<S> {
    fn name(&self) -> &'static str {
        self.0.name()
    }

    fn parameters(&self) -> &ParameterSet {
        self.0.parameters()
    }

    fn create_state(&self, target: &TargetInfo) -> RenderResult<Box<dyn Any + Send>> {
        Ok(Box::new(self.0.create_state(target)?))
    }

    fn run(&self, state: &mut (dyn Any + Send), cx: &mut RenderContext<'_>) -> RenderResult<()> {
        let state = downcast::<S::State>(state, self.0.name())?;
        if self.0.pull(state, cx)? == Pull::EndOfSource {
            cx.signal_end_of_source();
        }
        Ok(())
    }

    fn nested(&self) -> Vec<CommandHandle> {
        Vec::new()
    }

    fn is_source(&self) -> bool {
        true
    }

    fn source_timing(&self, target: &TargetInfo) -> Option<(f64, Option<u64>)> {
        Some((self.0.frame_rate(target), self.0.frame_count(target)))
    }
}

/// Type-erased, cheaply clonable reference to a command
#[derive(Clone)]
pub struct CommandHandle {
    id: CommandId,
    inner: Arc<dyn ErasedCommand>,
}

impl CommandHandle {
    fn from_erased(inner: Arc<dyn ErasedCommand>) -> Self {
        Self {
            id: CommandId::next(),
            inner,
        }
    }

    pub fn id(&self) -> CommandId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.inner.name()
    }

    pub fn parameters(&self) -> &ParameterSet {
        self.inner.parameters()
    }

    pub fn is_frame_source(&self) -> bool {
        self.inner.is_source()
    }

    /// Frame rate for `target`, if this is a source
    pub fn frame_rate(&self, target: &TargetInfo) -> Option<f64> {
        self.inner.source_timing(target).map(|(rate, _)| rate)
    }

    /// Known frame count for `target`, if this is a source with a bounded length
    pub fn frame_count(&self, target: &TargetInfo) -> Option<u64> {
        self.inner.source_timing(target).and_then(|(_, count)| count)
    }

    /// Commands run by this one, excluding itself
    pub fn nested(&self) -> Vec<CommandHandle> {
        self.inner.nested()
    }

    pub(crate) fn create_state(&self, target: &TargetInfo) -> RenderResult<Box<dyn Any + Send>> {
        self.inner.create_state(target)
    }
}

impl PartialEq for CommandHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for CommandHandle {}

impl Hash for CommandHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for CommandHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name(), self.id)
    }
}

/// A typed command together with its handle
///
/// Dereferences to the command, so stage-specific query methods stay
/// reachable after the stage has been added to a program.
pub struct Stage<C> {
    handle: CommandHandle,
    command: Arc<C>,
}

impl<C: RenderCommand> Stage<C> {
    pub fn new(command: C) -> Self {
        Self::from_arc(Arc::new(command))
    }

    pub fn from_arc(command: Arc<C>) -> Self {
        let handle = CommandHandle::from_erased(Arc::new(StageAdapter(command.clone())));
        Self { handle, command }
    }
}

impl<S: FrameSource> Stage<S> {
    pub fn source(source: S) -> Self {
        let command = Arc::new(source);
        let handle = CommandHandle::from_erased(Arc::new(SourceAdapter(command.clone())));
        Self { handle, command }
    }
}

impl<C: Command> Stage<C> {
    pub fn handle(&self) -> &CommandHandle {
        &self.handle
    }

    pub fn id(&self) -> CommandId {
        self.handle.id
    }

    pub fn command(&self) -> &Arc<C> {
        &self.command
    }

    /// Read-only access to this command's per-target state for other stages
    pub fn state_handle(&self) -> StateHandle<C::State> {
        StateHandle::new(self.handle.clone())
    }
}

impl<C> Clone for Stage<C> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            command: self.command.clone(),
        }
    }
}

impl<C> Deref for Stage<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.command
    }
}

impl<C> fmt::Debug for Stage<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.handle.fmt(f)
    }
}

impl<C> From<&Stage<C>> for CommandHandle {
    fn from(stage: &Stage<C>) -> Self {
        stage.handle.clone()
    }
}

impl<C> From<Stage<C>> for CommandHandle {
    fn from(stage: Stage<C>) -> Self {
        stage.handle
    }
}

/// Everything a command sees while running on one target
pub struct RenderContext<'a> {
    target: &'a TargetInfo,
    states: &'a StateCache,
    start: Instant,
    frame: &'a mut Frame,
    end_of_source: bool,
}

impl<'a> RenderContext<'a> {
    pub(crate) fn new(
        target: &'a TargetInfo,
        states: &'a StateCache,
        start: Instant,
        frame: &'a mut Frame,
    ) -> Self {
        Self {
            target,
            states,
            start,
            frame,
            end_of_source: false,
        }
    }

    pub fn target(&self) -> &TargetInfo {
        self.target
    }

    /// Seconds since the target was created
    pub fn time(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    pub fn frame(&self) -> &Frame {
        self.frame
    }

    pub fn frame_mut(&mut self) -> &mut Frame {
        self.frame
    }

    pub(crate) fn states(&self) -> &StateCache {
        self.states
    }

    /// Whether a source in this cycle reported exhaustion
    pub fn end_of_source(&self) -> bool {
        self.end_of_source
    }

    pub(crate) fn signal_end_of_source(&mut self) {
        self.end_of_source = true;
    }

    /// Run `command` against its state for this target, creating the
    /// state first if needed
    pub fn run_command(&mut self, command: &CommandHandle) -> RenderResult<()> {
        let state = self.states.get_or_create(command, self.target)?;
        let mut state = state.lock();
        command.inner.run(&mut **state, self)
    }
}
