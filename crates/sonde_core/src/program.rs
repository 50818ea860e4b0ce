//! Render Program
//!
//! An ordered list of commands whose first element is a frame source. The
//! list is published through an `ArcSwap`: a cycle loads one snapshot and
//! iterates it without locking, while edits copy the list, mutate the copy
//! and swap it in. A cycle therefore sees either the whole list before an
//! edit or the whole list after it.
//!
//! A program is itself a [`RenderCommand`], so programs nest.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::debug;

use crate::command::{Command, CommandHandle, FrameSource, RenderCommand, RenderContext, Stage};
use crate::error::{RenderError, RenderResult};
use crate::parameter::ParameterSet;
use crate::target::TargetInfo;

static NO_PARAMETERS: ParameterSet = ParameterSet::empty();

/// A single edit to a program
#[derive(Debug, Clone)]
pub enum UpdateKind {
    /// Insert right after the frame source
    AddFirst(CommandHandle),
    /// Append at the end
    AddLast(CommandHandle),
    Remove(CommandHandle),
    Replace { old: CommandHandle, new: CommandHandle },
}

impl UpdateKind {
    fn apply(&self, commands: &mut Vec<CommandHandle>) -> RenderResult<()> {
        match self {
            UpdateKind::AddFirst(command) => {
                let at = 1.min(commands.len());
                commands.insert(at, command.clone());
            }
            UpdateKind::AddLast(command) => commands.push(command.clone()),
            UpdateKind::Remove(command) => {
                let at = position(commands, command)?;
                if at == 0 {
                    return Err(RenderError::NoFrameSource);
                }
                commands.remove(at);
            }
            UpdateKind::Replace { old, new } => {
                let at = position(commands, old)?;
                if at == 0 && !new.is_frame_source() {
                    return Err(RenderError::NoFrameSource);
                }
                commands[at] = new.clone();
            }
        }
        Ok(())
    }
}

fn position(commands: &[CommandHandle], command: &CommandHandle) -> RenderResult<usize> {
    commands
        .iter()
        .position(|c| c == command)
        .ok_or(RenderError::UnknownCommand(command.id().get()))
}

/// Notification delivered to program listeners after an edit is published
#[derive(Debug, Clone)]
pub struct ProgramUpdate {
    pub kind: UpdateKind,
    pub previous: Arc<Vec<CommandHandle>>,
    pub current: Arc<Vec<CommandHandle>>,
}

impl ProgramUpdate {
    /// Commands present before the edit and absent after it
    pub fn removed(&self) -> Vec<CommandHandle> {
        self.previous
            .iter()
            .filter(|c| !self.current.contains(c))
            .cloned()
            .collect()
    }
}

/// Token for removing a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&ProgramUpdate) + Send + Sync>;

/// Ordered command list sharing one frame source
pub struct RenderProgram {
    commands: ArcSwap<Vec<CommandHandle>>,
    /// Serializes writers; readers never take it
    update_lock: Mutex<()>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
}

impl RenderProgram {
    /// Program consisting of `source` alone
    pub fn new<S: FrameSource>(source: &Stage<S>) -> Self {
        Self::with_commands(source, Vec::new())
    }

    /// Program running `stages` in order after `source`
    pub fn with_commands<S: FrameSource>(source: &Stage<S>, stages: Vec<CommandHandle>) -> Self {
        let mut commands = Vec::with_capacity(stages.len() + 1);
        commands.push(source.handle().clone());
        commands.extend(stages);
        Self {
            commands: ArcSwap::from_pointee(commands),
            update_lock: Mutex::new(()),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    /// The currently published command list
    pub fn commands(&self) -> Arc<Vec<CommandHandle>> {
        self.commands.load_full()
    }

    pub fn len(&self) -> usize {
        self.commands.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.load().is_empty()
    }

    pub fn contains(&self, command: &CommandHandle) -> bool {
        self.commands.load().contains(command)
    }

    /// First frame source in the program
    pub fn frame_source(&self) -> Option<CommandHandle> {
        self.commands
            .load()
            .iter()
            .find(|c| c.is_frame_source())
            .cloned()
    }

    pub fn add_first(&self, command: impl Into<CommandHandle>) -> RenderResult<()> {
        self.update(UpdateKind::AddFirst(command.into()))
    }

    pub fn add_last(&self, command: impl Into<CommandHandle>) -> RenderResult<()> {
        self.update(UpdateKind::AddLast(command.into()))
    }

    /// Remove `command`; the frame source cannot be removed
    pub fn remove(&self, command: impl Into<CommandHandle>) -> RenderResult<()> {
        self.update(UpdateKind::Remove(command.into()))
    }

    /// Swap `old` for `new` in place; the source may only be replaced by
    /// another source
    pub fn replace(
        &self,
        old: impl Into<CommandHandle>,
        new: impl Into<CommandHandle>,
    ) -> RenderResult<()> {
        self.update(UpdateKind::Replace {
            old: old.into(),
            new: new.into(),
        })
    }

    /// Apply an edit: copy, mutate, publish, then notify listeners
    pub fn update(&self, kind: UpdateKind) -> RenderResult<()> {
        let update = {
            let _writer = self.update_lock.lock();
            let previous = self.commands.load_full();
            let mut next = Vec::clone(&previous);
            kind.apply(&mut next)?;
            let current = Arc::new(next);
            self.commands.store(current.clone());
            ProgramUpdate {
                kind,
                previous,
                current,
            }
        };
        debug!(
            "Program updated ({:?}), {} commands",
            update.kind,
            update.current.len()
        );

        // Listeners run outside the writer lock so they may edit programs
        let listeners: Vec<Listener> = self.listeners.lock().iter().map(|(_, l)| l.clone()).collect();
        for listener in listeners {
            listener(&update);
        }
        Ok(())
    }

    pub fn add_listener(&self, listener: impl Fn(&ProgramUpdate) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(listener, _)| *listener != id);
        listeners.len() != before
    }
}

impl fmt::Debug for RenderProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderProgram")
            .field("commands", &self.commands.load())
            .finish()
    }
}

impl Command for RenderProgram {
    type State = ();

    fn name(&self) -> &'static str {
        "Program"
    }

    fn parameters(&self) -> &ParameterSet {
        &NO_PARAMETERS
    }

    fn create_state(&self, _target: &TargetInfo) -> RenderResult<()> {
        Ok(())
    }
}

impl RenderCommand for RenderProgram {
    /// Run one snapshot of the list in order; stops early when the source
    /// is exhausted
    fn run(&self, _state: &mut (), cx: &mut RenderContext<'_>) -> RenderResult<()> {
        let commands = self.commands.load_full();
        for command in commands.iter() {
            cx.run_command(command)?;
            if cx.end_of_source() {
                break;
            }
        }
        Ok(())
    }

    fn nested(&self) -> Vec<CommandHandle> {
        self.commands.load().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Pull;
    use crate::frame::Frame;
    use crate::state::StateCache;
    use std::time::Instant;

    /// Source emitting one-sample frames
    struct Ones {
        parameters: ParameterSet,
    }

    impl Command for Ones {
        type State = ();
        fn name(&self) -> &'static str {
            "Ones"
        }
        fn parameters(&self) -> &ParameterSet {
            &self.parameters
        }
        fn create_state(&self, _target: &TargetInfo) -> RenderResult<()> {
            Ok(())
        }
    }

    impl FrameSource for Ones {
        fn frame_rate(&self, target: &TargetInfo) -> f64 {
            target.sample_rate() as f64
        }
        fn frame_count(&self, _target: &TargetInfo) -> Option<u64> {
            None
        }
        fn pull(&self, _state: &mut (), cx: &mut RenderContext<'_>) -> RenderResult<Pull> {
            cx.frame_mut().copy_from(&[1.0]);
            Ok(Pull::Frame)
        }
    }

    /// Stage appending its tag to a shared log
    struct Log {
        tag: u32,
        log: Arc<Mutex<Vec<u32>>>,
        parameters: ParameterSet,
    }

    impl Command for Log {
        type State = ();
        fn name(&self) -> &'static str {
            "Log"
        }
        fn parameters(&self) -> &ParameterSet {
            &self.parameters
        }
        fn create_state(&self, _target: &TargetInfo) -> RenderResult<()> {
            Ok(())
        }
    }

    impl RenderCommand for Log {
        fn run(&self, _state: &mut (), _cx: &mut RenderContext<'_>) -> RenderResult<()> {
            self.log.lock().push(self.tag);
            Ok(())
        }
    }

    fn source() -> Stage<Ones> {
        Stage::source(Ones {
            parameters: ParameterSet::empty(),
        })
    }

    fn log_stage(tag: u32, log: &Arc<Mutex<Vec<u32>>>) -> Stage<Log> {
        Stage::new(Log {
            tag,
            log: log.clone(),
            parameters: ParameterSet::empty(),
        })
    }

    fn run_once(program: &Stage<RenderProgram>, states: &StateCache) {
        let info = TargetInfo::new("test", 48000, 1);
        let mut frame = Frame::new(48000, 1);
        let mut cx = RenderContext::new(&info, states, Instant::now(), &mut frame);
        cx.run_command(program.handle()).unwrap();
    }

    #[test]
    fn test_source_is_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let src = source();
        let program = RenderProgram::new(&src);
        let a = log_stage(1, &log);
        let b = log_stage(2, &log);

        program.add_last(&a).unwrap();
        program.add_first(&b).unwrap();

        let commands = program.commands();
        assert_eq!(commands.as_slice(), &[src.handle().clone(), b.handle().clone(), a.handle().clone()]);
        assert_eq!(program.frame_source().as_ref(), Some(src.handle()));
    }

    #[test]
    fn test_order_is_deterministic() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let src = source();
        let stages: Vec<CommandHandle> = (1..=5).map(|tag| log_stage(tag, &log).into()).collect();
        let program = Stage::new(RenderProgram::with_commands(&src, stages));
        let states = StateCache::new();

        for _ in 0..10 {
            run_once(&program, &states);
        }

        let log = log.lock();
        assert_eq!(log.len(), 50);
        for cycle in log.chunks(5) {
            assert_eq!(cycle, &[1, 2, 3, 4, 5]);
        }
    }

    #[test]
    fn test_remove_and_replace() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let src = source();
        let program = RenderProgram::new(&src);
        let a = log_stage(1, &log);
        let b = log_stage(2, &log);
        program.add_last(&a).unwrap();

        program.replace(&a, &b).unwrap();
        assert!(program.contains(b.handle()));
        assert!(!program.contains(a.handle()));

        assert!(matches!(program.remove(&a), Err(RenderError::UnknownCommand(_))));
        assert!(matches!(program.remove(&src), Err(RenderError::NoFrameSource)));
        assert!(matches!(program.replace(&src, &b), Err(RenderError::NoFrameSource)));

        program.remove(&b).unwrap();
        assert_eq!(program.len(), 1);
        program.replace(&src, &source()).unwrap();
        assert!(program.frame_source().is_some());
    }

    #[test]
    fn test_failed_update_publishes_nothing() {
        let src = source();
        let program = RenderProgram::new(&src);
        let before = program.commands();
        let calls = Arc::new(AtomicU64::new(0));
        let counter = calls.clone();
        program.add_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(program.remove(&src).is_err());
        assert!(Arc::ptr_eq(&before, &program.commands()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_listeners() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let src = source();
        let program = RenderProgram::new(&src);
        let a = log_stage(1, &log);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let id = program.add_listener(move |update: &ProgramUpdate| {
            sink.lock().push((update.previous.len(), update.current.len(), update.removed().len()));
        });

        program.add_last(&a).unwrap();
        program.remove(&a).unwrap();
        assert!(program.remove_listener(id));
        assert!(!program.remove_listener(id));
        program.add_last(&a).unwrap();

        assert_eq!(*seen.lock(), vec![(1, 2, 0), (2, 1, 1)]);
    }

    #[test]
    fn test_nested_program() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let inner = Stage::new(RenderProgram::with_commands(
            &source(),
            vec![log_stage(2, &log).into(), log_stage(3, &log).into()],
        ));
        let outer = Stage::new(RenderProgram::new(&source()));
        outer.add_last(log_stage(1, &log)).unwrap();
        outer.add_last(&inner).unwrap();
        outer.add_last(log_stage(4, &log)).unwrap();

        run_once(&outer, &StateCache::new());
        assert_eq!(*log.lock(), vec![1, 2, 3, 4]);
        assert_eq!(outer.handle().nested().len(), 4);
    }

    #[test]
    fn test_snapshot_survives_concurrent_edits() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let src = source();
        let program = Stage::new(RenderProgram::new(&src));
        let states = StateCache::new();

        let writer = {
            let program = program.clone();
            let log = log.clone();
            std::thread::spawn(move || {
                for tag in 0..200 {
                    program.add_last(log_stage(tag, &log)).unwrap();
                }
            })
        };

        // Every cycle must log a prefix 0, 1, 2, .. of the final list
        for _ in 0..200 {
            log.lock().clear();
            run_once(&program, &states);
            let cycle = log.lock().clone();
            assert!(cycle.iter().enumerate().all(|(i, tag)| *tag == i as u32));
        }
        writer.join().unwrap();
        assert_eq!(program.len(), 201);
    }
}
