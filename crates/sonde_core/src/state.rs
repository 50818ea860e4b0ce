//! Per-Target State Cache
//!
//! Each target owns one state object per command it has run, keyed by
//! [`CommandId`]. The map lock is held only to look up or insert an entry;
//! a command's run holds the lock of its own entry, never the map's.
//!
//! Entries are removed explicitly: when a command leaves the installed
//! program, when another program is installed, or on
//! [`RenderTarget::prune_states`](crate::RenderTarget::prune_states).

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::command::{CommandHandle, CommandId, RenderContext};
use crate::error::{RenderError, RenderResult};
use crate::target::{RenderTarget, TargetInfo};

/// One cached state object
pub(crate) type SharedState = Arc<Mutex<Box<dyn Any + Send>>>;

/// Map of command identity to state for one target
#[derive(Default)]
pub struct StateCache {
    states: Mutex<HashMap<CommandId, SharedState>>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached state for `command`, created under the map lock if absent
    pub(crate) fn get_or_create(
        &self,
        command: &CommandHandle,
        target: &TargetInfo,
    ) -> RenderResult<SharedState> {
        let mut states = self.states.lock();
        if let Some(state) = states.get(&command.id()) {
            return Ok(state.clone());
        }
        let state: SharedState = Arc::new(Mutex::new(command.create_state(target)?));
        states.insert(command.id(), state.clone());
        Ok(state)
    }

    pub(crate) fn get(&self, id: CommandId) -> Option<SharedState> {
        self.states.lock().get(&id).cloned()
    }

    pub fn contains(&self, id: CommandId) -> bool {
        self.states.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.lock().is_empty()
    }

    pub fn remove(&self, id: CommandId) -> bool {
        self.states.lock().remove(&id).is_some()
    }

    /// Drop every entry whose command is not in `keep`; returns how many
    pub fn retain(&self, keep: &HashSet<CommandId>) -> usize {
        let mut states = self.states.lock();
        let before = states.len();
        states.retain(|id, _| keep.contains(id));
        before - states.len()
    }

    pub fn clear(&self) {
        self.states.lock().clear();
    }
}

/// Identities of `root` and every command nested under it
pub fn reachable(root: &CommandHandle) -> HashSet<CommandId> {
    let mut seen = HashSet::new();
    let mut pending = vec![root.clone()];
    while let Some(command) = pending.pop() {
        if seen.insert(command.id()) {
            pending.extend(command.nested());
        }
    }
    seen
}

/// Typed, read-only access to another command's per-target state
///
/// Lets a stage consume an upstream stage's result (for example the
/// spectrum computed by `Fft`) without holding a reference to that stage.
/// The state is created on first access if the upstream stage has not run
/// yet on this target.
pub struct StateHandle<S> {
    command: CommandHandle,
    _state: PhantomData<fn() -> S>,
}

impl<S: Send + 'static> StateHandle<S> {
    pub(crate) fn new(command: CommandHandle) -> Self {
        Self {
            command,
            _state: PhantomData,
        }
    }

    pub fn command(&self) -> &CommandHandle {
        &self.command
    }

    /// Borrow the state for the target `cx` renders to
    ///
    /// Must not be called from the run of the command that owns the state.
    pub fn with<R>(&self, cx: &RenderContext<'_>, f: impl FnOnce(&S) -> R) -> RenderResult<R> {
        let state = cx.states().get_or_create(&self.command, cx.target())?;
        self.apply(&state, f)
    }

    /// Borrow the state cached on `target`, if the command has run there
    pub fn with_target<R>(
        &self,
        target: &RenderTarget,
        f: impl FnOnce(&S) -> R,
    ) -> RenderResult<Option<R>> {
        match target.states().get(self.command.id()) {
            Some(state) => self.apply(&state, f).map(Some),
            None => Ok(None),
        }
    }

    /// Copy of the state for the target `cx` renders to
    pub fn read(&self, cx: &RenderContext<'_>) -> RenderResult<S>
    where
        S: Clone,
    {
        self.with(cx, S::clone)
    }

    fn apply<R>(&self, state: &SharedState, f: impl FnOnce(&S) -> R) -> RenderResult<R> {
        let state = state.lock();
        let typed = state.downcast_ref::<S>().ok_or(RenderError::StateType {
            command: self.command.name(),
        })?;
        Ok(f(typed))
    }
}

impl<S> Clone for StateHandle<S> {
    fn clone(&self) -> Self {
        Self {
            command: self.command.clone(),
            _state: PhantomData,
        }
    }
}
