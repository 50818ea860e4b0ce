//! Render Error Types

use thiserror::Error;

/// Misuse of a [`Parameter`](crate::Parameter) at configuration time
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("Parameter '{name}' is already registered at index {existing}, cannot move it to {requested}")]
    IndexConflict {
        name: String,
        existing: usize,
        requested: usize,
    },

    #[error("No parameter at index {0}")]
    UnknownIndex(usize),

    #[error("No parameter named '{0}'")]
    UnknownName(String),
}

/// Errors raised while assembling or running a render program
///
/// Any error returned by a stage aborts the current cycle; on the render
/// thread it stops the target.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Stage '{command}' failed: {message}")]
    Command {
        command: &'static str,
        message: String,
    },

    #[error("Frame error: {0}")]
    InvalidFrame(String),

    #[error("State for '{command}' has an unexpected type")]
    StateType { command: &'static str },

    #[error("Program has no frame source")]
    NoFrameSource,

    #[error("Command {0} is not part of the program")]
    UnknownCommand(u64),

    #[error("Target has no program installed")]
    NoProgram,

    #[error("Target is already rendering")]
    AlreadyRendering,

    #[error("Failed to spawn render thread: {0}")]
    ThreadSpawn(String),

    #[error("Sink error: {0}")]
    Sink(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parameter error: {0}")]
    Parameter(#[from] ParameterError),

    #[error("DSP error: {0}")]
    Dsp(#[from] sonde_dsp::DspError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RenderError {
    /// Stage-local failure with a readable message
    pub fn command(command: &'static str, message: impl Into<String>) -> Self {
        RenderError::Command {
            command,
            message: message.into(),
        }
    }
}

/// Result type alias for render operations
pub type RenderResult<T> = Result<T, RenderError>;
