//! Frame Sources

mod buffer;
mod tone;

pub use buffer::{BufferSource, BufferState};
pub use tone::{ToneSource, ToneState, DEFAULT_BLOCK};
