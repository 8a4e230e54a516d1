//! Streaming response reduction for LLM chunk events.
//!
//! This module folds the chunk events of one model call (text deltas and tool-call lifecycle
//! events) into the in-flight assistant message, one immutable snapshot per change.

mod reducer;
mod tracker;
mod types;

pub use reducer::StreamReducer;
pub use tracker::ToolInvocationTracker;
pub use types::{Applied, ChunkEvent, Completion};
