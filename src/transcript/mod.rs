//! Conversation transcript storage and snapshot publishing.
//!
//! A [`TranscriptStore`] owns the ordered messages of one conversation. Every mutation
//! publishes a new [`TranscriptSnapshot`] through a `tokio::sync::watch` channel, so a
//! rendering collaborator always sees a complete transcript and never an older version than
//! one it has already seen.

mod store;

pub use store::{TranscriptSnapshot, TranscriptStore};

#[cfg(test)]
mod tests;
