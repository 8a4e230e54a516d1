//! Error types for chatfold.
//!
//! Errors raised after streaming has started never escape the reducer; they are folded into
//! the transcript as an [`Outcome`](crate::Outcome). The types here cover the remaining
//! paths: rejected lifecycle events, transcript invariant violations, and failures that are
//! reported before any streaming begins.

use thiserror::Error;

use crate::ToolState;

/// A lifecycle event that violates the tool invocation state machine or stream framing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Output arrived for a call that was never announced.
    #[error("tool call `{call_id}` is unknown")]
    UnknownToolCall { call_id: String },

    /// A transition that skips a required state or moves backward.
    #[error("tool call `{call_id}` cannot move from {from} to {to}")]
    InvalidTransition {
        call_id: String,
        from: ToolState,
        to: ToolState,
    },

    /// The same state was reported twice with a different payload.
    #[error("tool call `{call_id}` was replayed at {state} with a different payload")]
    ConflictingReplay { call_id: String, state: ToolState },

    /// The tool name changed between lifecycle events of one call.
    #[error("tool call `{call_id}` changed tool from `{expected}` to `{found}`")]
    ToolNameMismatch {
        call_id: String,
        expected: String,
        found: String,
    },

    /// An event arrived after `done` or `error`.
    #[error("`{kind}` event arrived after the stream finished")]
    AfterTerminal { kind: &'static str },
}

/// Transcript invariant violations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// An operation would break a transcript invariant.
    #[error("transcript invariant violation: {details}")]
    InvariantViolation { details: String },

    /// The referenced message does not exist.
    #[error("message `{id}` not found in transcript")]
    NotFound { id: String },
}

impl StoreError {
    pub(crate) fn invariant(details: impl Into<String>) -> Self {
        Self::InvariantViolation {
            details: details.into(),
        }
    }
}

/// Top-level error taxonomy surfaced to callers of the submission action and the gateway.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// The incoming message list failed shape validation.
    #[error("malformed request: {0}")]
    RequestMalformed(String),

    /// The chunk source ended without `done` or `error`.
    #[error("stream ended without a terminal event")]
    StreamTruncated,

    /// An out-of-order or conflicting lifecycle event.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The upstream reported an error mid-stream.
    #[error("upstream error: {0}")]
    StreamFailed(String),

    /// The inference collaborator could not be reached before streaming started.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The transcript rejected a mutation.
    #[error(transparent)]
    Store(#[from] StoreError),
}
