//! Type definitions for streaming responses.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{ChatError, Message, Outcome, ProtocolError};

/// One incremental unit emitted by the inference collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ChunkEvent {
    /// Text content delta
    TextDelta { value: String },
    /// The model started producing input for a tool call
    ToolInputStart { call_id: String, tool_name: String },
    /// Tool input is complete and validated
    ToolInputAvailable {
        call_id: String,
        tool_name: String,
        input: serde_json::Value,
    },
    /// Tool output is available (terminal for the call)
    ToolOutputAvailable {
        call_id: String,
        output: serde_json::Value,
    },
    /// Stream completed
    Done,
    /// Upstream failure; terminates the stream
    Error { detail: String },
}

impl ChunkEvent {
    /// Create a text delta
    pub fn text_delta(value: impl Into<String>) -> Self {
        Self::TextDelta {
            value: value.into(),
        }
    }

    /// Create a tool-input-available event
    pub fn tool_input(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self::ToolInputAvailable {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            input,
        }
    }

    /// Create a tool-output-available event
    pub fn tool_output(call_id: impl Into<String>, output: serde_json::Value) -> Self {
        Self::ToolOutputAvailable {
            call_id: call_id.into(),
            output,
        }
    }

    /// Create an error event
    pub fn error(detail: impl Into<String>) -> Self {
        Self::Error {
            detail: detail.into(),
        }
    }

    /// Wire tag of this event
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TextDelta { .. } => "text-delta",
            Self::ToolInputStart { .. } => "tool-input-start",
            Self::ToolInputAvailable { .. } => "tool-input-available",
            Self::ToolOutputAvailable { .. } => "tool-output-available",
            Self::Done => "done",
            Self::Error { .. } => "error",
        }
    }

    /// True for `done` and `error`
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }
}

/// Result of folding one event into the in-flight message.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    /// The message changed; carries the new snapshot
    Updated(Arc<Message>),
    /// Identical replay of an event already applied
    Unchanged,
    /// A terminal event arrived
    Finished(Outcome),
}

/// Final state of one driven stream.
#[derive(Debug, Clone)]
pub struct Completion {
    /// The finalized assistant message as stored in the transcript
    pub message: Arc<Message>,
    /// How the stream ended
    pub outcome: Outcome,
    pub(crate) violation: Option<ProtocolError>,
}

impl Completion {
    /// The terminal error, if the stream did not complete or get cancelled.
    pub fn error(&self) -> Option<ChatError> {
        match &self.outcome {
            Outcome::Completed | Outcome::Cancelled => None,
            Outcome::Truncated => Some(ChatError::StreamTruncated),
            Outcome::Failed { detail } => Some(ChatError::StreamFailed(detail.clone())),
            Outcome::ProtocolViolation { detail } => Some(match &self.violation {
                Some(violation) => ChatError::Protocol(violation.clone()),
                None => ChatError::StreamFailed(detail.clone()),
            }),
        }
    }
}
