//! Chatfold
//!
//! This crate folds the incremental output of a hosted language model into a stable,
//! append-only chat transcript. A model call produces a stream of [`ChunkEvent`]s (text
//! deltas and tool-call lifecycle events); the [`StreamReducer`] turns each event into a new
//! immutable snapshot of the in-flight assistant [`Message`], and the [`TranscriptStore`]
//! publishes versioned snapshots of the whole conversation to any number of readers.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use chatfold::{Conversation, ScriptedInference, ChunkEvent};
//! use futures_util::future::AbortHandle;
//!
//! # async fn demo() -> Result<(), chatfold::ChatError> {
//! let inference = ScriptedInference::new(vec![
//!     ChunkEvent::text_delta("Hello"),
//!     ChunkEvent::Done,
//! ]);
//!
//! let mut conversation = Conversation::new();
//! let (_cancel, registration) = AbortHandle::new_pair();
//! let completion = conversation.submit("hi", &inference, registration).await?;
//! assert_eq!(completion.message.text(), "Hello");
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Principles
//!
//! 1. **Snapshots, not shared mutation**: every chunk produces a fresh `Arc<Message>`, so a
//!    reader never observes a half-written message.
//! 2. **Closed event types**: chunk events and message parts are exhaustively matched enums.
//! 3. **Nothing is dropped**: every stream ends in a finalized message whose [`Outcome`]
//!    records completion, cancellation, truncation or failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod error;
pub use error::{ChatError, ProtocolError, StoreError};

// ============================================================================
// Streaming, transcript and history
// ============================================================================

pub mod streaming;
pub use streaming::{Applied, ChunkEvent, Completion, StreamReducer, ToolInvocationTracker};

pub mod transcript;
pub use transcript::{TranscriptSnapshot, TranscriptStore};

pub mod history;
pub use history::{ConversationHistory, HistoryContent, HistoryMessage};

// ============================================================================
// Collaborators and the submission action
// ============================================================================

pub mod inference;
pub use inference::{
    ChunkStream, Inference, InferenceRequest, ScriptedInference, ToolDefinition, ToolExecutor,
    ToolSet,
};

pub mod conversation;
pub use conversation::Conversation;

// ============================================================================
// HTTP gateway (optional feature)
// ============================================================================

#[cfg(feature = "gateway")]
pub mod gateway;
#[cfg(feature = "gateway")]
pub use gateway::{router, run_http, GatewayConfig};

// ============================================================================
// Core Message Types
// ============================================================================

/// Stable message identifier, unique within a transcript.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Generate a fresh identifier (`msg_<ULID>`).
    pub fn new() -> Self {
        Self(format!("msg_{}", ulid::Ulid::new()))
    }

    /// Wrap an identifier supplied by a client.
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System-level instructions
    System,
    /// User input
    User,
    /// Assistant response
    Assistant,
}

impl MessageRole {
    /// Convert to string representation
    pub fn as_str(&self) -> &str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether a message is still receiving chunk-driven mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageStatus {
    /// Still being written by the reducer
    InFlight,
    /// Frozen; no further mutation
    Finalized,
}

/// How a message reached its final state.
///
/// Anything other than [`Outcome::Completed`] marks the message as incomplete or failed;
/// the parts collected up to that point are kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Outcome {
    /// The stream ended with `done`
    Completed,
    /// The caller cancelled the stream
    Cancelled,
    /// The stream ended without a terminal event
    Truncated,
    /// The upstream reported an error event
    Failed {
        /// Upstream error detail
        detail: String,
    },
    /// An out-of-order or conflicting lifecycle event arrived
    ProtocolViolation {
        /// Description of the violation
        detail: String,
    },
}

impl Outcome {
    /// True when the message did not complete normally.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::Truncated | Self::Failed { .. } | Self::ProtocolViolation { .. }
        )
    }

    /// Short label used in logs and wire frames
    pub fn as_str(&self) -> &str {
        match self {
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Truncated => "truncated",
            Self::Failed { .. } => "failed",
            Self::ProtocolViolation { .. } => "protocol-violation",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed { detail } | Self::ProtocolViolation { detail } => {
                write!(f, "{}: {}", self.as_str(), detail)
            }
            _ => f.write_str(self.as_str()),
        }
    }
}

/// Lifecycle state of a tool invocation.
///
/// `input-streaming` is optional; `output-available` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolState {
    /// The model is still producing the tool input
    InputStreaming,
    /// The tool input is parsed and validated
    InputAvailable,
    /// The tool returned its output
    OutputAvailable,
}

impl ToolState {
    /// Convert to string representation
    pub fn as_str(&self) -> &str {
        match self {
            Self::InputStreaming => "input-streaming",
            Self::InputAvailable => "input-available",
            Self::OutputAvailable => "output-available",
        }
    }
}

impl std::fmt::Display for ToolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tool call's lifecycle within an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    /// Name of the tool
    pub tool_name: String,
    /// Correlation identifier for the call
    pub call_id: String,
    /// Current lifecycle state
    pub state: ToolState,
    /// Validated input, present from `input-available` on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    /// Tool output, present only at `output-available`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
}

/// A content unit within a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Part {
    /// Text accumulated from consecutive deltas
    Text {
        /// The text content
        text: String,
    },
    /// A tool call and its lifecycle
    ToolInvocation(ToolInvocation),
}

impl Part {
    /// Create a text part
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Get the text from a text part
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Get the tool invocation from a tool part
    pub fn as_tool_invocation(&self) -> Option<&ToolInvocation> {
        match self {
            Self::ToolInvocation(invocation) => Some(invocation),
            _ => None,
        }
    }
}

/// One turn in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Stable identifier
    pub id: MessageId,
    /// Author role; immutable after creation
    pub role: MessageRole,
    /// Ordered parts, append-only while in flight
    pub parts: Vec<Part>,
    /// In-flight or finalized
    pub status: MessageStatus,
    /// Set exactly when the message is finalized
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    /// Snapshot revision, incremented on every published change
    #[serde(default)]
    pub revision: u64,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create an empty in-flight message
    pub fn in_flight(id: MessageId, role: MessageRole) -> Self {
        Self {
            id,
            role,
            parts: Vec::new(),
            status: MessageStatus::InFlight,
            outcome: None,
            revision: 0,
            created_at: Utc::now(),
        }
    }

    /// Create a finalized user message with a single text part
    pub fn user(text: impl Into<String>) -> Self {
        Self::finalized_text(MessageRole::User, text)
    }

    /// Create a finalized system message
    pub fn system(text: impl Into<String>) -> Self {
        Self::finalized_text(MessageRole::System, text)
    }

    /// Create a finalized assistant message from already-known parts
    pub fn assistant(parts: Vec<Part>) -> Self {
        let mut message = Self::in_flight(MessageId::new(), MessageRole::Assistant);
        message.parts = parts;
        message.finalized(Outcome::Completed)
    }

    fn finalized_text(role: MessageRole, text: impl Into<String>) -> Self {
        let mut message = Self::in_flight(MessageId::new(), role);
        message.parts.push(Part::text(text));
        message.finalized(Outcome::Completed)
    }

    /// Return a finalized copy carrying `outcome`
    pub fn finalized(mut self, outcome: Outcome) -> Self {
        self.status = MessageStatus::Finalized;
        self.outcome = Some(outcome);
        self
    }

    /// Replace the identifier (used when a client supplies its own ids)
    pub fn with_id(mut self, id: MessageId) -> Self {
        self.id = id;
        self
    }

    /// True while the message is still receiving chunks
    pub fn is_in_flight(&self) -> bool {
        self.status == MessageStatus::InFlight
    }

    /// Concatenate all text parts
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .concat()
    }

    /// Find the tool invocation for `call_id`
    pub fn tool_invocation(&self, call_id: &str) -> Option<&ToolInvocation> {
        self.parts
            .iter()
            .filter_map(Part::as_tool_invocation)
            .find(|invocation| invocation.call_id == call_id)
    }
}

// ============================================================================
// Tests
// ============================================================================
