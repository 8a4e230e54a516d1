//! Inference collaborator boundary.
//!
//! The hosted model is reached only through [`Inference`]: it takes the conversation history
//! and the declared tools and returns a lazy stream of [`ChunkEvent`]s. Dropping the stream
//! releases the underlying source. Tools are executed by the collaborator, never by the
//! reducer, which only records their lifecycle.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream, StreamExt};

use crate::{ChatError, ChunkEvent, ConversationHistory};

pub mod demo;

/// Lazy, cancellable sequence of chunk events.
pub type ChunkStream = BoxStream<'static, ChunkEvent>;

/// Executes one tool call with schema-validated input.
pub trait ToolExecutor: Send + Sync {
    /// Run the tool; the error string is reported back to the model.
    fn execute(
        &self,
        input: serde_json::Value,
    ) -> BoxFuture<'static, Result<serde_json::Value, String>>;
}

/// A declared tool: description, JSON input schema and executor.
#[derive(Clone)]
pub struct ToolDefinition {
    /// What the tool does, as shown to the model
    pub description: String,
    /// JSON schema the input must satisfy
    pub input_schema: serde_json::Value,
    /// Runs the call
    pub executor: Arc<dyn ToolExecutor>,
}

impl std::fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .finish_non_exhaustive()
    }
}

/// Tools by name.
#[derive(Debug, Clone, Default)]
pub struct ToolSet {
    tools: BTreeMap<String, ToolDefinition>,
}

impl ToolSet {
    /// Create an empty tool set
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a tool
    pub fn with_tool(mut self, name: impl Into<String>, tool: ToolDefinition) -> Self {
        self.tools.insert(name.into(), tool);
        self
    }

    /// Look up a tool
    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    /// Tool names in order
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// True if no tools are declared
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Input to one inference call.
#[derive(Debug, Clone, Default)]
pub struct InferenceRequest {
    /// Finalized turns, oldest first
    pub history: ConversationHistory,
    /// Tools the model may call
    pub tools: ToolSet,
}

/// The hosted model, seen as a chunk-event source.
pub trait Inference: Send + Sync {
    /// Start one call.
    ///
    /// Fails with [`ChatError::UpstreamUnavailable`] when the model cannot be reached before
    /// streaming starts. Failures after that arrive as a `ChunkEvent::Error` or as an early
    /// end of the stream.
    fn start(&self, request: InferenceRequest) -> BoxFuture<'_, Result<ChunkStream, ChatError>>;
}

/// Replays a fixed list of events; an empty script or a missing `done` simulates a dropped
/// connection.
#[derive(Debug, Clone, Default)]
pub struct ScriptedInference {
    events: Vec<ChunkEvent>,
    unavailable: Option<String>,
}

impl ScriptedInference {
    /// Replay `events` on every call
    pub fn new(events: Vec<ChunkEvent>) -> Self {
        Self {
            events,
            unavailable: None,
        }
    }

    /// Fail every call before streaming
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            events: Vec::new(),
            unavailable: Some(reason.into()),
        }
    }
}

impl Inference for ScriptedInference {
    fn start(&self, _request: InferenceRequest) -> BoxFuture<'_, Result<ChunkStream, ChatError>> {
        let result = match &self.unavailable {
            Some(reason) => Err(ChatError::UpstreamUnavailable(reason.clone())),
            None => Ok(stream::iter(self.events.clone()).boxed()),
        };
        Box::pin(async move { result })
    }
}
