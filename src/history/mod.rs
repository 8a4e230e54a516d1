//! Conversation history for resubmission to the inference collaborator.
//!
//! A transcript is turned into an ordered list of [`HistoryMessage`]s (role plus text or
//! parts). The history can be windowed, rendered as ChatML, token-counted, or expanded into
//! OpenAI-style chat messages where tool invocations become `tool_calls` and `tool` results.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tiktoken_rs::cl100k_base;

use crate::{Message, MessageRole, Part};

/// History content: plain text or the message's parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HistoryContent {
    /// Simple text content
    Text(String),
    /// Structured parts (text and tool invocations)
    Parts(Vec<Part>),
}

/// One resubmittable conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    /// Author role
    pub role: MessageRole,
    /// Text or structured parts
    pub content: HistoryContent,
}

impl HistoryMessage {
    /// Plain text turn
    pub fn text(role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            role,
            content: HistoryContent::Text(text.into()),
        }
    }

    /// Convert a transcript message; returns `None` for messages with no content.
    ///
    /// A message made of a single text part collapses to plain text.
    pub fn from_message(message: &Message) -> Option<Self> {
        let content = match message.parts.as_slice() {
            [] => return None,
            [Part::Text { text }] => HistoryContent::Text(text.clone()),
            parts => HistoryContent::Parts(parts.to_vec()),
        };
        Some(Self {
            role: message.role,
            content,
        })
    }

    /// Text content of the turn
    pub fn to_text(&self) -> String {
        match &self.content {
            HistoryContent::Text(text) => text.clone(),
            HistoryContent::Parts(parts) => parts
                .iter()
                .filter_map(Part::as_text)
                .collect::<Vec<_>>()
                .concat(),
        }
    }

    /// Render as a ChatML block.
    pub fn to_chatml_string(&self) -> String {
        format!("<|im_start|>{}\n{}\n<|im_end|>", self.role, self.to_text())
    }

    /// Expand into OpenAI-style chat messages.
    ///
    /// Assistant tool invocations become one assistant message with `tool_calls`, followed by
    /// a `tool` message for every invocation that has output. Text after the tool calls
    /// becomes a trailing assistant message.
    pub fn to_openai_format(&self) -> Vec<serde_json::Value> {
        let parts = match &self.content {
            HistoryContent::Text(text) => {
                return vec![serde_json::json!({ "role": self.role.as_str(), "content": text })];
            }
            HistoryContent::Parts(parts) => parts,
        };

        let mut messages = Vec::new();
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        let mut tool_results = Vec::new();

        for part in parts {
            match part {
                Part::Text { text: chunk } => {
                    if !tool_calls.is_empty() {
                        flush_tool_round(
                            &mut messages,
                            &mut text,
                            &mut tool_calls,
                            &mut tool_results,
                        );
                    }
                    text.push_str(chunk);
                }
                Part::ToolInvocation(invocation) => {
                    let arguments = invocation
                        .input
                        .as_ref()
                        .map(|input| input.to_string())
                        .unwrap_or_else(|| "{}".to_string());
                    tool_calls.push(serde_json::json!({
                        "id": invocation.call_id,
                        "type": "function",
                        "function": { "name": invocation.tool_name, "arguments": arguments },
                    }));
                    if let Some(output) = &invocation.output {
                        tool_results.push(serde_json::json!({
                            "role": "tool",
                            "tool_call_id": invocation.call_id,
                            "name": invocation.tool_name,
                            "content": output.to_string(),
                        }));
                    }
                }
            }
        }

        if !tool_calls.is_empty() {
            flush_tool_round(&mut messages, &mut text, &mut tool_calls, &mut tool_results);
        }
        if !text.is_empty() {
            messages.push(serde_json::json!({ "role": self.role.as_str(), "content": text }));
        }
        messages
    }
}

fn flush_tool_round(
    messages: &mut Vec<serde_json::Value>,
    text: &mut String,
    tool_calls: &mut Vec<serde_json::Value>,
    tool_results: &mut Vec<serde_json::Value>,
) {
    messages.push(serde_json::json!({
        "role": "assistant",
        "content": std::mem::take(text),
        "tool_calls": std::mem::take(tool_calls),
    }));
    messages.append(tool_results);
}

/// Ordered history built from a transcript.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationHistory {
    messages: Vec<HistoryMessage>,
}

impl ConversationHistory {
    /// Create an empty history
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from transcript messages, skipping in-flight and empty messages.
    pub fn from_transcript(messages: &[Arc<Message>]) -> Self {
        Self {
            messages: messages
                .iter()
                .filter(|message| !message.is_in_flight())
                .filter_map(|message| HistoryMessage::from_message(message))
                .collect(),
        }
    }

    /// Append a turn
    pub fn push(&mut self, message: HistoryMessage) -> &mut Self {
        self.messages.push(message);
        self
    }

    /// Limit the number of messages to prevent context overflow.
    ///
    /// Keeps a leading system message and the most recent turns.
    pub fn limit_history(&mut self, max_messages: usize) -> &mut Self {
        if max_messages == 0 {
            self.messages.clear();
            return self;
        }
        if self.messages.len() <= max_messages {
            return self;
        }

        let system = self
            .messages
            .first()
            .filter(|message| message.role == MessageRole::System)
            .cloned();
        let keep = if system.is_some() {
            max_messages - 1
        } else {
            max_messages
        };
        let recent = self.messages.split_off(self.messages.len() - keep);
        self.messages = system.into_iter().chain(recent).collect();
        self
    }

    /// Number of turns
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True if there are no turns
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// All turns
    pub fn messages(&self) -> &[HistoryMessage] {
        &self.messages
    }

    /// Take the turns
    pub fn into_messages(self) -> Vec<HistoryMessage> {
        self.messages
    }

    /// Most recent user text, if any
    pub fn last_user_text(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == MessageRole::User)
            .map(HistoryMessage::to_text)
    }

    /// Render the whole history as ChatML
    pub fn to_chatml_string(&self) -> String {
        self.messages
            .iter()
            .map(HistoryMessage::to_chatml_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Expand into OpenAI-style chat messages
    pub fn to_openai_format(&self) -> Vec<serde_json::Value> {
        self.messages
            .iter()
            .flat_map(HistoryMessage::to_openai_format)
            .collect()
    }

    /// Count the number of tokens in the ChatML rendering.
    ///
    /// Returns 0 if the tokenizer cannot be loaded.
    pub fn count_tokens(&self) -> usize {
        match cl100k_base() {
            Ok(bpe) => bpe
                .encode_with_special_tokens(&self.to_chatml_string())
                .len(),
            Err(error) => {
                tracing::warn!(%error, "failed to load cl100k tokenizer");
                0
            }
        }
    }
}

impl From<Vec<HistoryMessage>> for ConversationHistory {
    fn from(messages: Vec<HistoryMessage>) -> Self {
        Self { messages }
    }
}
