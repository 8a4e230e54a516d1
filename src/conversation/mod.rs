//! Submission action for one conversation.
//!
//! A [`Conversation`] owns the [`TranscriptStore`] and is its only writer. A user turn is
//! accepted only while no message is in flight; the assistant reply is then streamed through a
//! [`StreamReducer`]. Cancellation uses `futures_util` abort handles: the caller keeps the
//! [`AbortHandle`](futures_util::future::AbortHandle) and passes the registration in.

use std::ops::ControlFlow;
use std::sync::Arc;

use futures_util::future::AbortRegistration;
use futures_util::stream::Abortable;
use tokio::sync::watch;

use crate::{
    ChatError, Completion, ConversationHistory, Inference, InferenceRequest, Message, MessageId,
    MessageRole, StoreError, StreamReducer, ToolSet, TranscriptSnapshot, TranscriptStore,
};

/// One conversation: transcript, declared tools and history window.
#[derive(Debug, Default)]
pub struct Conversation {
    store: TranscriptStore,
    tools: ToolSet,
    max_history: Option<usize>,
}

impl Conversation {
    /// Create an empty conversation without tools
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue from an existing transcript
    pub fn with_store(store: TranscriptStore) -> Self {
        Self {
            store,
            ..Self::default()
        }
    }

    /// Declare the tools offered to the model
    pub fn with_tools(mut self, tools: ToolSet) -> Self {
        self.tools = tools;
        self
    }

    /// Send at most `max_messages` turns of history per call
    pub fn with_max_history(mut self, max_messages: usize) -> Self {
        self.max_history = Some(max_messages);
        self
    }

    /// Read access to the transcript
    pub fn store(&self) -> &TranscriptStore {
        &self.store
    }

    /// Subscribe to transcript snapshots (for rendering)
    pub fn subscribe(&self) -> watch::Receiver<TranscriptSnapshot> {
        self.store.subscribe()
    }

    /// Append a finalized user message.
    ///
    /// Rejected while another message is in flight.
    pub fn submit_user_message(&mut self, text: &str) -> Result<Arc<Message>, ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::RequestMalformed(
                "message text must be non-empty".to_string(),
            ));
        }
        if let Some(current) = self.store.in_flight() {
            return Err(StoreError::invariant(format!(
                "cannot accept a new turn while `{}` is in flight",
                current.id
            ))
            .into());
        }

        let message = Arc::new(Message::user(text));
        self.store.append(Arc::clone(&message))?;
        tracing::debug!(message_id = %message.id, "user message submitted");
        Ok(message)
    }

    /// Request an assistant reply for the current transcript.
    ///
    /// Errors before streaming starts are returned as `Err`; anything after that is folded
    /// into the returned [`Completion`].
    pub async fn respond<I>(
        &mut self,
        inference: &I,
        cancel: AbortRegistration,
    ) -> Result<Completion, ChatError>
    where
        I: Inference + ?Sized,
    {
        let mut history = ConversationHistory::from_transcript(self.store.messages());
        if let Some(max) = self.max_history {
            history.limit_history(max);
        }
        let request = InferenceRequest {
            history,
            tools: self.tools.clone(),
        };

        let chunks = inference.start(request).await.map_err(|error| {
            tracing::error!(%error, "inference call failed before streaming");
            error
        })?;

        let reducer = StreamReducer::new(MessageId::new());
        let completion = reducer
            .drive(Abortable::new(chunks, cancel), &mut self.store, |_| {
                ControlFlow::Continue(())
            })
            .await?;
        Ok(completion)
    }

    /// Submit `text` and stream the reply.
    pub async fn submit<I>(
        &mut self,
        text: &str,
        inference: &I,
        cancel: AbortRegistration,
    ) -> Result<Completion, ChatError>
    where
        I: Inference + ?Sized,
    {
        self.submit_user_message(text)?;
        self.respond(inference, cancel).await
    }

    /// Ask again for the reply `assistant_id`.
    ///
    /// The user prompt that preceded that reply is appended as a new turn; nothing already
    /// in the transcript is removed.
    pub async fn regenerate<I>(
        &mut self,
        assistant_id: &MessageId,
        inference: &I,
        cancel: AbortRegistration,
    ) -> Result<Completion, ChatError>
    where
        I: Inference + ?Sized,
    {
        let prompt = self.prompt_for(assistant_id)?;
        self.submit(&prompt, inference, cancel).await
    }

    fn prompt_for(&self, assistant_id: &MessageId) -> Result<String, ChatError> {
        let messages = self.store.messages();
        let index = messages
            .iter()
            .position(|message| &message.id == assistant_id)
            .ok_or_else(|| StoreError::NotFound {
                id: assistant_id.to_string(),
            })?;

        if messages[index].role != MessageRole::Assistant {
            return Err(ChatError::RequestMalformed(format!(
                "message `{assistant_id}` is not an assistant reply"
            )));
        }

        messages[..index]
            .iter()
            .rev()
            .find(|message| message.role == MessageRole::User)
            .map(|message| message.text())
            .ok_or_else(|| {
                ChatError::RequestMalformed(format!(
                    "no user prompt precedes `{assistant_id}`"
                ))
            })
    }
}

#[cfg(test)]
mod tests;
