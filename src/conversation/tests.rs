use std::sync::Arc;

use futures_util::future::{AbortHandle, BoxFuture};
use futures_util::stream::{self, StreamExt};
use serde_json::json;

use super::*;
use crate::inference::demo::{demo_tools, DemoInference};
use crate::{ChunkEvent, ChunkStream, MessageStatus, Outcome, ScriptedInference, ToolState};

fn registration() -> AbortRegistration {
    AbortHandle::new_pair().1
}

fn search_script() -> Vec<ChunkEvent> {
    vec![
        ChunkEvent::tool_input("c1", "search", json!({"query": "latest AI news"})),
        ChunkEvent::tool_output("c1", json!({"results": "1. ..."})),
        ChunkEvent::text_delta("Here are "),
        ChunkEvent::text_delta("the results."),
        ChunkEvent::Done,
    ]
}

// Emits one delta, then waits forever.
struct Stalled;

impl Inference for Stalled {
    fn start(&self, _request: InferenceRequest) -> BoxFuture<'_, Result<ChunkStream, ChatError>> {
        Box::pin(async {
            Ok(stream::iter(vec![ChunkEvent::text_delta("Hel")])
                .chain(stream::pending())
                .boxed())
        })
    }
}

#[tokio::test]
async fn test_tool_turn_completes() {
    let mut conversation = Conversation::new();
    let inference = ScriptedInference::new(search_script());

    let completion = conversation
        .submit("search for latest AI news", &inference, registration())
        .await
        .unwrap();

    assert_eq!(completion.outcome, Outcome::Completed);
    assert!(completion.error().is_none());

    let messages = conversation.store().messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, MessageRole::User);
    assert_eq!(messages[1].role, MessageRole::Assistant);
    assert_eq!(messages[1].status, MessageStatus::Finalized);
    assert_eq!(messages[1].parts.len(), 2);

    let invocation = messages[1].parts[0].as_tool_invocation().unwrap();
    assert_eq!(invocation.state, ToolState::OutputAvailable);
    assert_eq!(messages[1].parts[1].as_text(), Some("Here are the results."));
    assert!(conversation.store().in_flight().is_none());
}

#[tokio::test]
async fn test_truncated_reply_is_kept_and_next_turn_accepted() {
    let mut conversation = Conversation::new();
    let inference = ScriptedInference::new(vec![
        ChunkEvent::text_delta("Hel"),
        ChunkEvent::text_delta("lo"),
    ]);

    let completion = conversation
        .submit("hi", &inference, registration())
        .await
        .unwrap();

    assert_eq!(completion.outcome, Outcome::Truncated);
    assert_eq!(completion.error(), Some(ChatError::StreamTruncated));
    assert_eq!(completion.message.text(), "Hello");
    assert_eq!(completion.message.outcome, Some(Outcome::Truncated));

    // The transcript is not stuck: another turn is accepted.
    conversation.submit_user_message("again").unwrap();
    assert_eq!(conversation.store().len(), 3);
}

#[test]
fn test_submission_rejected_while_in_flight() {
    let mut store = TranscriptStore::new();
    store
        .append(Arc::new(Message::in_flight(
            MessageId::new(),
            MessageRole::Assistant,
        )))
        .unwrap();
    let mut conversation = Conversation::with_store(store);

    let result = conversation.submit_user_message("second question");
    assert!(matches!(
        result,
        Err(ChatError::Store(StoreError::InvariantViolation { .. }))
    ));
    assert_eq!(conversation.store().len(), 1);
}

#[test]
fn test_blank_submission_is_malformed() {
    let mut conversation = Conversation::new();
    assert!(matches!(
        conversation.submit_user_message("   "),
        Err(ChatError::RequestMalformed(_))
    ));
    assert!(conversation.store().is_empty());
}

#[tokio::test]
async fn test_upstream_unavailable_adds_no_assistant_message() {
    let mut conversation = Conversation::new();
    let inference = ScriptedInference::unavailable("connection refused");

    let result = conversation.submit("hi", &inference, registration()).await;

    assert!(matches!(result, Err(ChatError::UpstreamUnavailable(_))));
    assert_eq!(conversation.store().len(), 1);
    assert!(conversation.store().in_flight().is_none());
}

#[tokio::test]
async fn test_cancel_keeps_partial_text() {
    let mut conversation = Conversation::new();
    let mut updates = conversation.subscribe();
    let (handle, cancel) = AbortHandle::new_pair();

    let canceller = async move {
        loop {
            updates.changed().await.unwrap();
            let partial = updates
                .borrow()
                .in_flight()
                .map(|message| message.text())
                .unwrap_or_default();
            if partial == "Hel" {
                handle.abort();
                break;
            }
        }
    };
    let (completion, ()) = tokio::join!(conversation.submit("hi", &Stalled, cancel), canceller);
    let completion = completion.unwrap();

    assert_eq!(completion.outcome, Outcome::Cancelled);
    assert!(completion.error().is_none());
    assert_eq!(completion.message.text(), "Hel");
    assert!(conversation.store().in_flight().is_none());
}

#[tokio::test]
async fn test_regenerate_repeats_preceding_prompt() {
    let mut conversation = Conversation::new().with_tools(demo_tools());
    let inference = DemoInference::default();

    let first = conversation
        .submit("weather in Oslo", &inference, registration())
        .await
        .unwrap();
    let second = conversation
        .regenerate(&first.message.id, &inference, registration())
        .await
        .unwrap();

    assert_eq!(second.outcome, Outcome::Completed);
    assert_ne!(first.message.id, second.message.id);

    let messages = conversation.store().messages();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[2].role, MessageRole::User);
    assert_eq!(messages[2].text(), "weather in Oslo");
    assert!(messages[3].text().contains("Oslo"));
}

#[tokio::test]
async fn test_regenerate_rejects_user_message() {
    let mut conversation = Conversation::new();
    let prompt = conversation.submit_user_message("hello").unwrap();

    let result = conversation
        .regenerate(&prompt.id, &ScriptedInference::default(), registration())
        .await;
    assert!(matches!(result, Err(ChatError::RequestMalformed(_))));

    let missing = conversation
        .regenerate(&MessageId::new(), &ScriptedInference::default(), registration())
        .await;
    assert!(matches!(
        missing,
        Err(ChatError::Store(StoreError::NotFound { .. }))
    ));
}

#[tokio::test]
async fn test_history_window_limits_request() {
    struct Recording(std::sync::Mutex<Vec<usize>>);

    impl Inference for Recording {
        fn start(
            &self,
            request: InferenceRequest,
        ) -> BoxFuture<'_, Result<ChunkStream, ChatError>> {
            if let Ok(mut seen) = self.0.lock() {
                seen.push(request.history.len());
            }
            let events = vec![ChunkEvent::text_delta("ok"), ChunkEvent::Done];
            Box::pin(async move { Ok(stream::iter(events).boxed()) })
        }
    }

    let inference = Recording(std::sync::Mutex::new(Vec::new()));
    let mut conversation = Conversation::new().with_max_history(2);
    for prompt in ["one", "two", "three"] {
        conversation
            .submit(prompt, &inference, registration())
            .await
            .unwrap();
    }

    assert_eq!(*inference.0.lock().unwrap(), vec![1, 2, 2]);
}
