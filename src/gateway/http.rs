//! HTTP gateway: POST /api/chat → streamed assistant reply.
//!
//! Validation and upstream-start failures return 500 with a JSON error body. Once streaming
//! starts the status is 200; `Accept: text/event-stream` selects server-sent chunk events,
//! anything else gets the concatenated text as `text/plain`. Every response is also folded
//! through a server-side reducer so the outcome is logged, and a client disconnect cancels
//! the upstream stream.

use std::convert::Infallible;
use std::ops::ControlFlow;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::future::AbortHandle;
use futures_util::stream::{self, Abortable, Stream, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use super::wire::{validate_chat_request, ChatRequest, ErrorBody, GatewayHealthResponse};
use super::GatewayConfig;
use crate::{
    ChatError, ChunkEvent, ChunkStream, ConversationHistory, Inference, InferenceRequest,
    MessageId, Outcome, StreamReducer, ToolSet, TranscriptStore,
};

/// Events buffered between the server-side reducer and a slow client.
const RELAY_BUFFER: usize = 16;

/// Shared state for the HTTP server: inference collaborator, declared tools, history window.
#[derive(Clone)]
pub struct GatewayState {
    /// Model that produces the chunk stream
    pub inference: Arc<dyn Inference>,
    /// Tools offered to the model on every call
    pub tools: ToolSet,
    /// Most recent turns sent upstream; `None` sends everything
    pub max_history: Option<usize>,
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        tracing::warn!(error = %self, "chat request failed");
        let body = ErrorBody {
            error: self.to_string(),
        };
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

async fn handle_chat(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ChatError> {
    let request: ChatRequest = serde_json::from_slice(&body)
        .map_err(|error| ChatError::RequestMalformed(error.to_string()))?;
    let messages = validate_chat_request(&request)?;
    let store = TranscriptStore::with_history(messages)?;

    let mut history = ConversationHistory::from_transcript(store.messages());
    if let Some(max) = state.max_history {
        history.limit_history(max);
    }
    tracing::debug!(
        turns = history.len(),
        tokens = history.count_tokens(),
        "starting inference"
    );

    let chunks = state
        .inference
        .start(InferenceRequest {
            history,
            tools: state.tools.clone(),
        })
        .await?;

    let (tx, rx) = mpsc::channel(RELAY_BUFFER);
    tokio::spawn(relay(chunks, store, tx));

    if wants_event_stream(&headers) {
        let events = receive(rx).map(|event| Event::default().json_data(&event));
        Ok(Sse::new(events).into_response())
    } else {
        let text = receive(rx).filter_map(|event| async move {
            match event {
                ChunkEvent::TextDelta { value } => Some(Ok::<_, Infallible>(value)),
                _ => None,
            }
        });
        Ok((
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            Body::from_stream(text),
        )
            .into_response())
    }
}

// Folds the upstream stream into a server-side transcript and forwards accepted events.
// The next upstream event is read only once the client buffer has room for it.
async fn relay(chunks: ChunkStream, mut store: TranscriptStore, tx: mpsc::Sender<ChunkEvent>) {
    let (handle, registration) = AbortHandle::new_pair();
    let disconnect = {
        let tx = tx.clone();
        tokio::spawn(async move {
            tx.closed().await;
            handle.abort();
        })
    };

    let pacer = tx.clone();
    let paced = chunks
        .then(move |event| {
            let pacer = pacer.clone();
            async move {
                // a closed channel surfaces as a failed `try_send` below
                let _ = pacer.reserve().await;
                event
            }
        })
        .boxed();

    let reducer = StreamReducer::new(MessageId::new());
    let result = reducer
        .drive(Abortable::new(paced, registration), &mut store, |event| {
            match tx.try_send(event.clone()) {
                Ok(()) => ControlFlow::Continue(()),
                Err(_) => ControlFlow::Break(()),
            }
        })
        .await;
    disconnect.abort();

    match result {
        Ok(completion) => {
            if matches!(
                completion.outcome,
                Outcome::Truncated | Outcome::ProtocolViolation { .. }
            ) {
                let detail = completion
                    .error()
                    .map(|error| error.to_string())
                    .unwrap_or_else(|| completion.outcome.to_string());
                let _ = tx.send(ChunkEvent::error(detail)).await;
            }
            tracing::info!(
                message_id = %completion.message.id,
                outcome = completion.outcome.as_str(),
                chars = completion.message.text().len(),
                "chat response finished"
            );
        }
        Err(error) => {
            tracing::error!(%error, "server transcript rejected the streamed message");
            let _ = tx.send(ChunkEvent::error(error.to_string())).await;
        }
    }
}

fn receive(rx: mpsc::Receiver<ChunkEvent>) -> impl Stream<Item = ChunkEvent> {
    stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (event, rx))
    })
}

fn wants_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("text/event-stream"))
}

async fn handle_health(State(state): State<GatewayState>) -> Json<GatewayHealthResponse> {
    Json(GatewayHealthResponse {
        status: "healthy",
        tools: state.tools.names().into_iter().map(String::from).collect(),
    })
}

/// Build the gateway router (POST /api/chat, GET /health).
pub fn router(
    inference: Arc<dyn Inference>,
    tools: ToolSet,
    max_history: Option<usize>,
) -> Router {
    let state = GatewayState {
        inference,
        tools,
        max_history,
    };
    Router::new()
        .route("/health", get(handle_health))
        .route("/api/chat", post(handle_chat))
        .with_state(state)
}

/// Run the HTTP server on `config.bind`.
/// Graceful shutdown on Ctrl+C (SIGINT) and SIGTERM (Unix); in-flight responses complete
/// before exit.
pub async fn run_http(
    config: &GatewayConfig,
    inference: Arc<dyn Inference>,
    tools: ToolSet,
) -> std::io::Result<()> {
    let app = router(inference, tools, config.max_history);
    let listener = TcpListener::bind(&config.bind).await?;
    tracing::info!(
        bind = %config.bind,
        max_history = ?config.max_history,
        "gateway listening (Ctrl+C/SIGTERM to stop)"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
