//! HTTP gateway: `POST /api/chat` streams a reply, `GET /health` reports readiness.

mod http;
mod wire;

use std::time::Duration;

pub use http::{router, run_http, GatewayState};
pub use wire::{
    validate_chat_request, ChatRequest, ErrorBody, GatewayHealthResponse, IncomingMessage,
};

/// Default listen address.
pub const DEFAULT_BIND: &str = "127.0.0.1:3000";

/// Gateway settings; the binary fills these from flags and environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Listen address (e.g. `0.0.0.0:3000`)
    pub bind: String,
    /// Pause between text deltas of the demo model
    pub delta_delay: Duration,
    /// Most recent turns sent upstream; `None` sends everything
    pub max_history: Option<usize>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            delta_delay: Duration::from_millis(30),
            max_history: Some(50),
        }
    }
}
