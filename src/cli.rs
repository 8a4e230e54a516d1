use clap::{Parser, Subcommand};

use chatfold::gateway::DEFAULT_BIND;

#[derive(Parser)]
#[command(name = "chatfold")]
#[command(about = "Streaming chat gateway: folds model chunk events into a chat transcript.")]
pub(crate) struct Cli {
    /// Pause between text deltas of the demo model, in milliseconds.
    #[arg(long, global = true, env = "CHATFOLD_DELTA_DELAY_MS", default_value_t = 30)]
    pub(crate) delta_delay_ms: u64,

    /// Most recent turns sent to the model (omit to send the whole conversation).
    #[arg(long, global = true, env = "CHATFOLD_MAX_HISTORY")]
    pub(crate) max_history: Option<usize>,

    /// Log at debug level (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    pub(crate) verbose: bool,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run HTTP server (POST /api/chat, GET /health).
    Serve {
        /// Listen address (e.g. 0.0.0.0:3000)
        #[arg(long, env = "CHATFOLD_BIND", default_value = DEFAULT_BIND)]
        bind: String,
    },
    /// Send one prompt and render the streamed reply. Ctrl+C cancels the reply.
    Chat {
        /// Prompt text (e.g. "weather in Tokyo")
        prompt: String,
    },
}
