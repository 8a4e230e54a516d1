//! chatfold CLI: HTTP gateway or one-shot terminal chat against the demo model.
//!
//! Logging: set `RUST_LOG=chatfold=debug` (or `warn`, `info`) to see logs on stderr.

mod cli;

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures_util::future::AbortHandle;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use chatfold::inference::demo::{demo_tools, DemoInference};
use chatfold::{Conversation, GatewayConfig, MessageRole, Outcome, TranscriptSnapshot};

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG overrides; --verbose => debug; else info
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose {
            "chatfold=debug"
        } else {
            "chatfold=info"
        })
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let delta_delay = Duration::from_millis(cli.delta_delay_ms);
    match cli.command {
        Command::Serve { bind } => {
            let config = GatewayConfig {
                bind,
                delta_delay,
                max_history: cli.max_history,
            };
            let inference = Arc::new(DemoInference::new(config.delta_delay));
            chatfold::run_http(&config, inference, demo_tools()).await?;
            Ok(())
        }
        Command::Chat { prompt } => run_chat(&prompt, delta_delay, cli.max_history).await,
    }
}

async fn run_chat(
    prompt: &str,
    delta_delay: Duration,
    max_history: Option<usize>,
) -> anyhow::Result<()> {
    let inference = DemoInference::new(delta_delay);
    let mut conversation = Conversation::new().with_tools(demo_tools());
    if let Some(max) = max_history {
        conversation = conversation.with_max_history(max);
    }

    let renderer = tokio::spawn(render(conversation.subscribe()));
    let (handle, registration) = AbortHandle::new_pair();
    let cancel_on_ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.abort();
        }
    });

    let result = conversation.submit(prompt, &inference, registration).await;
    cancel_on_ctrl_c.abort();
    // Closing the store lets the renderer drain the last snapshot and exit.
    drop(conversation);
    renderer.await?;
    println!();

    let completion = result?;
    for invocation in completion
        .message
        .parts
        .iter()
        .filter_map(|part| part.as_tool_invocation())
    {
        eprintln!("[{} {}: {}]", invocation.tool_name, invocation.call_id, invocation.state);
    }
    match completion.error() {
        Some(error) => Err(error.into()),
        None => {
            if completion.outcome == Outcome::Cancelled {
                eprintln!("(cancelled)");
            }
            Ok(())
        }
    }
}

// Prints the assistant text as it grows.
async fn render(mut updates: watch::Receiver<TranscriptSnapshot>) {
    let mut printed = 0;
    while updates.changed().await.is_ok() {
        let snapshot = updates.borrow_and_update().clone();
        let Some(message) = snapshot
            .last()
            .filter(|message| message.role == MessageRole::Assistant)
        else {
            continue;
        };
        let text = message.text();
        if text.len() > printed {
            print!("{}", &text[printed..]);
            let _ = std::io::stdout().flush();
            printed = text.len();
        }
    }
}
