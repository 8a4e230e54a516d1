//! Local stand-in for the hosted model.
//!
//! [`DemoInference`] recognises "search for ..." and "weather in ..." prompts, runs the matching
//! mock tool through the declared [`ToolSet`], and streams a short answer word by word. It
//! exists so the gateway and the terminal chat work without network access.

use std::time::Duration;

use chrono::Utc;
use futures_util::future::BoxFuture;
use futures_util::stream::{self, StreamExt};
use jsonschema::JSONSchema;
use serde_json::json;
use tokio::sync::mpsc;

use super::{ChunkStream, Inference, InferenceRequest, ToolDefinition, ToolExecutor, ToolSet};
use crate::{ChatError, ChunkEvent};

pub const SEARCH_TOOL: &str = "search";
pub const WEATHER_TOOL: &str = "weather";

/// Tool set with the mock `search` and `weather` tools.
pub fn demo_tools() -> ToolSet {
    ToolSet::new()
        .with_tool(
            SEARCH_TOOL,
            ToolDefinition {
                description: "Search the internet for current information".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": { "query": { "type": "string", "minLength": 1 } },
                    "required": ["query"]
                }),
                executor: std::sync::Arc::new(MockSearch),
            },
        )
        .with_tool(
            WEATHER_TOOL,
            ToolDefinition {
                description: "Get the current weather for a location".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": { "location": { "type": "string", "minLength": 1 } },
                    "required": ["location"]
                }),
                executor: std::sync::Arc::new(MockWeather),
            },
        )
}

struct MockSearch;

impl ToolExecutor for MockSearch {
    fn execute(
        &self,
        input: serde_json::Value,
    ) -> BoxFuture<'static, Result<serde_json::Value, String>> {
        Box::pin(async move {
            let query = input["query"].as_str().unwrap_or_default().to_string();
            Ok(json!({
                "results": format!(
                    "1. Overview of \"{query}\"\n\
                     2. Recent coverage of \"{query}\"\n\
                     3. Discussion threads about \"{query}\""
                ),
                "timestamp": Utc::now().to_rfc3339(),
            }))
        })
    }
}

struct MockWeather;

impl ToolExecutor for MockWeather {
    fn execute(
        &self,
        input: serde_json::Value,
    ) -> BoxFuture<'static, Result<serde_json::Value, String>> {
        Box::pin(async move {
            let location = input["location"].as_str().unwrap_or_default().to_string();
            // stable per-location values
            let seed: u32 = location.bytes().map(u32::from).sum();
            let conditions = ["sunny", "cloudy", "rainy", "windy"];
            Ok(json!({
                "location": location,
                "temperature": 5 + (seed % 25),
                "condition": conditions[(seed % 4) as usize],
                "humidity": 30 + (seed % 60),
                "windSpeed": seed % 30,
                "timestamp": Utc::now().to_rfc3339(),
            }))
        })
    }
}

/// Inference collaborator driven by simple prompt patterns.
#[derive(Debug, Clone, Default)]
pub struct DemoInference {
    delta_delay: Duration,
}

impl DemoInference {
    /// Create a demo model that pauses `delta_delay` between text deltas
    pub fn new(delta_delay: Duration) -> Self {
        Self { delta_delay }
    }
}

impl Inference for DemoInference {
    fn start(&self, request: InferenceRequest) -> BoxFuture<'_, Result<ChunkStream, ChatError>> {
        let delay = self.delta_delay;
        Box::pin(async move {
            let prompt = request.history.last_user_text().ok_or_else(|| {
                ChatError::RequestMalformed("history has no user message".to_string())
            })?;

            let (tx, rx) = mpsc::channel(16);
            tokio::spawn(async move {
                if let Err(closed) = respond(prompt, request.tools, delay, tx).await {
                    tracing::debug!(%closed, "demo stream receiver dropped");
                }
            });

            Ok(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|event| (event, rx))
            })
            .boxed())
        })
    }
}

async fn respond(
    prompt: String,
    tools: ToolSet,
    delay: Duration,
    tx: mpsc::Sender<ChunkEvent>,
) -> Result<(), mpsc::error::SendError<ChunkEvent>> {
    let answer = match plan_tool_call(&prompt) {
        Some((name, input)) => match tools.get(name) {
            Some(tool) => {
                let call_id = format!("call_{}", ulid::Ulid::new());
                match run_tool(&tx, &call_id, name, tool, input).await? {
                    Some(output) => summarize(name, &output),
                    None => return Ok(()),
                }
            }
            None => format!("The {name} tool is not available right now."),
        },
        None => format!(
            "I can search the internet or check the weather. You asked: \"{}\"",
            prompt.trim()
        ),
    };

    for word in answer.split_inclusive(' ') {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        tx.send(ChunkEvent::text_delta(word)).await?;
    }
    tx.send(ChunkEvent::Done).await
}

// Emits the lifecycle events of one call; returns `None` after reporting an error event.
async fn run_tool(
    tx: &mpsc::Sender<ChunkEvent>,
    call_id: &str,
    name: &str,
    tool: &ToolDefinition,
    input: serde_json::Value,
) -> Result<Option<serde_json::Value>, mpsc::error::SendError<ChunkEvent>> {
    tx.send(ChunkEvent::ToolInputStart {
        call_id: call_id.to_string(),
        tool_name: name.to_string(),
    })
    .await?;

    if let Err(detail) = validate_input(&tool.input_schema, &input) {
        tracing::warn!(tool = name, %detail, "tool input failed schema validation");
        tx.send(ChunkEvent::error(format!("invalid input for {name}: {detail}")))
            .await?;
        return Ok(None);
    }
    tx.send(ChunkEvent::tool_input(call_id, name, input.clone()))
        .await?;

    let output = match tool.executor.execute(input).await {
        Ok(output) => output,
        Err(error) => json!({ "error": error }),
    };
    tx.send(ChunkEvent::tool_output(call_id, output.clone()))
        .await?;
    Ok(Some(output))
}

fn validate_input(schema: &serde_json::Value, input: &serde_json::Value) -> Result<(), String> {
    let compiled = JSONSchema::compile(schema).map_err(|error| error.to_string())?;
    if compiled.is_valid(input) {
        Ok(())
    } else {
        Err("input does not match the declared schema".to_string())
    }
}

/// Pick a tool for `prompt`, if it asks for one.
pub fn plan_tool_call(prompt: &str) -> Option<(&'static str, serde_json::Value)> {
    let lower = prompt.to_ascii_lowercase();
    if let Some(index) = lower.find("weather") {
        let rest = &prompt[index + "weather".len()..];
        let location = rest
            .trim()
            .strip_prefix("in ")
            .or_else(|| rest.trim().strip_prefix("for "))
            .unwrap_or(rest)
            .trim()
            .trim_end_matches(['?', '.', '!']);
        return Some((WEATHER_TOOL, json!({ "location": location })));
    }
    if let Some(index) = lower.find("search") {
        let rest = prompt[index + "search".len()..].trim();
        let query = rest
            .strip_prefix("for ")
            .unwrap_or(rest)
            .trim()
            .trim_end_matches(['?', '.', '!']);
        return Some((SEARCH_TOOL, json!({ "query": query })));
    }
    None
}

fn summarize(tool: &str, output: &serde_json::Value) -> String {
    if let Some(error) = output.get("error") {
        return format!("The {tool} tool failed: {error}");
    }
    match tool {
        WEATHER_TOOL => format!(
            "It is currently {}°C and {} in {}, with {}% humidity.",
            output["temperature"],
            output["condition"].as_str().unwrap_or("unknown"),
            output["location"].as_str().unwrap_or("that location"),
            output["humidity"]
        ),
        _ => "Here are the results.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConversationHistory, HistoryMessage, MessageRole, ToolState};

    fn request(prompt: &str) -> InferenceRequest {
        InferenceRequest {
            history: ConversationHistory::from(vec![HistoryMessage::text(
                MessageRole::User,
                prompt,
            )]),
            tools: demo_tools(),
        }
    }

    #[test]
    fn test_plan_tool_call() {
        assert_eq!(
            plan_tool_call("search for latest AI news"),
            Some((SEARCH_TOOL, json!({"query": "latest AI news"})))
        );
        assert_eq!(
            plan_tool_call("What's the weather in Tokyo?"),
            Some((WEATHER_TOOL, json!({"location": "Tokyo"})))
        );
        assert_eq!(plan_tool_call("tell me a joke"), None);
    }

    #[test]
    fn test_schema_validation() {
        let tools = demo_tools();
        let schema = &tools.get(SEARCH_TOOL).unwrap().input_schema;
        assert!(validate_input(schema, &json!({"query": "rust"})).is_ok());
        assert!(validate_input(schema, &json!({"query": ""})).is_err());
        assert!(validate_input(schema, &json!({})).is_err());
    }

    #[tokio::test]
    async fn test_search_prompt_streams_tool_lifecycle() {
        let stream = DemoInference::default()
            .start(request("search for latest AI news"))
            .await
            .unwrap();
        let events: Vec<ChunkEvent> = stream.collect().await;

        assert_eq!(events[0].kind(), "tool-input-start");
        assert_eq!(events[1].kind(), "tool-input-available");
        assert_eq!(events[2].kind(), "tool-output-available");
        assert_eq!(events.last(), Some(&ChunkEvent::Done));

        let text: String = events
            .iter()
            .filter_map(|event| match event {
                ChunkEvent::TextDelta { value } => Some(value.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Here are the results.");
    }

    #[tokio::test]
    async fn test_weather_prompt_reduces_to_output_available() {
        let stream = DemoInference::default()
            .start(request("weather in Paris"))
            .await
            .unwrap();
        let events: Vec<ChunkEvent> = stream.collect().await;

        let mut reducer = crate::StreamReducer::new(crate::MessageId::new());
        for event in &events {
            reducer.apply(event).unwrap();
        }
        let message = reducer.snapshot().unwrap();
        let invocation = message.parts[0].as_tool_invocation().unwrap();
        assert_eq!(invocation.tool_name, WEATHER_TOOL);
        assert_eq!(invocation.state, ToolState::OutputAvailable);
        assert_eq!(invocation.output.as_ref().unwrap()["location"], "Paris");
        assert!(message.text().contains("Paris"));
    }

    #[tokio::test]
    async fn test_missing_user_message_is_rejected() {
        let result = DemoInference::default()
            .start(InferenceRequest::default())
            .await;
        assert!(matches!(result, Err(ChatError::RequestMalformed(_))));
    }
}
