//! Yielding Stream Demo
//!
//! Demonstrates the externally-drivable event stream: instead of a
//! synchronous tool-execution callback, the consumer awaits events and
//! resumes the parked loop itself by calling `provide_tool_results`.
//!
//! Requires ANTHROPIC_API_KEY to be set.

use futures::StreamExt;
use open_agent::adapter::anthropic::AnthropicAdapter;
use open_agent::engine::EngineConfig;
use open_agent::{
    NormalizedMessage, NormalizedRequest, ParticipantId, RequestConfig, StreamEvent, ToolDefinition,
    ToolResult, ToolResultContent, yielding_stream,
};
use std::sync::Arc;

fn weather_tool() -> ToolDefinition {
    ToolDefinition {
        name: "get_weather".to_string(),
        description: "Get the current weather for a city".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": { "city": { "type": "string" } },
            "required": ["city"],
        }),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "=".repeat(60));
    println!("YIELDING STREAM DEMO");
    println!("{}", "=".repeat(60));
    println!();

    let adapter: Arc<dyn open_agent::ProviderAdapter> = Arc::new(AnthropicAdapter::from_env()?);

    let request = NormalizedRequest {
        config: RequestConfig {
            model: "claude-sonnet-4-5-20250929".to_string(),
            max_tokens: 1024,
            temperature: None,
            top_p: None,
            top_k: None,
        },
        system: Some("You are a helpful weather assistant.".to_string()),
        messages: vec![NormalizedMessage::text(
            ParticipantId::new("User"),
            "What's the weather in Lisbon?",
        )],
        tools: Some(vec![weather_tool()]),
        tool_mode: None,
        provider_params: None,
        stop_sequences: None,
    };

    let (mut events, mut handles) = yielding_stream(adapter, request, EngineConfig::default());

    while let Some(event) = events.next().await {
        match event {
            StreamEvent::Chunk(text) => {
                print!("{text}");
                use std::io::Write;
                let _ = std::io::stdout().flush();
            }
            StreamEvent::ToolCalls { pending_tool_call_ids, calls } => {
                println!("\n\nparked: waiting for {} tool result(s)", pending_tool_call_ids.len());
                for call in &calls {
                    println!("  requested: {} {}", call.name, call.input);
                }
                let handle = handles.recv().await.expect("handle delivered alongside ToolCalls event");
                let results = calls
                    .into_iter()
                    .map(|call| ToolResult {
                        tool_use_id: call.id,
                        content: ToolResultContent::Text("68F and overcast in Lisbon".to_string()),
                        is_error: None,
                    })
                    .collect();
                handle.provide_tool_results(results)?;
            }
            StreamEvent::Usage(usage) => {
                println!("\n[usage so far: {} in / {} out]", usage.input_tokens, usage.output_tokens);
            }
            StreamEvent::Complete(response) => {
                println!("\n\n{}", "=".repeat(60));
                println!("stream complete, stop reason: {:?}", response.stop_reason);
                break;
            }
            StreamEvent::Error(message) => {
                eprintln!("\nstream error: {message}");
                break;
            }
            StreamEvent::Aborted { reason } => {
                println!("\naborted: {reason:?}");
                break;
            }
        }
    }

    Ok(())
}
