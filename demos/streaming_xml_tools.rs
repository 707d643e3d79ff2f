//! Streaming XML Tool Mode Demo
//!
//! Demonstrates the Engine's XML-mode inline tool loop: the model emits
//! `<function_calls>` tags inline in its text stream, the loop extracts
//! them, executes the requested tool, and feeds the result back in.
//!
//! Requires ANTHROPIC_API_KEY to be set.

use open_agent::adapter::anthropic::AnthropicAdapter;
use open_agent::engine::{EngineConfig, ToolCallContext, stream_with_xml_tools};
use open_agent::{
    Content, NormalizedMessage, NormalizedRequest, ParticipantId, RequestConfig, ToolDefinition,
    ToolResult, ToolResultContent,
};

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
    println!("STREAMING XML TOOL MODE DEMO");
    println!("{}", "=".repeat(60));
    println!();

    let adapter = AnthropicAdapter::from_env()?;

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
            "What's the weather in Tokyo right now?",
        )],
        tools: Some(vec![weather_tool()]),
        tool_mode: None,
        provider_params: None,
        stop_sequences: None,
    };

    let config = EngineConfig::default();

    let outcome = stream_with_xml_tools(
        &adapter,
        request,
        &config,
        |chunk| {
            print!("{chunk}");
            use std::io::Write;
            let _ = std::io::stdout().flush();
        },
        |calls, ctx: ToolCallContext<'_>| async move {
            println!("\n\n[tool loop depth {}] requested {} call(s)", ctx.depth, calls.len());
            let results = calls
                .into_iter()
                .map(|call| {
                    println!("  -> {} {}", call.name, call.input);
                    ToolResult {
                        tool_use_id: call.id,
                        content: ToolResultContent::Text("72F and sunny in Tokyo".to_string()),
                        is_error: None,
                    }
                })
                .collect();
            Ok(results)
        },
    )
    .await?;

    println!("\n\n{}", "=".repeat(60));
    println!("Final content blocks: {}", outcome.response.content.len());
    for block in &outcome.response.content {
        if let Content::Text(t) = block {
            println!("  text: {}", t.text);
        }
    }

    Ok(())
}
