//! Native Tool Mode Demo
//!
//! Demonstrates the Engine's native-tools loop: the provider returns
//! structured `tool_use` content blocks directly (Anthropic's native
//! function-calling), rather than an inline XML fragment.
//!
//! Requires ANTHROPIC_API_KEY to be set.

use open_agent::adapter::anthropic::AnthropicAdapter;
use open_agent::engine::{EngineConfig, ToolCallContext, stream_with_native_tools};
use open_agent::{
    Content, NormalizedMessage, NormalizedRequest, ParticipantId, RequestConfig, ToolDefinition,
    ToolResult, ToolResultContent,
};

fn calculator_tool() -> ToolDefinition {
    ToolDefinition {
        name: "add".to_string(),
        description: "Add two numbers".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "a": { "type": "number" },
                "b": { "type": "number" },
            },
            "required": ["a", "b"],
        }),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "=".repeat(60));
    println!("NATIVE TOOL MODE DEMO");
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
        system: Some("You are a careful arithmetic assistant. Use the add tool.".to_string()),
        messages: vec![NormalizedMessage::text(
            ParticipantId::new("User"),
            "What's 47 plus 85?",
        )],
        tools: Some(vec![calculator_tool()]),
        tool_mode: None,
        provider_params: None,
        stop_sequences: None,
    };

    let config = EngineConfig::default();

    let response = stream_with_native_tools(&adapter, request, &config, |calls, ctx: ToolCallContext<'_>| async move {
        println!("[tool loop depth {}] requested {} call(s)", ctx.depth, calls.len());
        let results = calls
            .into_iter()
            .map(|call| {
                let a = call.input["a"].as_f64().unwrap_or(0.0);
                let b = call.input["b"].as_f64().unwrap_or(0.0);
                println!("  -> add({a}, {b}) = {}", a + b);
                ToolResult {
                    tool_use_id: call.id,
                    content: ToolResultContent::Text((a + b).to_string()),
                    is_error: None,
                }
            })
            .collect();
        Ok(results)
    })
    .await?;

    println!("\n{}", "=".repeat(60));
    println!("Stop reason: {:?}", response.stop_reason);
    for block in &response.content {
        if let Content::Text(t) = block {
            println!("  text: {}", t.text);
        }
    }

    Ok(())
}
