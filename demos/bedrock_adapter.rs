//! Bedrock Adapter Demo
//!
//! Exercises the AWS Bedrock adapter's SigV4-signed non-streaming
//! `complete()` path through the Engine's retry loop.
//!
//! Requires AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY, and AWS_REGION (plus
//! AWS_SESSION_TOKEN for temporary credentials) to be set.

use open_agent::adapter::bedrock::{BedrockAdapter, BedrockCredentials};
use open_agent::engine::{EngineConfig, complete};
use open_agent::{Content, ProviderRequest};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "=".repeat(60));
    println!("BEDROCK ADAPTER DEMO");
    println!("{}", "=".repeat(60));
    println!();

    let credentials = BedrockCredentials::from_env()?;
    let region = std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string());
    let model_id = "anthropic.claude-3-5-sonnet-20241022-v2:0";
    let adapter = BedrockAdapter::new(region, credentials);

    let body = serde_json::json!({
        "anthropic_version": "bedrock-2023-05-31",
        "max_tokens": 256,
        "messages": [
            { "role": "user", "content": "In one sentence, what is AWS Bedrock?" }
        ],
    });
    let request = ProviderRequest { body, model: model_id.to_string() };

    let config = EngineConfig::default();
    let response = complete(&adapter, request, &config).await?;

    println!("stop reason: {:?}", response.stop_reason);
    println!(
        "usage: {} in / {} out",
        response.basic_usage.input_tokens, response.basic_usage.output_tokens
    );
    for block in &response.content {
        if let Content::Text(t) = block {
            println!("\n{}", t.text);
        }
    }

    Ok(())
}
