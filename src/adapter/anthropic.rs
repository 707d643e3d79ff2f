//! Anthropic Messages API adapter: `x-api-key`/`anthropic-version` headers,
//! `cache_control` blocks, and an SSE stream of
//! `content_block_start`/`content_block_delta`/`content_block_stop`/
//! `message_delta`/`message_stop` events.
//!
//! Header and request-building style grounded on
//! `examples/grafbase-nexus/crates/llm/src/provider/anthropic.rs`
//! (`x-api-key`/`anthropic-version` header setup, base-url-plus-path
//! construction). SSE consumption uses the teacher's own
//! `eventsource-stream` dependency rather than hand-rolling `data:` line
//! splitting the way `utils::parse_sse_stream` does for the OpenAI-style
//! wire format, since Anthropic's stream carries a named `event:` line
//! `eventsource-stream` already demultiplexes.

use super::{CallOptions, ProviderAdapter, ProviderRequest, ProviderResponse, ProviderStopReason, StreamCallbacks};
use crate::content::{ContentBlock, Usage};
use crate::error::{Error, Result};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicAdapter {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl AnthropicAdapter {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| Error::config("ANTHROPIC_API_KEY is not set"))?;
        Ok(Self::new(api_key))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn request_builder(&self, url: &str) -> reqwest::RequestBuilder {
        self.http
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
    }
}

fn usage_from_json(value: &serde_json::Value) -> Usage {
    Usage {
        input_tokens: value["input_tokens"].as_u64().unwrap_or(0),
        output_tokens: value["output_tokens"].as_u64().unwrap_or(0),
        cache_creation_tokens: value["cache_creation_input_tokens"].as_u64(),
        cache_read_tokens: value["cache_read_input_tokens"].as_u64(),
    }
}

fn stop_reason_from_str(s: Option<&str>) -> ProviderStopReason {
    match s {
        Some("max_tokens") => ProviderStopReason::MaxTokens,
        Some("stop_sequence") => ProviderStopReason::StopSequence,
        Some("tool_use") => ProviderStopReason::ToolUse,
        Some("refusal") => ProviderStopReason::Refusal,
        _ => ProviderStopReason::EndTurn,
    }
}

fn content_blocks_from_json(blocks: &[serde_json::Value]) -> Vec<ContentBlock> {
    blocks
        .iter()
        .filter_map(|b| match b["type"].as_str() {
            Some("text") => Some(ContentBlock::text(b["text"].as_str().unwrap_or_default())),
            Some("tool_use") => Some(ContentBlock::tool_use(
                b["id"].as_str().unwrap_or_default(),
                b["name"].as_str().unwrap_or_default(),
                b["input"].clone(),
            )),
            _ => None,
        })
        .collect()
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn supports_model(&self, model: &str) -> bool {
        model.starts_with("claude-")
    }

    async fn complete(&self, request: ProviderRequest, options: &CallOptions) -> Result<ProviderResponse> {
        let url = format!("{}/messages", self.base_url);
        let mut req = self.request_builder(&url).json(&request.body);
        if let Some(timeout) = options.timeout {
            req = req.timeout(timeout);
        }

        let response = req.send().await.map_err(Error::Http)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::from_http_status(status.as_u16(), body));
        }

        let parsed: serde_json::Value = response.json().await.map_err(Error::Http)?;
        let content = content_blocks_from_json(parsed["content"].as_array().unwrap_or(&Vec::new()));
        let stop_reason = stop_reason_from_str(parsed["stop_reason"].as_str());
        let stop_sequence = parsed["stop_sequence"].as_str().map(String::from);
        let usage = usage_from_json(&parsed["usage"]);

        Ok(ProviderResponse {
            content,
            stop_reason,
            stop_sequence,
            usage,
            model: request.model,
            raw: parsed,
        })
    }

    async fn stream(
        &self,
        mut request: ProviderRequest,
        mut callbacks: StreamCallbacks<'_>,
        options: &CallOptions,
    ) -> Result<ProviderResponse> {
        request.body["stream"] = serde_json::Value::Bool(true);
        let url = format!("{}/messages", self.base_url);
        let mut req = self.request_builder(&url).json(&request.body);
        if let Some(timeout) = options.timeout {
            req = req.timeout(timeout);
        }

        let response = req.send().await.map_err(Error::Http)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::from_http_status(status.as_u16(), body));
        }

        let mut events = response.bytes_stream().eventsource();
        let mut text = String::new();
        let mut tool_calls: Vec<ContentBlock> = Vec::new();
        let mut current_tool_partial: Option<(String, String, String)> = None; // (id, name, json_buf)
        let mut usage = Usage::default();
        let mut stop_reason = ProviderStopReason::EndTurn;
        let mut stop_sequence = None;

        while let Some(event) = events.next().await {
            if options.cancellation.is_cancelled() {
                return Err(Error::Abort(crate::error::ErrorDetail::new("cancelled")));
            }
            let event = event.map_err(|e| Error::stream(e.to_string()))?;
            let payload: serde_json::Value = match serde_json::from_str(&event.data) {
                Ok(v) => v,
                Err(_) => continue,
            };

            match payload["type"].as_str() {
                Some("content_block_start") => {
                    if payload["content_block"]["type"].as_str() == Some("tool_use") {
                        current_tool_partial = Some((
                            payload["content_block"]["id"].as_str().unwrap_or_default().to_string(),
                            payload["content_block"]["name"].as_str().unwrap_or_default().to_string(),
                            String::new(),
                        ));
                    }
                }
                Some("content_block_delta") => {
                    if let Some(delta_text) = payload["delta"]["text"].as_str() {
                        text.push_str(delta_text);
                        (callbacks.on_chunk)(delta_text);
                    }
                    if let Some(partial_json) = payload["delta"]["partial_json"].as_str() {
                        if let Some((_, _, buf)) = current_tool_partial.as_mut() {
                            buf.push_str(partial_json);
                        }
                    }
                }
                Some("content_block_stop") => {
                    if let Some((id, name, buf)) = current_tool_partial.take() {
                        let input: serde_json::Value = if buf.is_empty() {
                            serde_json::json!({})
                        } else {
                            serde_json::from_str(&buf)
                                .map_err(|e| Error::stream(format!("invalid tool_use partial_json: {e}")))?
                        };
                        tool_calls.push(ContentBlock::tool_use(id, name, input));
                    }
                }
                Some("message_delta") => {
                    if let Some(reason) = payload["delta"]["stop_reason"].as_str() {
                        stop_reason = stop_reason_from_str(Some(reason));
                    }
                    stop_sequence = payload["delta"]["stop_sequence"].as_str().map(String::from);
                    if payload["usage"].is_object() {
                        let delta_usage = usage_from_json(&payload["usage"]);
                        usage.accumulate(&delta_usage);
                    }
                }
                Some("message_start") => {
                    if payload["message"]["usage"].is_object() {
                        usage = usage_from_json(&payload["message"]["usage"]);
                    }
                }
                _ => {}
            }
        }

        let mut content = Vec::new();
        if !text.is_empty() {
            content.push(ContentBlock::text(text));
        }
        content.extend(tool_calls);

        Ok(ProviderResponse {
            content,
            stop_reason,
            stop_sequence,
            usage,
            model: request.model,
            raw: serde_json::Value::Null,
        })
    }
}
