//! OpenAI-compatible Chat Completions adapter. This is the adapter closest
//! to the teacher's original `Client`: request building and SSE aggregation
//! reuse `utils::parse_sse_stream`/`ToolCallAggregator` and
//! `types::OpenAIChunk` directly rather than re-deriving them, since the
//! wire format here IS the teacher's wire format.

use super::{CallOptions, ProviderAdapter, ProviderRequest, ProviderResponse, ProviderStopReason, StreamCallbacks};
use crate::content::{ContentBlock as NewContentBlock, Usage};
use crate::error::{Error, Result};
use crate::types::ContentBlock as LegacyContentBlock;
use crate::utils::{parse_sse_stream, ToolCallAggregator};
use async_trait::async_trait;
use futures::StreamExt;

pub struct OpenAiAdapter {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiAdapter {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
        }
    }

    pub fn from_env() -> Self {
        let api_key = std::env::var("OPENAI_API_KEY")
            .or_else(|_| std::env::var("OPENROUTER_API_KEY"))
            .ok();
        let base_url = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        Self::new(base_url, api_key)
    }

    fn request_builder(&self, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.post(url).header("content-type", "application/json");
        if let Some(key) = &self.api_key {
            builder = builder.header("authorization", format!("Bearer {key}"));
        }
        builder
    }
}

fn legacy_to_new_blocks(blocks: Vec<LegacyContentBlock>) -> Vec<NewContentBlock> {
    blocks
        .into_iter()
        .filter_map(|b| match b {
            LegacyContentBlock::Text(t) => Some(NewContentBlock::text(t.text)),
            LegacyContentBlock::ToolUse(t) => Some(NewContentBlock::tool_use(t.id, t.name, t.input)),
            _ => None,
        })
        .collect()
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &str {
        "openai"
    }

    fn supports_model(&self, _model: &str) -> bool {
        true
    }

    async fn complete(&self, request: ProviderRequest, options: &CallOptions) -> Result<ProviderResponse> {
        let mut body = request.body;
        body["stream"] = serde_json::Value::Bool(false);
        let url = format!("{}/chat/completions", self.base_url);

        let mut req = self.request_builder(&url).json(&body);
        if let Some(timeout) = options.timeout {
            req = req.timeout(timeout);
        }

        let response = req.send().await.map_err(Error::Http)?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::from_http_status(status.as_u16(), text));
        }

        let parsed: serde_json::Value = response.json().await.map_err(Error::Http)?;
        let choice = &parsed["choices"][0];
        let message_text = choice["message"]["content"].as_str().unwrap_or_default().to_string();
        let usage = Usage {
            input_tokens: parsed["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            output_tokens: parsed["usage"]["completion_tokens"].as_u64().unwrap_or(0),
            cache_creation_tokens: None,
            cache_read_tokens: None,
        };

        let stop_reason = match choice["finish_reason"].as_str() {
            Some("tool_calls") => ProviderStopReason::ToolUse,
            Some("length") => ProviderStopReason::MaxTokens,
            Some("stop") | _ => ProviderStopReason::EndTurn,
        };

        let mut content = Vec::new();
        if !message_text.is_empty() {
            content.push(NewContentBlock::text(message_text));
        }
        if let Some(tool_calls) = choice["message"]["tool_calls"].as_array() {
            for call in tool_calls {
                let id = call["id"].as_str().unwrap_or_default().to_string();
                let name = call["function"]["name"].as_str().unwrap_or_default().to_string();
                let args_str = call["function"]["arguments"].as_str().unwrap_or("{}");
                let input: serde_json::Value = serde_json::from_str(args_str).unwrap_or(serde_json::json!({}));
                content.push(NewContentBlock::tool_use(id, name, input));
            }
        }

        Ok(ProviderResponse {
            content,
            stop_reason,
            stop_sequence: None,
            usage,
            model: request.model,
            raw: parsed,
        })
    }

    async fn stream(
        &self,
        request: ProviderRequest,
        mut callbacks: StreamCallbacks<'_>,
        options: &CallOptions,
    ) -> Result<ProviderResponse> {
        let mut body = request.body;
        body["stream"] = serde_json::Value::Bool(true);
        let url = format!("{}/chat/completions", self.base_url);

        let mut req = self.request_builder(&url).json(&body);
        if let Some(timeout) = options.timeout {
            req = req.timeout(timeout);
        }

        let response = req.send().await.map_err(Error::Http)?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::from_http_status(status.as_u16(), text));
        }

        let mut sse = parse_sse_stream(response);
        let mut aggregator = ToolCallAggregator::new();
        let mut usage = Usage::default();
        let mut stop_reason = ProviderStopReason::EndTurn;
        let mut final_blocks = Vec::new();

        while let Some(item) = sse.next().await {
            if options.cancellation.is_cancelled() {
                return Err(Error::Abort(crate::error::ErrorDetail::new("cancelled")));
            }
            let chunk = item?;
            if let Some(choice) = chunk.choices.first() {
                if let Some(delta_text) = &choice.delta.content {
                    (callbacks.on_chunk)(delta_text);
                }
                match choice.finish_reason.as_deref() {
                    Some("tool_calls") => stop_reason = ProviderStopReason::ToolUse,
                    Some("length") => stop_reason = ProviderStopReason::MaxTokens,
                    _ => {}
                }
            }
            let blocks = aggregator.process_chunk(chunk)?;
            if !blocks.is_empty() {
                final_blocks = legacy_to_new_blocks(blocks);
            }
        }

        Ok(ProviderResponse {
            content: final_blocks,
            stop_reason,
            stop_sequence: None,
            usage,
            model: request.model,
            raw: serde_json::Value::Null,
        })
    }
}
