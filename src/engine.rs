//! The Engine: turns a normalized request into provider calls, runs the
//! retry/backoff loop, and drives the inline tool-execution loop for both
//! XML and native tool modes.
//!
//! `complete` is grounded directly on `retry.rs`'s `retry_with_backoff_conditional`
//! (exponential backoff honoring `retry_after_ms`). The XML-mode streaming
//! loop generalizes `client.rs::Client::auto_execute_loop` (bounded-iteration
//! tool loop, hook invocation around tool execution) from "one tool call
//! shape, native OpenAI deltas only" to the dual xml/native split, adding
//! false-positive-stop recovery, which has no teacher analog at all.

use crate::adapter::{CallOptions, ProviderAdapter, ProviderRequest, ProviderResponse, ProviderStopReason, StreamCallbacks};
use crate::content::{
    CacheInfo, ContentBlock, ModelInfo, NormalizedRequest, NormalizedResponse, RawRecords,
    ResponseDetails, StopReason, TimingInfo, ToolCall, ToolMode, ToolResult, Usage,
};
use crate::error::Error;
use crate::formatter::prefill::{build_prefill, PrefillOptions};
use crate::parser::IncrementalTagParser;
use crate::retry::RetryConfig;
use crate::tool_call_parser::{extract_tool_calls, format_tool_results, has_unclosed_tool_block, ToolCallIdGenerator};
use crate::Result;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

const DEFAULT_MAX_TOOL_DEPTH: u32 = 10;

pub type BeforeRequestHook =
    Arc<dyn Fn(ProviderRequest) -> Pin<Box<dyn Future<Output = ProviderRequest> + Send>> + Send + Sync>;
pub type AfterResponseHook =
    Arc<dyn Fn(&NormalizedResponse) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;
pub type OnErrorHook =
    Arc<dyn Fn(&Error) -> Pin<Box<dyn Future<Output = bool> + Send>> + Send + Sync>;

/// Engine-level lifecycle hooks, mirroring the "call each handler, take the
/// decision" shape of `hooks::Hooks` but for the three request-level points
/// named in the engine design rather than tool-use/prompt-submit.
#[derive(Clone, Default)]
pub struct EngineHooks {
    pub before_request: Option<BeforeRequestHook>,
    pub after_response: Option<AfterResponseHook>,
    /// Returns `true` to force an abort instead of a retry.
    pub on_error: Option<OnErrorHook>,
}

pub struct EngineConfig {
    pub retry: RetryConfig,
    pub max_tool_depth: u32,
    pub hooks: EngineHooks,
    pub call_options: CallOptions,
    pub prefill_options: PrefillOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            max_tool_depth: DEFAULT_MAX_TOOL_DEPTH,
            hooks: EngineHooks::default(),
            call_options: CallOptions::default(),
            prefill_options: PrefillOptions::default(),
        }
    }
}

pub(crate) fn map_stop_reason(reason: ProviderStopReason) -> StopReason {
    match reason {
        ProviderStopReason::EndTurn => StopReason::EndTurn,
        ProviderStopReason::MaxTokens => StopReason::MaxTokens,
        ProviderStopReason::StopSequence => StopReason::StopSequence,
        ProviderStopReason::ToolUse => StopReason::ToolUse,
        ProviderStopReason::Refusal => StopReason::Refusal,
    }
}

fn normalize_response(
    provider_response: ProviderResponse,
    request_body: &serde_json::Value,
    elapsed: Duration,
    attempts: u32,
) -> NormalizedResponse {
    let usage = provider_response.usage.clone();
    let cache = CacheInfo {
        markers_in_request: 0,
        tokens_created: usage.cache_creation_tokens.unwrap_or(0),
        tokens_read: usage.cache_read_tokens.unwrap_or(0),
        hit_ratio: usage.cache_hit_ratio(),
    };
    let timing = TimingInfo {
        total_ms: elapsed.as_millis() as u64,
        time_to_first_token_ms: None,
        tokens_per_second: None,
        attempts,
        retry_delays_ms: Vec::new(),
    };
    let model = ModelInfo {
        requested: provider_response.model.clone(),
        actual: Some(provider_response.model.clone()),
        provider: String::new(),
    };
    let stop_reason = map_stop_reason(provider_response.stop_reason);
    NormalizedResponse {
        content: provider_response.content,
        stop_reason,
        basic_usage: usage.clone(),
        details: ResponseDetails {
            stop_sequence_matched: provider_response.stop_sequence,
            usage,
            timing,
            model,
            cache,
        },
        raw: RawRecords {
            request: Some(request_body.clone()),
            response: Some(provider_response.raw),
            headers: None,
        },
    }
}

/// Non-streaming completion with the retry/backoff loop from §4.7.
pub async fn complete(
    adapter: &dyn ProviderAdapter,
    mut provider_request: ProviderRequest,
    config: &EngineConfig,
) -> Result<NormalizedResponse> {
    if let Some(hook) = &config.hooks.before_request {
        provider_request = hook(provider_request).await;
    }

    let started = Instant::now();
    let body = provider_request.body.clone();
    let mut attempt = 0u32;

    loop {
        if config.call_options.cancellation.is_cancelled() {
            return Err(Error::Abort(crate::error::ErrorDetail::new("cancelled before request")));
        }

        match adapter.complete(provider_request.clone(), &config.call_options).await {
            Ok(response) => {
                let normalized = normalize_response(response, &body, started.elapsed(), attempt + 1);
                if let Some(hook) = &config.hooks.after_response {
                    hook(&normalized).await;
                }
                return Ok(normalized);
            }
            Err(err) => {
                let force_abort = match &config.hooks.on_error {
                    Some(hook) => hook(&err).await,
                    None => false,
                };
                let retryable = !force_abort && crate::retry::is_retryable_error(&err);
                if !retryable || attempt + 1 >= config.retry.max_attempts {
                    return Err(err);
                }
                let retry_after = err.retry_after_ms();
                let delay = config.retry.calculate_delay_for(attempt, retry_after);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Context handed to the caller's tool-execution callback: everything it
/// might need to decide how to run the requested tools.
pub struct ToolCallContext<'a> {
    pub raw_text: &'a str,
    pub preamble: &'a str,
    pub depth: u32,
    pub previous_results: &'a [ToolResult],
}

pub struct StreamOutcome {
    pub response: NormalizedResponse,
    pub raw_assistant_text: String,
}

/// Run the XML-mode inline tool loop (§4.8). `on_chunk`/`on_block` observe
/// streamed output; `on_tool_calls` executes the requested tools and returns
/// their results, driving the loop forward.
pub async fn stream_with_xml_tools<F, Fut>(
    adapter: &dyn ProviderAdapter,
    mut request: NormalizedRequest,
    config: &EngineConfig,
    mut on_chunk: impl FnMut(&str) + Send,
    mut on_tool_calls: F,
) -> Result<StreamOutcome>
where
    F: FnMut(Vec<ToolCall>, ToolCallContext<'_>) -> Fut + Send,
    Fut: Future<Output = Result<Vec<ToolResult>>> + Send,
{
    let id_gen = ToolCallIdGenerator::new();
    let mut tool_depth = 0u32;
    let mut accumulated_usage = Usage::default();
    let mut previous_results: Vec<ToolResult> = Vec::new();
    let started = Instant::now();

    loop {
        if config.call_options.cancellation.is_cancelled() {
            return Err(Error::Abort(crate::error::ErrorDetail::new("cancelled")));
        }

        let prefill = build_prefill(
            &request.messages,
            request.system.as_deref(),
            request.tools.as_deref(),
            &config.prefill_options,
        )?;

        let body = serde_json::json!({
            "model": request.config.model,
            "max_tokens": request.config.max_tokens,
            "system": prefill.system_content,
            "messages": prefill.turns.iter().map(|t| serde_json::json!({
                "role": t.role,
                "content": t.content,
            })).collect::<Vec<_>>(),
            "stop_sequences": prefill.stop_sequences,
        });
        let mut provider_request = ProviderRequest { body, model: request.config.model.clone() };
        if let Some(hook) = &config.hooks.before_request {
            provider_request = hook(provider_request).await;
        }

        let mut parser = IncrementalTagParser::new();
        let response = {
            let parser_ref = &mut parser;
            let callbacks = StreamCallbacks {
                on_chunk: Box::new(|text: &str| {
                    on_chunk(text);
                    let _ = parser_ref.push(text);
                }),
                on_content_block: None,
            };
            adapter.stream(provider_request.clone(), callbacks, &config.call_options).await?
        };
        accumulated_usage.accumulate(&response.usage);
        parser.flush();

        let mut accumulated_text = parser.accumulated_text().to_string();

        let false_positive_stop = response.stop_reason == ProviderStopReason::StopSequence
            && has_unclosed_tool_block(&accumulated_text);

        if response.stop_reason == ProviderStopReason::StopSequence
            && response.stop_sequence.as_deref() == Some("</function_calls>")
        {
            accumulated_text.push_str("</function_calls>");
            on_chunk("</function_calls>");
        }

        let extracted = extract_tool_calls(&accumulated_text, &id_gen);

        if let Some(extracted) = extracted.filter(|e| !e.calls.is_empty()) {
            tool_depth += 1;
            if tool_depth > config.max_tool_depth {
                return Err(Error::tool(format!(
                    "tool depth exceeded maximum of {}",
                    config.max_tool_depth
                )));
            }

            let context = ToolCallContext {
                raw_text: &accumulated_text,
                preamble: &extracted.before_text,
                depth: tool_depth,
                previous_results: &previous_results,
            };
            let results = on_tool_calls(extracted.calls.clone(), context).await?;
            previous_results = results.clone();

            let serialized = format_tool_results(&results);
            on_chunk(&serialized.flat_xml());

            let trimmed = accumulated_text.trim_end().to_string();
            request.messages.push(crate::content::Message::text(
                config.prefill_options.assistant_participant.clone(),
                trimmed,
            ));
            request.messages.push(crate::content::Message::text(
                "Tool",
                serialized.flat_xml(),
            ));
            continue;
        }

        if false_positive_stop {
            tool_depth += 1;
            if tool_depth > config.max_tool_depth {
                return Err(Error::stream("unclosed tool block exceeded maximum tool depth"));
            }
            let trimmed = accumulated_text.trim_end().to_string();
            request.messages.push(crate::content::Message::text(
                config.prefill_options.assistant_participant.clone(),
                trimmed,
            ));
            continue;
        }

        let content = crate::formatter::parse_content_blocks(&accumulated_text);
        let normalized = NormalizedResponse {
            content,
            stop_reason: map_stop_reason(response.stop_reason),
            basic_usage: accumulated_usage.clone(),
            details: ResponseDetails {
                stop_sequence_matched: response.stop_sequence.clone(),
                usage: accumulated_usage.clone(),
                timing: TimingInfo {
                    total_ms: started.elapsed().as_millis() as u64,
                    time_to_first_token_ms: None,
                    tokens_per_second: None,
                    attempts: tool_depth + 1,
                    retry_delays_ms: Vec::new(),
                },
                model: ModelInfo {
                    requested: request.config.model.clone(),
                    actual: Some(response.model.clone()),
                    provider: adapter.name().to_string(),
                },
                cache: CacheInfo {
                    markers_in_request: 0,
                    tokens_created: accumulated_usage.cache_creation_tokens.unwrap_or(0),
                    tokens_read: accumulated_usage.cache_read_tokens.unwrap_or(0),
                    hit_ratio: accumulated_usage.cache_hit_ratio(),
                },
            },
            raw: RawRecords {
                request: Some(provider_request.body),
                response: Some(response.raw),
                headers: None,
            },
        };

        if let Some(hook) = &config.hooks.after_response {
            hook(&normalized).await;
        }

        return Ok(StreamOutcome {
            response: normalized,
            raw_assistant_text: accumulated_text,
        });
    }
}

/// Run the native-tools loop: provider returns structured `tool_use` blocks
/// directly instead of an XML stream fragment.
pub async fn stream_with_native_tools<F, Fut>(
    adapter: &dyn ProviderAdapter,
    mut request: NormalizedRequest,
    config: &EngineConfig,
    mut on_tool_calls: F,
) -> Result<NormalizedResponse>
where
    F: FnMut(Vec<ToolCall>, ToolCallContext<'_>) -> Fut + Send,
    Fut: Future<Output = Result<Vec<ToolResult>>> + Send,
{
    request.tool_mode = Some(ToolMode::Native);
    let mut tool_depth = 0u32;
    let mut accumulated_usage = Usage::default();
    let started = Instant::now();

    loop {
        if config.call_options.cancellation.is_cancelled() {
            return Err(Error::Abort(crate::error::ErrorDetail::new("cancelled")));
        }

        let native_turns = crate::formatter::native::build_native_turns(
            &request.messages,
            &config.prefill_options.assistant_participant,
            true,
            true,
        );
        let body = serde_json::json!({
            "model": request.config.model,
            "max_tokens": request.config.max_tokens,
            "messages": native_turns.iter().map(|t| serde_json::json!({
                "role": t.role,
                "content": t.content,
            })).collect::<Vec<_>>(),
            "tools": request.tools.iter().flatten().map(crate::formatter::tool_to_anthropic_json).collect::<Vec<_>>(),
        });
        let provider_request = ProviderRequest { body, model: request.config.model.clone() };

        let response = adapter.complete(provider_request, &config.call_options).await?;
        accumulated_usage.accumulate(&response.usage);

        let calls: Vec<ToolCall> = response
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse(t) => Some(ToolCall {
                    id: t.id.clone(),
                    name: t.name.clone(),
                    input: t.input.clone(),
                }),
                _ => None,
            })
            .collect();

        if response.stop_reason != ProviderStopReason::ToolUse || calls.is_empty() {
            return Ok(NormalizedResponse {
                content: response.content,
                stop_reason: map_stop_reason(response.stop_reason),
                basic_usage: accumulated_usage.clone(),
                details: ResponseDetails {
                    stop_sequence_matched: response.stop_sequence,
                    usage: accumulated_usage.clone(),
                    timing: TimingInfo {
                        total_ms: started.elapsed().as_millis() as u64,
                        time_to_first_token_ms: None,
                        tokens_per_second: None,
                        attempts: tool_depth + 1,
                        retry_delays_ms: Vec::new(),
                    },
                    model: ModelInfo {
                        requested: request.config.model.clone(),
                        actual: Some(response.model),
                        provider: adapter.name().to_string(),
                    },
                    cache: CacheInfo {
                        markers_in_request: 0,
                        tokens_created: accumulated_usage.cache_creation_tokens.unwrap_or(0),
                        tokens_read: accumulated_usage.cache_read_tokens.unwrap_or(0),
                        hit_ratio: accumulated_usage.cache_hit_ratio(),
                    },
                },
                raw: RawRecords {
                    request: None,
                    response: Some(response.raw),
                    headers: None,
                },
            });
        }

        tool_depth += 1;
        if tool_depth > config.max_tool_depth {
            return Err(Error::tool(format!(
                "tool depth exceeded maximum of {}",
                config.max_tool_depth
            )));
        }

        let text_preamble = crate::content::extract_text(&response.content);
        let context = ToolCallContext {
            raw_text: &text_preamble,
            preamble: &text_preamble,
            depth: tool_depth,
            previous_results: &[],
        };
        let results = on_tool_calls(calls, context).await?;

        request.messages.push(crate::content::Message::new(
            config.prefill_options.assistant_participant.clone(),
            response.content,
        ));
        let result_blocks = results
            .into_iter()
            .map(|r| ContentBlock::tool_result(r.tool_use_id, r.content))
            .collect();
        request.messages.push(crate::content::Message::new("Tool", result_blocks));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default_max_tool_depth() {
        let config = EngineConfig::default();
        assert_eq!(config.max_tool_depth, DEFAULT_MAX_TOOL_DEPTH);
    }

    #[test]
    fn test_map_stop_reason_tool_use() {
        assert_eq!(map_stop_reason(ProviderStopReason::ToolUse), StopReason::ToolUse);
    }
}
