//! The Yielding Stream: exposes the tool loop as an externally-drivable
//! async event sequence instead of a hook-driven auto-executor, per §4.9.
//!
//! No teacher analog — `client.rs`'s `Client` only supports hook-driven
//! auto-execution, with no parked state a caller can resume from outside.
//! Built on a `tokio::sync::mpsc` event channel paired with a
//! `tokio::sync::oneshot`-per-parking resume channel, per §9's guidance
//! that the two are equivalent as long as ordering holds. Reuses the
//! `ContentStream` type alias idiom from `client.rs` for the outward event
//! stream.

use crate::adapter::{CallOptions, ProviderAdapter, ProviderRequest, ProviderStopReason, StreamCallbacks};
use crate::content::{NormalizedRequest, NormalizedResponse, ToolCall, ToolResult, Usage};
use crate::engine::EngineConfig;
use crate::error::Error;
use crate::formatter::prefill::build_prefill;
use crate::parser::IncrementalTagParser;
use crate::tool_call_parser::{extract_tool_calls, format_tool_results, has_unclosed_tool_block, ToolCallIdGenerator};
use crate::Result;
use futures::Stream;
use std::pin::Pin;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Events delivered to the consumer of a [`YieldingStream`].
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Chunk(String),
    ToolCalls { pending_tool_call_ids: Vec<String>, calls: Vec<ToolCall> },
    Usage(Usage),
    Complete(Box<NormalizedResponse>),
    Error(String),
    Aborted { reason: AbortedReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortedReason {
    User,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Streaming,
    WaitingForTools,
    Done,
    Error,
}

/// A handle the consumer uses to resume a parked stream with tool results.
pub struct ToolResultsHandle {
    pending_ids: Vec<String>,
    resume_tx: Option<oneshot::Sender<Vec<ToolResult>>>,
}

impl ToolResultsHandle {
    /// Resume the parked inference loop. Missing ids fail immediately;
    /// extra ids are accepted and simply ignored downstream.
    pub fn provide_tool_results(mut self, results: Vec<ToolResult>) -> Result<()> {
        let provided: std::collections::HashSet<&str> =
            results.iter().map(|r| r.tool_use_id.as_str()).collect();
        for id in &self.pending_ids {
            if !provided.contains(id.as_str()) {
                return Err(Error::invalid_input(format!(
                    "missing tool result for pending call id {id}"
                )));
            }
        }
        let tx = self
            .resume_tx
            .take()
            .ok_or_else(|| Error::invalid_input("tool results already provided"))?;
        tx.send(results)
            .map_err(|_| Error::stream("yielding stream consumer dropped before results were delivered"))
    }
}

pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Drive the XML-mode tool loop as an event stream. Returns the event
/// stream plus a channel the driver task uses to hand the consumer a
/// [`ToolResultsHandle`] each time it parks on `waiting_for_tools`.
pub fn yielding_stream(
    adapter: std::sync::Arc<dyn ProviderAdapter>,
    mut request: NormalizedRequest,
    config: EngineConfig,
) -> (EventStream, mpsc::UnboundedReceiver<ToolResultsHandle>) {
    let (event_tx, event_rx) = mpsc::unbounded_channel::<StreamEvent>();
    let (handle_tx, handle_rx) = mpsc::unbounded_channel::<ToolResultsHandle>();

    tokio::spawn(async move {
        let mut state = State::Idle;
        let id_gen = ToolCallIdGenerator::new();
        let mut tool_depth = 0u32;
        let mut accumulated_usage = Usage::default();

        'outer: loop {
            state = State::Streaming;

            if config.call_options.cancellation.is_cancelled() {
                let _ = event_tx.send(StreamEvent::Aborted { reason: AbortedReason::User });
                state = State::Done;
                break 'outer;
            }

            let prefill = match build_prefill(
                &request.messages,
                request.system.as_deref(),
                request.tools.as_deref(),
                &config.prefill_options,
            ) {
                Ok(p) => p,
                Err(e) => {
                    let _ = event_tx.send(StreamEvent::Error(e.to_string()));
                    state = State::Error;
                    break 'outer;
                }
            };

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
            let provider_request = ProviderRequest { body, model: request.config.model.clone() };

            let mut parser = IncrementalTagParser::new();
            let stream_result = {
                let parser_ref = &mut parser;
                let chunk_tx = event_tx.clone();
                let callbacks = StreamCallbacks {
                    on_chunk: Box::new(|text: &str| {
                        let _ = chunk_tx.send(StreamEvent::Chunk(text.to_string()));
                        let _ = parser_ref.push(text);
                    }),
                    on_content_block: None,
                };
                adapter.stream(provider_request, callbacks, &config.call_options).await
            };

            let cancelled_mid_stream = config.call_options.cancellation.is_cancelled();
            let response = match stream_result {
                Ok(r) => r,
                Err(_) if cancelled_mid_stream => {
                    let _ = event_tx.send(StreamEvent::Aborted { reason: AbortedReason::User });
                    state = State::Done;
                    break 'outer;
                }
                Err(e) => {
                    let _ = event_tx.send(StreamEvent::Error(e.to_string()));
                    state = State::Error;
                    break 'outer;
                }
            };
            accumulated_usage.accumulate(&response.usage);
            let _ = event_tx.send(StreamEvent::Usage(accumulated_usage.clone()));

            let mut accumulated_text = parser.accumulated_text().to_string();
            let false_positive_stop = response.stop_reason == ProviderStopReason::StopSequence
                && has_unclosed_tool_block(&accumulated_text);

            if response.stop_reason == ProviderStopReason::StopSequence
                && response.stop_sequence.as_deref() == Some("</function_calls>")
            {
                accumulated_text.push_str("</function_calls>");
                let _ = event_tx.send(StreamEvent::Chunk("</function_calls>".to_string()));
            }

            let extracted = extract_tool_calls(&accumulated_text, &id_gen);

            if let Some(extracted) = extracted.filter(|e| !e.calls.is_empty()) {
                tool_depth += 1;
                if tool_depth > config.max_tool_depth {
                    let _ = event_tx.send(StreamEvent::Error(format!(
                        "tool depth exceeded maximum of {}",
                        config.max_tool_depth
                    )));
                    state = State::Error;
                    break 'outer;
                }

                state = State::WaitingForTools;
                let pending_ids: Vec<String> = extracted.calls.iter().map(|c| c.id.clone()).collect();
                let _ = event_tx.send(StreamEvent::ToolCalls {
                    pending_tool_call_ids: pending_ids.clone(),
                    calls: extracted.calls.clone(),
                });

                let (resume_tx, resume_rx) = oneshot::channel::<Vec<ToolResult>>();
                if handle_tx
                    .send(ToolResultsHandle { pending_ids, resume_tx: Some(resume_tx) })
                    .is_err()
                {
                    break 'outer;
                }

                let results = tokio::select! {
                    r = resume_rx => match r {
                        Ok(results) => results,
                        Err(_) => {
                            let _ = event_tx.send(StreamEvent::Aborted { reason: AbortedReason::User });
                            state = State::Done;
                            break 'outer;
                        }
                    },
                    _ = config.call_options.cancellation.cancelled() => {
                        let _ = event_tx.send(StreamEvent::Aborted { reason: AbortedReason::User });
                        state = State::Done;
                        break 'outer;
                    }
                };

                let serialized = format_tool_results(&results);
                let _ = event_tx.send(StreamEvent::Chunk(serialized.flat_xml()));

                let trimmed = accumulated_text.trim_end().to_string();
                request.messages.push(crate::content::Message::text(
                    config.prefill_options.assistant_participant.clone(),
                    trimmed,
                ));
                request.messages.push(crate::content::Message::text("Tool", serialized.flat_xml()));
                continue 'outer;
            }

            if false_positive_stop {
                tool_depth += 1;
                if tool_depth > config.max_tool_depth {
                    let _ = event_tx
                        .send(StreamEvent::Error("unclosed tool block exceeded maximum tool depth".to_string()));
                    state = State::Error;
                    break 'outer;
                }
                let trimmed = accumulated_text.trim_end().to_string();
                request.messages.push(crate::content::Message::text(
                    config.prefill_options.assistant_participant.clone(),
                    trimmed,
                ));
                continue 'outer;
            }

            let content = crate::formatter::parse_content_blocks(&accumulated_text);
            let normalized = NormalizedResponse {
                content,
                stop_reason: crate::engine::map_stop_reason(response.stop_reason),
                basic_usage: accumulated_usage.clone(),
                details: crate::content::ResponseDetails {
                    stop_sequence_matched: response.stop_sequence.clone(),
                    usage: accumulated_usage.clone(),
                    timing: crate::content::TimingInfo {
                        total_ms: 0,
                        time_to_first_token_ms: None,
                        tokens_per_second: None,
                        attempts: tool_depth + 1,
                        retry_delays_ms: Vec::new(),
                    },
                    model: crate::content::ModelInfo {
                        requested: request.config.model.clone(),
                        actual: Some(response.model.clone()),
                        provider: adapter.name().to_string(),
                    },
                    cache: crate::content::CacheInfo {
                        markers_in_request: 0,
                        tokens_created: accumulated_usage.cache_creation_tokens.unwrap_or(0),
                        tokens_read: accumulated_usage.cache_read_tokens.unwrap_or(0),
                        hit_ratio: accumulated_usage.cache_hit_ratio(),
                    },
                },
                raw: crate::content::RawRecords {
                    request: None,
                    response: Some(response.raw),
                    headers: None,
                },
            };

            let _ = event_tx.send(StreamEvent::Complete(Box::new(normalized)));
            state = State::Done;
            break 'outer;
        }

        debug_assert!(matches!(state, State::Done | State::Error));
    });

    (Box::pin(UnboundedReceiverStream::new(event_rx)), handle_rx)
}
