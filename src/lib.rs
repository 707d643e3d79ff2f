//! # Open Agent Core
//!
//! Provider-agnostic middleware for LLM inference: one normalized
//! request/response/streaming surface over an Anthropic-style Messages API,
//! an OpenAI-compatible Chat Completions endpoint, AWS Bedrock, and an
//! image-generation endpoint.
//!
//! ## Key Features
//!
//! - **Provider-agnostic normalization**: a tagged-variant content model and
//!   `NormalizedRequest`/`NormalizedResponse` pair, independent of any one
//!   backend's wire shape.
//! - **Inline tool execution loop**: the Engine streams a backend, recognizes
//!   `<function_calls>` (or native `tool_use` blocks), executes caller-supplied
//!   tools in-loop, and resumes generation — bounded by a configurable tool
//!   depth.
//! - **Yielding stream**: an externally-drivable event sequence for callers
//!   that want to await tool results instead of supplying a synchronous
//!   callback.
//! - **Context manager**: cache-marker placement, rolling-window eviction,
//!   and hard budget limits for long conversations.
//! - **Retry logic**: exponential backoff honoring provider-supplied
//!   `retry_after_ms`.
//!
//! ## Example: streaming with inline tool execution
//!
//! ```rust,no_run
//! use open_agent::adapter::anthropic::AnthropicAdapter;
//! use open_agent::engine::{EngineConfig, stream_with_xml_tools};
//! use open_agent::{NormalizedMessage, NormalizedRequest, ParticipantId, RequestConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let adapter = AnthropicAdapter::from_env()?;
//!     let request = NormalizedRequest {
//!         config: RequestConfig { model: "claude-sonnet-4-5-20250929".to_string(), max_tokens: 256, temperature: None, top_p: None, top_k: None },
//!         system: Some("You are a helpful assistant.".to_string()),
//!         messages: vec![NormalizedMessage::text(ParticipantId::new("User"), "Hello!")],
//!         tools: None,
//!         tool_mode: None,
//!         provider_params: None,
//!         stop_sequences: None,
//!     };
//!     let config = EngineConfig::default();
//!     let outcome = stream_with_xml_tools(
//!         &adapter,
//!         request,
//!         &config,
//!         |chunk| print!("{chunk}"),
//!         |_calls, _ctx| async { Ok(Vec::new()) },
//!     )
//!     .await?;
//!     println!("\nstop reason: {:?}", outcome.response.stop_reason);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **content**: the tagged-variant content model, normalized request/response types
//! - **parser**: the incremental tag-stream parser
//! - **tool_call_parser**: XML tool-call extraction and serialization
//! - **formatter**: prefill/native/completions formatters
//! - **adapter**: the `ProviderAdapter` contract plus Anthropic/Bedrock/OpenAI-compatible/Images adapters
//! - **engine**: the retry loop and bounded tool-execution loop
//! - **stream**: the yielding-stream event/handshake surface
//! - **context**: cache-marker placement, rolling eviction, hard limits
//! - **error**: the structured error taxonomy
//! - **tools**: tool definition system with JSON-schema authoring
//! - **retry**: exponential backoff with jitter
//!
//! A handful of modules (**types**, **utils**, **hooks**, **config**) survive
//! from this crate's OpenAI-compatible-client ancestor: `types::ContentBlock`
//! and `utils::{parse_sse_stream, ToolCallAggregator}` remain load-bearing for
//! the OpenAI-compatible adapter's SSE aggregation; the rest are kept for the
//! token-estimation/truncation helpers re-exported below.

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================
// These modules are private (internal implementation details) unless explicitly
// re-exported through `pub use` statements below.

/// Provider-agnostic tagged-variant content model (`content::ContentBlock`),
/// normalized request/response types, and usage/timing telemetry. Lives
/// alongside the narrower `types::ContentBlock` the OpenAI-compatible
/// adapter's SSE aggregation still uses; the two are not unified.
mod content;

/// Incremental tag-stream parser: scans assistant output for
/// `function_calls`/`function_results`/`thinking` blocks as bytes arrive,
/// without ever re-scanning already-emitted text.
mod parser;

/// XML tool-call extraction and serialization: `<function_calls>` parsing,
/// monotonic tool-call id generation, and `<function_results>` formatting
/// with split-turn image injection.
mod tool_call_parser;

/// Conversation-to-wire-format translation: prefill (XML tool mode),
/// native (role-based), and completions (flattened prompt) formatters.
pub mod formatter;

/// The `ProviderAdapter` capability contract plus concrete adapters for
/// Anthropic, Bedrock, OpenAI-compatible backends, and the Images API.
pub mod adapter;

/// The provider-agnostic completion engine: retry/backoff, the XML-mode and
/// native-mode streaming tool loops, and lifecycle hooks, built on top of
/// the prefill formatter, the incremental tag parser, and the adapters.
pub mod engine;

/// The Yielding Stream: an externally-drivable async event sequence over
/// the same XML-mode tool loop `engine::stream_with_xml_tools` runs
/// inline, for callers that need to park on `waiting_for_tools` instead of
/// supplying a synchronous callback.
pub mod stream;

/// Provider configuration helpers for LM Studio, Ollama, llama.cpp, and vLLM.
/// Simplifies endpoint and model name resolution with environment variable support.
mod config;

/// Context window management utilities for token estimation and history truncation.
/// Provides manual control over conversation memory to prevent context overflow.
mod context;

/// Error types and conversions for comprehensive error handling throughout the SDK.
/// Defines the `Error` enum and `Result<T>` type alias used across all public APIs.
mod error;

/// Lifecycle hooks system for intercepting and controlling execution at key points.
/// Enables security gates, audit logging, input/output modification, and compliance checks.
mod hooks;

/// Tool definition and execution system with automatic JSON schema generation.
/// Allows LLMs to call Rust functions with type-safe parameter handling.
mod tools;

/// Core type definitions for messages, content blocks, and agent configuration.
/// Includes builder patterns for ergonomic configuration and OpenAI API serialization.
mod types;

/// Internal utilities for Server-Sent Events (SSE) parsing and tool call aggregation.
/// Handles the low-level details of streaming response parsing.
mod utils;

// ============================================================================
// PUBLIC EXPORTS
// ============================================================================
// These items form the public API of the SDK. Everything else is internal.

/// Retry utilities with exponential backoff and jitter.
/// Made public as a module so users can access retry configuration and functions
/// for their own operations that need retry logic.
pub mod retry;

// --- Provider-Agnostic Content Model ---

pub use content::{
    AbortReason, AbortedResponse, CacheTtl, ContentBlock as Content, Message as NormalizedMessage,
    NormalizedRequest, NormalizedResponse, ParticipantId, RequestConfig, ResponseDetails, StopReason,
    ToolCall, ToolCallId, ToolDefinition, ToolMode, ToolResult, ToolResultContent, Usage,
};

// --- Provider Adapters ---

pub use adapter::{CallOptions, CancellationToken, ProviderAdapter, ProviderRequest, ProviderResponse};

// --- Completion Engine ---

pub use engine::{
    EngineConfig, EngineHooks, StreamOutcome, ToolCallContext, complete, stream_with_native_tools,
    stream_with_xml_tools,
};

// --- Yielding Stream ---

pub use stream::{AbortedReason, EventStream, StreamEvent, ToolResultsHandle, yielding_stream};

// --- Provider Configuration ---

pub use config::{Provider, get_base_url, get_model};

// --- Context Management ---

pub use context::{
    CacheMarkerPolicy, ContextInfo, ContextLimit, ContextManagerConfig, ContextState,
    DefaultEstimator, HardLimits, RollingPolicy, TokenEstimator, estimate_tokens,
    is_approaching_limit, process_context, truncate_messages,
};

// --- Error Handling ---

pub use error::{Error, Result};

// --- Lifecycle Hooks ---

pub use hooks::{
    HOOK_POST_TOOL_USE, HOOK_PRE_TOOL_USE, HOOK_USER_PROMPT_SUBMIT, HookDecision, Hooks,
    PostToolUseEvent, PreToolUseEvent, UserPromptSubmitEvent,
};

// --- Tool System ---

pub use tools::{Tool, ToolBuilder, tool};

// --- Legacy Types (OpenAI-compatible adapter, image validation, context estimation) ---

pub use types::{
    AgentOptions, AgentOptionsBuilder, ContentBlock, ImageBlock, ImageDetail, Message, MessageRole,
    TextBlock, ToolResultBlock, ToolUseBlock,
};

// ============================================================================
// CONVENIENCE PRELUDE
// ============================================================================

/// Convenience module containing the most commonly used types and functions.
/// Import with `use open_agent::prelude::*;` to get everything you need for typical usage.
///
/// This includes:
/// - Content model: `Content` (= `content::ContentBlock`), `NormalizedMessage`, `NormalizedRequest`
/// - Adapters: `ProviderAdapter`, `CallOptions`, `CancellationToken`
/// - Engine: `EngineConfig`, `complete`, `stream_with_xml_tools`, `stream_with_native_tools`
/// - Yielding stream: `yielding_stream`, `StreamEvent`
/// - Tools: `Tool`, `tool()`
/// - Hooks: `Hooks`, `HookDecision`, hook event types
/// - Errors: `Error`, `Result`
pub mod prelude {
    pub use crate::{
        CallOptions, CancellationToken, Content, EngineConfig, Error, HookDecision, Hooks,
        NormalizedMessage, NormalizedRequest, PostToolUseEvent, PreToolUseEvent, ProviderAdapter,
        Result, StreamEvent, Tool, UserPromptSubmitEvent, complete, stream_with_native_tools,
        stream_with_xml_tools, tool, yielding_stream,
    };
}
