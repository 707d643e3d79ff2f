//! Provider-agnostic content model.
//!
//! This is the tagged-variant data model the engine, parser, formatters and
//! adapters all speak: a single [`ContentBlock`] enum wide enough to express
//! every backend's content shape (Anthropic's block list, Bedrock's identical
//! wire shape, and OpenAI's flatter message/tool_call split), a [`Message`]
//! keyed by an opaque [`ParticipantId`] rather than a fixed user/assistant
//! duality, and the request/response envelope the engine exchanges with a
//! [`crate::adapter::ProviderAdapter`].
//!
//! This generalizes the narrower four-variant `ContentBlock` in [`crate::types`]
//! (Text/Image/ToolUse/ToolResult, shaped for the OpenAI chat wire format) to
//! the ten-variant set a multi-provider engine needs. The two live side by
//! side: `types::ContentBlock` still backs the OpenAI-compatible adapter's
//! wire conversion, `content::ContentBlock` is what callers and the other
//! three adapters see.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque conversational identity. The system does not reduce participants
/// to a fixed user/assistant duality; adapters decide role mapping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipantId(pub String);

impl ParticipantId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier correlating a `tool_use` block to its `tool_result`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolCallId(pub String);

impl fmt::Display for ToolCallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Requested cache TTL for a cache-control marker. Anthropic/Bedrock accept
/// only these two values; the OpenAI-compatible adapter ignores it entirely
/// (that backend has no explicit cache-control token).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTtl {
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "1h")]
    OneHour,
}

impl Default for CacheTtl {
    fn default() -> Self {
        CacheTtl::FiveMinutes
    }
}

/// Base64-encoded media with an explicit MIME type, the shape every media
/// variant below shares.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaSource {
    pub media_type: String,
    pub data: String,
    /// Original URL, kept only as a hint for logging/formatting; adapters
    /// always send `data`, never re-fetch from `source_url`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

/// Either inline base64 media or a bare URL a backend can fetch directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MediaRef {
    Base64(MediaSource),
    Url { url: String },
}

/// One of `tool_result.content`'s two shapes: plain text, or a nested list
/// of content blocks (to support returning images from a tool).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl ToolResultContent {
    pub fn text(s: impl Into<String>) -> Self {
        ToolResultContent::Text(s.into())
    }
}

/// The tagged-variant content block every message, tool result and
/// normalized response is built from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text(TextContent),
    Image(MediaContent),
    Document(MediaContent),
    Audio(MediaContent),
    Video(MediaContent),
    GeneratedImage(GeneratedImageContent),
    ToolUse(ToolUseContent),
    ToolResult(ToolResultContentBlock),
    Thinking(ThinkingContent),
    RedactedThinking(RedactedThinkingContent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextContent {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheTtl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaContent {
    #[serde(flatten)]
    pub source: MediaRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedImageContent {
    pub media_type: String,
    pub data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revised_prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUseContent {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultContentBlock {
    pub tool_use_id: String,
    pub content: ToolResultContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkingContent {
    pub thinking: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactedThinkingContent {
    pub data: String,
}

impl ContentBlock {
    pub fn text(s: impl Into<String>) -> Self {
        ContentBlock::Text(TextContent {
            text: s.into(),
            cache_control: None,
        })
    }

    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, input: serde_json::Value) -> Self {
        ContentBlock::ToolUse(ToolUseContent {
            id: id.into(),
            name: name.into(),
            input,
        })
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: ToolResultContent) -> Self {
        ContentBlock::ToolResult(ToolResultContentBlock {
            tool_use_id: tool_use_id.into(),
            content,
            is_error: None,
        })
    }

    pub fn generated_image(
        media_type: impl Into<String>,
        data: impl Into<String>,
        revised_prompt: Option<String>,
    ) -> Self {
        ContentBlock::GeneratedImage(GeneratedImageContent {
            media_type: media_type.into(),
            data: data.into(),
            revised_prompt,
        })
    }

    pub fn is_text(&self) -> bool {
        matches!(self, ContentBlock::Text(_))
    }

    pub fn is_tool_use(&self) -> bool {
        matches!(self, ContentBlock::ToolUse(_))
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, ContentBlock::ToolResult(_))
    }

    pub fn is_thinking(&self) -> bool {
        matches!(self, ContentBlock::Thinking(_) | ContentBlock::RedactedThinking(_))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text(t) => Some(&t.text),
            _ => None,
        }
    }

    pub fn as_tool_use(&self) -> Option<&ToolUseContent> {
        match self {
            ContentBlock::ToolUse(t) => Some(t),
            _ => None,
        }
    }

    /// Attach a cache-control marker to this block if it's a text block
    /// (the only variant the formatter ever marks). No-op otherwise.
    pub fn with_cache_control(mut self, ttl: CacheTtl) -> Self {
        if let ContentBlock::Text(t) = &mut self {
            t.cache_control = Some(ttl);
        }
        self
    }
}

/// Concatenate every text block's text, newline-joined. Non-text blocks are
/// skipped, matching the teacher's OpenAI-message flattening behavior.
pub fn extract_text(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .filter_map(|b| b.as_text())
        .collect::<Vec<_>>()
        .join("\n")
}

/// A single conversational turn. Participant is opaque; `cache_breakpoint`
/// requests that everything up to and including this message be cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub participant: ParticipantId,
    pub content: Vec<ContentBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_breakpoint: Option<bool>,
}

impl Message {
    pub fn new(participant: impl Into<ParticipantId>, content: Vec<ContentBlock>) -> Self {
        Self {
            participant: participant.into(),
            content,
            metadata: None,
            cache_breakpoint: None,
        }
    }

    pub fn text(participant: impl Into<ParticipantId>, text: impl Into<String>) -> Self {
        Self::new(participant, vec![ContentBlock::text(text)])
    }

    pub fn with_cache_breakpoint(mut self, marked: bool) -> Self {
        self.cache_breakpoint = Some(marked);
        self
    }

    pub fn text_content(&self) -> String {
        extract_text(&self.content)
    }
}

/// Model/request-shape configuration common to every backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestConfig {
    pub model: String,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
}

/// How tool definitions should be presented to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolMode {
    /// Pick `Native` for adapters known to prefer it, `Xml` otherwise.
    Auto,
    /// Tool protocol embedded in the prompt as XML tags (§4.2/§4.3).
    Xml,
    /// Backend-native tool/function-calling array.
    Native,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_use_id: String,
    pub content: ToolResultContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

/// A fully assembled request the Context Manager and Formatter operate on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedRequest {
    pub config: RequestConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_mode: Option<ToolMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_params: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
    Refusal,
    Abort,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_creation_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u64>,
}

impl Usage {
    pub fn accumulate(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_creation_tokens = match (self.cache_creation_tokens, other.cache_creation_tokens) {
            (Some(a), Some(b)) => Some(a + b),
            (a, b) => a.or(b),
        };
        self.cache_read_tokens = match (self.cache_read_tokens, other.cache_read_tokens) {
            (Some(a), Some(b)) => Some(a + b),
            (a, b) => a.or(b),
        };
    }

    /// cache_read / (input + cache_read + cache_creation), 0 if denominator is 0.
    pub fn cache_hit_ratio(&self) -> f64 {
        let read = self.cache_read_tokens.unwrap_or(0) as f64;
        let creation = self.cache_creation_tokens.unwrap_or(0) as f64;
        let denom = self.input_tokens as f64 + read + creation;
        if denom == 0.0 { 0.0 } else { read / denom }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimingInfo {
    pub total_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_to_first_token_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_per_second: Option<f64>,
    pub attempts: u32,
    pub retry_delays_ms: Vec<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelInfo {
    pub requested: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
    pub provider: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheInfo {
    pub markers_in_request: u32,
    pub tokens_created: u64,
    pub tokens_read: u64,
    pub hit_ratio: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequence_matched: Option<String>,
    pub usage: Usage,
    pub timing: TimingInfo,
    pub model: ModelInfo,
    pub cache: CacheInfo,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRecords {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<serde_json::Value>,
}

/// What the engine hands back to the caller. `content` is only what the
/// model produced THIS turn; it never includes prefill or prior history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedResponse {
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
    pub basic_usage: Usage,
    pub details: ResponseDetails,
    pub raw: RawRecords,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    User,
    Timeout,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbortedResponse {
    pub aborted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_content: Option<Vec<ContentBlock>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_usage: Option<Usage>,
    pub reason: AbortReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_text_skips_non_text() {
        let blocks = vec![
            ContentBlock::text("hello"),
            ContentBlock::tool_use("1", "f", serde_json::json!({})),
            ContentBlock::text("world"),
        ];
        assert_eq!(extract_text(&blocks), "hello\nworld");
    }

    #[test]
    fn test_usage_accumulate() {
        let mut total = Usage::default();
        total.accumulate(&Usage {
            input_tokens: 10,
            output_tokens: 5,
            cache_creation_tokens: Some(2),
            cache_read_tokens: None,
        });
        total.accumulate(&Usage {
            input_tokens: 3,
            output_tokens: 7,
            cache_creation_tokens: None,
            cache_read_tokens: Some(4),
        });
        assert_eq!(total.input_tokens, 13);
        assert_eq!(total.output_tokens, 12);
        assert_eq!(total.cache_creation_tokens, Some(2));
        assert_eq!(total.cache_read_tokens, Some(4));
    }

    #[test]
    fn test_cache_hit_ratio_zero_denominator() {
        assert_eq!(Usage::default().cache_hit_ratio(), 0.0);
    }

    #[test]
    fn test_message_text_content() {
        let msg = Message::text("alice", "hi there");
        assert_eq!(msg.text_content(), "hi there");
    }
}
