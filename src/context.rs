//! Context management utilities for manual history management
//!
//! This module provides low-level helpers for managing conversation history.
//! These are opt-in utilities - nothing is automatic. You decide when and how
//! to manage context.
//!
//! # Features
//!
//! - Token estimation (character-based approximation)
//! - Message truncation with system prompt preservation
//! - Manual history management patterns
//!
//! # Examples
//!
//! ```rust
//! use open_agent::{estimate_tokens, truncate_messages};
//!
//! // Estimate tokens
//! let messages = vec![/* your messages */];
//! let tokens = estimate_tokens(&messages);
//! println!("Estimated tokens: {}", tokens);
//!
//! // Truncate when needed
//! if tokens > 28000 {
//!     let truncated = truncate_messages(&messages, 10, true);
//!     // Use truncated messages...
//! }
//! ```

use crate::types::Message;

/// Estimate token count for message list
///
/// Uses character-based approximation (1 token ≈ 4 characters).
///
/// # Arguments
///
/// * `messages` - List of messages to estimate tokens for
///
/// # Returns
///
/// Estimated token count
///
/// # Note
///
/// This is an APPROXIMATION. Actual token counts vary by model family:
/// - GPT models: ~70-85% accurate (different tokenizers)
/// - Llama, Qwen, Mistral: ~70-85% accurate
/// - Always include 10-20% safety margin when checking limits
///
/// For more accurate estimation, consider using tiktoken bindings
/// (not included to keep dependencies minimal).
///
/// # Examples
///
/// ```rust
/// use open_agent::{Message, MessageRole, estimate_tokens};
///
/// let messages = vec![
///     Message::system("You are a helpful assistant"),
///     Message::user("Hello!"),
/// ];
///
/// let tokens = estimate_tokens(&messages);
/// println!("Estimated tokens: {}", tokens);
///
/// // Check if approaching context limit
/// if tokens > 28000 {
///     println!("Need to truncate!");
/// }
/// ```
pub fn estimate_tokens(messages: &[Message]) -> usize {
    // Character-based approximation: 1 token ≈ 4 characters
    // This is a conservative estimate that works across model families

    if messages.is_empty() {
        return 0;
    }

    let mut total_chars = 0;

    for message in messages {
        // Count role overhead (approximately 1-2 tokens)
        total_chars += 8; // ~2 tokens for role formatting

        // Count content
        for block in &message.content {
            match block {
                crate::types::ContentBlock::Text(text) => {
                    total_chars += text.text.len();
                }
                crate::types::ContentBlock::ToolUse(tool) => {
                    // Tool calls add significant overhead
                    total_chars += tool.name.len();
                    total_chars += tool.id.len();
                    total_chars += tool.input.to_string().len();
                }
                crate::types::ContentBlock::ToolResult(result) => {
                    // Tool results add overhead
                    total_chars += result.tool_use_id.len();
                    total_chars += result.content.to_string().len();
                }
            }
        }
    }

    // Add conversation-level overhead (~2-4 tokens)
    total_chars += 16;

    // Convert characters to tokens (4 chars ≈ 1 token, round up for safety)
    (total_chars + 3) / 4 // Ceiling division
}

/// Truncate message history, keeping recent messages
///
/// Always preserves the system prompt (if present) and keeps the most
/// recent N messages. This is a simple truncation - it does NOT attempt
/// to preserve tool chains or important context.
///
/// # Arguments
///
/// * `messages` - List of messages to truncate
/// * `keep` - Number of recent messages to keep (default: 10)
/// * `preserve_system` - Keep system message if present (default: true)
///
/// # Returns
///
/// Truncated message list (new Vec, original unchanged)
///
/// # Examples
///
/// ```rust
/// use open_agent::{ContentBlock, Message, MessageRole, TextBlock, truncate_messages, estimate_tokens};
///
/// let mut history = vec![Message::new(MessageRole::User, vec![ContentBlock::Text(TextBlock::new("hi"))])];
///
/// // Manual truncation when needed
/// let tokens = estimate_tokens(&history);
/// if tokens > 28000 {
///     history = truncate_messages(&history, 10, true);
/// }
/// ```
///
/// # Note
///
/// This is a SIMPLE truncation. For domain-specific needs (e.g.,
/// preserving tool call chains, keeping important context), implement
/// your own logic or use this as a starting point.
///
/// Warning: Truncating mid-conversation may remove context that the
/// model needs to properly respond. Use judiciously at natural breakpoints.
pub fn truncate_messages(messages: &[Message], keep: usize, preserve_system: bool) -> Vec<Message> {
    if messages.is_empty() {
        return Vec::new();
    }

    if messages.len() <= keep {
        return messages.to_vec();
    }

    // Check if first message is system prompt
    let has_system = preserve_system
        && !messages.is_empty()
        && messages[0].role == crate::types::MessageRole::System;

    if has_system {
        // Keep system + last N messages
        let mut result = vec![messages[0].clone()];
        if keep > 0 && messages.len() > 1 {
            let start = messages.len().saturating_sub(keep);
            result.extend_from_slice(&messages[start..]);
        }
        result
    } else {
        // Just keep last N messages
        if keep > 0 {
            let start = messages.len().saturating_sub(keep);
            messages[start..].to_vec()
        } else {
            Vec::new()
        }
    }
}

/// Check if history is approaching a token limit
///
/// Convenience function that combines estimation with a threshold check.
///
/// # Arguments
///
/// * `messages` - Messages to check
/// * `limit` - Token limit (e.g., 32000 for a 32k context window)
/// * `margin` - Safety margin as a percentage (default: 0.9 = 90%)
///
/// # Returns
///
/// `true` if estimated tokens exceed limit * margin
///
/// # Examples
///
/// ```rust
/// use open_agent::{is_approaching_limit, Message};
///
/// # fn example(messages: Vec<Message>) {
/// if is_approaching_limit(&messages, 32000, 0.9) {
///     println!("Time to truncate!");
/// }
/// # }
/// ```
pub fn is_approaching_limit(messages: &[Message], limit: usize, margin: f32) -> bool {
    let estimated = estimate_tokens(messages);
    let threshold = (limit as f32 * margin) as usize;
    estimated > threshold
}

// ============================================================================
// CONTEXT MANAGER
// ============================================================================
//
// The rolling-window context manager operating on the provider-agnostic
// `content::Message`/`ContentBlock` types, generalizing the three functions
// above: `estimate_tokens`'s char/4 approximation becomes a pluggable
// `TokenEstimator` (default unchanged, plus a fixed per-image cost);
// `truncate_messages`'s keep-last-N becomes the threshold/buffer/grace
// rolling policy; `is_approaching_limit`'s margin check becomes the
// `HardLimits` triple enforced before a roll decision is made. Cache-marker
// placement (step 3) has no teacher analog; it mirrors the Prefill
// Formatter's own cache-control placement (`formatter::prefill`) so both
// modules agree on what "a marker at message i" means on the wire.
//
// `process_context` intentionally does not invoke the Engine itself — it
// hands back trimmed messages plus marker placement for the caller to pass
// into `engine::complete`/`stream_with_xml_tools`, keeping this module free
// of any adapter/network dependency, matching the teacher's own
// `context.rs` (a pure data-shaping module with no I/O).

const IMAGE_TOKEN_COST: u64 = 1500;
const DEFAULT_CACHE_MIN_TOKENS: u64 = 1024;
const MAX_CACHE_POINTS: u8 = 4;

/// Pluggable token estimator. The default mirrors [`estimate_tokens`]'s
/// char/4 approximation, with a fixed per-image surcharge.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, messages: &[crate::content::Message]) -> u64;
}

/// Default `ceil(chars / 4)` estimator, images at a fixed ~1500 tokens each.
pub struct DefaultEstimator;

impl TokenEstimator for DefaultEstimator {
    fn estimate(&self, messages: &[crate::content::Message]) -> u64 {
        let mut chars = 0u64;
        let mut image_count = 0u64;
        for message in messages {
            chars += 8; // role overhead, matching `estimate_tokens`
            for block in &message.content {
                match block {
                    crate::content::ContentBlock::Text(t) => chars += t.text.len() as u64,
                    crate::content::ContentBlock::Image(_) => image_count += 1,
                    crate::content::ContentBlock::Document(_)
                    | crate::content::ContentBlock::Audio(_)
                    | crate::content::ContentBlock::Video(_) => chars += 200,
                    crate::content::ContentBlock::ToolUse(tu) => {
                        chars += tu.name.len() as u64 + tu.input.to_string().len() as u64;
                    }
                    crate::content::ContentBlock::ToolResult(tr) => {
                        chars += match &tr.content {
                            crate::content::ToolResultContent::Text(s) => s.len() as u64,
                            crate::content::ToolResultContent::Blocks(_) => 32,
                        };
                    }
                    crate::content::ContentBlock::GeneratedImage(_) => image_count += 1,
                    crate::content::ContentBlock::Thinking(t) => chars += t.thinking.len() as u64,
                    crate::content::ContentBlock::RedactedThinking(_) => chars += 32,
                }
            }
        }
        chars += 16;
        (chars + 3) / 4 + image_count * IMAGE_TOKEN_COST
    }
}

/// Unit a rolling-policy threshold/buffer is expressed in.
#[derive(Debug, Clone, Copy)]
pub enum ContextLimit {
    Messages(usize),
    Tokens(u64),
}

/// When to roll the active window and how much of it to keep.
#[derive(Debug, Clone, Copy)]
pub struct RollingPolicy {
    pub threshold: ContextLimit,
    pub buffer: ContextLimit,
    /// Defer rolling until at least this many messages have been appended
    /// since the last roll, even if `threshold` is crossed.
    pub grace: Option<u32>,
}

impl Default for RollingPolicy {
    fn default() -> Self {
        Self {
            threshold: ContextLimit::Messages(40),
            buffer: ContextLimit::Messages(20),
            grace: None,
        }
    }
}

/// Hard limits enforced before a roll decision is made.
#[derive(Debug, Clone, Copy, Default)]
pub struct HardLimits {
    pub max_characters: Option<usize>,
    pub max_tokens: Option<u64>,
    pub max_messages: Option<usize>,
}

/// Cache-marker placement policy (§4.4's `cache_breakpoint`/`cache_control`
/// on the wire; this module decides where markers go, the Formatter applies
/// them).
#[derive(Debug, Clone, Copy)]
pub struct CacheMarkerPolicy {
    /// Number of markers to place, clamped to [0, 4].
    pub points: u8,
    pub min_tokens: u64,
    pub prefer_user_messages: bool,
}

impl Default for CacheMarkerPolicy {
    fn default() -> Self {
        Self {
            points: 1,
            min_tokens: DEFAULT_CACHE_MIN_TOKENS,
            prefer_user_messages: false,
        }
    }
}

pub struct ContextManagerConfig {
    pub hard_limits: HardLimits,
    pub rolling: RollingPolicy,
    pub cache: CacheMarkerPolicy,
    pub estimator: Box<dyn TokenEstimator>,
}

impl Default for ContextManagerConfig {
    fn default() -> Self {
        Self {
            hard_limits: HardLimits::default(),
            rolling: RollingPolicy::default(),
            cache: CacheMarkerPolicy::default(),
            estimator: Box::new(DefaultEstimator),
        }
    }
}

/// Carried across calls by the caller; initial state is all zeros/empty.
#[derive(Debug, Clone, Default)]
pub struct ContextState {
    pub messages_since_roll: u32,
    pub last_roll_at_ms: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct ContextInfo {
    pub did_roll: bool,
    pub messages_dropped: usize,
    pub messages_kept: usize,
    pub cache_markers: usize,
    pub cached_tokens: u64,
    pub uncached_tokens: u64,
    pub total_tokens: u64,
    pub hard_limit_hit: bool,
}

fn limit_to_message_count(limit: ContextLimit, messages: &[crate::content::Message], estimator: &dyn TokenEstimator) -> usize {
    match limit {
        ContextLimit::Messages(n) => n.min(messages.len()),
        ContextLimit::Tokens(budget) => {
            // Walk from the tail, keeping messages until the budget is spent.
            let mut kept = 0usize;
            let mut spent = 0u64;
            for message in messages.iter().rev() {
                let cost = estimator.estimate(std::slice::from_ref(message));
                if kept > 0 && spent + cost > budget {
                    break;
                }
                spent += cost;
                kept += 1;
            }
            kept
        }
    }
}

fn is_user_message(message: &crate::content::Message, assistant: &crate::content::ParticipantId) -> bool {
    message.participant != *assistant
}

/// Run the rolling-window + cache-marker pipeline over `messages` (§4.10).
/// Returns the trimmed/kept messages, the message indices (into the
/// returned slice) that should carry a cache marker, the updated state, and
/// an info record describing what happened.
pub fn process_context(
    messages: &[crate::content::Message],
    assistant_participant: &crate::content::ParticipantId,
    config: &ContextManagerConfig,
    state: &ContextState,
) -> (Vec<crate::content::Message>, Vec<usize>, ContextState, ContextInfo) {
    let total_chars: usize = messages
        .iter()
        .flat_map(|m| &m.content)
        .filter_map(|b| match b {
            crate::content::ContentBlock::Text(t) => Some(t.text.len()),
            _ => None,
        })
        .sum();
    let total_tokens = config.estimator.estimate(messages);

    let hard_limit_hit = config
        .hard_limits
        .max_characters
        .is_some_and(|max| total_chars > max)
        || config.hard_limits.max_tokens.is_some_and(|max| total_tokens > max)
        || config.hard_limits.max_messages.is_some_and(|max| messages.len() > max);

    let over_threshold = match config.rolling.threshold {
        ContextLimit::Messages(n) => messages.len() > n,
        ContextLimit::Tokens(budget) => total_tokens > budget,
    };

    let within_grace = config
        .rolling
        .grace
        .is_some_and(|grace| state.messages_since_roll < grace);

    let should_roll = (hard_limit_hit || over_threshold) && !(within_grace && !hard_limit_hit);

    let (kept, new_state) = if should_roll {
        let keep_count = limit_to_message_count(config.rolling.buffer, messages, config.estimator.as_ref())
            .max(1)
            .min(messages.len());
        let start = messages.len() - keep_count;
        (
            messages[start..].to_vec(),
            ContextState {
                messages_since_roll: 0,
                last_roll_at_ms: state.last_roll_at_ms,
            },
        )
    } else {
        (
            messages.to_vec(),
            ContextState {
                messages_since_roll: state.messages_since_roll + 1,
                last_roll_at_ms: state.last_roll_at_ms,
            },
        )
    };

    let points = config.cache.points.min(MAX_CACHE_POINTS) as usize;
    let mut markers = Vec::new();
    if points > 0 && !kept.is_empty() {
        let fractions: [f64; 4] = [0.0, 0.5, 0.75, 0.9];
        for &frac in fractions.iter().take(points) {
            let mut idx = ((kept.len() as f64 - 1.0) * frac).round() as usize;
            idx = idx.min(kept.len() - 1);

            if config.cache.prefer_user_messages {
                while idx > 0 && !is_user_message(&kept[idx], assistant_participant) {
                    idx -= 1;
                }
            }

            let prefix_tokens = config.estimator.estimate(&kept[..=idx]);
            if prefix_tokens < config.cache.min_tokens {
                continue;
            }
            if !markers.contains(&idx) {
                markers.push(idx);
            }
        }
        markers.sort_unstable();
    }

    let cached_tokens: u64 = markers
        .iter()
        .map(|&idx| config.estimator.estimate(&kept[..=idx]))
        .sum();
    let kept_total_tokens = config.estimator.estimate(&kept);
    let uncached_tokens = kept_total_tokens.saturating_sub(cached_tokens);

    let info = ContextInfo {
        did_roll: should_roll,
        messages_dropped: messages.len() - kept.len(),
        messages_kept: kept.len(),
        cache_markers: markers.len(),
        cached_tokens,
        uncached_tokens,
        total_tokens: kept_total_tokens,
        hard_limit_hit,
    };

    (kept, markers, new_state, info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContentBlock, Message, MessageRole, TextBlock};

    #[test]
    fn test_estimate_tokens_empty() {
        let messages: Vec<Message> = vec![];
        assert_eq!(estimate_tokens(&messages), 0);
    }

    #[test]
    fn test_estimate_tokens_simple() {
        let messages = vec![Message::new(
            MessageRole::User,
            vec![ContentBlock::Text(TextBlock::new("Hello world"))],
        )];

        let tokens = estimate_tokens(&messages);
        // "Hello world" = 11 chars + overhead ≈ 5-8 tokens
        assert!(tokens >= 3 && tokens <= 10);
    }

    #[test]
    fn test_truncate_messages_empty() {
        let messages: Vec<Message> = vec![];
        let truncated = truncate_messages(&messages, 10, true);
        assert_eq!(truncated.len(), 0);
    }

    #[test]
    fn test_truncate_messages_preserve_system() {
        let messages = vec![
            Message::system("System prompt"),
            Message::user("Message 1"),
            Message::user("Message 2"),
            Message::user("Message 3"),
            Message::user("Message 4"),
        ];

        let truncated = truncate_messages(&messages, 2, true);

        // Should have system + last 2 = 3 messages
        assert_eq!(truncated.len(), 3);
        assert_eq!(truncated[0].role, MessageRole::System);
    }

    #[test]
    fn test_truncate_messages_no_preserve() {
        let messages = vec![
            Message::system("System prompt"),
            Message::user("Message 1"),
            Message::user("Message 2"),
            Message::user("Message 3"),
        ];

        let truncated = truncate_messages(&messages, 2, false);

        // Should have only last 2 messages
        assert_eq!(truncated.len(), 2);
        assert_eq!(truncated[0].role, MessageRole::User);
    }

    #[test]
    fn test_truncate_messages_keep_all() {
        let messages = vec![Message::user("Message 1"), Message::user("Message 2")];

        let truncated = truncate_messages(&messages, 10, true);
        assert_eq!(truncated.len(), 2);
    }

    #[test]
    fn test_is_approaching_limit() {
        let messages = vec![Message::user("x".repeat(1000))];

        // ~250 tokens, should not exceed 90% of 1000
        assert!(!is_approaching_limit(&messages, 1000, 0.9));

        // Should exceed 90% of 200
        assert!(is_approaching_limit(&messages, 200, 0.9));
    }

    fn normalized(n: usize) -> Vec<crate::content::Message> {
        (0..n)
            .map(|i| crate::content::Message::text(crate::content::ParticipantId::new("User"), format!("message {i}")))
            .collect()
    }

    #[test]
    fn test_process_context_no_roll_below_threshold() {
        let messages = normalized(5);
        let config = ContextManagerConfig {
            rolling: RollingPolicy { threshold: ContextLimit::Messages(40), buffer: ContextLimit::Messages(20), grace: None },
            ..ContextManagerConfig::default()
        };
        let assistant = crate::content::ParticipantId::new("Claude");
        let (kept, _markers, state, info) = process_context(&messages, &assistant, &config, &ContextState::default());
        assert!(!info.did_roll);
        assert_eq!(kept.len(), 5);
        assert_eq!(state.messages_since_roll, 1);
    }

    #[test]
    fn test_process_context_rolls_over_message_threshold() {
        let messages = normalized(50);
        let config = ContextManagerConfig {
            rolling: RollingPolicy { threshold: ContextLimit::Messages(40), buffer: ContextLimit::Messages(10), grace: None },
            ..ContextManagerConfig::default()
        };
        let assistant = crate::content::ParticipantId::new("Claude");
        let (kept, _markers, state, info) = process_context(&messages, &assistant, &config, &ContextState::default());
        assert!(info.did_roll);
        assert_eq!(kept.len(), 10);
        assert_eq!(info.messages_dropped, 40);
        assert_eq!(state.messages_since_roll, 0);
    }

    #[test]
    fn test_process_context_grace_defers_roll() {
        let messages = normalized(50);
        let config = ContextManagerConfig {
            rolling: RollingPolicy { threshold: ContextLimit::Messages(40), buffer: ContextLimit::Messages(10), grace: Some(5) },
            ..ContextManagerConfig::default()
        };
        let assistant = crate::content::ParticipantId::new("Claude");
        let state = ContextState { messages_since_roll: 2, last_roll_at_ms: None };
        let (kept, _markers, _state, info) = process_context(&messages, &assistant, &config, &state);
        assert!(!info.did_roll);
        assert_eq!(kept.len(), 50);
    }

    #[test]
    fn test_process_context_cache_markers_respect_min_tokens() {
        let messages = normalized(20);
        let config = ContextManagerConfig {
            cache: CacheMarkerPolicy { points: 2, min_tokens: u64::MAX, prefer_user_messages: false },
            ..ContextManagerConfig::default()
        };
        let assistant = crate::content::ParticipantId::new("Claude");
        let (_kept, markers, _state, info) = process_context(&messages, &assistant, &config, &ContextState::default());
        assert!(markers.is_empty());
        assert_eq!(info.cache_markers, 0);
    }

    #[test]
    fn test_default_estimator_counts_image_surcharge() {
        let estimator = DefaultEstimator;
        let text_only = vec![crate::content::Message::text(crate::content::ParticipantId::new("User"), "hi")];
        let with_image = vec![crate::content::Message::new(
            crate::content::ParticipantId::new("User"),
            vec![
                crate::content::ContentBlock::text("hi"),
                crate::content::ContentBlock::Image(crate::content::MediaContent {
                    source: crate::content::MediaRef::Url { url: "https://example.com/x.png".to_string() },
                }),
            ],
        )];
        assert!(estimator.estimate(&with_image) > estimator.estimate(&text_only) + 1000);
    }
}
