//! The Prefill Formatter: serializes a conversation plus tools into a single
//! provider-ready assistant-voice prefill, with cache-control placement,
//! image relocation, and auto-generated stop sequences.
//!
//! This is the largest single component in the system (22% of budget). It
//! has no direct teacher analog at this level of richness; it generalizes
//! the participant/role walk in `client.rs`'s message building, using the
//! same accumulate-then-flush shape [`crate::utils::ToolCallAggregator`]
//! uses for its own buffers.

use crate::content::{CacheTtl, ContentBlock, Message, ParticipantId, ToolDefinition};
use std::fmt::Write as _;

/// How tool definitions are injected into the prompt for XML tool mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolInjectionMode {
    /// Appended into the system prompt text.
    System,
    /// Inserted as a pseudo-turn `position` messages from the end.
    Conversation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsupportedMedia {
    Error,
    Strip,
}

#[derive(Debug, Clone)]
pub struct PrefillOptions {
    pub assistant_participant: ParticipantId,
    pub tool_injection_mode: ToolInjectionMode,
    pub tool_injection_position: usize,
    pub prompt_caching: bool,
    pub cache_ttl: CacheTtl,
    pub message_delimiter: String,
    pub max_participants_for_stop: usize,
    pub prefill_thinking: bool,
    pub context_prefix: Option<String>,
    pub unsupported_media: UnsupportedMedia,
}

impl Default for PrefillOptions {
    fn default() -> Self {
        Self {
            assistant_participant: ParticipantId::new("Claude"),
            tool_injection_mode: ToolInjectionMode::System,
            tool_injection_position: 10,
            prompt_caching: false,
            cache_ttl: CacheTtl::FiveMinutes,
            message_delimiter: String::new(),
            max_participants_for_stop: 4,
            prefill_thinking: false,
            context_prefix: None,
            unsupported_media: UnsupportedMedia::Strip,
        }
    }
}

/// A single prefill-mode provider turn: a role (`user` or `assistant`) and
/// an ordered list of content blocks.
#[derive(Debug, Clone)]
pub struct PrefillTurn {
    pub role: &'static str,
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Default)]
pub struct PrefillResult {
    pub turns: Vec<PrefillTurn>,
    pub system_content: Vec<ContentBlock>,
    pub stop_sequences: Vec<String>,
    pub assistant_prefill: String,
    pub cache_markers_applied: u32,
}

struct Buffer {
    text: String,
    cache_marked: bool,
    /// Byte offset into `text` right after each message's content was
    /// appended, in order. Reset whenever the buffer is flushed, so these
    /// always describe message boundaries within the *current* unflushed
    /// span — needed to turn `tool_injection_position` (a message count)
    /// into a byte offset without miscounting across a flush.
    message_ends: Vec<usize>,
}

impl Buffer {
    fn new() -> Self {
        Self {
            text: String::new(),
            cache_marked: false,
            message_ends: Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    fn end_message(&mut self) {
        self.message_ends.push(self.text.len());
    }
}

/// Build the full prefill: system content, ordered turns, stop sequences and
/// the trailing assistant prefill string, per §4.4's 9-step algorithm.
pub fn build_prefill(
    messages: &[Message],
    system: Option<&str>,
    tools: Option<&[ToolDefinition]>,
    options: &PrefillOptions,
) -> crate::Result<PrefillResult> {
    let mut result = PrefillResult::default();

    // Step 1: system content, with tool protocol appended when injection
    // mode is System.
    let mut system_text = system.unwrap_or_default().to_string();
    if let Some(tools) = tools {
        if options.tool_injection_mode == ToolInjectionMode::System && !tools.is_empty() {
            if !system_text.is_empty() {
                system_text.push_str("\n\n");
            }
            system_text.push_str(&super::describe_tools_as_xml(tools));
        }
    }
    if !system_text.is_empty() {
        let mut block = ContentBlock::text(system_text);
        if options.prompt_caching {
            block = block.with_cache_control(options.cache_ttl);
            result.cache_markers_applied += 1;
        }
        result.system_content.push(block);
    }

    // Step 2: optional context-prefix seed turn.
    if let Some(prefix) = &options.context_prefix {
        result.turns.push(PrefillTurn {
            role: "user",
            content: vec![ContentBlock::text("[conversation begins]")],
        });
        let mut block = ContentBlock::text(prefix.clone());
        if options.prompt_caching {
            block = block.with_cache_control(options.cache_ttl);
            result.cache_markers_applied += 1;
        }
        result.turns.push(PrefillTurn {
            role: "assistant",
            content: vec![block],
        });
    }

    // Step 3: walk messages, maintaining an assistant-voice text buffer.
    let mut buf = Buffer::new();
    let mut last_was_empty = false;

    for (idx, message) in messages.iter().enumerate() {
        last_was_empty = message.content.is_empty();
        if last_was_empty && idx != messages.len() - 1 {
            continue;
        }

        let has_image = message
            .content
            .iter()
            .any(|c| matches!(c, ContentBlock::Image(_)));

        let marked = message.cache_breakpoint.unwrap_or(false);
        if marked && !buf.is_empty() {
            flush_buffer(&mut buf, &mut result, options);
        }

        if has_image {
            if !buf.is_empty() {
                flush_buffer(&mut buf, &mut result, options);
            }
            let mut content = vec![ContentBlock::text(format!(
                "{}: {}",
                message.participant,
                message.text_content()
            ))];
            for block in &message.content {
                match block {
                    ContentBlock::Image(_) => content.push(block.clone()),
                    ContentBlock::Document(_) | ContentBlock::Audio(_) | ContentBlock::Video(_) => {
                        match options.unsupported_media {
                            UnsupportedMedia::Error => {
                                return Err(crate::Error::invalid_input(
                                    "message contains unsupported media for this formatter",
                                ));
                            }
                            UnsupportedMedia::Strip => {
                                log::warn!(target: "open_agent::formatter", "stripping unsupported media block");
                            }
                        }
                    }
                    _ => {}
                }
            }
            result.turns.push(PrefillTurn {
                role: "user",
                content,
            });
            continue;
        }

        for block in &message.content {
            match block {
                ContentBlock::Text(t) => {
                    let _ = write!(
                        buf.text,
                        "{}: {}{}",
                        message.participant, t.text, options.message_delimiter
                    );
                }
                ContentBlock::ToolUse(tu) => {
                    let _ = write!(
                        buf.text,
                        "{}>[{}]: {}{}",
                        message.participant, tu.name, tu.input, options.message_delimiter
                    );
                }
                ContentBlock::ToolResult(tr) => {
                    let text = match &tr.content {
                        crate::content::ToolResultContent::Text(s) => s.clone(),
                        crate::content::ToolResultContent::Blocks(_) => String::from("[blocks]"),
                    };
                    let _ = write!(
                        buf.text,
                        "{}<[tool_result]: {}{}",
                        message.participant, text, options.message_delimiter
                    );
                }
                _ => {}
            }
        }
        buf.end_message();
        if marked {
            // Flush immediately so the cache-marked message becomes its own
            // cached turn rather than absorbing whatever unmarked messages
            // follow it into the same cached block.
            buf.cache_marked = true;
            flush_buffer(&mut buf, &mut result, options);
        }
    }

    // Step 4: tool-injection in Conversation mode. `tool_injection_position`
    // counts messages from the end of the unflushed buffer, not bytes: the
    // tool turn is inserted just before the last `position` messages.
    if let Some(tools) = tools {
        if options.tool_injection_mode == ToolInjectionMode::Conversation && !tools.is_empty() {
            let position = options.tool_injection_position;
            let total = buf.message_ends.len();
            let split_at = if position >= total {
                0
            } else {
                buf.message_ends[total - position - 1]
            };
            let (prefix, suffix) = buf.text.split_at(split_at);
            let (prefix, suffix) = (prefix.to_string(), suffix.to_string());

            if !prefix.is_empty() {
                result.turns.push(PrefillTurn {
                    role: "assistant",
                    content: vec![ContentBlock::text(prefix)],
                });
            }
            result.turns.push(PrefillTurn {
                role: "user",
                content: vec![ContentBlock::text(super::describe_tools_as_xml(tools))],
            });
            buf.text = suffix;
        }
    }

    // Step 5: flush remainder, with optional trailing prompt for the model.
    if last_was_empty {
        if options.prefill_thinking {
            let _ = write!(buf.text, "{}: <thinking>", options.assistant_participant);
        } else {
            let _ = write!(buf.text, "{}:", options.assistant_participant);
        }
    }
    result.assistant_prefill = buf.text.clone();
    if !buf.is_empty() {
        flush_buffer(&mut buf, &mut result, options);
    }

    // Step 6: ensure first turn is user-role.
    if result.turns.first().map(|t| t.role) != Some("user") {
        let seed = if !system.unwrap_or_default().is_empty() {
            "[Start]"
        } else {
            "<cmd>cat untitled.txt</cmd>"
        };
        result.turns.insert(
            0,
            PrefillTurn {
                role: "user",
                content: vec![ContentBlock::text(seed)],
            },
        );
    }

    // Step 7: auto stop sequences.
    let mut seen = std::collections::HashSet::new();
    for message in messages.iter().rev() {
        if message.participant == options.assistant_participant {
            continue;
        }
        if seen.len() >= options.max_participants_for_stop {
            break;
        }
        if seen.insert(message.participant.0.clone()) {
            result
                .stop_sequences
                .push(format!("\n{}:", message.participant));
        }
    }
    result.stop_sequences.push("</function_calls>".to_string());

    Ok(result)
}

fn flush_buffer(buf: &mut Buffer, result: &mut PrefillResult, options: &PrefillOptions) {
    if buf.is_empty() {
        return;
    }
    let mut block = ContentBlock::text(std::mem::take(&mut buf.text));
    if options.prompt_caching && buf.cache_marked {
        block = block.with_cache_control(options.cache_ttl);
        result.cache_markers_applied += 1;
    }
    result.turns.push(PrefillTurn {
        role: "assistant",
        content: vec![block],
    });
    buf.cache_marked = false;
    buf.message_ends.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::Message;

    #[test]
    fn test_basic_prefill_has_user_first_turn() {
        let messages = vec![Message::text("Alice", "Count from 1 to 5.")];
        let options = PrefillOptions::default();
        let result = build_prefill(&messages, None, None, &options).unwrap();
        assert_eq!(result.turns.first().unwrap().role, "user");
    }

    #[test]
    fn test_cache_marker_invariance() {
        let messages = vec![
            Message::text("Alice", "first").with_cache_breakpoint(true),
            Message::text("Alice", "second"),
        ];
        let options = PrefillOptions {
            prompt_caching: true,
            ..Default::default()
        };
        let result = build_prefill(&messages, Some("S"), None, &options).unwrap();
        // one marker on system, one on the flushed buffer up to the marked message
        assert_eq!(result.cache_markers_applied, 2);
    }

    #[test]
    fn test_cache_marked_message_does_not_absorb_trailing_unmarked_messages() {
        // A cache-marked message followed by an unmarked one must become two
        // separate turns: the marked turn cached, the trailing turn not,
        // rather than being merged into a single cached turn.
        let messages = vec![
            Message::text("Alice", "first").with_cache_breakpoint(true),
            Message::text("Alice", "second"),
        ];
        let options = PrefillOptions {
            prompt_caching: true,
            ..Default::default()
        };
        let result = build_prefill(&messages, None, None, &options).unwrap();

        let assistant_turns: Vec<&PrefillTurn> =
            result.turns.iter().filter(|t| t.role == "assistant").collect();
        assert_eq!(assistant_turns.len(), 2, "expected the marked and unmarked message to split into separate turns");

        let first_text = match &assistant_turns[0].content[0] {
            ContentBlock::Text(t) => &t.text,
            other => panic!("expected text block, got {other:?}"),
        };
        assert!(first_text.contains("first"));
        assert!(!first_text.contains("second"));
        assert!(
            matches!(&assistant_turns[0].content[0], ContentBlock::Text(t) if t.cache_control.is_some()),
            "first turn should carry the cache marker"
        );

        let second_text = match &assistant_turns[1].content[0] {
            ContentBlock::Text(t) => &t.text,
            other => panic!("expected text block, got {other:?}"),
        };
        assert!(second_text.contains("second"));
        assert!(
            matches!(&assistant_turns[1].content[0], ContentBlock::Text(t) if t.cache_control.is_none()),
            "trailing turn should NOT carry the cache marker"
        );
    }

    #[test]
    fn test_stop_sequences_include_function_calls_close() {
        let messages = vec![Message::text("Alice", "hi")];
        let options = PrefillOptions::default();
        let result = build_prefill(&messages, None, None, &options).unwrap();
        assert!(result.stop_sequences.contains(&"</function_calls>".to_string()));
        assert!(result.stop_sequences.contains(&"\nAlice:".to_string()));
    }

    #[test]
    fn test_conversation_mode_injects_before_last_n_messages() {
        // tool_injection_position is a message count, not a byte offset: with
        // position == 1 the tool turn must land just before the final
        // message, regardless of how long the preceding messages' text is.
        let messages = vec![
            Message::text("Alice", "first"),
            Message::text("Alice", "second message, much longer than the others"),
            Message::text("Alice", "third"),
        ];
        let tools = vec![ToolDefinition {
            name: "lookup".to_string(),
            description: "looks things up".to_string(),
            input_schema: serde_json::json!({"type": "object"}),
        }];
        let options = PrefillOptions {
            tool_injection_mode: ToolInjectionMode::Conversation,
            tool_injection_position: 1,
            ..Default::default()
        };
        let result = build_prefill(&messages, None, Some(&tools), &options).unwrap();

        let tool_turn_idx = result
            .turns
            .iter()
            .position(|t| {
                t.role == "user"
                    && matches!(&t.content[0], ContentBlock::Text(b) if b.text.contains("lookup"))
            })
            .expect("expected a user turn carrying the tool description");

        let text_before = |turns: &[PrefillTurn]| -> String {
            turns
                .iter()
                .flat_map(|t| t.content.iter())
                .filter_map(|b| match b {
                    ContentBlock::Text(t) => Some(t.text.clone()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("")
        };

        let before = text_before(&result.turns[..tool_turn_idx]);
        assert!(before.contains("first"));
        assert!(before.contains("second message"));
        assert!(
            !before.contains("third"),
            "the last message should be injected after the tool turn, not before it"
        );

        let after = text_before(&result.turns[tool_turn_idx + 1..]);
        assert!(after.contains("third"));
    }
}
