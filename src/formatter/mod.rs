//! Formatters turn a [`crate::content::NormalizedRequest`] into the message
//! sequence a specific wire protocol expects. Three formatters share one
//! contract: [`prefill`] (the XML tool-protocol prefill transform, largest
//! single component in the budget), [`native`] (role-based pass-through for
//! backends with native tool/function-calling), and [`completions`] (single
//! prompt-string serializer for base/completions-style models).
//!
//! Grounded on the teacher's `Client::send`/`query` message-building code in
//! `client.rs`, which already walks a message list and maps participants to
//! OpenAI roles; these modules generalize that into the richer buffer/flush
//! state machines each wire format needs.

pub mod completions;
pub mod native;
pub mod prefill;

use crate::content::{ContentBlock, ToolDefinition};
use crate::parser::{BlockKind, IncrementalTagParser, ParserEvent};
use crate::tool_call_parser::{extract_invokes, ToolCallIdGenerator};
use serde_json::{Value, json};

/// A provider-native tool-array entry, shared by every adapter that embeds
/// a `{type:"function", function:{...}}`-shaped tool list (OpenAI-compatible
/// and Bedrock's Converse-style tool config both use this shape).
pub fn tool_to_native_json(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.input_schema,
        }
    })
}

/// Anthropic's native tool shape (no `type`/`function` wrapper).
pub fn tool_to_anthropic_json(tool: &ToolDefinition) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.input_schema,
    })
}

/// Build the textual tool-protocol description embedded in the prompt for
/// XML tool mode: one `<invoke>` example per tool so the model learns the
/// exact call shape it must emit.
pub fn describe_tools_as_xml(tools: &[ToolDefinition]) -> String {
    let mut out = String::from(
        "You have access to the following tools. To call one, emit exactly:\n\
         <function_calls>\n<invoke name=\"tool_name\">\n<parameter name=\"param_name\">value</parameter>\n</invoke>\n</function_calls>\n\n",
    );
    for tool in tools {
        out.push_str(&format!("- {}: {}\n", tool.name, tool.description));
    }
    out
}

/// Turn the Parser's view of a fully-streamed turn into the content blocks
/// a caller sees, per §4.8 step 7: text segments become `Text` blocks, a
/// completed `tool_call` block is re-parsed into its constituent `ToolUse`
/// blocks (a turn may contain multiple `<invoke>`s), and `thinking` blocks
/// become `Thinking` blocks. `tool_result` segments never appear in an
/// assistant turn's own output and are ignored if present.
pub fn parse_content_blocks(raw_assistant_text: &str) -> Vec<ContentBlock> {
    let mut parser = IncrementalTagParser::new();
    let mut events = parser.push(raw_assistant_text);
    events.extend(parser.flush());

    let ids = ToolCallIdGenerator::new();
    let mut blocks = Vec::new();
    let mut pending_text = String::new();

    let flush_text = |pending: &mut String, blocks: &mut Vec<ContentBlock>| {
        if !pending.is_empty() {
            blocks.push(ContentBlock::text(std::mem::take(pending)));
        }
    };

    for event in events {
        match event {
            ParserEvent::Content(content_event) if content_event.kind == BlockKind::Text => {
                pending_text.push_str(&content_event.text);
            }
            ParserEvent::BlockComplete { kind: BlockKind::ToolCall, text, .. } => {
                flush_text(&mut pending_text, &mut blocks);
                // `text` is the Parser's `current_block_text`: the wrapper
                // `<function_calls>`/`</function_calls>` bytes were already
                // consumed by `match_structural_tag` and never land here,
                // only the `<invoke>...</invoke>` entries do.
                for call in extract_invokes(&text, &ids) {
                    blocks.push(ContentBlock::tool_use(call.id, call.name, call.input));
                }
            }
            ParserEvent::BlockComplete { kind: BlockKind::Thinking, text, .. } => {
                flush_text(&mut pending_text, &mut blocks);
                blocks.push(ContentBlock::Thinking(crate::content::ThinkingContent {
                    thinking: text,
                    signature: None,
                }));
            }
            _ => {}
        }
    }
    flush_text(&mut pending_text, &mut blocks);
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_content_blocks_produces_tool_use_from_function_calls() {
        let text = r#"Sure, let me check.<function_calls><invoke name="add_numbers"><parameter name="a">10</parameter><parameter name="b">20</parameter></invoke></function_calls>"#;
        let blocks = parse_content_blocks(text);
        assert_eq!(blocks.len(), 2);
        assert!(matches!(&blocks[0], ContentBlock::Text(t) if t.text == "Sure, let me check."));
        match &blocks[1] {
            ContentBlock::ToolUse(tool_use) => {
                assert_eq!(tool_use.name, "add_numbers");
                assert_eq!(tool_use.input["a"], 10);
                assert_eq!(tool_use.input["b"], 20);
            }
            other => panic!("expected ToolUse block, got {other:?}"),
        }
    }

    #[test]
    fn parse_content_blocks_handles_multiple_invokes_in_one_block() {
        let text = r#"<function_calls><invoke name="a"><parameter name="x">1</parameter></invoke><invoke name="b"><parameter name="y">2</parameter></invoke></function_calls>"#;
        let blocks = parse_content_blocks(text);
        assert_eq!(blocks.len(), 2);
        assert!(matches!(&blocks[0], ContentBlock::ToolUse(t) if t.name == "a"));
        assert!(matches!(&blocks[1], ContentBlock::ToolUse(t) if t.name == "b"));
    }
}
