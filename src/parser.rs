//! Incremental tag-stream parser.
//!
//! Consumes an append-only byte/text stream and tracks nesting of three
//! structural tags — `function_calls`, `function_results`, `thinking` (each
//! optionally prefixed `antml:`) — classifying every character as `text`
//! (visible) or `thinking`/`tool_call`/`tool_result` (hidden). No teacher
//! module parses XML-like tags; this is built fresh in the stateful-
//! accumulator shape of [`crate::utils::ToolCallAggregator`] (owned buffers,
//! one incremental `push` method, a `flush` at end of stream) since that is
//! the nearest idiom the teacher offers for "stateful accumulation over
//! append-only chunks".

use log::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Text,
    Thinking,
    ToolCall,
    ToolResult,
}

impl BlockKind {
    pub fn visible(self) -> bool {
        matches!(self, BlockKind::Text)
    }
}

#[derive(Debug, Clone)]
pub struct ContentEvent {
    pub text: String,
    pub kind: BlockKind,
    pub block_index: usize,
}

#[derive(Debug, Clone)]
pub enum ParserEvent {
    Content(ContentEvent),
    BlockStart { index: usize, kind: BlockKind },
    BlockComplete { index: usize, kind: BlockKind, text: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagName {
    FunctionCalls,
    FunctionResults,
    Thinking,
}

impl TagName {
    fn kind(self) -> BlockKind {
        match self {
            TagName::FunctionCalls => BlockKind::ToolCall,
            TagName::FunctionResults => BlockKind::ToolResult,
            TagName::Thinking => BlockKind::Thinking,
        }
    }

    fn bare_name(self) -> &'static str {
        match self {
            TagName::FunctionCalls => "function_calls",
            TagName::FunctionResults => "function_results",
            TagName::Thinking => "thinking",
        }
    }
}

const TOP_LEVEL_TAGS: [TagName; 3] = [
    TagName::FunctionCalls,
    TagName::FunctionResults,
    TagName::Thinking,
];

/// Per-stream parser state. Depths track nesting of each of the three
/// top-level tags independently; a close below zero is clamped and logged
/// as a tolerated anomaly (§9's open-question decision).
pub struct IncrementalTagParser {
    accumulated: String,
    scanned_to: usize,
    block_index: usize,
    current_kind: BlockKind,
    current_block_text: String,
    depth_function_calls: u32,
    depth_function_results: u32,
    depth_thinking: u32,
}

impl Default for IncrementalTagParser {
    fn default() -> Self {
        Self::new()
    }
}

impl IncrementalTagParser {
    pub fn new() -> Self {
        Self {
            accumulated: String::new(),
            scanned_to: 0,
            block_index: 0,
            current_kind: BlockKind::Text,
            current_block_text: String::new(),
            depth_function_calls: 0,
            depth_function_results: 0,
            depth_thinking: 0,
        }
    }

    pub fn accumulated_text(&self) -> &str {
        &self.accumulated
    }

    pub fn is_inside_block(&self) -> bool {
        self.current_kind != BlockKind::Text
    }

    pub fn is_inside_function_calls(&self) -> bool {
        self.depth_function_calls > 0
    }

    pub fn is_inside_function_results(&self) -> bool {
        self.depth_function_results > 0
    }

    pub fn is_inside_thinking(&self) -> bool {
        self.depth_thinking > 0
    }

    fn depth_mut(&mut self, tag: TagName) -> &mut u32 {
        match tag {
            TagName::FunctionCalls => &mut self.depth_function_calls,
            TagName::FunctionResults => &mut self.depth_function_results,
            TagName::Thinking => &mut self.depth_thinking,
        }
    }

    /// Feed a new chunk of the stream. Returns events produced by this push;
    /// a trailing partial tag is held back (not emitted) until it either
    /// completes or is proven literal by more bytes arriving. Scanning
    /// always resumes exactly where the last push left off (`scanned_to`),
    /// never re-examining already-emitted text, so no chunk split can
    /// produce duplicate content events.
    pub fn push(&mut self, chunk: &str) -> Vec<ParserEvent> {
        self.accumulated.push_str(chunk);
        let mut events = Vec::new();

        let bytes = self.accumulated.as_bytes();
        let mut cursor = self.scanned_to;
        let mut text_run_start = self.scanned_to;

        while cursor < bytes.len() {
            if bytes[cursor] != b'<' {
                cursor += 1;
                continue;
            }

            // Look for the closing '>' of this candidate tag.
            let Some(rel_close) = self.accumulated[cursor..].find('>') else {
                // Tag not yet complete in the buffer: stop scanning, leave
                // everything from text_run_start up to cursor as emitted
                // text, and hold the rest for the next push.
                break;
            };
            let close = cursor + rel_close;
            let tag_body = &self.accumulated[cursor + 1..close];

            if let Some((tag, is_close)) = match_structural_tag(tag_body) {
                // Flush accumulated text before this tag as a content event
                // under the CURRENT block's kind.
                if cursor > text_run_start {
                    let seg = self.accumulated[text_run_start..cursor].to_string();
                    self.emit_text_segment(seg, &mut events);
                }

                if is_close {
                    let depth = self.depth_mut(tag);
                    if *depth == 0 {
                        warn!(
                            target: "open_agent::parser",
                            "unbalanced close tag for {}, clamping depth to zero",
                            tag.bare_name()
                        );
                    } else {
                        *depth -= 1;
                    }
                    if *self.depth_mut(tag) == 0 && self.current_kind == tag.kind() {
                        let finished_text = std::mem::take(&mut self.current_block_text);
                        events.push(ParserEvent::BlockComplete {
                            index: self.block_index,
                            kind: self.current_kind,
                            text: finished_text,
                        });
                        self.block_index += 1;
                        self.current_kind = BlockKind::Text;
                    }
                } else {
                    let depth = self.depth_mut(tag);
                    if *depth > 0 {
                        warn!(
                            target: "open_agent::parser",
                            "nested {} at depth {}, incrementing",
                            tag.bare_name(),
                            *depth + 1
                        );
                    }
                    *depth += 1;
                    if self.current_kind == BlockKind::Text {
                        self.current_kind = tag.kind();
                        events.push(ParserEvent::BlockStart {
                            index: self.block_index,
                            kind: self.current_kind,
                        });
                    }
                }

                cursor = close + 1;
                text_run_start = cursor;
            } else {
                // Not a recognized structural tag (sub-tag like `invoke`, or
                // unrelated HTML-looking text) — passes through as content.
                cursor = close + 1;
            }
        }

        if cursor > text_run_start {
            let seg = self.accumulated[text_run_start..cursor].to_string();
            self.emit_text_segment(seg, &mut events);
            self.scanned_to = cursor;
        } else {
            self.scanned_to = text_run_start;
        }

        events
    }

    fn emit_text_segment(&mut self, seg: String, events: &mut Vec<ParserEvent>) {
        if seg.is_empty() {
            return;
        }
        if self.current_kind != BlockKind::Text {
            self.current_block_text.push_str(&seg);
        }
        events.push(ParserEvent::Content(ContentEvent {
            text: seg,
            kind: self.current_kind,
            block_index: self.block_index,
        }));
    }

    /// End of stream: flush any active block as complete even if unclosed.
    pub fn flush(&mut self) -> Vec<ParserEvent> {
        let mut events = Vec::new();
        if self.scanned_to < self.accumulated.len() {
            let seg = self.accumulated[self.scanned_to..].to_string();
            self.emit_text_segment(seg, &mut events);
            self.scanned_to = self.accumulated.len();
        }
        if self.current_kind != BlockKind::Text {
            let finished_text = std::mem::take(&mut self.current_block_text);
            events.push(ParserEvent::BlockComplete {
                index: self.block_index,
                kind: self.current_kind,
                text: finished_text,
            });
            self.block_index += 1;
            self.current_kind = BlockKind::Text;
        }
        events
    }
}

/// Match `<tag>`/`</tag>` bodies (with optional `antml:` prefix) against the
/// three recognized top-level tags. Sub-tags (`invoke name="..."` etc.) and
/// unrelated tags return `None` and pass through as content.
fn match_structural_tag(tag_body: &str) -> Option<(TagName, bool)> {
    let (is_close, rest) = match tag_body.strip_prefix('/') {
        Some(r) => (true, r),
        None => (false, tag_body),
    };
    let rest = rest.strip_prefix("antml:").unwrap_or(rest);
    let name = rest.trim();

    for tag in TOP_LEVEL_TAGS {
        if name == tag.bare_name() {
            return Some((tag, is_close));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(chunks: &[&str]) -> (IncrementalTagParser, Vec<ParserEvent>) {
        let mut parser = IncrementalTagParser::new();
        let mut all = Vec::new();
        for c in chunks {
            all.extend(parser.push(c));
        }
        all.extend(parser.flush());
        (parser, all)
    }

    fn visible_text(events: &[ParserEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                ParserEvent::Content(c) if c.kind.visible() => Some(c.text.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_nesting_with_antml_prefix() {
        let (parser, events) = run(&[
            "<function_calls>",
            "<invoke name=\"t\"></invoke>",
            "</function_calls>",
        ]);
        assert!(!parser.is_inside_function_calls());
        let starts = events
            .iter()
            .filter(|e| matches!(e, ParserEvent::BlockStart { .. }))
            .count();
        let completes = events
            .iter()
            .filter(|e| matches!(e, ParserEvent::BlockComplete { .. }))
            .count();
        assert_eq!(starts, 1);
        assert_eq!(completes, 1);
    }

    #[test]
    fn test_partial_tag_buffering_across_chunks() {
        let (_, events) = run(&["Hello <th", "inking>secret</th", "inking> world"]);
        assert_eq!(visible_text(&events), "Hello  world");
        let hidden: String = events
            .iter()
            .filter_map(|e| match e {
                ParserEvent::Content(c) if !c.kind.visible() => Some(c.text.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(hidden, "secret");
        for e in &events {
            if let ParserEvent::Content(c) = e {
                assert!(!c.text.contains("<thinking>"));
                assert!(!c.text.contains("</thinking>"));
            }
        }
    }

    #[test]
    fn test_unrelated_tag_passes_through() {
        let (_, events) = run(&["<b>bold</b> text"]);
        assert_eq!(visible_text(&events), "<b>bold</b> text");
    }

    #[test]
    fn test_unbalanced_close_clamped() {
        let mut parser = IncrementalTagParser::new();
        parser.push("</function_calls>");
        assert!(!parser.is_inside_function_calls());
    }

    #[test]
    fn test_chunking_invariance() {
        let whole = "pre <function_calls><invoke name=\"x\"></invoke></function_calls> post";
        let (_, one_shot) = run(&[whole]);

        let splits: Vec<Vec<&str>> = vec![
            vec![whole],
            vec![&whole[..10], &whole[10..]],
            vec![&whole[..5], &whole[5..30], &whole[30..]],
        ];
        let one_shot_text = visible_text(&one_shot);
        for split in splits {
            let (_, events) = run(&split);
            assert_eq!(visible_text(&events), one_shot_text);
        }
    }
}
