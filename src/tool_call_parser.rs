//! Extract structured tool invocations from accumulated text, and serialize
//! tool results back into the XML protocol the Prefill Formatter embeds in
//! the prompt.
//!
//! No teacher module performs XML extraction; this is new, grounded only in
//! the shape of the tag vocabulary fixed by [`crate::parser`] and in the
//! teacher's `Tool`/`ToolUseBlock`/`ToolResultBlock` field names (`id`,
//! `name`, `input`, `tool_use_id`, `content`) from `types.rs`, reused here so
//! the two type families stay vocabulary-compatible.

use crate::content::{ContentBlock, ToolCall, ToolResult, ToolResultContent};
use std::fmt::Write as _;

/// Result of extracting the first `<function_calls>...</function_calls>`
/// block from accumulated text.
#[derive(Debug, Clone)]
pub struct ExtractedCalls {
    pub calls: Vec<ToolCall>,
    pub before_text: String,
    pub after_text: String,
    pub full_match: String,
}

/// Monotonic, per-parser tool-call id generator. Scoped to one stream
/// instance (§9's recommendation: per-stream rather than process-wide),
/// implemented with the same `AtomicU64` idiom the spec names for the one
/// process-wide counter it does allow.
#[derive(Debug, Default)]
pub struct ToolCallIdGenerator {
    next: std::sync::atomic::AtomicU64,
}

impl ToolCallIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> String {
        let n = self
            .next
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        format!("toolu_{n:016x}")
    }
}

/// True when the open-tag count for any of the three structural tags
/// exceeds the close-tag count in `text` — used by the engine to detect a
/// false-positive stop (§4.8 step 6). Counts both the bare and `antml:`-
/// prefixed spellings of each tag, mirroring `parser::match_structural_tag`'s
/// optional-prefix handling.
pub fn has_unclosed_tool_block(text: &str) -> bool {
    const PREFIX: &str = "antml:";
    for (open, close) in [
        ("<function_calls>".to_string(), "</function_calls>".to_string()),
        (format!("<{PREFIX}function_calls>"), format!("</{PREFIX}function_calls>")),
        ("<function_results>".to_string(), "</function_results>".to_string()),
        (format!("<{PREFIX}function_results>"), format!("</{PREFIX}function_results>")),
        ("<thinking>".to_string(), "</thinking>".to_string()),
        (format!("<{PREFIX}thinking>"), format!("</{PREFIX}thinking>")),
    ] {
        let (open, close) = (open.as_str(), close.as_str());
        if text.matches(open).count() > text.matches(close).count() {
            return true;
        }
    }
    false
}

/// Finds whichever spelling of the `function_calls` wrapper — bare or
/// `antml:`-prefixed — appears first in `text`, mirroring
/// `parser::match_structural_tag`'s `strip_prefix("antml:")` handling.
fn find_function_calls_tags(text: &str) -> Option<(String, String)> {
    const PREFIX: &str = "antml:";
    let bare_start = text.find("<function_calls>");
    let prefixed_open = format!("<{PREFIX}function_calls>");
    let prefixed_start = text.find(&prefixed_open);

    let use_prefixed = match (bare_start, prefixed_start) {
        (Some(b), Some(p)) => p < b,
        (None, Some(_)) => true,
        (Some(_), None) => false,
        (None, None) => return None,
    };

    Some(if use_prefixed {
        (prefixed_open, format!("</{PREFIX}function_calls>"))
    } else {
        ("<function_calls>".to_string(), "</function_calls>".to_string())
    })
}

pub fn extract_tool_calls(text: &str, ids: &ToolCallIdGenerator) -> Option<ExtractedCalls> {
    let (open_tag, close_tag) = find_function_calls_tags(text)?;
    let start = text.find(open_tag.as_str())?;
    let body_start = start + open_tag.len();
    let end = text[body_start..].find(close_tag.as_str())? + body_start;
    let body = &text[body_start..end];
    let full_match_end = end + close_tag.len();

    let calls = extract_invokes(body, ids);

    Some(ExtractedCalls {
        calls,
        before_text: text[..start].to_string(),
        after_text: text[full_match_end..].to_string(),
        full_match: text[start..full_match_end].to_string(),
    })
}

/// Scans `body` for `<invoke>...</invoke>` entries directly, with no
/// requirement that an outer `<function_calls>` wrapper be present. Used
/// both by [`extract_tool_calls`] (wrapper already stripped above) and by
/// [`crate::formatter::parse_content_blocks`], whose input is the Parser's
/// `current_block_text` — the wrapper bytes themselves are consumed by
/// `parser::match_structural_tag` and never appear in that text.
pub fn extract_invokes(body: &str, ids: &ToolCallIdGenerator) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    let mut cursor = 0;
    while let Some(invoke_start) = body[cursor..].find("<invoke") {
        let invoke_start = cursor + invoke_start;
        let Some(tag_close) = body[invoke_start..].find('>') else {
            break;
        };
        let tag_close = invoke_start + tag_close;
        let open_attrs = &body[invoke_start..tag_close];
        let name = extract_attr(open_attrs, "name").unwrap_or_default();

        let Some(end_rel) = body[tag_close..].find("</invoke>") else {
            break;
        };
        let invoke_body = &body[tag_close + 1..tag_close + end_rel];
        let input = extract_parameters(invoke_body);

        calls.push(ToolCall {
            id: ids.next_id(),
            name,
            input,
        });

        cursor = tag_close + end_rel + "</invoke>".len();
    }
    calls
}

fn extract_attr(tag: &str, attr: &str) -> Option<String> {
    let needle = format!("{attr}=\"");
    let start = tag.find(&needle)? + needle.len();
    let end = tag[start..].find('"')? + start;
    Some(tag[start..end].to_string())
}

fn extract_parameters(invoke_body: &str) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    let mut cursor = 0;
    while let Some(param_start) = invoke_body[cursor..].find("<parameter") {
        let param_start = cursor + param_start;
        let Some(tag_close) = invoke_body[param_start..].find('>') else {
            break;
        };
        let tag_close = param_start + tag_close;
        let open_attrs = &invoke_body[param_start..tag_close];
        let name = extract_attr(open_attrs, "name").unwrap_or_default();

        let Some(end_rel) = invoke_body[tag_close..].find("</parameter>") else {
            break;
        };
        let raw_value = invoke_body[tag_close + 1..tag_close + end_rel].trim();
        let value = serde_json::from_str(raw_value)
            .unwrap_or_else(|_| serde_json::Value::String(raw_value.to_string()));
        map.insert(name, value);

        cursor = tag_close + end_rel + "</parameter>".len();
    }
    serde_json::Value::Object(map)
}

/// Result of serializing tool results, split around any images they carry
/// so the engine can inject them as a separate user-role turn (§4.3's
/// split-turn injection).
pub struct SerializedResults {
    pub before_image_xml: String,
    pub images: Vec<ContentBlock>,
    pub after_image_xml: String,
}

impl SerializedResults {
    pub fn has_images(&self) -> bool {
        !self.images.is_empty()
    }

    /// Single-string form for callers that don't need split-turn injection.
    pub fn flat_xml(&self) -> String {
        format!("{}{}", self.before_image_xml, self.after_image_xml)
    }
}

pub fn format_tool_results(results: &[ToolResult]) -> SerializedResults {
    let mut before = String::from("<function_results>\n");
    let mut images = Vec::new();
    let mut after = String::new();
    let mut seen_image = false;

    for r in results {
        let tag = if r.is_error.unwrap_or(false) {
            "error"
        } else {
            "result"
        };
        let buf = if seen_image { &mut after } else { &mut before };
        let _ = write!(buf, "<{tag} tool_use_id=\"{}\">", r.tool_use_id);
        match &r.content {
            ToolResultContent::Text(t) => {
                let _ = write!(buf, "{}", escape_xml(t));
            }
            ToolResultContent::Blocks(blocks) => {
                for block in blocks {
                    match block {
                        ContentBlock::Text(t) => {
                            let _ = write!(buf, "{}", escape_xml(&t.text));
                        }
                        ContentBlock::Image(_) => {
                            images.push(block.clone());
                            seen_image = true;
                        }
                        _ => {}
                    }
                }
            }
        }
        let _ = write!(buf, "</{tag}>\n");
    }

    let closing = "</function_results>";
    if seen_image {
        after.push_str(closing);
    } else {
        before.push_str(closing);
    }

    SerializedResults {
        before_image_xml: before,
        images,
        after_image_xml: after,
    }
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_single_call() {
        let ids = ToolCallIdGenerator::new();
        let text = r#"before <function_calls><invoke name="add_numbers"><parameter name="a">10</parameter><parameter name="b">20</parameter></invoke></function_calls> after"#;
        let extracted = extract_tool_calls(text, &ids).unwrap();
        assert_eq!(extracted.calls.len(), 1);
        assert_eq!(extracted.calls[0].name, "add_numbers");
        assert_eq!(extracted.calls[0].input["a"], 10);
        assert_eq!(extracted.calls[0].input["b"], 20);
        assert_eq!(extracted.before_text, "before ");
        assert_eq!(extracted.after_text, " after");
    }

    #[test]
    fn test_extract_string_parameter_fallback() {
        let ids = ToolCallIdGenerator::new();
        let text = r#"<function_calls><invoke name="greet"><parameter name="name">world</parameter></invoke></function_calls>"#;
        let extracted = extract_tool_calls(text, &ids).unwrap();
        assert_eq!(extracted.calls[0].input["name"], "world");
    }

    #[test]
    fn test_no_calls_returns_none() {
        let ids = ToolCallIdGenerator::new();
        assert!(extract_tool_calls("just plain text", &ids).is_none());
    }

    #[test]
    fn test_extract_call_with_prefixed_tags() {
        // Only the outer function_calls wrapper carries the optional antml:
        // prefix (mirroring parser::TagName); invoke/parameter are unprefixed
        // either way.
        let ids = ToolCallIdGenerator::new();
        let text = "before <antml:function_calls><invoke name=\"add_numbers\"><parameter name=\"a\">10</parameter><parameter name=\"b\">20</parameter></invoke></antml:function_calls> after";
        let extracted = extract_tool_calls(text, &ids).unwrap();
        assert_eq!(extracted.calls.len(), 1);
        assert_eq!(extracted.calls[0].name, "add_numbers");
        assert_eq!(extracted.calls[0].input["a"], 10);
        assert_eq!(extracted.calls[0].input["b"], 20);
        assert_eq!(extracted.before_text, "before ");
        assert_eq!(extracted.after_text, " after");
    }

    #[test]
    fn test_has_unclosed_tool_block() {
        assert!(has_unclosed_tool_block("<function_results>partial"));
        assert!(!has_unclosed_tool_block(
            "<function_results>done</function_results>"
        ));
    }

    #[test]
    fn test_has_unclosed_tool_block_prefixed() {
        assert!(has_unclosed_tool_block("<antml:function_results>partial"));
        assert!(!has_unclosed_tool_block(
            "<antml:function_results>done</antml:function_results>"
        ));
    }

    #[test]
    fn test_format_tool_results_no_images() {
        let results = vec![ToolResult {
            tool_use_id: "toolu_1".to_string(),
            content: ToolResultContent::text("30"),
            is_error: None,
        }];
        let serialized = format_tool_results(&results);
        assert!(!serialized.has_images());
        assert!(serialized.flat_xml().contains("tool_use_id=\"toolu_1\""));
        assert!(serialized.flat_xml().contains("30"));
    }

    #[test]
    fn test_format_tool_results_error_tag() {
        let results = vec![ToolResult {
            tool_use_id: "toolu_2".to_string(),
            content: ToolResultContent::text("boom"),
            is_error: Some(true),
        }];
        let serialized = format_tool_results(&results);
        assert!(serialized.flat_xml().contains("<error tool_use_id=\"toolu_2\">"));
    }

    #[test]
    fn test_ids_are_unique_and_monotonic() {
        let ids = ToolCallIdGenerator::new();
        let a = ids.next_id();
        let b = ids.next_id();
        assert_ne!(a, b);
    }
}
