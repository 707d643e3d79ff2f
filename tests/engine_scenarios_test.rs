//! Engine-level scenario tests against a test-double [`ProviderAdapter`].
//!
//! These exercise the Engine's retry/tool-loop plumbing directly rather than
//! a live backend: a `ScriptedAdapter` returns a scripted sequence of
//! `stream()`/`complete()` outcomes, same pattern any caller would use to
//! unit-test code built on top of the `ProviderAdapter` trait object.

use async_trait::async_trait;
use open_agent::adapter::{
    CallOptions, ProviderAdapter, ProviderRequest, ProviderResponse, ProviderStopReason, StreamCallbacks,
};
use open_agent::engine::{stream_with_xml_tools, EngineConfig, ToolCallContext};
use open_agent::{
    Content, NormalizedMessage, NormalizedRequest, ParticipantId, RequestConfig, ToolResult,
    ToolResultContent, Usage,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Replays a fixed list of chunk sequences, one per call to `stream`. Each
/// entry is `(chunks, stop_reason, stop_sequence)`.
struct ScriptedAdapter {
    calls: AtomicUsize,
    script: Mutex<Vec<(Vec<&'static str>, ProviderStopReason, Option<&'static str>)>>,
}

impl ScriptedAdapter {
    fn new(script: Vec<(Vec<&'static str>, ProviderStopReason, Option<&'static str>)>) -> Self {
        Self { calls: AtomicUsize::new(0), script: Mutex::new(script) }
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        "scripted"
    }

    fn supports_model(&self, _model: &str) -> bool {
        true
    }

    async fn complete(&self, _request: ProviderRequest, _options: &CallOptions) -> open_agent::Result<ProviderResponse> {
        unimplemented!("scripted adapter only exercises the streaming path in these tests")
    }

    async fn stream(
        &self,
        request: ProviderRequest,
        mut callbacks: StreamCallbacks<'_>,
        _options: &CallOptions,
    ) -> open_agent::Result<ProviderResponse> {
        let call_index = self.calls.fetch_add(1, Ordering::SeqCst);
        let (chunks, stop_reason, stop_sequence) = {
            let script = self.script.lock().unwrap();
            script
                .get(call_index)
                .cloned()
                .unwrap_or_else(|| panic!("ScriptedAdapter received more calls ({call_index}) than scripted"))
        };
        for chunk in &chunks {
            (callbacks.on_chunk)(chunk);
        }
        Ok(ProviderResponse {
            content: Vec::new(),
            stop_reason,
            stop_sequence: stop_sequence.map(str::to_string),
            usage: Usage { input_tokens: 12, output_tokens: chunks.iter().map(|c| c.len() as u64).sum(), ..Usage::default() },
            model: request.model,
            raw: serde_json::Value::Null,
        })
    }
}

fn request(messages: Vec<NormalizedMessage>) -> NormalizedRequest {
    NormalizedRequest {
        config: RequestConfig { model: "test-model".to_string(), max_tokens: 256, temperature: None, top_p: None, top_k: None },
        system: Some("You are a helpful assistant.".to_string()),
        messages,
        tools: None,
        tool_mode: None,
        provider_params: None,
        stop_sequences: None,
    }
}

/// Scenario 1: basic streaming. `on_chunk` fires, the concatenation equals
/// the raw assistant text, and the final content is exactly one text block.
#[tokio::test]
async fn scenario_basic_streaming_yields_single_text_block() {
    let adapter = ScriptedAdapter::new(vec![(
        vec!["1, 2, 3, ", "4, 5."],
        ProviderStopReason::EndTurn,
        None,
    )]);
    let req = request(vec![NormalizedMessage::text(ParticipantId::new("Alice"), "Count from 1 to 5.")]);
    let config = EngineConfig::default();

    let mut seen = String::new();
    let outcome = stream_with_xml_tools(
        &adapter,
        req,
        &config,
        |chunk| seen.push_str(chunk),
        |_calls, _ctx: ToolCallContext<'_>| async { Ok(Vec::new()) },
    )
    .await
    .unwrap();

    assert_eq!(seen, outcome.raw_assistant_text);
    assert_eq!(outcome.response.content.len(), 1);
    assert!(matches!(&outcome.response.content[0], Content::Text(t) if t.text == "1, 2, 3, 4, 5."));
    assert_eq!(outcome.response.stop_reason, open_agent::StopReason::EndTurn);
    assert!(outcome.response.basic_usage.output_tokens > 0);
}

/// Scenario 2: tool execution. The tool call is surfaced exactly once with
/// the parsed input, and the continuation round yields `end_turn`.
#[tokio::test]
async fn scenario_tool_execution_invokes_handler_once_with_parsed_input() {
    let adapter = ScriptedAdapter::new(vec![
        (
            vec!["<function_calls><invoke name=\"add_numbers\"><parameter name=\"a\">10</parameter><parameter name=\"b\">20</parameter></invoke></function_calls>"],
            ProviderStopReason::EndTurn,
            None,
        ),
        (vec!["The sum is 30."], ProviderStopReason::EndTurn, None),
    ]);
    let req = request(vec![NormalizedMessage::text(
        ParticipantId::new("Alice"),
        "Use add_numbers to add 10 and 20.",
    )]);
    let config = EngineConfig::default();

    let mut tool_call_count = 0;
    let outcome = stream_with_xml_tools(
        &adapter,
        req,
        &config,
        |_chunk| {},
        |calls, _ctx: ToolCallContext<'_>| {
            tool_call_count += 1;
            assert_eq!(calls.len(), 1);
            assert_eq!(calls[0].name, "add_numbers");
            assert_eq!(calls[0].input["a"], 10);
            assert_eq!(calls[0].input["b"], 20);
            let id = calls[0].id.clone();
            async move { Ok(vec![ToolResult { tool_use_id: id, content: ToolResultContent::text("30"), is_error: None }]) }
        },
    )
    .await
    .unwrap();

    assert_eq!(tool_call_count, 1);
    assert!(outcome.raw_assistant_text.contains("<function_results>"));
    assert_eq!(outcome.response.stop_reason, open_agent::StopReason::EndTurn);
}

/// Scenario 3: false-positive stop recovery. The backend halts mid
/// `function_results` on a participant-prefix stop sequence; the engine must
/// treat this as a false positive and resume rather than ending the turn.
#[tokio::test]
async fn scenario_false_positive_stop_resumes_generation() {
    let adapter = ScriptedAdapter::new(vec![
        (
            vec!["<function_results><result tool_use_id=\"t0\">Chat log:\nUser: Hello\n"],
            ProviderStopReason::StopSequence,
            Some("\nUser:"),
        ),
        (
            vec!["Claude: Hi\n---end---</result></function_results>All done."],
            ProviderStopReason::EndTurn,
            None,
        ),
    ]);
    let req = request(vec![NormalizedMessage::text(ParticipantId::new("Alice"), "Summarize the chat log.")]);
    let config = EngineConfig::default();

    let outcome = stream_with_xml_tools(
        &adapter,
        req,
        &config,
        |_chunk| {},
        |_calls, _ctx: ToolCallContext<'_>| async { Ok(Vec::new()) },
    )
    .await
    .unwrap();

    assert_eq!(outcome.response.stop_reason, open_agent::StopReason::EndTurn);
    assert!(outcome.raw_assistant_text.contains("Chat log"));
}

/// Scenario 8: long-history isolation. A 50-turn conversation is fed in, but
/// the scripted backend returns only "Short response"; the final content
/// must contain nothing from the prior history.
#[tokio::test]
async fn scenario_long_history_does_not_leak_into_response_content() {
    let adapter = ScriptedAdapter::new(vec![(vec!["Short response"], ProviderStopReason::EndTurn, None)]);

    let user = ParticipantId::new("Alice");
    let assistant = ParticipantId::new("Claude");
    let mut messages = Vec::new();
    for i in 0..25 {
        messages.push(NormalizedMessage::text(user.clone(), format!("Message {i}")));
        messages.push(NormalizedMessage::text(assistant.clone(), format!("Message {i} reply")));
    }
    let req = request(messages);
    let config = EngineConfig::default();

    let outcome = stream_with_xml_tools(
        &adapter,
        req,
        &config,
        |_chunk| {},
        |_calls, _ctx: ToolCallContext<'_>| async { Ok(Vec::new()) },
    )
    .await
    .unwrap();

    assert_eq!(outcome.raw_assistant_text, "Short response");
    assert_eq!(outcome.response.content.len(), 1);
    assert!(matches!(&outcome.response.content[0], Content::Text(t) if t.text == "Short response"));
    for i in 0..25 {
        let needle = format!("Message {i}");
        assert!(
            !outcome.response.content.iter().any(|b| matches!(b, Content::Text(t) if t.text.contains(&needle))),
            "response content leaked prior-turn text: {needle}"
        );
    }
}
