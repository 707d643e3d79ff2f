use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use open_agent::formatter::parse_content_blocks;
use open_agent::formatter::prefill::{PrefillOptions, build_prefill};
use open_agent::{NormalizedMessage, ParticipantId, ToolDefinition};

fn assistant_stream(text_chunks: usize, tool_calls: usize) -> String {
    let mut out = String::new();
    for i in 0..text_chunks {
        out.push_str(&format!("Here is paragraph {i} of the answer, with enough prose to simulate a real streamed response body. "));
    }
    for i in 0..tool_calls {
        out.push_str(&format!(
            "<function_calls><invoke name=\"lookup\"><parameter name=\"query\">item {i}</parameter></invoke></function_calls>"
        ));
        out.push_str("<function_results><result tool_use_id=\"t0\">ok</result></function_results>");
    }
    out
}

fn bench_parser_by_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_content_blocks_by_size");
    for &chunks in &[10usize, 100, 1000] {
        let text = assistant_stream(chunks, chunks / 10);
        group.bench_with_input(BenchmarkId::from_parameter(chunks), &text, |b, text| {
            b.iter(|| parse_content_blocks(black_box(text)));
        });
    }
    group.finish();
}

fn conversation(turns: usize) -> Vec<NormalizedMessage> {
    let user = ParticipantId::new("Alice");
    let assistant = ParticipantId::new("Claude");
    (0..turns)
        .flat_map(|i| {
            vec![
                NormalizedMessage::text(user.clone(), format!("question {i} about the system")),
                NormalizedMessage::text(assistant.clone(), format!("answer {i} with some detail")),
            ]
        })
        .collect()
}

fn bench_prefill_by_history_length(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_prefill_by_history_length");
    let tools = vec![ToolDefinition {
        name: "lookup".to_string(),
        description: "Look something up".to_string(),
        input_schema: serde_json::json!({"type": "object", "properties": {"query": {"type": "string"}}}),
    }];
    let options = PrefillOptions::default();

    for &turns in &[5usize, 50, 200] {
        let messages = conversation(turns);
        group.bench_with_input(BenchmarkId::from_parameter(turns), &messages, |b, messages| {
            b.iter(|| build_prefill(black_box(messages), Some("You are helpful."), Some(&tools), &options));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_parser_by_size, bench_prefill_by_history_length);
criterion_main!(benches);
