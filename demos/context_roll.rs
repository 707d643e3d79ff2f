//! Context Manager Roll Demo
//!
//! Demonstrates the rolling-window context manager without any network
//! calls: builds a synthetic long conversation, runs it through
//! `process_context` under a tight message threshold, and prints what
//! rolled, what was kept, and where cache markers landed.

use open_agent::{
    CacheMarkerPolicy, Content, ContextLimit, ContextManagerConfig, ContextState, NormalizedMessage,
    ParticipantId, RollingPolicy, process_context,
};

fn synthetic_conversation(turns: usize) -> Vec<NormalizedMessage> {
    let user = ParticipantId::new("User");
    let assistant = ParticipantId::new("Claude");
    let mut messages = Vec::new();
    for i in 0..turns {
        messages.push(NormalizedMessage::text(user.clone(), format!("question {i}: tell me something interesting")));
        messages.push(NormalizedMessage::text(
            assistant.clone(),
            format!("answer {i}: here is a moderately long reply with some detail to pad out token counts a bit."),
        ));
    }
    messages
}

fn main() {
    println!("{}", "=".repeat(60));
    println!("CONTEXT MANAGER ROLL DEMO");
    println!("{}", "=".repeat(60));
    println!();

    let assistant = ParticipantId::new("Claude");
    let messages = synthetic_conversation(30);
    println!("Starting conversation: {} messages", messages.len());

    let config = ContextManagerConfig {
        rolling: RollingPolicy {
            threshold: ContextLimit::Messages(20),
            buffer: ContextLimit::Messages(8),
            grace: Some(2),
        },
        cache: CacheMarkerPolicy {
            points: 2,
            min_tokens: 16,
            prefer_user_messages: true,
        },
        ..ContextManagerConfig::default()
    };

    let mut state = ContextState::default();
    let mut current = messages;

    for round in 0..4 {
        let (kept, markers, new_state, info) = process_context(&current, &assistant, &config, &state);
        println!(
            "\nround {round}: did_roll={} kept={} dropped={} markers={:?} total_tokens={}",
            info.did_roll, info.messages_kept, info.messages_dropped, markers, info.total_tokens
        );
        current = kept;
        state = new_state;

        // Simulate another exchange happening before the next check.
        current.push(NormalizedMessage::new(
            assistant.clone(),
            vec![Content::text(format!("round {round} follow-up"))],
        ));
    }

    println!("\nfinal window size: {} messages", current.len());
}
