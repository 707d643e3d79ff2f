//! Completions formatter: flattens a conversation into a single prompt
//! string for base/completions-style models, stripping media and
//! auto-generating stop sequences from observed participants.
//!
//! Grounded on the teacher's `context.rs` text-flattening style
//! (`estimate_tokens`'s per-block text concatenation), generalized into a
//! full prompt-string builder.

use crate::content::{Message, ParticipantId};

pub struct CompletionsResult {
    pub prompt: String,
    pub stop_sequences: Vec<String>,
}

pub fn build_completion_prompt(
    messages: &[Message],
    assistant_participant: &ParticipantId,
    eot: &str,
) -> CompletionsResult {
    let mut prompt = String::new();
    let mut seen = std::collections::HashSet::new();
    let mut stop_sequences = Vec::new();

    for message in messages {
        prompt.push_str(&format!(
            "{}: {}{}\n\n",
            message.participant,
            message.text_content(),
            eot
        ));
        if message.participant != *assistant_participant && seen.insert(message.participant.0.clone()) {
            stop_sequences.push(format!("\n{}:", message.participant));
        }
    }
    prompt.push_str(&format!("{}:", assistant_participant));
    if !eot.is_empty() {
        stop_sequences.push(eot.to_string());
    }

    CompletionsResult {
        prompt,
        stop_sequences,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_ends_with_assistant_prefix() {
        let assistant = ParticipantId::new("Claude");
        let messages = vec![Message::text("Alice", "hi")];
        let result = build_completion_prompt(&messages, &assistant, "");
        assert!(result.prompt.trim_end().ends_with("Claude:"));
    }
}
