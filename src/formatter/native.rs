//! Native (role-based) formatter: maps each message to `{role, content}`
//! with a fixed two-role split (assistant vs. everything else), preserving
//! cache-control on text blocks. Used by adapters with real tool/function
//! calling (Anthropic native mode, OpenAI-compatible, Bedrock).
//!
//! Grounded on the teacher's `MessageRole` → OpenAI-role mapping in
//! `client.rs`/`types.rs`.

use crate::content::{ContentBlock, Message, ParticipantId};

#[derive(Debug, Clone)]
pub struct NativeTurn {
    pub role: &'static str,
    pub content: Vec<ContentBlock>,
}

/// Map each message to a native turn. Consecutive same-role turns are
/// merged when `merge_consecutive` is set, matching how several backends
/// (Anthropic among them) reject back-to-back same-role turns. When
/// `enforce_alternation` is set, any same-role turns left adjacent after
/// merging (e.g. because `merge_consecutive` was off) get a filler `"..."`
/// turn of the opposite role spliced between them instead.
pub fn build_native_turns(
    messages: &[Message],
    assistant_participant: &ParticipantId,
    merge_consecutive: bool,
    enforce_alternation: bool,
) -> Vec<NativeTurn> {
    let mut turns: Vec<NativeTurn> = Vec::new();
    for message in messages {
        let role = if message.participant == *assistant_participant {
            "assistant"
        } else {
            "user"
        };
        if merge_consecutive {
            if let Some(last) = turns.last_mut() {
                if last.role == role {
                    last.content.extend(message.content.clone());
                    continue;
                }
            }
        }
        if enforce_alternation {
            if let Some(last) = turns.last() {
                if last.role == role {
                    turns.push(NativeTurn {
                        role: filler_role(role),
                        content: vec![ContentBlock::text("...")],
                    });
                }
            }
        }
        turns.push(NativeTurn {
            role,
            content: message.content.clone(),
        });
    }
    turns
}

fn filler_role(role: &str) -> &'static str {
    if role == "assistant" {
        "user"
    } else {
        "assistant"
    }
}
