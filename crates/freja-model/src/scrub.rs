// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Outbound prompt scrubbing.
//!
//! Some providers hard-refuse any request whose prompt contains one of
//! their internal refusal sentinels — tokens their own models emit when
//! declining a request.  A transcript that quotes an earlier refusal (or a
//! user who pastes one) would poison every subsequent turn, so the
//! sentinels are replaced with a benign placeholder before send.

use crate::{ContentPart, Message, MessageContent};

const PLACEHOLDER: &str = "[filtered]";

/// Sentinel strings that trigger an unconditional provider-side refusal
/// when echoed back in a prompt.
const REFUSAL_SENTINELS: &[&str] = &["(ó¿ò)", "<|refusal|>"];

/// Replace refusal sentinels in `text` with a benign placeholder.
pub fn scrub_text(text: &str) -> String {
    let mut out = text.to_string();
    for sentinel in REFUSAL_SENTINELS {
        if out.contains(sentinel) {
            out = out.replace(sentinel, PLACEHOLDER);
        }
    }
    out
}

/// Scrub every text part of every outgoing message.
pub fn scrub_messages(messages: Vec<Message>) -> Vec<Message> {
    messages.into_iter().map(scrub_message).collect()
}

fn scrub_message(mut m: Message) -> Message {
    m.content = match m.content {
        MessageContent::Text(t) => MessageContent::Text(scrub_text(&t)),
        MessageContent::ContentParts(parts) => MessageContent::ContentParts(
            parts
                .into_iter()
                .map(|p| match p {
                    ContentPart::Text { text } => ContentPart::Text {
                        text: scrub_text(&text),
                    },
                    other => other,
                })
                .collect(),
        ),
        MessageContent::ToolResult {
            tool_call_id,
            content,
        } => MessageContent::ToolResult {
            tool_call_id,
            content: scrub_text(&content),
        },
        other => other,
    };
    m
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_passes_through_unchanged() {
        assert_eq!(scrub_text("hello world"), "hello world");
    }

    #[test]
    fn sentinel_is_replaced() {
        let scrubbed = scrub_text("before (ó¿ò) after");
        assert!(!scrubbed.contains("(ó¿ò)"));
        assert!(scrubbed.contains("[filtered]"));
        assert!(scrubbed.starts_with("before"));
        assert!(scrubbed.ends_with("after"));
    }

    #[test]
    fn all_occurrences_are_replaced() {
        let scrubbed = scrub_text("<|refusal|> and again <|refusal|>");
        assert!(!scrubbed.contains("<|refusal|>"));
        assert_eq!(scrubbed.matches("[filtered]").count(), 2);
    }

    #[test]
    fn scrub_messages_rewrites_text_and_tool_results() {
        let msgs = vec![
            Message::user("say (ó¿ò)"),
            Message::tool_result("id", "output with <|refusal|> inside"),
        ];
        let scrubbed = scrub_messages(msgs);
        assert_eq!(scrubbed[0].as_text(), Some("say [filtered]"));
        match &scrubbed[1].content {
            MessageContent::ToolResult { content, .. } => {
                assert!(!content.contains("<|refusal|>"))
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn tool_calls_are_left_alone() {
        let msgs = vec![Message::tool_call("id", "shell", "{\"cmd\":\"ls\"}")];
        let scrubbed = scrub_messages(msgs);
        assert!(matches!(
            scrubbed[0].content,
            MessageContent::ToolCall { .. }
        ));
    }
}
