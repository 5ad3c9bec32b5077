// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use freja_config::ThinkLevel;

// ─── Content part types ───────────────────────────────────────────────────────

/// A single content part in a multi-part message.
///
/// Used for user turns that mix text with image references.  Images are
/// data URLs (`data:<mime>;base64,<b64>`) or HTTPS URLs for providers that
/// accept remote references.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image { image_url: String },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(image_url: impl Into<String>) -> Self {
        Self::Image {
            image_url: image_url.into(),
        }
    }
}

// ─── Message types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Provider/model pair stamped onto assistant messages so the transcript
/// records which driver produced each reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelStamp {
    pub provider: String,
    pub model: String,
}

/// A single message in a model conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    pub timestamp: DateTime<Utc>,
    /// Set on assistant messages only; records the driver that produced them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<ModelStamp>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self::text(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(Role::Assistant, text)
    }

    fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(text.into()),
            timestamp: Utc::now(),
            origin: None,
        }
    }

    pub fn tool_result(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::ToolResult {
                tool_call_id: id.into(),
                content: content.into(),
            },
            timestamp: Utc::now(),
            origin: None,
        }
    }

    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::ToolCall {
                tool_call_id: id.into(),
                function: FunctionCall {
                    name: name.into(),
                    arguments: arguments.into(),
                },
            },
            timestamp: Utc::now(),
            origin: None,
        }
    }

    /// Construct a user message from a list of content parts (text + images).
    ///
    /// A single text item collapses back to `MessageContent::Text`.
    pub fn user_with_parts(parts: Vec<ContentPart>) -> Self {
        let content = if parts.is_empty() {
            MessageContent::Text(String::new())
        } else if parts.len() == 1 {
            if let ContentPart::Text { text } = &parts[0] {
                MessageContent::Text(text.clone())
            } else {
                MessageContent::ContentParts(parts)
            }
        } else {
            MessageContent::ContentParts(parts)
        };
        Self {
            role: Role::User,
            content,
            timestamp: Utc::now(),
            origin: None,
        }
    }

    pub fn with_origin(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        self.origin = Some(ModelStamp {
            provider: provider.into(),
            model: model.into(),
        });
        self
    }

    /// Return the plain text of this message, if it has exactly one text part.
    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(t) => Some(t),
            MessageContent::ContentParts(parts) if parts.len() == 1 => match &parts[0] {
                ContentPart::Text { text } => Some(text),
                _ => None,
            },
            _ => None,
        }
    }

    /// Approximate token count used for context management.
    ///
    /// Uses a 4-chars-per-token heuristic for text; images use a
    /// conservative fixed estimate.
    pub fn approx_tokens(&self) -> usize {
        let chars = match &self.content {
            MessageContent::Text(t) => t.len(),
            MessageContent::ContentParts(parts) => parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => text.len(),
                    ContentPart::Image { .. } => 765 * 4,
                })
                .sum(),
            MessageContent::ToolCall { function, .. } => {
                function.name.len() + function.arguments.len()
            }
            MessageContent::ToolResult { content, .. } => content.len(),
        };
        (chars / 4).max(1)
    }
}

/// The content of a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    ContentParts(Vec<ContentPart>),
    ToolCall {
        tool_call_id: String,
        function: FunctionCall,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object
    pub arguments: String,
}

/// A tool schema provided to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object
    pub parameters: serde_json::Value,
}

// ─── Requests & stream events ─────────────────────────────────────────────────

/// Request sent to a model driver.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    /// Reasoning effort to request; drivers that cannot honour a level
    /// report it in their error text so the controller can step down.
    pub think_level: ThinkLevel,
    /// Credential resolved from the selected auth profile.  Drivers are
    /// stateless; the key travels with each request.
    pub api_key: Option<String>,
    /// Appended after the system message without entering the cached prefix.
    pub system_suffix: Option<String>,
    pub max_tokens: Option<u32>,
}

/// A single streamed event from a model driver.
///
/// One stream corresponds to one assistant turn; deltas from different
/// messages never interleave.  Tool-call arguments may arrive across
/// multiple `ToolCall` chunks keyed by `index`, closed by `ToolCallEnd`.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    TextDelta(String),
    ReasoningDelta(String),
    ToolCall {
        index: u32,
        id: String,
        name: String,
        arguments: String,
    },
    ToolCallEnd {
        index: u32,
    },
    Usage {
        input_tokens: u32,
        output_tokens: u32,
    },
    /// A terminal in-stream error from the provider.
    Error(String),
    Done,
}

/// Token usage accumulated over one attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn add(&mut self, input: u32, output: u32) {
        self.input_tokens += input;
        self.output_tokens += output;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Message construction ──────────────────────────────────────────────────

    #[test]
    fn message_user_sets_role_and_text() {
        let m = Message::user("hello");
        assert_eq!(m.role, Role::User);
        assert_eq!(m.as_text(), Some("hello"));
        assert!(m.origin.is_none());
    }

    #[test]
    fn message_with_origin_stamps_provider_and_model() {
        let m = Message::assistant("reply").with_origin("mock", "mock-model");
        let stamp = m.origin.unwrap();
        assert_eq!(stamp.provider, "mock");
        assert_eq!(stamp.model, "mock-model");
    }

    #[test]
    fn message_tool_result_sets_role_and_content() {
        let m = Message::tool_result("id-1", "output");
        assert_eq!(m.role, Role::Tool);
        match &m.content {
            MessageContent::ToolResult {
                tool_call_id,
                content,
            } => {
                assert_eq!(tool_call_id, "id-1");
                assert_eq!(content, "output");
            }
            _ => panic!("wrong content variant"),
        }
    }

    #[test]
    fn user_with_single_text_part_collapses() {
        let m = Message::user_with_parts(vec![ContentPart::text("hi")]);
        assert_eq!(m.as_text(), Some("hi"));
    }

    #[test]
    fn user_with_image_part_is_multipart() {
        let m = Message::user_with_parts(vec![
            ContentPart::text("what is this?"),
            ContentPart::image("data:image/png;base64,XYZ"),
        ]);
        assert!(m.as_text().is_none());
        assert!(matches!(m.content, MessageContent::ContentParts(ref p) if p.len() == 2));
    }

    // ── Token approximation ───────────────────────────────────────────────────

    #[test]
    fn approx_tokens_text_divides_by_four() {
        let m = Message::user("12345678");
        assert_eq!(m.approx_tokens(), 2);
    }

    #[test]
    fn approx_tokens_minimum_is_one() {
        let m = Message::user("hi");
        assert_eq!(m.approx_tokens(), 1);
    }

    #[test]
    fn approx_tokens_image_uses_fixed_estimate() {
        let m = Message::user_with_parts(vec![ContentPart::image("data:image/png;base64,A")]);
        assert_eq!(m.approx_tokens(), 765);
    }

    #[test]
    fn approx_tokens_tool_call_uses_name_plus_args() {
        let m = Message::tool_call("id", "aaaa", "bbbbbbbb");
        assert_eq!(m.approx_tokens(), 3);
    }

    // ── Serialisation ─────────────────────────────────────────────────────────

    #[test]
    fn message_serialises_and_deserialises() {
        let original = Message::user("test payload");
        let json = serde_json::to_string(&original).unwrap();
        let decoded: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.role, Role::User);
        assert_eq!(decoded.as_text(), Some("test payload"));
    }

    #[test]
    fn origin_field_is_omitted_when_none() {
        let json = serde_json::to_string(&Message::user("x")).unwrap();
        assert!(!json.contains("origin"));
    }

    #[test]
    fn usage_accumulates() {
        let mut u = Usage::default();
        u.add(10, 5);
        u.add(7, 3);
        assert_eq!(u.input_tokens, 17);
        assert_eq!(u.output_tokens, 8);
    }
}
