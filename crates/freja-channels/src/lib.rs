// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Outbound messaging contract.
//!
//! Task progress reports, meeting summaries, and direct replies all leave
//! the core through [`ChannelSink`].  Concrete transports (Telegram,
//! Discord, CLI stdout, …) implement it in their host applications; the
//! core never links against a messenger SDK.

use std::sync::Mutex;

use async_trait::async_trait;

/// One outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Surface name, e.g. "telegram" or "cli".
    pub channel: String,
    /// Conversation / chat id on that surface.
    pub to: String,
    /// Optional group topic (forum thread) id.
    pub topic_id: Option<String>,
    pub text: String,
}

impl OutboundMessage {
    pub fn new(channel: impl Into<String>, to: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            to: to.into(),
            topic_id: None,
            text: text.into(),
        }
    }

    pub fn with_topic(mut self, topic_id: impl Into<String>) -> Self {
        self.topic_id = Some(topic_id.into());
        self
    }
}

/// Delivers messages to a surface.  Implementations must be safe to call
/// from concurrent tasks.
#[async_trait]
pub trait ChannelSink: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> anyhow::Result<()>;
}

/// Sink that drops everything.  Useful when no transport is wired.
pub struct NullSink;

#[async_trait]
impl ChannelSink for NullSink {
    async fn send(&self, message: OutboundMessage) -> anyhow::Result<()> {
        tracing::debug!(channel = %message.channel, to = %message.to, "dropping outbound message (no sink)");
        Ok(())
    }
}

/// Sink that records every message for inspection.  The standard test
/// double for progress-report and meeting-summary assertions.
#[derive(Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<OutboundMessage>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }
}

#[async_trait]
impl ChannelSink for RecordingSink {
    async fn send(&self, message: OutboundMessage) -> anyhow::Result<()> {
        self.messages.lock().unwrap().push(message);
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
