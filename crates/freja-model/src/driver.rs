// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::{catalog, CompletionRequest, Message, ModelDescriptor, StreamChunk};

pub type ChunkStream = Pin<Box<dyn Stream<Item = anyhow::Result<StreamChunk>> + Send>>;

/// Streaming driver for one `(provider, model)` pair.
///
/// Drivers are stateless and safe to call concurrently with distinct
/// requests; credentials travel inside the [`CompletionRequest`].
#[async_trait]
pub trait ModelDriver: Send + Sync {
    /// Provider id as registered (e.g. `"anthropic"`).
    fn provider(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_id(&self) -> &str;

    /// Open a streaming completion.  The returned stream is one assistant
    /// turn; tool-use rounds inside the turn are handled by the driver.
    async fn stream(&self, req: CompletionRequest) -> anyhow::Result<ChunkStream>;

    /// Summarise `messages` for transcript compaction.
    ///
    /// The default implementation runs a plain (tool-free) completion with
    /// the instructions as system prompt and collects the text deltas.
    async fn compact(&self, messages: &[Message], instructions: &str) -> anyhow::Result<String> {
        use futures::StreamExt;

        let mut req_messages = vec![Message::system(instructions)];
        req_messages.extend(messages.iter().cloned());
        let req = CompletionRequest {
            messages: req_messages,
            ..Default::default()
        };
        let mut stream = self.stream(req).await?;
        let mut out = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk? {
                StreamChunk::TextDelta(t) => out.push_str(&t),
                StreamChunk::Error(e) => anyhow::bail!("summariser error: {e}"),
                StreamChunk::Done => break,
                _ => {}
            }
        }
        Ok(out)
    }

    /// Catalog metadata for this driver's model, when known.
    fn descriptor(&self) -> Option<ModelDescriptor> {
        catalog::lookup(self.provider(), self.model_id()).map(ModelDescriptor::from)
    }
}
