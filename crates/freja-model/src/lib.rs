// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod catalog;
pub mod classify;
pub mod registry;
pub mod scrub;
mod driver;
mod mock;
mod types;

pub use catalog::{Capability, ModelCatalogEntry, ModelDescriptor};
pub use classify::{FailureReason, COMPACTION_FAILED_MARKER};
pub use driver::{ChunkStream, ModelDriver};
pub use mock::{MockDriver, ScriptedCall, ScriptedMockDriver};
pub use registry::{get_driver_meta, DriverFactory, DriverMeta, DriverRegistry};
pub use types::{
    CompletionRequest, ContentPart, FunctionCall, Message, MessageContent, ModelStamp, Role,
    StreamChunk, ToolSchema, Usage,
};
