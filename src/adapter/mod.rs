//! Provider Adapter Contract: the capability set the Engine requires of any
//! backend, plus the cooperative cancellation/timeout options shared by
//! every call. Four concrete adapters live in sibling modules: [`anthropic`],
//! [`bedrock`], [`openai`], [`images`].
//!
//! Defined as a trait (capability set, not an inheritance hierarchy, per
//! the design notes) using the teacher's existing `async-trait` dependency,
//! which the teacher declared but never used (its `Client` dispatches via
//! inherent methods, not a trait object registry) — idiomatic for this
//! multi-backend registry even though the teacher's own code didn't need it.

pub mod anthropic;
pub mod bedrock;
pub mod images;
pub mod openai;

use crate::content::Usage;
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// Cooperative cancellation token. Generalizes the teacher's
/// `Client::interrupted: Arc<AtomicBool>` (checked in `receive_one`) into a
/// shared, notify-backed token so a parked yielding-stream consumer (§4.9)
/// wakes promptly instead of polling.
#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

#[derive(Clone)]
pub struct CallOptions {
    pub cancellation: CancellationToken,
    pub timeout: Option<Duration>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            cancellation: CancellationToken::new(),
            timeout: Some(Duration::from_secs(120)),
        }
    }
}

/// A backend-specific request body, already built by a [`crate::formatter`].
/// Adapters know how to serialize/sign/POST this; the engine never inspects
/// it directly.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub body: Value,
    pub model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderStopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
    Refusal,
}

#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub content: Vec<crate::content::ContentBlock>,
    pub stop_reason: ProviderStopReason,
    pub stop_sequence: Option<String>,
    pub usage: Usage,
    pub model: String,
    pub raw: Value,
}

/// Invoked by an adapter's `stream` as chunks/blocks arrive. Mirrors the
/// ordering guarantees in §4.8: `on_chunk` in byte order, `on_content_block`
/// between the chunks that produced it.
pub struct StreamCallbacks<'a> {
    pub on_chunk: Box<dyn FnMut(&str) + Send + 'a>,
    pub on_content_block: Option<Box<dyn FnMut(usize, &Value) + Send + 'a>>,
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &str;
    fn supports_model(&self, model: &str) -> bool;
    async fn complete(&self, request: ProviderRequest, options: &CallOptions) -> Result<ProviderResponse>;
    async fn stream(
        &self,
        request: ProviderRequest,
        callbacks: StreamCallbacks<'_>,
        options: &CallOptions,
    ) -> Result<ProviderResponse>;
}
