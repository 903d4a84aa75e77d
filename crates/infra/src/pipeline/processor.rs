//! The processor capability: one `handle` call per matching event.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use eventhub_events::Event;

/// How a dispatch was triggered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// The periodic pipeline.
    #[default]
    Live,
    /// A replay that re-drives side effects.
    Replay,
    /// A replay preview. Handlers must not write or deliver anything.
    DryRun,
}

impl DispatchMode {
    pub fn is_dry_run(&self) -> bool {
        matches!(self, DispatchMode::DryRun)
    }

    pub fn is_replay(&self) -> bool {
        !matches!(self, DispatchMode::Live)
    }
}

/// Per-dispatch context handed to every processor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchContext {
    pub mode: DispatchMode,
    /// Restricts delivery to one subscriber (subscription-targeted replay).
    pub subscriber: Option<String>,
    /// Set by the dispatcher once a processor earlier in this dispatch failed.
    pub earlier_failure: bool,
}

impl DispatchContext {
    pub fn live() -> Self {
        Self::default()
    }

    pub fn replay(dry_run: bool) -> Self {
        Self {
            mode: if dry_run {
                DispatchMode::DryRun
            } else {
                DispatchMode::Replay
            },
            subscriber: None,
            earlier_failure: false,
        }
    }

    pub fn for_subscriber(mut self, subscriber: impl Into<String>) -> Self {
        self.subscriber = Some(subscriber.into());
        self
    }

    /// Live dispatch after an earlier processor already failed the event. The
    /// event is going to be retried, so side effects can wait for that attempt.
    pub fn after_failure(&self) -> bool {
        self.earlier_failure && !self.mode.is_replay()
    }
}

/// A processor failure. Always recorded as a failed `ProcessingResult`; never
/// escapes the dispatcher.
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("{0}")]
    Failed(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl ProcessorError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// A handler invoked against matching events during dispatch.
///
/// `Ok(message)` is a success; the optional message lands in the audit row.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn handle(
        &self,
        event: &Event,
        ctx: &DispatchContext,
    ) -> Result<Option<String>, ProcessorError>;
}

/// Adapter for synchronous closures.
pub struct FnProcessor<F> {
    f: F,
}

impl<F> FnProcessor<F>
where
    F: Fn(&Event, &DispatchContext) -> Result<Option<String>, ProcessorError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Processor for FnProcessor<F>
where
    F: Fn(&Event, &DispatchContext) -> Result<Option<String>, ProcessorError> + Send + Sync,
{
    async fn handle(
        &self,
        event: &Event,
        ctx: &DispatchContext,
    ) -> Result<Option<String>, ProcessorError> {
        (self.f)(event, ctx)
    }
}
