//! Processor descriptors: the registry's view of a handler.

use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use eventhub_core::{DomainError, DomainResult};

use crate::filter::EventMatcher;

/// What a processor does. Built-in kinds get their handler from the pipeline;
/// `Custom` handlers are bound in code by processor name.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorKind {
    Projection,
    Delivery,
    Custom,
}

impl ProcessorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessorKind::Projection => "projection",
            ProcessorKind::Delivery => "delivery",
            ProcessorKind::Custom => "custom",
        }
    }
}

impl fmt::Display for ProcessorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessorKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "projection" => Ok(ProcessorKind::Projection),
            "delivery" => Ok(ProcessorKind::Delivery),
            "custom" => Ok(ProcessorKind::Custom),
            other => Err(DomainError::validation(format!("invalid processor type: {other:?}"))),
        }
    }
}

/// A registered processor. Never deleted, only disabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ProcessorKind,
    pub enabled: bool,
    /// Lower runs first.
    pub priority: i32,
    #[serde(default)]
    pub filters: EventMatcher,
    pub error_count: u64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessorDescriptor {
    pub fn new(
        name: impl Into<String>,
        kind: ProcessorKind,
        priority: i32,
        filters: EventMatcher,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            enabled: true,
            priority,
            filters,
            error_count: 0,
            last_error: None,
            created_at: at,
            updated_at: at,
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("processor name is required"));
        }
        Ok(())
    }

    pub fn record_failure(&mut self, error: impl Into<String>, at: DateTime<Utc>) {
        self.error_count += 1;
        self.last_error = Some(error.into());
        self.updated_at = at;
    }
}
