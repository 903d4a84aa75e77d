//! Append-only audit rows, one per processor attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use eventhub_core::{EventId, ResultId};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Failed,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Success => "success",
            ResultStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(ResultStatus::Success),
            "failed" => Some(ResultStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub result_id: ResultId,
    pub event_id: EventId,
    pub processor_name: String,
    pub status: ResultStatus,
    pub message: Option<String>,
    pub duration_ms: u64,
    pub processed_at: DateTime<Utc>,
    /// Written by a replay rather than the live pipeline.
    pub replay: bool,
}
