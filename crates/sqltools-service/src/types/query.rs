//! Contracts for the query execution feature.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqltools_batch::Batch;

use super::contracts::{EventType, RequestType};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteStringParams {
    pub owner_uri: String,
    pub query: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequestResult {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryCancelParams {
    pub owner_uri: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryCancelResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDisposeParams {
    pub owner_uri: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryDisposeResult {}

/// Span of a batch within the submitted script, 0-based.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionData {
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

impl From<&Batch> for SelectionData {
    fn from(batch: &Batch) -> Self {
        Self {
            start_line: batch.start_line,
            start_column: batch.start_column,
            end_line: batch.end_line,
            end_column: batch.end_column,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub id: usize,
    pub selection: SelectionData,
    pub execution_start: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_end: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_elapsed_ms: Option<u64>,
    pub has_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEventParams {
    pub owner_uri: String,
    pub batch_summary: BatchSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<usize>,
    pub is_error: bool,
    pub time: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageParams {
    pub owner_uri: String,
    pub message: ResultMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryCompleteParams {
    pub owner_uri: String,
    pub batch_summaries: Vec<BatchSummary>,
    pub result: sqltools_batch::ScriptExecutionResult,
}

pub const EXECUTE_STRING: RequestType<ExecuteStringParams, ExecuteRequestResult> =
    RequestType::new("query/executeString");
pub const CANCEL: RequestType<QueryCancelParams, QueryCancelResult> =
    RequestType::new("query/cancel");
pub const DISPOSE: RequestType<QueryDisposeParams, QueryDisposeResult> =
    RequestType::new("query/dispose");

pub const BATCH_START: EventType<BatchEventParams> = EventType::new("query/batchStart");
pub const MESSAGE: EventType<MessageParams> = EventType::new("query/message");
pub const BATCH_COMPLETE: EventType<BatchEventParams> = EventType::new("query/batchComplete");
pub const COMPLETE: EventType<QueryCompleteParams> = EventType::new("query/complete");
