//! Response envelopes returned to callers

use crate::pipeline::ScoredRecord;
use crate::PipelineError;
use serde::Serialize;

/// `{success: true, ...data}` or `{success: false, error, retryable}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl<T> Envelope<T> {
    /// Successful envelope
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            retryable: None,
        }
    }

    /// Failure that is not tied to a pipeline stage, e.g. an unreadable request
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            retryable: None,
        }
    }

    /// Failure envelope carrying whether a retry may help
    pub fn from_error(error: &PipelineError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
            retryable: Some(error.is_retryable()),
        }
    }

    /// Envelope for either outcome
    pub fn from_result(result: Result<T, PipelineError>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::from_error(&e),
        }
    }
}

/// One row of a batch, tagged with its position in the input
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchRow {
    pub index: usize,
    #[serde(flatten)]
    pub envelope: Envelope<ScoredRecord>,
}

/// Per-row results of a batch, in input order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResponse {
    pub success: bool,
    pub rows_processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<BatchRow>,
}

impl BatchResponse {
    /// Totals computed from per-row envelopes
    pub fn from_rows(results: Vec<BatchRow>) -> Self {
        let succeeded = results.iter().filter(|r| r.envelope.success).count();
        Self {
            success: true,
            rows_processed: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            results,
        }
    }
}
