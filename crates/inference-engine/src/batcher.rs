//! Batch scoring
//!
//! Rows are scored concurrently in chunks; each row gets its own envelope and
//! results come back in input order.

use crate::backend::{ExplainerBackend, ModelBackend};
use crate::pipeline::{ScoredRecord, ScoringPipeline};
use crate::response::{BatchResponse, BatchRow, Envelope};
use crate::PipelineError;
use feature_engine::{FeatureError, RawInputRecord};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

const DEFAULT_CHUNK_SIZE: usize = 32;

/// Scores many records against one shared pipeline
pub struct BatchPredictor<B> {
    pipeline: Arc<ScoringPipeline<B>>,
    chunk_size: usize,
}

impl<B> Clone for BatchPredictor<B> {
    fn clone(&self) -> Self {
        Self {
            pipeline: Arc::clone(&self.pipeline),
            chunk_size: self.chunk_size,
        }
    }
}

impl<B: ModelBackend + ExplainerBackend + 'static> BatchPredictor<B> {
    /// Predictor over a shared pipeline
    pub fn new(pipeline: Arc<ScoringPipeline<B>>) -> Self {
        Self {
            pipeline,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Rows scored concurrently before waiting on the chunk
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Score already-parsed records
    pub async fn predict_records(&self, records: Vec<RawInputRecord>) -> BatchResponse {
        self.predict_rows(records.into_iter().map(Ok).collect()).await
    }

    /// Score parsed rows; rows that failed to parse are reported in place.
    ///
    /// Row tasks belong to a per-chunk `JoinSet`, so dropping this future
    /// aborts any backend call still in flight.
    pub async fn predict_rows(&self, rows: Vec<Result<RawInputRecord, FeatureError>>) -> BatchResponse {
        let total = rows.len();
        let mut results = Vec::with_capacity(total);
        let mut rows = rows.into_iter().enumerate().peekable();

        while rows.peek().is_some() {
            let mut slots: Vec<(usize, Option<Envelope<ScoredRecord>>)> = Vec::with_capacity(self.chunk_size);
            let mut running = JoinSet::new();

            for (index, row) in rows.by_ref().take(self.chunk_size) {
                let slot = slots.len();
                match row {
                    Ok(raw) => {
                        let pipeline = Arc::clone(&self.pipeline);
                        running.spawn(async move { (slot, pipeline.predict_envelope(&raw).await) });
                        slots.push((index, None));
                    }
                    Err(e) => slots.push((index, Some(Envelope::from_error(&PipelineError::from(e))))),
                }
            }

            while let Some(joined) = running.join_next().await {
                match joined {
                    Ok((slot, envelope)) => slots[slot].1 = Some(envelope),
                    Err(e) => warn!("Batch row task failed: {}", e),
                }
            }

            for (index, envelope) in slots {
                let envelope =
                    envelope.unwrap_or_else(|| Envelope::failure(format!("row {} could not be scored", index + 1)));
                results.push(BatchRow { index, envelope });
            }
            debug!("Batch progress: {}/{}", results.len(), total);
        }

        let response = BatchResponse::from_rows(results);
        info!(
            "Batch scored: {} rows, {} succeeded, {} failed",
            response.rows_processed, response.succeeded, response.failed
        );
        response
    }
}
