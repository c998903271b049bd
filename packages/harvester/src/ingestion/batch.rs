//! Batch submission of a finished job's records.
//!
//! Records go out in fixed-size chunks. Every record in a chunk is delivered
//! concurrently and the whole chunk settles before the next one starts, with
//! a pacing delay in between. Per-record failures are logged and counted,
//! never retried.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::HarvestConfig;
use crate::error::{HarvestError, Result};
use crate::traits::ingestion::IngestionEndpoint;
use crate::types::record::Record;

/// What happened during one submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionReport {
    /// Size of every chunk dispatched, in order.
    pub batch_sizes: Vec<usize>,
    pub delivered: usize,
    pub failed: usize,
}

impl SubmissionReport {
    pub fn batches(&self) -> usize {
        self.batch_sizes.len()
    }

    pub fn attempted(&self) -> usize {
        self.delivered + self.failed
    }
}

/// Delivers records to an [`IngestionEndpoint`] in paced chunks.
#[derive(Clone)]
pub struct BatchSubmitter {
    endpoint: Arc<dyn IngestionEndpoint>,
    batch_size: usize,
    batch_delay: Duration,
}

impl BatchSubmitter {
    pub fn new(endpoint: Arc<dyn IngestionEndpoint>) -> Self {
        let defaults = HarvestConfig::default();
        Self {
            endpoint,
            batch_size: defaults.batch_size,
            batch_delay: defaults.batch_delay,
        }
    }

    pub fn from_config(endpoint: Arc<dyn IngestionEndpoint>, config: &HarvestConfig) -> Self {
        Self::new(endpoint)
            .with_batch_size(config.batch_size)
            .with_batch_delay(config.batch_delay)
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    /// Attempt delivery of every record.
    ///
    /// Succeeds once every chunk has been attempted, whatever the individual
    /// outcomes. Fails only when submission cannot run at all (zero batch
    /// size, failed preflight) or with [`HarvestError::Cancelled`] if `cancel`
    /// fires before the next chunk is dispatched.
    pub async fn submit(
        &self,
        records: &[Record],
        cancel: &CancellationToken,
    ) -> Result<SubmissionReport> {
        if self.batch_size == 0 {
            return Err(HarvestError::Config("batch size must be at least 1".into()));
        }
        self.endpoint.preflight().await?;

        let total_batches = records.len().div_ceil(self.batch_size);
        let mut report = SubmissionReport::default();

        for (index, chunk) in records.chunks(self.batch_size).enumerate() {
            if index > 0 && !self.batch_delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(HarvestError::Cancelled),
                    _ = tokio::time::sleep(self.batch_delay) => {}
                }
            }
            if cancel.is_cancelled() {
                return Err(HarvestError::Cancelled);
            }

            debug!(
                batch = index + 1,
                total_batches,
                size = chunk.len(),
                "Submitting batch"
            );

            let futures: Vec<_> = chunk
                .iter()
                .map(|record| self.endpoint.deliver(record))
                .collect();

            for (record, result) in chunk.iter().zip(join_all(futures).await) {
                match result {
                    Ok(receipt) => {
                        debug!(record_id = ?record.id, status = receipt.status, "Record delivered");
                        report.delivered += 1;
                    }
                    Err(e) => {
                        warn!(
                            record_id = ?record.id,
                            error = %e,
                            "Failed to deliver record, skipping"
                        );
                        report.failed += 1;
                    }
                }
            }
            report.batch_sizes.push(chunk.len());
        }

        info!(
            batches = report.batches(),
            delivered = report.delivered,
            failed = report.failed,
            "Submission complete"
        );

        Ok(report)
    }
}
