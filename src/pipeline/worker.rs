//! Upload workers and the per-object retry state machine
//!
//! ```text
//!   Attempting ──ok──► Succeeded
//!       │
//!       └─err─► retryable and retries left? ──no──► FailedPermanently
//!                    │
//!                    yes ──► Retrying (sleep) ──► Attempting
//!                                 │
//!                                 └─ shutdown/abort ──► Abandoned
//! ```

use super::destination_path;
use super::progress::ProgressTracker;
use super::transfer::{Checksum, ObjectTransferer, TransferError};
use crate::config::FailurePolicy;
use crate::error::{MirrorError, Result};
use crate::size::{format_bps, redundant_size};
use crate::source::SourceObjectRef;
use mirror_core_resilience::RetryPolicy;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

/// Attempt bookkeeping for one object on one worker
#[derive(Debug, Default)]
pub struct RetryState {
    /// Attempts made so far
    pub attempt: u32,

    /// Error from the most recent failed attempt
    pub last_error: Option<TransferError>,
}

/// Terminal state of the retry state machine
#[derive(Debug)]
pub enum RetryOutcome {
    Succeeded {
        checksum: Checksum,
        attempts: u32,
        /// Duration of the successful attempt
        elapsed: Duration,
    },

    FailedPermanently {
        attempts: u32,
        error: TransferError,
    },

    /// A backoff sleep was cut short by shutdown or abort
    Abandoned {
        attempts: u32,
        error: Option<TransferError>,
    },
}

/// Run attempts for one object until it succeeds, runs out of retries, or is interrupted
///
/// Sleeps between attempts follow `policy`; there is no sleep after the final
/// attempt. Each failed attempt is logged with its number and duration.
pub async fn transfer_with_retry(
    transferer: &ObjectTransferer,
    policy: &RetryPolicy,
    object: &SourceObjectRef,
    path: &str,
    shutdown: &CancellationToken,
    abort: &CancellationToken,
) -> RetryOutcome {
    let mut state = RetryState::default();
    loop {
        state.attempt += 1;
        let start = Instant::now();

        let err = match transferer.transfer(object, path).await {
            Ok(checksum) => {
                return RetryOutcome::Succeeded {
                    checksum,
                    attempts: state.attempt,
                    elapsed: start.elapsed(),
                }
            }
            Err(err) => err,
        };

        error!(
            attempt = state.attempt,
            error = %err,
            elapsed = ?start.elapsed(),
            "upload attempt failed"
        );

        if !err.is_retryable() || !policy.should_retry(state.attempt) {
            return RetryOutcome::FailedPermanently {
                attempts: state.attempt,
                error: err,
            };
        }
        state.last_error = Some(err);

        let delay = policy.delay_for(state.attempt);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.cancelled() => {
                return RetryOutcome::Abandoned {
                    attempts: state.attempt,
                    error: state.last_error.take(),
                };
            }
            _ = abort.cancelled() => {
                return RetryOutcome::Abandoned {
                    attempts: state.attempt,
                    error: state.last_error.take(),
                };
            }
        }
    }
}

/// Per-worker totals
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSummary {
    pub transferred: u64,
    pub failed: u64,
    pub abandoned: u64,
}

/// One long-lived consumer of the work queue
pub(crate) struct Worker {
    pub id: usize,
    pub bucket: String,
    pub queue: async_channel::Receiver<SourceObjectRef>,
    pub transferer: Arc<ObjectTransferer>,
    pub policy: RetryPolicy,
    pub failure_policy: FailurePolicy,
    pub min_shards: u32,
    pub total_shards: u32,
    pub progress: Arc<ProgressTracker>,
    pub shutdown: CancellationToken,
    pub abort: CancellationToken,
}

impl Worker {
    /// Drain the queue until it closes or the pass is aborted
    pub async fn run(self) -> Result<WorkerSummary> {
        let span = info_span!("upload", worker = self.id);
        self.drain().instrument(span).await
    }

    async fn drain(self) -> Result<WorkerSummary> {
        let mut summary = WorkerSummary::default();
        loop {
            let object = tokio::select! {
                biased;
                _ = self.abort.cancelled() => break,
                next = self.queue.recv() => match next {
                    Ok(object) => object,
                    // Closed and empty: the producer is done
                    Err(_) => break,
                },
            };

            let path = destination_path(&self.bucket, &object.key);
            let span = info_span!("object", key = %object.key, path = %path, bytes = object.size);
            self.process(&object, &path, &mut summary)
                .instrument(span)
                .await?;
        }
        Ok(summary)
    }

    async fn process(
        &self,
        object: &SourceObjectRef,
        path: &str,
        summary: &mut WorkerSummary,
    ) -> Result<()> {
        info!("starting upload");
        let outcome = transfer_with_retry(
            &self.transferer,
            &self.policy,
            object,
            path,
            &self.shutdown,
            &self.abort,
        )
        .await;

        match outcome {
            RetryOutcome::Succeeded {
                checksum, elapsed, ..
            } => {
                let redundant = redundant_size(object.size, self.min_shards, self.total_shards);
                self.progress.record_transferred(object.size, redundant);
                summary.transferred += 1;
                info!(
                    redundant_bytes = redundant,
                    elapsed = ?elapsed,
                    speed = %format_bps(redundant, elapsed),
                    checksum = %checksum,
                    "upload complete"
                );
                self.progress.maybe_log();
                Ok(())
            }
            RetryOutcome::FailedPermanently { attempts, error } => match self.failure_policy {
                FailurePolicy::Skip => {
                    error!(attempts, error = %error, "upload failed, skipping object");
                    summary.failed += 1;
                    Ok(())
                }
                FailurePolicy::Abort => {
                    error!(attempts, error = %error, "upload failed");
                    self.abort.cancel();
                    Err(MirrorError::TransferFailed {
                        key: object.key.clone(),
                        attempts,
                        source: error,
                    })
                }
            },
            RetryOutcome::Abandoned { attempts, error } => {
                warn!(attempts, error = ?error, "upload abandoned");
                summary.abandoned += 1;
                Ok(())
            }
        }
    }
}
