//! Mirror pipeline: listing, existence checks, bounded queue, upload workers
//!
//! ```text
//!   ObjectSource ──list──► producer ──check──► ExistenceChecker
//!                             │                     │
//!                             │ absent              └─ present: count + skip
//!                             ▼
//!                 async_channel::bounded(capacity)
//!                    │        │        │
//!                 worker 1 worker 2 … worker N ──► ObjectTransferer ──► Destination
//!                    │        │        │
//!                    └────────┴────────┴──► ProgressTracker ──► throttled log
//! ```
//!
//! The producer blocks when the queue is full, so at most `capacity + workers`
//! objects are between listing and completion at any time. Closing the queue is
//! the only shutdown signal workers need: they finish what is queued and exit.
//! A fatal error instead cancels an internal abort token, after which workers
//! finish their in-flight object and stop dequeuing.

pub mod existence;
pub mod progress;
pub mod transfer;
pub mod worker;

pub use existence::{AbsentReason, Existence, ExistenceChecker};
pub use progress::{ProgressCounters, ProgressTracker};
pub use transfer::{Checksum, ObjectTransferer, TransferError, TransferResult};
pub use worker::{transfer_with_retry, RetryOutcome, RetryState, WorkerSummary};

use crate::config::{MirrorConfig, PipelineConfig};
use crate::destination::{Destination, UploadOptions};
use crate::error::{MirrorError, Result};
use crate::size::redundant_size;
use crate::source::{ObjectSource, SourceObjectRef};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use worker::Worker;

/// Destination path for a source object: `bucket/key`, lexically cleaned
///
/// Empty and `.` segments are dropped and `..` removes the previous key
/// segment. The bucket prefix is never removed, so a key cannot address an
/// object outside its bucket. The result has no leading or trailing slash.
pub fn destination_path(bucket: &str, key: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    push_clean(&mut segments, bucket, 0);
    let floor = segments.len();
    push_clean(&mut segments, key, floor);
    segments.join("/")
}

fn push_clean<'a>(segments: &mut Vec<&'a str>, path: &'a str, floor: usize) {
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.len() > floor {
                    segments.pop();
                }
            }
            segment => segments.push(segment),
        }
    }
}

/// Totals for one mirror pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorReport {
    /// Objects taken from the listing and classified
    pub listed: u64,

    /// Objects already present at the destination
    pub skipped_existing: u64,

    /// Objects handed to the workers
    pub queued: u64,

    /// Objects uploaded during this pass
    pub transferred: u64,

    /// Objects that exhausted their retries under the skip policy
    pub failed: u64,

    /// Objects dropped mid-backoff by shutdown
    pub abandoned: u64,

    /// Whether the pass stopped early on an external shutdown
    pub cancelled: bool,

    /// Progress counters at the end of the pass
    pub counters: ProgressCounters,

    pub elapsed: Duration,
}

impl MirrorReport {
    /// Convert a pass with skipped failures into an error
    pub fn into_result(self) -> Result<Self> {
        if self.failed > 0 {
            Err(MirrorError::PartialFailure {
                failed: self.failed,
            })
        } else {
            Ok(self)
        }
    }
}

#[derive(Debug, Default)]
struct ProducerSummary {
    listed: u64,
    skipped_existing: u64,
    queued: u64,
}

/// What stopped the producer while it was waiting
enum Step<T> {
    Ready(T),
    Stopped,
}

async fn until_stopped<F: std::future::Future>(
    future: F,
    shutdown: &CancellationToken,
    abort: &CancellationToken,
) -> Step<F::Output> {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => Step::Stopped,
        _ = abort.cancelled() => Step::Stopped,
        output = future => Step::Ready(output),
    }
}

/// Orchestrates one pass over the source bucket
pub struct Mirror {
    source: Arc<dyn ObjectSource>,
    destination: Arc<dyn Destination>,
    options: UploadOptions,
    pipeline: PipelineConfig,
    progress: Arc<ProgressTracker>,
}

impl Mirror {
    pub fn new(
        source: Arc<dyn ObjectSource>,
        destination: Arc<dyn Destination>,
        config: &MirrorConfig,
    ) -> Self {
        Self::with_options(
            source,
            destination,
            config.destination.upload_options(),
            config.pipeline.clone(),
        )
    }

    pub fn with_options(
        source: Arc<dyn ObjectSource>,
        destination: Arc<dyn Destination>,
        options: UploadOptions,
        pipeline: PipelineConfig,
    ) -> Self {
        let progress = Arc::new(ProgressTracker::new(pipeline.progress_interval()));
        Self {
            source,
            destination,
            options,
            pipeline,
            progress,
        }
    }

    /// Shared progress counters
    pub fn progress(&self) -> Arc<ProgressTracker> {
        Arc::clone(&self.progress)
    }

    /// Run one full pass
    ///
    /// Returns once the listing is exhausted (or `shutdown` fires) and every
    /// queued object has been handled. Objects that fail permanently under the
    /// skip policy are reported in [`MirrorReport::failed`], not as an error.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<MirrorReport> {
        let started = Instant::now();
        let bucket = self.source.bucket().to_string();
        let capacity = self.pipeline.queue_capacity().max(1);
        let workers = self.pipeline.workers.max(1);
        let policy = self.pipeline.retry_policy();

        info!(
            bucket = %bucket,
            workers,
            queue_capacity = capacity,
            verify = self.pipeline.verify_uploads,
            max_attempts = ?policy.max_attempts,
            max_retry_wait = ?policy.max_total_delay(),
            "starting mirror"
        );

        let (tx, rx) = async_channel::bounded::<SourceObjectRef>(capacity);
        let abort = CancellationToken::new();
        let transferer = Arc::new(
            ObjectTransferer::new(
                Arc::clone(&self.source),
                Arc::clone(&self.destination),
                self.options.clone(),
                self.pipeline.read_buffer_size,
            )
            .with_verification(self.pipeline.verify_uploads),
        );

        let handles: Vec<JoinHandle<Result<WorkerSummary>>> = (1..=workers)
            .map(|id| {
                let worker = Worker {
                    id,
                    bucket: bucket.clone(),
                    queue: rx.clone(),
                    transferer: Arc::clone(&transferer),
                    policy: policy.clone(),
                    failure_policy: self.pipeline.failure_policy,
                    min_shards: self.options.min_shards,
                    total_shards: self.options.total_shards,
                    progress: Arc::clone(&self.progress),
                    shutdown: shutdown.clone(),
                    abort: abort.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();
        drop(rx);

        let reporter_done = CancellationToken::new();
        let reporter = self.spawn_reporter(reporter_done.clone());

        let checker = ExistenceChecker::new(
            Arc::clone(&self.destination),
            self.pipeline.existence_timeout(),
            self.pipeline.degraded_health_threshold,
        );
        let produced = self
            .produce(&bucket, &checker, tx, &shutdown, &abort)
            .instrument(info_span!("listing", bucket = %bucket))
            .await;
        if produced.is_err() {
            abort.cancel();
        }

        let mut fatal: Option<MirrorError> = None;
        let mut totals = WorkerSummary::default();
        for handle in handles {
            match handle.await {
                Ok(Ok(summary)) => {
                    totals.transferred += summary.transferred;
                    totals.failed += summary.failed;
                    totals.abandoned += summary.abandoned;
                }
                Ok(Err(err)) => {
                    fatal.get_or_insert(err);
                }
                Err(join_err) => {
                    abort.cancel();
                    fatal.get_or_insert(MirrorError::from(join_err));
                }
            }
        }

        reporter_done.cancel();
        if let Some(reporter) = reporter {
            let _ = reporter.await;
        }

        let producer = match produced {
            Ok(summary) => summary,
            Err(err) => {
                error!(error = %err, category = %err.category(), "mirror aborted");
                return Err(err);
            }
        };
        if let Some(err) = fatal {
            error!(error = %err, category = %err.category(), "mirror aborted");
            return Err(err);
        }

        let report = MirrorReport {
            listed: producer.listed,
            skipped_existing: producer.skipped_existing,
            queued: producer.queued,
            transferred: totals.transferred,
            failed: totals.failed,
            abandoned: totals.abandoned,
            cancelled: shutdown.is_cancelled(),
            counters: self.progress.snapshot(),
            elapsed: started.elapsed(),
        };

        info!(
            listed = report.listed,
            skipped = report.skipped_existing,
            transferred = report.transferred,
            failed = report.failed,
            abandoned = report.abandoned,
            cancelled = report.cancelled,
            elapsed = ?report.elapsed,
            "mirror complete"
        );
        Ok(report)
    }

    /// List the bucket and feed absent objects to the queue
    ///
    /// Dropping `tx` on return closes the queue.
    async fn produce(
        &self,
        bucket: &str,
        checker: &ExistenceChecker,
        tx: async_channel::Sender<SourceObjectRef>,
        shutdown: &CancellationToken,
        abort: &CancellationToken,
    ) -> Result<ProducerSummary> {
        let mut summary = ProducerSummary::default();
        let mut continuation: Option<String> = None;

        loop {
            let page = match until_stopped(
                self.source.list_page(continuation.take()),
                shutdown,
                abort,
            )
            .await
            {
                Step::Ready(page) => page.map_err(|source| {
                    error!(error = %source, "failed to list objects");
                    MirrorError::Listing {
                        bucket: bucket.to_string(),
                        source,
                    }
                })?,
                Step::Stopped => break,
            };
            debug!(objects = page.objects.len(), "listed page");

            for object in page.objects {
                let path = destination_path(bucket, &object.key);
                let existence = match until_stopped(checker.check(&path), shutdown, abort).await {
                    Step::Ready(existence) => existence,
                    Step::Stopped => return Ok(summary),
                };
                summary.listed += 1;

                match existence {
                    Existence::Present(_) => {
                        let redundant = redundant_size(
                            object.size,
                            self.options.min_shards,
                            self.options.total_shards,
                        );
                        let counters = self.progress.record_skipped_existing(redundant);
                        summary.skipped_existing += 1;
                        info!(
                            path = %path,
                            objects = counters.objects_completed,
                            total_bytes = counters.redundant_bytes_total,
                            "skipping existing object"
                        );
                    }
                    Existence::Absent(reason) => {
                        debug!(path = %path, reason = ?reason, "queueing object");
                        match until_stopped(tx.send(object), shutdown, abort).await {
                            Step::Ready(Ok(())) => summary.queued += 1,
                            // Every worker is gone; nothing left to feed
                            Step::Ready(Err(_)) => return Ok(summary),
                            Step::Stopped => return Ok(summary),
                        }
                    }
                    Existence::Indeterminate(source) => {
                        error!(path = %path, error = %source, "failed to check object existence");
                        return Err(MirrorError::ExistenceIndeterminate { path, source });
                    }
                }
            }

            match page.next {
                Some(next) => continuation = Some(next),
                None => break,
            }
        }

        if shutdown.is_cancelled() {
            warn!("shutdown requested, listing stopped");
        }
        Ok(summary)
    }

    fn spawn_reporter(&self, done: CancellationToken) -> Option<JoinHandle<()>> {
        let interval = self.pipeline.progress_interval();
        if interval.is_zero() {
            return None;
        }

        let progress = Arc::clone(&self.progress);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = done.cancelled() => break,
                    _ = ticker.tick() => {
                        progress.maybe_log();
                    }
                }
            }
        }))
    }
}
