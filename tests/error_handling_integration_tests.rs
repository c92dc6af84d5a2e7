/*!
 * Integration tests for failure handling
 *
 * These tests simulate endpoint failures to verify:
 * - Retry exhaustion under the abort and skip policies
 * - Fatal listing and existence-check errors
 * - Exit codes and error categories
 */

use renterd_mirror::{
    config::{BackoffConfig, FailurePolicy, PipelineConfig},
    destination::{DestinationError, UploadOptions},
    error::{ErrorCategory, MirrorError, EXIT_FATAL, EXIT_PARTIAL},
    pipeline::{Mirror, TransferError},
    source::SourceError,
    testing::{MemoryDestination, MemorySource},
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn mirror(
    source: &MemorySource,
    destination: &MemoryDestination,
    pipeline: PipelineConfig,
) -> Mirror {
    Mirror::with_options(
        Arc::new(source.clone()),
        Arc::new(destination.clone()),
        UploadOptions {
            contract_set: "autopilot".to_string(),
            min_shards: 1,
            total_shards: 3,
        },
        pipeline,
    )
}

fn pipeline(policy: FailurePolicy, attempts: u32) -> PipelineConfig {
    PipelineConfig {
        workers: 1,
        queue_capacity: Some(1),
        failure_policy: policy,
        backoff: BackoffConfig::Fixed {
            max_attempts: attempts,
            delay_secs: 1,
        },
        progress_interval_secs: 3600,
        read_buffer_size: 1024,
        ..Default::default()
    }
}

fn bucket_with(keys: &[&str]) -> MemorySource {
    let source = MemorySource::new("bucket");
    for key in keys {
        source.insert(*key, key.as_bytes().to_vec());
    }
    source
}

#[tokio::test(start_paused = true)]
async fn test_default_policy_retries_ten_times_then_aborts() {
    let source = bucket_with(&["doomed"]);
    let destination = MemoryDestination::new();
    destination.fail_uploads("bucket/doomed", u32::MAX);

    let err = mirror(&source, &destination, PipelineConfig::default())
        .run(CancellationToken::new())
        .await
        .unwrap_err();

    match &err {
        MirrorError::TransferFailed {
            key,
            attempts,
            source,
        } => {
            assert_eq!(key, "doomed");
            assert_eq!(*attempts, 10);
            assert!(matches!(source, TransferError::Upload { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.exit_code(), EXIT_FATAL);
    assert_eq!(err.category(), ErrorCategory::Retry);
    assert_eq!(destination.upload_count(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_abort_stops_remaining_work() {
    let source = bucket_with(&["a", "b", "c", "d", "e", "f"]);
    let destination = MemoryDestination::new();
    destination.fail_uploads("bucket/a", u32::MAX);

    let err = mirror(&source, &destination, pipeline(FailurePolicy::Abort, 2))
        .run(CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, MirrorError::TransferFailed { attempts: 2, .. }));
    assert_eq!(destination.upload_count(), 2);
    assert_eq!(destination.object_count(), 0);
    assert!(source.read_calls() <= 2);
}

#[tokio::test(start_paused = true)]
async fn test_skip_policy_continues_and_reports_partial() {
    let source = bucket_with(&["a", "b", "c"]);
    let destination = MemoryDestination::new();
    destination.fail_uploads("bucket/b", u32::MAX);

    let report = mirror(&source, &destination, pipeline(FailurePolicy::Skip, 3))
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.transferred, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.counters.objects_completed, 2);
    assert!(destination.get("bucket/a").is_some());
    assert!(destination.get("bucket/b").is_none());
    assert!(destination.get("bucket/c").is_some());

    let err = report.into_result().unwrap_err();
    assert!(matches!(err, MirrorError::PartialFailure { failed: 1 }));
    assert_eq!(err.exit_code(), EXIT_PARTIAL);
}

#[tokio::test(start_paused = true)]
async fn test_changed_object_fails_without_retrying() {
    let source = bucket_with(&["a", "grew", "z"]);
    source.insert("grew", vec![7; 120]);
    source.set_listed_size("grew", 100);
    let destination = MemoryDestination::new();
    let started = tokio::time::Instant::now();

    let err = mirror(&source, &destination, PipelineConfig::default())
        .run(CancellationToken::new())
        .await
        .unwrap_err();

    match &err {
        MirrorError::TransferFailed {
            key,
            attempts,
            source,
        } => {
            assert_eq!(key, "grew");
            assert_eq!(*attempts, 1);
            assert!(matches!(
                source,
                TransferError::SizeMismatch {
                    expected: 100,
                    actual: 120,
                    ..
                }
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(started.elapsed() < Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn test_changed_object_skipped_under_skip_policy() {
    let source = bucket_with(&["a", "grew", "z"]);
    source.insert("grew", vec![7; 120]);
    source.set_listed_size("grew", 100);
    let destination = MemoryDestination::new();

    let report = mirror(&source, &destination, pipeline(FailurePolicy::Skip, 10))
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.transferred, 2);
    assert_eq!(destination.upload_count(), 3);
    assert!(destination.get("bucket/z").is_some());
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_recover() {
    let source = bucket_with(&["a", "b"]);
    let destination = MemoryDestination::new();
    destination.fail_uploads("bucket/a", 4);
    source.fail_reads_after("b", 1, 2);

    let report = mirror(&source, &destination, PipelineConfig {
        workers: 2,
        ..pipeline(FailurePolicy::Abort, 10)
    })
    .run(CancellationToken::new())
    .await
    .unwrap();

    assert_eq!(report.transferred, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(destination.get("bucket/a").unwrap(), b"a".to_vec());
    assert_eq!(destination.get("bucket/b").unwrap(), b"b".to_vec());
}

#[tokio::test]
async fn test_indeterminate_existence_is_fatal() {
    let source = bucket_with(&["a", "b", "c"]);
    let destination = MemoryDestination::new();
    destination.fail_lookups(
        "bucket/b",
        DestinationError::other("object", "500 Internal Server Error"),
    );

    let err = mirror(&source, &destination, pipeline(FailurePolicy::Skip, 3))
        .run(CancellationToken::new())
        .await
        .unwrap_err();

    match &err {
        MirrorError::ExistenceIndeterminate { path, .. } => assert_eq!(path, "bucket/b"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.exit_code(), EXIT_FATAL);
    assert!(destination.get("bucket/c").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_existence_timeout_is_fatal() {
    let source = bucket_with(&["a"]);
    let destination = MemoryDestination::new();
    destination.stall_lookups();

    let err = mirror(&source, &destination, pipeline(FailurePolicy::Abort, 3))
        .run(CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, MirrorError::ExistenceIndeterminate { .. }));
    assert_eq!(err.category(), ErrorCategory::Destination);
}

#[tokio::test]
async fn test_listing_failure_is_fatal() {
    let source = bucket_with(&["a"]);
    source.fail_listing(SourceError::other("list_objects_v2", "AccessDenied"));
    let destination = MemoryDestination::new();

    let err = mirror(&source, &destination, pipeline(FailurePolicy::Abort, 3))
        .run(CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, MirrorError::Listing { .. }));
    assert_eq!(err.exit_code(), EXIT_FATAL);
    assert_eq!(err.category(), ErrorCategory::Source);
    assert_eq!(destination.lookup_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_abandons_object_in_backoff() {
    let source = bucket_with(&["a"]);
    let destination = MemoryDestination::new();
    destination.fail_uploads("bucket/a", u32::MAX);
    let shutdown = CancellationToken::new();

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(45)).await;
        trigger.cancel();
    });

    let mut config = pipeline(FailurePolicy::Abort, 10);
    config.backoff = BackoffConfig::Fixed {
        max_attempts: 10,
        delay_secs: 30,
    };
    let report = mirror(&source, &destination, config)
        .run(shutdown)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.abandoned, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.counters.objects_completed, 0);
    assert_eq!(destination.upload_count(), 2);
}
