//! Status store behaviour seen through the processor
//!
//! Tests cover:
//! - Redelivery of a completed job: no provider call, no second event
//! - Identical terminal writes reported as unchanged
//! - Failed records superseded by a later success

use super::test_utils::{job, Harness, ScriptedProvider, Step, FALLBACK};
use render_worker::processor::Disposition;
use render_worker::status::{JobStatus, StatusStore, TerminalWrite};
use render_worker::types::JobId;
use std::sync::Arc;

#[tokio::test]
async fn test_redelivered_completed_job_is_acked_without_side_effects() {
    let fallback = Arc::new(ScriptedProvider::succeeding(FALLBACK, 12));
    let mut harness = Harness::with_fallback(fallback.clone());

    let first = harness.processor.process(&job("job-1", "acme", "oak veneer")).await;
    assert!(first.is_success());
    let stored = harness.status.get(&JobId::new("job-1")).unwrap().unwrap();

    let mut again = job("job-1", "acme", "oak veneer");
    again.attempt = 2;
    let second = harness.processor.process(&again).await;

    assert!(second.is_success());
    assert_eq!(second.disposition, Disposition::Ack);
    assert_eq!(fallback.calls(), 1);
    assert_eq!(harness.drain_events().len(), 1, "one event for the first run only");

    let after = harness.status.get(&JobId::new("job-1")).unwrap().unwrap();
    assert_eq!(after.completed_at, stored.completed_at);
    assert_eq!(after.artifacts, stored.artifacts);
}

#[tokio::test]
async fn test_identical_terminal_write_is_unchanged() {
    let fallback = Arc::new(ScriptedProvider::succeeding(FALLBACK, 12));
    let harness = Harness::with_fallback(fallback);

    harness.processor.process(&job("job-1", "acme", "walnut")).await;
    let record = harness.status.get(&JobId::new("job-1")).unwrap().unwrap();

    assert_eq!(
        harness.status.write_terminal(&record).unwrap(),
        TerminalWrite::Unchanged
    );
    assert!(!harness.status.mark_processing(&record).unwrap());
}

#[tokio::test]
async fn test_failed_record_is_superseded_by_later_success() {
    let fallback = Arc::new(ScriptedProvider::succeeding(FALLBACK, 12).then(&[Step::Fail]));
    let harness = Harness::with_fallback(fallback);

    let first = harness.processor.process(&job("job-1", "acme", "birch")).await;
    assert!(matches!(first.disposition, Disposition::Retry { .. }));
    let failed = harness.status.get(&JobId::new("job-1")).unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.metadata.retryable, Some(true));

    let mut retry = job("job-1", "acme", "birch");
    retry.attempt = 2;
    assert!(harness.processor.process(&retry).await.is_success());

    let completed = harness.status.get(&JobId::new("job-1")).unwrap().unwrap();
    assert_eq!(completed.status, JobStatus::Completed);
    assert_eq!(completed.attempt, 2);
    assert!(completed.metadata.error_kind.is_none());
}
