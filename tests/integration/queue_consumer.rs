//! Queue consumer driving the processor
//!
//! Tests cover:
//! - Draining a mixed batch with malformed payloads dead-lettered at the boundary
//! - Retryable failures redelivered and completed on a later attempt
//! - Graceful stop

use super::test_utils::{job, Harness, ScriptedProvider, Step, FALLBACK};
use render_worker::config::PipelineConfig;
use render_worker::queue::{JobSource, MemoryJobQueue, QueueConsumer};
use render_worker::status::{JobStatus, StatusStore};
use render_worker::types::JobId;
use std::sync::Arc;
use std::time::Duration;

fn consumer(harness: &Harness, queue: &Arc<MemoryJobQueue>, workers: usize) -> QueueConsumer {
    let source: Arc<dyn JobSource> = queue.clone();
    QueueConsumer::new(source, Arc::clone(&harness.processor), workers)
}

#[tokio::test]
async fn test_consumer_drains_batch_and_dead_letters_malformed_payloads() {
    let fallback = Arc::new(ScriptedProvider::succeeding(FALLBACK, 10));
    let config = PipelineConfig {
        default_tenant_concurrency: 4,
        ..PipelineConfig::default()
    };
    let mut harness = Harness::new(config, None, fallback, Duration::from_secs(5));
    let queue = Arc::new(MemoryJobQueue::new());

    for i in 0..3 {
        queue
            .push_job(&job(&format!("job-{}", i), "acme", &format!("slate {}", i)))
            .unwrap();
    }
    queue.push(b"{\"type\":\"texture-render.v1\",\"jobId\":\"\"}".to_vec());

    let consumer = consumer(&harness, &queue, 2);
    consumer.start();
    consumer
        .wait_for_idle(Some(Duration::from_secs(10)))
        .await
        .unwrap();
    consumer.stop().await;

    let stats = consumer.stats();
    assert_eq!(stats.completed, 3);
    assert_eq!(stats.dead_lettered, 1);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.processing, 0);

    assert_eq!(queue.acked(), 3);
    let dead = queue.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(harness.drain_events().len(), 3, "no event for a rejected payload");
}

#[tokio::test]
async fn test_retryable_failure_is_redelivered_and_completes() {
    let fallback = Arc::new(ScriptedProvider::succeeding(FALLBACK, 10).then(&[Step::Fail]));
    let config = PipelineConfig {
        failure_retry_backoff_ms: 10,
        ..PipelineConfig::default()
    };
    let mut harness = Harness::new(config, None, fallback.clone(), Duration::from_secs(5));
    let queue = Arc::new(MemoryJobQueue::new());
    queue.push_job(&job("job-1", "acme", "travertine")).unwrap();

    let consumer = consumer(&harness, &queue, 1);
    consumer.start();
    consumer
        .wait_for_idle(Some(Duration::from_secs(10)))
        .await
        .unwrap();
    consumer.stop().await;

    let stats = consumer.stats();
    assert_eq!(stats.retried, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(fallback.calls(), 2);

    let record = harness.status.get(&JobId::new("job-1")).unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.attempt, 2);

    let names: Vec<_> = harness
        .drain_events()
        .iter()
        .map(|e| e.event.name())
        .collect();
    assert_eq!(names, vec!["render.failed", "render.completed"]);
}

#[tokio::test]
async fn test_stop_without_work_returns() {
    let harness = Harness::with_fallback(Arc::new(ScriptedProvider::succeeding(FALLBACK, 1)));
    let queue = Arc::new(MemoryJobQueue::new());
    let consumer = consumer(&harness, &queue, 3);

    consumer.start();
    consumer.start();
    consumer.stop().await;
    assert_eq!(consumer.stats(), Default::default());
}
