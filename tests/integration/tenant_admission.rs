//! Tenant fairness through the full pipeline
//!
//! Tests cover:
//! - Limit of 2: the third simultaneous job is rejected, a fourth succeeds after release
//! - Per-tenant overrides and isolation between tenants
//! - Concurrent acquisition never exceeding the limit

use super::test_utils::{job, wait_until, Harness, ScriptedProvider, FALLBACK};
use render_worker::admission::TenantAdmissionController;
use render_worker::config::PipelineConfig;
use render_worker::error::{ErrorKind, RenderError};
use render_worker::processor::Disposition;
use render_worker::types::TenantId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

#[tokio::test]
async fn test_third_identical_job_is_rejected_until_a_slot_frees() {
    let gate = Arc::new(Semaphore::new(0));
    let fallback = Arc::new(ScriptedProvider::succeeding(FALLBACK, 16).gated(gate.clone()));
    let config = PipelineConfig {
        default_tenant_concurrency: 2,
        concurrency_retry_backoff_ms: 5_000,
        ..PipelineConfig::default()
    };
    let harness = Harness::new(config, None, fallback.clone(), Duration::from_secs(5));
    let acme = TenantId::new("acme");

    let handles: Vec<_> = (1..=2)
        .map(|i| {
            let processor = Arc::clone(&harness.processor);
            let job = job(&format!("job-{}", i), "acme", "riveted steel plate");
            tokio::spawn(async move { processor.process(&job).await })
        })
        .collect();
    let admission = harness.processor.admission();
    wait_until(|| admission.active_count(&acme) == 2 && fallback.calls() == 1).await;

    let third = harness
        .processor
        .process(&job("job-3", "acme", "riveted steel plate"))
        .await;
    assert_eq!(third.error_kind(), Some(ErrorKind::ConcurrencyLimitExceeded));
    assert_eq!(
        third.disposition,
        Disposition::Retry {
            after: Duration::from_millis(5_000)
        }
    );
    assert_eq!(admission.active_count(&acme), 2, "rejection leaves the counter alone");

    gate.add_permits(1);
    for handle in handles {
        assert!(handle.await.unwrap().is_success());
    }
    assert_eq!(admission.active_count(&acme), 0);

    let fourth = harness
        .processor
        .process(&job("job-4", "acme", "riveted steel plate"))
        .await;
    assert!(fourth.is_success());
    assert_eq!(fallback.calls(), 1, "the fourth job is served from cache");
}

#[tokio::test]
async fn test_tenant_override_and_isolation() {
    let gate = Arc::new(Semaphore::new(0));
    let fallback = Arc::new(ScriptedProvider::succeeding(FALLBACK, 16).gated(gate.clone()));
    let config = PipelineConfig {
        default_tenant_concurrency: 1,
        tenant_limits: HashMap::from([("enterprise".to_string(), 3)]),
        ..PipelineConfig::default()
    };
    let harness = Harness::new(config, None, fallback.clone(), Duration::from_secs(5));

    let busy = {
        let processor = Arc::clone(&harness.processor);
        let job = job("small-1", "small", "sandstone");
        tokio::spawn(async move { processor.process(&job).await })
    };
    let small = TenantId::new("small");
    let admission = harness.processor.admission();
    wait_until(|| admission.active_count(&small) == 1).await;

    let rejected = harness
        .processor
        .process(&job("small-2", "small", "limestone"))
        .await;
    assert_eq!(rejected.error_kind(), Some(ErrorKind::ConcurrencyLimitExceeded));

    // Another tenant's quota is untouched by the saturated one.
    gate.add_permits(3);
    let enterprise = harness
        .processor
        .process(&job("ent-1", "enterprise", "limestone"))
        .await;
    assert!(enterprise.is_success());
    assert!(busy.await.unwrap().is_success());
}

#[test]
fn test_concurrent_acquires_never_exceed_limit() {
    let controller = Arc::new(TenantAdmissionController::in_memory(Duration::from_secs(3600)));
    let tenant = TenantId::new("acme");
    let peak = Arc::new(AtomicU32::new(0));
    let rejected = Arc::new(AtomicU32::new(0));

    std::thread::scope(|scope| {
        for _ in 0..16 {
            let controller = Arc::clone(&controller);
            let tenant = tenant.clone();
            let peak = Arc::clone(&peak);
            let rejected = Arc::clone(&rejected);
            scope.spawn(move || {
                for _ in 0..200 {
                    match controller.acquire_slot(&tenant, 3) {
                        Ok(slot) => {
                            peak.fetch_max(controller.active_count(&tenant), Ordering::SeqCst);
                            drop(slot);
                        }
                        Err(RenderError::ConcurrencyLimitExceeded { limit, .. }) => {
                            assert_eq!(limit, 3);
                            rejected.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(other) => panic!("unexpected error {:?}", other),
                    }
                }
            });
        }
    });

    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(controller.active_count(&tenant), 0);
}
