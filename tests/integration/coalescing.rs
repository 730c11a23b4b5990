//! Request coalescing across concurrent identical jobs
//!
//! Tests cover:
//! - One upstream call for N simultaneous identical jobs
//! - Cost attributed to the leader only
//! - Shared failures, and retries not blocked by a settled key

use super::test_utils::{job, wait_until, Harness, ScriptedProvider, Step, FALLBACK};
use render_worker::config::PipelineConfig;
use render_worker::error::ErrorKind;
use render_worker::processor::JobOutcome;
use render_worker::status::RenderResult;
use render_worker::types::TenantId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

fn roomy_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.tenant_limits = HashMap::from([("acme".to_string(), 8)]);
    config
}

fn spawn_identical(harness: &Harness, count: usize, prompt: &str) -> Vec<JoinHandle<JobOutcome>> {
    (0..count)
        .map(|i| {
            let processor = Arc::clone(&harness.processor);
            let job = job(&format!("job-{}", i), "acme", prompt);
            tokio::spawn(async move { processor.process(&job).await })
        })
        .collect()
}

#[tokio::test]
async fn test_identical_concurrent_jobs_share_one_generation() {
    let gate = Arc::new(Semaphore::new(0));
    let fallback = Arc::new(ScriptedProvider::succeeding(FALLBACK, 64).gated(gate.clone()));
    let harness = Harness::new(roomy_config(), None, fallback.clone(), Duration::from_secs(5));

    let handles = spawn_identical(&harness, 4, "weathered teak decking");
    let admission = harness.processor.admission();
    let acme = TenantId::new("acme");
    wait_until(|| fallback.calls() == 1 && admission.active_count(&acme) == 4).await;
    gate.add_permits(1);

    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap());
    }
    assert_eq!(fallback.calls(), 1, "exactly one upstream call");

    let mut composite_uris = Vec::new();
    let mut paid = 0;
    let mut coalesced_count = 0;
    for outcome in &outcomes {
        match &outcome.result {
            RenderResult::Success {
                artifacts,
                cost_tokens,
                coalesced,
                ..
            } => {
                composite_uris.push(artifacts.composite_uri.clone());
                if *cost_tokens > 0 {
                    paid += 1;
                }
                if *coalesced {
                    coalesced_count += 1;
                }
            }
            other => panic!("expected success, got {:?}", other),
        }
    }
    composite_uris.dedup();
    assert_eq!(composite_uris.len(), 1, "every caller sees the same artifacts");
    assert_eq!(paid, 1, "only the leader is charged");
    assert_eq!(coalesced_count, 3);
    assert_eq!(admission.active_count(&acme), 0);
}

#[tokio::test]
async fn test_coalesced_failure_reaches_every_waiter_and_clears_key() {
    let gate = Arc::new(Semaphore::new(0));
    let fallback = Arc::new(
        ScriptedProvider::succeeding(FALLBACK, 64)
            .then(&[Step::Fail])
            .gated(gate.clone()),
    );
    let harness = Harness::new(roomy_config(), None, fallback.clone(), Duration::from_secs(5));

    let handles = spawn_identical(&harness, 3, "cracked asphalt");
    let admission = harness.processor.admission();
    let acme = TenantId::new("acme");
    wait_until(|| fallback.calls() == 1 && admission.active_count(&acme) == 3).await;
    gate.add_permits(1);

    for handle in handles {
        let outcome = handle.await.unwrap();
        assert_eq!(outcome.error_kind(), Some(ErrorKind::ProviderError));
    }
    assert_eq!(fallback.calls(), 1);
    assert!(harness.processor.cache().is_empty());

    // A later attempt runs a fresh generation instead of waiting on the settled key.
    gate.add_permits(1);
    let retry = harness
        .processor
        .process(&job("job-0", "acme", "cracked asphalt"))
        .await;
    assert!(retry.is_success());
    assert_eq!(fallback.calls(), 2);
}

#[tokio::test]
async fn test_different_tenants_do_not_share_cache_entries() {
    let fallback = Arc::new(ScriptedProvider::succeeding(FALLBACK, 12));
    let harness = Harness::with_fallback(fallback.clone());

    let first = harness
        .processor
        .process(&job("job-a", "acme", "blue slate"))
        .await;
    let second = harness
        .processor
        .process(&job("job-b", "globex", "blue slate"))
        .await;

    assert!(first.is_success() && second.is_success());
    assert_eq!(fallback.calls(), 2);
}

#[tokio::test]
async fn test_map_flags_split_concurrent_generations() {
    let gate = Arc::new(Semaphore::new(0));
    let fallback = Arc::new(ScriptedProvider::succeeding(FALLBACK, 16).gated(gate.clone()));
    let harness = Harness::new(roomy_config(), None, fallback.clone(), Duration::from_secs(5));

    let plain = {
        let processor = Arc::clone(&harness.processor);
        let job = job("job-plain", "acme", "hammered brass");
        tokio::spawn(async move { processor.process(&job).await })
    };
    let textured = {
        let processor = Arc::clone(&harness.processor);
        let mut job = job("job-maps", "acme", "hammered brass");
        job.options.generate_normal_map = true;
        job.options.generate_roughness_map = true;
        tokio::spawn(async move { processor.process(&job).await })
    };
    wait_until(|| fallback.calls() == 2).await;
    gate.add_permits(2);

    let plain = plain.await.unwrap();
    let textured = textured.await.unwrap();
    assert_eq!(fallback.calls(), 2, "differing map flags never coalesce");
    assert_eq!(harness.processor.cache().len(), 2);

    match (plain.result, textured.result) {
        (
            RenderResult::Success {
                artifacts: plain, ..
            },
            RenderResult::Success {
                artifacts: textured,
                coalesced,
                cache_hit,
                ..
            },
        ) => {
            assert!(!coalesced && !cache_hit);
            assert!(plain.normal_map_uri.is_none());
            assert!(textured.normal_map_uri.is_some());
            assert!(textured.roughness_map_uri.is_some());
        }
        other => panic!("expected two successes, got {:?}", other),
    }
}
