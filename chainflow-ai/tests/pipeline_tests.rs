//! End-to-end pipeline tests against a temporary SQLite store and a scripted
//! inference endpoint

mod helpers;

use chainflow_ai::db::messages::count_by_status;
use chainflow_ai::db::PhaseStore;
use chainflow_ai::error::InferenceError;
use chainflow_ai::services::RuleExtractor;
use chainflow_ai::types::{Chain, MessageStatus, Phase, ResultSource};
use chainflow_ai::workflow::ManualClock;
use chainflow_ai::{Pipeline, PipelineError};
use helpers::*;
use std::sync::Arc;
use std::time::Duration;

fn timeout() -> Result<String, InferenceError> {
    Err(InferenceError::Timeout(120_000))
}

#[tokio::test]
async fn test_complete_chain_runs_three_phases() {
    let (_dir, store) = temp_store().await;
    let connector = Arc::new(ScriptedConnector::always(Ok(GOOD_JSON.to_string())));
    let pipeline = Pipeline::new(test_config(), store.clone(), connector.clone()).unwrap();

    let summary = pipeline.run_batch(vec![complete_chain("c1")]).await.unwrap();

    assert_eq!(summary.complete_chains, 1);
    assert_eq!(summary.messages_completed, 2);
    assert_eq!(summary.messages_parked, 0);
    assert!(!summary.drained_by_shutdown);
    // Phases 2 and 3 per message
    assert_eq!(connector.calls(), 4);

    for id in ["c1-m1", "c1-m2"] {
        let phase1 = store.get_phase_result(id, Phase::One).await.unwrap().unwrap();
        assert_eq!(phase1.source, ResultSource::RuleBased);

        for phase in [Phase::Two, Phase::Three] {
            let result = store.get_phase_result(id, phase).await.unwrap().unwrap();
            assert_eq!(result.source, ResultSource::Generated);
            assert_eq!(result.quality_score, Some(10.0));
        }

        let state = store.load_message_state(id).await.unwrap().unwrap();
        assert_eq!(state.status, MessageStatus::Done);
        assert_eq!(state.current_phase, Some(Phase::Three));
        assert_eq!(state.assigned_phases, vec![Phase::One, Phase::Two, Phase::Three]);
    }
}

#[tokio::test]
async fn test_incomplete_chain_skips_phase_three() {
    let (_dir, store) = temp_store().await;
    let connector = Arc::new(ScriptedConnector::always(Ok(GOOD_JSON.to_string())));
    let pipeline = Pipeline::new(test_config(), store.clone(), connector.clone()).unwrap();

    let summary = pipeline.run_batch(vec![incomplete_chain("c2")]).await.unwrap();

    assert_eq!(summary.complete_chains, 0);
    assert_eq!(summary.messages_completed, 1);
    assert_eq!(connector.calls(), 1);

    assert!(store.get_phase_result("c2-m1", Phase::One).await.unwrap().is_some());
    assert!(store.get_phase_result("c2-m1", Phase::Two).await.unwrap().is_some());
    assert!(store.get_phase_result("c2-m1", Phase::Three).await.unwrap().is_none());

    let state = store.load_message_state("c2-m1").await.unwrap().unwrap();
    assert_eq!(state.status, MessageStatus::Done);
    assert_eq!(state.assigned_phases, vec![Phase::One, Phase::Two]);
}

#[tokio::test]
async fn test_mixed_batch_plans_phase_three_only_for_complete_chains() {
    let (_dir, store) = temp_store().await;
    let connector = Arc::new(ScriptedConnector::always(Ok(GOOD_JSON.to_string())));
    let pipeline = Pipeline::new(test_config(), store.clone(), connector.clone()).unwrap();

    let summary = pipeline
        .run_batch(vec![complete_chain("a"), incomplete_chain("b"), incomplete_chain("c")])
        .await
        .unwrap();

    assert_eq!(summary.chains, 3);
    assert_eq!(summary.messages, 4);
    assert_eq!(summary.messages_completed, 4);
    // 2 x (phase 2 + phase 3) + 2 x phase 2
    assert_eq!(connector.calls(), 6);
    assert!(store.get_phase_result("a-m2", Phase::Three).await.unwrap().is_some());
    assert!(store.get_phase_result("b-m1", Phase::Three).await.unwrap().is_none());
}

#[tokio::test]
async fn test_low_quality_output_falls_back_to_rule_result() {
    let (_dir, store) = temp_store().await;
    let connector = Arc::new(ScriptedConnector::always(Ok(WEAK_JSON.to_string())));
    let pipeline = Pipeline::new(test_config(), store.clone(), connector).unwrap();

    let summary = pipeline.run_batch(vec![incomplete_chain("c3")]).await.unwrap();

    let phase1 = store.get_phase_result("c3-m1", Phase::One).await.unwrap().unwrap();
    let phase2 = store.get_phase_result("c3-m1", Phase::Two).await.unwrap().unwrap();
    assert_eq!(phase2.source, ResultSource::RuleBased);
    assert_eq!(phase2.quality_score, None);
    assert_eq!(phase2.payload, phase1.payload);
    assert_eq!(summary.metrics.fallback_results, 1);
    assert_eq!(summary.metrics.fallback_rate, 1.0);

    let (score, decision): (f64, String) = sqlx::query_as(
        "SELECT total_score, decision FROM quality_audit WHERE message_id = ? AND phase = 2",
    )
    .bind("c3-m1")
    .fetch_one(store.pool())
    .await
    .unwrap();
    assert_eq!(score, 3.5);
    assert_eq!(decision, "USE_FALLBACK");
}

#[tokio::test]
async fn test_mid_score_output_is_merged_with_rule_result() {
    let (_dir, store) = temp_store().await;
    let connector = Arc::new(ScriptedConnector::always(Ok(MIXED_JSON.to_string())));
    let pipeline = Pipeline::new(test_config(), store.clone(), connector).unwrap();

    let summary = pipeline.run_batch(vec![incomplete_chain("h1")]).await.unwrap();
    assert_eq!(summary.messages_completed, 1);
    assert_eq!(summary.metrics.hybrid_results, 1);

    let phase1 = store.get_phase_result("h1-m1", Phase::One).await.unwrap().unwrap();
    let phase2 = store.get_phase_result("h1-m1", Phase::Two).await.unwrap().unwrap();
    assert_eq!(phase2.source, ResultSource::Hybrid);
    let score = phase2.quality_score.unwrap();
    assert!((4.0..6.0).contains(&score), "score {}", score);

    // Rule fields survive; only plausible generated fields are layered on
    let (base, merged) = (&phase1.payload, &phase2.payload);
    assert_eq!(merged.classification, base.classification);
    assert!(!merged.category.is_empty());
    assert!(merged.rationale.starts_with(&base.rationale));
    assert!(base.entities.iter().all(|e| merged.entities.contains(e)));
    assert!(base.action_items.iter().all(|a| merged.action_items.contains(a)));
    assert_eq!(merged.entities, vec!["noon"]);
    assert_eq!(
        merged.risk_assessment.as_deref(),
        Some("Meeting time conflicts with the supplier call")
    );
}

#[tokio::test]
async fn test_unparseable_output_falls_back() {
    let (_dir, store) = temp_store().await;
    let connector = Arc::new(ScriptedConnector::always(Ok("I cannot help with that.".to_string())));
    let pipeline = Pipeline::new(test_config(), store.clone(), connector).unwrap();

    let summary = pipeline.run_batch(vec![incomplete_chain("c4")]).await.unwrap();

    assert_eq!(summary.messages_completed, 1);
    let phase2 = store.get_phase_result("c4-m1", Phase::Two).await.unwrap().unwrap();
    assert_eq!(phase2.source, ResultSource::RuleBased);
    assert_eq!(summary.metrics.quality_histogram[0], 1);
}

#[tokio::test]
async fn test_transient_errors_retried_with_backoff() {
    let (_dir, store) = temp_store().await;
    let connector = Arc::new(ScriptedConnector::sequence(
        vec![timeout(), timeout()],
        Ok(GOOD_JSON.to_string()),
    ));
    let clock = Arc::new(ManualClock::new());
    let mut config = test_config();
    config.pipeline.workers = 1;
    config.pipeline.backoff.base_delay_ms = 1000;
    config.pipeline.backoff.max_delay_ms = 30_000;

    let pipeline = Pipeline::new(config, store.clone(), connector.clone())
        .unwrap()
        .with_clock(clock.clone());
    let summary = pipeline.run_batch(vec![incomplete_chain("c5")]).await.unwrap();

    assert_eq!(connector.calls(), 3);
    assert_eq!(summary.metrics.inference_retries, 2);
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(1), Duration::from_secs(2)]);

    let phase2 = store.get_phase_result("c5-m1", Phase::Two).await.unwrap().unwrap();
    assert_eq!(phase2.source, ResultSource::Generated);
    assert_eq!(phase2.retry_count, 2);
}

#[tokio::test]
async fn test_exhausted_retries_park_message_then_retry_resumes() {
    let (_dir, store) = temp_store().await;
    let mut config = test_config();
    config.pipeline.workers = 1;
    config.pipeline.backoff.max_attempts = 2;
    config.pipeline.max_task_retries = 2;

    let failing = Arc::new(ScriptedConnector::always(timeout()));
    let pipeline = Pipeline::new(config.clone(), store.clone(), failing.clone()).unwrap();
    let summary = pipeline.run_batch(vec![incomplete_chain("c6")]).await.unwrap();

    assert_eq!(summary.messages_parked, 1);
    assert_eq!(summary.messages_completed, 0);
    // 2 task attempts x 2 model calls
    assert_eq!(failing.calls(), 4);

    let state = store.load_message_state("c6-m1").await.unwrap().unwrap();
    assert!(state.parked);
    assert_eq!(state.status, MessageStatus::Failed);
    assert_eq!(state.current_phase, Some(Phase::One));
    assert!(state.failure_reason.unwrap().contains("timed out"));
    assert_eq!(store.list_parked().await.unwrap().len(), 1);

    // A plain rerun leaves the parked message alone
    let rerun = pipeline.run_batch(vec![incomplete_chain("c6")]).await.unwrap();
    assert_eq!(rerun.messages_enqueued, 0);
    assert_eq!(rerun.messages_skipped, 1);

    let healthy = Arc::new(ScriptedConnector::always(Ok(GOOD_JSON.to_string())));
    let pipeline = Pipeline::new(config, store.clone(), healthy.clone()).unwrap();
    let summary = pipeline.retry_parked(vec![incomplete_chain("c6")]).await.unwrap();

    assert_eq!(summary.messages_completed, 1);
    assert_eq!(healthy.calls(), 1);
    // Phase 1 came from the stored result, not the extractor or its cache
    assert_eq!(summary.metrics.cache_hits + summary.metrics.cache_misses, 0);

    let state = store.load_message_state("c6-m1").await.unwrap().unwrap();
    assert!(!state.parked);
    assert_eq!(state.status, MessageStatus::Done);
    assert!(store.list_parked().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_retry_parked_ignores_messages_outside_input() {
    let (_dir, store) = temp_store().await;
    let mut config = test_config();
    config.pipeline.backoff.max_attempts = 1;
    config.pipeline.max_task_retries = 1;

    let failing = Arc::new(ScriptedConnector::always(timeout()));
    let pipeline = Pipeline::new(config.clone(), store.clone(), failing).unwrap();
    pipeline
        .run_batch(vec![incomplete_chain("p1"), incomplete_chain("p2")])
        .await
        .unwrap();
    assert_eq!(store.list_parked().await.unwrap().len(), 2);

    let healthy = Arc::new(ScriptedConnector::always(Ok(GOOD_JSON.to_string())));
    let pipeline = Pipeline::new(config, store.clone(), healthy).unwrap();
    let summary = pipeline.retry_parked(vec![incomplete_chain("p1")]).await.unwrap();

    assert_eq!(summary.messages_completed, 1);
    let parked = store.list_parked().await.unwrap();
    assert_eq!(parked.len(), 1);
    assert_eq!(parked[0].message_id, "p2-m1");
}

#[tokio::test]
async fn test_rerun_of_finished_batch_is_a_no_op() {
    let (_dir, store) = temp_store().await;
    let connector = Arc::new(ScriptedConnector::always(Ok(GOOD_JSON.to_string())));
    let pipeline = Pipeline::new(test_config(), store.clone(), connector.clone()).unwrap();

    pipeline.run_batch(vec![complete_chain("r1")]).await.unwrap();
    let calls = connector.calls();
    let summary = pipeline.run_batch(vec![complete_chain("r1")]).await.unwrap();

    assert_eq!(summary.messages_enqueued, 0);
    assert_eq!(summary.messages_skipped, 2);
    assert_eq!(connector.calls(), calls);
}

#[tokio::test]
async fn test_changed_content_restarts_message() {
    let (_dir, store) = temp_store().await;
    let connector = Arc::new(ScriptedConnector::always(Ok(GOOD_JSON.to_string())));
    let pipeline = Pipeline::new(test_config(), store.clone(), connector).unwrap();

    pipeline.run_batch(vec![incomplete_chain("e1")]).await.unwrap();

    let mut edited = incomplete_chain("e1");
    edited.messages[0].content = "Lunch at one instead?".to_string();
    let summary = pipeline.run_batch(vec![edited]).await.unwrap();

    assert_eq!(summary.messages_enqueued, 1);
    assert_eq!(summary.messages_completed, 1);
}

#[tokio::test]
async fn test_identical_content_reuses_phase_one() {
    let (_dir, store) = temp_store().await;
    let connector = Arc::new(ScriptedConnector::always(Ok(GOOD_JSON.to_string())));
    let mut config = test_config();
    config.pipeline.workers = 1;
    let pipeline = Pipeline::new(config, store.clone(), connector).unwrap();

    let summary = pipeline
        .run_batch(vec![incomplete_chain("d1"), incomplete_chain("d2")])
        .await
        .unwrap();

    // Same content, one extraction
    assert_eq!(summary.metrics.cache_misses, 1);
    assert_eq!(summary.metrics.cache_hits, 1);
    assert_eq!(pipeline.cache().len(), 1);
}

#[tokio::test]
async fn test_cached_phase_one_matches_direct_extraction() {
    let (_dir, store) = temp_store().await;
    let connector = Arc::new(ScriptedConnector::always(Ok(GOOD_JSON.to_string())));
    let mut config = test_config();
    config.pipeline.workers = 1;
    let pipeline = Pipeline::new(config, store.clone(), connector).unwrap();

    let chain = |id: &str, subject: &str, content: &str| {
        let mut msg = message(id, &format!("{}-m1", id), 0, content, None);
        msg.subject = subject.to_string();
        Chain::new(id, vec![msg])
    };
    let chains = vec![
        chain("a", "URGENT overdue", "Please reissue invoice INV-2001"),
        chain("b", "Lunch", "please reissue invoice inv-2001"),
        // Same Phase 1 input as "a" up to whitespace
        chain("c", " URGENT  overdue", "Please reissue\ninvoice   INV-2001"),
    ];

    let summary = pipeline.run_batch(chains.clone()).await.unwrap();
    assert_eq!(summary.metrics.cache_misses, 2);
    assert_eq!(summary.metrics.cache_hits, 1);

    let extractor = RuleExtractor::new();
    for chain in &chains {
        let msg = &chain.messages[0];
        let stored = store.get_phase_result(&msg.message_id, Phase::One).await.unwrap().unwrap();
        assert_eq!(stored.payload, extractor.extract(msg), "{}", msg.message_id);
    }

    let b = store.get_phase_result("b-m1", Phase::One).await.unwrap().unwrap();
    assert!(!b.payload.high_priority);
    assert!(b.payload.entities.is_empty());
}

#[tokio::test]
async fn test_cache_counters_are_scoped_to_the_run() {
    let (_dir, store) = temp_store().await;
    let connector = Arc::new(ScriptedConnector::always(Ok(GOOD_JSON.to_string())));
    let pipeline = Pipeline::new(test_config(), store.clone(), connector).unwrap();

    let first = pipeline.run_batch(vec![incomplete_chain("r1")]).await.unwrap();
    assert_eq!(first.metrics.cache_misses, 1);
    assert_eq!(first.metrics.cache_hits, 0);

    let second = pipeline.run_batch(vec![incomplete_chain("r2")]).await.unwrap();
    assert_eq!(second.metrics.cache_misses, 0);
    assert_eq!(second.metrics.cache_hits, 1);
    assert_eq!(pipeline.cache().hits(), 1);
}

#[tokio::test]
async fn test_duplicate_message_ids_rejected() {
    let (_dir, store) = temp_store().await;
    let connector = Arc::new(ScriptedConnector::always(Ok(GOOD_JSON.to_string())));
    let pipeline = Pipeline::new(test_config(), store.clone(), connector.clone()).unwrap();

    let mut other = incomplete_chain("k2");
    other.messages[0].message_id = "k1-m1".to_string();
    let err = pipeline
        .run_batch(vec![incomplete_chain("k1"), other])
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::DuplicateMessage(ref id) if id == "k1-m1"));
    assert_eq!(connector.calls(), 0);
    assert!(store.load_message_state("k1-m1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_shutdown_drains_without_partial_state() {
    let (_dir, store) = temp_store().await;
    let connector = Arc::new(
        ScriptedConnector::always(Ok(GOOD_JSON.to_string())).with_delay(Duration::from_millis(100)),
    );
    let pipeline = Pipeline::new(test_config(), store.clone(), connector).unwrap();
    let chains: Vec<_> = (0..6).map(|i| incomplete_chain(&format!("s{}", i))).collect();

    let shutdown = pipeline.shutdown_token();
    let (summary, _) = tokio::join!(pipeline.run_batch(chains.clone()), async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.cancel();
    });
    let summary = summary.unwrap();

    assert!(summary.drained_by_shutdown);
    assert!(summary.messages_completed < 6);

    let in_phase = count_by_status(store.pool(), MessageStatus::InPhase).await.unwrap();
    assert_eq!(in_phase, 0);

    // Every recorded phase has its result
    for chain in &chains {
        let id = &chain.messages[0].message_id;
        let state = store.load_message_state(id).await.unwrap().unwrap();
        if let Some(current) = state.current_phase {
            for phase in [Phase::One, Phase::Two] {
                if phase <= current {
                    assert!(store.get_phase_result(id, phase).await.unwrap().is_some());
                }
            }
        }
    }

    // A fresh run resumes the rest
    let connector = Arc::new(ScriptedConnector::always(Ok(GOOD_JSON.to_string())));
    let pipeline = Pipeline::new(test_config(), store.clone(), connector).unwrap();
    let resumed = pipeline.run_batch(chains).await.unwrap();
    assert_eq!(summary.messages_completed + resumed.messages_completed, 6);

    let done = count_by_status(store.pool(), MessageStatus::Done).await.unwrap();
    assert_eq!(done, 6);
}

#[tokio::test]
async fn test_session_failure_aborts_before_any_task() {
    let (_dir, store) = temp_store().await;
    let connector = Arc::new(ScriptedConnector::refusing_sessions());
    let pipeline = Pipeline::new(test_config(), store.clone(), connector).unwrap();

    let err = pipeline.run_batch(vec![incomplete_chain("x1")]).await.unwrap_err();
    assert!(matches!(err, PipelineError::Session { worker_id: 0, .. }));
    assert!(store.get_phase_result("x1-m1", Phase::One).await.unwrap().is_none());
}

#[tokio::test]
async fn test_invalid_config_rejected_at_construction() {
    let (_dir, store) = temp_store().await;
    let connector = Arc::new(ScriptedConnector::always(Ok(GOOD_JSON.to_string())));
    let mut config = test_config();
    config.pipeline.workers = 0;

    let err = Pipeline::new(config, store, connector).unwrap_err();
    assert!(matches!(err, PipelineError::Config(_)));
}
