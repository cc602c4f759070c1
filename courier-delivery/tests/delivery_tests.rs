//! Integration tests for the delivery pipeline

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{collections::HashSet, sync::Arc, time::Duration};

use courier_common::{LogLevel, MessageStatus};
use courier_delivery::{
    CircuitBreakerConfig, CircuitState, DeliveryConfig, DeliveryError, DeliveryOrchestrator,
    DeliveryProvider, RateLimitConfig, SubmitError, SubmitRequest, SubmitStatus, TestProvider,
    TickOutcome,
};
use courier_store::{MemoryStore, MessageStore, TestStore};

fn request(recipient: &str) -> SubmitRequest {
    SubmitRequest::new(recipient, "Welcome", "Hello there")
}

fn pipeline(
    config: DeliveryConfig,
    store: Arc<dyn MessageStore>,
    providers: &[&TestProvider],
) -> DeliveryOrchestrator {
    let providers = providers
        .iter()
        .map(|provider| Arc::new((*provider).clone()) as Arc<dyn DeliveryProvider>)
        .collect();
    DeliveryOrchestrator::new(config, store, providers)
}

/// Tick until the next terminal outcome, letting scheduled retries come due
async fn drive(orchestrator: &DeliveryOrchestrator) -> TickOutcome {
    for _ in 0..1_000 {
        match orchestrator.tick().await {
            TickOutcome::Idle | TickOutcome::Retrying { .. } => {
                tokio::time::advance(Duration::from_millis(100)).await;
            }
            outcome => return outcome,
        }
    }
    panic!("message never reached a terminal state");
}

#[tokio::test(start_paused = true)]
async fn test_distinct_keys_create_distinct_messages() {
    let orchestrator = pipeline(
        DeliveryConfig::default(),
        Arc::new(MemoryStore::new()),
        &[&TestProvider::succeeding("A")],
    );

    let mut ids = HashSet::new();
    for key in ["k1", "k2", "k3"] {
        let response = orchestrator.submit(request("a@x.com"), Some(key)).await.unwrap();
        assert_eq!(response.status, SubmitStatus::Queued);
        ids.insert(response.id);
    }
    let generated = orchestrator.submit(request("a@x.com"), None).await.unwrap();
    ids.insert(generated.id);

    assert_eq!(ids.len(), 4);
    assert_eq!(orchestrator.queue().size(), 4);

    let again = orchestrator.submit(request("b@x.com"), Some("k2")).await.unwrap();
    assert_eq!(again.status, SubmitStatus::Duplicate);
    assert_eq!(again.id, "k2");
    assert_eq!(orchestrator.queue().size(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_hundred_and_first_submission_is_refused() {
    let orchestrator = pipeline(
        DeliveryConfig::default(),
        Arc::new(MemoryStore::new()),
        &[&TestProvider::succeeding("A")],
    );

    for _ in 0..100 {
        orchestrator.submit(request("a@x.com"), None).await.unwrap();
    }
    let err = orchestrator
        .submit(request("a@x.com"), None)
        .await
        .unwrap_err();

    assert!(matches!(err, SubmitError::RateLimitExceeded { .. }));
    assert_eq!(err.retry_after_secs(), Some(60));
    assert_eq!(orchestrator.queue().size(), 100);
    assert_eq!(orchestrator.stats().await.unwrap().rate_limit_usage, 100);
}

#[tokio::test(start_paused = true)]
async fn test_high_priority_delivered_first() {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = pipeline(
        DeliveryConfig::default(),
        store.clone(),
        &[&TestProvider::succeeding("A")],
    );

    orchestrator
        .submit(request("low@x.com").with_priority("low"), None)
        .await
        .unwrap();
    let high = orchestrator
        .submit(request("high@x.com").with_priority("high"), None)
        .await
        .unwrap();

    let outcome = orchestrator.tick().await;
    assert_eq!(
        outcome,
        TickOutcome::Sent {
            id: high.id.clone(),
            provider: "A".to_string()
        }
    );

    let stored = store.get_message(&high.id).await.unwrap().unwrap();
    assert_eq!(stored.status, MessageStatus::Sent);
    assert_eq!(stored.provider.as_deref(), Some("A"));
    assert!(stored.sent_at.is_some());
    assert!(stored.failed_at.is_none());
    assert!(orchestrator.queue().get(&high.id).is_none());

    let stats = orchestrator.stats().await.unwrap();
    assert_eq!(stats.emails_sent_today, 1);
    assert_eq!(stats.success_rate, 50);
    assert_eq!(stats.queue_size, 1);

    let logs = orchestrator.recent_logs(1).await.unwrap();
    assert_eq!(logs[0].level, LogLevel::Success);
    assert!(logs[0].message.starts_with(&format!("Email {} delivered via A", high.id)));
}

#[tokio::test(start_paused = true)]
async fn test_message_fails_after_max_retries() {
    let store = Arc::new(MemoryStore::new());
    let failing = TestProvider::failing("A");
    let orchestrator = pipeline(DeliveryConfig::default(), store.clone(), &[&failing]);

    let id = orchestrator
        .submit(request("a@x.com"), None)
        .await
        .unwrap()
        .id;

    let outcome = drive(&orchestrator).await;
    let TickOutcome::Failed { id: failed, error } = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(failed, id);
    assert!(error.is_terminal());
    assert!(matches!(error, DeliveryError::MaxRetriesExceeded { attempts: 3, .. }));

    // Three attempt cycles of three sends each
    assert_eq!(failing.calls(), 9);

    let stored = store.get_message(&id).await.unwrap().unwrap();
    assert_eq!(stored.status, MessageStatus::Failed);
    assert_eq!(stored.retry_count, 3);
    assert!(stored.failed_at.is_some());
    assert!(stored.sent_at.is_none());
    assert!(stored.last_error.is_some());
    assert!(orchestrator.queue().is_empty());

    let logs = orchestrator.recent_logs(100).await.unwrap();
    assert!(logs.iter().any(|log| log.message.contains("scheduled for retry 2/3")));
    assert!(
        logs.iter()
            .any(|log| log.level == LogLevel::Error && log.message.contains("after 3 attempts"))
    );
}

#[tokio::test(start_paused = true)]
async fn test_later_provider_delivers_when_earlier_fail_or_open() {
    let config = DeliveryConfig {
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 1,
            ..CircuitBreakerConfig::default()
        },
        ..DeliveryConfig::default()
    };
    let first = TestProvider::failing("A");
    let open = TestProvider::succeeding("B");
    let last = TestProvider::succeeding("C");
    let orchestrator = pipeline(
        config,
        Arc::new(MemoryStore::new()),
        &[&first, &open, &last],
    );

    let _ = orchestrator
        .breakers()
        .get("B")
        .execute(|| async { Err::<(), _>("earlier outage") })
        .await;
    assert_eq!(orchestrator.breakers().get("B").state(), CircuitState::Open);

    let id = orchestrator
        .submit(request("a@x.com"), None)
        .await
        .unwrap()
        .id;
    let outcome = orchestrator.tick().await;

    assert_eq!(
        outcome,
        TickOutcome::Sent {
            id,
            provider: "C".to_string()
        }
    );
    assert_eq!(first.calls(), 3);
    assert_eq!(open.calls(), 0);
    assert_eq!(last.calls(), 1);

    let logs = orchestrator.recent_logs(100).await.unwrap();
    assert!(
        logs.iter()
            .any(|log| log.message == "Circuit breaker OPEN for B, skipping")
    );
    assert!(
        logs.iter()
            .any(|log| log.message.starts_with("Provider A failed:"))
    );
    assert_eq!(orchestrator.circuit_breaker_status(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_breaker_opens_per_attempt_cycle_and_recovers() {
    let config = DeliveryConfig {
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 2,
            open_duration_ms: 60_000,
            ..CircuitBreakerConfig::default()
        },
        ..DeliveryConfig::default()
    };
    let primary = TestProvider::failing("A");
    let fallback = TestProvider::succeeding("B");
    let orchestrator = pipeline(
        config,
        Arc::new(MemoryStore::new()),
        &[&primary, &fallback],
    );
    let breaker = orchestrator.breakers().get("A");

    for expected_failures in 1..=2 {
        orchestrator.submit(request("a@x.com"), None).await.unwrap();
        assert!(matches!(
            orchestrator.tick().await,
            TickOutcome::Sent { provider, .. } if provider == "B"
        ));
        assert_eq!(breaker.stats().failure_count, expected_failures);
    }
    assert_eq!(primary.calls(), 6);
    assert_eq!(breaker.state(), CircuitState::Open);

    // Open: skipped without a send
    orchestrator.submit(request("a@x.com"), None).await.unwrap();
    orchestrator.tick().await;
    assert_eq!(primary.calls(), 6);

    // Open duration elapsed: one probe cycle, which fails and re-opens
    tokio::time::advance(Duration::from_secs(60)).await;
    orchestrator.submit(request("a@x.com"), None).await.unwrap();
    orchestrator.tick().await;
    assert_eq!(primary.calls(), 9);
    assert_eq!(breaker.state(), CircuitState::Open);

    // Next probe succeeds and closes the breaker
    primary.set_script(courier_delivery::Script::AlwaysSucceed);
    tokio::time::advance(Duration::from_secs(60)).await;
    orchestrator.submit(request("a@x.com"), None).await.unwrap();
    assert!(matches!(
        orchestrator.tick().await,
        TickOutcome::Sent { provider, .. } if provider == "A"
    ));
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.stats().failure_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_store_outage_does_not_stop_delivery() {
    let store = Arc::new(TestStore::new());
    let provider = TestProvider::succeeding("A");
    let orchestrator = pipeline(DeliveryConfig::default(), store.clone(), &[&provider]);

    let id = orchestrator
        .submit(request("a@x.com"), None)
        .await
        .unwrap()
        .id;

    store.set_failing(true);
    assert!(matches!(orchestrator.tick().await, TickOutcome::Sent { .. }));
    assert!(orchestrator.queue().is_empty());
    assert_eq!(provider.calls(), 1);

    // Nothing is re-sent once the store recovers
    store.set_failing(false);
    assert_eq!(orchestrator.tick().await, TickOutcome::Idle);
    assert_eq!(provider.calls(), 1);
    assert_eq!(
        store.get_message(&id).await.unwrap().unwrap().status,
        MessageStatus::Pending
    );
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_ticks_do_not_overlap() {
    let provider = TestProvider::succeeding("A").with_latency(Duration::from_millis(500));
    let orchestrator = pipeline(
        DeliveryConfig::default(),
        Arc::new(MemoryStore::new()),
        &[&provider],
    );
    orchestrator.submit(request("a@x.com"), None).await.unwrap();
    orchestrator.submit(request("b@x.com"), None).await.unwrap();

    let (first, second) = tokio::join!(orchestrator.tick(), orchestrator.tick());

    assert!(matches!(first, TickOutcome::Sent { .. }));
    assert_eq!(second, TickOutcome::Busy);
    assert_eq!(provider.calls(), 1);
    assert_eq!(orchestrator.queue().size(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_background_loop_delivers() {
    let store = Arc::new(TestStore::new());
    let config = DeliveryConfig {
        dispatch_interval_ms: 100,
        rate_limit: RateLimitConfig {
            max_requests: 10,
            window_ms: 1_000,
        },
        ..DeliveryConfig::default()
    };
    let orchestrator = Arc::new(pipeline(
        config,
        store.clone(),
        &[&TestProvider::new("A", courier_delivery::Script::FailTimes(4))],
    ));
    assert!(orchestrator.start());

    let id = orchestrator
        .submit(request("a@x.com").with_priority("high"), Some("order-7"))
        .await
        .unwrap()
        .id;

    let message = store
        .wait_for_terminal(&id, Duration::from_secs(30))
        .await
        .unwrap();
    orchestrator.stop().await;

    // First cycle used three sends, the retry cycle succeeded on its second
    assert_eq!(message.status, MessageStatus::Sent);
    assert_eq!(message.retry_count, 1);
    assert_eq!(message.provider.as_deref(), Some("A"));

    let statuses = orchestrator.provider_statuses().await.unwrap();
    assert_eq!(statuses[0].success_rate, "50%");
    assert_eq!(statuses[0].status.as_str(), "Healthy");

    let recent = orchestrator.recent_messages(10).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].id, "order-7");
}

#[tokio::test(start_paused = true)]
async fn test_background_loop_survives_panicking_provider() {
    let store = Arc::new(TestStore::new());
    let config = DeliveryConfig {
        dispatch_interval_ms: 100,
        ..DeliveryConfig::default()
    };
    let provider = TestProvider::new("A", courier_delivery::Script::PanicTimes(1));
    let orchestrator = Arc::new(pipeline(config, store.clone(), &[&provider]));
    assert!(orchestrator.start());

    let first = orchestrator.submit(request("a@x.com"), None).await.unwrap().id;
    let second = orchestrator.submit(request("b@x.com"), None).await.unwrap().id;

    for id in [&first, &second] {
        let message = store
            .wait_for_terminal(id, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(message.status, MessageStatus::Sent);
        assert_eq!(message.retry_count, 0);
    }

    assert!(orchestrator.is_running());
    orchestrator.stop().await;
    assert!(orchestrator.queue().is_empty());
    assert_eq!(provider.calls(), 3);
}
