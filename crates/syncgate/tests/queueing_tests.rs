//! Mutations: immediate delivery, queuing on failure and the admission rules
//! in front of both.
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

mod common;

use assert_matches::assert_matches;
use common::{drain, Harness, REPORTS, START_MS};
use serde_json::json;
use syncgate::{ExecuteOutcome, GatewayEvent, QueuedAck};
use syncgate_core::{
    GatewayError, GatewayRequest, GatewayResponse, GatewayResult, Method, OperationStatus,
    ResponseSource, TransportError,
};

#[tokio::test]
async fn test_online_mutation_returns_server_response() -> GatewayResult<()> {
    let h = Harness::new().await;

    let outcome = h
        .gateway
        .execute(GatewayRequest::post("/api/notes", json!({"text": "hi"})))
        .await?;

    let response = outcome.response().expect("delivered");
    assert_eq!(response.status, 201);
    assert_eq!(response.source, ResponseSource::Network);
    assert!(h.gateway.pending_operations().await?.is_empty());
    assert_eq!(h.effects.transport.delivered_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_transport_failure_queues_pending_with_zero_retries() -> GatewayResult<()> {
    let h = Harness::new().await;
    let mut events = h.gateway.events().subscribe();
    h.drop_link();

    let outcome = h
        .gateway
        .execute(GatewayRequest::post("/api/notes", json!({"text": "hi"})))
        .await?;

    assert_eq!(outcome.status(), QueuedAck::STATUS);
    let ack = outcome.queued().expect("queued").clone();
    // base delay 60s plus at most 20% jitter
    assert!((60_000..=72_000).contains(&ack.estimated_retry_window_ms));

    let op = h.gateway.operation(&ack.operation_id).await?;
    assert_eq!(op.status, OperationStatus::Pending);
    assert_eq!(op.retry_count, 0);
    assert_eq!(op.url, "/api/notes");
    assert_eq!(op.method, Method::Post);
    assert_eq!(op.last_attempt_at, Some(START_MS));
    assert_eq!(
        op.next_attempt_at,
        Some(START_MS + ack.estimated_retry_window_ms)
    );

    assert_eq!(
        drain(&mut events),
        vec![GatewayEvent::Queued {
            operation_id: ack.operation_id,
            url: "/api/notes".to_string(),
        }]
    );
    Ok(())
}

#[tokio::test]
async fn test_every_transport_error_kind_is_queued() -> GatewayResult<()> {
    let h = Harness::new().await;
    let failures = [
        TransportError::Timeout { timeout_ms: 15_000 },
        TransportError::Dns {
            message: "no such host".to_string(),
        },
        TransportError::ConnectionReset {
            message: "reset by peer".to_string(),
        },
        TransportError::Protocol {
            message: "truncated body".to_string(),
        },
    ];

    for (n, failure) in failures.into_iter().enumerate() {
        h.effects.transport.fail_next(failure);
        let outcome = h
            .gateway
            .execute(GatewayRequest::put(format!("/api/notes/{n}"), json!({"n": n})))
            .await?;
        assert_matches!(outcome, ExecuteOutcome::Queued(_));
    }

    assert_eq!(h.gateway.pending_operations().await?.len(), 4);
    Ok(())
}

#[tokio::test]
async fn test_offline_host_queues_without_network_attempt() -> GatewayResult<()> {
    let h = Harness::new().await;
    h.go_offline();

    let outcome = h
        .gateway
        .execute(GatewayRequest::delete("/api/notes/3"))
        .await?;
    let ack = outcome.queued().expect("queued").clone();

    assert_eq!(h.effects.transport.attempts(), 0);
    assert_eq!(
        ack.estimated_retry_window_ms,
        h.gateway.config().retry.poll_interval_ms
    );
    let op = h.gateway.operation(&ack.operation_id).await?;
    assert_eq!(op.last_attempt_at, None);
    assert_eq!(op.next_attempt_at, None);
    Ok(())
}

#[tokio::test]
async fn test_server_error_is_returned_not_queued() {
    let h = Harness::new().await;
    h.effects.transport.enqueue(
        Method::Post,
        "/api/notes",
        Ok(GatewayResponse::json(500, json!({"error": "boom"}))),
    );

    let result = h
        .gateway
        .execute(GatewayRequest::post("/api/notes", json!({})))
        .await;

    assert_matches!(result, Err(GatewayError::Remote { status: 500, .. }));
    assert!(h.gateway.pending_operations().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sixth_request_in_window_is_denied_then_window_resets() -> GatewayResult<()> {
    let h = Harness::new().await;
    let mut events = h.gateway.events().subscribe();

    for _ in 0..5 {
        let outcome = h
            .gateway
            .execute(GatewayRequest::post(REPORTS, json!({})))
            .await?;
        assert_eq!(outcome.status(), 201);
    }

    let denied = h
        .gateway
        .execute(GatewayRequest::post(REPORTS, json!({})))
        .await;
    let retry_after = denied
        .as_ref()
        .err()
        .and_then(GatewayError::retry_after_seconds)
        .expect("rate limited");
    assert!(retry_after > 0);
    assert_eq!(retry_after, 60);
    assert_eq!(h.effects.transport.delivered_count(), 5);
    assert!(h.gateway.pending_operations().await?.is_empty());
    assert!(drain(&mut events).contains(&GatewayEvent::RateLimited {
        endpoint: REPORTS.to_string(),
        retry_after_seconds: 60,
    }));

    h.advance_ms(60_000);
    h.gateway
        .execute(GatewayRequest::post(REPORTS, json!({})))
        .await?;
    let window = h.gateway.rate_limit_window(REPORTS).expect("tracked");
    assert_eq!(window.count, 1);
    assert_eq!(window.window_start, START_MS + 60_000);
    Ok(())
}

#[tokio::test]
async fn test_rate_limit_applies_to_every_path_under_prefix() {
    let h = Harness::new().await;
    for n in 0..5 {
        h.gateway
            .execute(GatewayRequest::post(format!("{REPORTS}/{n}"), json!({})))
            .await
            .unwrap();
    }
    let result = h.gateway.execute(GatewayRequest::get(REPORTS)).await;
    assert_matches!(result, Err(GatewayError::RateLimited { .. }));

    // Unrelated endpoint keeps its own budget.
    h.gateway
        .execute(GatewayRequest::post("/api/notes", json!({})))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_urls_outside_the_api_are_rejected() {
    let h = Harness::new().await;
    let rejected = [
        "ftp://api.example.com/api/notes",
        "https://evil.example.com/api/notes",
        "https://api.example.com.evil.net/api/notes",
        "//evil.example.com/api/notes",
        "api/notes",
        "/health",
        "/api/notes with space",
    ];
    for url in rejected {
        let result = h
            .gateway
            .execute(GatewayRequest::post(url, json!({})))
            .await;
        assert_matches!(result, Err(GatewayError::InvalidRequest { .. }), "{url}");
    }
    assert_eq!(h.effects.transport.attempts(), 0);
    assert!(h.gateway.pending_operations().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_same_origin_absolute_url_is_made_relative() -> GatewayResult<()> {
    let h = Harness::new().await;
    h.gateway
        .execute(GatewayRequest::post(
            "https://api.example.com/api/notes?draft=1",
            json!({}),
        ))
        .await?;

    let delivered = h.effects.transport.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].url, "/api/notes?draft=1");
    Ok(())
}

#[tokio::test]
async fn test_storage_failure_surfaces_when_queuing() {
    let h = Harness::new().await;
    h.drop_link();
    h.effects.storage.set_fail_writes(true);

    let result = h
        .gateway
        .execute(GatewayRequest::post("/api/notes", json!({})))
        .await;

    assert_matches!(result, Err(GatewayError::Storage(_)));
}

#[tokio::test]
async fn test_concurrent_enqueues_get_distinct_ordered_ids() -> GatewayResult<()> {
    let h = Harness::new().await;
    h.go_offline();

    let requests = (0..20).map(|n| {
        h.gateway
            .execute(GatewayRequest::post("/api/notes", json!({"n": n})))
    });
    let outcomes = futures::future::join_all(requests).await;

    let mut ids = Vec::new();
    for outcome in outcomes {
        ids.push(outcome?.queued().expect("queued").operation_id.clone());
    }
    let pending = h.gateway.pending_operations().await?;
    assert_eq!(pending.len(), 20);

    let mut unique = ids.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 20);
    Ok(())
}

#[tokio::test]
async fn test_immediate_conflict_is_recorded_without_operation() -> GatewayResult<()> {
    let h = Harness::new().await;
    let mut events = h.gateway.events().subscribe();
    h.effects.transport.enqueue(
        Method::Put,
        "/api/notes/7",
        Ok(GatewayResponse::json(409, json!({"error": "stale"}))
            .with_header("x-server-version", "12")),
    );

    let outcome = h
        .gateway
        .execute(
            GatewayRequest::put("/api/notes/7", json!({"text": "edit"}))
                .with_header("x-entity-version", "11"),
        )
        .await?;

    let response = outcome.response().expect("answered");
    assert_eq!(response.status, 409);
    let conflict_id = response.conflict.expect("conflict recorded");

    let conflicts = h.gateway.conflicts(None).await?;
    assert_eq!(conflicts.len(), 1);
    let record = &conflicts[0];
    assert_eq!(record.id, conflict_id);
    assert_eq!(record.operation_id, None);
    assert_eq!(record.entity_type, "notes");
    assert_eq!(record.local_version.as_deref(), Some("11"));
    assert_eq!(record.server_version.as_deref(), Some("12"));
    assert_eq!(
        drain(&mut events),
        vec![GatewayEvent::ConflictDetected { conflict_id }]
    );
    Ok(())
}
