//! Reads: caching strategies, query-style POSTs and path versioning
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use common::Harness;
use serde_json::json;
use syncgate::{GatewayEvent, ScanTrigger};
use syncgate_core::{
    GatewayError, GatewayRequest, GatewayResponse, GatewayResult, Method, ResponseSource,
    TransportError,
};

async fn read(h: &Harness, request: GatewayRequest) -> GatewayResult<GatewayResponse> {
    let outcome = h.gateway.execute(request).await?;
    Ok(outcome.response().expect("reads are never queued").clone())
}

#[tokio::test]
async fn test_cache_first_serves_fresh_entry_without_network() -> GatewayResult<()> {
    let h = Harness::new().await;
    h.effects.transport.respond(
        Method::Get,
        "/api/reference/codes",
        GatewayResponse::json(200, json!({"v": 1})),
    );

    let first = read(&h, GatewayRequest::get("/api/reference/codes")).await?;
    assert_eq!(first.source, ResponseSource::Network);

    let second = read(&h, GatewayRequest::get("/api/reference/codes")).await?;
    assert_eq!(second.source, ResponseSource::Cache);
    assert_eq!(second.body, first.body);
    assert_eq!(h.effects.transport.delivered_count(), 1);

    // Still served while offline.
    h.go_offline();
    let offline = read(&h, GatewayRequest::get("/api/reference/codes")).await?;
    assert_eq!(offline.source, ResponseSource::Cache);
    h.go_online();

    h.advance_ms(60_001);
    let expired = read(&h, GatewayRequest::get("/api/reference/codes")).await?;
    assert_eq!(expired.source, ResponseSource::Network);
    assert_eq!(h.effects.transport.delivered_count(), 2);
    Ok(())
}

#[tokio::test]
async fn test_cache_first_refreshes_aging_entry_in_background() -> GatewayResult<()> {
    let h = Harness::new().await;
    h.effects.transport.respond(
        Method::Get,
        "/api/reference/codes",
        GatewayResponse::json(200, json!({"v": 1})),
    );
    read(&h, GatewayRequest::get("/api/reference/codes")).await?;
    h.effects.transport.respond(
        Method::Get,
        "/api/reference/codes",
        GatewayResponse::json(200, json!({"v": 2})),
    );

    h.advance_ms(10_000);
    let young = read(&h, GatewayRequest::get("/api/reference/codes")).await?;
    assert_eq!(young.body.as_json(), Some(&json!({"v": 1})));
    tokio::task::yield_now().await;
    assert_eq!(h.effects.transport.delivered_count(), 1);

    let mut events = h.gateway.events().subscribe();
    h.advance_ms(20_000);
    let aging = read(&h, GatewayRequest::get("/api/reference/codes")).await?;
    assert_eq!(aging.source, ResponseSource::Cache);
    assert_eq!(aging.body.as_json(), Some(&json!({"v": 1})));

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(GatewayEvent::CacheRefreshed { .. }) = events.recv().await {
                break;
            }
        }
    })
    .await
    .expect("background refresh");

    let refreshed = read(&h, GatewayRequest::get("/api/reference/codes")).await?;
    assert_eq!(refreshed.source, ResponseSource::Cache);
    assert_eq!(refreshed.body.as_json(), Some(&json!({"v": 2})));
    assert_eq!(h.effects.transport.delivered_count(), 2);
    Ok(())
}

#[tokio::test]
async fn test_cache_miss_while_offline_is_network_failure() {
    let h = Harness::new().await;
    h.go_offline();

    let result = h
        .gateway
        .execute(GatewayRequest::get("/api/reference/codes"))
        .await;
    assert_matches!(
        result,
        Err(GatewayError::NetworkFailure(TransportError::Offline))
    );

    let uncached = h.gateway.execute(GatewayRequest::get("/api/notes")).await;
    assert_matches!(uncached, Err(GatewayError::NetworkFailure(_)));
    assert!(h.gateway.pending_operations().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_network_first_falls_back_to_cache_on_timeout() -> GatewayResult<()> {
    let h = Harness::new().await;
    h.effects.transport.respond(
        Method::Get,
        "/api/v2/users/1",
        GatewayResponse::json(200, json!({"name": "Ada"})),
    );

    let first = read(&h, GatewayRequest::get("/api/users/1")).await?;
    assert_eq!(first.source, ResponseSource::Network);

    // Slower than the network-first timeout, faster than the request timeout.
    h.effects.transport.set_latency_ms(5_000);
    let fallback = read(&h, GatewayRequest::get("/api/users/1")).await?;
    assert_eq!(fallback.source, ResponseSource::StaleCache);
    assert_eq!(fallback.body, first.body);

    let uncached = h.gateway.execute(GatewayRequest::get("/api/users/2")).await;
    assert_matches!(
        uncached,
        Err(GatewayError::NetworkFailure(TransportError::Timeout {
            timeout_ms: 3_000
        }))
    );
    Ok(())
}

#[tokio::test]
async fn test_network_first_does_not_mask_server_errors() -> GatewayResult<()> {
    let h = Harness::new().await;
    read(&h, GatewayRequest::get("/api/users/1")).await?;
    h.effects.transport.enqueue(
        Method::Get,
        "/api/v2/users/1",
        Ok(GatewayResponse::json(404, json!({"error": "gone"}))),
    );

    let result = h.gateway.execute(GatewayRequest::get("/api/users/1")).await;
    assert_matches!(result, Err(GatewayError::Remote { status: 404, .. }));

    h.go_offline();
    let offline = read(&h, GatewayRequest::get("/api/users/1")).await?;
    assert_eq!(offline.source, ResponseSource::StaleCache);
    Ok(())
}

#[tokio::test]
async fn test_stale_while_revalidate_refreshes_in_background() -> GatewayResult<()> {
    let h = Harness::new().await;
    h.effects.transport.respond(
        Method::Get,
        "/api/feed",
        GatewayResponse::json(200, json!({"items": [1]})),
    );
    let first = read(&h, GatewayRequest::get("/api/feed")).await?;
    assert_eq!(first.source, ResponseSource::Network);

    h.effects.transport.respond(
        Method::Get,
        "/api/feed",
        GatewayResponse::json(200, json!({"items": [1, 2]})),
    );
    let mut events = h.gateway.events().subscribe();

    let cached = read(&h, GatewayRequest::get("/api/feed")).await?;
    assert_eq!(cached.source, ResponseSource::Cache);
    assert_eq!(cached.body.as_json(), Some(&json!({"items": [1]})));

    let refreshed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(GatewayEvent::CacheRefreshed { url }) = events.recv().await {
                break url;
            }
        }
    })
    .await
    .expect("background refresh");
    assert_eq!(refreshed, "/api/feed");

    let updated = read(&h, GatewayRequest::get("/api/feed")).await?;
    assert_eq!(updated.source, ResponseSource::Cache);
    assert_eq!(updated.body.as_json(), Some(&json!({"items": [1, 2]})));
    Ok(())
}

#[tokio::test]
async fn test_query_post_is_cached_by_body_and_never_queued() -> GatewayResult<()> {
    let h = Harness::new().await;
    let search = |q: &str| GatewayRequest::post("/api/search", json!({"q": q})).as_query();

    assert_eq!(read(&h, search("a")).await?.source, ResponseSource::Network);
    assert_eq!(read(&h, search("a")).await?.source, ResponseSource::Cache);
    assert_eq!(read(&h, search("b")).await?.source, ResponseSource::Network);

    let tagged = GatewayRequest::post("/api/search", json!({"q": "a"}))
        .with_header("x-query-operation", "true");
    assert_eq!(read(&h, tagged).await?.source, ResponseSource::Cache);

    h.drop_link();
    let result = h.gateway.execute(search("c")).await;
    assert_matches!(
        result,
        Err(GatewayError::NetworkFailure(
            TransportError::ConnectionFailed { .. }
        ))
    );
    assert!(h.gateway.pending_operations().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_legacy_path_rewritten_with_version_header() -> GatewayResult<()> {
    let h = Harness::new().await;

    read(&h, GatewayRequest::get("/api/users/42")).await?;
    read(&h, GatewayRequest::new(Method::Head, "/api/notes")).await?;

    let delivered = h.effects.transport.delivered();
    assert_eq!(delivered[0].url, "/api/v2/users/42");
    assert_eq!(delivered[0].headers.get("x-api-version"), Some("2"));
    assert_eq!(delivered[1].url, "/api/notes");
    assert_eq!(delivered[1].headers.get("x-api-version"), Some("latest"));

    let first_trace = delivered[0].headers.get("x-request-id").expect("trace");
    let second_trace = delivered[1].headers.get("x-request-id").expect("trace");
    assert_ne!(first_trace, second_trace);
    Ok(())
}

#[tokio::test]
async fn test_retried_operation_is_rewritten_per_attempt() -> GatewayResult<()> {
    let h = Harness::new().await;
    h.drop_link();
    let outcome = h
        .gateway
        .execute(GatewayRequest::put("/api/users/5", json!({"name": "Lin"})))
        .await?;
    let id = outcome.queued().expect("queued").operation_id.clone();

    // Stored as the caller sent it.
    let op = h.gateway.operation(&id).await?;
    assert_eq!(op.url, "/api/users/5");
    assert!(!op.headers.contains("x-request-id"));
    assert!(!op.headers.contains("x-api-version"));

    h.restore_link();
    h.advance_ms(1_000);
    h.scheduler.run_once(ScanTrigger::Flush).await?;

    let delivered = h.effects.transport.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].url, "/api/v2/users/5");
    assert_eq!(delivered[0].headers.get("x-api-version"), Some("2"));
    assert!(delivered[0].headers.contains("x-request-id"));
    Ok(())
}
