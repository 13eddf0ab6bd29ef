//! Offline-to-online flows through the background scheduler and the
//! filesystem store
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{test_config, Harness};
use serde_json::json;
use syncgate::{
    ConnectivityMonitor, GatewayEffects, GatewayEvent, RequestGateway, RetryScheduler, ScanTrigger,
};
use syncgate_core::{
    GatewayRequest, GatewayResponse, GatewayResult, Method, OperationId, OperationStatus,
};
use syncgate_effects::FilesystemStorageHandler;
use syncgate_testkit::TestEffects;
use tempfile::TempDir;
use tokio::sync::broadcast;

async fn wait_for_delivery(
    events: &mut broadcast::Receiver<GatewayEvent>,
    id: &OperationId,
) -> u16 {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(GatewayEvent::Delivered {
                    operation_id,
                    status,
                }) if operation_id == *id => break status,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("delivered before timeout")
}

#[tokio::test]
async fn test_offline_post_delivered_after_reconnect() -> GatewayResult<()> {
    let h = Harness::new().await;
    h.effects.transport.respond(
        Method::Post,
        "/api/care-plans",
        GatewayResponse::json(200, json!({"id": "cp-1"})),
    );
    h.go_offline();
    let mut events = h.gateway.events().subscribe();
    let handle = Arc::new(RetryScheduler::new(h.gateway.clone())).spawn();

    let outcome = h
        .gateway
        .execute(GatewayRequest::post(
            "/api/care-plans",
            json!({"patient": "p-7", "goal": "mobility"}),
        ))
        .await?;
    let ack = outcome.queued().expect("queued while offline").clone();

    let pending = h.gateway.pending_operations().await?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, ack.operation_id);
    assert_eq!(pending[0].status, OperationStatus::Pending);

    h.go_online();
    let status = wait_for_delivery(&mut events, &ack.operation_id).await;
    assert_eq!(status, 200);

    assert!(h.gateway.operation(&ack.operation_id).await.is_err());
    assert!(h.gateway.pending_operations().await?.is_empty());
    let delivered = h
        .effects
        .transport
        .delivered_to(Method::Post, "/api/care-plans");
    assert_eq!(delivered.len(), 1);
    assert_eq!(
        delivered[0].body.as_json(),
        Some(&json!({"patient": "p-7", "goal": "mobility"}))
    );

    handle.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_queue_persists_across_restart_on_disk() -> GatewayResult<()> {
    let dir = TempDir::new().expect("temp dir");
    let effects = TestEffects::new(11, common::START_MS);
    effects.transport.set_online(false);

    let open = |online: bool| {
        let effects = effects.clone();
        let path = dir.path().to_path_buf();
        async move {
            let storage = FilesystemStorageHandler::new(path).expect("filesystem store");
            RequestGateway::open(
                test_config(),
                GatewayEffects {
                    time: effects.time_handler(),
                    random: effects.random_handler(),
                    storage: Arc::new(storage),
                    transport: effects.transport_handler(),
                },
                ConnectivityMonitor::new(online),
            )
            .await
            .expect("gateway opens")
        }
    };

    let id = {
        let gateway = open(false).await;
        let outcome = gateway
            .execute(GatewayRequest::put("/api/notes/1", json!({"text": "offline"})))
            .await?;
        outcome.queued().expect("queued").operation_id.clone()
    };

    effects.transport.set_online(true);
    let gateway = open(true).await;
    let restored = gateway.operation(&id).await?;
    assert_eq!(restored.status, OperationStatus::Pending);
    assert_eq!(restored.url, "/api/notes/1");

    let report = RetryScheduler::new(gateway.clone())
        .run_once(ScanTrigger::Flush)
        .await?;
    assert_eq!(report.delivered, 1);
    assert!(gateway.pending_operations().await?.is_empty());
    Ok(())
}
