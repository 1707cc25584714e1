//! HTTP/WebSocket surface: router assembly over `AppState`.

pub mod handlers;
pub mod state;

use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::timeout::TimeoutLayer;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// HTTP request timeout comfortably above the longest command timeout a
/// caller can request, so the command endpoint's own `select!` is always
/// what actually resolves the request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/devices", get(handlers::list_devices))
        .route("/devices/{id}", get(handlers::get_device))
        .route("/devices/{id}/command", post(handlers::post_command))
        .route("/stations", get(handlers::list_stations))
        .route("/system/status", get(handlers::system_status))
        .route("/test-runs", get(handlers::list_test_runs))
        .route("/reports/{id}/{format}", get(handlers::report))
        .route("/ota", post(handlers::post_ota))
        .route("/ws", get(handlers::websocket_upgrade))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Broker, InMemoryBroker};
    use crate::broker_monitor::BrokerMonitor;
    use crate::command_sender::CommandSender;
    use crate::dispatcher::Dispatcher;
    use crate::estop::EstopCoordinator;
    use crate::hub::Hub;
    use crate::registry::Registry;
    use crate::store::{SledStore, Store};
    use crate::test_run::TestRunManager;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use stationbus_proto::{HeartbeatStatus, Kind, Message, Payload, Source};
    use tower::ServiceExt;

    fn source() -> Source {
        Source {
            service: "controller".to_string(),
            instance: "ctrl-01".to_string(),
            version: "1.0.0".to_string(),
        }
    }

    async fn test_state() -> (AppState, Arc<dyn Broker>, tempfile::TempDir) {
        let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn Store> = Arc::new(SledStore::open(dir.path()).unwrap());
        let registry = Arc::new(Registry::new());
        registry
            .update_from_heartbeat(
                "station-01",
                &stationbus_proto::StationHeartbeat {
                    status: HeartbeatStatus::Running,
                    uptime_seconds: 5,
                    devices: vec!["fluke-8846a".to_string()],
                    free_heap: None,
                    wifi_rssi: None,
                    firmware_version: "1.0.0".to_string(),
                    counters: Default::default(),
                },
            )
            .await;

        let broker_monitor = Arc::new(BrokerMonitor::new(broker.clone(), Duration::from_secs(5)));
        // Mark connected without running the probe loop, for test determinism.
        broker_monitor.mark_up_for_test().await;

        let state = AppState {
            registry,
            estop: Arc::new(EstopCoordinator::new()),
            dispatcher: Arc::new(Dispatcher::new()),
            command_sender: Arc::new(CommandSender::new(broker.clone())),
            broker_monitor,
            hub: Arc::new(Hub::new(crate::hub::DEFAULT_CLIENT_QUEUE_DEPTH)),
            test_runs: Arc::new(TestRunManager::new(store.clone())),
            store,
            source: source(),
            default_command_timeout: Duration::from_millis(500),
        };
        (state, broker, dir)
    }

    #[tokio::test]
    async fn unknown_device_returns_404() {
        let (state, _broker, _dir) = test_state().await;
        let app = router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/devices/does-not-exist/command")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"command":"measure_dc_voltage"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn empty_command_returns_400() {
        let (state, _broker, _dir) = test_state().await;
        let app = router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/devices/fluke-8846a/command")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"command":""}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn matching_response_returns_200_and_clears_pending() {
        let (state, broker, _dir) = test_state().await;
        let dispatcher = state.dispatcher.clone();
        let response_channel = stationbus_proto::response_channel(&state.source.instance);
        let app = router(state);

        let responder_broker = broker.clone();
        let responder = tokio::spawn(async move {
            let mut stream = responder_broker
                .subscribe(&stationbus_proto::command_channel("station-01"))
                .await
                .unwrap();
            let bytes = futures::StreamExt::next(&mut stream).await.unwrap();
            let request = Message::parse(&bytes).unwrap();
            let response = Message::build(
                Kind::CommandResponse,
                source(),
                Payload::CommandResponse(stationbus_proto::CommandResponse {
                    device_id: "fluke-8846a".to_string(),
                    command_name: "measure_dc_voltage".to_string(),
                    success: true,
                    response: Some(serde_json::json!("1.234")),
                    error: None,
                    duration_ms: Some(150),
                }),
                request.envelope.correlation_id,
                None,
            );
            responder_broker
                .publish(&response_channel, response.to_json().unwrap())
                .await
                .unwrap();
        });

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/devices/fluke-8846a/command")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"command":"measure_dc_voltage","timeout_ms":2000}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        responder.await.unwrap();
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn no_response_times_out_with_504_and_clears_pending() {
        let (state, _broker, _dir) = test_state().await;
        let dispatcher = state.dispatcher.clone();
        let app = router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/devices/fluke-8846a/command")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"command":"measure_dc_voltage","timeout_ms":50}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn broker_down_returns_503() {
        let (state, _broker, _dir) = test_state().await;
        state.broker_monitor.mark_down_for_test().await;
        let app = router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/devices/fluke-8846a/command")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"command":"measure_dc_voltage"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
