//! REST + WebSocket handlers. The command endpoint (`POST
//! /devices/{id}/command`) is the centerpiece, implementing spec.md
//! §4.10's six ordered steps.

use std::collections::HashMap;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use stationbus_proto::{CommandRequest, Kind, Message, Payload};
use tracing::warn;
use uuid::Uuid;

use super::state::AppState;

fn error_json(message: &str) -> serde_json::Value {
    serde_json::json!({ "error": message })
}

pub async fn list_devices(State(state): State<AppState>) -> Response {
    Json(state.registry.list_devices().await).into_response()
}

pub async fn get_device(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.registry.lookup_device(&id).await {
        Some(device) => Json(device).into_response(),
        None => (StatusCode::NOT_FOUND, Json(error_json("unknown device"))).into_response(),
    }
}

pub async fn list_stations(State(state): State<AppState>) -> Response {
    Json(state.registry.list_stations().await).into_response()
}

#[derive(Serialize)]
struct SystemStatus {
    estop: crate::types::EstopState,
    broker_connected: bool,
    broker_last_error: Option<String>,
    broker_transitions: u64,
    websocket_clients: usize,
    pending_commands: usize,
}

pub async fn system_status(State(state): State<AppState>) -> Response {
    let broker_status = state.broker_monitor.status().await;
    Json(SystemStatus {
        estop: state.estop.state().await,
        broker_connected: broker_status.connected,
        broker_last_error: broker_status.last_error,
        broker_transitions: broker_status.transitions,
        websocket_clients: state.hub.client_count(),
        pending_commands: state.dispatcher.pending_count(),
    })
    .into_response()
}

pub async fn list_test_runs(State(state): State<AppState>) -> Response {
    match state.store.list_test_runs().await {
        Ok(runs) => Json(runs).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(error_json(&e.to_string()))).into_response(),
    }
}

pub async fn report(State(state): State<AppState>, Path((id, format)): Path<(String, String)>) -> Response {
    let run = match state.store.get_test_run(&id).await {
        Ok(Some(run)) => run,
        Ok(None) => return (StatusCode::NOT_FOUND, Json(error_json("unknown test run"))).into_response(),
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, Json(error_json(&e.to_string()))).into_response(),
    };

    match format.as_str() {
        "json" => Json(run).into_response(),
        "csv" => {
            let csv = format!(
                "id,station,script,status,started_at,finished_at\n{},{},{},{:?},{},{}\n",
                run.id,
                run.station,
                run.script,
                run.status,
                run.started_at,
                run.finished_at.map(|t| t.to_string()).unwrap_or_default(),
            );
            ([(axum::http::header::CONTENT_TYPE, "text/csv")], csv).into_response()
        }
        "pdf" => (
            StatusCode::NOT_IMPLEMENTED,
            Json(error_json("PDF rendering is handled by an external report renderer")),
        )
            .into_response(),
        _ => (StatusCode::BAD_REQUEST, Json(error_json("unsupported report format"))).into_response(),
    }
}

#[derive(Deserialize)]
pub struct OtaRequestBody {
    pub firmware_url: String,
    pub version: String,
    pub sha256: String,
    pub force: Option<bool>,
}

/// Fires a command-request-like OTA envelope at every online station and
/// returns immediately. No waiter is registered: per the open question
/// recorded in DESIGN.md, OTA is fire-and-forget rather than routed
/// through the correlation-id waiter path.
pub async fn post_ota(
    State(state): State<AppState>,
    body: Result<Json<OtaRequestBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(_) => return (StatusCode::BAD_REQUEST, Json(error_json("invalid json body"))).into_response(),
    };

    let payload = Payload::Ota(stationbus_proto::OtaRequest {
        firmware_url: body.firmware_url,
        version: body.version,
        sha256: body.sha256,
        force: body.force,
    });

    for station in state.registry.list_stations().await {
        if station.status != crate::types::Status::Online {
            continue;
        }
        let channel = stationbus_proto::command_channel(&station.instance);
        let reply_to = stationbus_proto::response_channel(&state.source.instance);
        let message = Message::build(
            Kind::OtaRequest,
            state.source.clone(),
            payload.clone(),
            Some(Uuid::new_v4()),
            Some(reply_to),
        );
        if let Err(e) = state.command_sender.send(&channel, &message).await {
            warn!(station = %station.instance, "ota publish failed: {e}");
        }
    }

    StatusCode::ACCEPTED.into_response()
}

pub async fn websocket_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    state.hub.handle_upgrade(ws)
}

#[derive(Deserialize)]
pub struct CommandBody {
    pub command: String,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    pub timeout_ms: Option<u64>,
}

/// Deregisters its waiter on drop unless explicitly disarmed, so a
/// dropped handler future (HTTP client cancellation) still returns the
/// dispatcher's pending count to zero even though no response can
/// actually reach a vanished client.
struct WaiterGuard<'a> {
    dispatcher: &'a crate::dispatcher::Dispatcher,
    cid: Uuid,
    armed: bool,
}

impl<'a> WaiterGuard<'a> {
    fn new(dispatcher: &'a crate::dispatcher::Dispatcher, cid: Uuid) -> Self {
        Self { dispatcher, cid, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.dispatcher.deregister(self.cid);
        }
    }
}

pub async fn post_command(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    body: Result<Json<CommandBody>, JsonRejection>,
) -> Response {
    // Step 1: broker health gate.
    if !state.broker_monitor.is_connected() {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(error_json("broker is unavailable"))).into_response();
    }

    // Step 2: device lookup.
    let device = match state.registry.lookup_device(&device_id).await {
        Some(device) => device,
        None => return (StatusCode::NOT_FOUND, Json(error_json("unknown device"))).into_response(),
    };

    // Step 3: body validation.
    let body = match body {
        Ok(Json(body)) => body,
        Err(_) => return (StatusCode::BAD_REQUEST, Json(error_json("invalid json body"))).into_response(),
    };
    if body.command.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, Json(error_json("command must not be empty"))).into_response();
    }
    let timeout = body
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(state.default_command_timeout);

    // Step 4: build the envelope.
    let correlation_id = Uuid::new_v4();
    let reply_to = stationbus_proto::response_channel(&state.source.instance);
    let message = Message::build(
        Kind::CommandRequest,
        state.source.clone(),
        Payload::CommandRequest(CommandRequest {
            device_id: device_id.clone(),
            command_name: body.command.clone(),
            parameters: body.parameters.clone(),
            timeout_ms: Some(timeout.as_millis() as u64),
        }),
        Some(correlation_id),
        Some(reply_to),
    );

    // Step 5: register then publish; deregister and 500 on publish failure.
    let waiter = state.dispatcher.register(correlation_id);
    let mut guard = WaiterGuard::new(&state.dispatcher, correlation_id);
    if let Err(e) = state.command_sender.send(&device.command_channel, &message).await {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(error_json(&e.to_string()))).into_response();
    }

    // Step 6: race delivery against the timeout.
    tokio::select! {
        result = waiter => {
            guard.disarm();
            match result {
                Ok(response) => (StatusCode::OK, Json(response.payload)).into_response(),
                Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, Json(error_json("waiter closed unexpectedly"))).into_response(),
            }
        }
        _ = tokio::time::sleep(timeout) => {
            guard.disarm();
            state.dispatcher.deregister(correlation_id);
            (
                StatusCode::GATEWAY_TIMEOUT,
                Json(serde_json::json!({
                    "error": "command timed out",
                    "correlation_id": correlation_id,
                })),
            )
                .into_response()
        }
    }
}
