use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::broadcast::BroadcastFilter;
use crate::hub::{HubDirectory, RoomConnection};
use crate::session::{Frame, SessionEvent};

#[derive(Clone)]
pub struct AppState {
    pub directory: HubDirectory,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/rooms/:room_id", get(room_handler))
        .route("/rooms/:room_id/broadcast", post(broadcast_room))
        .route("/rooms/:room_id/status", get(room_status))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: &'static str,
}

async fn health_check() -> Json<HealthStatus> {
    Json(HealthStatus { status: "ok" })
}

#[derive(Debug, Deserialize)]
struct RoomQuery {
    uid: Option<String>,
}

/// WebSocket entry point for a room. Non-upgrade requests and missing or
/// empty uids are rejected here; the hub itself never sees them.
async fn room_handler(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(query): Query<RoomQuery>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let uid = match query.uid {
        Some(uid) if !uid.trim().is_empty() => uid,
        _ => return (StatusCode::BAD_REQUEST, "uid is required").into_response(),
    };
    let Some(ws) = ws else {
        return (StatusCode::UPGRADE_REQUIRED, "Expected websocket").into_response();
    };

    match state.directory.create_room(&room_id, &uid).await {
        Ok(conn) => ws.on_upgrade(move |socket| pump_socket(socket, conn)),
        Err(err) => {
            error!(room = %room_id, %err, "failed to create room connection");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Bridge one WebSocket to its connection pair: a spawned task forwards
/// session events to the socket while this task feeds inbound frames into the
/// hub's transport ingress.
async fn pump_socket(socket: WebSocket, conn: RoomConnection) {
    let RoomConnection {
        directory,
        room_id,
        session,
        mut events,
    } = conn;
    let session_id = session.id();
    let (mut sink, mut stream) = socket.split();

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let outcome = match event {
                SessionEvent::Frame(Frame::Text(text)) => sink.send(Message::Text(text)).await,
                SessionEvent::Frame(Frame::Binary(bytes)) => {
                    sink.send(Message::Binary(bytes)).await
                }
                SessionEvent::Close => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            };
            if outcome.is_err() {
                break;
            }
        }
        debug!(session = %session_id, "socket writer finished");
    });

    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(err) => {
                warn!(room = %room_id, session = %session_id, %err, "websocket error");
                break;
            }
        };
        let frame = match msg {
            Message::Text(text) => Frame::Text(text),
            Message::Binary(bytes) => Frame::Binary(bytes),
            Message::Close(_) => break,
            // protocol-level ping/pong is answered by the transport itself
            _ => continue,
        };
        match directory.hub(&room_id).await {
            Ok(hub) => hub.ingress(&session, frame).await,
            Err(err) => {
                warn!(room = %room_id, session = %session_id, %err, "dropping inbound frame");
            }
        }
    }

    match directory.hub(&room_id).await {
        Ok(hub) => hub.on_close(&session).await,
        Err(err) => warn!(
            room = %room_id,
            session = %session_id,
            %err,
            "room not reachable during disconnect; leaving eviction to the sweep"
        ),
    }
    debug!(room = %room_id, session = %session_id, "websocket disconnected");
}

#[derive(Debug, Deserialize)]
struct BroadcastRequest {
    message: String,
    #[serde(default)]
    uid: Option<Vec<String>>,
}

/// POST /rooms/{id}/broadcast - fan a message out to the room's members.
async fn broadcast_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(payload): Json<BroadcastRequest>,
) -> Result<StatusCode, StatusCode> {
    let hub = state.directory.hub(&room_id).await.map_err(|err| {
        error!(room = %room_id, %err, "failed to activate room for broadcast");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let filter = payload
        .uid
        .map(BroadcastFilter::for_uids)
        .unwrap_or_default();
    hub.broadcast(Frame::Text(payload.message), filter).await;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
struct RoomStatusResponse {
    active_sessions: usize,
    wake_state: &'static str,
}

/// GET /rooms/{id}/status - observe a room without activating a dormant hub.
async fn room_status(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Json<RoomStatusResponse> {
    match state.directory.peek(&room_id).await {
        Some(hub) => {
            let (active_sessions, wake) = hub.status().await;
            Json(RoomStatusResponse {
                active_sessions,
                wake_state: if wake.is_armed() { "armed" } else { "unarmed" },
            })
        }
        None => Json(RoomStatusResponse {
            active_sessions: state.directory.open_session_count(&room_id),
            wake_state: "dormant",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::InMemoryWakeStore;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> (Router, AppState) {
        let state = AppState {
            directory: HubDirectory::new(Config::default(), Arc::new(InMemoryWakeStore::new())),
        };
        (router(state.clone()), state)
    }

    #[tokio::test]
    async fn health_answers_ok() {
        let (app, _) = app();
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn non_upgrade_request_is_rejected_upstream() {
        let (app, _) = app();
        let response = app
            .oneshot(
                Request::get("/rooms/lobby?uid=u1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UPGRADE_REQUIRED);
    }

    #[tokio::test]
    async fn missing_or_empty_uid_is_rejected_upstream() {
        let (app, _) = app();
        let missing = app
            .clone()
            .oneshot(Request::get("/rooms/lobby").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

        let empty = app
            .oneshot(
                Request::get("/rooms/lobby?uid=%20")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(empty.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn broadcast_route_delivers_to_connected_sessions() {
        let (app, state) = app();
        let mut conn = state.directory.create_room("lobby", "u1").await.unwrap();

        let response = app
            .oneshot(
                Request::post("/rooms/lobby/broadcast")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"message":"from http"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        match conn.recv().await {
            Some(SessionEvent::Frame(Frame::Text(text))) => assert_eq!(text, "from http"),
            other => panic!("expected the broadcast frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn status_route_reports_dormant_and_active_rooms() {
        let (app, state) = app();

        let dormant = app
            .clone()
            .oneshot(
                Request::get("/rooms/lobby/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(dormant.status(), StatusCode::OK);

        let _conn = state.directory.create_room("lobby", "u1").await.unwrap();
        let response = app
            .oneshot(
                Request::get("/rooms/lobby/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let status: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(status["active_sessions"], 1);
        assert_eq!(status["wake_state"], "armed");
    }
}
