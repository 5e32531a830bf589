use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use event_roster_server::config::{BackendConfig, ServerConfig};
use event_roster_server::controller::{Controller, ControllerHandle, Registration};
use event_roster_server::error::{ControlError, StoreError};
use event_roster_server::server_protocol::{parse_client_message, ParsedClientMessage};
use event_roster_server::server_utils::is_valid_attendee_id;
use event_roster_server::store::{Backend, MemoryStore, RosterStore, SheetStore};
use event_roster_server::types::SceneView;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower_http::services::{ServeDir, ServeFile};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

const OUTBOUND_QUEUE: usize = 64;

#[derive(Clone)]
struct AppState {
    controller: ControllerHandle,
    store: Backend,
}

#[derive(Clone, Debug)]
enum OutboundMessage {
    Text(String),
    Close { code: u16, reason: String },
}

enum Wake {
    Scene(bool),
    Outbound(Option<OutboundMessage>),
}

#[derive(Debug, Deserialize)]
struct RegisterBody {
    #[serde(default)]
    name: String,
    sprite: Option<String>,
    #[serde(rename = "photoUrl")]
    photo_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RenameBody {
    name: String,
}

struct ApiError(ControlError);

impl From<ControlError> for ApiError {
    fn from(error: ControlError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            warn!(error = %self.0, "request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

fn status_for(error: &ControlError) -> StatusCode {
    match error {
        ControlError::Draw(_) | ControlError::DrawInProgress => StatusCode::CONFLICT,
        ControlError::UnknownAttendee(_) | ControlError::Store(StoreError::NotFound(_)) => {
            StatusCode::NOT_FOUND
        }
        ControlError::Store(_) => StatusCode::BAD_GATEWAY,
        ControlError::Stopped => StatusCode::SERVICE_UNAVAILABLE,
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            error!(%error, "invalid configuration");
            std::process::exit(2);
        }
    };

    let store = match build_store(&config.backend) {
        Ok(store) => store,
        Err(error) => {
            error!(%error, "failed to initialize roster store");
            std::process::exit(1);
        }
    };
    info!(backend = store.label(), sync = ?store.sync_mode(), "roster store ready");

    let (controller, controller_task) = Controller::spawn(store.clone(), config.engine.clone());
    let state = AppState {
        controller: controller.clone(),
        store,
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/scene", get(scene_handler))
        .route("/api/attendees", get(list_attendees).post(register_attendee))
        .route(
            "/api/attendees/{id}",
            patch(rename_attendee).delete(remove_attendee),
        )
        .route("/api/draw/start", post(start_draw))
        .route("/api/draw/dismiss", post(dismiss_draw))
        .route("/api/winners/reset", post(reset_winners))
        .route("/api/refresh", post(refresh_roster))
        .route("/ws", get(ws_handler))
        .with_state(state);

    let app = if let Some(static_dir) = resolve_static_dir(config.static_dir.as_ref()) {
        let index_file = static_dir.join("index.html");
        info!(root = %static_dir.display(), "serving static files");
        app.fallback_service(
            ServeDir::new(static_dir).not_found_service(ServeFile::new(index_file)),
        )
    } else {
        warn!("static file root not found; build the front-end into dist/client");
        app
    };

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(error) => {
            error!(%bind_addr, %error, "failed to bind server socket");
            std::process::exit(1);
        }
    };

    info!(port = config.port, "listening");
    if let Err(error) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(%error, "server runtime failed");
    }

    controller.shutdown();
    let _ = controller_task.await;
}

fn build_store(backend: &BackendConfig) -> Result<Backend, StoreError> {
    Ok(match backend {
        BackendConfig::Memory { db_path } => Backend::Memory(match db_path {
            Some(path) => MemoryStore::open(path.clone()),
            None => MemoryStore::new(),
        }),
        BackendConfig::Sheet { url, timeout } => {
            Backend::Sheet(SheetStore::new(url.clone(), *timeout)?)
        }
    })
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

fn resolve_static_dir(configured: Option<&PathBuf>) -> Option<PathBuf> {
    if let Some(path) = configured {
        if path.join("index.html").is_file() {
            return Some(path.clone());
        }
    }

    let candidates = [
        PathBuf::from("dist/client"),
        PathBuf::from("../../dist/client"),
    ];
    candidates
        .into_iter()
        .find(|path| path.join("index.html").is_file())
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let scene = state.controller.current_scene();
    Json(json!({
        "ok": true,
        "backend": state.store.label(),
        "sync": scene.sync,
        "lastSyncedAt": scene.last_synced_at,
        "lastFetchError": scene.last_fetch_error,
    }))
}

async fn scene_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.controller.current_scene())
}

async fn list_attendees(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let records = state
        .store
        .list_all()
        .await
        .map_err(ControlError::from)?;
    Ok(Json(records))
}

async fn register_attendee(
    State(state): State<AppState>,
    Json(body): Json<RegisterBody>,
) -> Result<impl IntoResponse, ApiError> {
    let id = state
        .controller
        .register(Registration {
            name: body.name,
            sprite: body.sprite,
            photo_url: body.photo_url,
        })
        .await?;
    info!(%id, "attendee registered");
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

async fn rename_attendee(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RenameBody>,
) -> Result<StatusCode, ApiError> {
    if !is_valid_attendee_id(&id) {
        return Ok(StatusCode::BAD_REQUEST);
    }
    state.controller.rename(&id, &body.name).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_attendee(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if !is_valid_attendee_id(&id) {
        return Ok(StatusCode::BAD_REQUEST);
    }
    state.controller.remove(&id).await?;
    info!(%id, "attendee removed");
    Ok(StatusCode::NO_CONTENT)
}

async fn start_draw(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    state.controller.start_draw().await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(state.controller.current_scene().draw),
    ))
}

async fn dismiss_draw(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let dismissed = state.controller.dismiss_draw().await?;
    Ok(Json(json!({ "dismissed": dismissed })))
}

async fn reset_winners(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.controller.reset_winners().await?;
    info!("winners reset");
    Ok(StatusCode::NO_CONTENT)
}

async fn refresh_roster(State(state): State<AppState>) -> StatusCode {
    state.controller.refresh();
    StatusCode::ACCEPTED
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: AppState, socket: WebSocket) {
    let client_id = make_id("client");
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(OUTBOUND_QUEUE);
    let mut scene = state.controller.scene();
    debug!(%client_id, "display connected");

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let writer = tokio::spawn(async move {
        // The current scene goes out immediately, then every published change.
        scene.mark_changed();
        loop {
            let wake = tokio::select! {
                changed = scene.changed() => Wake::Scene(changed.is_ok()),
                next = rx.recv() => Wake::Outbound(next),
            };
            let outbound = match wake {
                Wake::Scene(true) => {
                    OutboundMessage::Text(scene_message(&scene.borrow_and_update()))
                }
                Wake::Scene(false) => OutboundMessage::Close {
                    code: 1001,
                    reason: "server shutting down".to_string(),
                },
                Wake::Outbound(Some(outbound)) => outbound,
                Wake::Outbound(None) => break,
            };
            let should_close = matches!(outbound, OutboundMessage::Close { .. });
            let result = match outbound {
                OutboundMessage::Text(payload) => {
                    ws_sender.send(Message::Text(payload.into())).await
                }
                OutboundMessage::Close { code, reason } => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    ws_sender.send(Message::Close(Some(frame))).await
                }
            };
            if result.is_err() || should_close {
                break;
            }
        }
    });

    while let Some(received) = ws_receiver.next().await {
        let Ok(message) = received else {
            break;
        };

        match message {
            Message::Text(raw) => {
                handle_client_message(&state.controller, &tx, raw.as_str()).await;
            }
            Message::Binary(raw) => match std::str::from_utf8(&raw) {
                Ok(text) => handle_client_message(&state.controller, &tx, text).await,
                Err(_) => send_error(&tx, "invalid utf8 message"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    debug!(%client_id, "display disconnected");
    drop(tx);
    writer.abort();
    let _ = writer.await;
}

async fn handle_client_message(
    controller: &ControllerHandle,
    tx: &mpsc::Sender<OutboundMessage>,
    raw: &str,
) {
    let Some(message) = parse_client_message(raw) else {
        send_error(tx, "invalid message");
        return;
    };

    let result = match message {
        ParsedClientMessage::Ping { t } => {
            send_json(tx, &json!({ "type": "pong", "t": t }));
            Ok(())
        }
        ParsedClientMessage::Hold { id } => controller.hold(&id).await,
        ParsedClientMessage::Move { id, x, y } => controller.move_held(&id, x, y).await,
        ParsedClientMessage::Release { id } => controller.release(&id).await,
        ParsedClientMessage::StartDraw => controller.start_draw().await,
        ParsedClientMessage::DismissDraw => controller.dismiss_draw().await.map(|_| ()),
    };
    if let Err(error) = result {
        send_error(tx, &error.to_string());
    }
}

fn scene_message(scene: &SceneView) -> String {
    json!({
        "type": "scene",
        "scene": scene,
    })
    .to_string()
}

fn send_json(tx: &mpsc::Sender<OutboundMessage>, message: &Value) {
    // A display that cannot keep up just misses replies; scene frames still flow.
    let _ = tx.try_send(OutboundMessage::Text(message.to_string()));
}

fn send_error(tx: &mpsc::Sender<OutboundMessage>, message: &str) {
    send_json(
        tx,
        &json!({
            "type": "error",
            "message": message,
        }),
    );
}

fn make_id(prefix: &str) -> String {
    let seq = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{seq}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_roster_server::error::DrawRejected;

    #[test]
    fn control_errors_map_to_http_status() {
        assert_eq!(
            status_for(&ControlError::Draw(DrawRejected::EmptyRoster)),
            StatusCode::CONFLICT
        );
        assert_eq!(status_for(&ControlError::DrawInProgress), StatusCode::CONFLICT);
        assert_eq!(
            status_for(&ControlError::Store(StoreError::NotFound("x".to_string()))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&ControlError::Store(StoreError::Status(500))),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&ControlError::Stopped),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn register_body_accepts_missing_fields() {
        let body: RegisterBody =
            serde_json::from_str(r#"{"sprite":"Haley"}"#).expect("body parses");
        assert_eq!(body.name, "");
        assert_eq!(body.sprite.as_deref(), Some("Haley"));
        assert_eq!(body.photo_url, None);
    }

    #[test]
    fn scene_message_is_tagged() {
        let message: Value = serde_json::from_str(&scene_message(&SceneView::empty(
            event_roster_server::types::SyncMode::Poll,
        )))
        .expect("valid json");
        assert_eq!(message["type"], "scene");
        assert_eq!(message["scene"]["sync"], "poll");
        assert_eq!(message["scene"]["draw"]["phase"], "idle");
    }

    #[test]
    fn memory_backend_without_path_builds() {
        let store = build_store(&BackendConfig::Memory { db_path: None }).expect("memory store");
        assert_eq!(store.label(), "memory");
    }
}
