use std::{collections::BTreeMap, convert::Infallible, sync::Arc};

use anyhow::Context;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use control::{
    coerce::parse_uid,
    listener::{self, DEFAULT_LISTEN_PORT},
    Dispatcher, Intent, ListenerConfig, UdpTransport,
};
use event_bus::EventBus;
use futures::{SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::{
    domain::{DeviceUid, LocoState, LocoSummary, SwitchSummary},
    error::{ApiError, ControlError, ErrorCode},
    protocol::{StateSnapshot, SwitchStateResponse},
};
use state_store::StateStore;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;

use app_state::{AppState, Catalog};
use config::{load_settings, parse_device_addr, parse_policy, parse_socket_addr};

const HTTP_PORT: u16 = 5005;
const MAX_REQUEST_BYTES: usize = 16 * 1024;

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

#[derive(Debug, Deserialize)]
struct StopButtonRequest {
    state: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ControlEventRequest {
    loco_id: Option<Value>,
    speed: Option<Value>,
    direction: Option<Value>,
    function: Option<Value>,
    value: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct KeyboardEventRequest {
    idx: Option<Value>,
    value: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct LocoStateQuery {
    loco_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StatusResponse {
    status: String,
}

impl StatusResponse {
    fn ok() -> Json<Self> {
        Json(Self {
            status: "ok".into(),
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum LocoStateResponse {
    One(LocoState),
    All(BTreeMap<DeviceUid, LocoState>),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = load_settings();
    let http_addr = parse_socket_addr(&settings.http_bind, HTTP_PORT)?;
    let device = parse_device_addr(&settings.device_addr)?;
    let listen_bind = parse_socket_addr(&settings.listen_bind, DEFAULT_LISTEN_PORT)?;
    let policy = parse_policy(&settings.inbound_policy)?;

    let store = Arc::new(StateStore::new(EventBus::with_capacity(
        settings.subscriber_capacity,
    )));
    store.register_locos(settings.locos.iter().map(|loco| loco.uid));

    let transport = UdpTransport::bind(device)
        .with_context(|| format!("failed to open UDP socket towards {device}"))?;
    info!(device = %transport.device(), "device transport ready");

    // Without the listener the bridge still forwards commands.
    let _listener = listener::spawn(
        ListenerConfig {
            bind: listen_bind,
            read_timeout: settings.read_timeout(),
            policy,
        },
        Arc::clone(&store),
    )
    .ok();

    let state = AppState {
        dispatcher: Dispatcher::new(store, Arc::new(transport)),
        catalog: Arc::new(Catalog {
            locos: settings.locos,
            switches: settings.switches,
        }),
    };
    let app = build_router(Arc::new(state));

    info!(%http_addr, "bridge listening");
    let tcp = tokio::net::TcpListener::bind(http_addr).await?;
    axum::serve(tcp, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/stop_button", post(stop_button))
        .route("/api/control_event", post(control_event))
        .route("/api/keyboard_event", post(keyboard_event))
        .route("/api/loco_state", get(loco_state))
        .route("/api/switch_state", get(switch_state))
        .route("/api/state", get(full_state))
        .route("/api/loco_list", get(loco_list))
        .route("/api/switch_list", get(switch_list))
        .route("/api/events", get(sse_events))
        .route("/ws", get(ws_handler))
        .fallback(not_found)
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BYTES))
        .with_state(state)
}

fn control_error(error: ControlError) -> (StatusCode, Json<ApiError>) {
    let status = match error.code() {
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Transmit => StatusCode::BAD_GATEWAY,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ApiError::new(error.code(), error.to_string())))
}

/// The device send is a blocking socket call, so it runs on the blocking pool.
async fn dispatch(
    state: &AppState,
    intent: Result<Intent, ControlError>,
) -> ApiResult<Json<StatusResponse>> {
    let intent = intent.map_err(control_error)?;
    let dispatcher = state.dispatcher.clone();
    tokio::task::spawn_blocking(move || dispatcher.dispatch(intent))
        .await
        .map_err(|error| {
            error!(%error, ?intent, "dispatch task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError::new(ErrorCode::Internal, "dispatch task failed")),
            )
        })?
        .map_err(control_error)?;
    Ok(StatusResponse::ok())
}

async fn not_found() -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::NOT_FOUND,
        Json(ApiError::new(ErrorCode::NotFound, "no such route")),
    )
}

async fn healthz() -> &'static str {
    "ok"
}

async fn stop_button(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StopButtonRequest>,
) -> ApiResult<Json<StatusResponse>> {
    dispatch(&state, Intent::toggle_system(req.state.as_ref())).await
}

async fn control_event(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ControlEventRequest>,
) -> ApiResult<Json<StatusResponse>> {
    let uid = req.loco_id.as_ref();
    let intent = match (&req.speed, &req.direction, &req.function) {
        (Some(speed), None, None) => Intent::set_speed(uid, Some(speed)),
        (None, Some(direction), None) => Intent::set_direction(uid, Some(direction)),
        (None, None, Some(function)) => Intent::set_function(uid, Some(function), req.value.as_ref()),
        _ => Err(ControlError::invalid_value(
            "control_event",
            "expected exactly one of speed, direction or function",
        )),
    };
    dispatch(&state, intent).await
}

async fn keyboard_event(
    State(state): State<Arc<AppState>>,
    Json(req): Json<KeyboardEventRequest>,
) -> ApiResult<Json<StatusResponse>> {
    dispatch(&state, Intent::set_switch(req.idx.as_ref(), req.value.as_ref())).await
}

async fn loco_state(
    State(state): State<Arc<AppState>>,
    Query(q): Query<LocoStateQuery>,
) -> ApiResult<Json<LocoStateResponse>> {
    let store = state.dispatcher.store();
    match q.loco_id {
        Some(raw) => {
            let uid = parse_uid(Some(&Value::String(raw))).map_err(control_error)?;
            Ok(Json(LocoStateResponse::One(store.loco_state(uid))))
        }
        None => Ok(Json(LocoStateResponse::All(store.snapshot().locos))),
    }
}

async fn switch_state(State(state): State<Arc<AppState>>) -> Json<SwitchStateResponse> {
    Json(SwitchStateResponse {
        switch_state: state.dispatcher.store().switches(),
    })
}

async fn full_state(State(state): State<Arc<AppState>>) -> Json<StateSnapshot> {
    Json(state.dispatcher.store().snapshot())
}

async fn loco_list(State(state): State<Arc<AppState>>) -> Json<Vec<LocoSummary>> {
    Json(state.catalog.locos.clone())
}

async fn switch_list(State(state): State<Arc<AppState>>) -> Json<Vec<SwitchSummary>> {
    Json(state.catalog.switches.clone())
}

async fn sse_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let subscription = state.dispatcher.store().subscribe();
    debug!(subscriber = ?subscription.id(), "sse observer connected");
    let events = subscription.map(|payload| Ok(SseEvent::default().data(&*payload)));
    Sse::new(events).keep_alive(KeepAlive::default())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket))
}

async fn ws_connection(state: Arc<AppState>, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let mut subscription = state.dispatcher.store().subscribe();
    debug!(subscriber = ?subscription.id(), "websocket observer connected");

    let send_task = tokio::spawn(async move {
        while let Some(payload) = subscription.next().await {
            if sender.send(Message::Text(payload.to_string())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = receiver.next().await {
        if matches!(message, Message::Close(_)) {
            break;
        }
    }

    send_task.abort();
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
