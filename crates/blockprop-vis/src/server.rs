//! Axum web server with WebSocket telemetry streaming.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use blockprop_sim::{
    BroadcastSink, DrainOutcome, FloodConfig, FloodProtocol, NetworkSnapshot, RunControl,
    RunState, SimError, Simulation, SimulationSettings, TelemetryEvent,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

/// Logical milliseconds drained between snapshot refreshes.
pub const DEFAULT_WINDOW: f64 = 250.0;

/// Telemetry events buffered per slow WebSocket client.
pub const TELEMETRY_CAPACITY: usize = 4096;

/// Body of `POST /api/start`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StartRequest {
    pub settings: SimulationSettings,
    pub protocol: FloodConfig,
}

/// Shared application state.
pub struct AppState {
    control: RwLock<RunControl>,
    telemetry: BroadcastSink,
    snapshot: RwLock<Option<NetworkSnapshot>>,
    failure: RwLock<Option<String>>,
    task: Mutex<Option<JoinHandle<()>>>,
    generation: AtomicU64,
    window: f64,
}

impl AppState {
    fn new(window: f64) -> Self {
        Self {
            control: RwLock::new(RunControl::new()),
            telemetry: BroadcastSink::new(TELEMETRY_CAPACITY),
            snapshot: RwLock::new(None),
            failure: RwLock::new(None),
            task: Mutex::new(None),
            generation: AtomicU64::new(0),
            window,
        }
    }

    /// Control handle of the current run.
    pub async fn control(&self) -> RunControl {
        self.control.read().await.clone()
    }

    pub fn telemetry(&self) -> &BroadcastSink {
        &self.telemetry
    }

    /// Replace any running simulation with a fresh one.
    ///
    /// Every run gets its own control handle, so a replaced run that has not
    /// yet observed its abort cannot touch the new run's state.
    pub async fn start(self: &Arc<Self>, request: StartRequest) -> Result<(), SimError> {
        let control = RunControl::new();
        let mut sim = Simulation::with_control(
            request.settings,
            FloodProtocol::new(request.protocol),
            Arc::new(self.telemetry.clone()),
            control.clone(),
        )?;
        sim.schedule_start();

        let mut task = self.task.lock().await;
        if let Some(previous) = task.take() {
            previous.abort();
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.control.write().await = control;
        *self.failure.write().await = None;
        *self.snapshot.write().await = Some(sim.snapshot());

        let state = Arc::clone(self);
        *task = Some(tokio::spawn(state.drive(generation, sim)));
        Ok(())
    }

    /// Drain the run window by window, publishing a snapshot after each.
    async fn drive(self: Arc<Self>, generation: u64, mut sim: Simulation<FloodProtocol>) {
        let mut until = 0.0;
        loop {
            until += self.window;
            let outcome = sim.advance_to(until).await;
            if !self.publish(generation, sim.snapshot()).await {
                return;
            }

            match outcome {
                Ok(DrainOutcome::Stepped) => tokio::task::yield_now().await,
                Ok(DrainOutcome::Paused) => sim.control().clone().resumed().await,
                Ok(outcome) => {
                    info!(?outcome, at = sim.context().now(), "simulation stopped");
                    return;
                }
                Err(err) => {
                    error!(error = %err, "simulation failed");
                    *self.failure.write().await = Some(err.to_string());
                    return;
                }
            }
        }
    }

    /// Store a snapshot unless a newer run has replaced this one.
    async fn publish(&self, generation: u64, snapshot: NetworkSnapshot) -> bool {
        let mut slot = self.snapshot.write().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            return false;
        }
        *slot = Some(snapshot);
        true
    }

    async fn status(&self) -> StatusResponse {
        let control = self.control().await;
        let snapshot = self.snapshot.read().await;
        let failure = self.failure.read().await.clone();
        match snapshot.as_ref() {
            Some(s) => StatusResponse {
                state: control.state(),
                paused: control.is_paused(),
                at: s.at,
                nodes: s.nodes.len(),
                queued: s.queued,
                processed: s.processed,
                error: failure,
            },
            None => StatusResponse {
                state: control.state(),
                paused: control.is_paused(),
                at: 0.0,
                nodes: 0,
                queued: 0,
                processed: 0,
                error: failure,
            },
        }
    }
}

/// Visualization server.
pub struct VisServer {
    state: Arc<AppState>,
}

impl VisServer {
    /// Create a server with no run started.
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    /// Create a server publishing snapshots every `window` logical ms.
    pub fn with_window(window: f64) -> Self {
        Self {
            state: Arc::new(AppState::new(window)),
        }
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Build the router for the server.
    pub fn router(&self) -> Router {
        Router::new()
            // Run control
            .route("/api/start", post(start_handler))
            .route("/api/pause", post(pause_handler))
            .route("/api/resume", post(resume_handler))
            // Inspection
            .route("/api/status", get(status_handler))
            .route("/api/snapshot", get(snapshot_handler))
            // Live telemetry
            .route("/ws", get(ws_handler))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Run the server on the given port.
    pub async fn serve(self, port: u16) -> Result<(), std::io::Error> {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Visualization server running on http://localhost:{}", port);
        axum::serve(listener, self.router()).await
    }
}

impl Default for VisServer {
    fn default() -> Self {
        Self::new()
    }
}

/// Run status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub state: RunState,
    pub paused: bool,
    pub at: f64,
    pub nodes: usize,
    pub queued: usize,
    pub processed: u64,
    pub error: Option<String>,
}

async fn start_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartRequest>,
) -> Result<Json<StatusResponse>, (StatusCode, String)> {
    state
        .start(request)
        .await
        .map_err(|err| (StatusCode::BAD_REQUEST, err.to_string()))?;
    Ok(Json(state.status().await))
}

async fn pause_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    state.control().await.pause();
    Json(state.status().await)
}

async fn resume_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    state.control().await.resume();
    Json(state.status().await)
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(state.status().await)
}

async fn snapshot_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<NetworkSnapshot>, StatusCode> {
    state
        .snapshot
        .read()
        .await
        .clone()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
    let mut telemetry = state.telemetry.subscribe();

    // Send the latest snapshot so the client can draw before events arrive
    let snapshot = state.snapshot.read().await.clone();
    if let Some(snapshot) = snapshot {
        if !send(&mut socket, &WsMessage::Snapshot(snapshot)).await {
            return;
        }
    }

    loop {
        tokio::select! {
            event = telemetry.recv() => match event {
                Ok(event) => {
                    if !send(&mut socket, &WsMessage::Telemetry(event)).await {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "websocket client fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            msg = socket.recv() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(cmd) = serde_json::from_str::<WsCommand>(&text) {
                        let reply = handle_ws_command(&state, cmd).await;
                        if !send(&mut socket, &reply).await {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

async fn send(socket: &mut WebSocket, message: &WsMessage) -> bool {
    match serde_json::to_string(message) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(err) => {
            warn!(error = %err, "dropping unserializable message");
            true
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsCommand {
    GetSnapshot,
    GetStatus,
    Pause,
    Resume,
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
enum WsMessage {
    Snapshot(NetworkSnapshot),
    Status(StatusResponse),
    Telemetry(TelemetryEvent),
}

async fn handle_ws_command(state: &Arc<AppState>, cmd: WsCommand) -> WsMessage {
    match cmd {
        WsCommand::GetSnapshot => match state.snapshot.read().await.clone() {
            Some(snapshot) => WsMessage::Snapshot(snapshot),
            None => WsMessage::Status(state.status().await),
        },
        WsCommand::GetStatus => WsMessage::Status(state.status().await),
        WsCommand::Pause => {
            state.control().await.pause();
            WsMessage::Status(state.status().await)
        }
        WsCommand::Resume => {
            state.control().await.resume();
            WsMessage::Status(state.status().await)
        }
    }
}
