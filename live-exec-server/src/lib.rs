use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use live_exec::{available_languages, ExecutionService, Language, RunnerConfig, ServerEvent};
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, info_span, warn, Instrument};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Server error: {0}")]
    ServerError(String),
}

#[derive(Clone)]
pub struct AppState {
    service: ExecutionService,
}

pub async fn create_app(config: RunnerConfig) -> Result<Router, ServerError> {
    tokio::fs::create_dir_all(&config.workspace_root)
        .await
        .map_err(|e| {
            ServerError::ServerError(format!(
                "Cannot use workspace root {}: {}",
                config.workspace_root.display(),
                e
            ))
        })?;

    let state = AppState {
        service: ExecutionService::new(config),
    };

    let cors = CorsLayer::permissive();

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/languages", get(languages))
        .route("/ws", get(connect))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    Ok(app)
}

pub async fn run_server(app: Router, addr: SocketAddr) -> Result<(), ServerError> {
    info!("Starting live execution server on {}", addr);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::ServerError(e.to_string()))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| ServerError::ServerError(e.to_string()))?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

/// Languages whose toolchain is installed on this host
async fn languages() -> Json<Vec<Language>> {
    Json(available_languages())
}

async fn connect(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve_session(socket, state.service))
}

/// Pump one connection: client frames into the session, session events
/// back out, until either side goes away.
async fn serve_session(socket: WebSocket, service: ExecutionService) {
    let mut session = service.open_session();
    let span = info_span!("session", id = %session.id());

    async move {
        info!("Client connected");
        let (mut sink, mut stream) = socket.split();

        loop {
            let outgoing = tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => session.handle_text(&text).await,
                    Some(Ok(Message::Binary(_))) => Some(ServerEvent::error(
                        &live_exec::Error::Protocol("binary frames are not supported".to_string()),
                    )),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => None,
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                },
                event = session.recv() => session.apply(event).await,
            };

            let Some(event) = outgoing else { continue };
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    warn!("Failed to serialize event: {}", e);
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(json)).await {
                debug!("Client went away: {}", e);
                break;
            }
        }

        session.close().await;
        info!("Client disconnected");
    }
    .instrument(span)
    .await
}
