use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    body::Body,
    extract::{ConnectInfo, Path, Query, State, WebSocketUpgrade, ws::{Message, WebSocket}},
    http::{Request, StatusCode},
    middleware::{Next, from_fn},
    response::Response,
    routing::{delete, get, post},
};
use ride_tracker_lib::{
    log_entry::{EntryKind, HistoryFilter, LogEntry, NewEntry},
    user::User,
};
use serde::Deserialize;

use crate::{auth::AuthUser, error::AppError, odometer_scan, ride_endpoint, server_state::ServerState};

/// Every API route. Static files are layered on by the binary.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/history", get(get_history))
        .route("/history/live", get(live_history))
        .route("/entries", post(add_entry))
        .route("/entries/{entry_id}", delete(delete_entry))
        .route("/ride", get(ride_endpoint::ride_socket))
        .route("/odometer-scan", post(odometer_scan::scan_odometer))
        .with_state(state)
        .layer(from_fn(log_request))
}

async fn log_request(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let ip = req.extensions().get::<ConnectInfo<SocketAddr>>().map(|addr| addr.ip());

    let response = next.run(req).await;

    match ip {
        Some(ip) => tracing::debug!("{} {} from {} -> {}", method, path, ip, response.status()),
        None => tracing::debug!("{} {} -> {}", method, path, response.status()),
    }
    response
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    kind: Option<HistoryFilter>,
}

async fn get_history(
    State(state): State<Arc<ServerState>>,
    AuthUser(user): AuthUser,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<LogEntry>>, AppError> {
    let filter = query.kind.unwrap_or_default();
    let entries = state.data_manager.history(&user.owner_id, filter).await?;
    Ok(Json(entries))
}

#[derive(Debug, Deserialize)]
pub struct EntryRequest {
    kind: EntryKind,
    amount: f64,
    #[serde(default)]
    description: String,
    #[serde(default)]
    odometer: Option<f64>,
}

async fn add_entry(
    State(state): State<Arc<ServerState>>,
    AuthUser(user): AuthUser,
    Json(request): Json<EntryRequest>,
) -> Result<(StatusCode, Json<LogEntry>), AppError> {
    let entry = NewEntry::manual(request.kind, request.amount, request.description, request.odometer)?;
    let entry = state.data_manager.append_entry(&user.owner_id, entry).await?;
    tracing::info!("{} added {} entry {}", user.owner_id, entry.kind, entry.entry_id);
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn delete_entry(
    State(state): State<Arc<ServerState>>,
    AuthUser(user): AuthUser,
    Path(entry_id): Path<i64>,
) -> Result<StatusCode, AppError> {
    if !state.data_manager.delete_entry(&user.owner_id, entry_id).await? {
        return Err(AppError::NotFound);
    }
    tracing::info!("{} deleted entry {}", user.owner_id, entry_id);
    Ok(StatusCode::NO_CONTENT)
}

async fn live_history(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
    AuthUser(user): AuthUser,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let filter = query.kind.unwrap_or_default();
    ws.on_upgrade(move |socket| async move {
        let res = push_history(socket, state, user, filter).await;
        tracing::debug!("Live history connection ended with result: {:?}", res);
    })
}

async fn push_history(mut socket: WebSocket, state: Arc<ServerState>, user: User, filter: HistoryFilter) -> anyhow::Result<()> {
    let mut subscription = state.data_manager.subscribe_history(&user.owner_id, filter);

    loop {
        tokio::select! {
            entry = subscription.next() => {
                let Some(entry) = entry else {
                    break;
                };
                let json = serde_json::to_string(&entry)?;
                socket.send(Message::Text(json.into())).await?;
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(err)) => return Err(err.into()),
                Some(Ok(_)) => {}
            },
        }
    }
    Ok(())
}
