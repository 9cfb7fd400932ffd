use std::sync::Arc;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use ride_tracker_lib::{
    ChannelPositionSource, FinishOutcome, PositionFix, RideError, RideHandle, RideSnapshot, RideSummary, RideTracker,
    StaticIdentity, user::User,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{auth::MaybeUser, server_state::ServerState};

/// What the phone sends over the ride socket.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Start,
    Pause,
    Finish,
    RetrySave,
    Fix {
        lat: f64,
        lon: f64,
        /// Metres per second, as the browser reports it.
        #[serde(default)]
        speed: Option<f64>,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Snapshot { snapshot: RideSnapshot, display_speed: u32 },
    Saved { summary: RideSummary },
    Ignored,
    Error { kind: ErrorKind, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotAuthenticated,
    PersistenceFailure,
    TrackerStopped,
    Malformed,
}

impl ServerMessage {
    pub fn snapshot(snapshot: RideSnapshot) -> Self {
        ServerMessage::Snapshot {
            snapshot,
            display_speed: snapshot.display_speed(),
        }
    }

    pub fn from_outcome(result: Result<FinishOutcome, RideError>) -> Self {
        match result {
            Ok(FinishOutcome::Saved(summary)) => ServerMessage::Saved { summary },
            Ok(FinishOutcome::Ignored) => ServerMessage::Ignored,
            Err(err) => ServerMessage::from_error(err),
        }
    }

    fn from_error(err: RideError) -> Self {
        let kind = match err {
            RideError::NotAuthenticated => ErrorKind::NotAuthenticated,
            RideError::Persistence(_) => ErrorKind::PersistenceFailure,
            RideError::TrackerStopped | RideError::InvalidConfig(_) => ErrorKind::TrackerStopped,
        };
        ServerMessage::Error {
            kind,
            message: err.to_string(),
        }
    }
}

pub async fn ride_socket(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
    MaybeUser(user): MaybeUser,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        let who = user.as_ref().map(|user| user.owner_id.to_string()).unwrap_or_else(|| "guest".into());
        tracing::info!("Ride connection from {}", who);
        let res = handle_connection(socket, state, user).await;
        tracing::info!("Ride connection from {} ended with result: {:?}", who, res);
    })
}

/// One tracker per connection. The ride lives as long as the socket does.
pub async fn handle_connection(socket: WebSocket, state: Arc<ServerState>, user: Option<User>) -> anyhow::Result<()> {
    let source = ChannelPositionSource::new();
    let tracker = RideTracker::new(
        state.cost,
        Arc::new(source.clone()),
        Arc::new(StaticIdentity(user.map(|user| user.owner_id))),
        Arc::new(state.data_manager.clone()),
    );
    let handle = tracker.spawn();

    let (mut sender, mut receiver) = socket.split();
    let (replies, mut outgoing) = mpsc::channel::<ServerMessage>(16);
    let mut snapshots = handle.subscribe();

    // Pushes snapshot changes and command replies to the client
    let send_task = tokio::spawn(async move {
        let initial = *snapshots.borrow_and_update();
        send(&mut sender, &ServerMessage::snapshot(initial)).await?;

        loop {
            let message = tokio::select! {
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = *snapshots.borrow_and_update();
                    ServerMessage::snapshot(snapshot)
                }
                reply = outgoing.recv() => match reply {
                    Some(reply) => reply,
                    None => break,
                },
            };
            send(&mut sender, &message).await?;
        }
        anyhow::Ok(())
    });

    while let Some(message) = receiver.next().await {
        let text = match message? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let reply = match serde_json::from_str::<ClientMessage>(text.as_str()) {
            Ok(message) => handle_message(&handle, &source, message).await,
            Err(err) => {
                tracing::debug!("Malformed ride message: {}", err);
                Some(ServerMessage::Error {
                    kind: ErrorKind::Malformed,
                    message: err.to_string(),
                })
            }
        };

        if let Some(reply) = reply {
            if replies.send(reply).await.is_err() {
                break;
            }
        }
    }

    send_task.abort();
    source.close();
    Ok(())
}

/// Applies one client message. Returns the reply for commands that have one, snapshots
/// reach the client through the watch channel.
pub async fn handle_message(
    handle: &RideHandle,
    source: &ChannelPositionSource,
    message: ClientMessage,
) -> Option<ServerMessage> {
    let result = match message {
        ClientMessage::Start => handle.start().await.map(|_| ()),
        ClientMessage::Pause => handle.pause().await.map(|_| ()),
        ClientMessage::Finish => return Some(ServerMessage::from_outcome(handle.finish().await)),
        ClientMessage::RetrySave => return Some(ServerMessage::from_outcome(handle.retry_save().await)),
        ClientMessage::Fix {
            lat,
            lon,
            speed,
            timestamp,
        } => {
            let fix = PositionFix::new(lat, lon, speed, timestamp.unwrap_or_else(Utc::now));
            if !source.push(fix) {
                tracing::trace!("Fix dropped, ride is not tracking");
            }
            Ok(())
        }
    };

    result.err().map(ServerMessage::from_error)
}

async fn send(sender: &mut futures::stream::SplitSink<WebSocket, Message>, message: &ServerMessage) -> anyhow::Result<()> {
    let json = serde_json::to_string(message)?;
    sender.send(Message::Text(json.into())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use ride_tracker_lib::{CostConfig, OwnerId, RideSink, RideStatus, collaborators::PersistenceError};
    use tokio::time;

    use super::*;

    #[derive(Default)]
    struct MemorySink(Mutex<Vec<(OwnerId, RideSummary)>>);

    #[async_trait]
    impl RideSink for MemorySink {
        async fn append_ride(&self, owner: &OwnerId, summary: &RideSummary) -> Result<(), PersistenceError> {
            self.0.lock().unwrap().push((owner.clone(), *summary));
            Ok(())
        }
    }

    fn tracker(owner: Option<&str>) -> (RideHandle, ChannelPositionSource, Arc<MemorySink>) {
        let source = ChannelPositionSource::new();
        let sink = Arc::new(MemorySink::default());
        let handle = RideTracker::new(
            CostConfig::default(),
            Arc::new(source.clone()),
            Arc::new(StaticIdentity(owner.and_then(OwnerId::new))),
            sink.clone(),
        )
        .spawn();
        (handle, source, sink)
    }

    fn fix(lat: f64, lon: f64) -> ClientMessage {
        ClientMessage::Fix {
            lat,
            lon,
            speed: None,
            timestamp: None,
        }
    }

    #[test]
    fn parse_client_messages() {
        assert_eq!(serde_json::from_str::<ClientMessage>(r#"{"type":"start"}"#).unwrap(), ClientMessage::Start);
        assert_eq!(
            serde_json::from_str::<ClientMessage>(r#"{"type":"retry_save"}"#).unwrap(),
            ClientMessage::RetrySave
        );
        assert_eq!(
            serde_json::from_str::<ClientMessage>(r#"{"type":"fix","lat":12.9716,"lon":77.5946,"speed":8.0}"#).unwrap(),
            ClientMessage::Fix {
                lat: 12.9716,
                lon: 77.5946,
                speed: Some(8.0),
                timestamp: None
            }
        );
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"fly"}"#).is_err());
    }

    #[test]
    fn snapshot_message_carries_display_speed() {
        let snapshot = RideSnapshot {
            status: RideStatus::Running,
            elapsed_seconds: 12,
            total_distance_km: 0.1,
            speed_kmh: 28.8,
            estimated_cost: 0.23,
            gps_status: ride_tracker_lib::GpsStatus::Locked,
        };
        let json = serde_json::to_value(ServerMessage::snapshot(snapshot)).unwrap();
        assert_eq!(json["type"], "snapshot");
        assert_eq!(json["display_speed"], 29);
        assert_eq!(json["snapshot"]["status"], "running");
        assert_eq!(json["snapshot"]["gps_status"], "locked");
    }

    #[test]
    fn errors_become_tagged_messages() {
        let json = serde_json::to_value(ServerMessage::from_outcome(Err(RideError::NotAuthenticated))).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["kind"], "not_authenticated");

        let json = serde_json::to_value(ServerMessage::from_outcome(Ok(FinishOutcome::Ignored))).unwrap();
        assert_eq!(json["type"], "ignored");
    }

    #[tokio::test(start_paused = true)]
    async fn messages_drive_a_ride_to_a_saved_summary() {
        let (handle, source, sink) = tracker(Some("alice"));

        assert_eq!(handle_message(&handle, &source, ClientMessage::Start).await, None);
        assert_eq!(handle_message(&handle, &source, fix(12.9716, 77.5946)).await, None);
        assert_eq!(handle_message(&handle, &source, fix(12.9816, 77.5946)).await, None);
        time::sleep(std::time::Duration::from_millis(2500)).await;

        let Some(ServerMessage::Saved { summary }) = handle_message(&handle, &source, ClientMessage::Finish).await else {
            panic!("ride was not saved");
        };
        assert!((summary.distance_km - 1.112).abs() < 0.01);
        assert_eq!(summary.duration_seconds, 2);
        assert_eq!(sink.0.lock().unwrap().len(), 1);

        assert_eq!(
            handle_message(&handle, &source, ClientMessage::Finish).await,
            Some(ServerMessage::Ignored)
        );
    }

    #[tokio::test]
    async fn guest_rides_are_not_saved() {
        let (handle, source, sink) = tracker(None);

        handle_message(&handle, &source, ClientMessage::Start).await;
        let reply = handle_message(&handle, &source, ClientMessage::Finish).await;
        assert!(matches!(
            reply,
            Some(ServerMessage::Error {
                kind: ErrorKind::NotAuthenticated,
                ..
            })
        ));
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn fixes_while_paused_are_dropped() {
        let (handle, source, _sink) = tracker(Some("alice"));

        handle_message(&handle, &source, ClientMessage::Start).await;
        handle_message(&handle, &source, ClientMessage::Pause).await;
        handle_message(&handle, &source, fix(12.9716, 77.5946)).await;

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.status, RideStatus::Paused);
        assert!(!source.is_subscribed());
    }
}
