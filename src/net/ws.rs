// WebSocket fanout gateway.
//
// Nothing is pushed until a client subscribes. A subscribe message replaces
// the connection's whole channel set; unknown names are dropped silently.
// The acknowledgement goes out first, then the current state for each
// subscribed top-level channel, then change-driven pushes filtered per
// client. A send that fails or stalls past the timeout drops the connection.

use std::collections::HashSet;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::bus::Event;
use crate::model::{BoatsPayload, Snapshot};
use crate::regions::{region_by_short, BoatRegionId};
use crate::state::AppState;

/// A stalled client is dropped after this long.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// One subscription channel from the closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Bridges,
    BridgesRegion(&'static str),
    Boats,
    BoatsRegion(BoatRegionId),
}

impl Channel {
    /// Parse a channel name; None for anything outside the closed set.
    pub fn parse(name: &str) -> Option<Channel> {
        match name {
            "bridges" => Some(Channel::Bridges),
            "boats" => Some(Channel::Boats),
            _ => {
                if let Some(short) = name.strip_prefix("bridges:") {
                    return region_by_short(short).map(|r| Channel::BridgesRegion(r.short));
                }
                if let Some(region) = name.strip_prefix("boats:") {
                    return BoatRegionId::from_channel(region).map(Channel::BoatsRegion);
                }
                None
            }
        }
    }

    pub fn name(&self) -> String {
        match self {
            Channel::Bridges => "bridges".to_string(),
            Channel::BridgesRegion(short) => format!("bridges:{}", short.to_lowercase()),
            Channel::Boats => "boats".to_string(),
            Channel::BoatsRegion(region) => format!("boats:{}", region.as_str()),
        }
    }
}

/// A connection's subscription set with cached top-level flags.
#[derive(Debug, Default, Clone)]
pub struct Subscription {
    channels: HashSet<Channel>,
    wants_bridges: bool,
    wants_boats: bool,
}

impl Subscription {
    /// Replace the whole set. Unknown names are dropped; the accepted names
    /// are returned for the acknowledgement.
    pub fn replace(&mut self, requested: &[String]) -> Vec<String> {
        self.channels.clear();
        let mut accepted = Vec::new();
        for name in requested {
            if let Some(channel) = Channel::parse(name) {
                if self.channels.insert(channel) {
                    accepted.push(channel.name());
                }
            }
        }
        self.wants_bridges = self
            .channels
            .iter()
            .any(|c| matches!(c, Channel::Bridges | Channel::BridgesRegion(_)));
        self.wants_boats = self
            .channels
            .iter()
            .any(|c| matches!(c, Channel::Boats | Channel::BoatsRegion(_)));
        accepted
    }

    pub fn wants_bridges(&self) -> bool {
        self.wants_bridges
    }

    pub fn wants_boats(&self) -> bool {
        self.wants_boats
    }

    /// Bridge region filter. None means all regions; empty means none.
    fn bridge_regions(&self) -> Option<Vec<&'static str>> {
        if self.channels.contains(&Channel::Bridges) {
            return None;
        }
        Some(
            self.channels
                .iter()
                .filter_map(|c| match c {
                    Channel::BridgesRegion(short) => Some(*short),
                    _ => None,
                })
                .collect(),
        )
    }

    fn boat_regions(&self) -> Option<Vec<BoatRegionId>> {
        if self.channels.contains(&Channel::Boats) {
            return None;
        }
        Some(
            self.channels
                .iter()
                .filter_map(|c| match c {
                    Channel::BoatsRegion(region) => Some(*region),
                    _ => None,
                })
                .collect(),
        )
    }

    /// The snapshot this client should see, or None when unsubscribed.
    pub fn bridges_view(&self, snapshot: &Snapshot) -> Option<Snapshot> {
        if !self.wants_bridges {
            return None;
        }
        match self.bridge_regions() {
            None => Some(snapshot.clone()),
            Some(shorts) => Some(snapshot.filtered_by_regions(&shorts)),
        }
    }

    /// The boats payload this client should see, or None when unsubscribed.
    pub fn boats_view(&self, payload: &BoatsPayload) -> Option<BoatsPayload> {
        if !self.wants_boats {
            return None;
        }
        match self.boat_regions() {
            None => Some(payload.clone()),
            Some(regions) => Some(payload.filtered_by_regions(&regions)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ClientAction {
    action: String,
    #[serde(default)]
    channels: Vec<String>,
}

/// Parse an inbound text frame. Only `{"action":"subscribe",...}` is
/// recognized; everything else is silently ignored.
pub fn parse_subscribe(text: &str) -> Option<Vec<String>> {
    let action: ClientAction = serde_json::from_str(text).ok()?;
    if action.action == "subscribe" {
        Some(action.channels)
    } else {
        None
    }
}

/// `GET /ws`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    state.client_connected();
    debug!("WebSocket client connected ({} total)", state.ws_client_count());

    let mut rx = state.bus.subscribe();
    let mut shutdown = state.shutdown.clone();
    let mut subscription = Subscription::default();

    loop {
        tokio::select! {
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        let Some(requested) = parse_subscribe(&text) else {
                            continue; // protocol errors never kill the connection
                        };
                        let accepted = subscription.replace(&requested);
                        let ack = json!({"type": "subscribed", "channels": accepted});
                        if send_json(&mut socket, &ack).await.is_err() {
                            break;
                        }
                        // Initial state for each subscribed top-level channel,
                        // after the acknowledgement
                        let current_snapshot = state.snapshot.current().await;
                        if let Some(view) =
                            subscription.bridges_view(&current_snapshot)
                        {
                            let message = json!({"type": "bridges", "data": view});
                            if send_json(&mut socket, &message).await.is_err() {
                                break;
                            }
                        }
                        if subscription.wants_boats() {
                            let payload = state.registry.boats_payload().await;
                            if let Some(view) = subscription.boats_view(&payload) {
                                let message = json!({"type": "boats", "data": view});
                                if send_json(&mut socket, &message).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!("WebSocket error: {e}");
                        break;
                    }
                    _ => {}
                }
            }
            event = rx.recv() => {
                match event {
                    Ok(Event::BridgeSnapshotChanged(snapshot)) => {
                        if let Some(view) = subscription.bridges_view(&snapshot) {
                            let message = json!({"type": "bridges", "data": view});
                            if send_json(&mut socket, &message).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Event::VesselRegistryChanged(payload)) => {
                        if let Some(view) = subscription.boats_view(&payload) {
                            let message = json!({"type": "boats", "data": view});
                            if send_json(&mut socket, &message).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "WebSocket client lagged, skipping ahead");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = shutdown.changed() => {
                let _ = socket
                    .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                        code: 1001,
                        reason: "server shutting down".into(),
                    })))
                    .await;
                break;
            }
        }
    }

    state.client_disconnected();
    debug!("WebSocket client disconnected ({} total)", state.ws_client_count());
}

/// Serialize and send one frame; a slow client counts as a failure.
async fn send_json(socket: &mut WebSocket, value: &serde_json::Value) -> Result<(), ()> {
    let text = serde_json::to_string(value).map_err(|_| ())?;
    match tokio::time::timeout(SEND_TIMEOUT, socket.send(Message::Text(text.into()))).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) | Err(_) => Err(()),
    }
}
