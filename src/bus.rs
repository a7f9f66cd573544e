// Event bus between the ingest side and the fanout gateway.
//
// The scraper and the boat probe publish; WebSocket client tasks subscribe.
// Payloads are immutable Arcs so a broadcast never copies the snapshot per
// client, and a slow subscriber lags without blocking the publisher.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::model::{BoatsPayload, Snapshot};

/// Capacity of the broadcast channel. A subscriber that falls further behind
/// than this skips ahead to the newest event.
const BUS_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub enum Event {
    /// The bridge snapshot changed observably and was committed to disk.
    BridgeSnapshotChanged(Arc<Snapshot>),
    /// The canonical boats payload changed since the last broadcast.
    VesselRegistryChanged(Arc<BoatsPayload>),
}

#[derive(Clone)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Bus { tx }
    }

    /// Publish an event to all subscribers. Returns the receiver count;
    /// zero receivers is normal when no clients are connected.
    pub fn publish(&self, event: Event) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}
