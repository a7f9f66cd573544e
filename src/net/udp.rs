// UDP listener for AIS dispatchers.
//
// Each datagram carries one or more NMEA sentences. Decoded updates are
// coalesced into a per-source buffer keyed by MMSI (last writer wins within
// the window) and flushed to the registry on a fixed 5 second timer, which
// absorbs bursts and collapses redundant packets. The sender IP identifies
// the station via the configured map; unmapped IPs get synthetic udpN ids.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::ais::{decode_payload, parse_sentence, AisMessage, SentenceAssembler};
use crate::model::mmsi_is_ship;
use crate::registry::{VesselRegistry, VesselUpdate};

/// Buffer flush cadence.
const FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Per-station cap on buffered vessels within one flush window.
const MAX_BUFFERED_VESSELS: usize = 500;

/// Cap on synthetic station ids handed to unmapped sender IPs.
const MAX_DYNAMIC_STATIONS: usize = 8;

/// Station attribution and packet-to-update pipeline, kept separate from the
/// socket so it can be exercised directly.
pub struct PacketPipeline {
    configured: HashMap<IpAddr, String>,
    dynamic: HashMap<IpAddr, String>,
    assembler: SentenceAssembler,
    /// station -> mmsi -> pending update
    buffers: HashMap<String, HashMap<u32, VesselUpdate>>,
    pub messages_received: u64,
    pub decode_failures: u64,
}

impl PacketPipeline {
    pub fn new(configured: HashMap<IpAddr, String>) -> Self {
        PacketPipeline {
            configured,
            dynamic: HashMap::new(),
            assembler: SentenceAssembler::new(),
            buffers: HashMap::new(),
            messages_received: 0,
            decode_failures: 0,
        }
    }

    /// Station id for a sender IP. None once the synthetic-id budget is spent.
    fn station_for(&mut self, ip: IpAddr) -> Option<String> {
        if let Some(station) = self.configured.get(&ip) {
            return Some(station.clone());
        }
        if let Some(station) = self.dynamic.get(&ip) {
            return Some(station.clone());
        }
        if self.dynamic.len() >= MAX_DYNAMIC_STATIONS {
            return None;
        }
        let station = format!("udp{}", self.dynamic.len() + 1);
        info!("UDP station {station} registered from {ip}");
        self.dynamic.insert(ip, station.clone());
        Some(station)
    }

    /// Decode every sentence in a datagram and buffer the resulting updates.
    pub fn process_datagram(&mut self, data: &[u8], peer: IpAddr) {
        let station = match self.station_for(peer) {
            Some(station) => station,
            None => return,
        };

        let text = String::from_utf8_lossy(data);
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            self.messages_received += 1;

            let sentence = match parse_sentence(line) {
                Ok(sentence) => sentence,
                Err(e) => {
                    self.decode_failures += 1;
                    debug!("UDP:{station} sentence error: {e}");
                    continue;
                }
            };
            let (payload, fill_bits) = match self.assembler.push(sentence) {
                Some(complete) => complete,
                None => continue,
            };
            let message = match decode_payload(&payload, fill_bits) {
                Ok(message) => message,
                Err(e) => {
                    self.decode_failures += 1;
                    debug!("UDP:{station} decode error: {e}");
                    continue;
                }
            };
            if matches!(message, AisMessage::Infrastructure { .. }) {
                continue;
            }
            let update = match message.into_update() {
                Some(update) => update,
                None => continue,
            };
            if !mmsi_is_ship(update.mmsi) {
                continue;
            }
            self.buffer(&station, update);
        }
    }

    fn buffer(&mut self, station: &str, update: VesselUpdate) {
        let buffer = self.buffers.entry(station.to_string()).or_default();
        match buffer.get_mut(&update.mmsi) {
            Some(existing) => merge_buffered(existing, update),
            None => {
                if buffer.len() < MAX_BUFFERED_VESSELS {
                    buffer.insert(update.mmsi, update);
                }
            }
        }
    }

    /// Take everything buffered since the last flush.
    pub fn drain(&mut self) -> Vec<(String, VesselUpdate)> {
        let mut out = Vec::new();
        for (station, buffer) in std::mem::take(&mut self.buffers) {
            let source = format!("udp:{station}");
            for (_, update) in buffer {
                out.push((source.clone(), update));
            }
        }
        out
    }

    pub fn buffered(&self) -> usize {
        self.buffers.values().map(|b| b.len()).sum()
    }
}

/// Newer non-null fields overwrite; everything else is preserved.
fn merge_buffered(existing: &mut VesselUpdate, update: VesselUpdate) {
    if update.lat.is_some() && update.lon.is_some() {
        existing.lat = update.lat;
        existing.lon = update.lon;
    }
    if update.speed_knots.is_some() {
        existing.speed_knots = update.speed_knots;
    }
    if update.heading.is_some() {
        existing.heading = update.heading;
    }
    if update.course.is_some() {
        existing.course = update.course;
    }
    if update.name.is_some() {
        existing.name = update.name;
    }
    if update.type_code.is_some() {
        existing.type_code = update.type_code;
    }
    if update.destination.is_some() {
        existing.destination = update.destination;
    }
    if update.dimensions.is_some() {
        existing.dimensions = update.dimensions;
    }
}

/// The bound UDP socket plus its receive/flush task.
pub struct AisUdpServer {
    local_addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
}

impl AisUdpServer {
    /// Bind and start listening; decoded updates flow into the registry.
    pub async fn start(
        addr: SocketAddr,
        registry: Arc<VesselRegistry>,
        station_map: HashMap<IpAddr, String>,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            let mut pipeline = PacketPipeline::new(station_map);
            let mut buf = [0u8; 65535];
            let mut flush = tokio::time::interval(FLUSH_INTERVAL);
            flush.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    result = socket.recv_from(&mut buf) => {
                        match result {
                            Ok((size, peer)) => {
                                pipeline.process_datagram(&buf[..size], peer.ip());
                            }
                            Err(e) => {
                                debug!("UDP receive error: {e}");
                            }
                        }
                    }
                    _ = flush.tick() => {
                        for (source, update) in pipeline.drain() {
                            registry.update(update, &source).await;
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        // Final flush so late packets are not lost
                        for (source, update) in pipeline.drain() {
                            registry.update(update, &source).await;
                        }
                        info!(
                            "AIS UDP listener stopped ({} messages, {} decode failures)",
                            pipeline.messages_received, pipeline.decode_failures
                        );
                        break;
                    }
                }
            }
        });

        info!("AIS UDP listener on {local_addr}");
        Ok(AisUdpServer {
            local_addr,
            shutdown_tx,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}
