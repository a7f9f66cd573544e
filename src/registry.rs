// In-memory vessel registry.
//
// Map of MMSI to last-known record, fed by the UDP flush and the aggregator
// poller. Enforces the ingest contract at one boundary: ship-range MMSI,
// region membership, source precedence, movement-based retention. Readers
// take a snapshot under the lock and never hold a live handle.

use std::collections::HashMap;

use chrono::{DateTime, Duration, FixedOffset};
use tokio::sync::Mutex;
use tracing::debug;

use crate::clock::Clock;
use crate::geodesy::displacement_m;
use crate::model::{mmsi_is_ship, BoatsPayload, Dimensions, Position, VesselRecord};
use crate::regions::{boat_region_for, sanitize_vessel_name, vessel_type_info};

/// Safety cap; far more than the two regions ever hold.
const MAX_VESSELS: usize = 1000;

/// Fresh real-time data wins over the aggregator for this long.
const UDP_PRECEDENCE_SECS: i64 = 60;

/// A vessel hidden from AIS this long is gone.
const MAX_UNSEEN_MINUTES: i64 = 15;

/// A vessel that has not moved this long is docked or anchored.
const MAX_UNMOVED_MINUTES: i64 = 120;

/// Position displacement that counts as movement.
const MOVEMENT_THRESHOLD_M: f64 = 10.0;

/// One decoded update from any source, before registry validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VesselUpdate {
    pub mmsi: u32,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub speed_knots: Option<f64>,
    pub heading: Option<f64>,
    pub course: Option<f64>,
    pub name: Option<String>,
    pub type_code: Option<u8>,
    pub destination: Option<String>,
    pub dimensions: Option<Dimensions>,
}

pub struct VesselRegistry {
    vessels: Mutex<HashMap<u32, VesselRecord>>,
    clock: Clock,
}

impl VesselRegistry {
    pub fn new(clock: Clock) -> Self {
        VesselRegistry {
            vessels: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Apply one update. `source` is `udp:<station>` or `aishub`.
    pub async fn update(&self, update: VesselUpdate, source: &str) {
        let now = self.clock.now().fixed_offset();
        self.update_at(update, source, now).await;
    }

    pub async fn update_at(&self, update: VesselUpdate, source: &str, now: DateTime<FixedOffset>) {
        if !mmsi_is_ship(update.mmsi) {
            return;
        }

        let mut vessels = self.vessels.lock().await;

        let (lat, lon) = match (update.lat, update.lon) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => {
                // Static-only update: merge into an existing record or drop
                if let Some(existing) = vessels.get_mut(&update.mmsi) {
                    merge_static(existing, &update);
                }
                return;
            }
        };

        let region = match boat_region_for(lat, lon) {
            Some(region) => region,
            None => {
                // Left the tracked waterways
                vessels.remove(&update.mmsi);
                return;
            }
        };

        match vessels.get_mut(&update.mmsi) {
            None => {
                if vessels.len() >= MAX_VESSELS {
                    return;
                }
                let (type_name, type_category) = vessel_type_info(update.type_code);
                vessels.insert(update.mmsi, VesselRecord {
                    mmsi: update.mmsi,
                    name: sanitize_vessel_name(update.name.as_deref()),
                    type_code: update.type_code,
                    type_name: type_name.to_string(),
                    type_category: type_category.to_string(),
                    position: Position { lat, lon },
                    heading: update.heading,
                    course: update.course,
                    speed_knots: update.speed_knots,
                    destination: sanitize_vessel_name(update.destination.as_deref()),
                    dimensions: update.dimensions,
                    last_seen: now,
                    last_moved: now,
                    source: source.to_string(),
                    region,
                });
            }
            Some(existing) => {
                let udp = source.starts_with("udp:");
                if !udp {
                    let age = (now - existing.last_seen).num_seconds();
                    if age <= UDP_PRECEDENCE_SECS {
                        return;
                    }
                }

                if displacement_m(existing.position.lat, existing.position.lon, lat, lon)
                    > MOVEMENT_THRESHOLD_M
                {
                    existing.last_moved = now;
                }
                existing.position = Position { lat, lon };
                if update.speed_knots.is_some() {
                    existing.speed_knots = update.speed_knots;
                }
                if update.heading.is_some() {
                    existing.heading = update.heading;
                }
                if update.course.is_some() {
                    existing.course = update.course;
                }
                merge_static(existing, &update);
                existing.last_seen = now;
                existing.source = source.to_string();
                existing.region = region;
            }
        }
    }

    /// Evict stale, docked, and out-of-region vessels. Returns the count.
    pub async fn cleanup(&self) -> usize {
        let now = self.clock.now().fixed_offset();
        self.cleanup_at(now).await
    }

    pub async fn cleanup_at(&self, now: DateTime<FixedOffset>) -> usize {
        let mut vessels = self.vessels.lock().await;
        let before = vessels.len();
        vessels.retain(|_, v| {
            now - v.last_seen <= Duration::minutes(MAX_UNSEEN_MINUTES)
                && now - v.last_moved <= Duration::minutes(MAX_UNMOVED_MINUTES)
                && boat_region_for(v.position.lat, v.position.lon).is_some()
        });
        let removed = before - vessels.len();
        if removed > 0 {
            debug!("Cleaned up {removed} stale vessels");
        }
        removed
    }

    /// Snapshot of all records, sorted by MMSI.
    pub async fn snapshot(&self) -> Vec<VesselRecord> {
        let vessels = self.vessels.lock().await;
        let mut list: Vec<VesselRecord> = vessels.values().cloned().collect();
        list.sort_by_key(|v| v.mmsi);
        list
    }

    /// Current `/boats` payload.
    pub async fn boats_payload(&self) -> BoatsPayload {
        let vessels = self.snapshot().await;
        BoatsPayload {
            last_updated: Some(self.clock.now().fixed_offset()),
            vessel_count: vessels.len(),
            vessels,
        }
    }

    pub async fn len(&self) -> usize {
        self.vessels.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.vessels.lock().await.is_empty()
    }
}

fn merge_static(existing: &mut VesselRecord, update: &VesselUpdate) {
    if let Some(name) = sanitize_vessel_name(update.name.as_deref()) {
        existing.name = Some(name);
    }
    if let Some(type_code) = update.type_code {
        let (type_name, type_category) = vessel_type_info(Some(type_code));
        existing.type_code = Some(type_code);
        existing.type_name = type_name.to_string();
        existing.type_category = type_category.to_string();
    }
    if let Some(destination) = sanitize_vessel_name(update.destination.as_deref()) {
        existing.destination = Some(destination);
    }
    if update.dimensions.is_some() {
        existing.dimensions = update.dimensions;
    }
}
