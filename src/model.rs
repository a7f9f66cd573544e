// Core data model: normalized bridge state, closure records, statistics,
// history entries, the snapshot document, and vessel records.
//
// All serialized timestamps carry an explicit offset. Wire and disk formats
// are snake_case JSON throughout.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::regions::BoatRegionId;

/// Normalized bridge status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BridgeStatus {
    Open,
    #[serde(rename = "Closing soon")]
    ClosingSoon,
    Closed,
    Closing,
    Opening,
    Construction,
    Unknown,
}

impl BridgeStatus {
    /// Normalize a raw upstream status string.
    ///
    /// The feeds phrase status from the bridge operator's perspective:
    /// "Available" means the span is down and road traffic flows, "raising"
    /// means it is going up for a vessel (closing to road traffic).
    pub fn from_raw(raw: &str) -> Self {
        let raw = raw.to_lowercase();
        if raw.contains("data unavailable") {
            return BridgeStatus::Unknown;
        }
        if raw.contains("available") && !raw.contains("unavailable") {
            if raw.contains("raising soon") {
                BridgeStatus::ClosingSoon
            } else {
                BridgeStatus::Open
            }
        } else if raw.contains("unavailable") {
            if raw.contains("lowering") {
                BridgeStatus::Opening
            } else if raw.contains("raising") {
                BridgeStatus::Closing
            } else if raw.contains("work in progress") {
                BridgeStatus::Construction
            } else {
                BridgeStatus::Closed
            }
        } else {
            BridgeStatus::Unknown
        }
    }

    /// The canonical upstream phrasing each status normalizes from.
    pub fn canonical_raw(&self) -> &'static str {
        match self {
            BridgeStatus::Open => "Available",
            BridgeStatus::ClosingSoon => "Available (raising soon)",
            BridgeStatus::Closed => "Unavailable",
            BridgeStatus::Opening => "Unavailable (lowering)",
            BridgeStatus::Closing => "Unavailable (raising)",
            BridgeStatus::Construction => "Unavailable (work in progress)",
            BridgeStatus::Unknown => "Data unavailable",
        }
    }
}

/// Status recorded in history files. Long-form strings keep the on-disk
/// layout stable across deployments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackedStatus {
    #[serde(rename = "Available")]
    Available,
    #[serde(rename = "Available (Raising Soon)")]
    RaisingSoon,
    #[serde(rename = "Unavailable (Closed)")]
    Closed,
    #[serde(rename = "Unavailable (Construction)")]
    Construction,
    #[serde(rename = "Unknown")]
    Unknown,
}

impl From<BridgeStatus> for TrackedStatus {
    fn from(status: BridgeStatus) -> Self {
        match status {
            BridgeStatus::Open => TrackedStatus::Available,
            BridgeStatus::ClosingSoon => TrackedStatus::RaisingSoon,
            BridgeStatus::Construction => TrackedStatus::Construction,
            BridgeStatus::Closed | BridgeStatus::Closing | BridgeStatus::Opening => {
                TrackedStatus::Closed
            }
            BridgeStatus::Unknown => TrackedStatus::Unknown,
        }
    }
}

/// Upcoming closure cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClosureKind {
    Construction,
    #[serde(rename = "Next Arrival")]
    NextArrival,
    #[serde(rename = "Commercial Vessel")]
    CommercialVessel,
    #[serde(rename = "Pleasure Craft")]
    PleasureCraft,
}

impl ClosureKind {
    /// Expected closure duration in minutes from the published seaway table.
    /// Next Arrival is treated as a commercial lift.
    pub fn expected_duration_minutes(&self, longer: bool) -> Option<u32> {
        match self {
            ClosureKind::CommercialVessel | ClosureKind::NextArrival => {
                Some(if longer { 30 } else { 15 })
            }
            ClosureKind::PleasureCraft => Some(if longer { 20 } else { 10 }),
            ClosureKind::Construction => None,
        }
    }

    pub fn is_boat(&self) -> bool {
        matches!(
            self,
            ClosureKind::NextArrival | ClosureKind::CommercialVessel | ClosureKind::PleasureCraft
        )
    }
}

/// One upcoming closure: a vessel lift ETA or a planned construction window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Closure {
    #[serde(rename = "type")]
    pub kind: ClosureKind,
    pub time: DateTime<FixedOffset>,
    pub longer: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub end_time: Option<DateTime<FixedOffset>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub expected_duration_minutes: Option<u32>,
}

impl Closure {
    pub fn new(kind: ClosureKind, time: DateTime<FixedOffset>, longer: bool) -> Self {
        Closure {
            kind,
            time,
            longer,
            end_time: None,
            expected_duration_minutes: kind.expected_duration_minutes(longer),
        }
    }
}

/// Predicted window for the next status transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub lower: DateTime<FixedOffset>,
    pub upper: DateTime<FixedOffset>,
}

/// Integer confidence interval, minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ci {
    pub lower: i64,
    pub upper: i64,
}

/// Closure-duration histogram. Bucketing happens on rounded whole minutes:
/// <9, <=15, <=30, <=60, over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationBuckets {
    pub under_9m: u32,
    #[serde(rename = "10_15m")]
    pub from_10_to_15m: u32,
    #[serde(rename = "16_30m")]
    pub from_16_to_30m: u32,
    #[serde(rename = "31_60m")]
    pub from_31_to_60m: u32,
    pub over_60m: u32,
}

/// Statistics derived from a bridge's closure history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub average_closure_duration: Option<i64>,
    pub closure_ci: Option<Ci>,
    pub average_raising_soon: Option<i64>,
    pub raising_soon_ci: Option<Ci>,
    pub closure_durations: DurationBuckets,
    pub total_entries: u32,
}

/// One history file entry. Newest first on disk; `duration` is wall-clock
/// seconds, filled when the bridge leaves the recorded state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub start_time: DateTime<FixedOffset>,
    pub end_time: Option<DateTime<FixedOffset>>,
    pub status: TrackedStatus,
    pub duration: Option<i64>,
}

/// Hard cap on retained history entries per bridge.
pub const MAX_HISTORY_ENTRIES: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

/// Immutable per-bridge data plus the most recent statistics block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeStatic {
    pub name: String,
    pub region: String,
    pub region_short: String,
    pub coordinates: Coordinates,
    pub statistics: Statistics,
}

/// Mutable per-bridge state, written only by the scraper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeLive {
    pub status: BridgeStatus,
    pub last_updated: DateTime<FixedOffset>,
    pub predicted: Option<Prediction>,
    pub upcoming_closures: Vec<Closure>,
    pub responsible_vessel_mmsi: Option<u32>,
}

impl BridgeLive {
    /// Equality on the observable fields only. `last_updated`, `predicted`
    /// and the responsible vessel are derived and excluded from the diff.
    pub fn observable_eq(&self, other: &BridgeLive) -> bool {
        self.status == other.status && self.upcoming_closures == other.upcoming_closures
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeRecord {
    #[serde(rename = "static")]
    pub static_info: BridgeStatic,
    pub live: BridgeLive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailableBridge {
    pub id: String,
    pub name: String,
    pub region_short: String,
    pub region: String,
}

/// The denormalized snapshot document: sole source of truth for HTTP readers
/// and for the initial sync on WebSocket subscribe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub last_updated: Option<DateTime<FixedOffset>>,
    pub available_bridges: Vec<AvailableBridge>,
    pub bridges: BTreeMap<String, BridgeRecord>,
}

impl Snapshot {
    /// Snapshot filtered to bridges whose region short code is in `shorts`.
    /// `available_bridges` is filtered the same way.
    pub fn filtered_by_regions(&self, shorts: &[&str]) -> Snapshot {
        let wanted = |region_short: &str| {
            shorts
                .iter()
                .any(|s| s.eq_ignore_ascii_case(region_short))
        };
        Snapshot {
            last_updated: self.last_updated,
            available_bridges: self
                .available_bridges
                .iter()
                .filter(|b| wanted(&b.region_short))
                .cloned()
                .collect(),
            bridges: self
                .bridges
                .iter()
                .filter(|(_, record)| wanted(&record.static_info.region_short))
                .map(|(id, record)| (id.clone(), record.clone()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub length: u32,
    pub width: u32,
}

/// A tracked vessel's last-known record. Serialization is wire-only (the
/// registry never persists); `type_code` and `last_moved` stay internal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VesselRecord {
    pub mmsi: u32,
    pub name: Option<String>,
    #[serde(skip)]
    pub type_code: Option<u8>,
    pub type_name: String,
    pub type_category: String,
    pub position: Position,
    pub heading: Option<f64>,
    pub course: Option<f64>,
    pub speed_knots: Option<f64>,
    pub destination: Option<String>,
    pub dimensions: Option<Dimensions>,
    pub last_seen: DateTime<FixedOffset>,
    #[serde(skip)]
    pub last_moved: DateTime<FixedOffset>,
    pub source: String,
    pub region: BoatRegionId,
}

/// Ship-range MMSI bounds. Values outside are base stations, SAR aircraft,
/// repeaters and other non-ship transmitters.
pub const MMSI_MIN: u32 = 200_000_000;
pub const MMSI_MAX: u32 = 799_999_999;

pub fn mmsi_is_ship(mmsi: u32) -> bool {
    (MMSI_MIN..=MMSI_MAX).contains(&mmsi)
}

/// Wire payload for `/boats` and the `boats` channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BoatsPayload {
    pub last_updated: Option<DateTime<FixedOffset>>,
    pub vessel_count: usize,
    pub vessels: Vec<VesselRecord>,
}

impl BoatsPayload {
    /// Payload filtered to vessels in the given regions.
    pub fn filtered_by_regions(&self, regions: &[BoatRegionId]) -> BoatsPayload {
        let vessels: Vec<VesselRecord> = self
            .vessels
            .iter()
            .filter(|v| regions.contains(&v.region))
            .cloned()
            .collect();
        BoatsPayload {
            last_updated: self.last_updated,
            vessel_count: vessels.len(),
            vessels,
        }
    }

    /// Canonical bytes for change detection: vessels are kept sorted by MMSI
    /// and `last_updated` is excluded so only real content changes register.
    pub fn canonical_content(&self) -> String {
        let mut vessels = self.vessels.clone();
        vessels.sort_by_key(|v| v.mmsi);
        serde_json::to_string(&vessels).unwrap_or_default()
    }
}
