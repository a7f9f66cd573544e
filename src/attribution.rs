// Responsible-vessel attribution.
//
// Given a closure-related bridge status and the regional vessel list, pick
// the vessel most likely to have caused it. Two regimes:
//
// - Closing soon: the vessel is approaching or waiting at the bridge. Score
//   is distance-based with a multiplier from speed and heading.
// - Closed/Closing: the vessel is actively transiting, so it must be moving;
//   distance alone scores it.

use crate::geodesy::{angle_difference, bearing_deg, haversine_km};
use crate::model::{BridgeStatus, VesselRecord};

const MAX_DISTANCE_CLOSING_SOON_KM: f64 = 7.0;
const MAX_DISTANCE_CLOSED_KM: f64 = 4.0;
const MIN_SCORE_CLOSING_SOON: f64 = 0.25;
const MIN_SCORE_CLOSED: f64 = 0.3;
/// Cap keeps a vessel sitting on the span from drowning out everything else.
const BASE_SCORE_CAP: f64 = 3.0;
/// Below this a vessel counts as stationary in the closing-soon regime.
const DRIFT_SPEED_KNOTS: f64 = 0.1;
/// Transit threshold for the closed regime.
const TRANSIT_SPEED_KNOTS: f64 = 0.5;
/// Moving away faster than this rules a vessel out entirely.
const MOVING_AWAY_SPEED_KNOTS: f64 = 1.5;
const HEADING_TOLERANCE_DEG: f64 = 60.0;
/// Only vessels within 250 m are actually waiting at the bridge.
const WAITING_ZONE_KM: f64 = 0.25;

/// Find the vessel most likely responsible for the current closure.
/// Returns its MMSI, or None when no candidate clears the threshold.
pub fn find_responsible_vessel(
    bridge_lat: f64,
    bridge_lng: f64,
    status: BridgeStatus,
    vessels: &[VesselRecord],
) -> Option<u32> {
    let closing_soon = match status {
        BridgeStatus::ClosingSoon => true,
        BridgeStatus::Closed | BridgeStatus::Closing => false,
        _ => return None,
    };
    let threshold = if closing_soon {
        MIN_SCORE_CLOSING_SOON
    } else {
        MIN_SCORE_CLOSED
    };

    let mut best: Option<(u32, f64, f64)> = None; // (mmsi, score, distance)
    for vessel in vessels {
        let distance_km = haversine_km(
            bridge_lat,
            bridge_lng,
            vessel.position.lat,
            vessel.position.lon,
        );
        let score = if closing_soon {
            score_for_closing_soon(vessel, bridge_lat, bridge_lng, distance_km)
        } else {
            score_for_closed(vessel, distance_km)
        };
        if score < threshold {
            continue;
        }
        let better = match best {
            None => true,
            Some((_, best_score, best_distance)) => {
                score > best_score || (score == best_score && distance_km < best_distance)
            }
        };
        if better {
            best = Some((vessel.mmsi, score, distance_km));
        }
    }

    best.map(|(mmsi, _, _)| mmsi)
}

/// Closed/Closing: base score only, and the vessel must be under way.
fn score_for_closed(vessel: &VesselRecord, distance_km: f64) -> f64 {
    if distance_km > MAX_DISTANCE_CLOSED_KM {
        return 0.0;
    }
    if vessel.speed_knots.unwrap_or(0.0) < TRANSIT_SPEED_KNOTS {
        return 0.0;
    }
    base_score(distance_km)
}

/// Closing soon: base score shaped by a speed/heading multiplier.
fn score_for_closing_soon(
    vessel: &VesselRecord,
    bridge_lat: f64,
    bridge_lng: f64,
    distance_km: f64,
) -> f64 {
    if distance_km > MAX_DISTANCE_CLOSING_SOON_KM {
        return 0.0;
    }

    let speed = vessel.speed_knots.unwrap_or(0.0);
    let moving = speed >= DRIFT_SPEED_KNOTS;
    let toward = heading_toward_bridge(vessel, bridge_lat, bridge_lng, moving);

    let multiplier = if moving {
        match toward {
            Some(true) => 2.0 + speed_bonus(speed),
            None => 1.0,
            Some(false) => {
                if speed >= MOVING_AWAY_SPEED_KNOTS {
                    return 0.0;
                }
                0.1
            }
        }
    } else if distance_km <= WAITING_ZONE_KM {
        match toward {
            Some(true) => 2.5,
            None => 0.1,
            Some(false) => 0.05,
        }
    } else {
        match toward {
            Some(true) => 0.2,
            None => 0.05,
            Some(false) => 0.02,
        }
    };

    base_score(distance_km) * multiplier
}

fn base_score(distance_km: f64) -> f64 {
    (1.0 / (distance_km + 0.1)).min(BASE_SCORE_CAP)
}

fn speed_bonus(speed: f64) -> f64 {
    let mut bonus = 0.0;
    if speed > 1.0 {
        bonus += 0.2;
    }
    if speed > 4.0 {
        bonus += 0.2;
    }
    bonus
}

/// Direction of travel (course preferred) for moving vessels, bow direction
/// (heading) for stationary ones.
fn vessel_direction(vessel: &VesselRecord, moving: bool) -> Option<f64> {
    if moving {
        vessel.course.or(vessel.heading)
    } else {
        vessel.heading
    }
}

/// Is the vessel pointed at the bridge within tolerance? None when the
/// direction is unknown.
fn heading_toward_bridge(
    vessel: &VesselRecord,
    bridge_lat: f64,
    bridge_lng: f64,
    moving: bool,
) -> Option<bool> {
    let direction = vessel_direction(vessel, moving)?;
    let bearing = bearing_deg(
        vessel.position.lat,
        vessel.position.lon,
        bridge_lat,
        bridge_lng,
    );
    Some(angle_difference(direction, bearing) <= HEADING_TOLERANCE_DEG)
}
