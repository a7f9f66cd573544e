// AISHub aggregator poller.
//
// One bounding-box query covers the union of all boat regions per poll; the
// upstream allows one call every 61 seconds. Responses merge through the
// same registry path as UDP, where the source-precedence rules apply.

use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::model::{mmsi_is_ship, Dimensions};
use crate::regions::combined_bounds;
use crate::registry::{VesselRegistry, VesselUpdate};

/// Upstream rate limit; also the backoff base.
const BACKOFF_BASE_SECS: i64 = 61;
const BACKOFF_CAP_SECS: i64 = 300;

/// Request timeout for the aggregator.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum AisHubError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("api error: {0}")]
    Api(String),
    #[error("unexpected response shape")]
    UnexpectedShape,
}

pub struct AisHubPoller {
    registry: Arc<VesselRegistry>,
    client: reqwest::Client,
    url: String,
    api_key: String,
    clock: Clock,
    failure_count: u32,
    next_retry: Option<DateTime<FixedOffset>>,
}

impl AisHubPoller {
    pub fn new(
        registry: Arc<VesselRegistry>,
        client: reqwest::Client,
        url: String,
        api_key: String,
        clock: Clock,
    ) -> Self {
        AisHubPoller {
            registry,
            client,
            url,
            api_key,
            clock,
            failure_count: 0,
            next_retry: None,
        }
    }

    /// One poll attempt, honoring the backoff gate.
    pub async fn poll(&mut self) {
        let now = self.clock.now().fixed_offset();
        if let Some(next_retry) = self.next_retry {
            if now < next_retry {
                return;
            }
        }

        match self.fetch().await {
            Ok(updates) => {
                let count = updates.len();
                for update in updates {
                    self.registry.update(update, "aishub").await;
                }
                if self.failure_count > 0 {
                    info!("AISHub recovered after {} failures", self.failure_count);
                }
                self.failure_count = 0;
                self.next_retry = None;
                debug!("AISHub: {count} vessels");
            }
            Err(e) => {
                self.failure_count += 1;
                let backoff = backoff_seconds(self.failure_count);
                self.next_retry = Some(now + Duration::seconds(backoff));
                warn!(
                    "AISHub: {e} (attempt #{}, retry in {backoff}s)",
                    self.failure_count
                );
            }
        }
    }

    async fn fetch(&self) -> Result<Vec<VesselUpdate>, AisHubError> {
        let bounds = combined_bounds();
        let params: [(&str, String); 8] = [
            ("username", self.api_key.clone()),
            ("format", "1".to_string()),
            ("output", "json".to_string()),
            ("compress", "0".to_string()),
            ("latmin", bounds.lat_min.to_string()),
            ("latmax", bounds.lat_max.to_string()),
            ("lonmin", bounds.lon_min.to_string()),
            ("lonmax", bounds.lon_max.to_string()),
        ];
        let response = self
            .client
            .get(&self.url)
            .query(&params)
            .send()
            .await?
            .error_for_status()?;

        let body: Value = response.json().await?;
        parse_response(&body)
    }
}

/// Exponential backoff from the rate-limit base: 61, 122, 244, then capped.
pub fn backoff_seconds(failure_count: u32) -> i64 {
    if failure_count <= 1 {
        return BACKOFF_BASE_SECS;
    }
    let doubled = BACKOFF_BASE_SECS.saturating_mul(1 << (failure_count - 1).min(8));
    doubled.min(BACKOFF_CAP_SECS)
}

/// Parse the `[header, [vessels]]` response shape.
pub fn parse_response(body: &Value) -> Result<Vec<VesselUpdate>, AisHubError> {
    let items = body.as_array().ok_or(AisHubError::UnexpectedShape)?;
    let header = match items.first() {
        Some(header) => header,
        None => return Ok(Vec::new()),
    };
    if header.get("ERROR").and_then(Value::as_bool).unwrap_or(false) {
        let message = header
            .get("ERROR_MESSAGE")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        return Err(AisHubError::Api(message));
    }
    let vessels = match items.get(1).and_then(Value::as_array) {
        Some(vessels) => vessels,
        None => return Ok(Vec::new()), // empty area
    };

    let mut updates = Vec::new();
    for raw in vessels {
        if let Some(update) = parse_vessel(raw) {
            updates.push(update);
        }
    }
    Ok(updates)
}

fn parse_vessel(raw: &Value) -> Option<VesselUpdate> {
    let mmsi = raw.get("MMSI").and_then(Value::as_u64)? as u32;
    if !mmsi_is_ship(mmsi) {
        return None;
    }
    let lat = raw.get("LATITUDE").and_then(Value::as_f64)?;
    let lon = raw.get("LONGITUDE").and_then(Value::as_f64)?;
    // Absurd coordinates are dropped at this boundary; 0,0 is a bad GPS fix
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return None;
    }
    if lat == 0.0 && lon == 0.0 {
        return None;
    }

    let heading = raw
        .get("HEADING")
        .and_then(Value::as_f64)
        .filter(|&h| h < 360.0);
    let course = raw
        .get("COG")
        .and_then(Value::as_f64)
        .filter(|&c| c < 360.0);

    let dim = |key: &str| raw.get(key).and_then(Value::as_u64).unwrap_or(0) as u32;
    let (a, b, c, d) = (dim("A"), dim("B"), dim("C"), dim("D"));
    let dimensions = if a + b + c + d > 0 {
        Some(Dimensions {
            length: a + b,
            width: c + d,
        })
    } else {
        None
    };

    Some(VesselUpdate {
        mmsi,
        lat: Some(lat),
        lon: Some(lon),
        speed_knots: raw.get("SOG").and_then(Value::as_f64),
        heading,
        course,
        name: raw
            .get("NAME")
            .and_then(Value::as_str)
            .map(|s| s.to_string()),
        type_code: raw.get("TYPE").and_then(Value::as_u64).map(|t| t as u8),
        destination: raw
            .get("DEST")
            .and_then(Value::as_str)
            .map(|s| s.to_string()),
        dimensions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_backoff_starts_at_rate_limit() {
        assert_eq!(backoff_seconds(1), 61);
        assert_eq!(backoff_seconds(2), 122);
        assert_eq!(backoff_seconds(3), 244);
    }

    #[test]
    fn test_backoff_caps_at_five_minutes() {
        assert_eq!(backoff_seconds(4), 300);
        assert_eq!(backoff_seconds(10), 300);
        assert_eq!(backoff_seconds(30), 300);
    }

    #[test]
    fn test_parse_normal_response() {
        let body = json!([
            {"ERROR": false, "RECORDS": 2},
            [
                {"MMSI": 316_001_234, "LATITUDE": 43.19, "LONGITUDE": -79.20,
                 "SOG": 7.3, "COG": 184.5, "HEADING": 183,
                 "NAME": "FEDERAL KUMANO", "TYPE": 70, "DEST": "MONTREAL",
                 "A": 180, "B": 45, "C": 10, "D": 13},
                {"MMSI": 338_999_999, "LATITUDE": 45.50, "LONGITUDE": -73.55,
                 "SOG": 0.1, "COG": 360, "HEADING": 511}
            ]
        ]);
        let updates = parse_response(&body).unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].mmsi, 316_001_234);
        assert_eq!(updates[0].name.as_deref(), Some("FEDERAL KUMANO"));
        assert_eq!(
            updates[0].dimensions,
            Some(Dimensions { length: 225, width: 23 })
        );
        // Sentinel heading/course filtered
        assert_eq!(updates[1].heading, None);
        assert_eq!(updates[1].course, None);
    }

    #[test]
    fn test_parse_api_error() {
        let body = json!([{"ERROR": true, "ERROR_MESSAGE": "too frequent requests"}]);
        match parse_response(&body) {
            Err(AisHubError::Api(message)) => assert!(message.contains("frequent")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_empty_area() {
        assert!(parse_response(&json!([{"ERROR": false}])).unwrap().is_empty());
        assert!(parse_response(&json!([])).unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_non_array() {
        assert!(matches!(
            parse_response(&json!({"oops": true})),
            Err(AisHubError::UnexpectedShape)
        ));
    }

    #[test]
    fn test_vessel_validation() {
        let body = json!([
            {"ERROR": false},
            [
                {"MMSI": 111, "LATITUDE": 43.19, "LONGITUDE": -79.20},
                {"MMSI": 316_000_001, "LATITUDE": 0.0, "LONGITUDE": 0.0},
                {"MMSI": 316_000_002, "LATITUDE": 95.0, "LONGITUDE": -79.2},
                {"MMSI": 316_000_003, "LONGITUDE": -79.2},
                {"MMSI": 316_000_004, "LATITUDE": 43.19, "LONGITUDE": -79.20}
            ]
        ]);
        let updates = parse_response(&body).unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].mmsi, 316_000_004);
    }
}
