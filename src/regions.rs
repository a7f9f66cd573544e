// Static region and bridge roster configuration.
//
// Bridges are grouped into five scrape regions, each backed by one upstream
// status feed. Vessels are grouped into two larger boat regions; every scrape
// region maps onto exactly one boat region.

/// A scrape region: one upstream feed covering a handful of bridges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeRegion {
    /// Upstream query key, appended to the endpoint base URL.
    pub key: &'static str,
    /// Human-readable region name used in the snapshot.
    pub name: &'static str,
    /// Short code used in bridge ids and channel names.
    pub short: &'static str,
    /// Boat region whose vessels can reach these bridges.
    pub boat_region: BoatRegionId,
}

/// One bridge of a region's roster.
#[derive(Debug, Clone, Copy)]
pub struct BridgeSite {
    pub name: &'static str,
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoatRegionId {
    Welland,
    Montreal,
}

impl BoatRegionId {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoatRegionId::Welland => "welland",
            BoatRegionId::Montreal => "montreal",
        }
    }

    pub fn from_channel(name: &str) -> Option<Self> {
        match name {
            "welland" => Some(BoatRegionId::Welland),
            "montreal" => Some(BoatRegionId::Montreal),
            _ => None,
        }
    }
}

/// Bounding box of a boat region.
#[derive(Debug, Clone, Copy)]
pub struct BoatRegion {
    pub id: BoatRegionId,
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

impl BoatRegion {
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        self.lat_min <= lat && lat <= self.lat_max && self.lon_min <= lon && lon <= self.lon_max
    }
}

/// Welland Canal: ~20 km buffer, Lake Ontario entrance down to Lake Erie.
/// Montreal South Shore: ~25 km buffer around the Seaway approaches.
pub static BOAT_REGIONS: [BoatRegion; 2] = [
    BoatRegion {
        id: BoatRegionId::Welland,
        lat_min: 42.70,
        lat_max: 43.40,
        lon_min: -79.40,
        lon_max: -79.05,
    },
    BoatRegion {
        id: BoatRegionId::Montreal,
        lat_min: 45.05,
        lat_max: 45.70,
        lon_min: -74.35,
        lon_max: -73.20,
    },
];

pub static REGIONS: [BridgeRegion; 5] = [
    BridgeRegion {
        key: "BridgeSCT",
        name: "St Catharines",
        short: "SCT",
        boat_region: BoatRegionId::Welland,
    },
    BridgeRegion {
        key: "BridgePC",
        name: "Port Colborne",
        short: "PC",
        boat_region: BoatRegionId::Welland,
    },
    BridgeRegion {
        key: "BridgeM",
        name: "Montreal South Shore",
        short: "MSS",
        boat_region: BoatRegionId::Montreal,
    },
    BridgeRegion {
        key: "BridgeK",
        name: "Kahnawake",
        short: "K",
        boat_region: BoatRegionId::Montreal,
    },
    BridgeRegion {
        key: "BridgeSBS",
        name: "Salaberry / Beauharnois",
        short: "SBS",
        boat_region: BoatRegionId::Montreal,
    },
];

/// Coordinates surveyed once; the upstream feeds carry none.
pub fn region_roster(short: &str) -> &'static [BridgeSite] {
    match short {
        "SCT" => &[
            BridgeSite { name: "Lakeshore Rd", lat: 43.21617521494522, lng: -79.21223177177772 },
            BridgeSite { name: "Carlton St.", lat: 43.19185980424842, lng: -79.20100809118367 },
            BridgeSite { name: "Queenston St.", lat: 43.165824700918485, lng: -79.19492604380804 },
            BridgeSite { name: "Glendale Ave.", lat: 43.145269317159695, lng: -79.19232941376643 },
            BridgeSite { name: "Highway 20", lat: 43.076504078254914, lng: -79.21046775066173 },
        ],
        "PC" => &[
            BridgeSite { name: "Main St.", lat: 42.90062, lng: -79.24870 },
            BridgeSite { name: "Mellanby Ave.", lat: 42.88645, lng: -79.24779 },
            BridgeSite { name: "Clarence St.", lat: 42.88204, lng: -79.24765 },
        ],
        "MSS" => &[
            BridgeSite { name: "Victoria Bridge (Downstream)", lat: 45.49736, lng: -73.52212 },
            BridgeSite { name: "Victoria Bridge (Upstream)", lat: 45.49157, lng: -73.52800 },
            BridgeSite { name: "Sainte-Catherine", lat: 45.40776, lng: -73.56813 },
        ],
        "K" => &[
            BridgeSite { name: "CP Railway 7A", lat: 45.41170, lng: -73.65023 },
            BridgeSite { name: "CP Railway 7B", lat: 45.41048, lng: -73.65291 },
        ],
        "SBS" => &[
            BridgeSite { name: "Saint-Louis-de-Gonzague", lat: 45.23937, lng: -73.98285 },
            BridgeSite { name: "Larocque", lat: 45.26812, lng: -74.10342 },
        ],
        _ => &[],
    }
}

pub fn region_by_key(key: &str) -> Option<&'static BridgeRegion> {
    REGIONS.iter().find(|r| r.key == key)
}

pub fn region_by_short(short: &str) -> Option<&'static BridgeRegion> {
    REGIONS.iter().find(|r| r.short.eq_ignore_ascii_case(short))
}

/// Boat region containing the given coordinates, if any.
pub fn boat_region_for(lat: f64, lon: f64) -> Option<BoatRegionId> {
    BOAT_REGIONS
        .iter()
        .find(|r| r.contains(lat, lon))
        .map(|r| r.id)
}

/// Bounding box covering every boat region, for the single aggregator query.
pub fn combined_bounds() -> BoatRegion {
    let mut lat_min = f64::MAX;
    let mut lat_max = f64::MIN;
    let mut lon_min = f64::MAX;
    let mut lon_max = f64::MIN;
    for r in &BOAT_REGIONS {
        lat_min = lat_min.min(r.lat_min);
        lat_max = lat_max.max(r.lat_max);
        lon_min = lon_min.min(r.lon_min);
        lon_max = lon_max.max(r.lon_max);
    }
    BoatRegion {
        id: BoatRegionId::Welland,
        lat_min,
        lat_max,
        lon_min,
        lon_max,
    }
}

/// Stable bridge id: `{SHORT}_{name reduced to ASCII letters, max 25}`.
pub fn bridge_id(short: &str, name: &str) -> String {
    let letters: String = name
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .take(25)
        .collect();
    format!("{}_{}", short, letters)
}

/// AIS vessel type code mapped to (display name, category).
/// Categories: cargo, tanker, passenger, tug, fishing, sailing, pleasure, other.
pub fn vessel_type_info(type_code: Option<u8>) -> (&'static str, &'static str) {
    let code = match type_code {
        Some(c) => c,
        None => return ("Unknown", "other"),
    };
    match code {
        20 => ("WIG", "other"),
        30 => ("Fishing", "fishing"),
        31 => ("Towing", "tug"),
        32 => ("Towing (large)", "tug"),
        33 => ("Dredger", "other"),
        34 => ("Diving Ops", "other"),
        35 => ("Military", "other"),
        36 => ("Sailing", "sailing"),
        37 => ("Pleasure Craft", "pleasure"),
        40..=44 | 49 => ("High-Speed Craft", "passenger"),
        50 => ("Pilot Vessel", "other"),
        51 => ("SAR", "other"),
        52 => ("Tug", "tug"),
        53 => ("Port Tender", "other"),
        54 => ("Anti-Pollution", "other"),
        55 => ("Law Enforcement", "other"),
        56 | 57 => ("Local Vessel", "other"),
        58 => ("Medical", "other"),
        59 => ("Special Craft", "other"),
        60..=64 | 69 => ("Passenger", "passenger"),
        70..=74 | 79 => ("Cargo", "cargo"),
        80..=84 | 89 => ("Tanker", "tanker"),
        90..=94 => ("Other", "other"),
        0..=99 => ("Unknown", "other"),
        _ => ("Invalid", "other"),
    }
}

/// Clean a vessel name for display: strip control characters, collapse
/// whitespace, drop AIS `@`-padding placeholders.
pub fn sanitize_vessel_name(name: Option<&str>) -> Option<String> {
    let name = name?;
    let cleaned: String = name
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if cleaned.is_empty() || cleaned == "UNKNOWN" || cleaned.chars().all(|c| c == '@') {
        return None;
    }
    Some(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_welland_canal_bridge_location() {
        // Vessel at the Carlton St. bridge is in the welland region
        assert_eq!(boat_region_for(43.19, -79.20), Some(BoatRegionId::Welland));
    }

    #[test]
    fn test_montreal_victoria_bridge() {
        assert_eq!(boat_region_for(45.50, -73.55), Some(BoatRegionId::Montreal));
    }

    #[test]
    fn test_outside_all_regions() {
        // Middle of Lake Ontario
        assert_eq!(boat_region_for(43.65, -78.00), None);
    }

    #[test]
    fn test_boundary_edge_included() {
        assert_eq!(boat_region_for(42.70, -79.20), Some(BoatRegionId::Welland));
    }

    #[test]
    fn test_combined_bounds_cover_both_regions() {
        let bounds = combined_bounds();
        for region in &BOAT_REGIONS {
            assert!(bounds.contains(region.lat_min, region.lon_min));
            assert!(bounds.contains(region.lat_max, region.lon_max));
        }
    }

    #[test]
    fn test_bridge_id_strips_punctuation() {
        assert_eq!(bridge_id("SCT", "Carlton St."), "SCT_CarltonSt");
        assert_eq!(bridge_id("SCT", "Highway 20"), "SCT_Highway");
        assert_eq!(bridge_id("PC", "Main St."), "PC_MainSt");
    }

    #[test]
    fn test_bridge_id_truncates() {
        let long_name = "A".repeat(40);
        let id = bridge_id("MSS", &long_name);
        assert_eq!(id.len(), "MSS_".len() + 25);
    }

    #[test]
    fn test_sct_roster_has_five_bridges() {
        assert_eq!(region_roster("SCT").len(), 5);
    }

    #[test]
    fn test_every_region_has_a_roster() {
        for region in &REGIONS {
            assert!(!region_roster(region.short).is_empty(), "{}", region.short);
        }
    }

    #[test]
    fn test_vessel_type_info() {
        assert_eq!(vessel_type_info(Some(70)), ("Cargo", "cargo"));
        assert_eq!(vessel_type_info(Some(37)), ("Pleasure Craft", "pleasure"));
        assert_eq!(vessel_type_info(Some(52)), ("Tug", "tug"));
        assert_eq!(vessel_type_info(None), ("Unknown", "other"));
        assert_eq!(vessel_type_info(Some(45)), ("Unknown", "other"));
        assert_eq!(vessel_type_info(Some(120)), ("Invalid", "other"));
    }

    #[test]
    fn test_sanitize_vessel_name() {
        assert_eq!(
            sanitize_vessel_name(Some("  FEDERAL \tKUMANO ")),
            Some("FEDERAL KUMANO".to_string())
        );
        assert_eq!(sanitize_vessel_name(Some("@@@@@@@@")), None);
        assert_eq!(sanitize_vessel_name(Some("")), None);
        assert_eq!(sanitize_vessel_name(Some("UNKNOWN")), None);
        assert_eq!(sanitize_vessel_name(None), None);
    }
}
