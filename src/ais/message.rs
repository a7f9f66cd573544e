// AIS payload bit decoding.
//
// The armored payload carries 6 bits per character. Fields are fixed bit
// ranges per message type (ITU-R M.1371). Only the types the registry
// consumes are decoded: 1/2/3 and 18/19 (position), 5 and 24 (static).
// Types 4, 20 and 22 are base-station / channel-management traffic and are
// reported as such so the listener can drop them.

use super::AisError;
use crate::model::Dimensions;
use crate::registry::VesselUpdate;

/// Not-available sentinels from the AIS specification.
const SOG_NOT_AVAILABLE: u32 = 1023;
const COG_NOT_AVAILABLE: u32 = 3600;
const HEADING_NOT_AVAILABLE: u32 = 511;
const LAT_NOT_AVAILABLE: f64 = 91.0;
const LON_NOT_AVAILABLE: f64 = 181.0;

/// A decoded AIS message, reduced to what the registry consumes.
#[derive(Debug, Clone, PartialEq)]
pub enum AisMessage {
    Position {
        mmsi: u32,
        lat: Option<f64>,
        lon: Option<f64>,
        speed_knots: Option<f64>,
        course: Option<f64>,
        heading: Option<f64>,
    },
    Static {
        mmsi: u32,
        name: Option<String>,
        ship_type: Option<u8>,
        destination: Option<String>,
        dimensions: Option<Dimensions>,
    },
    /// Base-station or channel-management traffic; always dropped.
    Infrastructure { msg_type: u8 },
    /// Any other message type; carries nothing the registry wants.
    Other { msg_type: u8, mmsi: u32 },
}

impl AisMessage {
    /// Project onto a registry update. Infrastructure and other messages
    /// yield nothing.
    pub fn into_update(self) -> Option<VesselUpdate> {
        match self {
            AisMessage::Position {
                mmsi,
                lat,
                lon,
                speed_knots,
                course,
                heading,
            } => Some(VesselUpdate {
                mmsi,
                lat,
                lon,
                speed_knots,
                course,
                heading,
                ..VesselUpdate::default()
            }),
            AisMessage::Static {
                mmsi,
                name,
                ship_type,
                destination,
                dimensions,
            } => Some(VesselUpdate {
                mmsi,
                name,
                type_code: ship_type,
                destination,
                dimensions,
                ..VesselUpdate::default()
            }),
            AisMessage::Infrastructure { .. } | AisMessage::Other { .. } => None,
        }
    }
}

/// Unpacked payload bits with field accessors.
struct Bits {
    bits: Vec<bool>,
}

impl Bits {
    fn from_armored(payload: &str, fill_bits: u32) -> Self {
        let mut bits = Vec::with_capacity(payload.len() * 6);
        for ch in payload.bytes() {
            let mut value = ch.wrapping_sub(48);
            if value > 40 {
                value -= 8;
            }
            for shift in (0..6).rev() {
                bits.push(value & (1 << shift) != 0);
            }
        }
        bits.truncate(bits.len().saturating_sub(fill_bits as usize));
        Bits { bits }
    }

    fn len(&self) -> usize {
        self.bits.len()
    }

    /// Unsigned integer from [start, start+len). len <= 32.
    fn uint(&self, start: usize, len: usize) -> u32 {
        let mut value = 0u32;
        for i in 0..len {
            value <<= 1;
            if self.bits.get(start + i).copied().unwrap_or(false) {
                value |= 1;
            }
        }
        value
    }

    /// Two's-complement signed integer from [start, start+len).
    fn int(&self, start: usize, len: usize) -> i32 {
        let raw = self.uint(start, len);
        let sign_bit = 1u32 << (len - 1);
        if raw & sign_bit != 0 {
            (raw | !(sign_bit | (sign_bit - 1))) as i32
        } else {
            raw as i32
        }
    }

    /// 6-bit ASCII string from [start, start+len). `@` padding and trailing
    /// spaces are trimmed; an all-padding field is None.
    fn string(&self, start: usize, len: usize) -> Option<String> {
        let mut out = String::with_capacity(len / 6);
        let mut offset = start;
        while offset + 6 <= start + len && offset + 6 <= self.len() {
            let value = self.uint(offset, 6) as u8;
            let ch = if value < 32 { (value + 64) as char } else { value as char };
            if ch == '@' {
                break;
            }
            out.push(ch);
            offset += 6;
        }
        let trimmed = out.trim_end().to_string();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    }
}

/// Decode an armored payload into a typed message.
pub fn decode_payload(payload: &str, fill_bits: u32) -> Result<AisMessage, AisError> {
    let bits = Bits::from_armored(payload, fill_bits);
    if bits.len() < 38 {
        return Err(AisError::ShortPayload(0));
    }

    let msg_type = bits.uint(0, 6) as u8;
    let mmsi = bits.uint(8, 30);

    match msg_type {
        1 | 2 | 3 => {
            if bits.len() < 137 {
                return Err(AisError::ShortPayload(msg_type));
            }
            Ok(AisMessage::Position {
                mmsi,
                lat: decode_lat(bits.int(89, 27)),
                lon: decode_lon(bits.int(61, 28)),
                speed_knots: decode_sog(bits.uint(50, 10)),
                course: decode_cog(bits.uint(116, 12)),
                heading: decode_heading(bits.uint(128, 9)),
            })
        }
        18 | 19 => {
            if bits.len() < 133 {
                return Err(AisError::ShortPayload(msg_type));
            }
            Ok(AisMessage::Position {
                mmsi,
                lat: decode_lat(bits.int(85, 27)),
                lon: decode_lon(bits.int(57, 28)),
                speed_knots: decode_sog(bits.uint(46, 10)),
                course: decode_cog(bits.uint(112, 12)),
                heading: decode_heading(bits.uint(124, 9)),
            })
        }
        5 => {
            if bits.len() < 302 {
                return Err(AisError::ShortPayload(msg_type));
            }
            Ok(AisMessage::Static {
                mmsi,
                name: bits.string(112, 120),
                ship_type: Some(bits.uint(232, 8) as u8),
                destination: bits.string(302, 120),
                dimensions: decode_dimensions(&bits, 240),
            })
        }
        24 => {
            let part = bits.uint(38, 2);
            match part {
                0 => {
                    if bits.len() < 160 {
                        return Err(AisError::ShortPayload(msg_type));
                    }
                    Ok(AisMessage::Static {
                        mmsi,
                        name: bits.string(40, 120),
                        ship_type: None,
                        destination: None,
                        dimensions: None,
                    })
                }
                1 => {
                    if bits.len() < 162 {
                        return Err(AisError::ShortPayload(msg_type));
                    }
                    Ok(AisMessage::Static {
                        mmsi,
                        name: None,
                        ship_type: Some(bits.uint(40, 8) as u8),
                        destination: None,
                        dimensions: decode_dimensions(&bits, 132),
                    })
                }
                _ => Ok(AisMessage::Other { msg_type, mmsi }),
            }
        }
        4 | 20 | 22 => Ok(AisMessage::Infrastructure { msg_type }),
        _ => Ok(AisMessage::Other { msg_type, mmsi }),
    }
}

fn decode_sog(raw: u32) -> Option<f64> {
    if raw >= SOG_NOT_AVAILABLE {
        None
    } else {
        Some(raw as f64 / 10.0)
    }
}

fn decode_cog(raw: u32) -> Option<f64> {
    if raw >= COG_NOT_AVAILABLE {
        None
    } else {
        Some(raw as f64 / 10.0)
    }
}

fn decode_heading(raw: u32) -> Option<f64> {
    // 511 is the declared sentinel; anything from 360 up is unusable
    if raw == HEADING_NOT_AVAILABLE || raw >= 360 {
        None
    } else {
        Some(raw as f64)
    }
}

fn decode_lat(raw: i32) -> Option<f64> {
    let lat = raw as f64 / 600_000.0;
    if lat == LAT_NOT_AVAILABLE || !(-90.0..=90.0).contains(&lat) {
        None
    } else {
        Some(lat)
    }
}

fn decode_lon(raw: i32) -> Option<f64> {
    let lon = raw as f64 / 600_000.0;
    if lon == LON_NOT_AVAILABLE || !(-180.0..=180.0).contains(&lon) {
        None
    } else {
        Some(lon)
    }
}

/// Dimensions from the four hull offsets starting at `start`:
/// to_bow(9) + to_stern(9) + to_port(6) + to_starboard(6).
fn decode_dimensions(bits: &Bits, start: usize) -> Option<Dimensions> {
    let to_bow = bits.uint(start, 9);
    let to_stern = bits.uint(start + 9, 9);
    let to_port = bits.uint(start + 18, 6);
    let to_starboard = bits.uint(start + 24, 6);
    let length = to_bow + to_stern;
    let width = to_port + to_starboard;
    if length == 0 && width == 0 {
        None
    } else {
        Some(Dimensions { length, width })
    }
}
