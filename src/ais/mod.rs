// AIS NMEA decoding: sentence framing and payload bit decode.

pub mod message;
pub mod sentence;

pub use message::{decode_payload, AisMessage};
pub use sentence::{parse_sentence, SentenceAssembler};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AisError {
    #[error("not an NMEA sentence")]
    NotNmea,
    #[error("too few sentence fields")]
    TooFewFields,
    #[error("bad field: {0}")]
    BadField(&'static str),
    #[error("checksum mismatch")]
    BadChecksum,
    #[error("payload too short for message type {0}")]
    ShortPayload(u8),
}
