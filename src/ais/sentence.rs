// NMEA 0183 sentence framing for AIS (!AIVDM / !AIVDO).
//
// A datagram carries one or more sentences. Single-fragment sentences decode
// immediately; multi-fragment messages are buffered per (message id, channel)
// until every fragment arrives. Incomplete groups are swept after 10 seconds
// so a lost fragment cannot pin memory.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::AisError;

/// Upper bound on concurrently buffered multipart groups.
const MAX_MULTIPART_GROUPS: usize = 100;

/// Incomplete fragments older than this are dropped.
const MULTIPART_MAX_AGE: Duration = Duration::from_secs(10);

/// Sweep cadence, counted in received sentences.
const SWEEP_EVERY: u64 = 100;

/// One parsed NMEA sentence, payload still armored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    pub fragment_count: u32,
    pub fragment_number: u32,
    pub message_id: String,
    pub channel: String,
    pub payload: String,
    pub fill_bits: u32,
}

/// Parse one sentence line, verifying the checksum when present.
pub fn parse_sentence(line: &str) -> Result<Sentence, AisError> {
    let line = line.trim();
    if !line.starts_with('!') {
        return Err(AisError::NotNmea);
    }

    let body = &line[1..];
    let (body, checksum) = match body.split_once('*') {
        Some((body, checksum)) => (body, Some(checksum)),
        None => (body, None),
    };

    if let Some(checksum) = checksum {
        let expected = u8::from_str_radix(checksum.trim(), 16).map_err(|_| AisError::BadChecksum)?;
        let actual = body.bytes().fold(0u8, |acc, b| acc ^ b);
        if actual != expected {
            return Err(AisError::BadChecksum);
        }
    }

    let fields: Vec<&str> = body.split(',').collect();
    if fields.len() < 7 {
        return Err(AisError::TooFewFields);
    }

    let fragment_count: u32 = fields[1].parse().map_err(|_| AisError::BadField("fragment_count"))?;
    let fragment_number: u32 = fields[2].parse().map_err(|_| AisError::BadField("fragment_number"))?;
    if fragment_count == 0 || fragment_number == 0 || fragment_number > fragment_count {
        return Err(AisError::BadField("fragment_number"));
    }
    let fill_bits: u32 = fields[6].parse().map_err(|_| AisError::BadField("fill_bits"))?;

    Ok(Sentence {
        fragment_count,
        fragment_number,
        message_id: fields[3].to_string(),
        channel: fields[4].to_string(),
        payload: fields[5].to_string(),
        fill_bits,
    })
}

struct FragmentGroup {
    parts: Vec<Option<String>>,
    fill_bits: u32,
    created: Instant,
}

/// Reassembles multipart AIS messages.
#[derive(Default)]
pub struct SentenceAssembler {
    groups: HashMap<(String, String), FragmentGroup>,
    received: u64,
}

impl SentenceAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one sentence. Returns the complete armored payload plus the fill
    /// bit count of the final fragment once every fragment has arrived.
    pub fn push(&mut self, sentence: Sentence) -> Option<(String, u32)> {
        self.received += 1;
        if self.received % SWEEP_EVERY == 0 {
            self.sweep(MULTIPART_MAX_AGE);
        }

        if sentence.fragment_count == 1 {
            return Some((sentence.payload, sentence.fill_bits));
        }

        let key = (sentence.message_id.clone(), sentence.channel.clone());
        if !self.groups.contains_key(&key) {
            if self.groups.len() >= MAX_MULTIPART_GROUPS {
                return None;
            }
            self.groups.insert(
                key.clone(),
                FragmentGroup {
                    parts: vec![None; sentence.fragment_count as usize],
                    fill_bits: 0,
                    created: Instant::now(),
                },
            );
        }
        let group = self.groups.get_mut(&key)?;

        let index = (sentence.fragment_number - 1) as usize;
        if index >= group.parts.len() {
            self.groups.remove(&key);
            return None;
        }
        if sentence.fragment_number == sentence.fragment_count {
            group.fill_bits = sentence.fill_bits;
        }
        group.parts[index] = Some(sentence.payload);

        if group.parts.iter().all(|p| p.is_some()) {
            let group = self.groups.remove(&key)?;
            let payload: String = group.parts.into_iter().flatten().collect();
            return Some((payload, group.fill_bits));
        }
        None
    }

    /// Drop incomplete groups older than `max_age`.
    pub fn sweep(&mut self, max_age: Duration) {
        self.groups.retain(|_, g| g.created.elapsed() <= max_age);
    }

    pub fn pending(&self) -> usize {
        self.groups.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_checksum(body: &str) -> String {
        let checksum = body.bytes().fold(0u8, |acc, b| acc ^ b);
        format!("!{body}*{checksum:02X}")
    }

    #[test]
    fn test_parse_single_fragment() {
        let line = with_checksum("AIVDM,1,1,,A,15M67FC000G?ufbE`FepT@3n00Sa,0");
        let sentence = parse_sentence(&line).unwrap();
        assert_eq!(sentence.fragment_count, 1);
        assert_eq!(sentence.fragment_number, 1);
        assert_eq!(sentence.channel, "A");
        assert_eq!(sentence.payload, "15M67FC000G?ufbE`FepT@3n00Sa");
        assert_eq!(sentence.fill_bits, 0);
    }

    #[test]
    fn test_parse_without_checksum() {
        let sentence = parse_sentence("!AIVDM,1,1,,B,payload,2").unwrap();
        assert_eq!(sentence.fill_bits, 2);
    }

    #[test]
    fn test_reject_bad_checksum() {
        assert_eq!(
            parse_sentence("!AIVDM,1,1,,A,15M67FC000,0*00"),
            Err(AisError::BadChecksum)
        );
    }

    #[test]
    fn test_reject_non_nmea() {
        assert_eq!(parse_sentence("$GPGGA,stuff"), Err(AisError::NotNmea));
        assert_eq!(parse_sentence("hello"), Err(AisError::NotNmea));
    }

    #[test]
    fn test_reject_short_sentence() {
        assert_eq!(parse_sentence("!AIVDM,1,1"), Err(AisError::TooFewFields));
    }

    #[test]
    fn test_reject_fragment_number_out_of_range() {
        assert!(parse_sentence("!AIVDM,2,3,7,A,abc,0").is_err());
        assert!(parse_sentence("!AIVDM,0,0,,A,abc,0").is_err());
    }

    #[test]
    fn test_single_fragment_passes_through() {
        let mut assembler = SentenceAssembler::new();
        let sentence = parse_sentence("!AIVDM,1,1,,A,abcdef,0").unwrap();
        assert_eq!(assembler.push(sentence), Some(("abcdef".to_string(), 0)));
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn test_two_fragments_reassemble_in_order() {
        let mut assembler = SentenceAssembler::new();
        let first = parse_sentence("!AIVDM,2,1,3,B,AAAA,0").unwrap();
        let second = parse_sentence("!AIVDM,2,2,3,B,BBBB,2").unwrap();

        assert_eq!(assembler.push(first), None);
        assert_eq!(assembler.pending(), 1);
        assert_eq!(assembler.push(second), Some(("AAAABBBB".to_string(), 2)));
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn test_fragments_reassemble_out_of_order() {
        let mut assembler = SentenceAssembler::new();
        let second = parse_sentence("!AIVDM,2,2,9,A,TAIL,2").unwrap();
        let first = parse_sentence("!AIVDM,2,1,9,A,HEAD,0").unwrap();

        assert_eq!(assembler.push(second), None);
        assert_eq!(assembler.push(first), Some(("HEADTAIL".to_string(), 2)));
    }

    #[test]
    fn test_distinct_channels_do_not_mix() {
        let mut assembler = SentenceAssembler::new();
        assembler.push(parse_sentence("!AIVDM,2,1,5,A,XXXX,0").unwrap());
        assembler.push(parse_sentence("!AIVDM,2,1,5,B,YYYY,0").unwrap());
        assert_eq!(assembler.pending(), 2);

        let done = assembler.push(parse_sentence("!AIVDM,2,2,5,B,ZZZZ,0").unwrap());
        assert_eq!(done, Some(("YYYYZZZZ".to_string(), 0)));
        assert_eq!(assembler.pending(), 1);
    }

    #[test]
    fn test_sweep_drops_stale_groups() {
        let mut assembler = SentenceAssembler::new();
        assembler.push(parse_sentence("!AIVDM,2,1,5,A,XXXX,0").unwrap());
        assert_eq!(assembler.pending(), 1);
        assembler.sweep(Duration::from_secs(0));
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn test_group_cap() {
        let mut assembler = SentenceAssembler::new();
        for i in 0..150 {
            let line = format!("!AIVDM,2,1,{i},A,XXXX,0");
            assembler.push(parse_sentence(&line).unwrap());
        }
        assert!(assembler.pending() <= MAX_MULTIPART_GROUPS);
    }
}
