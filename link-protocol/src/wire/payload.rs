//! TLV ("type-length-value") payload entries carried inside discovery
//! and measurement messages. Each entry is `(key: u32 FOURCC, size:
//! u32, bytes[size])`; unknown keys are skipped rather than rejected,
//! so the wire format can grow new entry kinds without breaking older
//! peers.

use crate::error::ParseError;
use crate::ident::SessionId;
use crate::start_stop::StartStopState;
use crate::timeline::Timeline;
use crate::tempo::Tempo;
use crate::beats::Beats;

use super::{Reader, Writer};

fn fourcc(s: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*s)
}

pub mod key {
    use super::fourcc;

    pub fn timeline() -> u32 { fourcc(b"tmln") }
    pub fn session_membership() -> u32 { fourcc(b"sess") }
    pub fn measurement_endpoint_v4() -> u32 { fourcc(b"mep4") }
    pub fn start_stop_state() -> u32 { fourcc(b"stst") }
    pub fn host_time() -> u32 { fourcc(b"__ht") }
    pub fn ghost_time() -> u32 { fourcc(b"__gt") }
    pub fn prev_ghost_time() -> u32 { fourcc(b"_pgt") }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MeasurementEndpointV4 {
    pub addr: std::net::Ipv4Addr,
    pub port: u16,
}

/// One decoded TLV entry. `GhostXForm` itself is never sent on the
/// wire (only host/ghost timestamps are); the measurement layer
/// reconstructs it from repeated `GhostTime`/`PrevGhostTime` samples.
#[derive(Clone, Debug, PartialEq)]
pub enum PayloadEntry {
    Timeline(Timeline),
    SessionMembership(SessionId),
    MeasurementEndpoint(MeasurementEndpointV4),
    StartStop(StartStopState),
    HostTime(i64),
    GhostTime(i64),
    PrevGhostTime(i64),
}

impl PayloadEntry {
    fn key(&self) -> u32 {
        match self {
            PayloadEntry::Timeline(_) => key::timeline(),
            PayloadEntry::SessionMembership(_) => key::session_membership(),
            PayloadEntry::MeasurementEndpoint(_) => key::measurement_endpoint_v4(),
            PayloadEntry::StartStop(_) => key::start_stop_state(),
            PayloadEntry::HostTime(_) => key::host_time(),
            PayloadEntry::GhostTime(_) => key::ghost_time(),
            PayloadEntry::PrevGhostTime(_) => key::prev_ghost_time(),
        }
    }

    fn encode_body(&self, w: &mut Writer) {
        match self {
            PayloadEntry::Timeline(tl) => {
                w.write_i64(tl.tempo.micros_per_beat());
                w.write_i64(tl.beat_origin.micro_beats());
                w.write_i64(tl.time_origin_micros);
            }
            PayloadEntry::SessionMembership(sid) => {
                let SessionId(node_id) = sid;
                w.write_bytes(&node_id.0);
            }
            PayloadEntry::MeasurementEndpoint(ep) => {
                w.write_bytes(&ep.addr.octets());
                w.write_u16(ep.port);
            }
            PayloadEntry::StartStop(s) => {
                w.write_u8(s.is_playing as u8);
                w.write_i64(s.timestamp_micros);
            }
            PayloadEntry::HostTime(t) | PayloadEntry::GhostTime(t) | PayloadEntry::PrevGhostTime(t) => {
                w.write_i64(*t);
            }
        }
    }

    fn body_len(&self) -> usize {
        match self {
            PayloadEntry::Timeline(_) => 24,
            PayloadEntry::SessionMembership(_) => 8,
            PayloadEntry::MeasurementEndpoint(_) => 6,
            PayloadEntry::StartStop(_) => 9,
            PayloadEntry::HostTime(_) | PayloadEntry::GhostTime(_) | PayloadEntry::PrevGhostTime(_) => 8,
        }
    }

    fn decode(key: u32, body: &[u8]) -> Result<Option<PayloadEntry>, ParseError> {
        let mut r = Reader::new(body);
        let entry = if key == self::key::timeline() {
            let micros_per_beat = r.read_i64()?;
            let beat_origin = r.read_i64()?;
            let time_origin = r.read_i64()?;
            Some(PayloadEntry::Timeline(Timeline {
                tempo: Tempo::from_micros_per_beat(micros_per_beat),
                beat_origin: Beats(beat_origin),
                time_origin_micros: time_origin,
            }))
        } else if key == self::key::session_membership() {
            let bytes: [u8; 8] = r.read_array()?;
            Some(PayloadEntry::SessionMembership(SessionId(crate::ident::NodeId(bytes))))
        } else if key == self::key::measurement_endpoint_v4() {
            let octets: [u8; 4] = r.read_array()?;
            let port = r.read_u16()?;
            Some(PayloadEntry::MeasurementEndpoint(MeasurementEndpointV4 {
                addr: std::net::Ipv4Addr::from(octets),
                port,
            }))
        } else if key == self::key::start_stop_state() {
            let is_playing = r.read_u8()? != 0;
            let timestamp = r.read_i64()?;
            Some(PayloadEntry::StartStop(StartStopState { is_playing, timestamp_micros: timestamp }))
        } else if key == self::key::host_time() {
            Some(PayloadEntry::HostTime(r.read_i64()?))
        } else if key == self::key::ghost_time() {
            Some(PayloadEntry::GhostTime(r.read_i64()?))
        } else if key == self::key::prev_ghost_time() {
            Some(PayloadEntry::PrevGhostTime(r.read_i64()?))
        } else {
            log::warn!("skipping unknown payload key {:?}", key.to_be_bytes());
            None
        };
        Ok(entry)
    }
}

/// A sequence of TLV entries. Construction is additive (`push`,
/// `with`) so messages compose the way the reference implementation's
/// `makePayload(...)` varargs do.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Payload(pub Vec<PayloadEntry>);

impl Payload {
    pub fn new() -> Self {
        Payload(Vec::new())
    }

    pub fn with(mut self, entry: PayloadEntry) -> Self {
        self.0.push(entry);
        self
    }

    pub fn push(&mut self, entry: PayloadEntry) {
        self.0.push(entry);
    }

    /// Concatenate two payloads into one, entries from `self` first.
    /// Used to append a Ping's payload verbatim after a Pong's own
    /// entries so the initiator recovers its own `HostTime` echo.
    pub fn concat(mut self, other: Payload) -> Payload {
        self.0.extend(other.0);
        self
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        let mut w = Writer::new(buf);
        for entry in &self.0 {
            w.write_u32(entry.key());
            w.write_u32(entry.body_len() as u32);
            entry.encode_body(&mut w);
        }
    }

    pub fn encoded_len(&self) -> usize {
        self.0.iter().map(|e| 8 + e.body_len()).sum()
    }

    /// Parse every entry in `bytes`. An entry with a size that would
    /// overrun the buffer is a hard error; an entry with an unknown
    /// key is skipped (its declared size is trusted to step over it).
    pub fn parse(bytes: &[u8]) -> Result<Payload, ParseError> {
        let mut r = Reader::new(bytes);
        let mut entries = Vec::new();
        while r.remaining() >= 8 {
            let key = r.read_u32()?;
            let size = r.read_u32()? as usize;
            if r.remaining() < size {
                return Err(ParseError::PayloadOverrun { key: key.to_be_bytes(), size });
            }
            let body = r.read_bytes(size)?;
            if let Some(entry) = PayloadEntry::decode(key, body)? {
                entries.push(entry);
            }
        }
        Ok(Payload(entries))
    }

    pub fn timeline(&self) -> Option<Timeline> {
        self.0.iter().find_map(|e| match e {
            PayloadEntry::Timeline(tl) => Some(*tl),
            _ => None,
        })
    }

    pub fn session_membership(&self) -> Option<SessionId> {
        self.0.iter().find_map(|e| match e {
            PayloadEntry::SessionMembership(sid) => Some(*sid),
            _ => None,
        })
    }

    pub fn measurement_endpoint(&self) -> Option<MeasurementEndpointV4> {
        self.0.iter().find_map(|e| match e {
            PayloadEntry::MeasurementEndpoint(ep) => Some(*ep),
            _ => None,
        })
    }

    pub fn start_stop(&self) -> Option<StartStopState> {
        self.0.iter().find_map(|e| match e {
            PayloadEntry::StartStop(s) => Some(*s),
            _ => None,
        })
    }

    pub fn host_time(&self) -> Option<i64> {
        self.0.iter().find_map(|e| match e {
            PayloadEntry::HostTime(t) => Some(*t),
            _ => None,
        })
    }

    pub fn ghost_time(&self) -> Option<i64> {
        self.0.iter().find_map(|e| match e {
            PayloadEntry::GhostTime(t) => Some(*t),
            _ => None,
        })
    }

    pub fn prev_ghost_time(&self) -> Option<i64> {
        self.0.iter().find_map(|e| match e {
            PayloadEntry::PrevGhostTime(t) => Some(*t),
            _ => None,
        })
    }
}

impl std::ops::Add for Payload {
    type Output = Payload;
    fn add(self, rhs: Payload) -> Payload {
        self.concat(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_round_trips() {
        let payload = Payload::new()
            .with(PayloadEntry::SessionMembership(SessionId(crate::ident::NodeId(*b"abcdefgh"))))
            .with(PayloadEntry::HostTime(123_456));

        let mut bytes = Vec::new();
        payload.encode(&mut bytes);
        assert_eq!(bytes.len(), payload.encoded_len());

        let parsed = Payload::parse(&bytes).unwrap();
        assert_eq!(parsed, payload);
    }

    #[test]
    fn unknown_keys_are_skipped() {
        let mut bytes = Vec::new();
        let mut w = Writer::new(&mut bytes);
        w.write_u32(fourcc(b"xxxx"));
        w.write_u32(4);
        w.write_u32(0xdead_beef);

        let payload = Payload::new().with(PayloadEntry::HostTime(99));
        payload.encode(&mut bytes);

        let parsed = Payload::parse(&bytes).unwrap();
        assert_eq!(parsed.host_time(), Some(99));
        assert_eq!(parsed.0.len(), 1);
    }

    #[test]
    fn oversized_entry_is_rejected() {
        let mut bytes = Vec::new();
        let mut w = Writer::new(&mut bytes);
        w.write_u32(fourcc(b"__ht"));
        w.write_u32(1000);
        w.write_bytes(&[0u8; 4]);

        assert!(Payload::parse(&bytes).is_err());
    }
}
