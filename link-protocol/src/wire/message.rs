//! Discovery/measurement message framing: an 8-byte protocol tag,
//! then a fixed header, then a TLV payload. This is the "_asdp_v"
//! family (Alive / Response / ByeBye / Ping / Pong); the LinkAudio
//! boundary constants live in [`super::audio`].

use crate::error::ParseError;
use crate::ident::NodeId;

use super::payload::Payload;
use super::{Reader, Writer};

pub const TAG: [u8; 7] = *b"_asdp_v";
pub const VERSION: u8 = 1;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[repr(u8)]
pub enum MessageType {
    Invalid = 0,
    Alive = 1,
    Response = 2,
    ByeBye = 3,
    Ping = 4,
    Pong = 5,
}

impl MessageType {
    fn from_u8(v: u8) -> MessageType {
        match v {
            1 => MessageType::Alive,
            2 => MessageType::Response,
            3 => MessageType::ByeBye,
            4 => MessageType::Ping,
            5 => MessageType::Pong,
            _ => MessageType::Invalid,
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct MessageHeader {
    pub message_type: MessageType,
    pub ttl: u8,
    pub group_id: u16,
    pub ident: NodeId,
}

pub struct Message {
    pub header: MessageHeader,
    pub payload: Payload,
}

impl Message {
    pub fn new(message_type: MessageType, ttl: u8, ident: NodeId, payload: Payload) -> Self {
        Message {
            header: MessageHeader { message_type, ttl, group_id: 0, ident },
            payload,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(super::MAX_DATAGRAM_SIZE.min(64 + self.payload.encoded_len()));
        {
            let mut w = Writer::new(&mut buf);
            w.write_bytes(&TAG);
            w.write_u8(VERSION);
            w.write_u8(self.header.message_type as u8);
            w.write_u8(self.header.ttl);
            w.write_u16(self.header.group_id);
            w.write_bytes(&self.header.ident.0);
        }
        self.payload.encode(&mut buf);
        buf
    }

    pub fn parse(bytes: &[u8]) -> Result<Message, ParseError> {
        let mut r = Reader::new(bytes);
        let tag: [u8; 7] = r.read_array()?;
        if tag != TAG {
            return Err(ParseError::UnknownTag);
        }
        let version = r.read_u8()?;
        if version != VERSION {
            return Err(ParseError::UnsupportedVersion(version));
        }
        let message_type = MessageType::from_u8(r.read_u8()?);
        let ttl = r.read_u8()?;
        let group_id = r.read_u16()?;
        let ident = NodeId(r.read_array()?);
        let payload = Payload::parse(r.rest())?;

        Ok(Message {
            header: MessageHeader { message_type, ttl, group_id, ident },
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::payload::PayloadEntry;

    #[test]
    fn header_requires_exact_tag() {
        let err = Message::parse(b"notatag!").unwrap_err();
        assert!(matches!(err, ParseError::UnknownTag));
    }

    #[test]
    fn message_round_trips() {
        let ident = NodeId(*b"12345678");
        let payload = Payload::new().with(PayloadEntry::HostTime(555));
        let msg = Message::new(MessageType::Ping, 5, ident, payload.clone());
        let bytes = msg.encode();
        let parsed = Message::parse(&bytes).unwrap();
        assert_eq!(parsed.header.message_type, MessageType::Ping);
        assert_eq!(parsed.header.ident, ident);
        assert_eq!(parsed.payload, payload);
    }

    #[test]
    fn empty_buffer_is_truncated_not_panicking() {
        assert!(Message::parse(&[]).is_err());
    }
}
