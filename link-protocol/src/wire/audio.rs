//! LinkAudio wire boundary. Per the Non-goals, only the tag and
//! message-type numbering are defined here so a future implementation
//! stays wire-compatible; no encoder/decoder or channel negotiation
//! logic is implemented.

pub const TAG: [u8; 7] = *b"chnnlsv";
pub const VERSION: u8 = 1;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[repr(u8)]
pub enum MessageType {
    Invalid = 0,
    PeerAnnouncement = 1,
    Pong = 2,
    ChannelByes = 3,
    ChannelRequest = 4,
    StopChannelRequest = 5,
    AudioBuffer = 6,
}
