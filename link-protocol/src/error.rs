use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("buffer too short: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
    #[error("unrecognised protocol tag")]
    UnknownTag,
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),
    #[error("payload entry of size {size} at key {key:?} overruns the buffer")]
    PayloadOverrun { key: [u8; 4], size: usize },
}
