//! The snapshot the `run` subcommand keeps up to date and the metrics
//! server/`stats` client both read: a JSON-friendly summary of the
//! local node's view of the session, analogous to the teacher's
//! `StatsReplyPacket` but shaped around Link's data model instead of
//! audio-stream health.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct LinkStatus {
    pub num_peers: usize,
    pub tempo_bpm: f64,
    pub is_playing: bool,
    pub beat: f64,
    pub session_id: String,
}

pub type SharedStatus = Arc<Mutex<LinkStatus>>;

pub fn shared(initial: LinkStatus) -> SharedStatus {
    Arc::new(Mutex::new(initial))
}
