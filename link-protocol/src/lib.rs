pub mod beats;
pub mod error;
pub mod ghost_xform;
pub mod ident;
pub mod start_stop;
pub mod tempo;
pub mod timeline;
pub mod wire;

pub use beats::Beats;
pub use error::ParseError;
pub use ghost_xform::GhostXForm;
pub use ident::{NodeId, SessionId};
pub use start_stop::{SessionState, StartStopState};
pub use tempo::Tempo;
pub use timeline::Timeline;

/// Multicast group and port used for discovery.
pub const MULTICAST_ADDR: std::net::Ipv4Addr = std::net::Ipv4Addr::new(224, 76, 78, 75);
pub const MULTICAST_PORT: u16 = 20808;
