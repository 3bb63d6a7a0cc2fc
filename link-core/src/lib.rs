//! The transport-free timing engine: ghost-time estimation, session
//! election, the client-visible beat timeline, and the `Controller`
//! that ties them together. Nothing in this crate touches a socket or
//! a clock other than through the [`clock::Clock`] trait; `link-network`
//! drives it from the outside and `link-util` supplies the concrete
//! clock.

pub mod client_beat_timeline;
pub mod clock;
pub mod controller;
pub mod kalman;
pub mod mailbox;
pub mod measurement;
pub mod peers;
pub mod seqlock;
pub mod session_state;
pub mod sessions;
pub mod spinlock;

pub use client_beat_timeline::ClientBeatTimeline;
pub use clock::{Clock, HostTimeFilter, VirtualClock};
pub use controller::{AliveEffect, AudioIo, BroadcastState, Controller, ControllerAction};
pub use mailbox::Mailbox;
pub use measurement::{Measurement, MeasurementAbort, MeasurementOutcome};
pub use peers::{PeerState, Peers, SawPeerEffect};
pub use seqlock::SeqLock;
pub use session_state::SessionState;
pub use sessions::{Session, SessionAction, Sessions};
pub use spinlock::SpinLock;
