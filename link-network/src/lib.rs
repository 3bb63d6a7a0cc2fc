//! The discovery transport and single-threaded IO reactor: owns every
//! socket and timer, and is the only thing that drives a
//! [`link_core::Controller`]'s mutating methods. Nothing in `link-core`
//! depends on this crate; this crate depends on `link-core` to know
//! what to do with the bytes it shuffles.

pub mod gateway;
pub mod interfaces;
pub mod reactor;
pub mod socket;

pub use gateway::Gateway;
pub use interfaces::{HostPlatform, Platform};
pub use reactor::Reactor;
pub use socket::{GatewaySocket, ListenError};
