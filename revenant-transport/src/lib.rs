//! Secure, multiplexed transport between a collector agent and a
//! processor. One Noise IK handshake establishes an encrypted duplex
//! stream; one multiplexer then carries both tagged OOB commands and
//! the bulk measurement stream over it.

mod error;
mod frame;
mod handshake;
mod mux;
mod policy;
mod wire;

pub use error::TransportError;
pub use frame::SecureChannel;
pub use handshake::{generate_keypair, initiate, respond};
pub use mux::{send_command, spawn as spawn_multiplexer, Multiplexer};
pub use policy::{Insecure, PeerPolicy, Pinned};
pub use snow::Keypair;
