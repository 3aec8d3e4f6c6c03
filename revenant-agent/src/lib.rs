//! The collector agent: reads configured `/proc` (or `/sys/class/net`)
//! paths on a fixed schedule and streams them to at most one
//! registered processor sink over an encrypted, multiplexed
//! connection.

pub mod collector;
pub mod server;
pub mod session;
pub mod sink;

pub use server::serve;
pub use session::Session;
pub use sink::{SinkEvent, SinkStatus};
