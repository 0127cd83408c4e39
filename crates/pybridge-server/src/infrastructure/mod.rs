//! Infrastructure layer: the TCP listener, the single session, and the
//! bridge run loop.

pub mod bridge;
pub mod session;

pub use bridge::{Bridge, BridgeHandle, StartError};
pub use session::Session;
