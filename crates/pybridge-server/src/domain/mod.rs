//! Domain layer: configuration and operator-facing event types.
//!
//! Nothing here touches a socket. The bridge's infrastructure layer consumes
//! these types; the operator console consumes the event stream.

pub mod config;
pub mod events;

pub use config::{ConfigError, ServerConfig};
pub use events::{BridgeEvent, EventSink};
