//! Live job-update client.
//!
//! Provides the per-job WebSocket connection manager with exponential
//! backoff reconnection, typed decoding of the server's event frames,
//! and a multi-subscriber event channel for fanning decoded events out
//! to independent consumers.

pub mod channel;
pub mod manager;
pub mod messages;
pub mod reconnect;
pub mod transport;

pub use channel::{EventChannel, Subscription, Unsubscribe};
pub use manager::{ConnectionManager, ConnectionState, LiveError};
pub use messages::ServerEvent;
pub use reconnect::ReconnectPolicy;
pub use transport::{Transport, TransportConnection, TransportError, WsTransport};
