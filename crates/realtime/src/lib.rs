//! Push-channel client for live audit events.
//!
//! Provides typed message parsing, the WebSocket client handshake,
//! bounded reconnection, listener dispatch, and the process-wide
//! [`RealtimeChannel`](channel::RealtimeChannel) connection manager.

pub mod channel;
pub mod client;
pub mod listeners;
pub mod messages;
pub mod reconnect;

pub use channel::{RealtimeChannel, RECONNECT_EXHAUSTED};
pub use client::{ChannelClient, ChannelClientError};
pub use listeners::ChannelListeners;
pub use messages::ChannelEvent;
pub use reconnect::ReconnectConfig;
