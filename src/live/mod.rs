//! Live Module
//!
//! The real-time channel: Socket.IO framing, the transport seam, and the
//! reconnecting adapter that feeds the session.

pub mod channel;
pub mod socketio;
pub mod transport;

pub use channel::{spawn, ChannelContext, LiveChannelHandle, JOIN_EVENT};
pub use socketio::{endpoint_url, EnginePacket, Handshake, SocketPacket};
pub use transport::{LiveConnection, LiveTransport, WebSocketTransport};
