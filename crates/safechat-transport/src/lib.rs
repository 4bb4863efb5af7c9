pub mod chat;
pub mod error;
pub mod socket;

pub use chat::{ChannelEvent, ChannelHandle, ChatTransport};
pub use error::TransportError;
pub use socket::{ConnectionStatus, SocketEvent, SocketHandle, SocketLink, TransportConfig, spawn_socket};
