use thiserror::Error;

use safechat_transport::TransportError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("you are restricted from chatting")]
    Restricted,

    #[error("not connected to the chat server")]
    NotConnected,

    #[error("message is empty")]
    EmptyMessage,

    #[error("no stream joined")]
    NoStreamJoined,

    #[error("not broadcasting")]
    NotBroadcasting,

    #[error("already broadcasting")]
    AlreadyBroadcasting,

    #[error("transport error: {0}")]
    Transport(TransportError),
}

impl From<TransportError> for ClientError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::NotConnected => ClientError::NotConnected,
            other => ClientError::Transport(other),
        }
    }
}
