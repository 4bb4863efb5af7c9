use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    /// The socket is not open right now. Nothing was queued.
    #[error("not connected")]
    NotConnected,

    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}
