//! Client façade over the chat channels and the broadcaster's speech
//! moderation session.

pub mod client;
pub mod config;
pub mod error;
pub mod state;

pub use client::Client;
pub use config::{ClientConfig, ClientContext};
pub use error::ClientError;
pub use state::{ClientState, ClientUpdate};
