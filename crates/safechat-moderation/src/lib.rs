//! Speech moderation for a live broadcaster.
//!
//! `session` holds the listening/muted/stopped state machine and is driven
//! entirely by the caller with explicit timestamps. `driver` runs it on a
//! tokio task against a real moderation socket and capture engine.

pub mod capture;
pub mod driver;
pub mod session;

pub use capture::{CaptureEngine, CaptureError, CaptureEvent, CaptureFault, CaptureProvider, CaptureSession};
pub use driver::{SessionHandle, spawn_session};
pub use session::{
    ModerationLink, ModerationSession, SessionConfig, SessionNotice, SessionState, SessionStatus,
};
