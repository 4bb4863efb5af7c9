use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    /// The platform has no speech capture. Fatal for the session.
    #[error("speech capture unavailable: {0}")]
    Unavailable(String),

    /// `start` was called while the engine was already running.
    #[error("capture engine already started")]
    AlreadyStarted,

    #[error("capture engine error: {0}")]
    Engine(String),
}

/// Error conditions the engine reports asynchronously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureFault {
    /// Recognition was cut short by a stop or an overlapping start.
    Aborted,
    /// A recognition window passed without speech.
    NoSpeech,
    Unavailable(String),
    Other(String),
}

/// Callbacks of a continuous speech-to-text engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    Started,
    Result { transcript: String, is_final: bool },
    Error(CaptureFault),
    /// Recognition stopped, naturally or after `stop`.
    Ended,
}

/// A continuous recognizer. Starting a running engine is an error; the
/// engine emits `Ended` after every run, including forced stops.
pub trait CaptureEngine: Send {
    fn start(&mut self) -> Result<(), CaptureError>;

    /// Abort recognition now. Safe to call when not running.
    fn stop(&mut self);
}

impl<T: CaptureEngine + ?Sized> CaptureEngine for Box<T> {
    fn start(&mut self) -> Result<(), CaptureError> {
        (**self).start()
    }

    fn stop(&mut self) {
        (**self).stop()
    }
}

/// An engine plus the receiver of its events.
pub struct CaptureSession {
    pub engine: Box<dyn CaptureEngine>,
    pub events: mpsc::UnboundedReceiver<CaptureEvent>,
}

/// Creates a capture engine for each moderation session.
pub trait CaptureProvider: Send + Sync {
    fn open(&self) -> Result<CaptureSession, CaptureError>;
}
