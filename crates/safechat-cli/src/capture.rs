use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::debug;

use safechat_moderation::{CaptureEngine, CaptureError, CaptureEvent, CaptureProvider, CaptureSession};

type Feed = Arc<Mutex<Option<mpsc::UnboundedSender<CaptureEvent>>>>;

/// Capture engine fed by `/say` lines instead of a microphone.
#[derive(Default)]
pub struct LineCapture {
    feed: Feed,
}

impl LineCapture {
    /// Deliver `text` as a final transcript. Returns false when no broadcast
    /// is listening.
    pub fn say(&self, text: &str) -> bool {
        let feed = self.feed.lock().unwrap_or_else(PoisonError::into_inner);
        match feed.as_ref() {
            Some(tx) => tx
                .send(CaptureEvent::Result {
                    transcript: text.to_string(),
                    is_final: true,
                })
                .is_ok(),
            None => false,
        }
    }
}

impl CaptureProvider for LineCapture {
    fn open(&self) -> Result<CaptureSession, CaptureError> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.feed.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx.clone());
        Ok(CaptureSession {
            engine: Box::new(LineEngine {
                events: tx,
                running: false,
            }),
            events: rx,
        })
    }
}

struct LineEngine {
    events: mpsc::UnboundedSender<CaptureEvent>,
    running: bool,
}

impl CaptureEngine for LineEngine {
    fn start(&mut self) -> Result<(), CaptureError> {
        if self.running {
            return Err(CaptureError::AlreadyStarted);
        }
        self.running = true;
        debug!("line capture listening");
        self.events
            .send(CaptureEvent::Started)
            .map_err(|_| CaptureError::Engine("capture session closed".into()))
    }

    fn stop(&mut self) {
        if self.running {
            self.running = false;
            let _ = self.events.send(CaptureEvent::Ended);
        }
    }
}
