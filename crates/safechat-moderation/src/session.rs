use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, trace, warn};

use safechat_transport::{SocketLink, TransportError};
use safechat_types::events::{ModerationCommand, ModerationEvent};
use safechat_types::{StreamId, UserId};

use crate::capture::{CaptureEngine, CaptureError, CaptureEvent, CaptureFault};

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Minimum gap between successive engine (re)starts.
    pub restart_cooldown: Duration,
    /// Settle time before restarting an engine that just ended.
    pub restart_buffer: Duration,
    /// How long a transcript send blocks the next one.
    pub transcript_cooldown: Duration,
    /// Shorter transcripts are not sent.
    pub min_transcript_chars: usize,
    /// Mute countdown resolution.
    pub tick: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            restart_cooldown: Duration::from_millis(500),
            restart_buffer: Duration::from_millis(100),
            transcript_cooldown: Duration::from_millis(500),
            min_transcript_chars: 3,
            tick: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Listening,
    Muted,
    /// Terminated by the server. No outgoing transitions.
    Stopped,
}

/// Things the surrounding client should hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    StateChanged { from: SessionState, to: SessionState },
    Warning { count: u32, message: Option<String> },
    Terminated { reason: Option<String> },
    CaptureUnavailable(String),
    TranscriptClean(String),
    TranscriptFlagged(String),
    ServerError(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    pub warning_count: u32,
    pub mute_remaining_secs: u64,
    pub capturing: bool,
    pub last_clean_transcript: Option<String>,
}

/// Send side of the moderation socket as the session sees it.
pub trait ModerationLink {
    fn is_open(&self) -> bool;
    fn send(&self, command: &ModerationCommand) -> Result<(), TransportError>;
}

impl ModerationLink for SocketLink {
    fn is_open(&self) -> bool {
        SocketLink::is_open(self)
    }

    fn send(&self, command: &ModerationCommand) -> Result<(), TransportError> {
        self.send_json(command)
    }
}

struct Countdown {
    remaining: u64,
    next_tick: Instant,
}

/// Speech moderation state machine for one (stream, user) broadcast.
///
/// Owns the capture engine and the moderation link. Every input carries the
/// current time; [`next_deadline`](Self::next_deadline) says when
/// [`on_timer`](Self::on_timer) must be called next.
pub struct ModerationSession<E, L> {
    stream_id: StreamId,
    user_id: UserId,
    config: SessionConfig,
    engine: E,
    link: L,
    state: SessionState,
    warning_count: u32,
    countdown: Option<Countdown>,
    /// A start call is outstanding and `Started` has not arrived yet.
    starting: bool,
    /// The engine is running.
    capturing: bool,
    /// Forced stops whose `Ended` has not arrived yet.
    forced_stops: u32,
    capture_unavailable: bool,
    last_start: Option<Instant>,
    restart_at: Option<Instant>,
    resume_on_open: bool,
    processing_until: Option<Instant>,
    last_sent: Option<String>,
    last_clean: Option<String>,
    notices: Vec<SessionNotice>,
}

impl<E: CaptureEngine, L: ModerationLink> ModerationSession<E, L> {
    pub fn new(stream_id: StreamId, user_id: UserId, engine: E, link: L, config: SessionConfig) -> Self {
        Self {
            stream_id,
            user_id,
            config,
            engine,
            link,
            state: SessionState::Idle,
            warning_count: 0,
            countdown: None,
            starting: false,
            capturing: false,
            forced_stops: 0,
            capture_unavailable: false,
            last_start: None,
            restart_at: None,
            resume_on_open: false,
            processing_until: None,
            last_sent: None,
            last_clean: None,
            notices: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn warning_count(&self) -> u32 {
        self.warning_count
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            warning_count: self.warning_count,
            mute_remaining_secs: self.countdown.as_ref().map_or(0, |c| c.remaining),
            capturing: self.capturing,
            last_clean_transcript: self.last_clean.clone(),
        }
    }

    pub fn drain_notices(&mut self) -> Vec<SessionNotice> {
        std::mem::take(&mut self.notices)
    }

    /// Broadcasting began: start listening.
    pub fn begin(&mut self, now: Instant) {
        if self.state != SessionState::Idle {
            debug!("begin ignored in {:?}", self.state);
            return;
        }
        self.transition(SessionState::Listening);
        self.start_capture(now);
    }

    /// Broadcasting ended locally. Tears down capture and timers.
    pub fn end(&mut self) {
        if matches!(self.state, SessionState::Idle | SessionState::Stopped) {
            return;
        }
        self.halt_capture();
        self.countdown = None;
        self.transition(SessionState::Idle);
    }

    pub fn on_capture(&mut self, event: CaptureEvent, now: Instant) {
        match event {
            CaptureEvent::Started => {
                // Engine events are ordered, so no earlier run can still end.
                self.forced_stops = 0;
                self.starting = false;
                self.capturing = true;
                trace!("capture started");
            }
            CaptureEvent::Result { transcript, is_final } => {
                if is_final {
                    self.offer_transcript(&transcript, now);
                }
            }
            CaptureEvent::Error(fault) => match fault {
                CaptureFault::Aborted => debug!("capture aborted"),
                CaptureFault::NoSpeech => debug!("no speech detected"),
                CaptureFault::Unavailable(reason) => self.mark_unavailable(reason),
                CaptureFault::Other(reason) => warn!("capture engine error: {}", reason),
            },
            CaptureEvent::Ended => {
                if self.forced_stops > 0 {
                    self.forced_stops -= 1;
                    trace!("forced stop acknowledged");
                    return;
                }
                self.starting = false;
                self.capturing = false;
                if self.state != SessionState::Listening || self.capture_unavailable {
                    return;
                }
                let since_start = self
                    .last_start
                    .map(|t| now.saturating_duration_since(t))
                    .unwrap_or(Duration::MAX);
                let delay = if since_start < self.config.restart_cooldown {
                    debug!("restart cooldown active");
                    self.config.restart_cooldown
                } else {
                    self.config.restart_buffer
                };
                self.restart_at = Some(now + delay);
            }
        }
    }

    pub fn on_moderation(&mut self, event: ModerationEvent, now: Instant) {
        if self.state == SessionState::Stopped {
            trace!("ignoring moderation event after stop");
            return;
        }

        let expiry_for_me = event.expires(self.stream_id, self.user_id);
        match event {
            ModerationEvent::SpeechWarning { warning_number, message } => {
                self.warning_count = warning_number;
                info!("speech warning {} for {} on {}", warning_number, self.user_id, self.stream_id);
                self.notices.push(SessionNotice::Warning { count: warning_number, message });
            }
            ModerationEvent::SpeechTimeout {
                warning_number,
                timeout_duration,
                message,
            } => {
                self.warning_count = warning_number;
                self.notices.push(SessionNotice::Warning { count: warning_number, message });
                self.mute(timeout_duration, now);
            }
            ModerationEvent::TimeoutActive { timeout_remaining } => {
                if let Some(secs) = timeout_remaining.filter(|s| *s > 0) {
                    self.mute(secs, now);
                }
            }
            ModerationEvent::TimeoutExpired { .. } => {
                if !expiry_for_me {
                    trace!("timeout expiry for another session");
                } else if self.state == SessionState::Muted {
                    info!("server lifted timeout");
                    self.unmute(now);
                }
            }
            ModerationEvent::StreamStopped { reason, message } => {
                self.terminate(reason.or(message));
            }
            ModerationEvent::SpeechToxic { transcript, .. } => {
                self.notices.push(SessionNotice::TranscriptFlagged(transcript));
            }
            ModerationEvent::SpeechClean { transcript } => {
                self.last_clean = Some(transcript.clone());
                self.notices.push(SessionNotice::TranscriptClean(transcript));
            }
            ModerationEvent::UserTimedOut { user_id, duration } => {
                debug!("user {} timed out for {}s", user_id, duration);
            }
            ModerationEvent::Error { message } => {
                warn!("moderation server error: {}", message);
                self.notices.push(SessionNotice::ServerError(message));
            }
        }
    }

    /// The moderation socket (re)opened.
    pub fn on_link_open(&mut self, now: Instant) {
        if self.resume_on_open && self.state == SessionState::Listening {
            info!("moderation socket open, resuming capture");
            self.start_capture(now);
        }
    }

    pub fn on_link_closed(&mut self) {
        debug!("moderation socket closed; transcripts drop until it reopens");
    }

    pub fn on_timer(&mut self, now: Instant) {
        let elapsed = match self.countdown.as_mut() {
            Some(countdown) => {
                while countdown.remaining > 0 && now >= countdown.next_tick {
                    countdown.remaining -= 1;
                    countdown.next_tick += self.config.tick;
                }
                countdown.remaining == 0
            }
            None => false,
        };
        if elapsed && self.state == SessionState::Muted {
            info!("mute countdown finished");
            self.unmute(now);
        }

        if let Some(at) = self.restart_at {
            if now >= at {
                self.restart_at = None;
                if self.state == SessionState::Listening {
                    self.resume_capture(now);
                }
            }
        }
    }

    /// The earliest instant at which `on_timer` has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let tick = self.countdown.as_ref().map(|c| c.next_tick);
        match (tick, self.restart_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn transition(&mut self, to: SessionState) {
        let from = self.state;
        if from == to {
            return;
        }
        info!(
            "speech session {}/{}: {:?} -> {:?}",
            self.stream_id, self.user_id, from, to
        );
        self.state = to;
        self.notices.push(SessionNotice::StateChanged { from, to });
    }

    fn start_capture(&mut self, now: Instant) {
        self.resume_on_open = false;
        self.restart_at = None;
        if self.capture_unavailable {
            return;
        }
        if self.starting || self.capturing {
            debug!("capture start already in flight");
            return;
        }

        self.starting = true;
        match self.engine.start() {
            Ok(()) => self.last_start = Some(now),
            Err(CaptureError::Unavailable(reason)) => {
                self.starting = false;
                self.mark_unavailable(reason);
            }
            Err(e) => {
                self.starting = false;
                warn!("could not start capture: {}", e);
            }
        }
    }

    fn resume_capture(&mut self, now: Instant) {
        if self.link.is_open() {
            self.start_capture(now);
        } else {
            debug!("deferring capture restart until the moderation socket opens");
            self.resume_on_open = true;
        }
    }

    fn halt_capture(&mut self) {
        if self.starting || self.capturing {
            self.engine.stop();
            self.forced_stops += 1;
        }
        self.starting = false;
        self.capturing = false;
        self.restart_at = None;
        self.resume_on_open = false;
    }

    fn mute(&mut self, secs: u64, now: Instant) {
        if !matches!(self.state, SessionState::Listening | SessionState::Muted) {
            debug!("timeout ignored in {:?}", self.state);
            return;
        }
        if secs == 0 {
            if self.state == SessionState::Muted {
                self.unmute(now);
            }
            return;
        }

        info!("muted for {}s", secs);
        self.halt_capture();
        self.countdown = Some(Countdown {
            remaining: secs,
            next_tick: now + self.config.tick,
        });
        self.transition(SessionState::Muted);
    }

    fn unmute(&mut self, now: Instant) {
        self.countdown = None;
        self.transition(SessionState::Listening);
        self.resume_capture(now);
    }

    fn terminate(&mut self, reason: Option<String>) {
        warn!(
            "stream {} terminated by moderation: {}",
            self.stream_id,
            reason.as_deref().unwrap_or("no reason given")
        );
        self.halt_capture();
        self.countdown = None;
        self.transition(SessionState::Stopped);
        self.notices.push(SessionNotice::Terminated { reason });
    }

    fn mark_unavailable(&mut self, reason: String) {
        if self.capture_unavailable {
            return;
        }
        warn!("speech capture unavailable: {}", reason);
        self.capture_unavailable = true;
        self.notices.push(SessionNotice::CaptureUnavailable(reason));
    }

    fn offer_transcript(&mut self, transcript: &str, now: Instant) {
        let text = transcript.trim();
        if self.state != SessionState::Listening || text.is_empty() {
            return;
        }
        if self.processing_until.is_some_and(|until| now < until) {
            trace!("dropping transcript, send in flight: {}", text);
            return;
        }
        if self.last_sent.as_deref() == Some(text) {
            trace!("dropping repeated transcript: {}", text);
            return;
        }
        if text.chars().count() < self.config.min_transcript_chars {
            trace!("dropping short transcript: {}", text);
            return;
        }
        if !self.link.is_open() {
            debug!("dropping transcript, moderation socket closed");
            return;
        }

        let command = ModerationCommand::SpeechTranscript {
            transcript: text.to_string(),
            user_id: self.user_id,
            stream_id: self.stream_id,
            timestamp: Utc::now(),
        };
        match self.link.send(&command) {
            Ok(()) => {
                debug!("sent transcript: {}", text);
                self.last_sent = Some(text.to_string());
                self.processing_until = Some(now + self.config.transcript_cooldown);
            }
            Err(e) => warn!("could not send transcript: {}", e),
        }
    }
}
