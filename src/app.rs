//! The voice controller: owns the capture engine, the reply worker, the
//! narrator, and the persisted identity, and drives the
//! Idle -> Listening -> Thinking -> Speaking cycle the UI renders.

use std::{
    env, fs,
    io::Write,
    path::PathBuf,
    sync::{mpsc::TryRecvError, Arc, Mutex},
    time::{SystemTime, UNIX_EPOCH},
};

use crate::audio::Recorder;
use crate::capture::{self, CaptureJob, CaptureMessage};
use crate::config::AppConfig;
use crate::identity::{Identity, IdentityProvider, IdentityStore};
use crate::reply::{self, ReplyJob, ReplyJobMessage};
use crate::speech::{Narrator, NarrationEvent};
use crate::stt::Transcriber;
use anyhow::{Context, Result};

/// User-facing status lines. The widget ships with a fixed Turkish locale, so
/// these are not translated.
pub const STATUS_READY: &str = "Hazır. Konuşmak için Enter'a basın.";
pub const STATUS_NOT_SUPPORTED: &str = "Ses desteği yok";
pub const STATUS_LISTENING: &str = "Dinliyorum...";
pub const STATUS_THINKING: &str = "Albamen düşünüyor...";
pub const STATUS_NO_SPEECH: &str = "Ses algılanmadı";
pub const STATUS_VOICE_ERROR: &str = "Ses hatası";
pub const STATUS_NO_REPLY: &str = "Albamen şu anda cevap veremiyor.";
pub const STATUS_CONNECTION_ERROR: &str = "Bağlantı hatası, lütfen tekrar deneyin.";
pub const STATUS_STOPPED: &str = "Durduruldu";

/// Path to the temp log file we rotate between runs.
pub fn log_file_path() -> PathBuf {
    env::temp_dir().join("albamen_voice_tui.log")
}

/// Write debug messages to a temp file so we can troubleshoot without corrupting the TUI.
pub fn log_debug(msg: &str) {
    use std::fs::OpenOptions;

    let log_path = log_file_path();
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(log_path) {
        let _ = writeln!(file, "[{timestamp}] {msg}");
    }
}

/// Remove the log file if it grows past 5 MB between runs.
pub fn init_debug_log_file() {
    let log_path = log_file_path();
    if let Ok(metadata) = fs::metadata(&log_path) {
        const MAX_BYTES: u64 = 5 * 1024 * 1024;
        if metadata.len() > MAX_BYTES {
            let _ = fs::remove_file(&log_path);
        }
    }
}

/// Where the widget currently is in the capture -> send -> speak cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoicePhase {
    Idle,
    Listening,
    Thinking,
    Speaking,
}

impl VoicePhase {
    pub fn label(self) -> &'static str {
        match self {
            VoicePhase::Idle => "idle",
            VoicePhase::Listening => "listening",
            VoicePhase::Thinking => "thinking",
            VoicePhase::Speaking => "speaking",
        }
    }
}

/// Central application state shared between the event loop, renderer, and the
/// worker threads.
pub struct App {
    config: AppConfig,
    store: Arc<IdentityStore>,
    provider: Option<Box<dyn IdentityProvider>>,
    recorder: Option<Arc<Mutex<Recorder>>>,
    transcriber: Option<Arc<Mutex<Transcriber>>>,
    capture_job: Option<CaptureJob>,
    reply_job: Option<ReplyJob>,
    narrator: Option<Narrator>,
    phase: VoicePhase,
    status: String,
    glow: bool,
}

impl App {
    /// Wire up the default collaborators: file-backed identity and, unless
    /// disabled, the platform synthesis engine.
    pub fn new(config: AppConfig) -> Self {
        let store = Arc::new(IdentityStore::open(config.identity_path()));
        let narrator = if config.no_narration {
            None
        } else {
            Narrator::new(&config.lang)
        };
        Self::with_parts(config, store, None, narrator)
    }

    /// Constructor that accepts every collaborator explicitly. The identity
    /// provider, when given, takes precedence over the store for outgoing
    /// requests.
    pub fn with_parts(
        config: AppConfig,
        store: Arc<IdentityStore>,
        provider: Option<Box<dyn IdentityProvider>>,
        narrator: Option<Narrator>,
    ) -> Self {
        Self {
            config,
            store,
            provider,
            recorder: None,
            transcriber: None,
            capture_job: None,
            reply_job: None,
            narrator,
            phase: VoicePhase::Idle,
            status: STATUS_READY.into(),
            glow: false,
        }
    }

    /// Identity for the next request: external provider first, then the store
    /// (which creates and persists the session id on first use).
    fn resolve_identity(&self) -> Result<Identity> {
        if let Some(provider) = &self.provider {
            return Ok(provider.snapshot());
        }
        self.store.identity().context("failed to resolve identity")
    }

    /// Probe and lazily build the capture capability (recorder + whisper).
    /// Returns false, with the "not supported" status set, when the host
    /// cannot capture speech; nothing is constructed in that case.
    fn ensure_capture_engine(&mut self) -> bool {
        if self.transcriber.is_none() {
            let Some(model_path) = self.config.whisper_model_path.clone() else {
                log_debug("no whisper model configured; voice capture unsupported");
                self.status = STATUS_NOT_SUPPORTED.into();
                return false;
            };
            match Transcriber::new(&model_path, &self.config.whisper_lang()) {
                Ok(transcriber) => self.transcriber = Some(Arc::new(Mutex::new(transcriber))),
                Err(err) => {
                    log_debug(&format!("failed to load whisper model: {err:#}"));
                    self.status = STATUS_NOT_SUPPORTED.into();
                    return false;
                }
            }
        }
        if self.recorder.is_none() {
            match Recorder::new(self.config.input_device.as_deref()) {
                Ok(recorder) => self.recorder = Some(Arc::new(Mutex::new(recorder))),
                Err(err) => {
                    log_debug(&format!("audio recorder unavailable: {err:#}"));
                    self.status = STATUS_NOT_SUPPORTED.into();
                    return false;
                }
            }
        }
        true
    }

    /// Trigger action: stop any prior capture session, then start a fresh one.
    pub fn start_voice_capture(&mut self) {
        if !self.ensure_capture_engine() {
            return;
        }
        self.abandon_capture_job();

        let recorder = self.recorder.as_ref().expect("recorder initialized").clone();
        let transcriber = self
            .transcriber
            .as_ref()
            .expect("transcriber initialized")
            .clone();
        let job = capture::start_capture(
            recorder,
            transcriber,
            self.config.seconds,
            self.config.log_timings,
        );
        self.capture_job = Some(job);
        self.phase = VoicePhase::Listening;
        self.status = STATUS_LISTENING.into();
    }

    /// Stop affordance: stop recording if listening, otherwise only the status
    /// text changes. The in-flight reply exchange, if any, is left alone.
    pub fn stop_voice(&mut self) {
        if let Some(job) = self.capture_job.take() {
            // The worker finishes on its own; dropping the receiver discards
            // whatever it was going to report.
            job.request_stop();
        }
        if self.phase == VoicePhase::Listening {
            self.phase = VoicePhase::Idle;
        }
        self.status = STATUS_STOPPED.into();
    }

    /// Close/quit path: release the capture engine and cut narration short.
    pub fn shutdown(&mut self) {
        if let Some(job) = self.capture_job.take() {
            job.request_stop();
        }
        if let Some(narrator) = self.narrator.as_mut() {
            narrator.stop();
        }
        self.phase = VoicePhase::Idle;
        self.glow = false;
    }

    fn abandon_capture_job(&mut self) {
        if let Some(job) = self.capture_job.take() {
            job.request_stop();
        }
    }

    /// Check the capture worker channel without blocking the UI thread.
    pub fn poll_capture_job(&mut self) {
        let mut finished = false;
        let mut message_to_handle: Option<CaptureMessage> = None;
        if let Some(job) = self.capture_job.as_mut() {
            match job.receiver.try_recv() {
                Ok(message) => {
                    message_to_handle = Some(message);
                    finished = true;
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    self.status = STATUS_VOICE_ERROR.into();
                    self.phase = VoicePhase::Idle;
                    finished = true;
                }
            }
            if finished {
                // Join the worker once it signals completion to avoid lingering handles.
                if let Some(handle) = job.handle.take() {
                    let _ = handle.join();
                }
            }
        }
        if finished {
            self.capture_job = None;
        }
        if let Some(message) = message_to_handle {
            self.handle_capture_message(message);
        }
    }

    /// Check the reply worker channel without blocking the UI thread.
    pub fn poll_reply_job(&mut self) {
        let mut finished = false;
        let mut message_to_handle: Option<ReplyJobMessage> = None;
        if let Some(job) = self.reply_job.as_mut() {
            match job.receiver.try_recv() {
                Ok(message) => {
                    message_to_handle = Some(message);
                    finished = true;
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    self.status = STATUS_CONNECTION_ERROR.into();
                    self.phase = VoicePhase::Idle;
                    finished = true;
                }
            }
            if finished {
                if let Some(handle) = job.handle.take() {
                    let _ = handle.join();
                }
            }
        }
        if finished {
            self.reply_job = None;
        }
        if let Some(message) = message_to_handle {
            self.handle_reply_message(message);
        }
    }

    /// Drain narration begin/end events so the glow and phase track the engine.
    pub fn poll_narration(&mut self) {
        let mut events = Vec::new();
        if let Some(narrator) = self.narrator.as_ref() {
            while let Some(event) = narrator.poll() {
                events.push(event);
            }
        }
        for event in events {
            self.handle_narration_event(event);
        }
    }

    fn handle_capture_message(&mut self, message: CaptureMessage) {
        match message {
            CaptureMessage::Transcript(text) => {
                log_debug("capture finished with a transcript");
                self.begin_reply(text);
            }
            CaptureMessage::NoSpeech => {
                log_debug("capture detected no speech");
                self.status = STATUS_NO_SPEECH.into();
                self.phase = VoicePhase::Idle;
            }
            CaptureMessage::Error(err) => {
                log_debug(&format!("capture worker error: {err}"));
                self.status = STATUS_VOICE_ERROR.into();
                self.phase = VoicePhase::Idle;
            }
        }
    }

    /// Hand the transcript to the exchange worker. The session id is resolved
    /// (and persisted, on first use) before the request goes out.
    fn begin_reply(&mut self, transcript: String) {
        let identity = match self.resolve_identity() {
            Ok(identity) => identity,
            Err(err) => {
                log_debug(&format!("identity unavailable: {err:#}"));
                self.status = STATUS_CONNECTION_ERROR.into();
                self.phase = VoicePhase::Idle;
                return;
            }
        };

        let job = reply::start_reply_job(
            transcript,
            identity,
            self.store.clone(),
            self.config.worker_url.clone(),
            self.config.log_timings,
        );
        self.reply_job = Some(job);
        self.phase = VoicePhase::Thinking;
        self.status = STATUS_THINKING.into();
    }

    fn handle_reply_message(&mut self, message: ReplyJobMessage) {
        match message {
            ReplyJobMessage::Answered { reply } => {
                self.status = reply.clone();
                match self.narrator.as_mut() {
                    Some(narrator) => {
                        narrator.speak(&reply);
                        self.phase = VoicePhase::Speaking;
                    }
                    // No synthesis capability: the answer is text-only and the
                    // cycle ends here.
                    None => self.phase = VoicePhase::Idle,
                }
            }
            ReplyJobMessage::NoAnswer => {
                self.status = STATUS_NO_REPLY.into();
                self.phase = VoicePhase::Idle;
            }
            ReplyJobMessage::Failed(err) => {
                log_debug(&format!("reply exchange failed: {err}"));
                self.status = STATUS_CONNECTION_ERROR.into();
                self.phase = VoicePhase::Idle;
            }
        }
    }

    fn handle_narration_event(&mut self, event: NarrationEvent) {
        match event {
            NarrationEvent::Started => {
                self.glow = true;
                self.phase = VoicePhase::Speaking;
            }
            NarrationEvent::Finished => {
                self.glow = false;
                if self.phase == VoicePhase::Speaking {
                    self.phase = VoicePhase::Idle;
                }
            }
        }
    }

    pub fn phase(&self) -> VoicePhase {
        self.phase
    }

    pub fn status_text(&self) -> &str {
        &self.status
    }

    /// Whether the avatar glow indicator should render.
    pub fn glow(&self) -> bool {
        self.glow
    }

    pub fn listening(&self) -> bool {
        self.phase == VoicePhase::Listening
    }

    /// True while any worker is inflight; the UI polls faster then.
    pub fn has_active_jobs(&self) -> bool {
        self.capture_job.is_some() || self.reply_job.is_some()
    }
}
