//! Spoken replies. The synthesis engine is an optional capability probed once
//! at startup; when it is missing, narration silently degrades to a no-op and
//! the status text alone carries the answer.

use crate::log_debug;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use tts::Tts;

/// Narration lifecycle, polled by the UI loop. `Started` turns the avatar glow
/// on, `Finished` turns it off and ends voice mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NarrationEvent {
    Started,
    Finished,
}

/// Wraps the platform synthesis engine. Only one utterance is in flight at a
/// time; a new `speak` interrupts whatever is left of the previous one.
pub struct Narrator {
    tts: Tts,
    events: Receiver<NarrationEvent>,
    sender: Sender<NarrationEvent>,
    callbacks_wired: bool,
}

impl Narrator {
    /// Probe the synthesis capability. `None` means the host has no usable
    /// engine and the caller should treat narration as unsupported.
    pub fn new(lang: &str) -> Option<Self> {
        let mut tts = match Tts::default() {
            Ok(tts) => tts,
            Err(err) => {
                log_debug(&format!("speech synthesis unavailable: {err}"));
                return None;
            }
        };

        if let Some(voice) = pick_voice(&tts, lang) {
            if let Err(err) = tts.set_voice(&voice) {
                log_debug(&format!("failed to select voice for '{lang}': {err}"));
            }
        }

        let (sender, events) = mpsc::channel();
        let callbacks_wired = wire_utterance_callbacks(&mut tts, &sender);

        Some(Self {
            tts,
            events,
            sender,
            callbacks_wired,
        })
    }

    /// Speak the reply, interrupting any leftover utterance. When the engine
    /// cannot report utterance progress, begin/end events are synthesized so
    /// the UI still sees a complete Started/Finished pair.
    pub fn speak(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        match self.tts.speak(text, true) {
            Ok(_) => {
                if !self.callbacks_wired {
                    let _ = self.sender.send(NarrationEvent::Started);
                    let _ = self.sender.send(NarrationEvent::Finished);
                }
            }
            Err(err) => {
                log_debug(&format!("failed to speak reply: {err}"));
                // Keep the UI state machine moving even though nothing played.
                let _ = self.sender.send(NarrationEvent::Started);
                let _ = self.sender.send(NarrationEvent::Finished);
            }
        }
    }

    /// Drain one pending narration event without blocking.
    pub fn poll(&self) -> Option<NarrationEvent> {
        match self.events.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Cut narration short, e.g. when the app exits mid-utterance.
    pub fn stop(&mut self) {
        if let Err(err) = self.tts.stop() {
            log_debug(&format!("failed to stop narration: {err}"));
        }
    }
}

/// Register begin/end callbacks when the engine supports them. Returns whether
/// the engine will deliver real events.
fn wire_utterance_callbacks(tts: &mut Tts, sender: &Sender<NarrationEvent>) -> bool {
    if !tts.supported_features().utterance_callbacks {
        return false;
    }

    let begin_tx = sender.clone();
    let end_tx = sender.clone();
    let began = tts.on_utterance_begin(Some(Box::new(move |_| {
        let _ = begin_tx.send(NarrationEvent::Started);
    })));
    let ended = tts.on_utterance_end(Some(Box::new(move |_| {
        let _ = end_tx.send(NarrationEvent::Finished);
    })));

    match (began, ended) {
        (Ok(()), Ok(())) => true,
        (begin, end) => {
            log_debug(&format!(
                "utterance callbacks unavailable (begin: {begin:?}, end: {end:?})"
            ));
            false
        }
    }
}

/// Prefer an installed voice whose language matches the configured tag,
/// falling back to the engine default when none does.
fn pick_voice(tts: &Tts, lang: &str) -> Option<tts::Voice> {
    let voices = tts.voices().ok()?;
    let target = lang.to_ascii_lowercase().replace('_', "-");
    let primary = primary_subtag(&target);

    // Exact tag match first, then any voice sharing the primary subtag.
    voices
        .iter()
        .find(|voice| voice_language(voice) == target)
        .or_else(|| {
            voices
                .iter()
                .find(|voice| primary_subtag(&voice_language(voice)) == primary)
        })
        .cloned()
}

fn voice_language(voice: &tts::Voice) -> String {
    voice.language().to_string().to_ascii_lowercase()
}

fn primary_subtag(tag: &str) -> String {
    tag.split(['-', '_']).next().unwrap_or("").to_string()
}
