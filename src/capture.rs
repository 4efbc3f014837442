//! Background worker that records one utterance and runs STT, keeping the UI
//! responsive. One capture session maps to one worker thread and exactly one
//! message back.

use crate::audio::Recorder;
use crate::log_debug;
use crate::stt::Transcriber;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Instant;

/// Handle the UI uses to poll the worker thread for its single result.
pub struct CaptureJob {
    pub receiver: mpsc::Receiver<CaptureMessage>,
    pub handle: Option<thread::JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl CaptureJob {
    /// Ask the worker to stop recording early. The worker still reports
    /// whatever it heard before the flag was seen.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn from_parts(
        receiver: mpsc::Receiver<CaptureMessage>,
        handle: Option<thread::JoinHandle<()>>,
    ) -> Self {
        Self {
            receiver,
            handle,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Message sent from the worker back to the UI.
#[derive(Debug, PartialEq, Eq)]
pub enum CaptureMessage {
    /// The single final transcript, already trimmed.
    Transcript(String),
    /// Capture finished but recognition produced nothing usable.
    NoSpeech,
    /// Recording or recognition failed.
    Error(String),
}

/// Spawn the worker thread that records audio and runs transcription.
pub fn start_capture(
    recorder: Arc<Mutex<Recorder>>,
    transcriber: Arc<Mutex<Transcriber>>,
    seconds: u64,
    log_timings: bool,
) -> CaptureJob {
    let (tx, rx) = mpsc::channel();
    let stop = Arc::new(AtomicBool::new(false));
    let worker_stop = stop.clone();

    let handle = thread::spawn(move || {
        // Do the heavy work off the UI thread and send back one message.
        let message = perform_capture(recorder, transcriber, seconds, &worker_stop, log_timings);
        let _ = tx.send(message);
    });

    CaptureJob {
        receiver: rx,
        handle: Some(handle),
        stop,
    }
}

/// Record, transcribe, classify. Any failure along the way becomes a single
/// error message for the UI.
fn perform_capture(
    recorder: Arc<Mutex<Recorder>>,
    transcriber: Arc<Mutex<Transcriber>>,
    seconds: u64,
    stop: &AtomicBool,
    log_timings: bool,
) -> CaptureMessage {
    let record_start = Instant::now();
    let samples = {
        let recorder_guard = match recorder.lock() {
            Ok(guard) => guard,
            Err(_) => return CaptureMessage::Error("audio recorder lock poisoned".into()),
        };
        match recorder_guard.record(seconds, stop) {
            Ok(samples) => samples,
            Err(err) => return CaptureMessage::Error(format!("{err:#}")),
        }
    };
    let record_elapsed = record_start.elapsed().as_secs_f64();

    if samples.is_empty() {
        return CaptureMessage::NoSpeech;
    }

    log_debug("capture: starting transcription");
    let stt_start = Instant::now();
    let transcript = {
        let transcriber_guard = match transcriber.lock() {
            Ok(guard) => guard,
            Err(_) => return CaptureMessage::Error("transcriber lock poisoned".into()),
        };
        match transcriber_guard.transcribe(&samples) {
            Ok(text) => text,
            Err(err) => return CaptureMessage::Error(format!("{err:#}")),
        }
    };
    let stt_elapsed = stt_start.elapsed().as_secs_f64();

    let message = classify_transcript(&transcript);
    if log_timings {
        let chars = match &message {
            CaptureMessage::Transcript(text) => text.len(),
            _ => 0,
        };
        log_debug(&format!(
            "timing|phase=voice_capture|record_s={record_elapsed:.3}|stt_s={stt_elapsed:.3}|chars={chars}"
        ));
    }
    message
}

/// A trimmed-empty transcript counts as "no speech detected", matching the
/// recognizer's `no-speech` error code in the original widget.
fn classify_transcript(raw: &str) -> CaptureMessage {
    let cleaned = raw.trim();
    if cleaned.is_empty() {
        CaptureMessage::NoSpeech
    } else {
        CaptureMessage::Transcript(cleaned.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcripts_are_trimmed() {
        match classify_transcript("  merhaba dünya \n") {
            CaptureMessage::Transcript(text) => assert_eq!(text, "merhaba dünya"),
            other => panic!("expected transcript, got {other:?}"),
        }
    }

    #[test]
    fn whitespace_only_counts_as_no_speech() {
        assert_eq!(classify_transcript("   \n\t"), CaptureMessage::NoSpeech);
        assert_eq!(classify_transcript(""), CaptureMessage::NoSpeech);
    }

    #[test]
    fn request_stop_is_visible_to_the_worker_flag() {
        let (tx, rx) = mpsc::channel();
        drop(tx);
        let job = CaptureJob::from_parts(rx, None);
        assert!(!job.stop.load(Ordering::Acquire));
        job.request_stop();
        assert!(job.stop.load(Ordering::Acquire));
    }
}
