//! Worker that exchanges a transcript for an answer: one POST to the reply
//! endpoint, identity updates persisted on success, a single message back to
//! the UI. There is deliberately no retry, backoff, or cancellation: a failed
//! exchange ends the attempt and the user re-triggers the flow.

use crate::identity::{Identity, IdentityStore};
use crate::log_debug;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(test)]
use std::sync::OnceLock;
use std::sync::{mpsc, Arc};
#[cfg(test)]
use std::sync::Mutex;
use std::thread;
use std::time::Instant;

/// JSON body sent to the reply endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyRequest {
    pub message: String,
    pub session_id: String,
    pub saved_name: Option<String>,
    pub saved_age: Option<String>,
}

impl ReplyRequest {
    /// Pair a transcript with the identity it should be attributed to. The
    /// transcript goes out verbatim.
    pub fn new(message: String, identity: &Identity) -> Self {
        Self {
            message,
            session_id: identity.session_id.clone(),
            saved_name: identity.name.clone(),
            saved_age: identity.age.clone(),
        }
    }
}

/// JSON body expected back. Every field is optional; an empty object is a
/// valid (if unhelpful) answer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplyPayload {
    #[serde(default)]
    pub reply: Option<String>,
    #[serde(default, rename = "saveName")]
    pub save_name: Option<String>,
    #[serde(default, rename = "saveAge")]
    pub save_age: Option<String>,
}

/// Handle the UI uses to poll the exchange worker.
pub struct ReplyJob {
    pub receiver: mpsc::Receiver<ReplyJobMessage>,
    pub handle: Option<thread::JoinHandle<()>>,
}

/// Outcome of one exchange.
#[derive(Debug, PartialEq, Eq)]
pub enum ReplyJobMessage {
    /// The endpoint answered with text worth narrating.
    Answered { reply: String },
    /// The endpoint answered but had nothing to say.
    NoAnswer,
    /// Network or parse failure. No persisted value was touched.
    Failed(String),
}

/// Spawn the worker that performs the exchange and reports once.
pub fn start_reply_job(
    transcript: String,
    identity: Identity,
    store: Arc<IdentityStore>,
    url: String,
    log_timings: bool,
) -> ReplyJob {
    let (tx, rx) = mpsc::channel();

    let handle = thread::spawn(move || {
        let message = perform_exchange(&transcript, &identity, &store, &url, log_timings);
        let _ = tx.send(message);
    });

    ReplyJob {
        receiver: rx,
        handle: Some(handle),
    }
}

fn perform_exchange(
    transcript: &str,
    identity: &Identity,
    store: &IdentityStore,
    url: &str,
    log_timings: bool,
) -> ReplyJobMessage {
    let request = ReplyRequest::new(transcript.to_string(), identity);
    let started = Instant::now();

    let payload = match send_request(url, &request) {
        Ok(payload) => payload,
        Err(err) => {
            log_debug(&format!("reply endpoint error: {err:#}"));
            return ReplyJobMessage::Failed(format!("{err:#}"));
        }
    };

    if log_timings {
        log_debug(&format!(
            "timing|phase=reply_exchange|http_s={:.3}",
            started.elapsed().as_secs_f64()
        ));
    }

    apply_payload(payload, store)
}

/// Persist any identity updates the endpoint sent, then classify the reply.
/// Persistence failures are logged but do not discard a usable answer.
fn apply_payload(payload: ReplyPayload, store: &IdentityStore) -> ReplyJobMessage {
    if let Err(err) = store.apply_reply(payload.save_name.as_deref(), payload.save_age.as_deref())
    {
        log_debug(&format!("failed to persist identity update: {err:#}"));
    }

    match payload.reply.as_deref().map(str::trim) {
        Some(reply) if !reply.is_empty() => ReplyJobMessage::Answered {
            reply: reply.to_string(),
        },
        _ => ReplyJobMessage::NoAnswer,
    }
}

fn send_request(url: &str, request: &ReplyRequest) -> Result<ReplyPayload> {
    #[cfg(test)]
    {
        if let Some(storage) = REPLY_TRANSPORT_HOOK.get() {
            let guard = storage.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(hook) = guard.as_ref() {
                return hook(url, request);
            }
        }
    }
    http_exchange(url, request)
}

/// One blocking POST; JSON out, JSON in. Runs on the worker thread, never the UI.
fn http_exchange(url: &str, request: &ReplyRequest) -> Result<ReplyPayload> {
    let body = serde_json::to_value(request).context("failed to encode reply request")?;
    let response = ureq::post(url)
        .set("Content-Type", "application/json")
        .send_json(body)
        .context("reply endpoint request failed")?;
    response
        .into_json::<ReplyPayload>()
        .context("reply endpoint returned malformed JSON")
}

#[cfg(test)]
pub(crate) type ReplyTransportHook =
    Box<dyn Fn(&str, &ReplyRequest) -> Result<ReplyPayload> + Send + 'static>;

#[cfg(test)]
static REPLY_TRANSPORT_HOOK: OnceLock<Mutex<Option<ReplyTransportHook>>> = OnceLock::new();

#[cfg(test)]
fn set_reply_transport_hook(hook: Option<ReplyTransportHook>) {
    let storage = REPLY_TRANSPORT_HOOK.get_or_init(|| Mutex::new(None));
    *storage.lock().unwrap_or_else(|e| e.into_inner()) = hook;
}


#[cfg(test)]
mod tests {
    use super::testing::with_transport_hook;
    use super::*;
    use anyhow::anyhow;
    use std::env;
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_store(tag: &str) -> (Arc<IdentityStore>, PathBuf) {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let path = env::temp_dir().join(format!("albamen_reply_{tag}_{unique}.json"));
        (Arc::new(IdentityStore::open(path.clone())), path)
    }

    fn test_identity() -> Identity {
        Identity {
            session_id: "sess-test".into(),
            name: Some("Kerem".into()),
            age: None,
        }
    }

    fn wait_for(job: &mut ReplyJob) -> ReplyJobMessage {
        let message = job
            .receiver
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("reply job should report");
        if let Some(handle) = job.handle.take() {
            let _ = handle.join();
        }
        message
    }

    #[test]
    fn request_wire_format_matches_endpoint_contract() {
        let request = ReplyRequest::new("saat kaç".into(), &test_identity());
        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(value["message"], "saat kaç");
        assert_eq!(value["sessionId"], "sess-test");
        assert_eq!(value["savedName"], "Kerem");
        assert!(value["savedAge"].is_null());
    }

    #[test]
    fn transcript_is_sent_verbatim() {
        let (store, path) = temp_store("verbatim");
        let seen: Arc<Mutex<Option<ReplyRequest>>> = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();

        let message = with_transport_hook(
            Box::new(move |_, request| {
                *seen_clone.lock().unwrap() = Some(request.clone());
                Ok(ReplyPayload {
                    reply: Some("Merhaba!".into()),
                    ..ReplyPayload::default()
                })
            }),
            || {
                let mut job = start_reply_job(
                    "Merhaba Albamen".to_string(),
                    test_identity(),
                    store,
                    "https://example.invalid".into(),
                    false,
                );
                wait_for(&mut job)
            },
        );

        let request = seen.lock().unwrap().clone().expect("hook saw the request");
        assert_eq!(request.message, "Merhaba Albamen");
        assert_eq!(request.session_id, "sess-test");
        assert_eq!(
            message,
            ReplyJobMessage::Answered {
                reply: "Merhaba!".into()
            }
        );
        let _ = fs::remove_file(path);
    }

    #[test]
    fn save_fields_are_trimmed_and_persisted() {
        let (store, path) = temp_store("persist");
        let store_for_check = store.clone();

        let message = with_transport_hook(
            Box::new(|_, _| {
                Ok(ReplyPayload {
                    reply: Some("Tanıştığımıza memnun oldum".into()),
                    save_name: Some("  Ayşe  ".into()),
                    save_age: Some(" 9 ".into()),
                })
            }),
            || {
                let mut job = start_reply_job(
                    "benim adım Ayşe".into(),
                    test_identity(),
                    store,
                    "https://example.invalid".into(),
                    false,
                );
                wait_for(&mut job)
            },
        );

        assert!(matches!(message, ReplyJobMessage::Answered { .. }));
        let identity = store_for_check.identity().expect("identity");
        assert_eq!(identity.name.as_deref(), Some("Ayşe"));
        assert_eq!(identity.age.as_deref(), Some("9"));
        let _ = fs::remove_file(path);
    }

    #[test]
    fn network_failure_leaves_persistence_untouched() {
        let (store, path) = temp_store("netfail");
        store
            .apply_reply(Some("Önceki"), Some("8"))
            .expect("seed store");
        let store_for_check = store.clone();

        let message = with_transport_hook(
            Box::new(|_, _| Err(anyhow!("connection refused"))),
            || {
                let mut job = start_reply_job(
                    "merhaba".into(),
                    test_identity(),
                    store,
                    "https://example.invalid".into(),
                    false,
                );
                wait_for(&mut job)
            },
        );

        match message {
            ReplyJobMessage::Failed(err) => assert!(err.contains("connection refused")),
            other => panic!("expected failure, got {other:?}"),
        }
        let identity = store_for_check.identity().expect("identity");
        assert_eq!(identity.name.as_deref(), Some("Önceki"));
        assert_eq!(identity.age.as_deref(), Some("8"));
        let _ = fs::remove_file(path);
    }

    #[test]
    fn blank_reply_reports_no_answer() {
        let (store, path) = temp_store("blank");

        for payload in [
            ReplyPayload::default(),
            ReplyPayload {
                reply: Some("   ".into()),
                ..ReplyPayload::default()
            },
        ] {
            let result = apply_payload(payload, &store);
            assert_eq!(result, ReplyJobMessage::NoAnswer);
        }
        let _ = fs::remove_file(path);
    }

    #[test]
    fn payload_tolerates_unknown_and_missing_fields() {
        let payload: ReplyPayload =
            serde_json::from_str(r#"{"reply":"selam","extra":42}"#).expect("parse");
        assert_eq!(payload.reply.as_deref(), Some("selam"));
        assert_eq!(payload.save_name, None);

        let payload: ReplyPayload = serde_json::from_str("{}").expect("parse empty");
        assert_eq!(payload.reply, None);
    }
}
