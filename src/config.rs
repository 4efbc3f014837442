//! Command-line parsing and validation helpers.

use anyhow::{bail, Result};
use clap::Parser;
use std::path::{Path, PathBuf};

/// Default reply endpoint; the Cloudflare worker that turns a transcript into an answer.
pub const DEFAULT_WORKER_URL: &str = "https://albamen-voice.nncdecdgc.workers.dev";
const DEFAULT_LANG: &str = "tr-TR";
const MIN_RECORD_SECONDS: u64 = 1;
const MAX_RECORD_SECONDS: u64 = 30;

/// CLI options for the Albamen voice client. Validated values keep the capture
/// and reply paths from starting with nonsense.
#[derive(Debug, Parser, Clone)]
#[command(about = "Albamen voice chat TUI", author, version)]
pub struct AppConfig {
    /// Reply endpoint URL (must be https)
    #[arg(long, default_value = DEFAULT_WORKER_URL)]
    pub worker_url: String,

    /// Locale tag used for both recognition and narration
    #[arg(long, default_value = DEFAULT_LANG)]
    pub lang: String,

    /// Capture window in seconds
    #[arg(long, default_value_t = 6)]
    pub seconds: u64,

    /// Preferred audio input device name
    #[arg(long)]
    pub input_device: Option<String>,

    /// Print detected audio input devices and exit
    #[arg(long = "list-input-devices", default_value_t = false)]
    pub list_input_devices: bool,

    /// Whisper model path (auto-discovered under ./models when omitted)
    #[arg(long)]
    pub whisper_model_path: Option<String>,

    /// Directory holding the persisted identity file
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Disable spoken replies even when a synthesis engine is available
    #[arg(long = "no-narration")]
    pub no_narration: bool,

    /// Enable verbose timing logs
    #[arg(long)]
    pub log_timings: bool,
}

impl AppConfig {
    /// Parse CLI arguments and validate them right away.
    pub fn parse_args() -> Result<Self> {
        let mut config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    /// Check CLI values and normalize paths.
    pub fn validate(&mut self) -> Result<()> {
        if !(MIN_RECORD_SECONDS..=MAX_RECORD_SECONDS).contains(&self.seconds) {
            bail!(
                "--seconds must be between {MIN_RECORD_SECONDS} and {MAX_RECORD_SECONDS}, got {}",
                self.seconds
            );
        }

        validate_worker_url(&self.worker_url)?;
        validate_locale_tag(&self.lang)?;

        if self.whisper_model_path.is_none() {
            if let Some(model) = discover_default_whisper_model() {
                self.whisper_model_path = Some(model.to_string_lossy().to_string());
            }
        }

        // If a model path was supplied (explicitly or via auto-detect), make sure it exists.
        if let Some(model) = &self.whisper_model_path {
            if !Path::new(model).exists() {
                bail!("whisper model path '{model}' does not exist");
            }
        }

        Ok(())
    }

    /// Primary language subtag for Whisper ("tr-TR" -> "tr").
    pub fn whisper_lang(&self) -> String {
        self.lang
            .split(['-', '_'])
            .next()
            .unwrap_or("")
            .to_ascii_lowercase()
    }

    /// Where the persisted identity values live.
    pub fn identity_path(&self) -> PathBuf {
        let base = self
            .data_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|dir| dir.join("albamen-voice")))
            .unwrap_or_else(|| PathBuf::from("."));
        base.join("identity.json")
    }
}

/// The reply endpoint is always spoken to over TLS.
fn validate_worker_url(url: &str) -> Result<()> {
    let trimmed = url.trim();
    let Some(rest) = trimmed.strip_prefix("https://") else {
        bail!("--worker-url must start with https://, got '{url}'");
    };
    let host = rest.split('/').next().unwrap_or("");
    if host.is_empty() {
        bail!("--worker-url is missing a host: '{url}'");
    }
    Ok(())
}

/// Accept BCP-47-shaped tags like "tr", "tr-TR", or "en_US": a 2-3 letter
/// primary subtag, optionally followed by a 2-letter region.
fn validate_locale_tag(lang: &str) -> Result<()> {
    let mut parts = lang.split(['-', '_']);
    let primary = parts.next().unwrap_or("");
    if !(2..=3).contains(&primary.len()) || !primary.chars().all(|c| c.is_ascii_lowercase()) {
        bail!("--lang must start with a lowercase 2-3 letter language code, got '{lang}'");
    }
    if let Some(region) = parts.next() {
        if region.len() != 2 || !region.chars().all(|c| c.is_ascii_uppercase()) {
            bail!("--lang region must be a 2-letter uppercase code, got '{lang}'");
        }
    }
    if parts.next().is_some() {
        bail!("--lang has too many subtags: '{lang}'");
    }
    Ok(())
}

/// Look for a ggml model under the working directory's `models/` so the client
/// works out-of-the-box when users drop a model there.
fn discover_default_whisper_model() -> Option<PathBuf> {
    let models_dir = Path::new("models");
    if !models_dir.exists() {
        return None;
    }

    for name in ["ggml-small.bin", "ggml-base.bin", "ggml-tiny.bin"] {
        let candidate = models_dir.join(name);
        if candidate.exists() {
            if let Ok(canonical) = candidate.canonicalize() {
                return Some(canonical);
            }
        }
    }

    None
}
