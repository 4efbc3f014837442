//! Persisted Albamen identity: a session id generated once per profile plus the
//! optional name/age the reply endpoint teaches us over time. The on-disk shape
//! keeps the original key names so profiles survive client upgrades.

use crate::log_debug;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use uuid::Uuid;

/// Snapshot of who we are talking as. `session_id` is always present once the
/// store has been asked for an identity; `name`/`age` only after the endpoint
/// has returned them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub session_id: String,
    pub name: Option<String>,
    pub age: Option<String>,
}

/// Optional collaborator that supplies identity from somewhere else (another
/// feature of the host application). When wired in it takes precedence over
/// the local store for outgoing requests.
pub trait IdentityProvider: Send {
    fn snapshot(&self) -> Identity;
}

/// On-disk representation. Field names match the original storage keys.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StoredIdentity {
    #[serde(rename = "albamen_session_id", skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
    #[serde(rename = "albamen_user_name", skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(rename = "albamen_user_age", skip_serializing_if = "Option::is_none")]
    age: Option<String>,
}

/// File-backed store for the three identity values. All mutation goes through
/// the internal mutex so worker threads can share one handle.
pub struct IdentityStore {
    path: PathBuf,
    inner: Mutex<StoredIdentity>,
}

impl IdentityStore {
    /// Open the store, loading whatever the file already holds. A missing or
    /// unreadable file starts empty rather than failing: the first identity
    /// request will create it.
    pub fn open(path: PathBuf) -> Self {
        let stored = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                log_debug(&format!("identity file unreadable, starting fresh: {err}"));
                StoredIdentity::default()
            }),
            Err(_) => StoredIdentity::default(),
        };
        Self {
            path,
            inner: Mutex::new(stored),
        }
    }

    /// Current identity, creating and persisting the session id on first use.
    /// The id is on disk before this returns, so it is stable before any
    /// network request that carries it.
    pub fn identity(&self) -> Result<Identity> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.session_id.is_none() {
            inner.session_id = Some(Uuid::new_v4().to_string());
            self.persist(&inner)?;
        }
        Ok(Identity {
            session_id: inner.session_id.clone().unwrap_or_default(),
            name: inner.name.clone(),
            age: inner.age.clone(),
        })
    }

    /// Apply `saveName`/`saveAge` from a successful reply. Values are trimmed;
    /// empty strings are ignored so the endpoint cannot blank out a field by
    /// accident.
    pub fn apply_reply(&self, save_name: Option<&str>, save_age: Option<&str>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut changed = false;
        if let Some(name) = save_name.map(str::trim).filter(|s| !s.is_empty()) {
            inner.name = Some(name.to_string());
            changed = true;
        }
        if let Some(age) = save_age.map(str::trim).filter(|s| !s.is_empty()) {
            inner.age = Some(age.to_string());
            changed = true;
        }
        if changed {
            self.persist(&inner)?;
        }
        Ok(())
    }

    /// Write the file via a temp sibling + rename so a crash mid-write cannot
    /// leave a truncated identity behind.
    fn persist(&self, stored: &StoredIdentity) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create '{}'", parent.display()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let raw = serde_json::to_string_pretty(stored).context("failed to encode identity")?;
        fs::write(&tmp, raw).with_context(|| format!("failed to write '{}'", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to move identity into '{}'", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_store(tag: &str) -> (IdentityStore, PathBuf) {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let path = env::temp_dir().join(format!("albamen_identity_{tag}_{unique}.json"));
        (IdentityStore::open(path.clone()), path)
    }

    #[test]
    fn session_id_is_generated_once_and_persisted() {
        let (store, path) = temp_store("gen");
        let first = store.identity().expect("identity");
        assert!(!first.session_id.is_empty());
        assert!(path.exists(), "session id should hit disk immediately");

        let second = store.identity().expect("identity");
        assert_eq!(first.session_id, second.session_id);

        // A fresh store over the same file sees the same id.
        let reopened = IdentityStore::open(path.clone());
        assert_eq!(
            reopened.identity().expect("identity").session_id,
            first.session_id
        );
        let _ = fs::remove_file(path);
    }

    #[test]
    fn apply_reply_trims_and_persists_fields() {
        let (store, path) = temp_store("trim");
        store.identity().expect("identity");
        store
            .apply_reply(Some("  Ayşe "), Some(" 9 "))
            .expect("apply");

        let identity = store.identity().expect("identity");
        assert_eq!(identity.name.as_deref(), Some("Ayşe"));
        assert_eq!(identity.age.as_deref(), Some("9"));

        let raw = fs::read_to_string(&path).expect("read file");
        assert!(raw.contains("albamen_user_name"));
        assert!(raw.contains("Ayşe"));
        let _ = fs::remove_file(path);
    }

    #[test]
    fn apply_reply_ignores_empty_values() {
        let (store, path) = temp_store("empty");
        store.identity().expect("identity");
        store.apply_reply(Some("Kerem"), None).expect("apply");
        store.apply_reply(Some("   "), Some("")).expect("apply");

        let identity = store.identity().expect("identity");
        assert_eq!(identity.name.as_deref(), Some("Kerem"));
        assert_eq!(identity.age, None);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn corrupt_file_starts_fresh() {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let path = env::temp_dir().join(format!("albamen_identity_corrupt_{unique}.json"));
        fs::write(&path, "{not json").expect("write corrupt file");

        let store = IdentityStore::open(path.clone());
        let identity = store.identity().expect("identity");
        assert!(!identity.session_id.is_empty());
        assert_eq!(identity.name, None);
        let _ = fs::remove_file(path);
    }
}
