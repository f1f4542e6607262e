use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Session;

/// Versioned prefix of the persisted session key. Bumping the version lets
/// a new auth scheme coexist with records written by older builds.
const SESSION_KEY_PREFIX: &str = "star.auth.token.v1";

/// Length of the base-URL-derived key suffix
const KEY_SUFFIX_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session storage io: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored session is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Durable persistence for the session record.
///
/// Implementations report failures as typed errors; the decision to swallow
/// them (treating a broken store as "logged out") belongs to the
/// `SessionProvider`, not here.
pub trait SessionStore: Send + Sync {
    fn save(&self, session: &Session) -> Result<(), StoreError>;
    fn load(&self) -> Result<Option<Session>, StoreError>;
    fn clear(&self) -> Result<(), StoreError>;
}

/// On-disk record. The expiry is denormalized next to the session so a
/// loader never has to recompute it from `expires_in`.
#[derive(Debug, Serialize, Deserialize)]
struct StoredSession {
    session: Session,
    expires_at: Option<i64>,
}

/// File-backed store: one JSON file per backend, named from the versioned
/// key prefix plus a suffix derived from the base URL so sessions against
/// different backends never collide.
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl AsRef<Path>, base_url: &str) -> Self {
        let file_name = format!("{}-{}.json", SESSION_KEY_PREFIX, key_suffix(base_url));
        Self {
            path: dir.as_ref().join(file_name),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// URL-safe alphabet keeps the derived suffix filename-clean.
fn key_suffix(base_url: &str) -> String {
    let encoded = URL_SAFE_NO_PAD.encode(base_url);
    encoded.chars().take(KEY_SUFFIX_LEN).collect()
}

impl SessionStore for FileSessionStore {
    fn save(&self, session: &Session) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let record = StoredSession {
            session: session.clone(),
            expires_at: session.expires_at,
        };
        let contents = serde_json::to_string_pretty(&record)?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }

    fn load(&self) -> Result<Option<Session>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path)?;
        let record: StoredSession = serde_json::from_str(&contents)?;
        Ok(Some(record.session))
    }

    fn clear(&self) -> Result<(), StoreError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

/// In-memory store for tests and embedded callers that manage their own
/// persistence.
#[derive(Default)]
pub struct MemorySessionStore {
    inner: Mutex<Option<Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn save(&self, session: &Session) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(session.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<Session>, StoreError> {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.clone())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = None;
        Ok(())
    }
}
