use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::DemoIdentity;

use super::session::{epoch_now, normalize_session};
use super::{Session, SessionStore};

/// Safety margin before expiry that triggers a refresh. A token within this
/// window of expiring is renewed before it is handed to a caller.
const REFRESH_MARGIN_SECS: i64 = 60;

/// A refresh attempt that did not produce a usable session. `ensure()`
/// swallows these; callers that want them surfaced use `try_refresh`.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("no refresh token available")]
    NoRefreshToken,

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("refresh rejected with status {status}: {message}")]
    Rejected { status: StatusCode, message: String },

    #[error("unrecognized refresh payload")]
    BadPayload,
}

/// Hands out the current session, lazily renewing it before expiry.
///
/// Storage failures degrade to "no session" and refresh failures degrade to
/// the stale session: the backend's per-request auth check is the final
/// authority on token validity, so nothing here raises on a caller's path
/// to a read that might still succeed.
///
/// Clone is cheap - the store is shared and `reqwest::Client` uses Arc
/// internally for connection pooling.
#[derive(Clone)]
pub struct SessionProvider {
    store: Arc<dyn SessionStore>,
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    demo_identity: Option<DemoIdentity>,
}

impl SessionProvider {
    pub fn new(
        store: Arc<dyn SessionStore>,
        http: reqwest::Client,
        base_url: impl Into<String>,
        anon_key: impl Into<String>,
        demo_identity: Option<DemoIdentity>,
    ) -> Self {
        Self {
            store,
            http,
            base_url: base_url.into(),
            anon_key: anon_key.into(),
            demo_identity,
        }
    }

    /// The last-saved session, demo override applied, without any network
    /// activity. Absent when nothing is stored or the record is unreadable.
    pub fn current(&self) -> Option<Session> {
        self.load_raw().map(|s| self.apply_demo(s))
    }

    /// A session valid for at least the refresh margin, or the best
    /// available fallback:
    ///
    /// - no stored session: `None`, no network call
    /// - no known expiry, or expiry beyond the margin: returned unchanged,
    ///   no network call
    /// - expiring with a refresh token: one refresh round trip; on success
    ///   the renewed session is persisted and returned, on failure the
    ///   original (possibly expired) session is returned
    /// - expiring without a refresh token: returned unchanged
    pub async fn ensure(&self) -> Option<Session> {
        let session = self.load_raw()?;
        let now = epoch_now();
        if !session.needs_refresh(REFRESH_MARGIN_SECS, now) {
            return Some(self.apply_demo(session));
        }
        if session.refresh_token.is_none() {
            return Some(self.apply_demo(session));
        }
        match self.try_refresh(&session).await {
            Ok(fresh) => Some(self.apply_demo(fresh)),
            Err(err) => {
                warn!(error = %err, "session refresh failed, keeping current token");
                Some(self.apply_demo(session))
            }
        }
    }

    /// One refresh round trip against the token endpoint. The renewed
    /// session is persisted before being returned; the prior user identity
    /// is carried over when the response omits one.
    pub async fn try_refresh(&self, session: &Session) -> Result<Session, RefreshError> {
        let refresh_token = session
            .refresh_token
            .clone()
            .ok_or(RefreshError::NoRefreshToken)?;

        let url = format!("{}/auth/v1/token?grant_type=refresh_token", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("apikey", self.anon_key.as_str())
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(RefreshError::Rejected {
                status,
                message: crate::api::error::truncate_body(&text),
            });
        }

        let payload: Value =
            serde_json::from_str(&text).map_err(|_| RefreshError::BadPayload)?;
        let mut fresh =
            normalize_session(&payload, epoch_now()).ok_or(RefreshError::BadPayload)?;
        if fresh.user.is_none() {
            fresh.user = session.user.clone();
        }
        debug!("session refreshed");
        self.save(&fresh);
        Ok(fresh)
    }

    /// Persist a session. Persistence failures are logged and swallowed;
    /// losing the record only means the user logs in again.
    pub fn save(&self, session: &Session) {
        if let Err(err) = self.store.save(session) {
            warn!(error = %err, "unable to persist session");
        }
    }

    /// Remove the persisted session unconditionally.
    pub fn clear(&self) {
        if let Err(err) = self.store.clear() {
            warn!(error = %err, "unable to clear session");
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    fn load_raw(&self) -> Option<Session> {
        match self.store.load() {
            Ok(session) => session,
            Err(err) => {
                warn!(error = %err, "unable to read session, treating as logged out");
                None
            }
        }
    }

    fn apply_demo(&self, session: Session) -> Session {
        match &self.demo_identity {
            Some(demo) => session.with_demo_identity(demo),
            None => session,
        }
    }
}
