use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::DemoIdentity;

/// Metadata keys the app reads a display name from.
const DISPLAY_NAME_KEYS: [&str; 3] = ["full_name", "name", "display_name"];

fn default_token_type() -> String {
    "bearer".to_string()
}

/// The authenticated principal's identity as reported by the auth backend.
/// Unknown fields are dropped; the app only ever reads id, email, and the
/// display-name metadata keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: Map<String, Value>,
}

impl UserIdentity {
    /// Best-effort display name from the metadata keys the app writes
    pub fn display_name(&self) -> Option<&str> {
        DISPLAY_NAME_KEYS
            .iter()
            .find_map(|key| self.user_metadata.get(*key).and_then(Value::as_str))
    }
}

/// An authenticated session. A session with no access token is treated as
/// "not authenticated" and is never constructed by this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Absolute expiry in epoch seconds; absent when the backend gave
    /// neither `expires_at` nor `expires_in`
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub user: Option<UserIdentity>,
}

impl Session {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }

    /// Whether the session expires within `margin_secs` of `now`.
    /// A session with no known expiry never reports needing a refresh.
    pub fn needs_refresh(&self, margin_secs: i64, now: i64) -> bool {
        self.expires_at
            .map(|at| at - margin_secs <= now)
            .unwrap_or(false)
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.id.as_str())
    }

    /// Substitute the demo identity's display fields into the session's
    /// user record. Tokens and expiry are never altered.
    pub(crate) fn with_demo_identity(mut self, demo: &DemoIdentity) -> Session {
        if let Some(user) = self.user.as_mut() {
            user.email = Some(demo.email.clone());
            for key in DISPLAY_NAME_KEYS {
                user.user_metadata
                    .insert(key.to_string(), Value::String(demo.display_name.clone()));
            }
        }
        self
    }
}

/// Result of a sign-in or sign-up call. Sign-up against a backend that
/// requires email confirmation returns a user but no session.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthOutcome {
    pub session: Option<Session>,
    pub user: Option<UserIdentity>,
}

/// Map the union of observed auth payload shapes into one canonical
/// `Session`. The backend answers either flat (`{access_token, ...}`) or
/// with the session nested under a `session` key; anything else is a parse
/// failure and yields `None`.
pub(crate) fn normalize_session(payload: &Value, now: i64) -> Option<Session> {
    let obj = payload.as_object()?;

    if let Some(nested) = obj.get("session").filter(|v| v.is_object()) {
        let mut session: Session = serde_json::from_value(nested.clone()).ok()?;
        if session.access_token.is_empty() {
            return None;
        }
        fill_expiry(&mut session, nested, now);
        if session.user.is_none() {
            if let Some(user) = obj.get("user") {
                session.user = serde_json::from_value(user.clone()).ok();
            }
        }
        return Some(session);
    }

    match obj.get("access_token").and_then(Value::as_str) {
        Some(token) if !token.is_empty() => {}
        _ => return None,
    }
    let mut session: Session = serde_json::from_value(payload.clone()).ok()?;
    fill_expiry(&mut session, payload, now);
    Some(session)
}

/// Derive the absolute expiry from a relative `expires_in` when the payload
/// carried no `expires_at`.
fn fill_expiry(session: &mut Session, payload: &Value, now: i64) {
    if session.expires_at.is_none() {
        if let Some(expires_in) = payload.get("expires_in").and_then(Value::as_i64) {
            session.expires_at = Some(now + expires_in);
        }
    }
}

pub(crate) fn epoch_now() -> i64 {
    Utc::now().timestamp()
}
