//! Authenticated request gateway for the REST, storage, and auth endpoints.
//!
//! This module provides the `Client` struct: header composition, response
//! normalization, and the account-lifecycle calls. Tabular access goes
//! through the query builder (`Client::from`), object storage through
//! `Client::bucket`.

use std::sync::Arc;

use anyhow::Result;
use reqwest::{header, Method};
use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::session::{epoch_now, normalize_session};
use crate::auth::{AuthOutcome, FileSessionStore, Session, SessionProvider, SessionStore};
use crate::config::Config;
use crate::storage::StorageBucket;

use super::{ApiError, Query};

/// HTTP request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Keys the auth service puts a human-readable message under, in the order
/// they are tried
const AUTH_ERROR_KEYS: [&str; 4] = ["error_description", "error", "msg", "message"];

/// How a request authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AuthMode {
    /// Refresh-if-expiring session required; fails with `AuthRequired`
    /// when none is available
    Required,
    /// Stored session as-is, no refresh round trip (logout path)
    CurrentSession,
    /// API key only
    Anonymous,
}

/// Outbound request body. A raw body never gets a JSON content type; the
/// transport keeps whatever the caller declared, or nothing.
pub(crate) enum Payload {
    Empty,
    Json(Value),
    Raw {
        bytes: Vec<u8>,
        content_type: Option<String>,
    },
}

/// Gateway for the hosted backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    config: Config,
    provider: SessionProvider,
}

impl Client {
    /// Create a client persisting its session next to the other app state
    /// on disk
    pub fn new(config: Config) -> Result<Self> {
        let store = Arc::new(FileSessionStore::new(Config::cache_dir()?, &config.base_url));
        Self::with_store(config, store)
    }

    /// Create a client over an injected session store (tests substitute an
    /// in-memory implementation)
    pub fn with_store(mut config: Config, store: Arc<dyn SessionStore>) -> Result<Self> {
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        let provider = SessionProvider::new(
            store,
            http.clone(),
            &config.base_url,
            &config.anon_key,
            config.demo_identity.clone(),
        );
        Ok(Self {
            http,
            config,
            provider,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Session access for callers that manage auth state directly
    pub fn session(&self) -> &SessionProvider {
        &self.provider
    }

    /// Start a query against a table
    pub fn from(&self, table: &str) -> Query<'_> {
        Query::new(self, table)
    }

    /// Access an object-storage bucket
    pub fn bucket(&self, name: &str) -> StorageBucket<'_> {
        StorageBucket::new(self, name)
    }

    // ===== Account lifecycle =====

    /// Sign in with email and password; the resulting session is persisted
    /// and returned.
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, ApiError> {
        let payload = self
            .post_auth(
                "token?grant_type=password",
                serde_json::json!({ "email": email, "password": password }),
                AuthMode::Anonymous,
            )
            .await?
            .ok_or_else(|| ApiError::InvalidResponse("empty sign-in response".to_string()))?;

        let session = normalize_session(&payload, epoch_now())
            .ok_or_else(|| ApiError::InvalidResponse("unrecognized sign-in payload".to_string()))?;
        self.provider.save(&session);
        Ok(session)
    }

    /// Create an account. Backends that require email confirmation answer
    /// with a user but no session; when a session is present it is
    /// persisted.
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<AuthOutcome, ApiError> {
        let payload = self
            .post_auth(
                "signup",
                serde_json::json!({ "email": email, "password": password }),
                AuthMode::Anonymous,
            )
            .await?
            .ok_or_else(|| ApiError::InvalidResponse("empty sign-up response".to_string()))?;

        let session = normalize_session(&payload, epoch_now());
        if let Some(session) = &session {
            self.provider.save(session);
        }
        let user = session
            .as_ref()
            .and_then(|s| s.user.clone())
            .or_else(|| {
                payload
                    .get("user")
                    .and_then(|u| serde_json::from_value(u.clone()).ok())
            });
        Ok(AuthOutcome { session, user })
    }

    /// Best-effort global sign-out: the logout call may fail (and is only
    /// attempted with a stored session), the local record is cleared
    /// regardless.
    pub async fn sign_out(&self) {
        if self.provider.current().is_some() {
            let result = self
                .post_auth(
                    "logout",
                    serde_json::json!({ "scope": "global" }),
                    AuthMode::CurrentSession,
                )
                .await;
            if let Err(err) = result {
                warn!(error = %err, "logout request failed");
            }
        }
        self.provider.clear();
    }

    /// Request a password-recovery email
    pub async fn reset_password_for_email(&self, email: &str) -> Result<(), ApiError> {
        self.post_auth(
            "recover",
            serde_json::json!({ "email": email }),
            AuthMode::Anonymous,
        )
        .await?;
        Ok(())
    }

    // ===== Request plumbing =====

    /// Raw REST call for shapes the query builder does not cover. `path`
    /// is appended to `/rest/v1/` as given; callers pre-encode any special
    /// characters in their own path segments.
    pub async fn rest(
        &self,
        path: &str,
        method: Method,
        headers: header::HeaderMap,
        body: Option<Value>,
    ) -> Result<Option<Value>, ApiError> {
        let payload = body.map(Payload::Json).unwrap_or(Payload::Empty);
        self.request(self.rest_url(path), method, headers, payload, AuthMode::Required)
            .await
    }

    pub(crate) fn rest_url(&self, path_and_query: &str) -> String {
        format!("{}/rest/v1/{}", self.config.base_url, path_and_query)
    }

    pub(crate) fn storage_url(&self, path_and_query: &str) -> String {
        format!("{}/storage/v1/{}", self.config.base_url, path_and_query)
    }

    /// One network round trip: merge headers (API key, bearer when a
    /// session exists, JSON content type unless the body is raw, caller
    /// overrides win), send, read the body as text, and normalize the
    /// outcome. Non-2xx becomes `ApiError::Remote` carrying the body text;
    /// an empty success body is an absent result; a non-JSON success body
    /// is returned as a JSON string.
    pub(crate) async fn request(
        &self,
        url: String,
        method: Method,
        headers: header::HeaderMap,
        payload: Payload,
        auth: AuthMode,
    ) -> Result<Option<Value>, ApiError> {
        let bearer = match auth {
            AuthMode::Required => Some(
                self.provider
                    .ensure()
                    .await
                    .ok_or(ApiError::AuthRequired)?
                    .access_token,
            ),
            AuthMode::CurrentSession => Some(
                self.provider
                    .current()
                    .ok_or(ApiError::AuthRequired)?
                    .access_token,
            ),
            AuthMode::Anonymous => None,
        };

        let mut builder = self
            .http
            .request(method, &url)
            .header("apikey", self.config.anon_key.as_str());
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder = match payload {
            Payload::Empty => builder,
            Payload::Json(value) => builder.json(&value),
            Payload::Raw {
                bytes,
                content_type,
            } => {
                let builder = match content_type {
                    Some(content_type) => builder.header(header::CONTENT_TYPE, content_type),
                    None => builder,
                };
                builder.body(bytes)
            }
        };
        // caller-supplied headers land last so they win the merge
        builder = builder.headers(headers);

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            debug!(%status, url = %url, "request failed");
            return Err(ApiError::from_status(status, &text));
        }
        if text.is_empty() {
            return Ok(None);
        }
        match serde_json::from_str(&text) {
            Ok(value) => Ok(Some(value)),
            Err(_) => Ok(Some(Value::String(text))),
        }
    }

    /// Auth endpoint POST. Error bodies from the auth service carry the
    /// message under one of several keys; surface that instead of the raw
    /// body.
    async fn post_auth(
        &self,
        path_and_query: &str,
        body: Value,
        auth: AuthMode,
    ) -> Result<Option<Value>, ApiError> {
        let url = format!("{}/auth/v1/{}", self.config.base_url, path_and_query);
        match self
            .request(url, Method::POST, header::HeaderMap::new(), Payload::Json(body), auth)
            .await
        {
            Err(ApiError::Remote { status, message }) => Err(ApiError::Remote {
                status,
                message: auth_error_message(&message),
            }),
            other => other,
        }
    }
}

fn auth_error_message(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    parsed
        .as_ref()
        .and_then(|value| {
            AUTH_ERROR_KEYS
                .iter()
                .find_map(|key| value.get(key).and_then(Value::as_str))
        })
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}
