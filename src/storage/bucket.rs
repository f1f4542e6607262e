use reqwest::{header, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::client::{AuthMode, Payload};
use crate::api::{ApiError, Client};

/// Handle for one object-storage bucket, obtained from `Client::bucket`.
///
/// Object paths are used as given; callers pre-encode segments containing
/// characters that need escaping within a single path component.
pub struct StorageBucket<'a> {
    client: &'a Client,
    bucket: String,
}

#[derive(Debug, Deserialize)]
struct SignedUrlResponse {
    #[serde(rename = "signedURL", alias = "signedUrl")]
    signed_url: String,
}

impl<'a> StorageBucket<'a> {
    pub(crate) fn new(client: &'a Client, bucket: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
        }
    }

    /// Store a JSON document at `path`, overwriting in place by default
    pub async fn upload_json(
        &self,
        path: &str,
        payload: &impl Serialize,
        upsert: bool,
    ) -> Result<(), ApiError> {
        let bytes = serde_json::to_vec(payload).map_err(|err| {
            ApiError::InvalidResponse(format!("unserializable object payload: {err}"))
        })?;
        self.upload(path, bytes, Some("application/json"), upsert)
            .await
    }

    /// Fetch a JSON document. A missing object (HTTP 404 or a "not found"
    /// style error message) and an empty body are absent results; every
    /// other failure propagates.
    pub async fn download_json<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Option<T>, ApiError> {
        let url = self.client.storage_url(&self.object_path(path));
        let result = self
            .client
            .request(
                url,
                Method::GET,
                header::HeaderMap::new(),
                Payload::Empty,
                AuthMode::Required,
            )
            .await;

        match result {
            Ok(None) => Ok(None),
            Ok(Some(value)) => serde_json::from_value(value)
                .map(Some)
                .map_err(|err| ApiError::InvalidResponse(format!("stored object: {err}"))),
            Err(ApiError::Remote { status, message })
                if status == StatusCode::NOT_FOUND
                    || message.to_ascii_lowercase().contains("not found") =>
            {
                debug!(bucket = %self.bucket, path, "object absent");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Raw upload. The content type is set only when the caller declares
    /// one, so the transport keeps binary/form payloads untouched.
    pub async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
        upsert: bool,
    ) -> Result<(), ApiError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            "x-upsert",
            header::HeaderValue::from_static(if upsert { "true" } else { "false" }),
        );
        let url = self.client.storage_url(&self.object_path(path));
        self.client
            .request(
                url,
                Method::POST,
                headers,
                Payload::Raw {
                    bytes,
                    content_type: content_type.map(str::to_string),
                },
                AuthMode::Required,
            )
            .await?;
        Ok(())
    }

    /// Time-limited pre-authorized link for a private object, absolute
    /// against the configured base URL
    pub async fn create_signed_url(
        &self,
        path: &str,
        expires_in_secs: u32,
    ) -> Result<String, ApiError> {
        let url = self
            .client
            .storage_url(&format!("object/sign/{}/{}", self.bucket, path));
        let value = self
            .client
            .request(
                url,
                Method::POST,
                header::HeaderMap::new(),
                Payload::Json(serde_json::json!({ "expiresIn": expires_in_secs })),
                AuthMode::Required,
            )
            .await?
            .ok_or_else(|| ApiError::InvalidResponse("empty signing response".to_string()))?;

        let signed: SignedUrlResponse = serde_json::from_value(value)
            .map_err(|err| ApiError::InvalidResponse(format!("signing response: {err}")))?;
        Ok(format!(
            "{}/storage/v1{}",
            self.client.base_url(),
            signed.signed_url
        ))
    }

    /// Public-bucket URL for an object; pure string construction, no
    /// network call
    pub fn public_url(&self, path: &str) -> String {
        self.client
            .storage_url(&format!("object/public/{}/{}", self.bucket, path))
    }

    fn object_path(&self, path: &str) -> String {
        format!("object/{}/{}", self.bucket, path)
    }
}
