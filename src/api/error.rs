use reqwest::StatusCode;
use thiserror::Error;

/// Marker code the tabular backend uses for "zero rows matched a
/// single-row request".
pub const NO_ROWS_CODE: &str = "PGRST116";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("session required but none is available")]
    AuthRequired,

    #[error("remote request failed with status {status}: {message}")]
    Remote { status: StatusCode, message: String },

    #[error("no rows returned (PGRST116)")]
    NoRows,

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Truncate a response body to avoid carrying excessive data in errors
pub(crate) fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        body.to_string()
    } else {
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!(
            "{}... (truncated, {} total bytes)",
            &body[..end],
            body.len()
        )
    }
}

impl ApiError {
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let message = if body.trim().is_empty() {
            "remote request failed".to_string()
        } else {
            truncate_body(body)
        };
        ApiError::Remote { status, message }
    }

    /// Whether the backend rejected the credential itself; callers route
    /// this to a re-login flow.
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            ApiError::Remote {
                status: StatusCode::UNAUTHORIZED,
                ..
            }
        )
    }

    /// Stable marker code for errors that carry one
    pub fn code(&self) -> Option<&'static str> {
        match self {
            ApiError::NoRows => Some(NO_ROWS_CODE),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_carries_body_text() {
        let err = ApiError::from_status(StatusCode::FORBIDDEN, r#"{"message":"denied"}"#);
        match err {
            ApiError::Remote { status, message } => {
                assert_eq!(status, StatusCode::FORBIDDEN);
                assert_eq!(message, r#"{"message":"denied"}"#);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_from_status_empty_body_falls_back() {
        let err = ApiError::from_status(StatusCode::BAD_GATEWAY, "  ");
        match err {
            ApiError::Remote { message, .. } => assert_eq!(message, "remote request failed"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_truncate_body_caps_long_bodies() {
        let body = "x".repeat(2000);
        let truncated = truncate_body(&body);
        assert!(truncated.len() < body.len());
        assert!(truncated.contains("truncated, 2000 total bytes"));
    }

    #[test]
    fn test_unauthorized_detection_and_codes() {
        assert!(ApiError::from_status(StatusCode::UNAUTHORIZED, "expired").is_unauthorized());
        assert!(!ApiError::from_status(StatusCode::NOT_FOUND, "missing").is_unauthorized());
        assert_eq!(ApiError::NoRows.code(), Some(NO_ROWS_CODE));
        assert_eq!(ApiError::AuthRequired.code(), None);
    }
}
