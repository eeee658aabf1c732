pub mod diagnostics;
pub mod environment;
pub mod middleware;

use serde::Deserialize;
use std::fmt;

/// The backing services derived from a [`crate::FirebaseApp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Service {
    Auth,
    Database,
    Firestore,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Service::Auth => "auth",
            Service::Database => "database",
            Service::Firestore => "firestore",
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct FirebaseErrorResponse {
    pub error: FirebaseErrorDetails,
}

#[derive(Debug, Deserialize)]
pub struct FirebaseErrorDetails {
    pub code: u16,
    pub message: String,
    pub status: Option<String>,
    pub errors: Option<Vec<FirebaseSubError>>,
}

#[derive(Debug, Deserialize)]
pub struct FirebaseSubError {
    pub message: String,
    pub domain: Option<String>,
    pub reason: Option<String>,
}

/// Status code and message extracted from a failed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiFailure {
    pub code: u16,
    pub message: String,
}

/// Reads a failed response body. Falls back to the raw text when the body is not the
/// standard `{"error": {...}}` envelope.
pub async fn parse_error_response(response: reqwest::Response, default_msg: &str) -> ApiFailure {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<FirebaseErrorResponse>(&text) {
        Ok(error_resp) => ApiFailure {
            code: error_resp.error.code,
            message: error_resp.error.message,
        },
        Err(_) if text.trim().is_empty() => ApiFailure {
            code: status.as_u16(),
            message: format!("{}: {}", default_msg, status),
        },
        Err(_) => ApiFailure {
            code: status.as_u16(),
            message: format!("{}: {}", default_msg, text.trim()),
        },
    }
}
