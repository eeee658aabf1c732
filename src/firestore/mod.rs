//! Cloud Firestore module.
//!
//! Document reads and writes through the Firestore REST API, addressed with
//! `CollectionReference` and `DocumentReference` as in the web SDK. Requests carry the
//! project API key and, once [`FirebaseFirestore::with_auth_token`] is used, the signed-in
//! user's ID token so security rules see the user.

pub mod models;
pub mod reference;
mod value;


use self::reference::{CollectionReference, DocumentReference};
use crate::config::FirebaseConfig;
use crate::core::parse_error_response;
use reqwest::Method;
use reqwest_middleware::{ClientWithMiddleware, RequestBuilder};
use std::fmt;
use thiserror::Error;
use url::Url;

/// Errors that can occur during Firestore operations.
#[derive(Error, Debug)]
pub enum FirestoreError {
    /// Wrapper for `reqwest::Error`.
    #[error("HTTP Request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    /// Wrapper for `reqwest_middleware::Error`.
    #[error("Middleware error: {0}")]
    MiddlewareError(#[from] reqwest_middleware::Error),
    /// Errors returned by the Firestore API, or values it sent that cannot be decoded.
    #[error("API error: {0}")]
    ApiError(String),
    /// Wrapper for `serde_json::Error`.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    /// The project configuration cannot address a database.
    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),
}

/// Client for interacting with Cloud Firestore.
#[derive(Clone)]
pub struct FirebaseFirestore {
    client: ClientWithMiddleware,
    base_url: Url,
    auth_token: Option<String>,
}

impl fmt::Debug for FirebaseFirestore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirebaseFirestore")
            .field("base_url", &self.base_url.as_str())
            .field("authenticated", &self.auth_token.is_some())
            .finish_non_exhaustive()
    }
}

impl FirebaseFirestore {
    /// Creates the client for the project's `(default)` database.
    ///
    /// This is typically called via `FirebaseApp::firestore()`.
    pub fn new(
        client: ClientWithMiddleware,
        config: &FirebaseConfig,
    ) -> Result<Self, FirestoreError> {
        let project_id = config.project_id.trim();
        if project_id.is_empty() || project_id.contains('/') {
            return Err(FirestoreError::ConfigurationError(format!(
                "invalid projectId '{}'",
                config.project_id
            )));
        }

        let base_url = format!(
            "{}/projects/{}/databases/(default)/documents",
            config.endpoints.firestore.trim_end_matches('/'),
            project_id
        );
        Self::new_with_url(client, &base_url)
    }

    /// Creates the client against an explicit `.../documents` base URL.
    pub fn new_with_url(
        client: ClientWithMiddleware,
        base_url: &str,
    ) -> Result<Self, FirestoreError> {
        let base_url = Url::parse(base_url).map_err(|e| {
            FirestoreError::ConfigurationError(format!("invalid endpoint {}: {}", base_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(FirestoreError::ConfigurationError(format!(
                "invalid endpoint {}",
                base_url
            )));
        }
        Ok(Self {
            client,
            base_url,
            auth_token: None,
        })
    }

    /// A copy of this client that sends `token` as a bearer token.
    pub fn with_auth_token(&self, token: impl Into<String>) -> Self {
        Self {
            auth_token: Some(token.into()),
            ..self.clone()
        }
    }

    /// Gets a `CollectionReference` for a top-level collection (e.g., "users").
    pub fn collection(&'_ self, collection_id: &str) -> CollectionReference<'_> {
        CollectionReference {
            firestore: self,
            path: collection_id.trim_matches('/').to_string(),
        }
    }

    /// Gets a `DocumentReference` from a slash-separated path (e.g., "users/alice").
    pub fn doc(&'_ self, document_path: &str) -> DocumentReference<'_> {
        DocumentReference {
            firestore: self,
            path: document_path.trim_matches('/').to_string(),
        }
    }

    pub(crate) fn url_for(&self, path: &str) -> Result<Url, FirestoreError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| FirestoreError::ConfigurationError(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(path.split('/').filter(|segment| !segment.is_empty()));
        Ok(url)
    }

    pub(crate) fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    pub(crate) async fn check(
        response: reqwest::Response,
        action: &str,
    ) -> Result<reqwest::Response, FirestoreError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let failure = parse_error_response(response, "unexpected response").await;
        Err(FirestoreError::ApiError(format!(
            "{} failed ({}): {}",
            action, failure.code, failure.message
        )))
    }
}
