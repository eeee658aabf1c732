//! Firebase Realtime Database over its REST API.
//!
//! Every location is addressed as `{databaseURL}/{path}.json`. Reads of a missing
//! location return `None`.
//!
//! # Examples
//!
//! ```rust,no_run
//! # use firebase_client_sdk::database::FirebaseDatabase;
//! # async fn run(db: &FirebaseDatabase) {
//! let scores = db.reference("scores/alice");
//! let _ = scores.set(&42).await;
//! let value: Option<u32> = scores.get().await.unwrap_or(None);
//! # }
//! ```

use reqwest::header;
use reqwest_middleware::ClientWithMiddleware;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use url::Url;


#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("HTTP Request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Middleware error: {0}")]
    MiddlewareError(#[from] reqwest_middleware::Error),
    #[error("API error: {0}")]
    ApiError(String),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Invalid database URL: {0}")]
    InvalidUrl(String),
}

#[derive(Debug, Deserialize)]
struct DatabaseErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    name: String,
}

#[derive(Clone)]
pub struct FirebaseDatabase {
    client: ClientWithMiddleware,
    base_url: Url,
    auth_token: Option<String>,
}

impl fmt::Debug for FirebaseDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirebaseDatabase")
            .field("base_url", &self.base_url.as_str())
            .field("authenticated", &self.auth_token.is_some())
            .finish_non_exhaustive()
    }
}

impl FirebaseDatabase {
    /// This is typically called via `FirebaseApp::database()`.
    pub fn new(client: ClientWithMiddleware, database_url: &str) -> Result<Self, DatabaseError> {
        let base_url = Url::parse(database_url)
            .map_err(|e| DatabaseError::InvalidUrl(format!("{}: {}", database_url, e)))?;
        if !matches!(base_url.scheme(), "http" | "https") || base_url.cannot_be_a_base() {
            return Err(DatabaseError::InvalidUrl(format!(
                "{}: expected an http(s) URL",
                database_url
            )));
        }

        Ok(Self {
            client,
            base_url,
            auth_token: None,
        })
    }

    /// A copy of this handle whose requests carry `token` (a user ID token) as `auth`.
    pub fn with_auth_token(&self, token: impl Into<String>) -> Self {
        Self {
            auth_token: Some(token.into()),
            ..self.clone()
        }
    }

    pub fn url(&self) -> &Url {
        &self.base_url
    }

    pub fn reference(&self, path: &str) -> DatabaseReference<'_> {
        DatabaseReference {
            database: self,
            path: normalize_path(path),
        }
    }
}

fn normalize_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

#[derive(Clone)]
pub struct DatabaseReference<'a> {
    database: &'a FirebaseDatabase,
    path: String,
}

impl<'a> DatabaseReference<'a> {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last path segment; `None` for the root.
    pub fn key(&self) -> Option<&str> {
        self.path.rsplit('/').next().filter(|key| !key.is_empty())
    }

    pub fn child(&self, path: &str) -> DatabaseReference<'a> {
        self.database.reference(&format!("{}/{}", self.path, path))
    }

    fn url(&self) -> Result<Url, DatabaseError> {
        let mut url = self.database.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| DatabaseError::InvalidUrl(self.database.base_url.to_string()))?;
            segments.pop_if_empty();
            if self.path.is_empty() {
                segments.push(".json");
            } else {
                let mut parts: Vec<&str> = self.path.split('/').collect();
                let last = parts.pop().map(|p| format!("{}.json", p)).unwrap_or_default();
                segments.extend(parts);
                segments.push(&last);
            }
        }
        if let Some(token) = &self.database.auth_token {
            url.query_pairs_mut().append_pair("auth", token);
        }
        Ok(url)
    }

    async fn check(
        response: reqwest::Response,
        action: &str,
    ) -> Result<reqwest::Response, DatabaseError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<DatabaseErrorBody>(&text)
            .map(|body| body.error)
            .unwrap_or(text);
        Err(DatabaseError::ApiError(format!(
            "{} failed {}: {}",
            action, status, detail
        )))
    }

    pub async fn get<T: DeserializeOwned>(&self) -> Result<Option<T>, DatabaseError> {
        let response = self.database.client.get(self.url()?).send().await?;
        let response = Self::check(response, "Get").await?;

        let value: serde_json::Value = response.json().await?;
        if value.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(value)?))
    }

    /// Overwrites the location.
    pub async fn set<T: Serialize>(&self, value: &T) -> Result<(), DatabaseError> {
        self.write(reqwest::Method::PUT, value, "Set").await
    }

    /// Merges the given children into the location.
    pub async fn update<T: Serialize>(&self, value: &T) -> Result<(), DatabaseError> {
        self.write(reqwest::Method::PATCH, value, "Update").await
    }

    async fn write<T: Serialize>(
        &self,
        method: reqwest::Method,
        value: &T,
        action: &str,
    ) -> Result<(), DatabaseError> {
        let response = self
            .database
            .client
            .request(method, self.url()?)
            .header(header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(value)?)
            .send()
            .await?;
        Self::check(response, action).await?;
        Ok(())
    }

    /// Appends a child under a generated key and returns that key.
    pub async fn push<T: Serialize>(&self, value: &T) -> Result<String, DatabaseError> {
        let response = self
            .database
            .client
            .post(self.url()?)
            .header(header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(value)?)
            .send()
            .await?;
        let response = Self::check(response, "Push").await?;
        let pushed: PushResponse = response.json().await?;
        Ok(pushed.name)
    }

    pub async fn remove(&self) -> Result<(), DatabaseError> {
        let response = self.database.client.delete(self.url()?).send().await?;
        Self::check(response, "Remove").await?;
        Ok(())
    }
}
