//! Firebase project configuration.
//!
//! `FirebaseConfig` mirrors the config snippet shown in the Firebase console, so a
//! console export can be deserialized as-is:
//!
//! ```rust
//! # use firebase_client_sdk::config::FirebaseConfig;
//! let config = FirebaseConfig::from_json(r#"{
//!     "apiKey": "demo-key",
//!     "projectId": "demo-project",
//!     "databaseURL": "https://demo-project-default-rtdb.firebaseio.com"
//! }"#).unwrap();
//! assert!(config.missing_fields().is_empty());
//! ```

use serde::{Deserialize, Serialize};
use std::env;

const IDENTITY_TOOLKIT_V1_API: &str = "https://identitytoolkit.googleapis.com/v1";
const SECURE_TOKEN_V1_API: &str = "https://securetoken.googleapis.com/v1";
const FIRESTORE_V1_API: &str = "https://firestore.googleapis.com/v1";

/// Errors raised while loading a [`FirebaseConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("environment variable {0} is not set")]
    MissingVar(&'static str),
}

/// Base URLs of the REST services the client talks to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoints {
    pub identity_toolkit: String,
    pub secure_token: String,
    pub firestore: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            identity_toolkit: IDENTITY_TOOLKIT_V1_API.to_string(),
            secure_token: SECURE_TOKEN_V1_API.to_string(),
            firestore: FIRESTORE_V1_API.to_string(),
        }
    }
}

impl Endpoints {
    /// Endpoints served by the local emulator suite, e.g. `localhost:9099` for Auth.
    pub fn emulator(auth_host: &str, firestore_host: &str) -> Self {
        Self {
            identity_toolkit: format!("http://{}/identitytoolkit.googleapis.com/v1", auth_host),
            secure_token: format!("http://{}/securetoken.googleapis.com/v1", auth_host),
            firestore: format!("http://{}/v1", firestore_host),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirebaseConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_domain: Option<String>,
    #[serde(default)]
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messaging_sender_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(rename = "databaseURL", default)]
    pub database_url: String,
    #[serde(default)]
    pub endpoints: Endpoints,
}

impl FirebaseConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads the config from `FIREBASE_*` environment variables, loading a `.env` file first
    /// when one is present.
    ///
    /// `FIREBASE_API_KEY`, `FIREBASE_PROJECT_ID` and `FIREBASE_DATABASE_URL` are required;
    /// `FIREBASE_AUTH_EMULATOR_HOST` and `FIREBASE_FIRESTORE_EMULATOR_HOST` switch the
    /// endpoints to the emulator suite.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let required =
            |name: &'static str| env::var(name).map_err(|_| ConfigError::MissingVar(name));
        let optional = |name: &str| env::var(name).ok().filter(|v| !v.is_empty());

        let endpoints = match optional("FIREBASE_AUTH_EMULATOR_HOST") {
            Some(auth_host) => {
                let firestore_host = optional("FIREBASE_FIRESTORE_EMULATOR_HOST")
                    .unwrap_or_else(|| "localhost:8080".to_string());
                Endpoints::emulator(&auth_host, &firestore_host)
            }
            None => Endpoints::default(),
        };

        Ok(Self {
            api_key: required("FIREBASE_API_KEY")?,
            auth_domain: optional("FIREBASE_AUTH_DOMAIN"),
            project_id: required("FIREBASE_PROJECT_ID")?,
            storage_bucket: optional("FIREBASE_STORAGE_BUCKET"),
            messaging_sender_id: optional("FIREBASE_MESSAGING_SENDER_ID"),
            app_id: optional("FIREBASE_APP_ID"),
            database_url: required("FIREBASE_DATABASE_URL")?,
            endpoints,
        })
    }

    /// Names of the required fields that are empty. Only presence is checked.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.project_id.trim().is_empty() {
            missing.push("projectId");
        }
        if self.api_key.trim().is_empty() {
            missing.push("apiKey");
        }
        if self.database_url.trim().is_empty() {
            missing.push("databaseURL");
        }
        missing
    }
}
