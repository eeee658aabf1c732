//! Client-side Firebase SDK.
//!
//! A [`connection::ConnectionManager`] owns the one [`FirebaseApp`] of the process and
//! hands out the Auth, Realtime Database and Firestore handles derived from it. The
//! functions in [`account`] sign users in and out through that manager.
//!
//! ```rust,no_run
//! # use firebase_client_sdk::{account, config::FirebaseConfig, connection::ConnectionManager};
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConnectionManager::builder(FirebaseConfig::from_env()?).build();
//! let credential = account::sign_in(&manager, "user@example.com", "secret").await?;
//! println!("signed in as {}", credential.user.uid);
//! # Ok(())
//! # }
//! ```

pub mod account;
pub mod auth;
pub mod config;
pub mod connection;
pub mod core;
pub mod database;
pub mod firestore;

use anyhow::Context;
use crate::auth::{AuthError, FirebaseAuth};
use crate::config::FirebaseConfig;
use crate::core::middleware::ApiKeyMiddleware;
use crate::database::{DatabaseError, FirebaseDatabase};
use crate::firestore::{FirebaseFirestore, FirestoreError};
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use std::fmt;

pub const DEFAULT_APP_NAME: &str = "[DEFAULT]";

/// The connection to one Firebase project. Service handles are derived from it.
pub struct FirebaseApp {
    name: String,
    config: FirebaseConfig,
    keyed_client: ClientWithMiddleware,
    plain_client: ClientWithMiddleware,
}

impl FirebaseApp {
    pub fn new(config: FirebaseConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self::with_http_client(config, http))
    }

    /// Builds the app on top of an existing `reqwest::Client` (shared pools, proxies).
    pub fn with_http_client(config: FirebaseConfig, http: Client) -> Self {
        let keyed_client = ClientBuilder::new(http.clone())
            .with(ApiKeyMiddleware::new(config.api_key.clone()))
            .build();
        let plain_client = ClientBuilder::new(http).build();

        Self {
            name: DEFAULT_APP_NAME.to_string(),
            config,
            keyed_client,
            plain_client,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &FirebaseConfig {
        &self.config
    }

    pub fn auth(&self) -> Result<FirebaseAuth, AuthError> {
        FirebaseAuth::new(self.keyed_client.clone(), &self.config, &self.name)
    }

    pub fn database(&self) -> Result<FirebaseDatabase, DatabaseError> {
        FirebaseDatabase::new(self.plain_client.clone(), &self.config.database_url)
    }

    pub fn firestore(&self) -> Result<FirebaseFirestore, FirestoreError> {
        FirebaseFirestore::new(self.keyed_client.clone(), &self.config)
    }
}

impl fmt::Debug for FirebaseApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirebaseApp")
            .field("name", &self.name)
            .field("project_id", &self.config.project_id)
            .finish_non_exhaustive()
    }
}
