//! The connection manager.
//!
//! `ConnectionManager` is the explicit context every operation receives. It builds the
//! [`FirebaseApp`] the first time one is needed and derives each service handle from it
//! on first request. Construction failures never escape as panics: they are reported to
//! the [`DiagnosticSink`] and returned as a [`ConnectionError`], and the next request
//! tries again.
//!
//! Construction is single-flight. Concurrent first callers wait for the same attempt
//! instead of racing to build a second app.
//!
//! # States
//!
//! `Uninitialized -> Initializing -> Ready` when everything works,
//! `-> Degraded` when the app exists but a service handle failed, and
//! `-> Unavailable` when the app itself could not be built.

use crate::auth::persistence::{FilePersistence, InMemoryPersistence, Persistence};
use crate::auth::phone::{
    BotCheckProvider, BotCheckWidget, ConfirmationResult, WidgetSize, DEFAULT_BOT_CHECK_ANCHOR,
};
use crate::auth::provider::PopupHandler;
use crate::auth::{AuthError, FirebaseAuth};
use crate::config::FirebaseConfig;
use crate::core::diagnostics::{Diagnostic, DiagnosticSink, TracingSink};
use crate::core::environment::{Environment, ExecutionEnvironment};
use crate::core::Service;
use crate::database::FirebaseDatabase;
use crate::firestore::FirebaseFirestore;
use crate::FirebaseApp;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell};

#[cfg(test)]
mod tests;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Firebase can only be used in a client environment")]
    EnvironmentUnavailable,
    #[error("Firebase config is incomplete, missing: {}", .missing.join(", "))]
    ConfigurationIncomplete { missing: Vec<&'static str> },
    #[error("Firebase app initialization failed: {0}")]
    ConstructionFailure(String),
    #[error("Firebase {service} initialization failed: {message}")]
    PartialFailure { service: Service, message: String },
}

/// Builds the app from the config. The seam for substitute backends.
pub trait Connector: Send + Sync {
    fn connect(&self, config: &FirebaseConfig) -> anyhow::Result<FirebaseApp>;
}

/// Connects over HTTPS with a fresh `reqwest` client.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpConnector;

impl Connector for HttpConnector {
    fn connect(&self, config: &FirebaseConfig) -> anyhow::Result<FirebaseApp> {
        FirebaseApp::new(config.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Initializing,
    Ready,
    Degraded,
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Uninitialized,
    Initializing,
    Connected,
    Unavailable,
}

#[derive(Debug)]
struct Status {
    phase: Phase,
    failed: BTreeSet<Service>,
}

pub struct ConnectionManagerBuilder {
    config: FirebaseConfig,
    environment: Option<Arc<dyn ExecutionEnvironment>>,
    connector: Option<Arc<dyn Connector>>,
    diagnostics: Option<Arc<dyn DiagnosticSink>>,
    persistence: Option<Arc<dyn Persistence>>,
    bot_check: Option<Arc<dyn BotCheckProvider>>,
    bot_check_anchor: String,
    bot_check_size: WidgetSize,
    popup: Option<Arc<dyn PopupHandler>>,
}

impl ConnectionManagerBuilder {
    /// Defaults to [`Environment::from_env`].
    pub fn environment(mut self, environment: Arc<dyn ExecutionEnvironment>) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Defaults to [`HttpConnector`].
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Defaults to [`TracingSink`].
    pub fn diagnostics(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = Some(sink);
        self
    }

    /// Where the signed-in user is kept. Defaults to [`FilePersistence::default_location`],
    /// or memory when the platform has no data directory.
    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn bot_check(mut self, provider: Arc<dyn BotCheckProvider>) -> Self {
        self.bot_check = Some(provider);
        self
    }

    pub fn bot_check_anchor(mut self, anchor_id: impl Into<String>) -> Self {
        self.bot_check_anchor = anchor_id.into();
        self
    }

    pub fn bot_check_size(mut self, size: WidgetSize) -> Self {
        self.bot_check_size = size;
        self
    }

    pub fn popup_handler(mut self, handler: Arc<dyn PopupHandler>) -> Self {
        self.popup = Some(handler);
        self
    }

    pub fn build(self) -> ConnectionManager {
        let persistence = self
            .persistence
            .unwrap_or_else(|| match FilePersistence::default_location() {
                Some(store) => Arc::new(store),
                None => Arc::new(InMemoryPersistence::new()),
            });

        ConnectionManager {
            config: self.config,
            environment: self
                .environment
                .unwrap_or_else(|| Arc::new(Environment::from_env())),
            connector: self.connector.unwrap_or_else(|| Arc::new(HttpConnector)),
            diagnostics: self.diagnostics.unwrap_or_else(|| Arc::new(TracingSink)),
            persistence,
            bot_check: self.bot_check,
            bot_check_anchor: self.bot_check_anchor,
            bot_check_size: self.bot_check_size,
            popup: self.popup,
            app_handle: OnceCell::new(),
            auth_handle: OnceCell::new(),
            database_handle: OnceCell::new(),
            firestore_handle: OnceCell::new(),
            widget: OnceCell::new(),
            pending_challenge: Mutex::new(None),
            status: StdMutex::new(Status {
                phase: Phase::Uninitialized,
                failed: BTreeSet::new(),
            }),
        }
    }
}

pub struct ConnectionManager {
    config: FirebaseConfig,
    environment: Arc<dyn ExecutionEnvironment>,
    connector: Arc<dyn Connector>,
    diagnostics: Arc<dyn DiagnosticSink>,
    persistence: Arc<dyn Persistence>,
    bot_check: Option<Arc<dyn BotCheckProvider>>,
    bot_check_anchor: String,
    bot_check_size: WidgetSize,
    popup: Option<Arc<dyn PopupHandler>>,
    app_handle: OnceCell<Arc<FirebaseApp>>,
    auth_handle: OnceCell<Arc<FirebaseAuth>>,
    database_handle: OnceCell<Arc<FirebaseDatabase>>,
    firestore_handle: OnceCell<Arc<FirebaseFirestore>>,
    widget: OnceCell<Arc<dyn BotCheckWidget>>,
    pending_challenge: Mutex<Option<ConfirmationResult>>,
    status: StdMutex<Status>,
}

impl ConnectionManager {
    pub fn builder(config: FirebaseConfig) -> ConnectionManagerBuilder {
        ConnectionManagerBuilder {
            config,
            environment: None,
            connector: None,
            diagnostics: None,
            persistence: None,
            bot_check: None,
            bot_check_anchor: DEFAULT_BOT_CHECK_ANCHOR.to_string(),
            bot_check_size: WidgetSize::default(),
            popup: None,
        }
    }

    pub fn new(config: FirebaseConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &FirebaseConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        let status = self.status.lock().unwrap_or_else(|p| p.into_inner());
        match status.phase {
            Phase::Uninitialized => ConnectionState::Uninitialized,
            Phase::Initializing => ConnectionState::Initializing,
            Phase::Unavailable => ConnectionState::Unavailable,
            Phase::Connected if status.failed.is_empty() => ConnectionState::Ready,
            Phase::Connected => ConnectionState::Degraded,
        }
    }

    fn set_phase(&self, phase: Phase) {
        let mut status = self.status.lock().unwrap_or_else(|p| p.into_inner());
        // Once connected the app is never dropped, so it cannot fall back.
        if status.phase != Phase::Connected || phase == Phase::Connected {
            status.phase = phase;
        }
    }

    fn mark_service(&self, service: Service, healthy: bool) {
        let mut status = self.status.lock().unwrap_or_else(|p| p.into_inner());
        if healthy {
            status.failed.remove(&service);
        } else {
            status.failed.insert(service);
        }
    }

    /// The shared app, built on first use.
    pub async fn acquire(&self) -> Result<Arc<FirebaseApp>, ConnectionError> {
        if !self.environment.is_client() {
            self.diagnostics.report(Diagnostic::EnvironmentUnavailable);
            self.set_phase(Phase::Unavailable);
            return Err(ConnectionError::EnvironmentUnavailable);
        }

        if let Some(app) = self.app_handle.get() {
            return Ok(app.clone());
        }

        let missing = self.config.missing_fields();
        if !missing.is_empty() {
            self.diagnostics.report(Diagnostic::ConfigurationIncomplete {
                missing: missing.clone(),
            });
            self.set_phase(Phase::Unavailable);
            return Err(ConnectionError::ConfigurationIncomplete { missing });
        }

        let result = self
            .app_handle
            .get_or_try_init(|| async {
                self.set_phase(Phase::Initializing);
                tracing::debug!(project_id = %self.config.project_id, "Initializing Firebase app");
                self.connector
                    .connect(&self.config)
                    .map(Arc::new)
                    .map_err(|e| ConnectionError::ConstructionFailure(format!("{:#}", e)))
            })
            .await;

        match result {
            Ok(app) => {
                self.set_phase(Phase::Connected);
                Ok(app.clone())
            }
            Err(err) => {
                self.diagnostics.report(Diagnostic::ConstructionFailure {
                    message: err.to_string(),
                });
                self.set_phase(Phase::Unavailable);
                Err(err)
            }
        }
    }

    async fn service<T, F, Fut>(
        &self,
        service: Service,
        cell: &OnceCell<Arc<T>>,
        init: F,
    ) -> Result<Arc<T>, ConnectionError>
    where
        F: FnOnce(Arc<FirebaseApp>) -> Fut,
        Fut: Future<Output = Result<T, String>>,
    {
        let app = self.acquire().await?;

        match cell
            .get_or_try_init(|| async move { init(app).await.map(Arc::new) })
            .await
        {
            Ok(handle) => {
                self.mark_service(service, true);
                Ok(handle.clone())
            }
            Err(message) => {
                self.diagnostics.report(Diagnostic::ServiceFailure {
                    service,
                    message: message.clone(),
                });
                self.mark_service(service, false);
                Err(ConnectionError::PartialFailure { service, message })
            }
        }
    }

    /// The auth handle. The first successful call also switches the session to durable
    /// persistence and restores a previously saved user.
    pub async fn auth(&self) -> Result<Arc<FirebaseAuth>, ConnectionError> {
        self.service(Service::Auth, &self.auth_handle, |app| async move {
            let auth = app.auth().map_err(|e| e.to_string())?;
            if let Err(e) = auth.set_persistence(self.persistence.clone()).await {
                self.diagnostics.report(Diagnostic::PersistenceFailure {
                    message: e.to_string(),
                });
            }
            Ok(auth)
        })
        .await
    }

    pub async fn database(&self) -> Result<Arc<FirebaseDatabase>, ConnectionError> {
        self.service(Service::Database, &self.database_handle, |app| async move {
            app.database().map_err(|e| e.to_string())
        })
        .await
    }

    pub async fn firestore(&self) -> Result<Arc<FirebaseFirestore>, ConnectionError> {
        self.service(Service::Firestore, &self.firestore_handle, |app| async move {
            app.firestore().map_err(|e| e.to_string())
        })
        .await
    }

    pub(crate) fn popup_handler(&self) -> Option<Arc<dyn PopupHandler>> {
        self.popup.clone()
    }

    pub(crate) fn bot_check_provider(&self) -> Option<Arc<dyn BotCheckProvider>> {
        self.bot_check.clone()
    }

    /// The bot-check widget, rendered on first use.
    pub(crate) async fn bot_check_widget(
        &self,
        provider: &dyn BotCheckProvider,
    ) -> Result<Arc<dyn BotCheckWidget>, AuthError> {
        self.widget
            .get_or_try_init(|| async {
                tracing::debug!(anchor = %self.bot_check_anchor, "Rendering bot-check widget");
                provider
                    .render(&self.bot_check_anchor, self.bot_check_size)
                    .await
            })
            .await
            .cloned()
    }

    pub async fn has_pending_challenge(&self) -> bool {
        self.pending_challenge.lock().await.is_some()
    }

    pub(crate) async fn pending_challenge(&self) -> Option<ConfirmationResult> {
        self.pending_challenge.lock().await.clone()
    }

    pub(crate) async fn replace_pending_challenge(&self, confirmation: ConfirmationResult) {
        *self.pending_challenge.lock().await = Some(confirmation);
    }

    /// Clears the pending challenge if it is still the one identified by `verification_id`.
    pub(crate) async fn consume_pending_challenge(&self, verification_id: &str) {
        let mut pending = self.pending_challenge.lock().await;
        if pending
            .as_ref()
            .is_some_and(|c| c.verification_id() == verification_id)
        {
            *pending = None;
        }
    }
}
