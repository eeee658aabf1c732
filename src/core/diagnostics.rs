//! Sinks for failures that are swallowed instead of returned.

use super::Service;
use std::sync::Mutex;

/// A failure the connection layer recovered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    EnvironmentUnavailable,
    ConfigurationIncomplete { missing: Vec<&'static str> },
    ConstructionFailure { message: String },
    ServiceFailure { service: Service, message: String },
    PersistenceFailure { message: String },
}

pub trait DiagnosticSink: Send + Sync {
    fn report(&self, diagnostic: Diagnostic);
}

/// Emits every diagnostic as a `tracing` warning.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&self, diagnostic: Diagnostic) {
        match diagnostic {
            Diagnostic::EnvironmentUnavailable => {
                tracing::debug!("Firebase is not available outside a client environment")
            }
            Diagnostic::ConfigurationIncomplete { missing } => {
                tracing::warn!(?missing, "Firebase config is incomplete")
            }
            Diagnostic::ConstructionFailure { message } => {
                tracing::warn!("Firebase app initialization warning (non-blocking): {}", message)
            }
            Diagnostic::ServiceFailure { service, message } => {
                tracing::warn!(%service, "Firebase service initialization warning: {}", message)
            }
            Diagnostic::PersistenceFailure { message } => {
                tracing::warn!("Auth persistence warning: {}", message)
            }
        }
    }
}

/// Keeps diagnostics in memory so they can be inspected later.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Diagnostic>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Diagnostic> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl DiagnosticSink for MemorySink {
    fn report(&self, diagnostic: Diagnostic) {
        if let Ok(mut events) = self.events.lock() {
            events.push(diagnostic);
        }
    }
}
