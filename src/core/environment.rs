//! Execution environment detection.
//!
//! The platform clients only make sense inside a running client process. During a
//! static pre-render pass every operation must short-circuit instead.

use std::env;
use std::sync::atomic::{AtomicBool, Ordering};

/// Set to `1` or `true` while pre-rendering to mark the process as non-client.
pub const PRERENDER_ENV_VAR: &str = "FIREBASE_PRERENDER";

pub trait ExecutionEnvironment: Send + Sync {
    /// Whether the backend runtime can be used right now.
    fn is_client(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Client,
    Prerender,
}

impl Environment {
    pub fn from_env() -> Self {
        match env::var(PRERENDER_ENV_VAR) {
            Ok(v) if v == "1" || v.eq_ignore_ascii_case("true") => Environment::Prerender,
            _ => Environment::Client,
        }
    }
}

impl ExecutionEnvironment for Environment {
    fn is_client(&self) -> bool {
        matches!(self, Environment::Client)
    }
}

/// An environment that can move between pre-render and client at runtime, for hosts
/// that hydrate after rendering.
#[derive(Debug, Default)]
pub struct SwitchableEnvironment {
    client: AtomicBool,
}

impl SwitchableEnvironment {
    pub fn new(client: bool) -> Self {
        Self {
            client: AtomicBool::new(client),
        }
    }

    pub fn set_client(&self, client: bool) {
        self.client.store(client, Ordering::SeqCst);
    }
}

impl ExecutionEnvironment for SwitchableEnvironment {
    fn is_client(&self) -> bool {
        self.client.load(Ordering::SeqCst)
    }
}
