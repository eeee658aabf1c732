//! Federated identity providers.
//!
//! The popup or redirect that talks to the provider is host-specific, so it is injected
//! as a [`PopupHandler`]. This module only describes the request and carries the
//! assertion back to the Identity Toolkit.

use super::AuthError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use url::form_urlencoded;

pub const GOOGLE_PROVIDER_ID: &str = "google.com";

/// What the popup handler needs in order to run a provider sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedRequest {
    pub provider_id: String,
    pub scopes: Vec<String>,
    pub custom_parameters: BTreeMap<String, String>,
    pub auth_domain: Option<String>,
}

/// Credential returned by the provider after the user consented.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FederatedAssertion {
    pub provider_id: String,
    pub id_token: Option<String>,
    pub access_token: Option<String>,
    /// The URI the provider redirected back to.
    pub request_uri: String,
}

impl FederatedAssertion {
    pub(crate) fn post_body(&self) -> Result<String, AuthError> {
        if self.id_token.is_none() && self.access_token.is_none() {
            return Err(AuthError::PopupError(
                "provider returned neither an ID token nor an access token".to_string(),
            ));
        }

        let mut body = form_urlencoded::Serializer::new(String::new());
        if let Some(token) = &self.id_token {
            body.append_pair("id_token", token);
        }
        if let Some(token) = &self.access_token {
            body.append_pair("access_token", token);
        }
        body.append_pair("providerId", &self.provider_id);
        Ok(body.finish())
    }
}

#[async_trait]
pub trait PopupHandler: Send + Sync {
    async fn open(&self, request: &FederatedRequest) -> Result<FederatedAssertion, AuthError>;
}

#[derive(Debug, Clone, Default)]
pub struct GoogleAuthProvider {
    scopes: Vec<String>,
    custom_parameters: BTreeMap<String, String>,
}

impl GoogleAuthProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_scope(mut self, scope: impl Into<String>) -> Self {
        self.scopes.push(scope.into());
        self
    }

    /// Extra OAuth parameters such as `prompt=select_account`.
    pub fn custom_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_parameters.insert(name.into(), value.into());
        self
    }

    pub fn request(&self, auth_domain: Option<String>) -> FederatedRequest {
        FederatedRequest {
            provider_id: GOOGLE_PROVIDER_ID.to_string(),
            scopes: self.scopes.clone(),
            custom_parameters: self.custom_parameters.clone(),
            auth_domain,
        }
    }
}
