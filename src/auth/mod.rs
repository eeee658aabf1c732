//! Firebase Authentication, client side.
//!
//! `FirebaseAuth` signs users in against the Identity Toolkit REST API and keeps the
//! signed-in [`User`] in memory, mirrored to a [`Persistence`] store. Changes are
//! broadcast to [`FirebaseAuth::on_auth_state_changed`] subscribers.
//!
//! Cloning is cheap; clones share the same signed-in state.

pub mod models;
pub mod persistence;
pub mod phone;
pub mod provider;

use crate::config::FirebaseConfig;
use crate::core::parse_error_response;
use chrono::Duration;
use futures::stream::{self, Stream};
use models::{
    EmailPasswordRequest, LookupRequest, LookupResponse, RefreshTokenResponse,
    SendVerificationCodeRequest, SendVerificationCodeResponse, SignInResponse,
    SignInWithIdpRequest, SignInWithPhoneNumberRequest, StsTokens, UpdateProfileRequest, User,
    UserCredential,
};
use persistence::{InMemoryPersistence, Persistence, PersistenceError, PersistenceKind};
use phone::ConfirmationResult;
use provider::{FederatedAssertion, GoogleAuthProvider, PopupHandler};
use reqwest::header;
use reqwest_middleware::ClientWithMiddleware;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use url::{form_urlencoded, Url};


const REFRESH_WINDOW_MINUTES: i64 = 5;
const DEFAULT_REQUEST_URI: &str = "http://localhost";

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("HTTP Request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Middleware error: {0}")]
    MiddlewareError(#[from] reqwest_middleware::Error),
    #[error("{message} (code: {code})")]
    ApiError { code: u16, message: String },
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Persistence error: {0}")]
    PersistenceError(#[from] PersistenceError),
    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),
    #[error("Bot check failed: {0}")]
    BotCheckError(String),
    #[error("Popup sign-in failed: {0}")]
    PopupError(String),
    #[error("Invalid token: {0}")]
    InvalidToken(String),
    #[error("No user is signed in")]
    NoCurrentUser,
}

impl AuthError {
    /// The `auth/...` code a web client would report for this error, when known.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            AuthError::ApiError { message, .. } => client_error_code(message),
            AuthError::NoCurrentUser => Some("auth/no-current-user"),
            _ => None,
        }
    }
}

// Server messages are either a bare code ("INVALID_PASSWORD") or a code followed by
// details ("WEAK_PASSWORD : Password should be at least 6 characters").
fn client_error_code(message: &str) -> Option<&'static str> {
    let server_code = message
        .split(|c: char| c == ':' || c.is_whitespace())
        .next()?;
    Some(match server_code {
        "EMAIL_EXISTS" => "auth/email-already-in-use",
        "INVALID_EMAIL" => "auth/invalid-email",
        "INVALID_PASSWORD" => "auth/wrong-password",
        "INVALID_LOGIN_CREDENTIALS" => "auth/invalid-credential",
        "EMAIL_NOT_FOUND" => "auth/user-not-found",
        "USER_DISABLED" => "auth/user-disabled",
        "WEAK_PASSWORD" => "auth/weak-password",
        "TOO_MANY_ATTEMPTS_TRY_LATER" => "auth/too-many-requests",
        "INVALID_CODE" => "auth/invalid-verification-code",
        "SESSION_EXPIRED" => "auth/code-expired",
        "INVALID_PHONE_NUMBER" => "auth/invalid-phone-number",
        "TOKEN_EXPIRED" => "auth/user-token-expired",
        _ => return None,
    })
}

/// Keeps an auth state listener alive. Dropping it, or calling
/// [`Subscription::unsubscribe`], stops delivery.
#[derive(Debug)]
pub struct Subscription {
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    /// A subscription that never delivers anything.
    pub fn noop() -> Self {
        Self { handle: None }
    }

    pub fn unsubscribe(mut self) {
        self.cancel();
    }

    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[derive(Clone)]
pub struct FirebaseAuth {
    client: ClientWithMiddleware,
    base_url: String,
    token_url: String,
    auth_domain: Option<String>,
    persistence_key: String,
    state: Arc<watch::Sender<Option<User>>>,
    persistence: Arc<RwLock<Arc<dyn Persistence>>>,
}

impl fmt::Debug for FirebaseAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirebaseAuth")
            .field("base_url", &self.base_url)
            .field("persistence_key", &self.persistence_key)
            .field("uid", &self.state.borrow().as_ref().map(|u| u.uid.clone()))
            .finish_non_exhaustive()
    }
}

impl FirebaseAuth {
    /// Creates the auth client for an app. `client` must already carry the API key.
    ///
    /// This is typically called via `FirebaseApp::auth()`.
    pub fn new(
        client: ClientWithMiddleware,
        config: &FirebaseConfig,
        app_name: &str,
    ) -> Result<Self, AuthError> {
        if config.api_key.trim().is_empty() {
            return Err(AuthError::ConfigurationError("apiKey is empty".to_string()));
        }
        for endpoint in [&config.endpoints.identity_toolkit, &config.endpoints.secure_token] {
            Url::parse(endpoint).map_err(|e| {
                AuthError::ConfigurationError(format!("invalid endpoint {}: {}", endpoint, e))
            })?;
        }

        let mut auth = Self::new_with_client(
            client,
            config.endpoints.identity_toolkit.trim_end_matches('/').to_string(),
            config.endpoints.secure_token.trim_end_matches('/').to_string(),
        );
        auth.auth_domain = config.auth_domain.clone();
        auth.persistence_key = format!("firebase:authUser:{}:{}", config.api_key, app_name);
        Ok(auth)
    }

    /// Creates an auth client against explicit Identity Toolkit and Secure Token base URLs.
    pub(crate) fn new_with_client(
        client: ClientWithMiddleware,
        base_url: String,
        token_base_url: String,
    ) -> Self {
        let (state, _) = watch::channel(None);
        Self {
            client,
            base_url,
            token_url: format!("{}/token", token_base_url),
            auth_domain: None,
            persistence_key: "firebase:authUser:[DEFAULT]".to_string(),
            state: Arc::new(state),
            persistence: Arc::new(RwLock::new(Arc::new(InMemoryPersistence::new()))),
        }
    }

    fn persistence(&self) -> Arc<dyn Persistence> {
        self.persistence
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn persistence_kind(&self) -> PersistenceKind {
        self.persistence().kind()
    }

    /// Switches where the signed-in user is stored.
    ///
    /// A user signed in right now is moved to the new store. Otherwise a user already
    /// saved in the new store is restored.
    pub async fn set_persistence(&self, store: Arc<dyn Persistence>) -> Result<(), AuthError> {
        store.probe().await?;

        let previous = self.persistence();
        if Arc::ptr_eq(&previous, &store) {
            return Ok(());
        }
        match self.current_user() {
            Some(user) => {
                store.save(&self.persistence_key, &user).await?;
            }
            None => {
                if let Some(user) = store.load(&self.persistence_key).await? {
                    tracing::debug!(uid = %user.uid, "Restored persisted user");
                    self.state.send_replace(Some(user));
                }
            }
        }

        *self
            .persistence
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = store;

        if let Err(e) = previous.remove(&self.persistence_key).await {
            tracing::debug!("Failed to clear previous auth persistence: {}", e);
        }
        Ok(())
    }

    async fn set_current_user(&self, user: Option<User>) {
        let store = self.persistence();
        let result = match &user {
            Some(user) => store.save(&self.persistence_key, user).await,
            None => store.remove(&self.persistence_key).await,
        };
        if let Err(e) = result {
            tracing::warn!("Failed to persist auth state: {}", e);
        }
        self.state.send_replace(user);
    }

    async fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &B,
        action: &str,
    ) -> Result<R, AuthError> {
        let url = format!("{}/{}", self.base_url, endpoint);

        let response = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(body)?)
            .send()
            .await?;

        if !response.status().is_success() {
            let failure = parse_error_response(response, &format!("{} failed", action)).await;
            tracing::debug!(code = failure.code, "{} rejected: {}", action, failure.message);
            return Err(AuthError::ApiError {
                code: failure.code,
                message: failure.message,
            });
        }

        Ok(response.json().await?)
    }

    async fn complete_sign_in(
        &self,
        response: SignInResponse,
        provider_id: Option<String>,
    ) -> Result<UserCredential, AuthError> {
        let is_new_user = response.is_new_user.unwrap_or(false);
        let provider_id = response.provider_id.clone().or(provider_id);
        let user = response.into_user(None)?;
        tracing::debug!(uid = %user.uid, "Signed in");
        self.set_current_user(Some(user.clone())).await;
        Ok(UserCredential {
            user,
            provider_id,
            is_new_user,
        })
    }

    pub fn current_user(&self) -> Option<User> {
        self.state.borrow().clone()
    }

    pub async fn create_user_with_email_and_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<UserCredential, AuthError> {
        let request = EmailPasswordRequest {
            email,
            password,
            return_secure_token: true,
        };
        let response: SignInResponse = self.post("accounts:signUp", &request, "Sign up").await?;
        let mut credential = self
            .complete_sign_in(response, Some("password".to_string()))
            .await?;
        credential.is_new_user = true;
        Ok(credential)
    }

    pub async fn sign_in_with_email_and_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<UserCredential, AuthError> {
        let request = EmailPasswordRequest {
            email,
            password,
            return_secure_token: true,
        };
        let response: SignInResponse = self
            .post("accounts:signInWithPassword", &request, "Sign in")
            .await?;
        self.complete_sign_in(response, Some("password".to_string()))
            .await
    }

    /// Updates the display name and/or photo URL of the current user.
    pub async fn update_profile(
        &self,
        display_name: Option<&str>,
        photo_url: Option<&str>,
    ) -> Result<User, AuthError> {
        let current = self.current_user().ok_or(AuthError::NoCurrentUser)?;
        let request = UpdateProfileRequest {
            id_token: current.id_token(),
            display_name,
            photo_url,
            return_secure_token: true,
        };
        let response: SignInResponse = self
            .post("accounts:update", &request, "Update profile")
            .await?;

        let mut user = response.into_user(Some(&current))?;
        if let Some(name) = display_name {
            user.display_name = Some(name.to_string());
        }
        if let Some(url) = photo_url {
            user.photo_url = Some(url.to_string());
        }
        self.set_current_user(Some(user.clone())).await;
        Ok(user)
    }

    /// Exchanges a provider assertion for a Firebase session.
    pub async fn sign_in_with_assertion(
        &self,
        assertion: &FederatedAssertion,
    ) -> Result<UserCredential, AuthError> {
        let request_uri = if assertion.request_uri.is_empty() {
            DEFAULT_REQUEST_URI.to_string()
        } else {
            assertion.request_uri.clone()
        };
        let request = SignInWithIdpRequest {
            post_body: assertion.post_body()?,
            request_uri,
            return_idp_credential: true,
            return_secure_token: true,
        };
        let response: SignInResponse = self
            .post("accounts:signInWithIdp", &request, "Federated sign in")
            .await?;
        self.complete_sign_in(response, Some(assertion.provider_id.clone()))
            .await
    }

    pub async fn sign_in_with_popup(
        &self,
        provider: &GoogleAuthProvider,
        handler: &dyn PopupHandler,
    ) -> Result<UserCredential, AuthError> {
        let request = provider.request(self.auth_domain.clone());
        let assertion = handler.open(&request).await?;
        self.sign_in_with_assertion(&assertion).await
    }

    /// Sends an SMS code to `phone_number`. `bot_check_token` comes from the bot-check widget.
    pub async fn send_verification_code(
        &self,
        phone_number: &str,
        bot_check_token: &str,
    ) -> Result<ConfirmationResult, AuthError> {
        let request = SendVerificationCodeRequest {
            phone_number,
            recaptcha_token: bot_check_token,
        };
        let response: SendVerificationCodeResponse = self
            .post("accounts:sendVerificationCode", &request, "Send verification code")
            .await?;
        Ok(ConfirmationResult::new(response.session_info, self.clone()))
    }

    pub(crate) async fn sign_in_with_phone_code(
        &self,
        session_info: &str,
        code: &str,
    ) -> Result<UserCredential, AuthError> {
        let request = SignInWithPhoneNumberRequest { session_info, code };
        let response: SignInResponse = self
            .post("accounts:signInWithPhoneNumber", &request, "Verify code")
            .await?;
        self.complete_sign_in(response, Some("phone".to_string()))
            .await
    }

    pub async fn sign_out(&self) -> Result<(), AuthError> {
        if let Some(user) = self.current_user() {
            tracing::debug!(uid = %user.uid, "Signing out");
        }
        self.set_current_user(None).await;
        Ok(())
    }

    /// Re-reads the current user's profile from the platform.
    pub async fn reload(&self) -> Result<User, AuthError> {
        let current = self.current_user().ok_or(AuthError::NoCurrentUser)?;
        let request = LookupRequest {
            id_token: current.id_token(),
        };
        let response: LookupResponse = self.post("accounts:lookup", &request, "Reload").await?;
        let info = response
            .users
            .into_iter()
            .next()
            .ok_or(AuthError::NoCurrentUser)?;

        let user = User {
            uid: info.local_id,
            email: info.email,
            display_name: info.display_name,
            photo_url: info.photo_url,
            phone_number: info.phone_number,
            email_verified: info.email_verified,
            sts_token_manager: current.sts_token_manager.clone(),
        };
        self.set_current_user(Some(user.clone())).await;
        Ok(user)
    }

    /// Returns the current user's ID token, refreshing it when it is about to expire or when
    /// `force_refresh` is set. `None` when nobody is signed in.
    pub async fn get_id_token(&self, force_refresh: bool) -> Result<Option<String>, AuthError> {
        let Some(user) = self.current_user() else {
            return Ok(None);
        };
        if !force_refresh
            && !user
                .sts_token_manager
                .expires_within(Duration::minutes(REFRESH_WINDOW_MINUTES))
        {
            return Ok(Some(user.id_token().to_string()));
        }

        let refreshed = self.refresh_tokens(&user).await?;
        Ok(Some(refreshed.id_token().to_string()))
    }

    async fn refresh_tokens(&self, user: &User) -> Result<User, AuthError> {
        let body = form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "refresh_token")
            .append_pair("refresh_token", user.refresh_token())
            .finish();

        let response = self
            .client
            .post(&self.token_url)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let failure = parse_error_response(response, "Token refresh failed").await;
            return Err(AuthError::ApiError {
                code: failure.code,
                message: failure.message,
            });
        }

        let tokens: RefreshTokenResponse = response.json().await?;
        if tokens.user_id != user.uid {
            return Err(AuthError::InvalidToken(
                "refreshed token belongs to another user".to_string(),
            ));
        }

        let mut refreshed = user.clone();
        refreshed.sts_token_manager = StsTokens::new(
            tokens.id_token,
            tokens.refresh_token,
            Some(&tokens.expires_in),
        );
        self.set_current_user(Some(refreshed.clone())).await;
        Ok(refreshed)
    }

    /// Calls `callback` with the current user, then again whenever a different user signs
    /// in or the user signs out. Token refreshes are not reported.
    pub fn on_auth_state_changed<F>(&self, mut callback: F) -> Subscription
    where
        F: FnMut(Option<User>) + Send + 'static,
    {
        let mut rx = self.state.subscribe();
        let handle = tokio::spawn(async move {
            let initial = rx.borrow_and_update().clone();
            let mut last_uid = initial.as_ref().map(|u| u.uid.clone());
            callback(initial);

            while rx.changed().await.is_ok() {
                let user = rx.borrow_and_update().clone();
                let uid = user.as_ref().map(|u| u.uid.clone());
                if uid != last_uid {
                    last_uid = uid;
                    callback(user);
                }
            }
        });
        Subscription {
            handle: Some(handle),
        }
    }

    /// Every state change, token refreshes included, starting with the current value.
    pub fn auth_state_changes(&self) -> impl Stream<Item = Option<User>> + Send + 'static {
        let rx = self.state.subscribe();
        stream::unfold((rx, true), |(mut rx, first)| async move {
            if !first && rx.changed().await.is_err() {
                return None;
            }
            let user = rx.borrow_and_update().clone();
            Some((user, (rx, false)))
        })
    }
}
