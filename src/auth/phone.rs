//! Phone number sign-in.

use super::models::UserCredential;
use super::{AuthError, FirebaseAuth};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Anchor element the bot-check widget binds to unless configured otherwise.
pub const DEFAULT_BOT_CHECK_ANCHOR: &str = "recaptcha-container";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WidgetSize {
    #[default]
    Invisible,
    Normal,
    Compact,
}

/// Renders the anti-automation widget required before a verification code is sent.
#[async_trait]
pub trait BotCheckProvider: Send + Sync {
    async fn render(
        &self,
        anchor_id: &str,
        size: WidgetSize,
    ) -> Result<Arc<dyn BotCheckWidget>, AuthError>;
}

#[async_trait]
pub trait BotCheckWidget: Send + Sync {
    /// Runs the challenge and returns the token to forward to the platform.
    async fn verify(&self) -> Result<String, AuthError>;
}

/// A verification code has been sent; holds what is needed to confirm it.
#[derive(Clone)]
pub struct ConfirmationResult {
    verification_id: String,
    auth: FirebaseAuth,
}

impl ConfirmationResult {
    pub(crate) fn new(verification_id: String, auth: FirebaseAuth) -> Self {
        Self {
            verification_id,
            auth,
        }
    }

    pub fn verification_id(&self) -> &str {
        &self.verification_id
    }

    /// Signs in with the code the user received by SMS.
    pub async fn confirm(&self, code: &str) -> Result<UserCredential, AuthError> {
        self.auth
            .sign_in_with_phone_code(&self.verification_id, code)
            .await
    }
}

impl fmt::Debug for ConfirmationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfirmationResult")
            .field("verification_id", &self.verification_id)
            .finish_non_exhaustive()
    }
}
