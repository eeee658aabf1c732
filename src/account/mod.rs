//! Sign-in flows for application code.
//!
//! Every function takes the [`ConnectionManager`], acquires the auth handle and then
//! performs one platform call. Failures come back as [`AccountError`]; nothing here
//! panics or retries.

use crate::auth::models::{User, UserCredential};
use crate::auth::provider::GoogleAuthProvider;
use crate::auth::{AuthError, Subscription};
use crate::connection::{ConnectionError, ConnectionManager};
use thiserror::Error;

#[cfg(test)]
mod tests;

#[derive(Error, Debug)]
pub enum AccountError {
    #[error("{0}")]
    Unavailable(#[from] ConnectionError),
    #[error("{message}")]
    Operation {
        message: String,
        code: Option<&'static str>,
    },
    #[error("No confirmation result found")]
    NoChallengeFound,
    #[error("No {0} configured")]
    MissingCapability(&'static str),
}

impl AccountError {
    /// The `auth/...` code of the underlying platform error, when known.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            AccountError::Operation { code, .. } => *code,
            _ => None,
        }
    }
}

impl From<AuthError> for AccountError {
    fn from(err: AuthError) -> Self {
        AccountError::Operation {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// Creates an email/password account and sets its display name.
pub async fn sign_up(
    ctx: &ConnectionManager,
    email: &str,
    password: &str,
    display_name: &str,
) -> Result<UserCredential, AccountError> {
    let auth = ctx.auth().await?;
    let mut credential = auth
        .create_user_with_email_and_password(email, password)
        .await?;
    credential.user = auth.update_profile(Some(display_name), None).await?;
    Ok(credential)
}

pub async fn sign_in(
    ctx: &ConnectionManager,
    email: &str,
    password: &str,
) -> Result<UserCredential, AccountError> {
    let auth = ctx.auth().await?;
    Ok(auth.sign_in_with_email_and_password(email, password).await?)
}

/// Signs in with Google through the configured popup handler.
pub async fn sign_in_with_google(ctx: &ConnectionManager) -> Result<UserCredential, AccountError> {
    let auth = ctx.auth().await?;
    let handler = ctx
        .popup_handler()
        .ok_or(AccountError::MissingCapability("popup handler"))?;
    let provider = GoogleAuthProvider::new();
    Ok(auth.sign_in_with_popup(&provider, handler.as_ref()).await?)
}

pub async fn sign_out(ctx: &ConnectionManager) -> Result<(), AccountError> {
    let auth = ctx.auth().await?;
    Ok(auth.sign_out().await?)
}

pub async fn current_user(ctx: &ConnectionManager) -> Result<Option<User>, AccountError> {
    let auth = ctx.auth().await?;
    Ok(auth.current_user())
}

/// Subscribes `callback` to sign-in and sign-out events. Keep the returned
/// [`Subscription`] alive for as long as events should be delivered.
pub async fn on_auth_state_changed<F>(
    ctx: &ConnectionManager,
    callback: F,
) -> Result<Subscription, AccountError>
where
    F: FnMut(Option<User>) + Send + 'static,
{
    let auth = ctx.auth().await?;
    Ok(auth.on_auth_state_changed(callback))
}

/// Sends a verification code to `phone_number` and remembers the challenge, replacing
/// any challenge sent before.
pub async fn send_phone_challenge(
    ctx: &ConnectionManager,
    phone_number: &str,
) -> Result<(), AccountError> {
    let auth = ctx.auth().await?;
    let provider = ctx
        .bot_check_provider()
        .ok_or(AccountError::MissingCapability("bot-check provider"))?;

    let widget = ctx.bot_check_widget(provider.as_ref()).await?;
    let token = widget.verify().await?;
    let confirmation = auth.send_verification_code(phone_number, &token).await?;

    tracing::debug!("Verification code sent");
    ctx.replace_pending_challenge(confirmation).await;
    Ok(())
}

/// Confirms the pending challenge with the code the user received.
///
/// The challenge is cleared on success. After a wrong code it stays pending so the user
/// can try again.
pub async fn confirm_phone_challenge(
    ctx: &ConnectionManager,
    code: &str,
) -> Result<UserCredential, AccountError> {
    ctx.acquire().await?;
    let confirmation = ctx
        .pending_challenge()
        .await
        .ok_or(AccountError::NoChallengeFound)?;

    let credential = confirmation.confirm(code).await?;
    ctx.consume_pending_challenge(confirmation.verification_id())
        .await;
    Ok(credential)
}
