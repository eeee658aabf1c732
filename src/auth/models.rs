use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::AuthError;

const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Tokens issued by Secure Token for a signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StsTokens {
    pub id_token: String,
    pub refresh_token: String,
    pub expiration_time: DateTime<Utc>,
}

impl StsTokens {
    pub(crate) fn new(id_token: String, refresh_token: String, expires_in: Option<&str>) -> Self {
        // One-hour tokens unless the platform says otherwise. A lifetime that does not
        // fit a timestamp is treated as unspecified.
        let now = Utc::now();
        let expiration_time = expires_in
            .and_then(|s| s.trim().parse::<i64>().ok())
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .unwrap_or_else(|| now + Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECS));
        Self {
            id_token,
            refresh_token,
            expiration_time,
        }
    }

    pub fn expires_within(&self, window: Duration) -> bool {
        match Utc::now().checked_add_signed(window) {
            Some(deadline) => self.expiration_time <= deadline,
            None => true,
        }
    }
}

/// The signed-in identity. Opaque beyond its identifier and profile fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub phone_number: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    pub(crate) sts_token_manager: StsTokens,
}

impl User {
    pub fn id_token(&self) -> &str {
        &self.sts_token_manager.id_token
    }

    pub fn refresh_token(&self) -> &str {
        &self.sts_token_manager.refresh_token
    }

    pub fn token_expiration(&self) -> DateTime<Utc> {
        self.sts_token_manager.expiration_time
    }

    /// Decodes the ID token payload without verifying its signature.
    pub fn id_token_claims(&self) -> Result<IdTokenClaims, AuthError> {
        let payload = self
            .id_token()
            .split('.')
            .nth(1)
            .ok_or_else(|| AuthError::InvalidToken("ID token is not a JWT".to_string()))?;
        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| {
                AuthError::InvalidToken(format!("ID token payload is not base64: {}", e))
            })?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdTokenClaims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    pub auth_time: Option<i64>,
    #[serde(flatten)]
    pub claims: serde_json::Map<String, serde_json::Value>,
}

/// Result of a successful sign-in or sign-up.
#[derive(Debug, Clone)]
pub struct UserCredential {
    pub user: User,
    pub provider_id: Option<String>,
    pub is_new_user: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EmailPasswordRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
    pub return_secure_token: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UpdateProfileRequest<'a> {
    pub id_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<&'a str>,
    pub return_secure_token: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SignInWithIdpRequest {
    pub post_body: String,
    pub request_uri: String,
    pub return_idp_credential: bool,
    pub return_secure_token: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SendVerificationCodeRequest<'a> {
    pub phone_number: &'a str,
    pub recaptcha_token: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SendVerificationCodeResponse {
    pub session_info: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SignInWithPhoneNumberRequest<'a> {
    pub session_info: &'a str,
    pub code: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LookupRequest<'a> {
    pub id_token: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LookupResponse {
    #[serde(default)]
    pub users: Vec<AccountInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AccountInfo {
    pub local_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub phone_number: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
}

/// Response shared by the sign-up, sign-in, profile update and phone endpoints.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SignInResponse {
    pub local_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub phone_number: Option<String>,
    pub email_verified: Option<bool>,
    pub id_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<String>,
    pub is_new_user: Option<bool>,
    pub provider_id: Option<String>,
}

impl SignInResponse {
    /// Builds the user, taking profile fields and tokens the response omits from `previous`.
    pub(crate) fn into_user(self, previous: Option<&User>) -> Result<User, AuthError> {
        let tokens = match (self.id_token, self.refresh_token) {
            (Some(id_token), Some(refresh_token)) => {
                StsTokens::new(id_token, refresh_token, self.expires_in.as_deref())
            }
            _ => previous
                .map(|user| user.sts_token_manager.clone())
                .ok_or_else(|| {
                    AuthError::InvalidToken("response did not include tokens".to_string())
                })?,
        };

        Ok(User {
            uid: self.local_id,
            email: self.email.or_else(|| previous.and_then(|u| u.email.clone())),
            display_name: self
                .display_name
                .or_else(|| previous.and_then(|u| u.display_name.clone())),
            photo_url: self
                .photo_url
                .or_else(|| previous.and_then(|u| u.photo_url.clone())),
            phone_number: self
                .phone_number
                .or_else(|| previous.and_then(|u| u.phone_number.clone())),
            email_verified: self
                .email_verified
                .or_else(|| previous.map(|user| user.email_verified))
                .unwrap_or(false),
            sts_token_manager: tokens,
        })
    }
}

/// Secure Token responses use snake_case field names.
#[derive(Debug, Deserialize)]
pub(crate) struct RefreshTokenResponse {
    pub id_token: String,
    pub refresh_token: String,
    pub expires_in: String,
    pub user_id: String,
}
