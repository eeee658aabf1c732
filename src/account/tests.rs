use super::*;
use crate::auth::persistence::InMemoryPersistence;
use crate::auth::phone::{BotCheckProvider, BotCheckWidget, WidgetSize};
use crate::auth::provider::{FederatedAssertion, FederatedRequest, PopupHandler};
use crate::config::{Endpoints, FirebaseConfig};
use crate::core::diagnostics::MemorySink;
use crate::core::environment::Environment;
use async_trait::async_trait;
use httpmock::prelude::*;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

struct StaticWidget;

#[async_trait]
impl BotCheckWidget for StaticWidget {
    async fn verify(&self) -> Result<String, AuthError> {
        Ok("bot-token".to_string())
    }
}

#[derive(Default)]
struct CountingBotCheck {
    renders: AtomicUsize,
    anchors: Mutex<Vec<(String, WidgetSize)>>,
}

#[async_trait]
impl BotCheckProvider for CountingBotCheck {
    async fn render(
        &self,
        anchor_id: &str,
        size: WidgetSize,
    ) -> Result<Arc<dyn BotCheckWidget>, AuthError> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut anchors) = self.anchors.lock() {
            anchors.push((anchor_id.to_string(), size));
        }
        Ok(Arc::new(StaticWidget))
    }
}

struct StubPopup;

#[async_trait]
impl PopupHandler for StubPopup {
    async fn open(&self, request: &FederatedRequest) -> Result<FederatedAssertion, AuthError> {
        assert_eq!(request.provider_id, "google.com");
        Ok(FederatedAssertion {
            provider_id: request.provider_id.clone(),
            id_token: Some("google-id-token".to_string()),
            ..Default::default()
        })
    }
}

fn config_for(server: &MockServer) -> FirebaseConfig {
    FirebaseConfig {
        api_key: "test-api-key".to_string(),
        project_id: "test-project".to_string(),
        database_url: server.base_url(),
        endpoints: Endpoints {
            identity_toolkit: server.url("/identitytoolkit/v1"),
            secure_token: server.url("/securetoken/v1"),
            firestore: server.url("/v1"),
        },
        ..Default::default()
    }
}

fn manager_for(server: &MockServer) -> ConnectionManager {
    ConnectionManager::builder(config_for(server))
        .environment(Arc::new(Environment::Client))
        .diagnostics(Arc::new(MemorySink::new()))
        .persistence(Arc::new(InMemoryPersistence::new()))
        .build()
}

fn signed_in_body(uid: &str) -> serde_json::Value {
    json!({
        "localId": uid,
        "idToken": format!("{}-id-token", uid),
        "refreshToken": format!("{}-refresh-token", uid),
        "expiresIn": "3600"
    })
}

#[tokio::test]
async fn test_sign_up_sets_display_name() {
    let server = MockServer::start();
    let manager = manager_for(&server);

    let sign_up_mock = server.mock(|when, then| {
        when.method(POST)
            .path("/identitytoolkit/v1/accounts:signUp")
            .query_param("key", "test-api-key")
            .json_body(json!({
                "email": "a@b.com",
                "password": "pw123456",
                "returnSecureToken": true
            }));
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({
                "localId": "uid-1",
                "email": "a@b.com",
                "idToken": "id-token",
                "refreshToken": "refresh-token",
                "expiresIn": "3600"
            }));
    });
    let update = server.mock(|when, then| {
        when.method(POST)
            .path("/identitytoolkit/v1/accounts:update")
            .json_body(json!({
                "idToken": "id-token",
                "displayName": "Name",
                "returnSecureToken": true
            }));
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({ "localId": "uid-1", "email": "a@b.com", "displayName": "Name" }));
    });

    let credential = sign_up(&manager, "a@b.com", "pw123456", "Name")
        .await
        .unwrap();

    assert!(credential.is_new_user);
    assert_eq!(credential.user.display_name.as_deref(), Some("Name"));
    let current = current_user(&manager).await.unwrap().unwrap();
    assert_eq!(current.display_name.as_deref(), Some("Name"));

    sign_up_mock.assert();
    update.assert();
}

#[tokio::test]
async fn test_sign_in_rejection_carries_platform_message() {
    let server = MockServer::start();
    let manager = manager_for(&server);

    server.mock(|when, then| {
        when.method(POST)
            .path("/identitytoolkit/v1/accounts:signInWithPassword");
        then.status(400)
            .header("content-type", "application/json")
            .json_body(json!({
                "error": { "code": 400, "message": "INVALID_LOGIN_CREDENTIALS", "errors": [] }
            }));
    });

    let err = sign_in(&manager, "a@b.com", "wrong").await.unwrap_err();
    assert!(matches!(err, AccountError::Operation { .. }));
    assert!(err.to_string().contains("INVALID_LOGIN_CREDENTIALS"));
    assert_eq!(err.code(), Some("auth/invalid-credential"));
    assert!(current_user(&manager).await.unwrap().is_none());
}

#[tokio::test]
async fn test_sign_out_clears_user() {
    let server = MockServer::start();
    let manager = manager_for(&server);

    server.mock(|when, then| {
        when.method(POST)
            .path("/identitytoolkit/v1/accounts:signInWithPassword");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(signed_in_body("uid-1"));
    });

    sign_in(&manager, "a@b.com", "pw").await.unwrap();
    assert!(current_user(&manager).await.unwrap().is_some());

    sign_out(&manager).await.unwrap();
    assert!(current_user(&manager).await.unwrap().is_none());
}

#[tokio::test]
async fn test_confirm_without_challenge_makes_no_request() {
    let server = MockServer::start();
    let manager = manager_for(&server);
    let any = server.mock(|when, then| {
        when.any_request();
        then.status(500);
    });

    let err = confirm_phone_challenge(&manager, "123456")
        .await
        .unwrap_err();
    assert!(matches!(err, AccountError::NoChallengeFound));
    assert_eq!(err.to_string(), "No confirmation result found");

    any.assert_calls(0);
}

#[tokio::test]
async fn test_phone_challenge_is_replaced_and_kept_after_wrong_code() {
    let server = MockServer::start();
    let bot_check = Arc::new(CountingBotCheck::default());
    let manager = ConnectionManager::builder(config_for(&server))
        .environment(Arc::new(Environment::Client))
        .persistence(Arc::new(InMemoryPersistence::new()))
        .bot_check(bot_check.clone())
        .build();

    let send_first = server.mock(|when, then| {
        when.method(POST)
            .path("/identitytoolkit/v1/accounts:sendVerificationCode")
            .json_body(json!({ "phoneNumber": "+15555550100", "recaptchaToken": "bot-token" }));
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({ "sessionInfo": "session-1" }));
    });

    send_phone_challenge(&manager, "+15555550100").await.unwrap();
    assert!(manager.has_pending_challenge().await);
    send_first.assert();

    let send_second = server.mock(|when, then| {
        when.method(POST)
            .path("/identitytoolkit/v1/accounts:sendVerificationCode")
            .json_body(json!({ "phoneNumber": "+15555550199", "recaptchaToken": "bot-token" }));
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({ "sessionInfo": "session-2" }));
    });
    send_phone_challenge(&manager, "+15555550199").await.unwrap();
    send_second.assert();

    let wrong = server.mock(|when, then| {
        when.method(POST)
            .path("/identitytoolkit/v1/accounts:signInWithPhoneNumber")
            .json_body(json!({ "sessionInfo": "session-2", "code": "111111" }));
        then.status(400)
            .header("content-type", "application/json")
            .json_body(json!({ "error": { "code": 400, "message": "INVALID_CODE" } }));
    });
    let right = server.mock(|when, then| {
        when.method(POST)
            .path("/identitytoolkit/v1/accounts:signInWithPhoneNumber")
            .json_body(json!({ "sessionInfo": "session-2", "code": "222222" }));
        then.status(200)
            .header("content-type", "application/json")
            .json_body(signed_in_body("phone-uid"));
    });

    let err = confirm_phone_challenge(&manager, "111111")
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("auth/invalid-verification-code"));
    assert!(manager.has_pending_challenge().await);

    let credential = confirm_phone_challenge(&manager, "222222").await.unwrap();
    assert_eq!(credential.user.uid, "phone-uid");
    assert!(!manager.has_pending_challenge().await);

    wrong.assert();
    right.assert();
    assert_eq!(bot_check.renders.load(Ordering::SeqCst), 1);
    assert_eq!(
        bot_check.anchors.lock().unwrap().clone(),
        vec![("recaptcha-container".to_string(), WidgetSize::Invisible)]
    );
}

#[tokio::test]
async fn test_missing_capabilities_are_reported() {
    let server = MockServer::start();
    let manager = manager_for(&server);

    let err = sign_in_with_google(&manager).await.unwrap_err();
    assert!(matches!(err, AccountError::MissingCapability("popup handler")));

    let err = send_phone_challenge(&manager, "+15555550100")
        .await
        .unwrap_err();
    assert!(matches!(err, AccountError::MissingCapability("bot-check provider")));
}

#[tokio::test]
async fn test_sign_in_with_google_uses_popup_assertion() {
    let server = MockServer::start();
    let manager = ConnectionManager::builder(config_for(&server))
        .environment(Arc::new(Environment::Client))
        .persistence(Arc::new(InMemoryPersistence::new()))
        .popup_handler(Arc::new(StubPopup))
        .build();

    let idp = server.mock(|when, then| {
        when.method(POST)
            .path("/identitytoolkit/v1/accounts:signInWithIdp")
            .query_param("key", "test-api-key")
            .json_body(json!({
                "postBody": "id_token=google-id-token&providerId=google.com",
                "requestUri": "http://localhost",
                "returnIdpCredential": true,
                "returnSecureToken": true
            }));
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({
                "providerId": "google.com",
                "localId": "google-uid",
                "email": "g@example.com",
                "idToken": "id-token",
                "refreshToken": "refresh-token",
                "expiresIn": "3600"
            }));
    });

    let credential = sign_in_with_google(&manager).await.unwrap();
    assert_eq!(credential.provider_id.as_deref(), Some("google.com"));
    assert_eq!(credential.user.email.as_deref(), Some("g@example.com"));

    idp.assert();
}

#[tokio::test]
async fn test_operations_fail_outside_client_environment() {
    let server = MockServer::start();
    let manager = ConnectionManager::builder(config_for(&server))
        .environment(Arc::new(Environment::Prerender))
        .diagnostics(Arc::new(MemorySink::new()))
        .persistence(Arc::new(InMemoryPersistence::new()))
        .build();
    let any = server.mock(|when, then| {
        when.any_request();
        then.status(500);
    });

    let unavailable = |err: AccountError| {
        matches!(
            err,
            AccountError::Unavailable(ConnectionError::EnvironmentUnavailable)
        )
    };

    assert!(unavailable(sign_in(&manager, "a@b.com", "pw").await.unwrap_err()));
    assert!(unavailable(sign_up(&manager, "a@b.com", "pw", "Name").await.unwrap_err()));
    assert!(unavailable(sign_out(&manager).await.unwrap_err()));
    assert!(unavailable(current_user(&manager).await.unwrap_err()));
    assert!(unavailable(confirm_phone_challenge(&manager, "1").await.unwrap_err()));
    assert!(unavailable(
        on_auth_state_changed(&manager, |_| {}).await.unwrap_err()
    ));

    any.assert_calls(0);
}

#[tokio::test]
async fn test_auth_state_listener_through_manager() {
    let server = MockServer::start();
    let manager = manager_for(&server);

    server.mock(|when, then| {
        when.method(POST)
            .path("/identitytoolkit/v1/accounts:signInWithPassword");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(signed_in_body("uid-1"));
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = on_auth_state_changed(&manager, move |user| {
        let _ = tx.send(user.map(|u| u.uid));
    })
    .await
    .unwrap();

    let wait = Duration::from_secs(5);
    assert_eq!(timeout(wait, rx.recv()).await.unwrap(), Some(None));

    sign_in(&manager, "a@b.com", "pw").await.unwrap();
    assert_eq!(
        timeout(wait, rx.recv()).await.unwrap(),
        Some(Some("uid-1".to_string()))
    );
}

#[tokio::test]
async fn test_sign_in_with_out_of_range_lifetime_does_not_fail() {
    let server = MockServer::start();
    let manager = manager_for(&server);

    server.mock(|when, then| {
        when.method(POST)
            .path("/identitytoolkit/v1/accounts:signInWithPassword");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({
                "localId": "uid-1",
                "idToken": "id-token",
                "refreshToken": "refresh-token",
                "expiresIn": "99999999999999999"
            }));
    });

    let credential = sign_in(&manager, "a@b.com", "pw").await.unwrap();
    assert_eq!(credential.user.uid, "uid-1");
    assert!(credential.user.token_expiration() > chrono::Utc::now());
}
