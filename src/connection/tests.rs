use super::*;
use crate::auth::models::{StsTokens, User};
use crate::core::diagnostics::MemorySink;
use crate::core::environment::SwitchableEnvironment;
use std::sync::atomic::{AtomicUsize, Ordering};

struct CountingConnector {
    calls: AtomicUsize,
    failures: usize,
}

impl CountingConnector {
    fn failing_first(failures: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failures,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Connector for CountingConnector {
    fn connect(&self, config: &FirebaseConfig) -> anyhow::Result<FirebaseApp> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            anyhow::bail!("platform not ready");
        }
        FirebaseApp::new(config.clone())
    }
}

fn test_config() -> FirebaseConfig {
    FirebaseConfig {
        api_key: "test-api-key".to_string(),
        project_id: "test-project".to_string(),
        database_url: "https://test-project-default-rtdb.firebaseio.com".to_string(),
        ..Default::default()
    }
}

fn client_env() -> Arc<dyn ExecutionEnvironment> {
    Arc::new(Environment::Client)
}

fn manager(config: FirebaseConfig, sink: Arc<MemorySink>) -> ConnectionManager {
    ConnectionManager::builder(config)
        .environment(client_env())
        .diagnostics(sink)
        .persistence(Arc::new(InMemoryPersistence::new()))
        .build()
}

#[tokio::test]
async fn test_acquire_is_idempotent() {
    let connector = Arc::new(CountingConnector::failing_first(0));
    let manager = ConnectionManager::builder(test_config())
        .environment(client_env())
        .connector(connector.clone())
        .persistence(Arc::new(InMemoryPersistence::new()))
        .build();
    assert_eq!(manager.state(), ConnectionState::Uninitialized);

    let first = manager.acquire().await.unwrap();
    let second = manager.acquire().await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(connector.calls(), 1);
    assert_eq!(manager.state(), ConnectionState::Ready);
    assert_eq!(first.name(), crate::DEFAULT_APP_NAME);
}

#[tokio::test]
async fn test_concurrent_first_acquire_builds_once() {
    let connector = Arc::new(CountingConnector::failing_first(0));
    let manager = ConnectionManager::builder(test_config())
        .environment(client_env())
        .connector(connector.clone())
        .persistence(Arc::new(InMemoryPersistence::new()))
        .build();

    let (a, b) = tokio::join!(manager.acquire(), manager.acquire());

    assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
    assert_eq!(connector.calls(), 1);
}

#[tokio::test]
async fn test_construction_failure_is_reported_and_retried() {
    let sink = Arc::new(MemorySink::new());
    let connector = Arc::new(CountingConnector::failing_first(1));
    let manager = ConnectionManager::builder(test_config())
        .environment(client_env())
        .connector(connector.clone())
        .diagnostics(sink.clone())
        .persistence(Arc::new(InMemoryPersistence::new()))
        .build();

    let err = manager.acquire().await.unwrap_err();
    assert_eq!(
        err,
        ConnectionError::ConstructionFailure("platform not ready".to_string())
    );
    assert_eq!(manager.state(), ConnectionState::Unavailable);
    assert_eq!(
        sink.events(),
        vec![Diagnostic::ConstructionFailure {
            message: "Firebase app initialization failed: platform not ready".to_string()
        }]
    );

    manager.acquire().await.unwrap();
    assert_eq!(connector.calls(), 2);
    assert_eq!(manager.state(), ConnectionState::Ready);
}

#[tokio::test]
async fn test_non_client_environment_is_unavailable_until_it_changes() {
    let environment = Arc::new(SwitchableEnvironment::new(false));
    let connector = Arc::new(CountingConnector::failing_first(0));
    let manager = ConnectionManager::builder(test_config())
        .environment(environment.clone())
        .connector(connector.clone())
        .diagnostics(Arc::new(MemorySink::new()))
        .persistence(Arc::new(InMemoryPersistence::new()))
        .build();

    assert_eq!(
        manager.acquire().await.unwrap_err(),
        ConnectionError::EnvironmentUnavailable
    );
    assert_eq!(
        manager.auth().await.unwrap_err(),
        ConnectionError::EnvironmentUnavailable
    );
    assert_eq!(manager.state(), ConnectionState::Unavailable);
    assert_eq!(connector.calls(), 0);

    environment.set_client(true);
    manager.auth().await.unwrap();
    assert_eq!(manager.state(), ConnectionState::Ready);
}

#[tokio::test]
async fn test_incomplete_config_never_connects() {
    let sink = Arc::new(MemorySink::new());
    let connector = Arc::new(CountingConnector::failing_first(0));
    let config = FirebaseConfig {
        api_key: String::new(),
        ..test_config()
    };
    let manager = ConnectionManager::builder(config)
        .environment(client_env())
        .connector(connector.clone())
        .diagnostics(sink.clone())
        .build();

    let err = manager.acquire().await.unwrap_err();
    assert_eq!(
        err,
        ConnectionError::ConfigurationIncomplete {
            missing: vec!["apiKey"]
        }
    );
    assert_eq!(err.to_string(), "Firebase config is incomplete, missing: apiKey");
    assert_eq!(connector.calls(), 0);
    assert_eq!(
        sink.events(),
        vec![Diagnostic::ConfigurationIncomplete {
            missing: vec!["apiKey"]
        }]
    );
}

#[tokio::test]
async fn test_service_failure_is_isolated() {
    let sink = Arc::new(MemorySink::new());
    let config = FirebaseConfig {
        database_url: "not a url".to_string(),
        ..test_config()
    };
    let manager = manager(config, sink.clone());

    let err = manager.database().await.unwrap_err();
    assert!(matches!(
        err,
        ConnectionError::PartialFailure {
            service: Service::Database,
            ..
        }
    ));
    assert_eq!(manager.state(), ConnectionState::Degraded);

    let auth = manager.auth().await.unwrap();
    let firestore = manager.firestore().await.unwrap();
    assert!(Arc::ptr_eq(&auth, &manager.auth().await.unwrap()));
    assert!(Arc::ptr_eq(&firestore, &manager.firestore().await.unwrap()));
    assert_eq!(manager.state(), ConnectionState::Degraded);

    // Asking again retries and fails again, still without touching the others.
    assert!(manager.database().await.is_err());
    let failures = sink
        .events()
        .into_iter()
        .filter(|e| matches!(e, Diagnostic::ServiceFailure { service: Service::Database, .. }))
        .count();
    assert_eq!(failures, 2);
}

#[tokio::test]
async fn test_persistence_failure_does_not_block_auth() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"x").unwrap();

    let sink = Arc::new(MemorySink::new());
    let manager = ConnectionManager::builder(test_config())
        .environment(client_env())
        .diagnostics(sink.clone())
        .persistence(Arc::new(FilePersistence::new(&blocker)))
        .build();

    let auth = manager.auth().await.unwrap();
    assert!(auth.current_user().is_none());
    assert_eq!(manager.state(), ConnectionState::Ready);
    assert!(sink
        .events()
        .iter()
        .any(|e| matches!(e, Diagnostic::PersistenceFailure { .. })));
}

#[tokio::test]
async fn test_persisted_user_is_restored() {
    let store = Arc::new(InMemoryPersistence::new());
    let user = User {
        uid: "persisted-uid".to_string(),
        email: Some("a@b.com".to_string()),
        display_name: Some("Name".to_string()),
        photo_url: None,
        phone_number: None,
        email_verified: true,
        sts_token_manager: StsTokens::new("id".to_string(), "refresh".to_string(), None),
    };
    store
        .save("firebase:authUser:test-api-key:[DEFAULT]", &user)
        .await
        .unwrap();

    let manager = ConnectionManager::builder(test_config())
        .environment(client_env())
        .persistence(store)
        .build();

    let auth = manager.auth().await.unwrap();
    assert_eq!(auth.current_user(), Some(user));
    assert_eq!(
        auth.persistence_kind(),
        crate::auth::persistence::PersistenceKind::InMemory
    );
}
