//! Where the signed-in user is kept between process restarts.

use super::models::User;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Persistence unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceKind {
    /// Survives process restarts.
    Local,
    /// Lives as long as the process.
    InMemory,
}

#[async_trait]
pub trait Persistence: Send + Sync {
    fn kind(&self) -> PersistenceKind;

    /// Checks that the store can be written to.
    async fn probe(&self) -> Result<(), PersistenceError>;

    async fn load(&self, key: &str) -> Result<Option<User>, PersistenceError>;

    async fn save(&self, key: &str, user: &User) -> Result<(), PersistenceError>;

    async fn remove(&self, key: &str) -> Result<(), PersistenceError>;
}

/// Stores each user as a JSON file under a directory.
#[derive(Debug, Clone)]
pub struct FilePersistence {
    dir: PathBuf,
}

impl FilePersistence {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<local data dir>/firebase-client-sdk`, when the platform has one.
    pub fn default_location() -> Option<Self> {
        dirs::data_local_dir().map(|dir| Self::new(dir.join("firebase-client-sdk")))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", file_name))
    }
}

#[async_trait]
impl Persistence for FilePersistence {
    fn kind(&self) -> PersistenceKind {
        PersistenceKind::Local
    }

    async fn probe(&self) -> Result<(), PersistenceError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let metadata = tokio::fs::metadata(&self.dir).await?;
        if metadata.permissions().readonly() {
            return Err(PersistenceError::Unavailable(format!(
                "{} is read-only",
                self.dir.display()
            )));
        }
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<User>, PersistenceError> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, key: &str, user: &User) -> Result<(), PersistenceError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(user)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    users: Mutex<HashMap<String, User>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Persistence for InMemoryPersistence {
    fn kind(&self) -> PersistenceKind {
        PersistenceKind::InMemory
    }

    async fn probe(&self) -> Result<(), PersistenceError> {
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<User>, PersistenceError> {
        Ok(self.users.lock().await.get(key).cloned())
    }

    async fn save(&self, key: &str, user: &User) -> Result<(), PersistenceError> {
        self.users.lock().await.insert(key.to_string(), user.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        self.users.lock().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::StsTokens;

    fn user() -> User {
        User {
            uid: "uid-1".to_string(),
            email: Some("a@b.com".to_string()),
            display_name: Some("Name".to_string()),
            photo_url: None,
            phone_number: None,
            email_verified: false,
            sts_token_manager: StsTokens::new(
                "id".to_string(),
                "refresh".to_string(),
                Some("3600"),
            ),
        }
    }

    #[tokio::test]
    async fn test_file_persistence_survives_new_instance() {
        let dir = tempfile::tempdir().unwrap();
        let key = "firebase:authUser:key:[DEFAULT]";

        let user = user();

        let store = FilePersistence::new(dir.path());
        store.probe().await.unwrap();
        store.save(key, &user).await.unwrap();

        let reopened = FilePersistence::new(dir.path());
        assert_eq!(reopened.load(key).await.unwrap(), Some(user));

        reopened.remove(key).await.unwrap();
        assert_eq!(store.load(key).await.unwrap(), None);
        // Removing twice is fine.
        reopened.remove(key).await.unwrap();
    }

    #[tokio::test]
    async fn test_file_persistence_probe_fails_on_file_path() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();

        let store = FilePersistence::new(&blocker);
        assert!(store.probe().await.is_err());
    }
}
