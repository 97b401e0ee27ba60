//! Credential persistence.
//!
//! The store keeps the transport's opaque credential blob in a directory
//! (`creds.json` inside `auth_state_path`). Purging deletes the whole
//! directory.

use crate::whatsapp::error::{WaError, WaResult};
use crate::whatsapp::types::{AuthState, Credentials};
use async_trait::async_trait;
use log::{debug, info};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// File holding the credential blob inside the auth directory.
pub const CREDS_FILE: &str = "creds.json";

/// Load / save / purge hooks for the transport's credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Restore persisted credentials; a missing store is a fresh login.
    async fn load(&self) -> WaResult<AuthState>;

    async fn save(&self, creds: &Credentials) -> WaResult<()>;

    /// Delete everything; succeeds when nothing is stored.
    async fn purge(&self) -> WaResult<()>;

    /// Where the credentials live, for log and error messages.
    fn location(&self) -> String;
}

/// Multi-file directory store.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn creds_path(&self) -> PathBuf {
        self.dir.join(CREDS_FILE)
    }

    fn io_error(&self, what: &str, e: std::io::Error) -> WaError {
        WaError::credential_io(format!("{} {}", what, self.dir.display())).with_details(e.to_string())
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> WaResult<AuthState> {
        let raw = match tokio::fs::read_to_string(self.creds_path()).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No stored credentials in {}", self.dir.display());
                return Ok(AuthState::default());
            }
            Err(e) => return Err(self.io_error("Failed to read credentials in", e)),
        };

        let value: serde_json::Value = serde_json::from_str(&raw).map_err(|e| {
            WaError::credential_io(format!("Corrupt credentials in {}", self.dir.display()))
                .with_details(e.to_string())
        })?;

        Ok(AuthState {
            creds: Some(Credentials(value)),
        })
    }

    async fn save(&self, creds: &Credentials) -> WaResult<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| self.io_error("Failed to create", e))?;

        let json = serde_json::to_vec_pretty(&creds.0)?;

        // Write-then-rename so a crash never leaves a truncated file.
        let tmp = self.dir.join(format!("{}.tmp", CREDS_FILE));
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| self.io_error("Failed to write credentials in", e))?;
        tokio::fs::rename(&tmp, self.creds_path())
            .await
            .map_err(|e| self.io_error("Failed to replace credentials in", e))?;

        debug!("Saved credentials to {}", self.dir.display());
        Ok(())
    }

    async fn purge(&self) -> WaResult<()> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => {
                info!("Purged credentials at {}", self.dir.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error("Failed to purge", e)),
        }
    }

    fn location(&self) -> String {
        self.dir.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_load_missing_is_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("auth"));
        let state = store.load().await.unwrap();
        assert!(state.is_fresh());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("auth"));
        let creds = Credentials(json!({ "me": { "id": "123@s.whatsapp.net" }, "registered": true }));

        store.save(&creds).await.unwrap();
        let state = store.load().await.unwrap();
        assert_eq!(state.creds, Some(creds));
        assert!(!dir.path().join("auth").join("creds.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_purge_removes_directory_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let auth = dir.path().join("auth");
        let store = FileCredentialStore::new(&auth);
        store.save(&Credentials(json!({}))).await.unwrap();
        assert!(auth.exists());

        store.purge().await.unwrap();
        assert!(!auth.exists());
        store.purge().await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_file_is_credential_io() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CREDS_FILE), "{ not json").unwrap();
        let store = FileCredentialStore::new(dir.path());
        let err = store.load().await.unwrap_err();
        assert_eq!(err.code, crate::WaErrorCode::CredentialIo);
    }

    #[tokio::test]
    async fn test_save_into_file_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        let store = FileCredentialStore::new(blocker.join("auth"));
        let err = store.save(&Credentials(json!({}))).await.unwrap_err();
        assert_eq!(err.code, crate::WaErrorCode::CredentialIo);
    }
}
