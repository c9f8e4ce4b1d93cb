use std::fs;
use std::path::PathBuf;

use tracing::debug;

use super::{CredentialStore, CredentialStoreError, PersistedTokens, StoredCredentials};

/// Stores the credentials as a JSON document on disk.
///
/// ```json
/// {"clientId": "...", "accessToken": "...", "refreshToken": "...", "tokenExpiry": "..."}
/// ```
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn write(&self, credentials: &StoredCredentials) -> Result<(), CredentialStoreError> {
        let content = serde_json::to_vec_pretty(credentials)
            .map_err(|e| CredentialStoreError::Write(e.to_string()))?;

        // Write next to the target, then rename over it.
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, content).map_err(|e| {
            CredentialStoreError::Write(format!("{}: {e}", tmp_path.display()))
        })?;
        fs::rename(&tmp_path, &self.path)
            .map_err(|e| CredentialStoreError::Write(format!("{}: {e}", self.path.display())))
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<StoredCredentials, CredentialStoreError> {
        let content = fs::read(&self.path)
            .map_err(|e| CredentialStoreError::Read(format!("{}: {e}", self.path.display())))?;
        let credentials: StoredCredentials = serde_json::from_slice(&content)
            .map_err(|e| CredentialStoreError::Invalid(e.to_string()))?;

        if credentials.client_id.trim().is_empty() {
            return Err(CredentialStoreError::Invalid(
                "clientId must not be empty".to_string(),
            ));
        }

        Ok(credentials)
    }

    fn persist_tokens(&self, tokens: &PersistedTokens) -> Result<(), CredentialStoreError> {
        let mut credentials = self.load()?;
        credentials.apply(tokens);
        self.write(&credentials)?;
        debug!(path = %self.path.display(), "persisted rotated tokens");
        Ok(())
    }
}
