//! Persisted credentials owned by the host.
//!
//! The token manager reads the credential once at construction and writes rotated tokens back
//! after every successful grant so that a restart picks them up.
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ClientID;
use crate::token::{AccessToken, RefreshToken};

mod file;

pub use file::FileCredentialStore;

#[derive(Error, Debug)]
pub enum CredentialStoreError {
    #[error("reading credentials: `{0}`")]
    Read(String),
    #[error("writing credentials: `{0}`")]
    Write(String),
    #[error("invalid credentials: `{0}`")]
    Invalid(String),
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientSecret(String);

impl<S: AsRef<str>> From<S> for ClientSecret {
    fn from(secret: S) -> Self {
        ClientSecret(secret.as_ref().to_string())
    }
}

impl ClientSecret {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ClientSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientSecret: redacted")
    }
}

/// Credentials as persisted by the host credential store.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCredentials {
    pub client_id: ClientID,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<ClientSecret>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<AccessToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<RefreshToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_expiry: Option<DateTime<Utc>>,
}

/// Tokens written back after a successful grant.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedTokens {
    pub access_token: AccessToken,
    pub refresh_token: Option<RefreshToken>,
    pub token_expiry: DateTime<Utc>,
}

pub trait CredentialStore {
    fn load(&self) -> Result<StoredCredentials, CredentialStoreError>;

    fn persist_tokens(&self, tokens: &PersistedTokens) -> Result<(), CredentialStoreError>;
}

impl<T: CredentialStore + ?Sized> CredentialStore for Arc<T> {
    fn load(&self) -> Result<StoredCredentials, CredentialStoreError> {
        (**self).load()
    }

    fn persist_tokens(&self, tokens: &PersistedTokens) -> Result<(), CredentialStoreError> {
        (**self).persist_tokens(tokens)
    }
}

/// Keeps the credentials in memory only; rotated tokens are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credentials: Mutex<StoredCredentials>,
}

impl MemoryCredentialStore {
    pub fn new(credentials: StoredCredentials) -> Self {
        Self {
            credentials: Mutex::new(credentials),
        }
    }

    pub fn snapshot(&self) -> Result<StoredCredentials, CredentialStoreError> {
        self.load()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<StoredCredentials, CredentialStoreError> {
        self.credentials
            .lock()
            .map(|c| c.clone())
            .map_err(|e| CredentialStoreError::Read(e.to_string()))
    }

    fn persist_tokens(&self, tokens: &PersistedTokens) -> Result<(), CredentialStoreError> {
        let mut credentials = self
            .credentials
            .lock()
            .map_err(|e| CredentialStoreError::Write(e.to_string()))?;
        credentials.apply(tokens);
        Ok(())
    }
}

impl StoredCredentials {
    /// Overwrites the token fields, keeping the previous refresh token when none was issued.
    pub fn apply(&mut self, tokens: &PersistedTokens) {
        self.access_token = Some(tokens.access_token.to_owned());
        if let Some(refresh_token) = &tokens.refresh_token {
            self.refresh_token = Some(refresh_token.to_owned());
        }
        self.token_expiry = Some(tokens.token_expiry);
    }
}
