//! Token lifecycle manager shared by every consumer of a credential.
//!
//! The manager owns the access/refresh tokens and their expiry, decides when to refresh or
//! re-authenticate, and publishes every authentication state transition to its dependents.
//! The credential mutex is held for the whole duration of a grant, so concurrent callers that
//! find the token near expiry wait for the in-flight refresh instead of issuing their own.
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{TimeDelta, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::auth_state::AuthState;
use crate::authenticator::{AuthenticateError, Authenticator, TokenRequest, TokenRetrievalResponse};
use crate::credential_store::{
    ClientSecret, CredentialStore, CredentialStoreError, PersistedTokens,
};
use crate::observer::{ObserverRegistry, StatusObserver, StatusSource};
use crate::token::{AccessToken, DEFAULT_TOKEN_LIFETIME, RefreshToken, Token, TokenType, mask_secret};
use crate::{ClientID, TokenProvider};

/// Tokens expiring within this window are renewed before being handed out, so they do not
/// expire during the request that follows.
pub const REFRESH_BUFFER: TimeDelta = TimeDelta::minutes(5);

pub const DEFAULT_SCOPE: &str = "IoT User offline_access";

#[derive(Error, Debug)]
pub enum TokenManagerError {
    #[error(
        "No access token configured. Please generate an access token using the PKCE flow or configure a client secret."
    )]
    NoCredential,
    #[error("Access token expired and no refresh token available. Please generate new tokens.")]
    NoRefreshToken,
    #[error("{message}")]
    AuthProvider {
        code: String,
        description: Option<String>,
        message: String,
    },
    #[error("{message}")]
    TokenEndpoint {
        message: String,
        #[source]
        source: AuthenticateError,
    },
    #[error("invalid token response: `{0}`")]
    InvalidTokenResponse(String),
    #[error("loading credentials: `{0}`")]
    CredentialStore(#[from] CredentialStoreError),
    #[error("acquiring credential lock")]
    PoisonError,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthSettings {
    /// Scope requested with the client-credentials grant.
    pub scope: Option<String>,
    pub refresh_buffer: TimeDelta,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            scope: Some(DEFAULT_SCOPE.to_string()),
            refresh_buffer: REFRESH_BUFFER,
        }
    }
}

#[derive(Debug)]
struct Credential {
    client_id: ClientID,
    client_secret: Option<ClientSecret>,
    access: Option<Token>,
    refresh: Option<RefreshToken>,
}

#[derive(Debug, Clone, Copy)]
enum GrantKind {
    ClientCredentials,
    Refresh,
}

pub struct TokenManager<A, S> {
    settings: AuthSettings,
    authenticator: A,
    store: S,
    credential: Mutex<Credential>,
    state: RwLock<AuthState>,
    dependents: ObserverRegistry,
}

impl<A, S> TokenManager<A, S>
where
    A: Authenticator,
    S: CredentialStore,
{
    /// Loads the credential from `store`. A pre-provisioned access token seeds the state to
    /// `Authenticated`; without a persisted expiry it is assumed to live for one hour.
    pub fn try_new(
        settings: AuthSettings,
        authenticator: A,
        store: S,
    ) -> Result<Self, TokenManagerError> {
        let stored = store.load()?;
        let access = stored.access_token.map(|access_token| {
            let expires_at = stored
                .token_expiry
                .unwrap_or_else(|| Utc::now() + DEFAULT_TOKEN_LIFETIME);
            Token::new(access_token, TokenType::Bearer, expires_at)
        });
        let state = if access.is_some() {
            AuthState::Authenticated
        } else {
            AuthState::Disconnected
        };
        debug!(
            client_id = %mask_secret(&stored.client_id),
            client_secret = stored.client_secret.is_some(),
            refresh_token = stored.refresh_token.is_some(),
            %state,
            "loaded credential"
        );

        Ok(Self {
            settings,
            authenticator,
            store,
            credential: Mutex::new(Credential {
                client_id: stored.client_id,
                client_secret: stored.client_secret,
                access,
                refresh: stored.refresh_token,
            }),
            state: RwLock::new(state),
            dependents: ObserverRegistry::new(),
        })
    }

    pub fn auth_state(&self) -> AuthState {
        self.current_state()
    }

    pub fn auth_error(&self) -> Option<String> {
        self.auth_state().error().map(str::to_string)
    }

    pub fn dependent_count(&self) -> usize {
        self.dependents.len()
    }

    /// Establishes a usable access token.
    ///
    /// A token already present (e.g. issued out-of-band by the PKCE flow) is accepted without
    /// any network call. Otherwise the client-credentials grant is used when a client secret is
    /// configured, then the refresh token, and `NoCredential` is returned when neither exists.
    pub fn authenticate(&self) -> Result<(), TokenManagerError> {
        let mut credential = self.lock_credential()?;
        self.authenticate_locked(&mut credential)
    }

    /// Exchanges the refresh token for a new access token. Never falls back to another grant.
    pub fn refresh_access_token(&self) -> Result<(), TokenManagerError> {
        let mut credential = self.lock_credential()?;
        self.refresh_locked(&mut credential)
    }

    pub fn get_valid_token(&self) -> Result<AccessToken, TokenManagerError> {
        let mut credential = self.lock_credential()?;
        let now = Utc::now();
        let expiry = credential.access.as_ref().map(|token| {
            (
                token.needs_refresh(self.settings.refresh_buffer, now),
                token.expires_at(),
            )
        });

        match expiry {
            None => {
                debug!("No access token found, initiating authentication");
                self.authenticate_locked(&mut credential)?;
            }
            Some((true, expires_at)) => {
                debug!(%expires_at, "Token is expired or near expiry, renewing");
                self.renew_locked(&mut credential)?;
            }
            Some((false, expires_at)) => {
                debug!(
                    remaining_ms = (expires_at - now).num_milliseconds(),
                    "Token is still valid, returning existing token"
                );
            }
        }

        current_access_token(&credential).ok_or(TokenManagerError::NoCredential)
    }

    /// Refreshes after the API rejected `rejected`, unless a concurrent caller already replaced
    /// it, in which case the current token is returned as is.
    pub fn refresh_rejected_token(&self, rejected: &str) -> Result<AccessToken, TokenManagerError> {
        let mut credential = self.lock_credential()?;

        if let Some(current) = current_access_token(&credential).filter(|t| t != rejected) {
            debug!("Rejected token was already replaced, reusing the current one");
            return Ok(current);
        }

        self.refresh_locked(&mut credential)?;
        current_access_token(&credential).ok_or(TokenManagerError::NoCredential)
    }

    fn lock_credential(&self) -> Result<MutexGuard<'_, Credential>, TokenManagerError> {
        self.credential
            .lock()
            .map_err(|_| TokenManagerError::PoisonError)
    }

    fn authenticate_locked(&self, credential: &mut Credential) -> Result<(), TokenManagerError> {
        if credential.access.is_some() {
            debug!("Access token is already available");
            if !self.auth_state().is_authenticated() {
                self.begin_authenticating();
                self.update_auth_state(AuthState::Authenticated);
            }
            return Ok(());
        }

        if let Some(client_secret) = credential.client_secret.clone() {
            return self.client_credentials_locked(credential, client_secret);
        }

        if credential.refresh.is_some() {
            debug!("No access token found, using the refresh token");
            return self.refresh_locked(credential);
        }

        self.begin_authenticating();
        Err(self.fail(TokenManagerError::NoCredential))
    }

    /// Refresh when possible, re-authenticate otherwise.
    fn renew_locked(&self, credential: &mut Credential) -> Result<(), TokenManagerError> {
        if credential.refresh.is_some() {
            debug!("Using refresh token for renewal");
            return self.refresh_locked(credential);
        }

        match credential.client_secret.clone() {
            Some(client_secret) => {
                debug!("No refresh token available, requesting a new client-credentials grant");
                self.client_credentials_locked(credential, client_secret)
            }
            None => {
                debug!("No refresh token available, re-authenticating");
                self.authenticate_locked(credential)
            }
        }
    }

    fn refresh_locked(&self, credential: &mut Credential) -> Result<(), TokenManagerError> {
        let Some(refresh_token) = credential.refresh.clone() else {
            debug!("No refresh token available, cannot refresh");
            self.begin_authenticating();
            return Err(self.fail(TokenManagerError::NoRefreshToken));
        };

        debug!(
            refresh_token = %mask_secret(refresh_token.as_str()),
            client_id = %mask_secret(&credential.client_id),
            "Starting token refresh"
        );
        let request = TokenRequest::refresh(credential.client_id.to_owned(), refresh_token);
        self.grant_locked(credential, request, GrantKind::Refresh)?;
        info!("Successfully refreshed access token and updated credentials");
        Ok(())
    }

    fn client_credentials_locked(
        &self,
        credential: &mut Credential,
        client_secret: ClientSecret,
    ) -> Result<(), TokenManagerError> {
        debug!(
            client_id = %mask_secret(&credential.client_id),
            scope = ?self.settings.scope,
            "Starting client-credentials authentication"
        );
        let request = TokenRequest::client_credentials(
            credential.client_id.to_owned(),
            client_secret,
            self.settings.scope.to_owned(),
        );
        self.grant_locked(credential, request, GrantKind::ClientCredentials)?;
        info!("Successfully authenticated with client credentials");
        Ok(())
    }

    fn grant_locked(
        &self,
        credential: &mut Credential,
        request: TokenRequest,
        kind: GrantKind,
    ) -> Result<(), TokenManagerError> {
        self.begin_authenticating();

        let result = self
            .authenticator
            .authenticate(request)
            .map_err(|e| grant_error(kind, e))
            .and_then(|response| self.apply_grant(credential, response));

        match result {
            Ok(()) => {
                self.update_auth_state(AuthState::Authenticated);
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn apply_grant(
        &self,
        credential: &mut Credential,
        response: TokenRetrievalResponse,
    ) -> Result<(), TokenManagerError> {
        let token = Token::from_response(&response, Utc::now())
            .map_err(TokenManagerError::InvalidTokenResponse)?;

        if let Some(rotated) = response.refresh_token {
            debug!(refresh_token = %mask_secret(&rotated), "Provider issued a new refresh token");
            credential.refresh = Some(RefreshToken::from(rotated));
        }
        debug!(
            access_token = %mask_secret(token.access_token()),
            expires_in = response.expires_in,
            expires_at = %token.expires_at(),
            "Stored new access token"
        );
        credential.access = Some(token);

        self.persist(credential);
        Ok(())
    }

    fn persist(&self, credential: &Credential) {
        let Some(token) = &credential.access else {
            return;
        };
        let tokens = PersistedTokens {
            access_token: token.access_token().to_owned(),
            refresh_token: credential.refresh.to_owned(),
            token_expiry: token.expires_at(),
        };
        // In-memory tokens stay valid even if the host store rejects them.
        if let Err(e) = self.store.persist_tokens(&tokens) {
            warn!("Failed to persist refreshed tokens: {e}");
        }
    }
}

impl<A, S> TokenManager<A, S> {
    fn begin_authenticating(&self) {
        if self.current_state() != AuthState::Authenticating {
            self.update_auth_state(AuthState::Authenticating);
        }
    }

    fn fail(&self, err: TokenManagerError) -> TokenManagerError {
        error!("{err}");
        self.update_auth_state(AuthState::Error(err.to_string()));
        err
    }

    fn current_state(&self) -> AuthState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Records the new state and synchronously notifies every dependent before returning.
    fn update_auth_state(&self, next: AuthState) {
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if !state.can_transition_to(&next) {
                warn!("unexpected authentication state transition: {} -> {}", *state, next);
            }
            *state = next.clone();
        }
        debug!(state = %next, "authentication state changed");
        self.dependents.notify(&next);
    }
}

fn current_access_token(credential: &Credential) -> Option<AccessToken> {
    credential
        .access
        .as_ref()
        .map(|token| token.access_token().to_owned())
}

fn grant_error(kind: GrantKind, error: AuthenticateError) -> TokenManagerError {
    let message = match kind {
        GrantKind::Refresh => format!(
            "Token refresh failed: {}. You may need to generate new tokens.",
            error.diagnostic()
        ),
        GrantKind::ClientCredentials => format!("Authentication failed: {}", error.diagnostic()),
    };

    match error.provider_error() {
        Some(provider) => TokenManagerError::AuthProvider {
            code: provider.error.to_owned(),
            description: provider.error_description.to_owned(),
            message,
        },
        None => TokenManagerError::TokenEndpoint {
            message,
            source: error,
        },
    }
}

impl<A, S> TokenProvider for TokenManager<A, S>
where
    A: Authenticator,
    S: CredentialStore,
{
    fn get_valid_token(&self) -> Result<AccessToken, TokenManagerError> {
        TokenManager::get_valid_token(self)
    }

    fn refresh_rejected_token(&self, rejected: &str) -> Result<AccessToken, TokenManagerError> {
        TokenManager::refresh_rejected_token(self, rejected)
    }
}

impl<A, S> StatusSource for TokenManager<A, S>
where
    A: Send + Sync,
    S: Send + Sync,
{
    fn auth_state(&self) -> AuthState {
        self.current_state()
    }

    fn register_dependent(&self, observer: &Arc<dyn StatusObserver>) {
        if self.dependents.register(observer) {
            observer.on_status_changed(&self.current_state());
        }
    }

    fn unregister_dependent(&self, observer: &Arc<dyn StatusObserver>) {
        self.dependents.unregister(observer);
    }
}
