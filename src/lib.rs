pub mod api;
pub mod auth_state;
pub mod authenticator;
pub mod credential_store;
pub mod executor;
pub mod http;
pub mod http_client;
pub mod node;
pub mod observer;
pub mod parameters;
pub mod token;
pub mod token_manager;

use crate::token::AccessToken;
use crate::token_manager::TokenManagerError;
use std::sync::Arc;

pub type ClientID = String;

/// A source of bearer tokens for authenticated API calls.
///
/// Implemented by [`token_manager::TokenManager`], the only component allowed to mutate the
/// shared credential. Everything else only sees the materialized token string.
pub trait TokenProvider {
    /// Returns a token that is valid for at least the refresh buffer, refreshing or
    /// authenticating first when needed.
    fn get_valid_token(&self) -> Result<AccessToken, TokenManagerError>;

    /// Called after the API rejected `rejected` with a 401. Returns a freshly minted token.
    fn refresh_rejected_token(&self, rejected: &str) -> Result<AccessToken, TokenManagerError>;
}

impl<T: TokenProvider + ?Sized> TokenProvider for Arc<T> {
    fn get_valid_token(&self) -> Result<AccessToken, TokenManagerError> {
        (**self).get_valid_token()
    }

    fn refresh_rejected_token(&self, rejected: &str) -> Result<AccessToken, TokenManagerError> {
        (**self).refresh_rejected_token(rejected)
    }
}
