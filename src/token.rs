use std::fmt;
use std::time::Duration;

use crate::authenticator::TokenRetrievalResponse;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

pub type AccessToken = String;

/// Lifetime assumed for pre-provisioned access tokens whose expiry is unknown.
pub const DEFAULT_TOKEN_LIFETIME: TimeDelta = TimeDelta::seconds(3600);

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum TokenType {
    Bearer,
}

impl TryFrom<&str> for TokenType {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "Bearer" | "bearer" => Ok(TokenType::Bearer),
            _ => Err(format!("Invalid token type: {value}")),
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenType::Bearer => write!(f, "Bearer"),
        }
    }
}

/// A bearer access token together with the absolute instant it stops being valid.
#[derive(Serialize, Deserialize, Clone, PartialEq)]
pub struct Token {
    expires_at: DateTime<Utc>,
    access_token: AccessToken,
    token_type: TokenType,
}

impl Token {
    pub fn new(
        access_token: AccessToken,
        token_type: TokenType,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Token {
            access_token,
            token_type,
            expires_at,
        }
    }

    /// Builds a token from the response of a token grant, computing the expiry from `issued_at`.
    pub fn from_response(
        response: &TokenRetrievalResponse,
        issued_at: DateTime<Utc>,
    ) -> Result<Self, String> {
        let token_type = TokenType::try_from(response.token_type.as_str())?;

        // `expires_in` is expressed in seconds
        let time_delta = TimeDelta::from_std(Duration::from_secs(response.expires_in))
            .map_err(|e| e.to_string())?;

        let expires_at = issued_at
            .checked_add_signed(time_delta)
            .ok_or_else(|| "Failed to calculate expiration time".to_string())?;

        Ok(Token::new(
            response.access_token.to_owned(),
            token_type,
            expires_at,
        ))
    }

    /// Whether the token expires within `buffer` from `now`, in which case it should be renewed
    /// before being handed out.
    pub fn needs_refresh(&self, buffer: TimeDelta, now: DateTime<Utc>) -> bool {
        now >= self.expires_at - buffer
    }

    pub fn access_token(&self) -> &AccessToken {
        &self.access_token
    }

    pub fn token_type(&self) -> &TokenType {
        &self.token_type
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &mask_secret(&self.access_token))
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Long-lived token used to mint new access tokens.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefreshToken(String);

impl<S: AsRef<str>> From<S> for RefreshToken {
    fn from(token: S) -> Self {
        RefreshToken(token.as_ref().to_string())
    }
}

impl RefreshToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RefreshToken: {}", mask_secret(&self.0))
    }
}

/// Masks a secret for logging, keeping only its last four characters.
pub fn mask_secret(value: &str) -> String {
    let count = value.chars().count();
    if count <= 4 {
        return "****".to_string();
    }
    let tail: String = value.chars().skip(count - 4).collect();
    format!("****{tail}")
}
