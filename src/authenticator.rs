use http::header::{ACCEPT, CONTENT_TYPE};
use http::{Request, Uri};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::form_urlencoded;

use crate::ClientID;
use crate::credential_store::ClientSecret;
use crate::http_client::HttpClient;
use crate::token::{AccessToken, RefreshToken, mask_secret};

mod diagnostics;

pub use diagnostics::ProviderError;

/// Viessmann identity provider token endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://iam.viessmann-climatesolutions.com/idp/v3/token";

#[derive(Error, Debug)]
pub enum AuthenticateError {
    #[error("unable to build request: `{0}`")]
    RequestBuildError(String),
    #[error("unable to deserialize token: `{0}`")]
    DeserializeError(String),
    #[error("identity server error: Status code: `{status}`, Reason: `{error}`")]
    ProviderError { status: u16, error: ProviderError },
    #[error("identity server error: Status code: `{0}`, Reason: `{1}`")]
    HttpResponseError(u16, String),
    #[error("http transport error: `{0}`")]
    HttpTransportError(String),
}

impl AuthenticateError {
    /// The OAuth2 error reported by the provider, if the failure carried one.
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            AuthenticateError::ProviderError { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Human readable explanation, with actionable hints for the known provider error codes.
    pub fn diagnostic(&self) -> String {
        match self {
            AuthenticateError::ProviderError { error, .. } => error.diagnostic(),
            other => other.to_string(),
        }
    }
}

pub trait Authenticator {
    fn authenticate(&self, req: TokenRequest) -> Result<TokenRetrievalResponse, AuthenticateError>;
}

/// The Authenticator is responsible for obtaining tokens from the identity provider token
/// endpoint.
pub struct HttpAuthenticator<C> {
    /// HTTP client
    http_client: C,
    /// Token endpoint URL
    url: Uri,
}

impl<C> HttpAuthenticator<C> {
    pub fn new(http_client: C, url: Uri) -> Self {
        Self { http_client, url }
    }
}

impl<C> Authenticator for HttpAuthenticator<C>
where
    C: HttpClient,
{
    /// Executes a form-encoded POST request to the token endpoint and returns the decoded grant.
    fn authenticate(&self, req: TokenRequest) -> Result<TokenRetrievalResponse, AuthenticateError> {
        debug!(
            grant_type = req.grant.grant_type(),
            client_id = %mask_secret(&req.client_id),
            "requesting token"
        );
        let request = build_request(&req, &self.url)?;

        let response = self
            .http_client
            .send(request)
            .map_err(|e| AuthenticateError::HttpTransportError(e.to_string()))?;

        let body = response.body();

        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Err(match serde_json::from_slice::<ProviderError>(body) {
                Ok(error) => AuthenticateError::ProviderError { status, error },
                Err(_) => AuthenticateError::HttpResponseError(
                    status,
                    String::from_utf8_lossy(body).to_string(),
                ),
            });
        }

        serde_json::from_slice(body).map_err(|e| AuthenticateError::DeserializeError(e.to_string()))
    }
}

fn build_request(req: &TokenRequest, uri: &Uri) -> Result<Request<Vec<u8>>, AuthenticateError> {
    Request::builder()
        .uri(uri)
        .method("POST")
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .header(ACCEPT, "application/json")
        .body(req.to_form().into_bytes())
        .map_err(|e| AuthenticateError::RequestBuildError(e.to_string()))
}

/// Token grants supported by the identity provider.
#[derive(Debug, Clone, PartialEq)]
pub enum Grant {
    ClientCredentials {
        client_secret: ClientSecret,
        scope: Option<String>,
    },
    RefreshToken {
        refresh_token: RefreshToken,
    },
}

impl Grant {
    pub fn grant_type(&self) -> &'static str {
        match self {
            Grant::ClientCredentials { .. } => "client_credentials",
            Grant::RefreshToken { .. } => "refresh_token",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenRequest {
    pub client_id: ClientID,
    pub grant: Grant,
}

impl TokenRequest {
    pub fn client_credentials(
        client_id: ClientID,
        client_secret: ClientSecret,
        scope: Option<String>,
    ) -> Self {
        Self {
            client_id,
            grant: Grant::ClientCredentials {
                client_secret,
                scope,
            },
        }
    }

    pub fn refresh(client_id: ClientID, refresh_token: RefreshToken) -> Self {
        Self {
            client_id,
            grant: Grant::RefreshToken { refresh_token },
        }
    }

    /// Encodes the request as an `application/x-www-form-urlencoded` body.
    pub fn to_form(&self) -> String {
        let mut form = form_urlencoded::Serializer::new(String::new());
        form.append_pair("grant_type", self.grant.grant_type());
        form.append_pair("client_id", &self.client_id);
        match &self.grant {
            Grant::ClientCredentials {
                client_secret,
                scope,
            } => {
                form.append_pair("client_secret", client_secret.expose());
                if let Some(scope) = scope {
                    form.append_pair("scope", scope);
                }
            }
            Grant::RefreshToken { refresh_token } => {
                form.append_pair("refresh_token", refresh_token.as_str());
            }
        }
        form.finish()
    }
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TokenRetrievalResponse {
    pub access_token: AccessToken,
    /// Present when the provider issues or rotates the refresh token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// The lifetime in seconds of the access token.
    pub expires_in: u64,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}
