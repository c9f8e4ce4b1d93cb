//! Bearer-authenticated calls against the resource API.
//!
//! Every call asks the token provider for a valid token first. A `401 Unauthorized` answer
//! triggers one refresh and exactly one retry of the same request; any other failure is
//! reported as is.
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderValue, Method, Request, Response, StatusCode};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::TokenProvider;
use crate::authenticator::AuthenticateError;
use crate::http_client::HttpClient;
use crate::token_manager::TokenManagerError;

/// Coarse classification of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Unauthorized,
    NotFound,
    ServerError,
    NetworkError,
    Unknown,
}

#[derive(Error, Debug)]
pub enum RequestError {
    #[error(transparent)]
    Token(#[from] TokenManagerError),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{message}")]
    Resource { status: u16, message: String },
    #[error("{0}")]
    Network(String),
    #[error("invalid request: `{0}`")]
    InvalidRequest(String),
}

impl RequestError {
    pub fn kind(&self) -> FailureKind {
        match self {
            // The token endpoint could not be reached at all.
            RequestError::Token(TokenManagerError::TokenEndpoint {
                source: AuthenticateError::HttpTransportError(_),
                ..
            }) => FailureKind::NetworkError,
            RequestError::Token(_) | RequestError::Unauthorized(_) => FailureKind::Unauthorized,
            RequestError::Resource { status: 404, .. } => FailureKind::NotFound,
            RequestError::Resource { status, .. } if *status >= 500 => FailureKind::ServerError,
            RequestError::Network(_) => FailureKind::NetworkError,
            RequestError::Resource { .. } | RequestError::InvalidRequest(_) => FailureKind::Unknown,
        }
    }
}

pub struct AuthenticatedExecutor<T, C> {
    token_provider: T,
    http_client: C,
}

impl<T, C> AuthenticatedExecutor<T, C>
where
    T: TokenProvider,
    C: HttpClient,
{
    pub fn new(token_provider: T, http_client: C) -> Self {
        Self {
            token_provider,
            http_client,
        }
    }

    pub fn execute_get(&self, url: &Url) -> Result<Value, RequestError> {
        self.execute(Method::GET, url, None)
    }

    /// Posts `body` as JSON. An empty success body yields `Value::Null`.
    pub fn execute_post(&self, url: &Url, body: &Value) -> Result<Value, RequestError> {
        let body =
            serde_json::to_vec(body).map_err(|e| RequestError::InvalidRequest(e.to_string()))?;
        self.execute(Method::POST, url, Some(body))
    }

    fn execute(
        &self,
        method: Method,
        url: &Url,
        body: Option<Vec<u8>>,
    ) -> Result<Value, RequestError> {
        let token = self.token_provider.get_valid_token()?;

        let response = self.send(&method, url, body.clone(), &token)?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return into_payload(response);
        }

        let rejected = failure_message(&response);
        warn!(%method, %url, "Request unauthorized, refreshing the access token");

        let token = match self.token_provider.refresh_rejected_token(&token) {
            Ok(token) => token,
            Err(e) => {
                debug!("Token refresh after 401 failed: {e}");
                return Err(RequestError::Unauthorized(rejected));
            }
        };

        debug!(%method, %url, "Retrying request with the refreshed token");
        let retry = self.send(&method, url, body, &token)?;
        into_payload(retry)
    }

    fn send(
        &self,
        method: &Method,
        url: &Url,
        body: Option<Vec<u8>>,
        token: &str,
    ) -> Result<Response<Vec<u8>>, RequestError> {
        let request = build_request(method, url, body, token)?;
        self.http_client
            .send(request)
            .map_err(|e| RequestError::Network(e.to_string()))
    }
}

fn build_request(
    method: &Method,
    url: &Url,
    body: Option<Vec<u8>>,
    token: &str,
) -> Result<Request<Vec<u8>>, RequestError> {
    let mut authorization = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|e| RequestError::InvalidRequest(e.to_string()))?;
    authorization.set_sensitive(true);

    let mut builder = Request::builder()
        .method(method.clone())
        .uri(url.as_str())
        .header(AUTHORIZATION, authorization)
        .header(ACCEPT, "application/json");
    if body.is_some() {
        builder = builder.header(CONTENT_TYPE, "application/json");
    }

    builder
        .body(body.unwrap_or_default())
        .map_err(|e| RequestError::InvalidRequest(e.to_string()))
}

fn into_payload(response: Response<Vec<u8>>) -> Result<Value, RequestError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(RequestError::Unauthorized(failure_message(&response)));
    }
    if !status.is_success() {
        return Err(RequestError::Resource {
            status: status.as_u16(),
            message: failure_message(&response),
        });
    }

    let body = response.body();
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned())))
}

/// `error` and its description (or `message`) from the body, else a generic status text.
fn failure_message(response: &Response<Vec<u8>>) -> String {
    let body = serde_json::from_slice::<Value>(response.body()).unwrap_or(Value::Null);
    let field = |name: &str| body.get(name).and_then(Value::as_str);
    let detail = field("error_description").or_else(|| field("message"));

    match (field("error"), detail) {
        (Some(error), Some(detail)) => format!("{error}: {detail}"),
        (Some(message), None) | (None, Some(message)) => message.to_string(),
        (None, None) => format!(
            "Request failed with status code {}",
            response.status().as_u16()
        ),
    }
}
