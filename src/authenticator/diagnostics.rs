use std::fmt;

use serde::{Deserialize, Serialize};

/// OAuth2 error body returned by the token endpoint: `{error, error_description}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderError {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl ProviderError {
    pub fn new(error: impl Into<String>, error_description: Option<String>) -> Self {
        Self {
            error: error.into(),
            error_description,
        }
    }

    pub fn description(&self) -> &str {
        self.error_description.as_deref().unwrap_or(&self.error)
    }

    /// Builds a message naming the provider description and code, followed by what the user
    /// can do about it when the code is a known one.
    pub fn diagnostic(&self) -> String {
        let summary = format!("{} ({})", self.description(), self.error);
        match hint(&self.error) {
            Some(hint) => format!("{summary}. {hint}"),
            None => summary,
        }
    }
}

fn hint(code: &str) -> Option<&'static str> {
    match code {
        "invalid_client" => Some(
            "Check that the Client ID and Client Secret match the client registered in the Viessmann Developer Portal",
        ),
        "invalid_scope" => Some(
            "Check the configured scope against the scopes enabled for this client in the Viessmann Developer Portal (e.g. 'IoT User offline_access')",
        ),
        "unauthorized_client" => Some(
            "The client is not allowed to use this grant: verify the redirect URIs registered for the client and that the user gave consent",
        ),
        "invalid_grant" => Some(
            "The refresh token is expired or has been revoked, generate new tokens",
        ),
        _ => None,
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.diagnostic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::invalid_client(
        "invalid_client",
        "Invalid client credentials",
        &["Invalid client credentials", "invalid_client", "Client Secret", "Developer Portal"]
    )]
    #[case::invalid_scope("invalid_scope", "Invalid scope", &["Invalid scope", "invalid_scope", "Developer Portal"])]
    #[case::unauthorized_client(
        "unauthorized_client",
        "Unauthorized client",
        &["Unauthorized client", "redirect URIs", "consent"]
    )]
    #[case::invalid_grant("invalid_grant", "Invalid refresh token", &["Invalid refresh token", "generate new tokens"])]
    #[case::unknown_code("server_error", "Try later", &["Try later (server_error)"])]
    fn actionable_diagnostics(
        #[case] code: &str,
        #[case] description: &str,
        #[case] expected_fragments: &[&str],
    ) {
        let diagnostic = ProviderError::new(code, Some(description.to_string())).diagnostic();

        for fragment in expected_fragments {
            assert!(
                diagnostic.contains(fragment),
                "`{diagnostic}` should contain `{fragment}`"
            );
        }
    }

    #[test]
    fn description_falls_back_to_code() {
        let error: ProviderError = serde_json::from_str(r#"{"error":"invalid_request"}"#).unwrap();
        assert_eq!(error.description(), "invalid_request");
        assert_eq!(error.diagnostic(), "invalid_request (invalid_request)");
    }
}
