use std::fmt;

/// Authentication state of a credential, mirrored by every dependent consumer.
///
/// Allowed transitions:
/// - `Disconnected -> Authenticating`
/// - `Authenticating -> Authenticated | Error`
/// - `Authenticated -> Authenticating`
/// - `Error -> Authenticating`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthState {
    #[default]
    Disconnected,
    Authenticating,
    Authenticated,
    Error(String),
}

impl AuthState {
    pub fn can_transition_to(&self, next: &AuthState) -> bool {
        matches!(
            (self, next),
            (AuthState::Disconnected, AuthState::Authenticating)
                | (AuthState::Authenticating, AuthState::Authenticated)
                | (AuthState::Authenticating, AuthState::Error(_))
                | (AuthState::Authenticated, AuthState::Authenticating)
                | (AuthState::Error(_), AuthState::Authenticating)
        )
    }

    /// The message of the last failure, if the state is `Error`.
    pub fn error(&self) -> Option<&str> {
        match self {
            AuthState::Error(message) => Some(message),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated)
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthState::Disconnected => write!(f, "disconnected"),
            AuthState::Authenticating => write!(f, "authenticating"),
            AuthState::Authenticated => write!(f, "authenticated"),
            AuthState::Error(_) => write!(f, "error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::AuthState::*;
    use super::*;
    use rstest::rstest;

    fn error() -> AuthState {
        Error("boom".to_string())
    }

    #[rstest]
    #[case(Disconnected, Authenticating, true)]
    #[case(Authenticating, Authenticated, true)]
    #[case(Authenticating, error(), true)]
    #[case(Authenticated, Authenticating, true)]
    #[case(error(), Authenticating, true)]
    #[case(Disconnected, Authenticated, false)]
    #[case(Disconnected, error(), false)]
    #[case(Authenticated, error(), false)]
    #[case(Authenticated, Disconnected, false)]
    #[case(error(), Authenticated, false)]
    #[case(Authenticating, Authenticating, false)]
    fn transitions(#[case] from: AuthState, #[case] to: AuthState, #[case] allowed: bool) {
        assert_eq!(from.can_transition_to(&to), allowed);
    }

    #[test]
    fn error_message() {
        assert_eq!(error().error(), Some("boom"));
        assert_eq!(Authenticated.error(), None);
    }
}
