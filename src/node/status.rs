use std::fmt;
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use crate::auth_state::AuthState;
use crate::observer::StatusObserver;

/// Longest text shown by a status indicator.
pub const STATUS_TEXT_MAX_LEN: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    Red,
    Green,
    Yellow,
    Grey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Dot,
    Ring,
}

/// What a node displays: a severity colour, a shape and a short text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    pub fill: Fill,
    pub shape: Shape,
    pub text: String,
}

impl NodeStatus {
    pub fn new(fill: Fill, shape: Shape, text: impl Into<String>) -> Self {
        Self {
            fill,
            shape,
            text: text.into(),
        }
    }

    pub fn no_config() -> Self {
        Self::new(Fill::Red, Shape::Dot, "no config")
    }

    pub fn pending(text: &str) -> Self {
        Self::new(Fill::Yellow, Shape::Ring, text)
    }

    pub fn success() -> Self {
        Self::new(Fill::Green, Shape::Dot, "success")
    }

    /// Red status with `text` cut down to [`STATUS_TEXT_MAX_LEN`].
    pub fn error(text: &str) -> Self {
        Self::new(
            Fill::Red,
            Shape::Dot,
            truncate_for_status(text, STATUS_TEXT_MAX_LEN),
        )
    }

    pub fn from_auth_state(state: &AuthState) -> Self {
        match state {
            AuthState::Authenticated => Self::new(Fill::Green, Shape::Dot, "connected"),
            AuthState::Authenticating => Self::pending("authenticating..."),
            AuthState::Error(message) if message.is_empty() => Self::error("auth failed"),
            AuthState::Error(message) => Self::error(message),
            AuthState::Disconnected => Self::new(Fill::Grey, Shape::Ring, "disconnected"),
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?} {:?}] {}", self.fill, self.shape, self.text)
    }
}

/// Cuts `text` to at most `max_len` characters, the last three being `...` when it was cut.
pub fn truncate_for_status(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_len.saturating_sub(3)).collect();
    format!("{kept}...")
}

/// The status a node currently shows. Authentication state changes of the credential the
/// node uses are mirrored as they happen.
#[derive(Debug)]
pub struct StatusIndicator {
    current: Mutex<NodeStatus>,
}

impl StatusIndicator {
    pub fn new(initial: NodeStatus) -> Self {
        Self {
            current: Mutex::new(initial),
        }
    }

    pub fn set(&self, status: NodeStatus) {
        debug!(%status, "node status");
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    pub fn current(&self) -> NodeStatus {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl StatusObserver for StatusIndicator {
    fn on_status_changed(&self, state: &AuthState) {
        self.set(NodeStatus::from_auth_state(state));
    }
}
