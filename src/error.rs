use crate::types::SessionState;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Discovery document could not be fetched or is unusable.
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Returned `state` does not match the pending authorization request.
    #[error("State mismatch: redirect does not belong to the pending authorization request")]
    StateMismatch,

    /// ID token failed signature, issuer, audience or nonce checks.
    #[error("Token validation error: {0}")]
    TokenValidation(String),

    /// Silent refresh did not produce a new session.
    #[error("Silent refresh failed: {0}")]
    RefreshFailure(String),

    #[error("Invalid state transition: cannot {operation} while {from}")]
    InvalidStateTransition {
        operation: &'static str,
        from: SessionState,
    },

    /// Redirect fragment is missing required parameters or is malformed.
    #[error("Invalid redirect fragment: {0}")]
    Fragment(String),

    /// Provider answered the authorization request with an error.
    #[error("Provider error: {error}{}", .description.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    Provider {
        error: String,
        description: Option<String>,
    },

    #[error("Token store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[cfg(feature = "http")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    pub(crate) fn invalid_transition(operation: &'static str, from: SessionState) -> Self {
        Self::InvalidStateTransition { operation, from }
    }

    /// Whether the error is a redirect that does not belong to the pending request.
    #[must_use]
    pub fn is_state_mismatch(&self) -> bool {
        matches!(self, Self::StateMismatch)
    }
}
