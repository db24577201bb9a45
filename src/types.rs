use derive_more::{Display, From, FromStr, Into};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use ulid::Ulid;

/// Lifecycle state of the single session owned by a
/// [`SessionManager`](crate::SessionManager).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Unauthenticated,
    /// Redirected to the provider, waiting for the fragment to come back.
    Authenticating,
    Authenticated,
    /// Silent refresh in flight. Prior tokens stay readable.
    Refreshing,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::Refreshing => "refreshing",
        })
    }
}

/// Identifier of one authorization attempt.
///
/// A new one is minted for every `login()` and every silent refresh, so a
/// late result can be told apart from the attempt currently pending.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, FromStr, From, Into,
)]
#[serde(transparent)]
pub struct RequestId(pub Ulid);

impl RequestId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// OAuth2 `state` parameter (CSRF correlation token).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct StateToken(pub String);

impl StateToken {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// OIDC `nonce` parameter, echoed back inside the ID token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct Nonce(pub String);

impl Nonce {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Identity claims carried by a validated ID token.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Claims(Map<String, JsonValue>);

impl Claims {
    #[must_use]
    pub fn new(inner: Map<String, JsonValue>) -> Self {
        Self(inner)
    }

    /// Gets a claim value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key)
    }

    /// Gets a string claim by key.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(JsonValue::as_str)
    }

    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.get_str("sub")
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.get_str("name")
    }

    #[must_use]
    pub fn preferred_username(&self) -> Option<&str> {
        self.get_str("preferred_username")
    }

    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.get_str("email")
    }

    /// Best display name for the signed-in user: `name`, then
    /// `preferred_username`, then `email`, then `sub`.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.name()
            .or_else(|| self.preferred_username())
            .or_else(|| self.email())
            .or_else(|| self.subject())
    }

    #[must_use]
    pub fn as_map(&self) -> &Map<String, JsonValue> {
        &self.0
    }
}
