use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;

use crate::config::OidcConfig;
use crate::discovery::ProviderMetadata;
use crate::nonce;
use crate::types::{Nonce, RequestId, StateToken};

/// Correlation record for an authorization request in flight.
///
/// The `state` sent to the provider must come back unchanged in the redirect;
/// the `nonce` must come back inside the ID token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct PendingRequest {
    pub id: RequestId,
    pub state: StateToken,
    pub nonce: Nonce,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl PendingRequest {
    /// Mint a request with a fresh `state` and `nonce`.
    #[must_use]
    pub fn generate(now: OffsetDateTime) -> Self {
        Self {
            id: RequestId::new(),
            state: nonce::generate_state(),
            nonce: nonce::generate_nonce(),
            created_at: now,
        }
    }

    /// Whether a redirect's `state` belongs to this request.
    #[must_use]
    pub fn matches(&self, returned_state: Option<&str>) -> bool {
        returned_state == Some(self.state.as_str())
    }
}

/// Authorization URL to navigate the user agent to.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct AuthorizationRequest {
    pub url: Url,
    pub request_id: RequestId,
    pub state: StateToken,
}

/// Which flavour of authorization request to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Prompt {
    /// Interactive login in the main window.
    Interactive,
    /// Silent refresh: the provider must not show any UI.
    None,
}

/// Build the implicit-flow authorization URL for `pending`.
pub(crate) fn authorization_url(
    config: &OidcConfig,
    metadata: &ProviderMetadata,
    pending: &PendingRequest,
    prompt: Prompt,
) -> Url {
    let response_type = if config.requests_id_token() {
        "id_token token"
    } else {
        "token"
    };
    let redirect_uri = match prompt {
        Prompt::Interactive => config.redirect_uri(),
        Prompt::None => config.silent_refresh_redirect_uri(),
    };
    let scope = config.scopes().join(" ");

    let mut url = metadata.authorization_endpoint.clone();
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("response_type", response_type)
            .append_pair("client_id", config.client_id())
            .append_pair("redirect_uri", redirect_uri.as_str())
            .append_pair("scope", &scope)
            .append_pair("state", pending.state.as_str())
            .append_pair("nonce", pending.nonce.as_str());
        if prompt == Prompt::None {
            query.append_pair("prompt", "none");
        }
        for (key, value) in config.custom_query_params() {
            query.append_pair(key, value);
        }
    }
    url
}
