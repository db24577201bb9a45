use url::form_urlencoded;

use crate::error::Error;

/// Parameters returned by the provider in an implicit-flow redirect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct AuthorizationResponse {
    pub access_token: Option<String>,
    pub token_type: Option<String>,
    pub id_token: Option<String>,
    pub state: Option<String>,
    pub expires_in: Option<u64>,
    pub scope: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl AuthorizationResponse {
    /// Parses a redirect fragment.
    ///
    /// Accepts the bare fragment (`access_token=...&state=...`), the fragment
    /// with its leading `#`, or a full redirect URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fragment`] if `expires_in` is present but not a
    /// non-negative integer.
    pub fn parse(input: &str) -> Result<Self, Error> {
        let fragment = match input.split_once('#') {
            Some((_, fragment)) => fragment,
            None => input,
        };

        let mut response = Self::default();
        for (key, value) in form_urlencoded::parse(fragment.as_bytes()) {
            let value = value.into_owned();
            match key.as_ref() {
                "access_token" => response.access_token = Some(value),
                "token_type" => response.token_type = Some(value),
                "id_token" => response.id_token = Some(value),
                "state" => response.state = Some(value),
                "scope" => response.scope = Some(value),
                "error" => response.error = Some(value),
                "error_description" => response.error_description = Some(value),
                "expires_in" => {
                    let secs = value
                        .parse::<u64>()
                        .map_err(|_| Error::Fragment(format!("invalid expires_in: {value}")))?;
                    response.expires_in = Some(secs);
                }
                _ => {}
            }
        }
        Ok(response)
    }

    /// Whether the fragment carries anything this client understands.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none()
            && self.id_token.is_none()
            && self.state.is_none()
            && self.error.is_none()
    }

    /// Converts a provider `error=` response into [`Error::Provider`].
    pub(crate) fn provider_error(&self) -> Option<Error> {
        self.error.as_ref().map(|error| Error::Provider {
            error: error.clone(),
            description: self.error_description.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_fragment() {
        let r = AuthorizationResponse::parse(
            "access_token=abc&token_type=Bearer&id_token=xyz&state=s1&expires_in=3600&scope=openid%20profile",
        )
        .unwrap();

        assert_eq!(r.access_token.as_deref(), Some("abc"));
        assert_eq!(r.token_type.as_deref(), Some("Bearer"));
        assert_eq!(r.id_token.as_deref(), Some("xyz"));
        assert_eq!(r.state.as_deref(), Some("s1"));
        assert_eq!(r.expires_in, Some(3600));
        assert_eq!(r.scope.as_deref(), Some("openid profile"));
        assert!(r.provider_error().is_none());
    }

    #[test]
    fn accepts_leading_hash_and_full_url() {
        let hashed = AuthorizationResponse::parse("#access_token=abc&state=s1").unwrap();
        assert_eq!(hashed.access_token.as_deref(), Some("abc"));

        let url = AuthorizationResponse::parse(
            "https://app.example/index.html#access_token=abc&state=s1",
        )
        .unwrap();
        assert_eq!(url, hashed);
    }

    #[test]
    fn rejects_non_numeric_expires_in() {
        let err = AuthorizationResponse::parse("access_token=abc&expires_in=soon").unwrap_err();
        assert!(matches!(err, Error::Fragment(_)));
    }

    #[test]
    fn surfaces_provider_error() {
        let r = AuthorizationResponse::parse(
            "error=login_required&error_description=End-User%20authentication%20required&state=s1",
        )
        .unwrap();
        let err = r.provider_error().unwrap();
        assert!(matches!(
            err,
            Error::Provider { ref error, ref description }
                if error == "login_required"
                    && description.as_deref() == Some("End-User authentication required")
        ));
    }

    #[test]
    fn empty_fragment_is_empty() {
        assert!(AuthorizationResponse::parse("").unwrap().is_empty());
        assert!(AuthorizationResponse::parse("#foo=bar").unwrap().is_empty());
    }
}
