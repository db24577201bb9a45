use std::future::Future;

use url::Url;

use crate::error::Error;

/// Runs an authorization request without user interaction.
///
/// In a browser this is the hidden iframe pointed at the authorization
/// endpoint with `prompt=none`. Implementations return the fragment (or, for
/// providers that report errors in the query, the query) of the redirect that
/// lands on `redirect_uri`.
pub trait SilentAuthorizer: Send + Sync + 'static {
    fn authorize(
        &self,
        authorization_url: &Url,
        redirect_uri: &Url,
    ) -> impl Future<Output = Result<String, Error>> + Send;
}

/// Whether `location` is the silent-refresh redirect target.
pub(crate) fn lands_on(location: &Url, redirect_uri: &Url) -> bool {
    location.origin() == redirect_uri.origin() && location.path() == redirect_uri.path()
}

/// Response parameters carried by the landing URL.
pub(crate) fn response_params(location: &Url) -> String {
    location
        .fragment()
        .filter(|f| !f.is_empty())
        .or_else(|| location.query())
        .unwrap_or_default()
        .to_string()
}

#[cfg(feature = "http")]
pub use reqwest_impl::HttpSilentAuthorizer;

#[cfg(feature = "http")]
mod reqwest_impl {
    use reqwest::header::LOCATION;
    use url::Url;

    use super::{SilentAuthorizer, lands_on, response_params};
    use crate::error::Error;

    const MAX_REDIRECTS: usize = 10;

    /// [`SilentAuthorizer`] that follows the provider's redirects over HTTP.
    ///
    /// Relies on the provider's session cookie being present in the client's
    /// cookie store; a provider that answers with a login page instead of a
    /// redirect yields [`Error::RefreshFailure`].
    #[derive(Debug, Clone)]
    pub struct HttpSilentAuthorizer {
        http: reqwest::Client,
    }

    impl HttpSilentAuthorizer {
        /// Build a client with a cookie store and redirects disabled.
        ///
        /// # Errors
        ///
        /// Returns [`Error::Http`] if the client cannot be built.
        pub fn new() -> Result<Self, Error> {
            let http = reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .cookie_store(true)
                .build()?;
            Ok(Self { http })
        }

        /// Use a custom HTTP client. It must not follow redirects itself.
        #[must_use]
        pub fn with_http_client(client: reqwest::Client) -> Self {
            Self { http: client }
        }
    }

    impl SilentAuthorizer for HttpSilentAuthorizer {
        async fn authorize(
            &self,
            authorization_url: &Url,
            redirect_uri: &Url,
        ) -> Result<String, Error> {
            let mut current = authorization_url.clone();

            for _ in 0..MAX_REDIRECTS {
                let response = self.http.get(current.clone()).send().await?;
                let status = response.status();

                if !status.is_redirection() {
                    return Err(Error::RefreshFailure(format!(
                        "provider answered HTTP {} instead of redirecting; interactive login required",
                        status.as_u16()
                    )));
                }

                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        Error::RefreshFailure("redirect without Location header".into())
                    })?;
                let next = current.join(location).map_err(|e| {
                    Error::RefreshFailure(format!("invalid redirect location: {e}"))
                })?;

                if lands_on(&next, redirect_uri) {
                    return Ok(response_params(&next));
                }
                tracing::trace!(hop = %next.path(), "Following silent refresh redirect");
                current = next;
            }

            Err(Error::RefreshFailure(format!(
                "more than {MAX_REDIRECTS} redirects during silent refresh"
            )))
        }
    }

}
