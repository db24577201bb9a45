use url::Url;

/// Resource servers that receive the access token as a bearer header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct ResourceServerConfig {
    pub(crate) allowed_urls: Vec<String>,
    pub(crate) send_access_token: bool,
}

impl ResourceServerConfig {
    /// Send the access token to URLs under one of `allowed_urls`.
    #[must_use]
    pub fn new(allowed_urls: Vec<String>) -> Self {
        Self {
            allowed_urls,
            send_access_token: true,
        }
    }

    #[must_use]
    pub fn with_send_access_token(mut self, send: bool) -> Self {
        self.send_access_token = send;
        self
    }

    #[must_use]
    pub fn allowed_urls(&self) -> &[String] {
        &self.allowed_urls
    }

    /// Whether a request to `url` should carry the access token.
    ///
    /// Scheme, host and port must equal those of an allowed URL, and the path
    /// must sit under the allowed path on a segment boundary. Unparseable URLs
    /// never match.
    #[must_use]
    pub fn is_allowed(&self, url: &str) -> bool {
        if !self.send_access_token {
            return false;
        }
        let Ok(url) = Url::parse(url) else {
            return false;
        };
        self.allowed_urls
            .iter()
            .filter_map(|allowed| Url::parse(allowed).ok())
            .any(|allowed| same_origin(&allowed, &url) && under_path(allowed.path(), url.path()))
    }
}

fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
}

fn under_path(allowed: &str, path: &str) -> bool {
    if allowed.ends_with('/') {
        return path.starts_with(allowed);
    }
    path == allowed
        || path
            .strip_prefix(allowed)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Formats an `Authorization` header value.
#[must_use]
pub fn bearer_header(access_token: &str) -> String {
    format!("Bearer {access_token}")
}
