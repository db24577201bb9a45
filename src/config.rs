use std::time::Duration;

use url::Url;

use crate::error::Error;
use crate::resource::ResourceServerConfig;

const DEFAULT_REFRESH_SKEW: Duration = Duration::from_secs(60);
const DEFAULT_SILENT_REFRESH_TIMEOUT: Duration = Duration::from_secs(20);

/// OpenID Connect client configuration for the implicit flow.
///
/// Required fields are constructor parameters, so a missing field cannot surface at runtime.
///
/// ```rust,ignore
/// use oidc_implicit_session::OidcConfig;
///
/// let config = OidcConfig::new(
///     "https://idp.example/".parse()?,
///     "my-client-id",
///     "https://my-app.example/index.html".parse()?,
/// )
/// .with_silent_refresh_redirect_uri("https://my-app.example/silent-refresh.html".parse()?)
/// .with_query_param("audience", "https://api.example");
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct OidcConfig {
    pub(crate) issuer: Url,
    pub(crate) client_id: String,
    pub(crate) redirect_uri: Url,
    pub(crate) silent_refresh_redirect_uri: Option<Url>,
    pub(crate) scopes: Vec<String>,
    pub(crate) custom_query_params: Vec<(String, String)>,
    pub(crate) logout_url: Option<String>,
    pub(crate) resource_server: ResourceServerConfig,
    pub(crate) refresh_skew: Duration,
    pub(crate) silent_refresh_timeout: Duration,
    pub(crate) auto_refresh: bool,
    pub(crate) strict_discovery: bool,
}

impl OidcConfig {
    /// Create a new configuration.
    #[must_use]
    pub fn new(issuer: Url, client_id: impl Into<String>, redirect_uri: Url) -> Self {
        Self {
            issuer,
            client_id: client_id.into(),
            redirect_uri,
            silent_refresh_redirect_uri: None,
            scopes: vec!["openid".into(), "profile".into(), "email".into()],
            custom_query_params: Vec::new(),
            logout_url: None,
            resource_server: ResourceServerConfig::default(),
            refresh_skew: DEFAULT_REFRESH_SKEW,
            silent_refresh_timeout: DEFAULT_SILENT_REFRESH_TIMEOUT,
            auto_refresh: true,
            strict_discovery: true,
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `OIDC_ISSUER`: provider issuer URL
    /// - `OIDC_CLIENT_ID`: client ID
    /// - `OIDC_REDIRECT_URI`: redirect URI registered for the implicit flow
    ///
    /// # Optional env vars
    /// - `OIDC_SILENT_REFRESH_REDIRECT_URI`: redirect URI for silent refresh
    /// - `OIDC_SCOPES`: space- or comma-separated scopes
    /// - `OIDC_LOGOUT_URL`: logout URL template (see [`with_logout_url`](Self::with_logout_url))
    /// - `OIDC_QUERY_PARAMS`: extra authorization parameters, `key=value,key=value`
    /// - `OIDC_RESOURCE_URLS`: comma-separated URL prefixes that receive the access token
    /// - `OIDC_REFRESH_SKEW_SECS`: seconds before expiry to refresh
    /// - `OIDC_SILENT_REFRESH_TIMEOUT_SECS`: silent refresh timeout in seconds
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if required env vars are missing or values are invalid.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if required variables are missing or values are invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let required = |name: &str| {
            lookup(name).ok_or_else(|| Error::Config(format!("{name} is required")))
        };
        let parse_url = |name: &str, value: String| {
            value
                .parse::<Url>()
                .map_err(|e| Error::Config(format!("{name}: {e}")))
        };
        let parse_secs = |name: &str, value: String| {
            value
                .trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| Error::Config(format!("{name}: {e}")))
        };

        let issuer = parse_url("OIDC_ISSUER", required("OIDC_ISSUER")?)?;
        let client_id = required("OIDC_CLIENT_ID")?;
        let redirect_uri = parse_url("OIDC_REDIRECT_URI", required("OIDC_REDIRECT_URI")?)?;

        let mut config = Self::new(issuer, client_id, redirect_uri);

        if let Some(value) = lookup("OIDC_SILENT_REFRESH_REDIRECT_URI") {
            config = config.with_silent_refresh_redirect_uri(parse_url(
                "OIDC_SILENT_REFRESH_REDIRECT_URI",
                value,
            )?);
        }
        if let Some(scopes) = lookup("OIDC_SCOPES") {
            config = config.with_scopes(
                scopes
                    .split([' ', ','])
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect(),
            );
        }
        if let Some(template) = lookup("OIDC_LOGOUT_URL") {
            config = config.with_logout_url(template);
        }
        if let Some(params) = lookup("OIDC_QUERY_PARAMS") {
            for pair in params.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                let (key, value) = pair.split_once('=').ok_or_else(|| {
                    Error::Config(format!("OIDC_QUERY_PARAMS: expected key=value, got '{pair}'"))
                })?;
                config = config.with_query_param(key.trim(), value.trim());
            }
        }
        if let Some(urls) = lookup("OIDC_RESOURCE_URLS") {
            config = config.with_resource_server(ResourceServerConfig::new(
                urls.split(',')
                    .map(str::trim)
                    .filter(|u| !u.is_empty())
                    .map(String::from)
                    .collect(),
            ));
        }
        if let Some(value) = lookup("OIDC_REFRESH_SKEW_SECS") {
            config = config.with_refresh_skew(parse_secs("OIDC_REFRESH_SKEW_SECS", value)?);
        }
        if let Some(value) = lookup("OIDC_SILENT_REFRESH_TIMEOUT_SECS") {
            config = config.with_silent_refresh_timeout(parse_secs(
                "OIDC_SILENT_REFRESH_TIMEOUT_SECS",
                value,
            )?);
        }

        Ok(config)
    }

    /// Redirect URI used by silent refresh (default: the login redirect URI).
    #[must_use]
    pub fn with_silent_refresh_redirect_uri(mut self, url: Url) -> Self {
        self.silent_refresh_redirect_uri = Some(url);
        self
    }

    /// Override the scopes (default: `["openid", "profile", "email"]`).
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Add an extra authorization request parameter (e.g. `audience`).
    #[must_use]
    pub fn with_query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_query_params.push((key.into(), value.into()));
        self
    }

    /// Provider logout URL template.
    ///
    /// Placeholders: `{issuer}` (verbatim), `{client_id}`, `{redirect_uri}`
    /// and `{id_token}` (URL-encoded). Without a template, logout falls back to
    /// the discovery document's `end_session_endpoint`.
    #[must_use]
    pub fn with_logout_url(mut self, template: impl Into<String>) -> Self {
        self.logout_url = Some(template.into());
        self
    }

    #[must_use]
    pub fn with_resource_server(mut self, resource_server: ResourceServerConfig) -> Self {
        self.resource_server = resource_server;
        self
    }

    /// How long before expiry the silent refresh fires (default: 60s).
    #[must_use]
    pub fn with_refresh_skew(mut self, skew: Duration) -> Self {
        self.refresh_skew = skew;
        self
    }

    /// Upper bound for one silent refresh round trip (default: 20s).
    #[must_use]
    pub fn with_silent_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.silent_refresh_timeout = timeout;
        self
    }

    /// Arm the refresh timer after every successful login (default: `true`).
    #[must_use]
    pub fn with_auto_refresh(mut self, enabled: bool) -> Self {
        self.auto_refresh = enabled;
        self
    }

    /// Require the discovery document's `issuer` to match (default: `true`).
    #[must_use]
    pub fn with_strict_discovery(mut self, strict: bool) -> Self {
        self.strict_discovery = strict;
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &Url {
        &self.issuer
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn redirect_uri(&self) -> &Url {
        &self.redirect_uri
    }

    #[must_use]
    pub fn silent_refresh_redirect_uri(&self) -> &Url {
        self.silent_refresh_redirect_uri
            .as_ref()
            .unwrap_or(&self.redirect_uri)
    }

    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    #[must_use]
    pub fn custom_query_params(&self) -> &[(String, String)] {
        &self.custom_query_params
    }

    #[must_use]
    pub fn resource_server(&self) -> &ResourceServerConfig {
        &self.resource_server
    }

    #[must_use]
    pub fn refresh_skew(&self) -> Duration {
        self.refresh_skew
    }

    #[must_use]
    pub fn silent_refresh_timeout(&self) -> Duration {
        self.silent_refresh_timeout
    }

    /// Whether the `openid` scope is requested (ID token expected).
    #[must_use]
    pub fn requests_id_token(&self) -> bool {
        self.scopes.iter().any(|s| s == "openid")
    }

    /// Render the logout URL template, if one is configured.
    pub(crate) fn render_logout_url(&self, id_token: Option<&str>) -> Result<Option<Url>, Error> {
        let Some(template) = &self.logout_url else {
            return Ok(None);
        };
        let rendered = template
            .replace("{issuer}", self.issuer.as_str())
            .replace("{client_id}", &urlencoding::encode(&self.client_id))
            .replace(
                "{redirect_uri}",
                &urlencoding::encode(self.redirect_uri.as_str()),
            )
            .replace("{id_token}", &urlencoding::encode(id_token.unwrap_or_default()));
        rendered
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("logout URL: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn test_config() -> OidcConfig {
        OidcConfig::new(
            "https://idp.example/".parse().unwrap(),
            "demo-client",
            "https://app.example/index.html".parse().unwrap(),
        )
    }

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_config_defaults() {
        let config = test_config();

        assert_eq!(config.client_id(), "demo-client");
        assert_eq!(config.scopes(), &["openid", "profile", "email"]);
        assert_eq!(config.refresh_skew(), Duration::from_secs(60));
        assert_eq!(config.silent_refresh_timeout(), Duration::from_secs(20));
        assert_eq!(
            config.silent_refresh_redirect_uri().as_str(),
            "https://app.example/index.html"
        );
        assert!(config.requests_id_token());
    }

    #[test]
    fn test_config_with_overrides() {
        let config = test_config()
            .with_silent_refresh_redirect_uri(
                "https://app.example/silent-refresh.html".parse().unwrap(),
            )
            .with_scopes(vec!["profile".into()])
            .with_query_param("audience", "https://api.example");

        assert_eq!(
            config.silent_refresh_redirect_uri().as_str(),
            "https://app.example/silent-refresh.html"
        );
        assert!(!config.requests_id_token());
        assert_eq!(
            config.custom_query_params(),
            &[("audience".to_string(), "https://api.example".to_string())]
        );
    }

    #[test]
    fn test_logout_template_renders_encoded_values() {
        let config = test_config()
            .with_logout_url("{issuer}v2/logout?client_id={client_id}&returnTo={redirect_uri}");

        let url = config.render_logout_url(None).unwrap().unwrap();
        assert_eq!(
            url.as_str(),
            "https://idp.example/v2/logout?client_id=demo-client&returnTo=https%3A%2F%2Fapp.example%2Findex.html"
        );
    }

    #[test]
    fn test_logout_template_absent() {
        assert!(test_config().render_logout_url(Some("xyz")).unwrap().is_none());
    }

    #[test]
    fn test_from_lookup_required_only() {
        let config = OidcConfig::from_lookup(lookup(&[
            ("OIDC_ISSUER", "https://idp.example/"),
            ("OIDC_CLIENT_ID", "demo-client"),
            ("OIDC_REDIRECT_URI", "https://app.example/index.html"),
        ]))
        .unwrap();

        assert_eq!(config.issuer().as_str(), "https://idp.example/");
        assert_eq!(config.client_id(), "demo-client");
    }

    #[test]
    fn test_from_lookup_missing_required() {
        let err = OidcConfig::from_lookup(lookup(&[("OIDC_ISSUER", "https://idp.example/")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("OIDC_CLIENT_ID")));
    }

    #[test]
    fn test_from_lookup_optional_values() {
        let config = OidcConfig::from_lookup(lookup(&[
            ("OIDC_ISSUER", "https://idp.example/"),
            ("OIDC_CLIENT_ID", "demo-client"),
            ("OIDC_REDIRECT_URI", "https://app.example/index.html"),
            ("OIDC_SCOPES", "openid, profile email"),
            ("OIDC_QUERY_PARAMS", "audience=https://api.example"),
            ("OIDC_RESOURCE_URLS", "http://localhost:8080, https://api.example"),
            ("OIDC_REFRESH_SKEW_SECS", "30"),
            ("OIDC_SILENT_REFRESH_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();

        assert_eq!(config.scopes(), &["openid", "profile", "email"]);
        assert_eq!(
            config.custom_query_params(),
            &[("audience".to_string(), "https://api.example".to_string())]
        );
        assert_eq!(
            config.resource_server().allowed_urls(),
            &["http://localhost:8080", "https://api.example"]
        );
        assert_eq!(config.refresh_skew(), Duration::from_secs(30));
        assert_eq!(config.silent_refresh_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_from_lookup_invalid_values() {
        let base = [
            ("OIDC_ISSUER", "https://idp.example/"),
            ("OIDC_CLIENT_ID", "demo-client"),
            ("OIDC_REDIRECT_URI", "not a url"),
        ];
        assert!(matches!(
            OidcConfig::from_lookup(lookup(&base)),
            Err(Error::Config(_))
        ));

        let bad_params = [
            ("OIDC_ISSUER", "https://idp.example/"),
            ("OIDC_CLIENT_ID", "demo-client"),
            ("OIDC_REDIRECT_URI", "https://app.example/"),
            ("OIDC_QUERY_PARAMS", "audience"),
        ];
        assert!(matches!(
            OidcConfig::from_lookup(lookup(&bad_params)),
            Err(Error::Config(_))
        ));
    }
}
