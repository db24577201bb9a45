use std::future::Future;

use serde::de::DeserializeOwned;
use url::Url;

use crate::error::Error;

/// Response from an outbound GET.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse body as JSON.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Outbound HTTP used for the discovery document and the JWKS.
///
/// Non-2xx statuses are returned as responses, not errors; only transport
/// failures are errors.
pub trait HttpFetcher: Send + Sync + 'static {
    fn get(&self, url: &Url) -> impl Future<Output = Result<HttpResponse, Error>> + Send;
}

/// [`HttpFetcher`] backed by `reqwest`.
#[cfg(feature = "http")]
#[derive(Debug, Clone, Default)]
pub struct ReqwestFetcher {
    http: reqwest::Client,
}

#[cfg(feature = "http")]
impl ReqwestFetcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }
}

#[cfg(feature = "http")]
impl HttpFetcher for ReqwestFetcher {
    async fn get(&self, url: &Url) -> Result<HttpResponse, Error> {
        let response = self
            .http
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();
        tracing::debug!(url = %url, status, "fetched");
        Ok(HttpResponse { status, body })
    }
}
