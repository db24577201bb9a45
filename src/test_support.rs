//! Fakes shared by the unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde_json::{Value as JsonValue, json};
use time::OffsetDateTime;
use url::Url;

use crate::clock::Clock;
use crate::config::OidcConfig;
use crate::error::Error;
use crate::http::{HttpFetcher, HttpResponse};
use crate::silent::SilentAuthorizer;
use crate::token::{IdTokenValidator, ValidationContext};
use crate::types::{Claims, Nonce};

/// RSA key the fake provider signs ID tokens with.
pub(crate) const TEST_RSA_PEM: &str = include_str!("../testdata/idp_rsa.pem");
/// Public half of [`TEST_RSA_PEM`] as a JWKS.
pub(crate) const TEST_JWKS: &str = include_str!("../testdata/idp_jwks.json");
pub(crate) const TEST_KID: &str = "test-key-1";

pub(crate) fn test_config() -> OidcConfig {
    OidcConfig::new(
        "https://idp.example/".parse().unwrap(),
        "demo-client",
        "https://app.example/index.html".parse().unwrap(),
    )
}

/// Discovery document for `issuer`, endpoints rooted at the issuer origin.
pub(crate) fn discovery_document(issuer: &str) -> JsonValue {
    let base = issuer.trim_end_matches('/');
    json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{base}/authorize"),
        "token_endpoint": format!("{base}/oauth/token"),
        "jwks_uri": format!("{base}/.well-known/jwks.json"),
        "end_session_endpoint": format!("{base}/logout"),
        "userinfo_endpoint": format!("{base}/userinfo"),
        "response_types_supported": ["token", "id_token token"],
    })
}

/// Clock that only moves when told to.
#[derive(Clone)]
pub(crate) struct FixedClock {
    now: Arc<Mutex<OffsetDateTime>>,
}

impl FixedClock {
    pub(crate) fn at(unix_secs: i64) -> Self {
        Self {
            now: Arc::new(Mutex::new(
                OffsetDateTime::from_unix_timestamp(unix_secs).unwrap(),
            )),
        }
    }

    /// `secs` from the current fixed time.
    pub(crate) fn after(&self, secs: i64) -> OffsetDateTime {
        self.now() + time::Duration::seconds(secs)
    }

    pub(crate) fn advance(&self, secs: i64) {
        *self.now.lock().unwrap() += time::Duration::seconds(secs);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().unwrap()
    }
}

/// Clock that advances with tokio time, including paused test time.
pub(crate) struct TokioClock {
    base: OffsetDateTime,
    start: tokio::time::Instant,
}

impl TokioClock {
    pub(crate) fn at(unix_secs: i64) -> Self {
        Self {
            base: OffsetDateTime::from_unix_timestamp(unix_secs).unwrap(),
            start: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> OffsetDateTime {
        self.base + self.start.elapsed()
    }
}

struct Route {
    pattern: String,
    status: u16,
    body: Vec<u8>,
}

#[derive(Default)]
struct FetcherState {
    routes: Vec<Route>,
    requested: Vec<String>,
}

/// [`HttpFetcher`] answering from canned routes.
///
/// A route matches when the URL contains its pattern. Unmatched URLs fail
/// like an unreachable host.
#[derive(Clone, Default)]
pub(crate) struct MockFetcher {
    state: Arc<Mutex<FetcherState>>,
}

impl MockFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_json(self, pattern: &str, status: u16, body: JsonValue) -> Self {
        let body = serde_json::to_vec(&body).unwrap();
        self.route(pattern, status, body)
    }

    pub(crate) fn with_body(self, pattern: &str, status: u16, body: &str) -> Self {
        self.route(pattern, status, body.as_bytes().to_vec())
    }

    fn route(self, pattern: &str, status: u16, body: Vec<u8>) -> Self {
        self.state.lock().unwrap().routes.push(Route {
            pattern: pattern.to_string(),
            status,
            body,
        });
        self
    }

    /// Number of requests whose URL contained `pattern`.
    pub(crate) fn calls(&self, pattern: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .requested
            .iter()
            .filter(|url| url.contains(pattern))
            .count()
    }

    pub(crate) fn requested(&self) -> Vec<String> {
        self.state.lock().unwrap().requested.clone()
    }
}

impl HttpFetcher for MockFetcher {
    async fn get(&self, url: &Url) -> Result<HttpResponse, Error> {
        let mut state = self.state.lock().unwrap();
        state.requested.push(url.to_string());
        state
            .routes
            .iter()
            .find(|route| url.as_str().contains(&route.pattern))
            .map(|route| HttpResponse {
                status: route.status,
                body: route.body.clone(),
            })
            .ok_or_else(|| Error::Discovery(format!("connection refused: {url}")))
    }
}

/// [`IdTokenValidator`] that skips signature checks.
///
/// Accepts any token and returns fixed claims carrying the token itself
/// under `"token"`, or rejects everything.
#[derive(Clone, Default)]
pub(crate) struct StubValidator {
    reject: Option<String>,
    nonces: Arc<Mutex<Vec<Nonce>>>,
}

impl StubValidator {
    pub(crate) fn accepting() -> Self {
        Self::default()
    }

    pub(crate) fn rejecting(reason: &str) -> Self {
        Self {
            reject: Some(reason.to_string()),
            ..Self::default()
        }
    }

    /// Nonces the validator was asked to check, in order.
    pub(crate) fn nonces(&self) -> Vec<Nonce> {
        self.nonces.lock().unwrap().clone()
    }
}

impl IdTokenValidator for StubValidator {
    async fn validate(&self, id_token: &str, ctx: &ValidationContext<'_>) -> Result<Claims, Error> {
        self.nonces.lock().unwrap().push(ctx.nonce.clone());
        if let Some(reason) = &self.reject {
            return Err(Error::TokenValidation(reason.clone()));
        }
        Ok(serde_json::from_value(json!({
            "iss": ctx.issuer,
            "aud": ctx.client_id,
            "sub": "auth0|42",
            "name": "Ada Lovelace",
            "token": id_token,
        }))
        .unwrap())
    }
}

/// What the fake provider answers to the next silent authorization.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Tokens {
        access_token: &'static str,
        id_token: &'static str,
        expires_in: u64,
    },
    ProviderError(&'static str),
    /// Answers with a `state` that was never issued.
    ForgedState,
    /// Never answers.
    Hang,
}

/// [`SilentAuthorizer`] replaying scripted replies, echoing the request's `state`.
#[derive(Clone, Default)]
pub(crate) struct ScriptedAuthorizer {
    replies: Arc<Mutex<VecDeque<Reply>>>,
    calls: Arc<Mutex<Vec<Url>>>,
}

impl ScriptedAuthorizer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, reply: Reply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    /// Authorization URLs requested so far.
    pub(crate) fn calls(&self) -> Vec<Url> {
        self.calls.lock().unwrap().clone()
    }
}

impl SilentAuthorizer for ScriptedAuthorizer {
    async fn authorize(&self, authorization_url: &Url, _redirect_uri: &Url) -> Result<String, Error> {
        self.calls.lock().unwrap().push(authorization_url.clone());
        let state = authorization_url
            .query_pairs()
            .find(|(key, _)| key == "state")
            .map(|(_, value)| value.into_owned())
            .unwrap_or_default();
        let reply = self.replies.lock().unwrap().pop_front();

        match reply {
            Some(Reply::Tokens {
                access_token,
                id_token,
                expires_in,
            }) => Ok(format!(
                "access_token={access_token}&token_type=Bearer&id_token={id_token}&expires_in={expires_in}&state={state}"
            )),
            Some(Reply::ProviderError(code)) => Ok(format!("error={code}&state={state}")),
            Some(Reply::ForgedState) => {
                Ok("access_token=evil&id_token=evil&expires_in=3600&state=forged".to_string())
            }
            Some(Reply::Hang) => std::future::pending().await,
            None => Err(Error::RefreshFailure("no scripted reply".into())),
        }
    }
}
