//! The session state machine.
//!
//! ```text
//! Unauthenticated ──login──▶ Authenticating ──complete_login──▶ Authenticated
//!        ▲                         │                              │    ▲
//!        │                         └──────── failure ─────────────┤    │
//!        ├──────────────────── logout ◀───────────────────────────┘    │
//!        │                                                       silent_refresh
//!        └────── refresh failed, token expired ◀──── Refreshing ───────┘
//! ```

use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::{Mutex, MutexGuard, mpsc, watch};
use url::Url;

use crate::authorize::{AuthorizationRequest, PendingRequest, Prompt, authorization_url};
use crate::clock::{Clock, SystemClock};
use crate::config::OidcConfig;
use crate::discovery::DiscoveryResolver;
use crate::error::Error;
use crate::fragment::AuthorizationResponse;
use crate::http::HttpFetcher;
use crate::resource::bearer_header;
use crate::scheduler::RefreshScheduler;
use crate::silent::SilentAuthorizer;
use crate::store::TokenStore;
use crate::token::{IdTokenValidator, ValidationContext};
use crate::types::{Claims, SessionState};

/// Tokens and identity of the current user.
///
/// Replaced as a whole on every transition; observers never see a mix of
/// old and new fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Session {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    /// Present only when `id_token` passed validation.
    #[serde(default)]
    pub claims: Option<Claims>,
    #[serde(default)]
    pub state: SessionState,
}

impl Session {
    /// Whether the access token is present and unexpired at `now`.
    #[must_use]
    pub fn is_valid_at(&self, now: OffsetDateTime) -> bool {
        self.access_token.is_some() && self.expires_at.is_some_and(|exp| exp > now)
    }

    /// Time left on the access token at `now`, if any.
    #[must_use]
    pub fn expires_in(&self, now: OffsetDateTime) -> Option<time::Duration> {
        self.expires_at
            .map(|exp| exp - now)
            .filter(|left| left.is_positive())
    }

    /// This session as seen at `now`: an `Authenticated` session whose token
    /// has expired reads as `Unauthenticated` with no tokens.
    #[must_use]
    pub fn as_of(&self, now: OffsetDateTime) -> Self {
        if self.state == SessionState::Authenticated && !self.is_valid_at(now) {
            Self::default()
        } else {
            self.clone()
        }
    }

    fn with_state(mut self, state: SessionState) -> Self {
        self.state = state;
        self
    }
}

struct Inner {
    session: Session,
    pending: Option<PendingRequest>,
}

struct Shared<S, H, V, A> {
    config: OidcConfig,
    discovery: DiscoveryResolver<H>,
    validator: V,
    authorizer: A,
    store: S,
    clock: Arc<dyn Clock>,
    scheduler: RefreshScheduler,
    refresh_tx: mpsc::UnboundedSender<u64>,
    inner: Mutex<Inner>,
    session_tx: watch::Sender<Session>,
}

/// OIDC implicit-flow session manager.
///
/// Owns the single session of the process. Every transition (`login`,
/// `complete_login`, `silent_refresh`, `logout`, `restore`) runs under one
/// async lock, so transitions never overlap; the refresh timer goes through
/// the same lock. Cloning is cheap and clones share the session.
///
/// ```rust,ignore
/// let manager = SessionManager::with_reqwest(OidcConfig::from_env()?, FileTokenStore::new(path))?;
///
/// // Log in button
/// let request = manager.login().await?;
/// open_browser(request.url);
///
/// // Back from the provider
/// manager.complete_login(&redirect_fragment).await?;
/// println!("{:?}", manager.claims());
/// ```
pub struct SessionManager<S, H, V, A> {
    shared: Arc<Shared<S, H, V, A>>,
}

// Manual Clone: avoid derive adding `S: Clone, H: Clone, ...` bounds.
impl<S, H, V, A> Clone for SessionManager<S, H, V, A> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

#[cfg(all(feature = "http", feature = "jwks"))]
impl<S: TokenStore>
    SessionManager<
        S,
        crate::http::ReqwestFetcher,
        crate::token::JwksValidator<crate::http::ReqwestFetcher>,
        crate::silent::HttpSilentAuthorizer,
    >
{
    /// Manager with reqwest-backed discovery, JWKS validation and silent refresh.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the HTTP client for silent refresh cannot be built.
    pub fn with_reqwest(config: OidcConfig, store: S) -> Result<Self, Error> {
        let fetcher = crate::http::ReqwestFetcher::new();
        Ok(Self::new(
            config,
            store,
            fetcher.clone(),
            crate::token::JwksValidator::new(fetcher),
            crate::silent::HttpSilentAuthorizer::new()?,
        ))
    }
}

impl<S, H, V, A> SessionManager<S, H, V, A>
where
    S: TokenStore,
    H: HttpFetcher,
    V: IdTokenValidator,
    A: SilentAuthorizer,
{
    /// Create a manager using the system clock.
    ///
    /// Must be called within a Tokio runtime: it spawns the task that runs
    /// timer-driven refreshes.
    #[must_use]
    pub fn new(config: OidcConfig, store: S, http: H, validator: V, authorizer: A) -> Self {
        Self::with_clock(config, store, http, validator, authorizer, Arc::new(SystemClock))
    }

    /// Create a manager with a custom clock.
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn with_clock(
        config: OidcConfig,
        store: S,
        http: H,
        validator: V,
        authorizer: A,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let discovery = DiscoveryResolver::new(config.issuer().clone(), http)
            .with_strict(config.strict_discovery);
        let scheduler = RefreshScheduler::new(config.refresh_skew(), Arc::clone(&clock));
        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
        let (session_tx, _) = watch::channel(Session::default());

        let shared = Arc::new(Shared {
            config,
            discovery,
            validator,
            authorizer,
            store,
            clock,
            scheduler,
            refresh_tx,
            inner: Mutex::new(Inner {
                session: Session::default(),
                pending: None,
            }),
            session_tx,
        });

        tokio::spawn(drive_timer_refreshes(Arc::downgrade(&shared), refresh_rx));

        Self { shared }
    }

    /// Start an interactive login.
    ///
    /// Valid while `Unauthenticated`, or while `Authenticating`, in which case
    /// the previous attempt is superseded and its redirect will be rejected.
    /// Returns the URL the user agent must navigate to.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidStateTransition`] when already authenticated.
    /// - [`Error::Discovery`] when provider metadata cannot be resolved.
    pub async fn login(&self) -> Result<AuthorizationRequest, Error> {
        let shared = &self.shared;
        let mut inner = shared.lock().await;

        match inner.session.state {
            SessionState::Unauthenticated | SessionState::Authenticating => {}
            other => return Err(Error::invalid_transition("login", other)),
        }

        let metadata = shared.discovery.resolve().await?;
        let pending = PendingRequest::generate(shared.clock.now());
        let url = authorization_url(&shared.config, &metadata, &pending, Prompt::Interactive);

        if let Some(previous) = inner.pending.replace(pending.clone()) {
            tracing::info!(superseded = %previous.id, request_id = %pending.id, "Superseding pending login");
        } else {
            tracing::info!(request_id = %pending.id, "Starting login");
        }
        inner.session = Session::default().with_state(SessionState::Authenticating);
        shared.publish(&inner);

        Ok(AuthorizationRequest {
            url,
            request_id: pending.id,
            state: pending.state,
        })
    }

    /// Finish a login from the redirect fragment.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidStateTransition`] unless `Authenticating`.
    /// - [`Error::Fragment`] if the fragment cannot be parsed (state unchanged).
    /// - [`Error::StateMismatch`] if `state` is not the pending one; the
    ///   fragment is discarded and the state is unchanged.
    /// - [`Error::Provider`], [`Error::Fragment`], [`Error::TokenValidation`]
    ///   or [`Error::Discovery`] for a response to the pending request that
    ///   cannot be accepted; the attempt ends in `Unauthenticated`.
    pub async fn complete_login(&self, fragment: &str) -> Result<Session, Error> {
        let shared = &self.shared;
        let mut inner = shared.lock().await;

        if inner.session.state != SessionState::Authenticating {
            return Err(Error::invalid_transition(
                "complete login",
                inner.session.state,
            ));
        }

        let response = AuthorizationResponse::parse(fragment)?;
        let pending = match &inner.pending {
            Some(pending) if pending.matches(response.state.as_deref()) => pending.clone(),
            _ => {
                tracing::warn!("Discarding redirect with unexpected state");
                return Err(Error::StateMismatch);
            }
        };

        // The response belongs to the pending request; either way it is consumed.
        inner.pending = None;
        match shared.accept_response(&response, &pending).await {
            Ok(session) => {
                shared.install(&mut inner, session).await;
                tracing::info!(request_id = %pending.id, "OIDC login successful");
                Ok(inner.session.clone())
            }
            Err(e) => {
                tracing::warn!(request_id = %pending.id, error = %e, "Login response rejected");
                inner.session = Session::default();
                shared.publish(&inner);
                Err(e)
            }
        }
    }

    /// Renew tokens without user interaction.
    ///
    /// Valid in any state. On success the session is replaced in one step.
    /// On failure the prior session is kept if its token is still valid;
    /// otherwise the session is cleared. A failure does not schedule a retry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RefreshFailure`] describing why no new session was obtained.
    pub async fn silent_refresh(&self) -> Result<Session, Error> {
        let mut inner = self.shared.lock().await;
        self.shared.refresh_locked(&mut inner).await
    }

    /// Log out and return the provider logout URL, if one is known.
    ///
    /// The URL comes from the configured template, else from the discovery
    /// document's `end_session_endpoint`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidStateTransition`] unless `Authenticated`.
    /// - [`Error::Config`] if the logout template renders an invalid URL.
    pub async fn logout(&self) -> Result<Option<Url>, Error> {
        let shared = &self.shared;
        let mut inner = shared.lock().await;

        if inner.session.state != SessionState::Authenticated {
            return Err(Error::invalid_transition("logout", inner.session.state));
        }

        let id_token = inner.session.id_token.take();
        shared.scheduler.cancel();
        inner.session = Session::default();
        inner.pending = None;
        if let Err(e) = shared.store.clear().await {
            tracing::warn!(error = %e, "Clearing stored session failed during logout");
        }
        shared.publish(&inner);
        tracing::info!("Logged out");

        shared.logout_url(id_token.as_deref()).await
    }

    /// Adopt a previously persisted session.
    ///
    /// Valid while `Unauthenticated`. An unexpired stored session becomes
    /// `Authenticated` and the refresh timer is armed; an expired one is
    /// removed from the store.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidStateTransition`] unless `Unauthenticated`.
    /// - [`Error::Store`] if the store cannot be read.
    pub async fn restore(&self) -> Result<Session, Error> {
        let shared = &self.shared;
        let mut inner = shared.lock().await;

        if inner.session.state != SessionState::Unauthenticated {
            return Err(Error::invalid_transition("restore", inner.session.state));
        }

        let Some(stored) = shared.store.load().await? else {
            return Ok(inner.session.clone());
        };

        if stored.is_valid_at(shared.clock.now()) {
            inner.session = stored.with_state(SessionState::Authenticated);
            shared.publish(&inner);
            shared.arm_refresh(&inner.session);
            tracing::info!("Restored stored session");
        } else {
            tracing::debug!("Discarding expired stored session");
            if let Err(e) = shared.store.clear().await {
                tracing::warn!(error = %e, "Clearing expired session failed");
            }
        }
        Ok(inner.session.clone())
    }

    /// Resume waiting for a redirect after a restart.
    ///
    /// Valid while `Unauthenticated` or `Authenticating`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidStateTransition`] otherwise.
    pub async fn restore_pending(&self, pending: PendingRequest) -> Result<(), Error> {
        let shared = &self.shared;
        let mut inner = shared.lock().await;

        match inner.session.state {
            SessionState::Unauthenticated | SessionState::Authenticating => {}
            other => return Err(Error::invalid_transition("resume login", other)),
        }
        inner.pending = Some(pending);
        inner.session = Session::default().with_state(SessionState::Authenticating);
        shared.publish(&inner);
        Ok(())
    }

    /// The authorization request currently awaiting its redirect.
    pub async fn pending_request(&self) -> Option<PendingRequest> {
        self.shared.inner.lock().await.pending.clone()
    }

    /// Current session snapshot.
    #[must_use]
    pub fn session(&self) -> Session {
        self.shared
            .session_tx
            .borrow()
            .as_of(self.shared.clock.now())
    }

    /// Observe session changes. Each value is a complete snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.shared.session_tx.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.session().state
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.session().is_valid_at(self.shared.clock.now())
    }

    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        self.session().access_token
    }

    #[must_use]
    pub fn id_token(&self) -> Option<String> {
        self.session().id_token
    }

    #[must_use]
    pub fn claims(&self) -> Option<Claims> {
        self.session().claims
    }

    /// `Authorization` header value for a request to `url`, if `url` belongs
    /// to a configured resource server and a valid token is held.
    #[must_use]
    pub fn bearer_token_for(&self, url: &str) -> Option<String> {
        if !self.shared.config.resource_server().is_allowed(url) {
            return None;
        }
        let session = self.session();
        if !session.is_valid_at(self.shared.clock.now()) {
            return None;
        }
        session.access_token.as_deref().map(bearer_header)
    }

    /// When the next silent refresh is due, if one is scheduled.
    #[must_use]
    pub fn refresh_scheduled_at(&self) -> Option<OffsetDateTime> {
        self.shared.scheduler.fires_at()
    }

    #[must_use]
    pub fn config(&self) -> &OidcConfig {
        &self.shared.config
    }
}

/// Runs refreshes requested by the timer until the manager is dropped.
async fn drive_timer_refreshes<S, H, V, A>(
    shared: Weak<Shared<S, H, V, A>>,
    mut ticks: mpsc::UnboundedReceiver<u64>,
) where
    S: TokenStore,
    H: HttpFetcher,
    V: IdTokenValidator,
    A: SilentAuthorizer,
{
    while let Some(generation) = ticks.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        // Raw lock: demoting an expired session here would cancel the very
        // timer being served. The refresh handles the expired case itself.
        let mut inner = shared.inner.lock().await;
        if shared.scheduler.generation() != generation {
            tracing::debug!(generation, "Ignoring superseded refresh timer");
            continue;
        }
        if let Err(e) = shared.refresh_locked(&mut inner).await {
            tracing::warn!(error = %e, "Scheduled silent refresh failed");
        }
    }
}

impl<S, H, V, A> Shared<S, H, V, A>
where
    S: TokenStore,
    H: HttpFetcher,
    V: IdTokenValidator,
    A: SilentAuthorizer,
{
    /// Take the transition lock, demoting an expired session first.
    async fn lock(&self) -> MutexGuard<'_, Inner> {
        let mut inner = self.inner.lock().await;
        if inner.session.state == SessionState::Authenticated
            && !inner.session.is_valid_at(self.clock.now())
        {
            tracing::info!("Session expired");
            self.scheduler.cancel();
            inner.session = Session::default();
            if let Err(e) = self.store.clear().await {
                tracing::warn!(error = %e, "Clearing expired session failed");
            }
            self.publish(&inner);
        }
        inner
    }

    fn publish(&self, inner: &Inner) {
        self.session_tx.send_replace(inner.session.clone());
    }

    /// Persist, publish and schedule a freshly obtained session.
    async fn install(&self, inner: &mut Inner, session: Session) {
        if let Err(e) = self.store.save(&session).await {
            tracing::warn!(error = %e, "Persisting session failed; keeping it in memory");
        }
        inner.session = session;
        self.publish(inner);
        self.arm_refresh(&inner.session);
    }

    fn arm_refresh(&self, session: &Session) {
        if !self.config.auto_refresh {
            return;
        }
        let Some(expires_at) = session.expires_at else {
            return;
        };
        let tx = self.refresh_tx.clone();
        self.scheduler.arm(expires_at, move |generation| async move {
            let _ = tx.send(generation);
        });
    }

    async fn refresh_locked(&self, inner: &mut Inner) -> Result<Session, Error> {
        let prior = inner.session.clone();
        inner.session.state = SessionState::Refreshing;
        self.publish(inner);

        match self.run_silent_flow().await {
            Ok(session) => {
                inner.pending = None;
                self.install(inner, session).await;
                tracing::info!("Silent refresh successful");
                Ok(inner.session.clone())
            }
            Err(e) => {
                let error = match e {
                    Error::RefreshFailure(_) => e,
                    other => Error::RefreshFailure(other.to_string()),
                };

                if prior.is_valid_at(self.clock.now()) {
                    tracing::warn!(error = %error, "Silent refresh failed; current token stays usable until it expires");
                    inner.session = prior;
                } else if prior.state == SessionState::Authenticating {
                    // A login is still waiting for its redirect.
                    inner.session = prior;
                } else {
                    tracing::warn!(error = %error, "Silent refresh failed with no valid token left");
                    self.scheduler.cancel();
                    inner.session = Session::default();
                    if let Err(e) = self.store.clear().await {
                        tracing::warn!(error = %e, "Clearing session failed");
                    }
                }
                self.publish(inner);
                Err(error)
            }
        }
    }

    async fn run_silent_flow(&self) -> Result<Session, Error> {
        let metadata = self.discovery.resolve().await?;
        let pending = PendingRequest::generate(self.clock.now());
        let url = authorization_url(&self.config, &metadata, &pending, Prompt::None);

        let params = tokio::time::timeout(
            self.config.silent_refresh_timeout(),
            self.authorizer
                .authorize(&url, self.config.silent_refresh_redirect_uri()),
        )
        .await
        .map_err(|_| Error::RefreshFailure("timed out waiting for the provider".into()))??;

        let response = AuthorizationResponse::parse(&params)?;
        if !pending.matches(response.state.as_deref()) {
            return Err(Error::StateMismatch);
        }
        self.accept_response(&response, &pending).await
    }

    /// Turn a response that belongs to `pending` into a session.
    async fn accept_response(
        &self,
        response: &AuthorizationResponse,
        pending: &PendingRequest,
    ) -> Result<Session, Error> {
        if let Some(error) = response.provider_error() {
            return Err(error);
        }
        let access_token = response
            .access_token
            .clone()
            .ok_or_else(|| Error::Fragment("missing access_token".into()))?;

        let now = self.clock.now();
        let claims = match &response.id_token {
            Some(id_token) => {
                let metadata = self.discovery.resolve().await?;
                let ctx = ValidationContext {
                    issuer: &metadata.issuer,
                    client_id: self.config.client_id(),
                    nonce: &pending.nonce,
                    access_token: Some(&access_token),
                    jwks_uri: &metadata.jwks_uri,
                    now,
                };
                Some(self.validator.validate(id_token, &ctx).await?)
            }
            None if self.config.requests_id_token() => {
                return Err(Error::TokenValidation("missing id_token".into()));
            }
            None => None,
        };

        let expires_at = match response.expires_in {
            Some(secs) => i64::try_from(secs)
                .ok()
                .and_then(|secs| now.checked_add(time::Duration::seconds(secs)))
                .ok_or_else(|| Error::Fragment(format!("expires_in out of range: {secs}")))?,
            // Fall back to the ID token lifetime.
            None => claims
                .as_ref()
                .and_then(|c| c.get("exp"))
                .and_then(serde_json::Value::as_i64)
                .and_then(|exp| OffsetDateTime::from_unix_timestamp(exp).ok())
                .ok_or_else(|| Error::Fragment("missing expires_in".into()))?,
        };
        if expires_at <= now {
            return Err(Error::Fragment("access token is already expired".into()));
        }

        Ok(Session {
            access_token: Some(access_token),
            token_type: response.token_type.clone(),
            id_token: response.id_token.clone(),
            scope: response.scope.clone(),
            expires_at: Some(expires_at),
            claims,
            state: SessionState::Authenticated,
        })
    }

    async fn logout_url(&self, id_token: Option<&str>) -> Result<Option<Url>, Error> {
        if let Some(url) = self.config.render_logout_url(id_token)? {
            return Ok(Some(url));
        }
        let Some(metadata) = self.discovery.cached().await else {
            return Ok(None);
        };
        Ok(metadata.end_session_endpoint.clone().map(|mut url| {
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("client_id", self.config.client_id());
                if let Some(id_token) = id_token {
                    query.append_pair("id_token_hint", id_token);
                }
                query.append_pair(
                    "post_logout_redirect_uri",
                    self.config.redirect_uri().as_str(),
                );
            }
            url
        }))
    }
}
