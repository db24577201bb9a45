use std::future::Future;

use serde_json::{Map, Value as JsonValue};
use time::OffsetDateTime;
use url::Url;

use crate::error::Error;
use crate::nonce::access_token_hash;
use crate::types::{Claims, Nonce};

/// Tolerated clock difference between client and provider, in seconds.
pub const CLOCK_LEEWAY_SECS: i64 = 60;

/// What an ID token is checked against.
#[derive(Debug, Clone)]
pub struct ValidationContext<'a> {
    pub issuer: &'a str,
    pub client_id: &'a str,
    pub nonce: &'a Nonce,
    /// Access token from the same response, for the `at_hash` check.
    pub access_token: Option<&'a str>,
    pub jwks_uri: &'a Url,
    pub now: OffsetDateTime,
}

/// Verifies an ID token and returns its claims.
pub trait IdTokenValidator: Send + Sync + 'static {
    fn validate(
        &self,
        id_token: &str,
        ctx: &ValidationContext<'_>,
    ) -> impl Future<Output = Result<Claims, Error>> + Send;
}

/// OIDC claim checks on an already signature-verified payload.
///
/// # Errors
///
/// Returns [`Error::TokenValidation`] naming the first failed check.
pub fn verify_claims(
    claims: &Map<String, JsonValue>,
    ctx: &ValidationContext<'_>,
) -> Result<(), Error> {
    let fail = |msg: String| Err(Error::TokenValidation(msg));

    // Validate issuer
    let iss = claims
        .get("iss")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| Error::TokenValidation("missing claim: iss".into()))?;
    if iss.trim_end_matches('/') != ctx.issuer.trim_end_matches('/') {
        return fail(format!("iss: expected '{}', got '{iss}'", ctx.issuer));
    }

    // Validate audience (string or array)
    let audiences: Vec<&str> = match claims.get("aud") {
        Some(JsonValue::String(aud)) => vec![aud.as_str()],
        Some(JsonValue::Array(values)) => values.iter().filter_map(JsonValue::as_str).collect(),
        _ => return fail("missing claim: aud".into()),
    };
    if !audiences.contains(&ctx.client_id) {
        return fail(format!("aud: '{}' is not an audience", ctx.client_id));
    }

    // Validate authorized party
    let azp = claims.get("azp").and_then(JsonValue::as_str);
    match azp {
        Some(azp) if azp != ctx.client_id => {
            return fail(format!("azp: expected '{}', got '{azp}'", ctx.client_id));
        }
        None if audiences.len() > 1 => {
            return fail("missing claim: azp (required with multiple audiences)".into());
        }
        _ => {}
    }

    // Validate nonce
    let nonce = claims
        .get("nonce")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| Error::TokenValidation("missing claim: nonce".into()))?;
    if nonce != ctx.nonce.as_str() {
        return fail("nonce mismatch".into());
    }

    // Validate time-based claims
    let now = ctx.now.unix_timestamp();
    let exp = claims
        .get("exp")
        .and_then(JsonValue::as_i64)
        .ok_or_else(|| Error::TokenValidation("missing claim: exp".into()))?;
    if exp + CLOCK_LEEWAY_SECS <= now {
        return fail("token has expired".into());
    }
    if let Some(iat) = claims.get("iat").and_then(JsonValue::as_i64) {
        if iat > now + CLOCK_LEEWAY_SECS {
            return fail("token issued in the future (iat claim)".into());
        }
    }

    // Validate access token hash
    if let (Some(at_hash), Some(access_token)) = (
        claims.get("at_hash").and_then(JsonValue::as_str),
        ctx.access_token,
    ) {
        if at_hash != access_token_hash(access_token) {
            return fail("at_hash does not match access token".into());
        }
    }

    Ok(())
}

#[cfg(feature = "jwks")]
pub use jwks::JwksValidator;

#[cfg(feature = "jwks")]
mod jwks {
    use std::sync::Arc;

    use jsonwebtoken::jwk::JwkSet;
    use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
    use serde_json::{Map, Value as JsonValue};
    use tokio::sync::Mutex;
    use url::Url;

    use super::{IdTokenValidator, ValidationContext, verify_claims};
    use crate::error::Error;
    use crate::http::HttpFetcher;
    use crate::types::Claims;

    /// [`IdTokenValidator`] that verifies signatures against the provider's JWKS.
    ///
    /// The key set is cached per `jwks_uri` and refetched once when a token
    /// names an unknown `kid` (key rotation).
    pub struct JwksValidator<H> {
        http: H,
        cache: Mutex<Option<(Url, Arc<JwkSet>)>>,
    }

    impl<H: HttpFetcher> JwksValidator<H> {
        #[must_use]
        pub fn new(http: H) -> Self {
            Self {
                http,
                cache: Mutex::new(None),
            }
        }

        async fn key_set(&self, jwks_uri: &Url, force: bool) -> Result<Arc<JwkSet>, Error> {
            let mut cache = self.cache.lock().await;
            if !force {
                if let Some((uri, set)) = cache.as_ref() {
                    if uri == jwks_uri {
                        return Ok(Arc::clone(set));
                    }
                }
            }

            let response = self
                .http
                .get(jwks_uri)
                .await
                .map_err(|e| Error::TokenValidation(format!("failed to fetch JWKS: {e}")))?;
            if !response.is_success() {
                return Err(Error::TokenValidation(format!(
                    "failed to fetch JWKS: HTTP {}",
                    response.status
                )));
            }
            let set: JwkSet = response
                .json()
                .map_err(|e| Error::TokenValidation(format!("invalid JWKS: {e}")))?;

            let set = Arc::new(set);
            *cache = Some((jwks_uri.clone(), Arc::clone(&set)));
            tracing::debug!(jwks_uri = %jwks_uri, keys = set.keys.len(), "Loaded JWKS");
            Ok(set)
        }

        fn select_key(set: &JwkSet, kid: Option<&str>) -> Option<DecodingKey> {
            let jwk = match kid {
                Some(kid) => set.find(kid)?,
                None if set.keys.len() == 1 => &set.keys[0],
                None => return None,
            };
            DecodingKey::from_jwk(jwk).ok()
        }
    }

    impl<H: HttpFetcher> IdTokenValidator for JwksValidator<H> {
        async fn validate(
            &self,
            id_token: &str,
            ctx: &ValidationContext<'_>,
        ) -> Result<Claims, Error> {
            let header = decode_header(id_token)
                .map_err(|e| Error::TokenValidation(format!("invalid JWT header: {e}")))?;
            let kid = header.kid.as_deref();

            let set = self.key_set(ctx.jwks_uri, false).await?;
            let key = match Self::select_key(&set, kid) {
                Some(key) => key,
                None => {
                    tracing::debug!(kid = ?kid, "Signing key not in cached JWKS, refetching");
                    let set = self.key_set(ctx.jwks_uri, true).await?;
                    Self::select_key(&set, kid).ok_or_else(|| {
                        Error::TokenValidation(format!("key {kid:?} not found in JWKS"))
                    })?
                }
            };

            decode_verified(id_token, &key, header.alg, ctx)
        }
    }

    /// Verify the signature with `key`, then run the OIDC claim checks.
    pub(super) fn decode_verified(
        id_token: &str,
        key: &DecodingKey,
        alg: Algorithm,
        ctx: &ValidationContext<'_>,
    ) -> Result<Claims, Error> {
        // Time and audience claims are checked by verify_claims against the
        // injected clock, not by jsonwebtoken against the system time.
        let mut validation = Validation::new(alg);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;

        let data = decode::<Map<String, JsonValue>>(id_token, key, &validation)
            .map_err(|e| Error::TokenValidation(format!("signature verification failed: {e}")))?;

        verify_claims(&data.claims, ctx)?;
        Ok(Claims::new(data.claims))
    }
}
