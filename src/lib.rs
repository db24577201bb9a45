#![doc = include_str!("../README.md")]

pub mod authorize;
pub mod clock;
pub mod config;
pub mod discovery;
pub mod error;
pub mod fragment;
pub mod http;
pub mod nonce;
pub mod resource;
pub mod scheduler;
pub mod session;
pub mod silent;
pub mod store;
pub mod token;
pub mod types;

#[cfg(test)]
mod test_support;

// Re-exports for convenient access
pub use authorize::{AuthorizationRequest, PendingRequest};
pub use clock::{Clock, SystemClock};
pub use config::OidcConfig;
pub use discovery::{DiscoveryResolver, ProviderMetadata, fetch_provider_metadata};
pub use error::Error;
pub use fragment::AuthorizationResponse;
#[cfg(feature = "http")]
pub use http::ReqwestFetcher;
pub use http::{HttpFetcher, HttpResponse};
pub use resource::ResourceServerConfig;
pub use session::{Session, SessionManager};
#[cfg(feature = "http")]
pub use silent::HttpSilentAuthorizer;
pub use silent::SilentAuthorizer;
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore};
#[cfg(feature = "jwks")]
pub use token::JwksValidator;
pub use token::{IdTokenValidator, ValidationContext};
pub use types::{Claims, Nonce, RequestId, SessionState, StateToken};
