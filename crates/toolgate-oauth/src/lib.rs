//! Outbound authentication toward upstream servers (SPEC_FULL.md §4.C).
//!
//! Three grants are supported: a static bearer token, OAuth2
//! client-credentials, and OAuth2 authorization-code with PKCE. All three
//! implement [`AuthProvider`], so the transport layer and proxy coordinator
//! never need to know which one backs a given upstream.

pub mod authz_state;
pub mod error;
pub mod pkce;
pub mod provider;
pub mod token;

pub use authz_state::{AuthorizationStateTable, PendingAuthorization};
pub use error::AuthenticationError;
pub use pkce::PkceChallenge;
pub use provider::{
    AudienceValidator, AuthProvider, BearerAuthProvider, ClientCredentialsAuthProvider, CodePkceAuthProvider,
};
pub use token::{TokenRecord, TokenStore, DEFAULT_REFRESH_SKEW_SECS};
