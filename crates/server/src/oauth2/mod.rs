//! OpenID Connect Identity Provider.
//!
//! ## Supported Flows
//!
//! - Authorization Code with PKCE (S256 or plain)
//! - Refresh Token with rotation and reuse detection
//!
//! ## Endpoints
//!
//! - `GET /oauth2/authorize` - Authorization endpoint
//! - `POST /oauth2/token` - Token endpoint
//! - `POST /oauth2/revoke` - Token revocation
//! - `GET|POST /oauth2/userinfo` - OpenID Connect UserInfo
//! - `GET /oauth2/jwks` - JSON Web Key Set
//! - `GET|POST /oauth2/logout` - RP-Initiated Logout
//! - `GET|POST /oauth2/login`, `GET|POST /oauth2/consent` - Browser pages
//! - `GET /.well-known/openid-configuration` - OpenID Connect Discovery

pub mod claims;
pub mod clients;
pub mod codes;
pub mod consent;
pub mod consents;
pub mod endpoints;
pub mod keys;
pub mod login;
pub mod logout;
pub mod pkce;
pub mod refresh;
pub mod secret;
pub mod sessions;
mod state;
pub mod tokens;
pub mod users;
mod views;

use utoipa_axum::{router::OpenApiRouter, routes};

pub use state::OAuth2State;

/// OpenAPI tag for OAuth2 endpoints
pub const OAUTH2_TAG: &str = "OAuth2";

/// Every protocol endpoint and browser page, mounted at their absolute paths.
pub fn router(state: OAuth2State) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(endpoints::authorize))
        .routes(routes!(endpoints::token))
        .routes(routes!(endpoints::revoke))
        .routes(routes!(endpoints::userinfo, endpoints::userinfo_post))
        .routes(routes!(endpoints::jwks))
        .routes(routes!(endpoints::openid_configuration))
        .routes(routes!(login::login_page, login::login_submit))
        .routes(routes!(consent::consent_page, consent::consent_submit))
        .routes(routes!(logout::end_session, logout::end_session_post))
        .with_state(state)
}
