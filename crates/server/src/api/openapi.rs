//! OpenAPI/Utoipa configuration.

use crate::api::{admin::ADMIN_TAG, health::MISC_TAG};
use crate::oauth2::OAUTH2_TAG;
use crate::oauth2::claims::{
    SCOPE_EMAIL, SCOPE_OFFLINE_ACCESS, SCOPE_OPENID, SCOPE_PHONE, SCOPE_PROFILE, SCOPE_SCHOOL,
};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, OAuth2, Scopes, SecurityScheme},
};

/// Security addon for OpenAPI documentation.
pub struct SecurityAddon;

impl Modify for SecurityAddon {
    #[tracing::instrument(skip(self, openapi))]
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            // RS256 access tokens issued by the token endpoint
            let bearer = HttpBuilder::new()
                .scheme(HttpAuthScheme::Bearer)
                .bearer_format("JWT")
                .description(Some(
                    "Access token obtained from `/oauth2/token`.",
                ))
                .build();
            components.add_security_scheme("bearer_auth", SecurityScheme::Http(bearer));

            let admin = HttpBuilder::new()
                .scheme(HttpAuthScheme::Bearer)
                .description(Some("The configured `admin_api_key`."))
                .build();
            components.add_security_scheme("admin_key", SecurityScheme::Http(admin));

            let oauth2 = OAuth2::new([utoipa::openapi::security::Flow::AuthorizationCode(
                utoipa::openapi::security::AuthorizationCode::new(
                    "/oauth2/authorize",
                    "/oauth2/token",
                    Scopes::from_iter([
                        (SCOPE_OPENID, "OpenID Connect scope"),
                        (SCOPE_PROFILE, "Name and picture"),
                        (SCOPE_EMAIL, "Email address"),
                        (SCOPE_PHONE, "Phone number"),
                        (SCOPE_SCHOOL, "School membership and role"),
                        (SCOPE_OFFLINE_ACCESS, "Refresh tokens"),
                    ]),
                ),
            )]);
            components.add_security_scheme("OAuth2", SecurityScheme::OAuth2(oauth2));
        }
    }
}

/// OpenAPI documentation configuration.
#[derive(OpenApi)]
#[openapi(
    modifiers(&SecurityAddon),
    info(
        title = "OpenID Connect Provider API",
        version = "1.0.0",
        description = "Multi-tenant OpenID Connect identity provider: Authorization Code flow with PKCE, \
                       RS256-signed tokens, consent, sessions and client administration."
    ),
    tags(
        (name = MISC_TAG, description = "Miscellaneous endpoints"),
        (name = OAUTH2_TAG, description = "OAuth2 and OpenID Connect endpoints"),
        (name = ADMIN_TAG, description = "Client and user administration")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_schemes_are_registered() {
        let doc = ApiDoc::openapi();
        let components = doc.components.expect("components");
        for scheme in ["bearer_auth", "admin_key", "OAuth2"] {
            assert!(components.security_schemes.contains_key(scheme), "{scheme}");
        }
    }
}
