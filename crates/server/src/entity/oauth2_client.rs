//! OAuth2 Client entity - registered Relying Parties.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::split_list;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "oauth2_client")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub client_id: String,
    /// PBKDF2 hash of the client secret (None for public clients)
    #[serde(skip_serializing)]
    pub secret_hash: Option<String>,
    /// Human-readable client name
    pub name: String,
    /// JSON array of allowed redirect URIs
    pub redirect_uris: String,
    /// JSON array of allowed post-logout redirect URIs
    pub post_logout_redirect_uris: String,
    /// Space-separated list of allowed scopes
    pub scopes: String,
    /// Space-separated list of allowed grant types
    pub grant_types: String,
    /// Space-separated list of allowed response types
    pub response_types: String,
    pub access_token_lifetime: Option<i64>,
    pub refresh_token_lifetime: Option<i64>,
    pub id_token_lifetime: Option<i64>,
    pub require_pkce: bool,
    pub require_consent: bool,
    /// First-party client, never shown the consent screen
    pub trusted: bool,
    pub is_confidential: bool,
    pub is_active: bool,
    pub deleted_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Parse redirect URIs from JSON string
    pub fn redirect_uris_list(&self) -> Vec<String> {
        serde_json::from_str(&self.redirect_uris).unwrap_or_default()
    }

    pub fn post_logout_redirect_uris_list(&self) -> Vec<String> {
        serde_json::from_str(&self.post_logout_redirect_uris).unwrap_or_default()
    }

    pub fn scopes_list(&self) -> Vec<String> {
        split_list(&self.scopes)
    }

    pub fn grant_types_list(&self) -> Vec<String> {
        split_list(&self.grant_types)
    }

    pub fn response_types_list(&self) -> Vec<String> {
        split_list(&self.response_types)
    }

    /// Active and not soft-deleted.
    pub fn is_usable(&self) -> bool {
        self.is_active && self.deleted_at.is_none()
    }

    /// Exact, byte-for-byte match against the registered redirect URIs.
    pub fn validate_redirect_uri(&self, uri: &str) -> bool {
        self.redirect_uris_list().iter().any(|allowed| allowed == uri)
    }

    pub fn validate_post_logout_redirect_uri(&self, uri: &str) -> bool {
        self.post_logout_redirect_uris_list()
            .iter()
            .any(|allowed| allowed == uri)
    }

    /// True only if every requested scope is registered for this client.
    pub fn can_request_scope<S: AsRef<str>>(&self, requested: &[S]) -> bool {
        let allowed = self.scopes_list();
        requested
            .iter()
            .all(|s| allowed.iter().any(|a| a == s.as_ref()))
    }

    pub fn supports_grant_type(&self, grant_type: &str) -> bool {
        self.grant_types_list().iter().any(|g| g == grant_type)
    }

    pub fn supports_response_type(&self, response_type: &str) -> bool {
        self.response_types_list().iter().any(|r| r == response_type)
    }

    /// Public clients always need PKCE, confidential ones only when configured.
    pub fn pkce_required(&self) -> bool {
        self.require_pkce || !self.is_confidential
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> Model {
        let now = OffsetDateTime::now_utc();
        Model {
            client_id: "acme".into(),
            secret_hash: Some("$pbkdf2-sha256$...".into()),
            name: "Acme".into(),
            redirect_uris: r#"["https://acme.example/cb"]"#.into(),
            post_logout_redirect_uris: r#"["https://acme.example/bye"]"#.into(),
            scopes: "openid profile email".into(),
            grant_types: "authorization_code refresh_token".into(),
            response_types: "code".into(),
            access_token_lifetime: None,
            refresh_token_lifetime: None,
            id_token_lifetime: None,
            require_pkce: false,
            require_consent: true,
            trusted: false,
            is_confidential: true,
            is_active: true,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn redirect_uri_requires_exact_match() {
        let c = client();
        assert!(c.validate_redirect_uri("https://acme.example/cb"));
        assert!(!c.validate_redirect_uri("https://acme.example/cb/"));
        assert!(!c.validate_redirect_uri("https://acme.example/cb?x=1"));
        assert!(!c.validate_redirect_uri("https://acme.example"));
    }

    #[test]
    fn scope_check_fails_closed() {
        let c = client();
        assert!(c.can_request_scope(&["openid", "email"]));
        assert!(!c.can_request_scope(&["openid", "phone"]));
        assert!(c.can_request_scope::<&str>(&[]));
    }

    #[test]
    fn capability_predicates() {
        let mut c = client();
        assert!(c.supports_grant_type("refresh_token"));
        assert!(!c.supports_grant_type("client_credentials"));
        assert!(c.supports_response_type("code"));
        assert!(!c.supports_response_type("token"));
        assert!(!c.pkce_required());
        c.is_confidential = false;
        assert!(c.pkce_required());
    }

    #[test]
    fn serialization_never_includes_secret_hash() {
        let json = serde_json::to_value(client()).unwrap();
        assert!(json.get("secret_hash").is_none());
    }

    #[test]
    fn soft_deleted_client_is_unusable() {
        let mut c = client();
        assert!(c.is_usable());
        c.deleted_at = Some(OffsetDateTime::now_utc());
        assert!(!c.is_usable());
    }
}
