//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use axum_test::TestServer;
use once_cell::sync::Lazy;
use oidc_provider::{
    AppResources,
    api::app,
    config::{AppConfig, OAuth2Config},
    entity::oauth2_user,
    oauth2::{
        OAuth2State,
        clients::{CreatedClient, NewClient},
        keys::SigningKey,
        users::NewUser,
    },
};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbBackend, Statement};

pub const ISSUER: &str = "https://id.example.org";
pub const ADMIN_KEY: &str = "test-admin-key-0123456789abcdef0123";
pub const REDIRECT_URI: &str = "https://acme.example/callback";
pub const LOGOUT_URI: &str = "https://acme.example/signed-out";
pub const PASSWORD: &str = "correct horse battery staple";

/// RSA key generation is slow; every test shares one key.
pub static SIGNING_KEY: Lazy<Arc<SigningKey>> =
    Lazy::new(|| Arc::new(SigningKey::generate("test-key").expect("generate signing key")));

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE oauth2_client (
        client_id TEXT PRIMARY KEY,
        secret_hash TEXT NULL,
        name TEXT NOT NULL,
        redirect_uris TEXT NOT NULL,
        post_logout_redirect_uris TEXT NOT NULL DEFAULT '[]',
        scopes TEXT NOT NULL,
        grant_types TEXT NOT NULL,
        response_types TEXT NOT NULL,
        access_token_lifetime INTEGER NULL,
        refresh_token_lifetime INTEGER NULL,
        id_token_lifetime INTEGER NULL,
        require_pkce INTEGER NOT NULL DEFAULT 0,
        require_consent INTEGER NOT NULL DEFAULT 1,
        trusted INTEGER NOT NULL DEFAULT 0,
        is_confidential INTEGER NOT NULL DEFAULT 1,
        is_active INTEGER NOT NULL DEFAULT 1,
        deleted_at TEXT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );"#,
    r#"CREATE TABLE oauth2_user (
        id TEXT PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        email_verified INTEGER NOT NULL DEFAULT 0,
        password_hash TEXT NULL,
        name TEXT NULL,
        given_name TEXT NULL,
        family_name TEXT NULL,
        picture TEXT NULL,
        phone_number TEXT NULL,
        phone_number_verified INTEGER NOT NULL DEFAULT 0,
        school_id TEXT NULL,
        role TEXT NULL,
        permissions TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        last_login_at TEXT NULL
    );"#,
    r#"CREATE TABLE oauth2_authorization (
        code TEXT PRIMARY KEY,
        client_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        redirect_uri TEXT NOT NULL,
        scope TEXT NOT NULL,
        nonce TEXT NULL,
        code_challenge TEXT NULL,
        code_challenge_method TEXT NULL,
        auth_time TEXT NOT NULL,
        expires_at TEXT NOT NULL,
        used_at TEXT NULL,
        created_at TEXT NOT NULL
    );"#,
    r#"CREATE TABLE oauth2_consent (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        client_id TEXT NOT NULL,
        scope TEXT NOT NULL,
        granted_at TEXT NOT NULL,
        revoked_at TEXT NULL
    );"#,
    r#"CREATE UNIQUE INDEX idx_oauth2_consent_user_client
        ON oauth2_consent (user_id, client_id);"#,
    r#"CREATE TABLE oauth2_session (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        csrf_token TEXT NOT NULL,
        auth_time TEXT NOT NULL,
        expires_at TEXT NOT NULL,
        terminated_at TEXT NULL
    );"#,
    r#"CREATE TABLE oauth2_session_client (
        id TEXT PRIMARY KEY,
        session_id TEXT NOT NULL,
        client_id TEXT NOT NULL,
        created_at TEXT NOT NULL
    );"#,
    r#"CREATE TABLE oauth2_refresh_token (
        jti TEXT PRIMARY KEY,
        client_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        scope TEXT NOT NULL,
        expires_at TEXT NOT NULL,
        revoked_at TEXT NULL,
        created_at TEXT NOT NULL
    );"#,
];

/// In-memory database with every identity provider table.
pub async fn test_db() -> Arc<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await.expect("connect");
    for sql in SCHEMA {
        db.execute(Statement::from_string(DbBackend::Sqlite, *sql))
            .await
            .expect("create table");
    }
    Arc::new(db)
}

pub fn test_config() -> AppConfig {
    let mut oauth2 = OAuth2Config::new(ISSUER);
    oauth2.secure_cookies = false;
    AppConfig {
        database_url: "sqlite::memory:".into(),
        bind_address: "127.0.0.1:0".into(),
        admin_api_key: ADMIN_KEY.into(),
        oauth2,
    }
}

pub async fn test_state() -> OAuth2State {
    state_with_config(&test_config()).await
}

pub async fn state_with_config(config: &AppConfig) -> OAuth2State {
    OAuth2State::new(test_db().await, &config.oauth2, SIGNING_KEY.clone())
}

/// Full application router over `state`.
pub fn test_server(state: &OAuth2State) -> TestServer {
    let resources = AppResources {
        db: state.db.clone(),
        config: Arc::new(test_config()),
    };
    TestServer::new(app(resources, state.clone())).expect("create test server")
}

/// A verified user with a password and a full profile.
pub async fn create_user(state: &OAuth2State, email: &str) -> oauth2_user::Model {
    state
        .users
        .create_user(NewUser {
            email: email.to_string(),
            email_verified: true,
            password: Some(PASSWORD.to_string()),
            name: Some("Ada Lovelace".to_string()),
            given_name: Some("Ada".to_string()),
            family_name: Some("Lovelace".to_string()),
            school_id: Some("school-42".to_string()),
            role: Some("instructor".to_string()),
            permissions: vec!["grades:write".to_string()],
            ..Default::default()
        })
        .await
        .expect("create user")
}

/// Confidential client allowed every scope, with refresh tokens and a
/// post-logout redirect.
pub fn acme_client() -> NewClient {
    let mut client = NewClient::new("Acme LMS", vec![REDIRECT_URI.to_string()]);
    client.post_logout_redirect_uris = vec![LOGOUT_URI.to_string()];
    client.scopes = ["openid", "profile", "email", "school", "offline_access"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    client.grant_types = vec!["authorization_code".into(), "refresh_token".into()];
    client
}

pub async fn register(state: &OAuth2State, client: NewClient) -> CreatedClient {
    state.clients.create(client).await.expect("register client")
}

/// Query parameters of a redirect `Location`.
pub fn location_params(location: &str) -> std::collections::HashMap<String, String> {
    url::Url::parse(location)
        .expect("absolute location")
        .query_pairs()
        .into_owned()
        .collect()
}
