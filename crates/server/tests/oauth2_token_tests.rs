//! Token, refresh, revocation, UserInfo and metadata endpoints.

mod common;

use axum::http::StatusCode;
use axum_test::TestServer;
use common::*;
use oidc_provider::oauth2::{OAuth2State, clients::ClientUpdate, codes::NewAuthorizationCode};
use serde_json::Value;
use time::OffsetDateTime;

struct Fixture {
    state: OAuth2State,
    server: TestServer,
    user_id: String,
    client_id: String,
    client_secret: String,
}

async fn fixture() -> Fixture {
    let state = test_state().await;
    let user = create_user(&state, "ada@school.example").await;
    let created = register(&state, acme_client()).await;
    Fixture {
        server: test_server(&state),
        user_id: user.id,
        client_id: created.client.client_id,
        client_secret: created.client_secret.expect("confidential"),
        state,
    }
}

impl Fixture {
    async fn code(&self, scopes: &[&str]) -> String {
        self.state
            .codes
            .create(NewAuthorizationCode {
                client_id: self.client_id.clone(),
                user_id: self.user_id.clone(),
                redirect_uri: REDIRECT_URI.to_string(),
                scopes: scopes.iter().map(|s| s.to_string()).collect(),
                nonce: None,
                pkce: None,
                auth_time: OffsetDateTime::now_utc(),
            })
            .await
            .unwrap()
    }

    async fn exchange(&self, scopes: &[&str]) -> Value {
        let code = self.code(scopes).await;
        let response = self
            .server
            .post("/oauth2/token")
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code.as_str()),
                ("redirect_uri", REDIRECT_URI),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .await;
        response.assert_status_ok();
        response.json::<Value>()
    }

    async fn refresh(&self, refresh_token: &str, scope: Option<&str>) -> axum_test::TestResponse {
        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        if let Some(scope) = scope {
            form.push(("scope", scope));
        }
        self.server.post("/oauth2/token").form(&form).await
    }
}

#[tokio::test]
async fn refresh_tokens_rotate_and_reuse_revokes_the_family() {
    let f = fixture().await;
    let first = f.exchange(&["openid", "profile", "offline_access"]).await;
    let first_refresh = first["refresh_token"].as_str().unwrap().to_string();

    let rotated = f.refresh(&first_refresh, None).await;
    rotated.assert_status_ok();
    let rotated = rotated.json::<Value>();
    let second_refresh = rotated["refresh_token"].as_str().unwrap().to_string();
    assert_ne!(first_refresh, second_refresh);
    assert!(rotated["id_token"].is_string());

    // Presenting the spent token again is treated as theft
    let reuse = f.refresh(&first_refresh, None).await;
    reuse.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(reuse.json::<Value>()["error"], "invalid_grant");

    let after = f.refresh(&second_refresh, None).await;
    after.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(after.json::<Value>()["error"], "invalid_grant");
}

#[tokio::test]
async fn refresh_may_narrow_but_not_widen_scope() {
    let f = fixture().await;
    let tokens = f.exchange(&["openid", "profile", "offline_access"]).await;
    let refresh_token = tokens["refresh_token"].as_str().unwrap().to_string();

    let wider = f.refresh(&refresh_token, Some("openid email")).await;
    wider.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(wider.json::<Value>()["error"], "invalid_scope");

    let narrower = f.refresh(&refresh_token, Some("openid")).await;
    narrower.assert_status_ok();
    assert_eq!(narrower.json::<Value>()["scope"], "openid");
}

#[tokio::test]
async fn refresh_rejects_scopes_the_client_lost() {
    let f = fixture().await;
    let tokens = f.exchange(&["openid", "email", "offline_access"]).await;
    let refresh_token = tokens["refresh_token"].as_str().unwrap().to_string();

    f.state
        .clients
        .update(
            &f.client_id,
            ClientUpdate {
                scopes: Some(vec!["openid".into(), "offline_access".into()]),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let response = f.refresh(&refresh_token, None).await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["error"], "invalid_scope");

    // The rejected request did not spend the token
    let narrowed = f.refresh(&refresh_token, Some("openid offline_access")).await;
    narrowed.assert_status_ok();
    let narrowed = narrowed.json::<Value>();
    assert_eq!(narrowed["scope"], "openid offline_access");
    assert!(narrowed["refresh_token"].is_string());
}

#[tokio::test]
async fn refresh_token_requires_offline_access() {
    let f = fixture().await;
    let online = f.exchange(&["openid", "profile"]).await;
    assert!(online.get("refresh_token").is_none());
    assert!(online["id_token"].is_string());

    let offline = f.exchange(&["openid", "offline_access"]).await;
    let refresh_token = offline["refresh_token"].as_str().unwrap().to_string();

    // Narrowing away offline_access ends the chain
    let narrowed = f.refresh(&refresh_token, Some("openid")).await;
    narrowed.assert_status_ok();
    assert!(narrowed.json::<Value>().get("refresh_token").is_none());
}

#[tokio::test]
async fn refreshed_id_token_keeps_original_auth_time() {
    let f = fixture().await;
    let tokens = f.exchange(&["openid", "offline_access"]).await;
    let original = f
        .state
        .tokens
        .verify_id_token(tokens["id_token"].as_str().unwrap(), &f.client_id)
        .unwrap();

    let refreshed = f
        .refresh(tokens["refresh_token"].as_str().unwrap(), None)
        .await
        .json::<Value>();
    let renewed = f
        .state
        .tokens
        .verify_id_token(refreshed["id_token"].as_str().unwrap(), &f.client_id)
        .unwrap();
    assert_eq!(renewed.auth_time, original.auth_time);
}

#[tokio::test]
async fn client_authentication_failures() {
    let f = fixture().await;
    let code = f.code(&["openid"]).await;

    let response = f
        .server
        .post("/oauth2/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", REDIRECT_URI),
            ("client_id", f.client_id.as_str()),
            ("client_secret", "wrong"),
        ])
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(response.json::<Value>()["error"], "invalid_client");
    assert!(response.headers().get("www-authenticate").is_some());

    // A confidential client cannot skip its secret
    let response = f
        .server
        .post("/oauth2/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", REDIRECT_URI),
            ("client_id", f.client_id.as_str()),
        ])
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);

    // The failed attempts did not burn the code
    let response = f
        .server
        .post("/oauth2/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", REDIRECT_URI),
            ("client_id", f.client_id.as_str()),
            ("client_secret", f.client_secret.as_str()),
        ])
        .await;
    response.assert_status_ok();
}

#[tokio::test]
async fn unsupported_and_missing_grant_types() {
    let f = fixture().await;
    let response = f
        .server
        .post("/oauth2/token")
        .form(&[
            ("grant_type", "password"),
            ("client_id", f.client_id.as_str()),
            ("client_secret", f.client_secret.as_str()),
        ])
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["error"], "unsupported_grant_type");

    let response = f
        .server
        .post("/oauth2/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("client_id", f.client_id.as_str()),
            ("client_secret", f.client_secret.as_str()),
        ])
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["error"], "invalid_request");
}

#[tokio::test]
async fn no_refresh_token_without_the_grant() {
    let state = test_state().await;
    let user = create_user(&state, "ada@school.example").await;
    let mut client = acme_client();
    client.grant_types = vec!["authorization_code".into()];
    let created = register(&state, client).await;
    let server = test_server(&state);

    let code = state
        .codes
        .create(NewAuthorizationCode {
            client_id: created.client.client_id.clone(),
            user_id: user.id.clone(),
            redirect_uri: REDIRECT_URI.to_string(),
            scopes: vec!["profile".into()],
            nonce: None,
            pkce: None,
            auth_time: OffsetDateTime::now_utc(),
        })
        .await
        .unwrap();
    let response = server
        .post("/oauth2/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", REDIRECT_URI),
            ("client_id", created.client.client_id.as_str()),
            ("client_secret", created.client_secret.as_deref().unwrap()),
        ])
        .await;
    response.assert_status_ok();
    let tokens = response.json::<Value>();
    assert!(tokens.get("refresh_token").is_none());
    // No openid scope, no ID token
    assert!(tokens.get("id_token").is_none());
}

#[tokio::test]
async fn revocation_always_succeeds_and_disables_refresh() {
    let f = fixture().await;
    let tokens = f.exchange(&["openid", "offline_access"]).await;
    let refresh_token = tokens["refresh_token"].as_str().unwrap().to_string();

    let revoke = |token: String| {
        f.server.post("/oauth2/revoke").form(&[
            ("token", token),
            ("client_id", f.client_id.clone()),
            ("client_secret", f.client_secret.clone()),
        ])
    };

    revoke(refresh_token.clone()).await.assert_status_ok();
    revoke(refresh_token.clone()).await.assert_status_ok();
    revoke("not-a-token".to_string()).await.assert_status_ok();

    let response = f.refresh(&refresh_token, None).await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn userinfo_requires_openid_and_an_active_client() {
    let f = fixture().await;

    let missing = f.server.get("/oauth2/userinfo").await;
    missing.assert_status(StatusCode::UNAUTHORIZED);
    assert!(missing.headers().get("www-authenticate").is_some());

    let garbage = f
        .server
        .get("/oauth2/userinfo")
        .authorization_bearer("not.a.jwt")
        .await;
    garbage.assert_status(StatusCode::UNAUTHORIZED);

    let no_openid = f.exchange(&["profile"]).await;
    let response = f
        .server
        .get("/oauth2/userinfo")
        .authorization_bearer(no_openid["access_token"].as_str().unwrap())
        .await;
    response.assert_status(StatusCode::FORBIDDEN);
    assert_eq!(response.json::<Value>()["error"], "insufficient_scope");

    let tokens = f.exchange(&["openid", "email"]).await;
    let access_token = tokens["access_token"].as_str().unwrap().to_string();
    let response = f
        .server
        .post("/oauth2/userinfo")
        .authorization_bearer(&access_token)
        .await;
    response.assert_status_ok();
    let info = response.json::<Value>();
    assert_eq!(info["email"], "ada@school.example");
    assert_eq!(info["email_verified"], true);
    assert!(info.get("name").is_none());

    f.state.clients.set_active(&f.client_id, false).await.unwrap();
    let response = f
        .server
        .get("/oauth2/userinfo")
        .authorization_bearer(&access_token)
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn deleted_client_cannot_obtain_tokens() {
    let f = fixture().await;
    let code = f.code(&["openid"]).await;
    f.state.clients.delete(&f.client_id, false).await.unwrap();

    let response = f
        .server
        .post("/oauth2/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", REDIRECT_URI),
            ("client_id", f.client_id.as_str()),
            ("client_secret", f.client_secret.as_str()),
        ])
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn discovery_and_jwks_are_cacheable() {
    let f = fixture().await;

    let response = f.server.get("/.well-known/openid-configuration").await;
    response.assert_status_ok();
    assert_eq!(
        response.headers().get("cache-control").unwrap(),
        "public, max-age=3600"
    );
    let doc = response.json::<Value>();
    assert_eq!(doc["issuer"], ISSUER);
    assert_eq!(doc["token_endpoint"], format!("{ISSUER}/oauth2/token"));
    assert_eq!(doc["jwks_uri"], format!("{ISSUER}/oauth2/jwks"));
    assert_eq!(doc["end_session_endpoint"], format!("{ISSUER}/oauth2/logout"));
    assert_eq!(doc["code_challenge_methods_supported"][0], "S256");
    assert_eq!(doc["id_token_signing_alg_values_supported"][0], "RS256");

    let response = f.server.get("/oauth2/jwks").await;
    response.assert_status_ok();
    assert!(response.headers().get("cache-control").is_some());
    let jwks = response.json::<Value>();
    assert_eq!(jwks["keys"][0]["kid"], "test-key");
    assert_eq!(jwks["keys"][0]["alg"], "RS256");
    assert_eq!(jwks["keys"][0]["kty"], "RSA");
}
