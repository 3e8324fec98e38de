//! Browser-facing Authorization Code flow: authorize, login, consent and
//! the code exchange that follows.

mod common;

use axum::http::StatusCode;
use axum_extra::extract::cookie::Cookie;
use common::*;
use oidc_provider::oauth2::{
    pkce::{CodeChallengeMethod, generate_code_challenge, generate_code_verifier},
    sessions::SESSION_COOKIE,
};
use serde_json::Value;

fn location(response: &axum_test::TestResponse) -> String {
    response
        .headers()
        .get("location")
        .expect("location header")
        .to_str()
        .expect("ascii location")
        .to_string()
}

fn session_cookie(id: &str) -> Cookie<'static> {
    Cookie::new(SESSION_COOKIE, id.to_string())
}

#[tokio::test]
async fn acme_end_to_end_with_consent_and_pkce() {
    let state = test_state().await;
    let user = create_user(&state, "ada@school.example").await;
    let created = register(&state, acme_client()).await;
    let client_id = created.client.client_id.clone();
    let client_secret = created.client_secret.clone().expect("confidential");
    let session = state.sessions.create(&user.id).await.unwrap();
    let server = test_server(&state);

    let verifier = generate_code_verifier();
    let challenge = generate_code_challenge(&verifier, CodeChallengeMethod::S256);

    // First visit: no consent on record yet
    let response = server
        .get("/oauth2/authorize")
        .add_query_param("response_type", "code")
        .add_query_param("client_id", &client_id)
        .add_query_param("redirect_uri", REDIRECT_URI)
        .add_query_param("scope", "openid profile email school offline_access")
        .add_query_param("state", "xyz")
        .add_query_param("nonce", "n-0S6_WzA2Mj")
        .add_query_param("code_challenge", &challenge)
        .add_query_param("code_challenge_method", "S256")
        .add_cookie(session_cookie(&session.id))
        .await;
    response.assert_status_see_other();
    let consent_url = location(&response);
    assert!(consent_url.starts_with("/oauth2/consent?"), "{consent_url}");

    let page = server
        .get(&consent_url)
        .add_cookie(session_cookie(&session.id))
        .await;
    page.assert_status_ok();
    let html = page.text();
    assert!(html.contains("Acme LMS"));
    assert!(html.contains("ada@school.example"));
    assert!(html.contains(&session.csrf_token));

    let response = server
        .post("/oauth2/consent")
        .add_cookie(session_cookie(&session.id))
        .form(&[
            ("csrf_token", session.csrf_token.as_str()),
            ("action", "approve"),
            ("client_id", client_id.as_str()),
            ("redirect_uri", REDIRECT_URI),
            ("scope", "openid profile email school offline_access"),
            ("state", "xyz"),
            ("nonce", "n-0S6_WzA2Mj"),
            ("code_challenge", challenge.as_str()),
            ("code_challenge_method", "S256"),
        ])
        .await;
    response.assert_status_see_other();
    let resume = location(&response);
    assert!(resume.starts_with("/oauth2/authorize?"), "{resume}");

    let response = server
        .get(&resume)
        .add_cookie(session_cookie(&session.id))
        .await;
    response.assert_status_see_other();
    let callback = location(&response);
    assert!(callback.starts_with(REDIRECT_URI));
    let params = location_params(&callback);
    assert_eq!(params.get("state").map(String::as_str), Some("xyz"));
    let code = params.get("code").expect("code").clone();

    let response = server
        .post("/oauth2/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", REDIRECT_URI),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("code_verifier", verifier.as_str()),
        ])
        .await;
    response.assert_status_ok();
    assert_eq!(
        response.headers().get("cache-control").unwrap(),
        "no-store"
    );
    let tokens = response.json::<Value>();
    assert_eq!(tokens["token_type"], "Bearer");
    assert!(tokens["refresh_token"].is_string());
    assert_eq!(
        tokens["scope"],
        "openid profile email school offline_access"
    );

    let id_token = state
        .tokens
        .verify_id_token(tokens["id_token"].as_str().unwrap(), &client_id)
        .expect("valid id token");
    assert_eq!(id_token.sub, user.id);
    assert_eq!(id_token.nonce.as_deref(), Some("n-0S6_WzA2Mj"));
    assert_eq!(id_token.iss, ISSUER);

    let access_token = tokens["access_token"].as_str().unwrap();
    let claims = state.tokens.verify_access_token(access_token).unwrap();
    assert_eq!(claims.aud, format!("{ISSUER}/api"));
    assert_eq!(claims.school_id.as_deref(), Some("school-42"));
    assert_eq!(claims.permissions, vec!["grades:write".to_string()]);

    let info = server
        .get("/oauth2/userinfo")
        .authorization_bearer(access_token)
        .await;
    info.assert_status_ok();
    let info = info.json::<Value>();
    assert_eq!(info["sub"], user.id.as_str());
    assert_eq!(info["email"], "ada@school.example");
    assert_eq!(info["given_name"], "Ada");
    assert_eq!(info["school_id"], "school-42");
    assert!(info.get("phone_number").is_none());

    // The code is single use
    let replay = server
        .post("/oauth2/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", REDIRECT_URI),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("code_verifier", verifier.as_str()),
        ])
        .await;
    replay.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(replay.json::<Value>()["error"], "invalid_grant");

    // Consent is remembered for the next request
    let again = server
        .get("/oauth2/authorize")
        .add_query_param("response_type", "code")
        .add_query_param("client_id", &client_id)
        .add_query_param("redirect_uri", REDIRECT_URI)
        .add_query_param("scope", "openid email")
        .add_cookie(session_cookie(&session.id))
        .await;
    again.assert_status_see_other();
    assert!(location(&again).starts_with(REDIRECT_URI));
}

#[tokio::test]
async fn trusted_client_skips_consent() {
    let state = test_state().await;
    let user = create_user(&state, "grace@school.example").await;
    let mut client = acme_client();
    client.trusted = true;
    let created = register(&state, client).await;
    let session = state.sessions.create(&user.id).await.unwrap();
    let server = test_server(&state);

    let response = server
        .get("/oauth2/authorize")
        .add_query_param("response_type", "code")
        .add_query_param("client_id", &created.client.client_id)
        .add_query_param("redirect_uri", REDIRECT_URI)
        .add_query_param("scope", "openid profile")
        .add_cookie(session_cookie(&session.id))
        .await;
    response.assert_status_see_other();
    let params = location_params(&location(&response));
    assert!(params.contains_key("code"));
    assert!(!params.contains_key("state"));

    let linked = state.sessions.rp_clients(&session.id).await.unwrap();
    assert_eq!(linked, vec![created.client.client_id.clone()]);
}

#[tokio::test]
async fn missing_session_redirects_to_login() {
    let state = test_state().await;
    let created = register(&state, acme_client()).await;
    let server = test_server(&state);

    let response = server
        .get("/oauth2/authorize")
        .add_query_param("response_type", "code")
        .add_query_param("client_id", &created.client.client_id)
        .add_query_param("redirect_uri", REDIRECT_URI)
        .add_query_param("scope", "openid")
        .await;
    response.assert_status_see_other();
    let login = location(&response);
    assert!(login.starts_with("/oauth2/login?return_to=%2Foauth2%2Fauthorize%3F"), "{login}");
}

#[tokio::test]
async fn prompt_none_reports_login_and_consent_required() {
    let state = test_state().await;
    let user = create_user(&state, "alan@school.example").await;
    let created = register(&state, acme_client()).await;
    let server = test_server(&state);

    let response = server
        .get("/oauth2/authorize")
        .add_query_param("response_type", "code")
        .add_query_param("client_id", &created.client.client_id)
        .add_query_param("redirect_uri", REDIRECT_URI)
        .add_query_param("scope", "openid")
        .add_query_param("state", "s1")
        .add_query_param("prompt", "none")
        .await;
    response.assert_status_see_other();
    let params = location_params(&location(&response));
    assert_eq!(params["error"], "login_required");
    assert_eq!(params["state"], "s1");

    let session = state.sessions.create(&user.id).await.unwrap();
    let response = server
        .get("/oauth2/authorize")
        .add_query_param("response_type", "code")
        .add_query_param("client_id", &created.client.client_id)
        .add_query_param("redirect_uri", REDIRECT_URI)
        .add_query_param("scope", "openid")
        .add_query_param("prompt", "none")
        .add_cookie(session_cookie(&session.id))
        .await;
    response.assert_status_see_other();
    let params = location_params(&location(&response));
    assert_eq!(params["error"], "consent_required");
}

#[tokio::test]
async fn untrusted_redirect_uri_is_never_followed() {
    let state = test_state().await;
    let created = register(&state, acme_client()).await;
    let server = test_server(&state);

    // A trailing slash is a different URI
    let response = server
        .get("/oauth2/authorize")
        .add_query_param("response_type", "code")
        .add_query_param("client_id", &created.client.client_id)
        .add_query_param("redirect_uri", &format!("{REDIRECT_URI}/"))
        .add_query_param("scope", "openid")
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert!(response.headers().get("location").is_none());
    assert_eq!(response.json::<Value>()["error"], "invalid_request");

    let response = server
        .get("/oauth2/authorize")
        .add_query_param("response_type", "code")
        .add_query_param("client_id", "no-such-client")
        .add_query_param("redirect_uri", REDIRECT_URI)
        .add_query_param("scope", "openid")
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["error"], "invalid_client");
}

#[tokio::test]
async fn request_errors_are_redirected_once_client_is_trusted() {
    let state = test_state().await;
    let mut public = acme_client();
    public.is_confidential = false;
    let created = register(&state, public).await;
    let server = test_server(&state);

    let base = |server: &axum_test::TestServer| {
        server
            .get("/oauth2/authorize")
            .add_query_param("client_id", &created.client.client_id)
            .add_query_param("redirect_uri", REDIRECT_URI)
            .add_query_param("state", "abc")
    };

    let response = base(&server)
        .add_query_param("response_type", "token")
        .add_query_param("scope", "openid")
        .await;
    let params = location_params(&location(&response));
    assert_eq!(params["error"], "unsupported_response_type");
    assert_eq!(params["state"], "abc");

    let response = base(&server)
        .add_query_param("response_type", "code")
        .add_query_param("scope", "openid phone")
        .await;
    assert_eq!(location_params(&location(&response))["error"], "invalid_scope");

    // Public clients must use PKCE
    let response = base(&server)
        .add_query_param("response_type", "code")
        .add_query_param("scope", "openid")
        .await;
    assert_eq!(location_params(&location(&response))["error"], "invalid_request");
}

#[tokio::test]
async fn consent_denial_and_csrf() {
    let state = test_state().await;
    let user = create_user(&state, "barbara@school.example").await;
    let created = register(&state, acme_client()).await;
    let client_id = created.client.client_id.clone();
    let session = state.sessions.create(&user.id).await.unwrap();
    let server = test_server(&state);

    let forged = server
        .post("/oauth2/consent")
        .add_cookie(session_cookie(&session.id))
        .form(&[
            ("csrf_token", "forged"),
            ("action", "approve"),
            ("client_id", client_id.as_str()),
            ("redirect_uri", REDIRECT_URI),
            ("scope", "openid"),
        ])
        .await;
    forged.assert_status(StatusCode::FORBIDDEN);
    assert!(state.consents.find(&user.id, &client_id).await.unwrap().is_none());

    let denied = server
        .post("/oauth2/consent")
        .add_cookie(session_cookie(&session.id))
        .form(&[
            ("csrf_token", session.csrf_token.as_str()),
            ("action", "deny"),
            ("client_id", client_id.as_str()),
            ("redirect_uri", REDIRECT_URI),
            ("scope", "openid"),
            ("state", "st"),
        ])
        .await;
    denied.assert_status_see_other();
    let params = location_params(&location(&denied));
    assert_eq!(params["error"], "access_denied");
    assert_eq!(params["state"], "st");
    assert!(state.consents.find(&user.id, &client_id).await.unwrap().is_none());
}

#[tokio::test]
async fn login_page_starts_a_session() {
    let state = test_state().await;
    create_user(&state, "katherine@school.example").await;
    let server = test_server(&state);
    let return_to = "/oauth2/authorize?response_type=code&client_id=acme";

    let page = server
        .get("/oauth2/login")
        .add_query_param("return_to", return_to)
        .await;
    page.assert_status_ok();
    assert!(page.text().contains("name=\"password\""));

    let wrong = server
        .post("/oauth2/login")
        .form(&[
            ("email", "katherine@school.example"),
            ("password", "wrong"),
            ("return_to", return_to),
        ])
        .await;
    wrong.assert_status(StatusCode::UNAUTHORIZED);
    assert!(wrong.text().contains("Invalid email or password"));

    let ok = server
        .post("/oauth2/login")
        .form(&[
            ("email", "Katherine@School.example"),
            ("password", PASSWORD),
            ("return_to", return_to),
        ])
        .await;
    ok.assert_status_see_other();
    assert_eq!(location(&ok), return_to);
    let cookie = ok.cookie(SESSION_COOKIE);
    assert_eq!(cookie.http_only(), Some(true));
    let session = state
        .sessions
        .get_active(cookie.value())
        .await
        .unwrap()
        .expect("active session");
    let user = state.users.find_by_id(&session.user_id).await.unwrap().unwrap();
    assert!(user.last_login_at.is_some());
}

#[tokio::test]
async fn login_rejects_open_redirects_and_unverified_users() {
    let state = test_state().await;
    state
        .users
        .create_user(oidc_provider::oauth2::users::NewUser {
            email: "unverified@school.example".into(),
            password: Some(PASSWORD.into()),
            ..Default::default()
        })
        .await
        .unwrap();
    create_user(&state, "dorothy@school.example").await;
    let server = test_server(&state);

    let unverified = server
        .post("/oauth2/login")
        .form(&[
            ("email", "unverified@school.example"),
            ("password", PASSWORD),
            ("return_to", "/oauth2/authorize?x=1"),
        ])
        .await;
    unverified.assert_status(StatusCode::UNAUTHORIZED);
    assert!(unverified.text().contains("verify your email"));

    let external = server
        .post("/oauth2/login")
        .form(&[
            ("email", "dorothy@school.example"),
            ("password", PASSWORD),
            ("return_to", "https://evil.example/"),
        ])
        .await;
    external.assert_status_ok();
    assert!(external.headers().get("location").is_none());
    assert!(external.text().contains("You are signed in"));
}
