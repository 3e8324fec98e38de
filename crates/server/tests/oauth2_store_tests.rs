//! Storage-backed protocol state: codes, clients, consents, sessions and
//! the refresh token registry.

mod common;

use common::*;
use oidc_provider::entity::oauth2_consent;
use oidc_provider::error::ProtocolError;
use oidc_provider::oauth2::{
    clients::{ClientUpdate, RegistryError},
    codes::{AuthorizationCodeStore, NewAuthorizationCode},
    pkce::{CodeChallengeMethod, PkceChallenge, generate_code_challenge, generate_code_verifier},
    secret::verify_secret,
};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use time::OffsetDateTime;

fn new_code(client_id: &str, pkce: Option<PkceChallenge>) -> NewAuthorizationCode {
    NewAuthorizationCode {
        client_id: client_id.to_string(),
        user_id: "user-1".to_string(),
        redirect_uri: REDIRECT_URI.to_string(),
        scopes: vec!["openid".to_string()],
        nonce: Some("n".to_string()),
        pkce,
        auth_time: OffsetDateTime::now_utc(),
    }
}

fn grant_description(result: Result<impl std::fmt::Debug, ProtocolError>) -> String {
    match result {
        Err(ProtocolError::InvalidGrant(description)) => description,
        other => panic!("expected invalid_grant, got {other:?}"),
    }
}

#[tokio::test]
async fn concurrent_exchanges_of_one_code_have_one_winner() {
    let state = test_state().await;
    let code = state.codes.create(new_code("acme", None)).await.unwrap();

    let (a, b) = tokio::join!(
        state
            .codes
            .validate_and_consume(&code, "acme", REDIRECT_URI, None),
        state
            .codes
            .validate_and_consume(&code, "acme", REDIRECT_URI, None),
    );
    assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);

    let third = state
        .codes
        .validate_and_consume(&code, "acme", REDIRECT_URI, None)
        .await;
    assert_eq!(grant_description(third), "Invalid authorization code");
}

#[tokio::test]
async fn expired_code_is_rejected() {
    let state = test_state().await;
    let store = AuthorizationCodeStore::new(state.db.clone(), -1);
    let code = store.create(new_code("acme", None)).await.unwrap();

    let result = store
        .validate_and_consume(&code, "acme", REDIRECT_URI, None)
        .await;
    assert_eq!(grant_description(result), "Authorization code expired");

    assert_eq!(store.cleanup_expired().await.unwrap(), 1);
}

#[tokio::test]
async fn code_bindings_are_checked() {
    let state = test_state().await;
    let code = state.codes.create(new_code("acme", None)).await.unwrap();

    let other_client = state
        .codes
        .validate_and_consume(&code, "mallory", REDIRECT_URI, None)
        .await;
    assert_eq!(grant_description(other_client), "Client mismatch");

    let trailing_slash = state
        .codes
        .validate_and_consume(&code, "acme", &format!("{REDIRECT_URI}/"), None)
        .await;
    assert_eq!(grant_description(trailing_slash), "Redirect URI mismatch");

    let record = state
        .codes
        .validate_and_consume(&code, "acme", REDIRECT_URI, None)
        .await
        .expect("bindings match");
    assert_eq!(record.nonce.as_deref(), Some("n"));
    assert!(record.used_at.is_some());
}

#[tokio::test]
async fn failed_pkce_leaves_the_code_usable() {
    let state = test_state().await;
    let verifier = generate_code_verifier();
    let pkce = PkceChallenge {
        challenge: generate_code_challenge(&verifier, CodeChallengeMethod::S256),
        method: CodeChallengeMethod::S256,
    };
    let code = state.codes.create(new_code("acme", Some(pkce))).await.unwrap();

    let missing = state
        .codes
        .validate_and_consume(&code, "acme", REDIRECT_URI, None)
        .await;
    assert!(matches!(missing, Err(ProtocolError::InvalidGrant(_))));

    let wrong = state
        .codes
        .validate_and_consume(&code, "acme", REDIRECT_URI, Some(&generate_code_verifier()))
        .await;
    assert!(matches!(wrong, Err(ProtocolError::InvalidGrant(_))));

    state
        .codes
        .validate_and_consume(&code, "acme", REDIRECT_URI, Some(&verifier))
        .await
        .expect("correct verifier");
}

#[tokio::test]
async fn client_secret_is_hashed_and_rotated() {
    let state = test_state().await;
    let created = register(&state, acme_client()).await;
    let client_id = created.client.client_id.clone();
    let secret = created.client_secret.expect("confidential client has a secret");

    let stored = state.clients.find_usable(&client_id).await.unwrap().unwrap();
    let hash = stored.secret_hash.expect("hash stored");
    assert_ne!(hash, secret);
    assert!(verify_secret(&secret, &hash));

    assert!(state
        .clients
        .verify_client_credentials(&client_id, &secret)
        .await
        .unwrap()
        .is_some());

    let rotated = state.clients.rotate_secret(&client_id).await.unwrap();
    assert_ne!(rotated, secret);
    assert!(state
        .clients
        .verify_client_credentials(&client_id, &secret)
        .await
        .unwrap()
        .is_none());
    assert!(state
        .clients
        .verify_client_credentials(&client_id, &rotated)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn public_clients_have_no_secret() {
    let state = test_state().await;
    let mut client = acme_client();
    client.is_confidential = false;
    let created = register(&state, client).await;
    assert!(created.client_secret.is_none());

    let rotated = state.clients.rotate_secret(&created.client.client_id).await;
    assert!(matches!(rotated, Err(RegistryError::PublicClient)));
}

#[tokio::test]
async fn credential_check_rejects_every_unusable_client() {
    let state = test_state().await;
    let created = register(&state, acme_client()).await;
    let client_id = created.client.client_id.clone();
    let secret = created.client_secret.expect("confidential client has a secret");

    let mut public = acme_client();
    public.is_confidential = false;
    let public_id = register(&state, public).await.client.client_id;

    let check = |id: String, secret: String| {
        let clients = state.clients.clone();
        async move { clients.verify_client_credentials(&id, &secret).await.unwrap() }
    };

    assert!(check("no-such-client".into(), secret.clone()).await.is_none());
    assert!(check(public_id, String::new()).await.is_none());

    state.clients.set_active(&client_id, false).await.unwrap();
    assert!(check(client_id.clone(), secret.clone()).await.is_none());
    state.clients.set_active(&client_id, true).await.unwrap();
    assert!(check(client_id.clone(), secret.clone()).await.is_some());

    state.clients.delete(&client_id, false).await.unwrap();
    assert!(check(client_id, secret).await.is_none());
}

#[tokio::test]
async fn registration_is_validated() {
    let state = test_state().await;

    let mut fragment = acme_client();
    fragment.redirect_uris = vec!["https://acme.example/cb#frag".into()];
    assert!(matches!(
        state.clients.create(fragment).await,
        Err(RegistryError::Invalid(_))
    ));

    let mut unknown_grant = acme_client();
    unknown_grant.grant_types = vec!["implicit".into()];
    assert!(matches!(
        state.clients.create(unknown_grant).await,
        Err(RegistryError::Invalid(_))
    ));

    let mut no_redirects = acme_client();
    no_redirects.redirect_uris.clear();
    assert!(matches!(
        state.clients.create(no_redirects).await,
        Err(RegistryError::Invalid(_))
    ));
}

#[tokio::test]
async fn client_lifecycle() {
    let state = test_state().await;
    let created = register(&state, acme_client()).await;
    let client_id = created.client.client_id.clone();

    let updated = state
        .clients
        .update(
            &client_id,
            ClientUpdate {
                name: Some("Acme LMS 2".into()),
                trusted: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.name, "Acme LMS 2");
    assert!(updated.trusted);
    assert_eq!(updated.redirect_uris, vec![REDIRECT_URI.to_string()]);

    state.clients.set_active(&client_id, false).await.unwrap();
    assert!(state.clients.find_usable(&client_id).await.unwrap().is_none());
    assert!(state.clients.find(&client_id).await.unwrap().is_some());
    state.clients.set_active(&client_id, true).await.unwrap();
    assert!(state.clients.find_usable(&client_id).await.unwrap().is_some());

    state.clients.delete(&client_id, false).await.unwrap();
    assert!(state.clients.find(&client_id).await.unwrap().is_none());
    let soft = state.clients.get(&client_id).await.unwrap().expect("kept");
    assert!(soft.deleted_at.is_some());
    assert!(!soft.is_active);
    assert_eq!(state.clients.list(false).await.unwrap().len(), 0);
    assert_eq!(state.clients.list(true).await.unwrap().len(), 1);

    state.clients.delete(&client_id, true).await.unwrap();
    assert!(state.clients.get(&client_id).await.unwrap().is_none());
    assert!(matches!(
        state.clients.delete(&client_id, true).await,
        Err(RegistryError::NotFound)
    ));
}

#[tokio::test]
async fn consent_is_a_growing_union_until_revoked() {
    let state = test_state().await;
    let user = create_user(&state, "ada@school.example").await;
    let created = register(&state, acme_client()).await;
    let client = state
        .clients
        .find_usable(&created.client.client_id)
        .await
        .unwrap()
        .unwrap();
    let scopes = |s: &[&str]| s.iter().map(|v| v.to_string()).collect::<Vec<_>>();

    assert!(state
        .consents
        .requires_consent(&client, &user.id, &scopes(&["openid"]))
        .await
        .unwrap());

    state
        .consents
        .grant(&user.id, &client.client_id, &scopes(&["openid", "profile"]))
        .await
        .unwrap();
    let merged = state
        .consents
        .grant(&user.id, &client.client_id, &scopes(&["email"]))
        .await
        .unwrap();
    assert_eq!(merged.scopes_list(), scopes(&["openid", "profile", "email"]));

    assert!(!state
        .consents
        .requires_consent(&client, &user.id, &scopes(&["profile", "email"]))
        .await
        .unwrap());
    assert!(state
        .consents
        .requires_consent(&client, &user.id, &scopes(&["school"]))
        .await
        .unwrap());

    assert!(state.consents.revoke(&user.id, &client.client_id).await.unwrap());
    assert!(!state.consents.revoke(&user.id, &client.client_id).await.unwrap());
    assert!(state
        .consents
        .requires_consent(&client, &user.id, &scopes(&["openid"]))
        .await
        .unwrap());
}

#[tokio::test]
async fn regranting_after_revoke_reuses_the_single_row() {
    let state = test_state().await;
    let user = create_user(&state, "ada@school.example").await;
    let client_id = register(&state, acme_client()).await.client.client_id;
    let scopes = |s: &[&str]| s.iter().map(|v| v.to_string()).collect::<Vec<_>>();

    let first = state
        .consents
        .grant(&user.id, &client_id, &scopes(&["openid", "profile"]))
        .await
        .unwrap();
    assert!(state.consents.revoke(&user.id, &client_id).await.unwrap());

    let second = state
        .consents
        .grant(&user.id, &client_id, &scopes(&["openid", "email"]))
        .await
        .unwrap();
    assert_eq!(second.id, first.id);
    assert!(second.revoked_at.is_none());
    // Revoked scopes are not carried over
    assert_eq!(second.scopes_list(), scopes(&["openid", "email"]));

    let school = scopes(&["school"]);
    let phone = scopes(&["phone"]);
    let (a, b) = tokio::join!(
        state.consents.grant(&user.id, &client_id, &school),
        state.consents.grant(&user.id, &client_id, &phone),
    );
    a.unwrap();
    b.unwrap();

    let rows = oauth2_consent::Entity::find()
        .filter(oauth2_consent::Column::UserId.eq(user.id.as_str()))
        .all(state.db.as_ref())
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(state.consents.list_for_user(&user.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn sessions_terminate_individually_and_per_user() {
    let state = test_state().await;
    let first = state.sessions.create("user-1").await.unwrap();
    let second = state.sessions.create("user-1").await.unwrap();
    let other = state.sessions.create("user-2").await.unwrap();

    state.sessions.link_client(&first.id, "acme").await.unwrap();
    state.sessions.link_client(&first.id, "acme").await.unwrap();
    state.sessions.link_client(&first.id, "globex").await.unwrap();
    let mut linked = state.sessions.rp_clients(&first.id).await.unwrap();
    linked.sort();
    assert_eq!(linked, vec!["acme".to_string(), "globex".to_string()]);

    assert!(state.sessions.terminate(&first.id).await.unwrap());
    assert!(state.sessions.get_active(&first.id).await.unwrap().is_none());
    assert!(state.sessions.rp_clients(&first.id).await.unwrap().is_empty());

    assert_eq!(state.sessions.terminate_all_for_user("user-1").await.unwrap(), 1);
    assert!(state.sessions.get_active(&second.id).await.unwrap().is_none());
    assert!(state.sessions.get_active(&other.id).await.unwrap().is_some());

    state.cleanup_expired().await.unwrap();
    assert!(state.sessions.get_active(&other.id).await.unwrap().is_some());
}

#[tokio::test]
async fn refresh_registry_detects_reuse() {
    let state = test_state().await;
    let (_, claims) = state
        .tokens
        .generate_refresh_token(
            "user-1",
            "acme",
            &["openid".to_string()],
            OffsetDateTime::now_utc(),
            None,
        )
        .unwrap();
    let (_, sibling) = state
        .tokens
        .generate_refresh_token(
            "user-1",
            "acme",
            &["openid".to_string()],
            OffsetDateTime::now_utc(),
            None,
        )
        .unwrap();
    state.refresh_tokens.record(&claims).await.unwrap();
    state.refresh_tokens.record(&sibling).await.unwrap();

    state.refresh_tokens.consume(&claims).await.expect("first use");
    let reuse = state.refresh_tokens.consume(&claims).await;
    assert!(matches!(reuse, Err(ProtocolError::InvalidGrant(_))));

    let sibling_record = state.refresh_tokens.find(&sibling.jti).await.unwrap().unwrap();
    assert!(sibling_record.is_revoked());

    let (_, unknown) = state
        .tokens
        .generate_refresh_token(
            "user-1",
            "acme",
            &["openid".to_string()],
            OffsetDateTime::now_utc(),
            None,
        )
        .unwrap();
    assert!(state.refresh_tokens.consume(&unknown).await.is_err());
}
