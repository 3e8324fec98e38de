//! ID, access and refresh token minting and verification (RS256 JWTs).

use std::sync::Arc;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Header, Validation, decode, decode_header, encode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use crate::config::OAuth2Config;
use crate::entity::{oauth2_client, oauth2_user};
use crate::error::ProtocolError;
use crate::oauth2::claims::{SCOPE_OFFLINE_ACCESS, SCOPE_OPENID, ScopedClaims, has_scope};
use crate::oauth2::clients::GRANT_REFRESH_TOKEN;
use crate::oauth2::keys::{JsonWebKeySet, SigningKey};

/// Clock skew tolerated when checking `exp`, in seconds.
const LEEWAY_SECS: u64 = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token has expired")]
    Expired,
    #[error("token signature is invalid")]
    InvalidSignature,
    #[error("token algorithm is not RS256")]
    InvalidAlgorithm,
    #[error("token issuer mismatch")]
    InvalidIssuer,
    #[error("token audience mismatch")]
    InvalidAudience,
    #[error("unexpected token type")]
    WrongType,
    #[error("token was signed with an unknown key")]
    UnknownKey,
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("failed to sign token: {0}")]
    Signing(String),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                Self::InvalidAlgorithm
            }
            ErrorKind::InvalidIssuer => Self::InvalidIssuer,
            ErrorKind::InvalidAudience => Self::InvalidAudience,
            _ => Self::Malformed(e.to_string()),
        }
    }
}

impl From<TokenError> for ProtocolError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Signing(detail) => ProtocolError::server(detail),
            other => ProtocolError::invalid_token(other.to_string()),
        }
    }
}

/// Discriminates access tokens from refresh tokens so neither is accepted in
/// place of the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub auth_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(flatten)]
    pub claims: ScopedClaims,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub scope: String,
    pub client_id: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub school_id: Option<String>,
}

impl AccessTokenClaims {
    pub fn scopes(&self) -> Vec<String> {
        self.scope.split_whitespace().map(String::from).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenClaims {
    pub iss: String,
    pub sub: String,
    /// The client the refresh token was issued to
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub scope: String,
    pub client_id: String,
    /// Carried forward so refreshed ID tokens keep the original login time
    pub auth_time: i64,
}

impl RefreshTokenClaims {
    pub fn scopes(&self) -> Vec<String> {
        self.scope.split_whitespace().map(String::from).collect()
    }
}

/// Issuer, audiences and default lifetimes (seconds).
#[derive(Debug, Clone)]
pub struct TokenSettings {
    pub issuer: String,
    pub resource_audience: String,
    pub access_token_lifetime: i64,
    pub refresh_token_lifetime: i64,
    pub id_token_lifetime: i64,
}

impl From<&OAuth2Config> for TokenSettings {
    fn from(config: &OAuth2Config) -> Self {
        Self {
            issuer: config.issuer_url.clone(),
            resource_audience: config.resource_audience(),
            access_token_lifetime: config.access_token_lifetime,
            refresh_token_lifetime: config.refresh_token_lifetime,
            id_token_lifetime: config.id_token_lifetime,
        }
    }
}

/// Inputs to an ID token.
#[derive(Debug)]
pub struct IdTokenParams<'a> {
    pub user: &'a oauth2_user::Model,
    pub client_id: &'a str,
    pub scopes: &'a [String],
    pub nonce: Option<&'a str>,
    pub auth_time: OffsetDateTime,
}

/// Everything the token endpoint hands back.
#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub access_token: String,
    pub id_token: Option<String>,
    pub refresh_token: Option<String>,
    /// Claims of the refresh token, so its `jti` can be registered
    pub refresh_claims: Option<RefreshTokenClaims>,
    pub expires_in: i64,
    pub scope: String,
}

#[derive(Clone, Debug)]
pub struct TokenManager {
    key: Arc<SigningKey>,
    settings: TokenSettings,
}

impl TokenManager {
    pub fn new(key: Arc<SigningKey>, settings: TokenSettings) -> Self {
        Self { key, settings }
    }

    pub fn settings(&self) -> &TokenSettings {
        &self.settings
    }

    pub fn jwks(&self) -> JsonWebKeySet {
        self.key.jwks()
    }

    fn sign<T: Serialize>(&self, claims: &T) -> Result<String, TokenError> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.key.kid().to_string());
        encode(&header, claims, self.key.encoding_key())
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    pub fn generate_id_token(
        &self,
        params: IdTokenParams<'_>,
        lifetime: Option<i64>,
    ) -> Result<String, TokenError> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let claims = IdTokenClaims {
            iss: self.settings.issuer.clone(),
            sub: params.user.id.clone(),
            aud: params.client_id.to_string(),
            iat: now,
            exp: now + lifetime.unwrap_or(self.settings.id_token_lifetime),
            auth_time: params.auth_time.unix_timestamp(),
            nonce: params.nonce.map(String::from),
            claims: ScopedClaims::from_user(params.user, params.scopes),
        };
        self.sign(&claims)
    }

    pub fn generate_access_token(
        &self,
        user: &oauth2_user::Model,
        client_id: &str,
        scopes: &[String],
        lifetime: Option<i64>,
    ) -> Result<String, TokenError> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let claims = AccessTokenClaims {
            iss: self.settings.issuer.clone(),
            sub: user.id.clone(),
            aud: self.settings.resource_audience.clone(),
            iat: now,
            exp: now + lifetime.unwrap_or(self.settings.access_token_lifetime),
            jti: uuid::Uuid::new_v4().to_string(),
            token_type: TokenType::Access,
            scope: scopes.join(" "),
            client_id: client_id.to_string(),
            permissions: user.permissions_list(),
            role: user.role.clone(),
            school_id: user.school_id.clone(),
        };
        self.sign(&claims)
    }

    pub fn generate_refresh_token(
        &self,
        user_id: &str,
        client_id: &str,
        scopes: &[String],
        auth_time: OffsetDateTime,
        lifetime: Option<i64>,
    ) -> Result<(String, RefreshTokenClaims), TokenError> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let claims = RefreshTokenClaims {
            iss: self.settings.issuer.clone(),
            sub: user_id.to_string(),
            aud: client_id.to_string(),
            iat: now,
            exp: now + lifetime.unwrap_or(self.settings.refresh_token_lifetime),
            jti: uuid::Uuid::new_v4().to_string(),
            token_type: TokenType::Refresh,
            scope: scopes.join(" "),
            client_id: client_id.to_string(),
            auth_time: auth_time.unix_timestamp(),
        };
        let token = self.sign(&claims)?;
        Ok((token, claims))
    }

    /// Mint the full token set for one grant, all bound to the same `sub`.
    ///
    /// The ID token is only minted for `openid` requests. The refresh token
    /// needs both `offline_access` and a client allowed the `refresh_token` grant.
    pub fn issue_tokens(
        &self,
        user: &oauth2_user::Model,
        client: &oauth2_client::Model,
        scopes: &[String],
        nonce: Option<&str>,
        auth_time: OffsetDateTime,
    ) -> Result<IssuedTokens, TokenError> {
        let expires_in = client
            .access_token_lifetime
            .unwrap_or(self.settings.access_token_lifetime);
        let access_token =
            self.generate_access_token(user, &client.client_id, scopes, Some(expires_in))?;

        let id_token = if has_scope(scopes, SCOPE_OPENID) {
            Some(self.generate_id_token(
                IdTokenParams {
                    user,
                    client_id: &client.client_id,
                    scopes,
                    nonce,
                    auth_time,
                },
                client.id_token_lifetime,
            )?)
        } else {
            None
        };

        let offline = has_scope(scopes, SCOPE_OFFLINE_ACCESS)
            && client.supports_grant_type(GRANT_REFRESH_TOKEN);
        let (refresh_token, refresh_claims) = if offline {
            let (token, claims) = self.generate_refresh_token(
                &user.id,
                &client.client_id,
                scopes,
                auth_time,
                client.refresh_token_lifetime,
            )?;
            (Some(token), Some(claims))
        } else {
            (None, None)
        };

        Ok(IssuedTokens {
            access_token,
            id_token,
            refresh_token,
            refresh_claims,
            expires_in,
            scope: scopes.join(" "),
        })
    }

    fn validation(&self, audience: Option<&str>) -> Validation {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = LEEWAY_SECS;
        validation.set_issuer(&[self.settings.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        match audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }
        validation
    }

    fn decode_with<T: DeserializeOwned>(
        &self,
        token: &str,
        validation: &Validation,
    ) -> Result<T, TokenError> {
        let header = decode_header(token)?;
        if header.alg != Algorithm::RS256 {
            return Err(TokenError::InvalidAlgorithm);
        }
        if header.kid.as_deref().is_some_and(|kid| kid != self.key.kid()) {
            return Err(TokenError::UnknownKey);
        }
        let data = decode::<T>(token, self.key.decoding_key(), validation)?;
        Ok(data.claims)
    }

    /// Verify signature, algorithm, issuer and expiry; audience only when given.
    pub fn verify_token<T: DeserializeOwned>(
        &self,
        token: &str,
        audience: Option<&str>,
    ) -> Result<T, TokenError> {
        self.decode_with(token, &self.validation(audience))
    }

    pub fn verify_access_token(&self, token: &str) -> Result<AccessTokenClaims, TokenError> {
        let claims: AccessTokenClaims =
            self.verify_token(token, Some(&self.settings.resource_audience))?;
        if claims.token_type != TokenType::Access {
            return Err(TokenError::WrongType);
        }
        Ok(claims)
    }

    pub fn verify_refresh_token(
        &self,
        token: &str,
        client_id: &str,
    ) -> Result<RefreshTokenClaims, TokenError> {
        let claims: RefreshTokenClaims = self.verify_token(token, Some(client_id))?;
        if claims.token_type != TokenType::Refresh {
            return Err(TokenError::WrongType);
        }
        Ok(claims)
    }

    pub fn verify_id_token(
        &self,
        token: &str,
        client_id: &str,
    ) -> Result<IdTokenClaims, TokenError> {
        self.verify_token(token, Some(client_id))
    }

    /// `id_token_hint` at logout: signature and issuer must hold, expiry may have passed.
    pub fn verify_id_token_hint(&self, token: &str) -> Result<IdTokenClaims, TokenError> {
        let mut validation = self.validation(None);
        validation.validate_exp = false;
        self.decode_with(token, &validation)
    }
}
