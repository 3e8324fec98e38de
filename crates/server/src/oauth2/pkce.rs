//! PKCE (Proof Key for Code Exchange), RFC 7636.
//!
//! Format checks return [`PkceError`]; the authorization and token endpoints
//! turn those into `invalid_request` and `invalid_grant` respectively.

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::error::ProtocolError;
use crate::oauth2::secret::constant_time_eq;

/// Minimum length for a code verifier or challenge.
pub const MIN_LENGTH: usize = 43;

/// Maximum length for a code verifier or challenge.
pub const MAX_LENGTH: usize = 128;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PkceError {
    #[error("{field} must be between 43 and 128 characters")]
    Length { field: &'static str },
    #[error("{field} contains invalid characters")]
    Charset { field: &'static str },
    #[error("code_challenge_method must be 'S256' or 'plain'")]
    UnsupportedMethod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeChallengeMethod {
    S256,
    Plain,
}

impl CodeChallengeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S256 => "S256",
            Self::Plain => "plain",
        }
    }
}

impl fmt::Display for CodeChallengeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodeChallengeMethod {
    type Err = PkceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "S256" => Ok(Self::S256),
            "plain" => Ok(Self::Plain),
            _ => Err(PkceError::UnsupportedMethod),
        }
    }
}

fn check_length(value: &str, field: &'static str) -> Result<(), PkceError> {
    if (MIN_LENGTH..=MAX_LENGTH).contains(&value.len()) {
        Ok(())
    } else {
        Err(PkceError::Length { field })
    }
}

/// Verifier charset: `[A-Za-z0-9-._~]`.
pub fn validate_code_verifier(verifier: &str) -> Result<(), PkceError> {
    check_length(verifier, "code_verifier")?;
    if verifier
        .bytes()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, b'-' | b'.' | b'_' | b'~'))
    {
        Ok(())
    } else {
        Err(PkceError::Charset {
            field: "code_verifier",
        })
    }
}

/// Challenge charset: base64url without padding, `[A-Za-z0-9-_]`.
pub fn validate_code_challenge(challenge: &str) -> Result<(), PkceError> {
    check_length(challenge, "code_challenge")?;
    if challenge
        .bytes()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, b'-' | b'_'))
    {
        Ok(())
    } else {
        Err(PkceError::Charset {
            field: "code_challenge",
        })
    }
}

/// S256: BASE64URL(SHA256(verifier)); plain: the verifier itself.
pub fn generate_code_challenge(verifier: &str, method: CodeChallengeMethod) -> String {
    match method {
        CodeChallengeMethod::S256 => URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes())),
        CodeChallengeMethod::Plain => verifier.to_string(),
    }
}

/// Recompute the challenge and compare in constant time.
pub fn verify_code_challenge(
    verifier: &str,
    challenge: &str,
    method: CodeChallengeMethod,
) -> bool {
    let computed = generate_code_challenge(verifier, method);
    constant_time_eq(&computed, challenge)
}

/// Random 43-character verifier, for clients and tests.
pub fn generate_code_verifier() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// A challenge accepted at the authorization endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceChallenge {
    pub challenge: String,
    pub method: CodeChallengeMethod,
}

/// Authorization-time checks. A missing method defaults to `plain` (RFC 7636 4.3).
pub fn validate_pkce_auth_params(
    code_challenge: Option<&str>,
    code_challenge_method: Option<&str>,
    required: bool,
) -> Result<Option<PkceChallenge>, ProtocolError> {
    let Some(challenge) = code_challenge else {
        if code_challenge_method.is_some() {
            return Err(ProtocolError::invalid_request(
                "code_challenge_method given without code_challenge",
            ));
        }
        if required {
            return Err(ProtocolError::invalid_request(
                "code_challenge is required for this client",
            ));
        }
        return Ok(None);
    };

    validate_code_challenge(challenge).map_err(|e| ProtocolError::invalid_request(e.to_string()))?;
    let method = code_challenge_method
        .unwrap_or("plain")
        .parse::<CodeChallengeMethod>()
        .map_err(|e| ProtocolError::invalid_request(e.to_string()))?;

    Ok(Some(PkceChallenge {
        challenge: challenge.to_string(),
        method,
    }))
}

/// Token-time checks against what was stored with the authorization code.
pub fn validate_pkce_token_params(
    code_verifier: Option<&str>,
    stored_challenge: Option<&str>,
    stored_method: Option<&str>,
) -> Result<(), ProtocolError> {
    match (stored_challenge, code_verifier) {
        (None, None) => Ok(()),
        (Some(_), None) => Err(ProtocolError::invalid_grant("code_verifier is required")),
        (None, Some(_)) => Err(ProtocolError::invalid_grant(
            "code_verifier supplied but no code_challenge was bound to this code",
        )),
        (Some(challenge), Some(verifier)) => {
            validate_code_verifier(verifier)
                .map_err(|e| ProtocolError::invalid_grant(e.to_string()))?;
            let method = stored_method
                .unwrap_or("plain")
                .parse::<CodeChallengeMethod>()
                .map_err(|_| ProtocolError::server("stored code_challenge_method is corrupt"))?;
            if verify_code_challenge(verifier, challenge, method) {
                Ok(())
            } else {
                Err(ProtocolError::invalid_grant("PKCE verification failed"))
            }
        }
    }
}
