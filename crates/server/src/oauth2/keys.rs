//! RSA signing key and its JWKS publication.
//!
//! The private key is loaded (or generated) once at startup and is read-only
//! afterwards, so it is shared across concurrent requests without locking.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{DecodingKey, EncodingKey};
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::pkcs8::DecodePrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// RSA key size in bits for generated keys.
pub const RSA_KEY_SIZE: usize = 2048;

/// Only signing algorithm issued and accepted.
pub const SIGNING_ALGORITHM: &str = "RS256";

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("failed to read signing key {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse signing key: {0}")]
    Parse(String),
    #[error("failed to generate signing key: {0}")]
    Generate(String),
    #[error("failed to encode signing key: {0}")]
    Encode(String),
}

/// JWK (JSON Web Key) representation of the public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct JsonWebKey {
    pub kty: String,
    #[serde(rename = "use")]
    pub key_use: String,
    pub kid: String,
    pub alg: String,
    /// RSA modulus (base64url)
    pub n: String,
    /// RSA exponent (base64url)
    pub e: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct JsonWebKeySet {
    pub keys: Vec<JsonWebKey>,
}

pub struct SigningKey {
    kid: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    jwk: JsonWebKey,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// Generate a fresh key pair. Used when no key file is configured.
    pub fn generate(kid: &str) -> Result<Self, KeyError> {
        let private_key = RsaPrivateKey::new(&mut rand::rngs::OsRng, RSA_KEY_SIZE)
            .map_err(|e| KeyError::Generate(e.to_string()))?;
        Self::from_private_key(kid, &private_key)
    }

    /// Parse a PKCS#8 or PKCS#1 PEM private key.
    pub fn from_pem(kid: &str, pem: &str) -> Result<Self, KeyError> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| KeyError::Parse(e.to_string()))?;
        Self::from_private_key(kid, &private_key)
    }

    pub fn load(kid: &str, path: &str) -> Result<Self, KeyError> {
        let pem = std::fs::read_to_string(path).map_err(|source| KeyError::Io {
            path: path.to_string(),
            source,
        })?;
        Self::from_pem(kid, &pem)
    }

    pub fn from_private_key(kid: &str, private_key: &RsaPrivateKey) -> Result<Self, KeyError> {
        let der = private_key
            .to_pkcs1_der()
            .map_err(|e| KeyError::Encode(e.to_string()))?;
        let encoding_key = EncodingKey::from_rsa_der(der.as_bytes());

        let public_key = RsaPublicKey::from(private_key);
        let jwk = JsonWebKey {
            kty: "RSA".to_string(),
            key_use: "sig".to_string(),
            kid: kid.to_string(),
            alg: SIGNING_ALGORITHM.to_string(),
            n: URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
            e: URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
        };
        // Verification goes through the published components, same as a relying party would.
        let decoding_key = DecodingKey::from_rsa_components(&jwk.n, &jwk.e)
            .map_err(|e| KeyError::Encode(e.to_string()))?;

        Ok(Self {
            kid: kid.to_string(),
            encoding_key,
            decoding_key,
            jwk,
        })
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    pub fn jwk(&self) -> &JsonWebKey {
        &self.jwk
    }

    pub fn jwks(&self) -> JsonWebKeySet {
        JsonWebKeySet {
            keys: vec![self.jwk.clone()],
        }
    }
}
