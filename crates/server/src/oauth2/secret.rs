//! Secret hashing, comparison and generation.
//!
//! Passwords and client secrets are stored as salted PBKDF2-SHA256 hashes in
//! PHC string format. Verification re-derives the full digest and compares it
//! in constant time.

use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use pbkdf2::{
    Params, Pbkdf2,
    password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use rand::RngCore;
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;

/// Fixed PBKDF2 iteration count for newly created hashes.
pub const PBKDF2_ROUNDS: u32 = 100_000;

const SALT_LEN: usize = 16;
const TOKEN_LEN: usize = 32;
const CLIENT_SECRET_LEN: usize = 48;

/// Verified against when there is no stored hash, so an unknown account
/// costs the same PBKDF2 derivation as a wrong secret.
static PLACEHOLDER_HASH: LazyLock<Option<String>> =
    LazyLock::new(|| hash_secret("missing-credential-placeholder").ok());

/// Hash a password or client secret.
///
/// Returns the PHC-formatted hash string suitable for storage.
pub fn hash_secret(secret: &str) -> Result<String, password_hash::Error> {
    let mut salt_bytes = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes)?;
    let params = Params {
        rounds: PBKDF2_ROUNDS,
        output_length: 32,
    };
    let hash = Pbkdf2.hash_password_customized(secret.as_bytes(), None, None, params, &salt)?;
    Ok(hash.to_string())
}

/// Verify a secret against a stored hash. Malformed hashes never verify.
pub fn verify_secret(secret: &str, hash: &str) -> bool {
    let Ok(parsed_hash) = PasswordHash::new(hash) else {
        return false;
    };
    Pbkdf2.verify_password(secret.as_bytes(), &parsed_hash).is_ok()
}

/// Verify against `stored`, or against the placeholder hash when nothing is
/// stored. Only a stored hash can ever match.
pub fn verify_stored_secret(secret: &str, stored: Option<&str>) -> bool {
    match stored {
        Some(hash) => verify_secret(secret, hash),
        None => {
            if let Some(placeholder) = PLACEHOLDER_HASH.as_deref() {
                std::hint::black_box(verify_secret(secret, placeholder));
            }
            false
        }
    }
}

/// Constant-time string equality.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn random_urlsafe(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate an unguessable URL-safe token (authorization codes, session ids).
pub fn generate_token() -> String {
    random_urlsafe(TOKEN_LEN)
}

/// Generate a new client secret: 48 random bytes, base64url.
pub fn generate_client_secret() -> String {
    random_urlsafe(CLIENT_SECRET_LEN)
}
