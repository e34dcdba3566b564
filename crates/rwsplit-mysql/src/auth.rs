//! Password scrambles for the MySQL authentication plugins.
//!
//! - `mysql_native_password`:
//!   `SHA1(password) XOR SHA1(seed + SHA1(SHA1(password)))`
//! - `caching_sha2_password` fast path:
//!   `SHA256(password) XOR SHA256(SHA256(SHA256(password)) + seed)`
//! - `caching_sha2_password` full path without TLS: the NUL-terminated
//!   password XOR the seed, RSA-encrypted with the server's public key.

use rand::rngs::OsRng;
use rsa::RsaPublicKey;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Authentication plugin names.
pub mod plugins {
    pub const MYSQL_NATIVE_PASSWORD: &str = "mysql_native_password";
    pub const CACHING_SHA2_PASSWORD: &str = "caching_sha2_password";
    pub const SHA256_PASSWORD: &str = "sha256_password";
}

/// Status bytes of the `caching_sha2_password` exchange.
pub mod caching_sha2 {
    /// Client asks for the server's RSA public key
    pub const REQUEST_PUBLIC_KEY: u8 = 0x02;
    pub const FAST_AUTH_SUCCESS: u8 = 0x03;
    pub const PERFORM_FULL_AUTH: u8 = 0x04;
}

/// Drop the NUL the server appends to its 20-byte scramble.
fn seed_of(auth_data: &[u8]) -> &[u8] {
    match auth_data {
        [seed @ .., 0] if seed.len() == 20 => seed,
        other => other,
    }
}

fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b).map(|(x, y)| x ^ y).collect()
}

/// Scramble for `mysql_native_password`. Empty for an empty password.
pub fn mysql_native_password(password: &str, auth_data: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let seed = seed_of(auth_data);
    let seed = &seed[..seed.len().min(20)];

    let stage1 = Sha1::digest(password.as_bytes());
    let stage2 = Sha1::digest(stage1);
    let mut hasher = Sha1::new();
    hasher.update(seed);
    hasher.update(stage2);
    xor(&stage1, &hasher.finalize())
}

/// Scramble for the `caching_sha2_password` fast path. Empty for an empty
/// password.
pub fn caching_sha2_password(password: &str, auth_data: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let seed = seed_of(auth_data);

    let hash = Sha256::digest(password.as_bytes());
    let hash_hash = Sha256::digest(hash);
    let mut hasher = Sha256::new();
    hasher.update(hash_hash);
    hasher.update(seed);
    xor(&hash, &hasher.finalize())
}

/// Scramble for the plugin named by the server, `None` for unknown plugins.
pub fn scramble_for(plugin: &str, password: &str, auth_data: &[u8]) -> Option<Vec<u8>> {
    match plugin {
        plugins::MYSQL_NATIVE_PASSWORD => Some(mysql_native_password(password, auth_data)),
        plugins::CACHING_SHA2_PASSWORD => Some(caching_sha2_password(password, auth_data)),
        _ => None,
    }
}

/// Encrypt the password for full authentication over an unencrypted socket.
///
/// `public_key_pem` is the key the server sent after a public key request,
/// in SPKI or PKCS#1 PEM form. OAEP padding is used (MySQL 8.0.5+).
pub fn sha256_password_rsa(
    password: &str,
    auth_data: &[u8],
    public_key_pem: &[u8],
) -> Result<Vec<u8>, String> {
    let seed = seed_of(auth_data);
    if seed.is_empty() {
        return Err("server sent an empty scramble".to_string());
    }

    let mut plain = password.as_bytes().to_vec();
    plain.push(0);
    for (i, byte) in plain.iter_mut().enumerate() {
        *byte ^= seed[i % seed.len()];
    }

    let pem = std::str::from_utf8(public_key_pem)
        .map_err(|e| format!("public key is not valid PEM text: {e}"))?;
    let key = RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| format!("failed to parse RSA public key: {e}"))?;

    key.encrypt(&mut OsRng, rsa::Oaep::new::<Sha1>(), &plain)
        .map_err(|e| format!("RSA encryption failed: {e}"))
}
