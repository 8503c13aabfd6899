//! Password hashing
//!
//! Hashes are stored as `pbkdf2:sha256:<iterations>$<salt>$<hex digest>`,
//! the same layout werkzeug produces, so existing account rows verify.

use rand::{Rng, distr::Alphanumeric};
use sha2::Sha256;

const METHOD: &str = "pbkdf2";
const DIGEST: &str = "sha256";
const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;

/// Iteration count for new hashes
pub const DEFAULT_ITERATIONS: u32 = 600_000;

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("Malformed password hash")]
    Malformed,
    #[error("Unsupported hash method: {0}")]
    Unsupported(String),
}

/// Hash `password` with a fresh random salt.
pub fn hash_password(password: &str, iterations: u32) -> String {
    let salt: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(SALT_LEN)
        .map(char::from)
        .collect();

    let mut key = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), iterations, &mut key);

    format!(
        "{}:{}:{}${}${}",
        METHOD,
        DIGEST,
        iterations,
        salt,
        hex::encode(&key)
    )
}

/// Check `password` against a stored hash.
pub fn verify_password(password: &str, stored: &str) -> Result<bool, PasswordError> {
    let mut parts = stored.splitn(3, '$');
    let (method, salt, digest) = match (parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(s), Some(d)) => (m, s, d),
        _ => return Err(PasswordError::Malformed),
    };

    let mut method_parts = method.split(':');
    match (method_parts.next(), method_parts.next()) {
        (Some(METHOD), Some(DIGEST)) => {}
        _ => return Err(PasswordError::Unsupported(method.to_string())),
    }
    let iterations = match method_parts.next() {
        Some(n) => n.parse::<u32>().map_err(|_| PasswordError::Malformed)?,
        None => DEFAULT_ITERATIONS,
    };

    let expected = hex::decode(digest).ok_or(PasswordError::Malformed)?;
    if expected.is_empty() {
        return Err(PasswordError::Malformed);
    }

    let mut key = vec![0u8; expected.len()];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), iterations, &mut key);

    Ok(constant_time_eq(&key, &expected))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// Hex helpers since we don't want to add another dependency
mod hex {
    const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";

    pub fn encode(bytes: &[u8]) -> String {
        let mut result = String::with_capacity(bytes.len() * 2);
        for byte in bytes {
            result.push(HEX_CHARS[(byte >> 4) as usize] as char);
            result.push(HEX_CHARS[(byte & 0x0f) as usize] as char);
        }
        result
    }

    pub fn decode(s: &str) -> Option<Vec<u8>> {
        if s.len() % 2 != 0 {
            return None;
        }
        s.as_bytes()
            .chunks(2)
            .map(|pair| {
                let hi = (pair[0] as char).to_digit(16)?;
                let lo = (pair[1] as char).to_digit(16)?;
                Some((hi * 16 + lo) as u8)
            })
            .collect()
    }
}
