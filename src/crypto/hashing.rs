// Password hashing and random secrets.

use crate::domain::error::{RuntimeError, RuntimeResult};
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

/// Random bytes in a fresh user secret.
pub const SECRET_LEN: usize = 16;
const SALT_LEN: usize = 16;
const DIGEST_LEN: usize = 32;
const SCHEME: &str = "pbkdf2-sha256";

/// One-way password function.
pub trait PasswordHasher: Send + Sync {
    fn derive(&self, cleartext: &str) -> RuntimeResult<String>;

    /// True if `cleartext` hashes to `hash`. Malformed hashes never match.
    fn compare(&self, hash: &str, cleartext: &str) -> bool;
}

/// PBKDF2-HMAC-SHA256 hasher.
///
/// Hashes are encoded as `pbkdf2-sha256$<iterations>$<salt>$<digest>` so the
/// iteration count can change without invalidating stored hashes.
#[derive(Debug, Clone, Copy)]
pub struct Pbkdf2Hasher {
    iterations: u32,
}

impl Pbkdf2Hasher {
    pub fn new(iterations: u32) -> Self {
        Self {
            iterations: iterations.max(1),
        }
    }

    fn digest(cleartext: &str, salt: &[u8], iterations: u32) -> [u8; DIGEST_LEN] {
        let mut out = [0u8; DIGEST_LEN];
        pbkdf2::pbkdf2_hmac::<Sha256>(cleartext.as_bytes(), salt, iterations, &mut out);
        out
    }
}

impl Default for Pbkdf2Hasher {
    fn default() -> Self {
        Self::new(100_000)
    }
}

impl PasswordHasher for Pbkdf2Hasher {
    fn derive(&self, cleartext: &str) -> RuntimeResult<String> {
        if cleartext.is_empty() {
            return Err(RuntimeError::parse("password", "", "password must not be empty"));
        }
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let digest = Self::digest(cleartext, &salt, self.iterations);
        Ok(format!(
            "{}${}${}${}",
            SCHEME,
            self.iterations,
            STANDARD_NO_PAD.encode(salt),
            STANDARD_NO_PAD.encode(digest)
        ))
    }

    fn compare(&self, hash: &str, cleartext: &str) -> bool {
        let mut parts = hash.split('$');
        let (Some(SCHEME), Some(iter), Some(salt), Some(digest), None) =
            (parts.next(), parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return false;
        };
        let (Ok(iterations), Ok(salt), Ok(expected)) = (
            iter.parse::<u32>(),
            STANDARD_NO_PAD.decode(salt),
            STANDARD_NO_PAD.decode(digest),
        ) else {
            return false;
        };
        let actual = Self::digest(cleartext, &salt, iterations);
        actual[..].ct_eq(&expected[..]).into()
    }
}

/// Hex-encoded secret of `len` random bytes.
pub fn random_secret(len: usize) -> String {
    let mut buf = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}
