use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::AuthError;

const SCHEME: &str = "pbkdf2";
const SALT_LENGTH: usize = 16;
const HASH_LENGTH: usize = 32;

#[cfg(not(test))]
const PBKDF2_ITERATIONS: u32 = 600_000;
// Test builds are unoptimised; the stored format carries the count anyway.
#[cfg(test)]
const PBKDF2_ITERATIONS: u32 = 1_000;

/// Hash a password as `pbkdf2$<iterations>$<salt b64>$<hash b64>`.
pub fn hash_password(password: &str) -> String {
    let salt: [u8; SALT_LENGTH] = rand::random();
    let digest = derive(password, &salt, PBKDF2_ITERATIONS);
    format!(
        "{SCHEME}${PBKDF2_ITERATIONS}${}${}",
        STANDARD.encode(salt),
        STANDARD.encode(digest)
    )
}

/// Constant-time check of `password` against a stored hash.
pub fn verify_password(password: &str, stored: &str) -> Result<bool, AuthError> {
    let mut parts = stored.split('$');
    let (Some(SCHEME), Some(iterations), Some(salt), Some(expected), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return Err(AuthError::MalformedHash);
    };
    let iterations: u32 = iterations.parse().map_err(|_| AuthError::MalformedHash)?;
    if iterations == 0 {
        return Err(AuthError::MalformedHash);
    }
    let salt = STANDARD.decode(salt).map_err(|_| AuthError::MalformedHash)?;
    let expected = STANDARD.decode(expected).map_err(|_| AuthError::MalformedHash)?;
    if expected.len() != HASH_LENGTH {
        return Ok(false);
    }

    let actual = derive(password, &salt, iterations);
    Ok(actual[..].ct_eq(&expected[..]).into())
}

fn derive(password: &str, salt: &[u8], iterations: u32) -> [u8; HASH_LENGTH] {
    let mut out = [0u8; HASH_LENGTH];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let stored = hash_password("correct horse");
        assert!(stored.starts_with("pbkdf2$"));
        assert!(verify_password("correct horse", &stored).unwrap());
        assert!(!verify_password("wrong horse", &stored).unwrap());
    }

    #[test]
    fn salts_differ_per_hash() {
        assert_ne!(hash_password("same"), hash_password("same"));
    }

    #[test]
    fn malformed_hashes_rejected() {
        assert!(matches!(verify_password("x", "plain"), Err(AuthError::MalformedHash)));
        assert!(matches!(
            verify_password("x", "bcrypt$10$AA==$AA=="),
            Err(AuthError::MalformedHash)
        ));
        assert!(matches!(
            verify_password("x", "pbkdf2$abc$AA==$AA=="),
            Err(AuthError::MalformedHash)
        ));
    }

    #[test]
    fn stored_iteration_count_is_honoured() {
        let salt = [7u8; SALT_LENGTH];
        let digest = derive("pw", &salt, 5);
        let stored = format!("pbkdf2$5${}${}", STANDARD.encode(salt), STANDARD.encode(digest));
        assert!(verify_password("pw", &stored).unwrap());
    }
}
