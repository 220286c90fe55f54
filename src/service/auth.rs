//! Credential hashing and session token helpers.

use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

/// Minimum accepted password length.
pub(crate) const MIN_PASSWORD_LENGTH: usize = 8;

/// Hash a password with a fresh random salt, producing a `salt$hex` digest.
pub(crate) fn hash_password(password: &str) -> String {
    let salt = Uuid::new_v4().simple().to_string();
    format!("{salt}${}", digest_with_salt(&salt, password))
}

/// Verify a password against a stored `salt$hex` digest.
pub(crate) fn verify_password(password: &str, stored: &str) -> bool {
    let Some((salt, expected)) = stored.split_once('$') else {
        return false;
    };
    constant_time_eq(digest_with_salt(salt, password).as_bytes(), expected.as_bytes())
}

fn digest_with_salt(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    let mut diff = 0u8;
    for (a, b) in left.iter().zip(right.iter()) {
        diff |= a ^ b;
    }
    diff == 0
}

/// Shallow email shape check: non-empty local part, domain with a dot, no whitespace.
pub(crate) fn email_is_valid(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

/// Mint an opaque bearer token.
pub(crate) fn generate_session_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// RFC 3339 expiry timestamp `ttl_minutes` from now.
pub(crate) fn session_expiry(ttl_minutes: i64) -> String {
    (OffsetDateTime::now_utc() + time::Duration::minutes(ttl_minutes))
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_round_trip() {
        let digest = hash_password("hunter22");
        assert!(digest.contains('$'));
        assert!(verify_password("hunter22", &digest));
        assert!(!verify_password("hunter23", &digest));
    }

    #[test]
    fn same_password_gets_distinct_salts() {
        let first = hash_password("hunter22");
        let second = hash_password("hunter22");
        assert_ne!(first, second);
        assert!(verify_password("hunter22", &first));
        assert!(verify_password("hunter22", &second));
    }

    #[test]
    fn malformed_digests_never_verify() {
        assert!(!verify_password("anything", "no-dollar-sign"));
        assert!(!verify_password("anything", ""));
    }

    #[test]
    fn email_shape_check() {
        assert!(email_is_valid("ada@example.com"));
        assert!(email_is_valid("a.b+c@sub.example.org"));
        assert!(!email_is_valid("not-an-email"));
        assert!(!email_is_valid("@example.com"));
        assert!(!email_is_valid("ada@nodot"));
        assert!(!email_is_valid("ada@.com"));
        assert!(!email_is_valid("ada @example.com"));
    }

    #[test]
    fn session_expiry_is_in_the_future() {
        let expiry = session_expiry(60);
        let parsed = OffsetDateTime::parse(&expiry, &Rfc3339).unwrap();
        assert!(parsed > OffsetDateTime::now_utc());
    }

    #[test]
    fn session_tokens_are_unique() {
        assert_ne!(generate_session_token(), generate_session_token());
    }
}
