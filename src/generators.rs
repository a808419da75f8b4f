//! Value generators for provisioned secrets.
//!
//! Every random generator draws from the operating system CSPRNG
//! ([`rand::rngs::OsRng`]) through `try_fill_bytes`, so an unavailable
//! entropy source surfaces as an error instead of a panic.

use anyhow::{Context, Result};
use rand::rngs::OsRng;
use rand::RngCore;

/// Length in characters of a random token.
pub const TOKEN_LENGTH: usize = 64;

/// Length of the web framework secret key.
pub const SECRET_KEY_LENGTH: usize = 50;

/// Length of an opaque random string.
pub const RANDOM_STRING_LENGTH: usize = 64;

/// Alphabet of the web framework secret key (lowercase, digits, symbols).
pub const SECRET_KEY_CHARS: &str = "abcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*(-_=+)";

/// Alphabet of opaque random strings.
pub const RANDOM_STRING_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// How a secret value is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generator {
    /// 64 lowercase hex characters (32 random bytes).
    Token,
    /// 50 characters from [`SECRET_KEY_CHARS`].
    SecretKey,
    /// 64 characters from [`RANDOM_STRING_CHARS`].
    RandomString,
    /// Random UUID v4. Unique, not secret.
    Uuid,
    /// Value of the named environment variable.
    Env(&'static str),
}

impl Generator {
    /// Produce a fresh value.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS randomness source fails, or for
    /// [`Generator::Env`] if the variable is unset or not valid UTF-8.
    pub fn generate(&self) -> Result<String> {
        match self {
            Generator::Token => random_token(TOKEN_LENGTH),
            Generator::SecretKey => random_string(SECRET_KEY_LENGTH, SECRET_KEY_CHARS),
            Generator::RandomString => random_string(RANDOM_STRING_LENGTH, RANDOM_STRING_CHARS),
            Generator::Uuid => Ok(uuid::Uuid::new_v4().to_string()),
            Generator::Env(var) => std::env::var(var)
                .with_context(|| format!("Environment variable {} is required", var)),
        }
    }
}

/// Hex-encoded random token of `length` characters (`length` must be even).
pub fn random_token(length: usize) -> Result<String> {
    let mut bytes = vec![0u8; length / 2];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("Failed to read from the OS randomness source")?;

    Ok(hex::encode(bytes))
}

/// Random string of `length` characters drawn uniformly from `alphabet`.
///
/// Bytes that would bias the distribution are rejected and redrawn.
pub fn random_string(length: usize, alphabet: &str) -> Result<String> {
    let chars: Vec<char> = alphabet.chars().collect();
    if chars.is_empty() || chars.len() > 256 {
        return Err(anyhow::anyhow!(
            "Alphabet must hold between 1 and 256 characters, got {}",
            chars.len()
        ));
    }

    // Largest multiple of the alphabet size that fits in a byte.
    let limit = 256 - (256 % chars.len());
    let mut out = String::with_capacity(length);
    let mut produced = 0;
    let mut buf = [0u8; 64];

    while produced < length {
        OsRng
            .try_fill_bytes(&mut buf)
            .context("Failed to read from the OS randomness source")?;

        for &b in buf.iter() {
            if (b as usize) < limit {
                out.push(chars[b as usize % chars.len()]);
                produced += 1;
                if produced == length {
                    break;
                }
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_token_shape() {
        let token = Generator::Token.generate().unwrap();

        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_secret_key_shape() {
        let key = Generator::SecretKey.generate().unwrap();

        assert_eq!(key.chars().count(), 50);
        assert!(key.chars().all(|c| SECRET_KEY_CHARS.contains(c)));
    }

    #[test]
    fn test_random_string_shape() {
        let value = Generator::RandomString.generate().unwrap();

        assert_eq!(value.len(), 64);
        assert!(value.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_uuid_parses() {
        let id = Generator::Uuid.generate().unwrap();
        let parsed = uuid::Uuid::parse_str(&id).unwrap();

        assert_eq!(parsed.get_version_num(), 4);
    }

    #[test]
    fn test_values_are_not_repeated() {
        let tokens: HashSet<String> = (0..32)
            .map(|_| Generator::Token.generate().unwrap())
            .collect();

        assert_eq!(tokens.len(), 32);
    }

    #[test]
    fn test_env_generator_missing_variable() {
        let result = Generator::Env("GENERATE_SECRETS_TEST_UNSET_VARIABLE").generate();

        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("GENERATE_SECRETS_TEST_UNSET_VARIABLE"));
    }

    #[test]
    fn test_random_string_rejects_empty_alphabet() {
        assert!(random_string(10, "").is_err());
    }

    #[test]
    fn test_random_string_single_char_alphabet() {
        assert_eq!(random_string(5, "x").unwrap(), "xxxxx");
    }
}
