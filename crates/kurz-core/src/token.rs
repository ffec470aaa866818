use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use thiserror::Error;

/// Length of every generated short token.
pub const TOKEN_LENGTH: usize = 5;

const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

#[derive(Debug, Error)]
#[error("invalid short token: {0}")]
pub struct InvalidToken(String);

/// An opaque short-URL identifier.
///
/// Tokens are exactly [`TOKEN_LENGTH`] characters drawn from `[0-9a-zA-Z]`.
/// Generation never consults storage; uniqueness is enforced by the storage
/// layer on `(user, original_url)`, not on the token itself.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShortToken(String);

impl ShortToken {
    /// Draws a fresh random token from the 62-symbol alphabet.
    pub fn random() -> Self {
        let mut rng = rand::rng();
        let code = (0..TOKEN_LENGTH)
            .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    /// Creates a `ShortToken` after validating length and alphabet.
    pub fn new(code: impl Into<String>) -> std::result::Result<Self, InvalidToken> {
        let code = code.into();
        if code.len() != TOKEN_LENGTH || !code.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(InvalidToken(code));
        }
        Ok(Self(code))
    }

    /// Creates a `ShortToken` without validation.
    ///
    /// Use this only for values produced by trusted sources, such as the
    /// storage layer returning a previously persisted token.
    pub fn new_unchecked(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Returns the token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl Display for ShortToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Joins a short token onto a base prefix the way the public surfaces
/// advertise it: `prefix/token`, or the bare token when the prefix is blank.
pub fn prefixed(prefix: &str, token: &str) -> String {
    let prefix = prefix.trim();
    if prefix.is_empty() {
        token.to_string()
    } else {
        format!("{}/{}", prefix.trim_end_matches('/'), token)
    }
}
