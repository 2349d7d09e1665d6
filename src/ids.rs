//! Credential mint: pair identifiers and bearer tokens.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 6 lowercase hex characters (3 random bytes), opaque to clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PairId(String);

impl PairId {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 3];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PairId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for PairId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// 32 lowercase hex characters (16 random bytes), one-time bearer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }
}

impl From<String> for Token {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl PartialEq<str> for Token {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

/// Response body for `GET /pair`.
#[derive(Debug, Serialize)]
pub struct MintedPair {
    #[serde(rename = "pairId")]
    pub pair_id: PairId,
    pub token: Token,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_id_is_six_hex_chars() {
        let id = PairId::generate();
        assert_eq!(id.as_str().len(), 6);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn token_is_thirty_two_hex_chars() {
        let token = Token::generate();
        assert_eq!(token.0.len(), 32);
        assert!(token.0.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generated_ids_are_not_trivially_repeated() {
        let a = PairId::generate();
        let b = PairId::generate();
        // Statistically near-certain to differ; a collision here would be
        // a sign the RNG is broken, not bad luck (1 in 16M chance).
        assert_ne!(a, b);
    }
}
