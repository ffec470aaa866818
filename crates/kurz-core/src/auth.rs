use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::error::AuthError;
use crate::storage::UserId;

type HmacSha256 = Hmac<Sha256>;

/// Number of random identifier bytes at the front of a token.
const ID_LENGTH: usize = 4;
/// HMAC-SHA256 tag length.
const TAG_LENGTH: usize = 32;

/// Codec for the signed user identifier carried as an HTTP cookie or gRPC
/// metadata value.
///
/// A token is `hex(id || tag)` where `id` is four random bytes read as a
/// big-endian `i32` and `tag` is HMAC-SHA256 over those bytes under the
/// configured secret key. Any request presenting no token, an undecodable
/// token, or one failing verification is handed a fresh identity instead of
/// being rejected.
#[derive(Clone)]
pub struct TokenCodec {
    secret: Vec<u8>,
}

impl TokenCodec {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Issues a fresh token together with the user identifier it encodes.
    pub fn generate(&self) -> Result<(String, UserId), AuthError> {
        let mut id = [0u8; ID_LENGTH];
        rand::rng().fill_bytes(&mut id);

        let mut mac = self.mac()?;
        mac.update(&id);
        let tag = mac.finalize().into_bytes();

        let mut raw = Vec::with_capacity(ID_LENGTH + TAG_LENGTH);
        raw.extend_from_slice(&id);
        raw.extend_from_slice(&tag);

        Ok((hex::encode(raw), UserId::from_be_bytes(id)))
    }

    /// Recovers the user identifier from a token, verifying its signature in
    /// constant time.
    pub fn decode(&self, token: &str) -> Result<UserId, AuthError> {
        let raw = hex::decode(token).map_err(|e| AuthError::Malformed(e.to_string()))?;
        if raw.len() < ID_LENGTH + TAG_LENGTH {
            return Err(AuthError::Malformed(format!(
                "token is {} bytes, expected at least {}",
                raw.len(),
                ID_LENGTH + TAG_LENGTH
            )));
        }

        let (id, tag) = raw.split_at(ID_LENGTH);
        let mut mac = self.mac()?;
        mac.update(id);
        mac.verify_slice(tag).map_err(|_| AuthError::Verification)?;

        let mut bytes = [0u8; ID_LENGTH];
        bytes.copy_from_slice(id);
        Ok(UserId::from_be_bytes(bytes))
    }

    fn mac(&self) -> Result<HmacSha256, AuthError> {
        HmacSha256::new_from_slice(&self.secret).map_err(|e| AuthError::Signature(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> TokenCodec {
        TokenCodec::new(&b"a rather well kept secret"[..])
    }

    #[test]
    fn generate_then_decode_round_trips() {
        let codec = codec();
        let (token, user) = codec.generate().unwrap();
        assert_eq!(token.len(), 2 * (ID_LENGTH + TAG_LENGTH));
        assert_eq!(codec.decode(&token).unwrap(), user);
    }

    #[test]
    fn every_mutated_nibble_fails_verification() {
        let codec = codec();
        let (token, _) = codec.generate().unwrap();

        for pos in 0..token.len() {
            let mut tampered: Vec<char> = token.chars().collect();
            tampered[pos] = if tampered[pos] == '0' { '1' } else { '0' };
            let tampered: String = tampered.into_iter().collect();
            if tampered == token {
                continue;
            }
            assert!(codec.decode(&tampered).is_err(), "position {pos}");
        }
    }

    #[test]
    fn short_token_is_malformed() {
        let err = codec().decode("deadbeef").unwrap_err();
        assert!(matches!(err, AuthError::Malformed(_)));
    }

    #[test]
    fn non_hex_token_is_malformed() {
        let err = codec().decode("not hex at all").unwrap_err();
        assert!(matches!(err, AuthError::Malformed(_)));
    }

    #[test]
    fn foreign_secret_fails_verification() {
        let (token, _) = codec().generate().unwrap();
        let other = TokenCodec::new(&b"a different secret"[..]);
        assert!(matches!(
            other.decode(&token).unwrap_err(),
            AuthError::Verification
        ));
    }

    #[test]
    fn trailing_bytes_fail_verification() {
        let (token, _) = codec().generate().unwrap();
        let longer = format!("{token}ff");
        assert!(codec().decode(&longer).is_err());
    }
}
