use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand_core::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("failed to decode base64 key: {0}")]
    KeyDecode(#[from] base64::DecodeError),

    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),
}

/// A WireGuard key pair, both halves base64-encoded as the config file
/// format expects.
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub private_key: String,
    pub public_key: String,
}

/// Generate a fresh Curve25519 key pair from the system CSPRNG.
pub fn generate_keypair() -> KeyPair {
    let secret = StaticSecret::random_from_rng(&mut OsRng);
    let public = PublicKey::from(&secret);

    KeyPair {
        private_key: BASE64.encode(secret.to_bytes()),
        public_key: BASE64.encode(public.as_bytes()),
    }
}

pub fn decode_key(b64: &str) -> Result<[u8; 32], KeyError> {
    let bytes = BASE64.decode(b64)?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| KeyError::InvalidKeyLength(len))
}

/// Derive the base64 public key for a base64 private key.
pub fn public_key_from_private(private_b64: &str) -> Result<String, KeyError> {
    let secret = StaticSecret::from(decode_key(private_b64)?);
    let public = PublicKey::from(&secret);
    Ok(BASE64.encode(public.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_valid_base64_of_32_bytes() {
        let pair = generate_keypair();
        assert_eq!(pair.private_key.len(), 44);
        assert_eq!(pair.public_key.len(), 44);
        assert_eq!(decode_key(&pair.private_key).unwrap().len(), 32);
        assert_eq!(decode_key(&pair.public_key).unwrap().len(), 32);
    }

    #[test]
    fn successive_pairs_differ() {
        let a = generate_keypair();
        let b = generate_keypair();
        assert_ne!(a.private_key, b.private_key);
        assert_ne!(a.public_key, b.public_key);
    }

    #[test]
    fn public_key_derivation_matches_generation() {
        let pair = generate_keypair();
        let derived = public_key_from_private(&pair.private_key).unwrap();
        assert_eq!(derived, pair.public_key);
    }

    #[test]
    fn decode_rejects_bad_input() {
        assert!(matches!(decode_key("!!!"), Err(KeyError::KeyDecode(_))));
        assert!(matches!(
            decode_key(&BASE64.encode([0u8; 16])),
            Err(KeyError::InvalidKeyLength(16))
        ));
    }
}
