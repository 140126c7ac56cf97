//! Sealing and opening relay snapshots.
//!
//! XChaCha20-Poly1305 with the pre-shared 32-byte pairing key and a random
//! 24-byte nonce per message. The relay server only ever sees ciphertext.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use capacitor_relay_protocol::{parse_snapshot, EncryptedState, RemoteSnapshot};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::RngCore;
use tracing::warn;

use super::RelayError;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 24;

pub struct RelayCipher {
    cipher: XChaCha20Poly1305,
}

impl std::fmt::Debug for RelayCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RelayCipher(<key>)")
    }
}

impl RelayCipher {
    /// Builds a cipher from the base64 secret in the pairing credential.
    pub fn from_base64(secret_key: &str) -> Result<Self, RelayError> {
        let bytes = STANDARD
            .decode(secret_key.trim())
            .map_err(|err| RelayError::InvalidKey(err.to_string()))?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(key: &[u8]) -> Result<Self, RelayError> {
        if key.len() != KEY_LEN {
            return Err(RelayError::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_LEN,
                key.len()
            )));
        }
        let cipher = XChaCha20Poly1305::new_from_slice(key)
            .map_err(|err| RelayError::InvalidKey(err.to_string()))?;
        Ok(Self { cipher })
    }

    pub fn seal(&self, snapshot: &RemoteSnapshot) -> Result<EncryptedState, RelayError> {
        let plaintext =
            serde_json::to_vec(snapshot).map_err(|err| RelayError::Protocol(err.to_string()))?;
        self.seal_bytes(&plaintext)
    }

    fn seal_bytes(&self, plaintext: &[u8]) -> Result<EncryptedState, RelayError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|_| RelayError::Crypto("encryption failed".to_string()))?;

        Ok(EncryptedState {
            nonce: STANDARD.encode(nonce),
            ciphertext: STANDARD.encode(ciphertext),
        })
    }

    /// Fails with [`RelayError::Decrypt`] when the payload was not sealed with our
    /// key or was altered in transit.
    pub fn open(&self, state: &EncryptedState) -> Result<RemoteSnapshot, RelayError> {
        let nonce = STANDARD
            .decode(state.nonce.trim())
            .map_err(|err| RelayError::Decrypt(format!("nonce: {}", err)))?;
        if nonce.len() != NONCE_LEN {
            return Err(RelayError::Decrypt(format!(
                "nonce must be {} bytes, got {}",
                NONCE_LEN,
                nonce.len()
            )));
        }
        let ciphertext = STANDARD
            .decode(state.ciphertext.trim())
            .map_err(|err| RelayError::Decrypt(format!("ciphertext: {}", err)))?;

        let plaintext = self
            .cipher
            .decrypt(XNonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|_| RelayError::Decrypt("authentication failed".to_string()))?;

        let parsed = parse_snapshot(&plaintext).map_err(|err| RelayError::Protocol(err.message))?;
        for (project, reason) in &parsed.rejected {
            warn!(project = %project, reason = %reason, "Dropping malformed remote project entry");
        }
        Ok(parsed.projects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capacitor_relay_protocol::{RemoteProjectState, RemoteState};

    fn key(byte: u8) -> String {
        STANDARD.encode([byte; KEY_LEN])
    }

    fn snapshot() -> RemoteSnapshot {
        let mut snapshot = RemoteSnapshot::new();
        snapshot.insert(
            "/repo".to_string(),
            RemoteProjectState {
                state: RemoteState::Working,
                working_on: Some("refactor".to_string()),
                next_step: None,
                context_percent: Some(40),
                last_updated: "2026-01-01T00:00:00Z".to_string(),
            },
        );
        snapshot
    }

    #[test]
    fn test_sealed_snapshot_opens_with_same_key() {
        let cipher = RelayCipher::from_base64(&key(7)).unwrap();
        let sealed = cipher.seal(&snapshot()).unwrap();
        assert_eq!(cipher.open(&sealed).unwrap(), snapshot());
    }

    #[test]
    fn test_nonces_differ_between_messages() {
        let cipher = RelayCipher::from_base64(&key(7)).unwrap();
        let first = cipher.seal(&snapshot()).unwrap();
        let second = cipher.seal(&snapshot()).unwrap();
        assert_ne!(first.nonce, second.nonce);
        assert_ne!(first.ciphertext, second.ciphertext);
    }

    #[test]
    fn test_wrong_key_is_a_decrypt_error() {
        let sealed = RelayCipher::from_base64(&key(1))
            .unwrap()
            .seal(&snapshot())
            .unwrap();
        let err = RelayCipher::from_base64(&key(2))
            .unwrap()
            .open(&sealed)
            .unwrap_err();
        assert!(matches!(err, RelayError::Decrypt(_)));
    }

    #[test]
    fn test_tampered_ciphertext_is_rejected() {
        let cipher = RelayCipher::from_base64(&key(3)).unwrap();
        let mut sealed = cipher.seal(&snapshot()).unwrap();
        let mut bytes = STANDARD.decode(&sealed.ciphertext).unwrap();
        bytes[0] ^= 0xff;
        sealed.ciphertext = STANDARD.encode(bytes);
        assert!(matches!(cipher.open(&sealed), Err(RelayError::Decrypt(_))));
    }

    #[test]
    fn test_short_key_is_rejected() {
        let err = RelayCipher::from_base64(&STANDARD.encode([0u8; 16])).unwrap_err();
        assert!(matches!(err, RelayError::InvalidKey(_)));
        assert!(RelayCipher::from_base64("not base64!").is_err());
    }

    #[test]
    fn test_malformed_project_does_not_drop_the_others() {
        let cipher = RelayCipher::from_base64(&key(4)).unwrap();
        let plaintext = br#"{
            "/good": {"state":"working","lastUpdated":"2026-01-01T00:00:00Z"},
            "/other": {"state":"ready","contextPercent":42.5,"lastUpdated":"2026-01-01T00:00:00Z"},
            "/broken": {"state":"sleeping","lastUpdated":"2026-01-01T00:00:00Z"}
        }"#;
        let sealed = cipher.seal_bytes(plaintext).unwrap();

        let opened = cipher.open(&sealed).unwrap();
        assert_eq!(opened["/good"].state, RemoteState::Working);
        assert_eq!(opened["/other"].context_percent, Some(43));
        assert!(!opened.contains_key("/broken"));
    }

    #[test]
    fn test_non_object_payload_is_a_protocol_error() {
        let cipher = RelayCipher::from_base64(&key(4)).unwrap();
        let sealed = cipher.seal_bytes(b"\"just a string\"").unwrap();
        assert!(matches!(cipher.open(&sealed), Err(RelayError::Protocol(_))));
    }
}
