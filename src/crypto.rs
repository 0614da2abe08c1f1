//! Pattern-bound key derivation, MAC computation and secret sealing.
//!
//! The session key is derived from the master secret and the exact bits of
//! the public-layer matrix, so a single flipped module yields an unrelated
//! key. MAC verification is constant-time throughout; a partial mismatch
//! never returns early.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Key, Nonce,
};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use p256::ecdsa::{
    signature::{Signer, Verifier},
    Signature, SigningKey, VerifyingKey,
};
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::keys::MasterSecret;
use crate::matrix::BitMatrix;

type HmacSha256 = Hmac<Sha256>;

/// Session key length in bytes.
pub const SESSION_KEY_LEN: usize = 32;

/// MAC length in bytes (HMAC-SHA256 output).
pub const MAC_LEN: usize = 32;

/// Provenance signature length in bytes (fixed-width ECDSA P-256).
pub const PROVENANCE_LEN: usize = 64;

/// Bytes a sealed secret adds on top of its plaintext: 96-bit nonce plus
/// 128-bit authentication tag.
pub const SEAL_OVERHEAD: usize = NONCE_LEN + TAG_LEN;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Domain-separation salt for session-key derivation.
const SESSION_SALT: &[u8] = b"qrseal/session-key/v1";

#[derive(Debug, Error)]
pub enum CryptoError {
    /// AEAD encryption failed.
    #[error("sealing the secret message failed")]
    SealFailed,

    /// AEAD rejected the ciphertext. Wrong key, wrong pattern and
    /// tampered data are deliberately not distinguished.
    #[error("sealed secret could not be opened")]
    OpenFailed,

    /// The sealed blob is shorter than nonce + tag.
    #[error("sealed secret is truncated")]
    TruncatedCiphertext,
}

/// Ephemeral per-barcode key; zeroized on drop, never persisted.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_LEN]);

impl SessionKey {
    /// Borrow the raw key bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

/// Derive the session key binding `master` to the exact bits of `matrix`.
///
/// HKDF-SHA256 with the master secret as input keying material and the
/// deterministic matrix serialization as context. Same matrix bits and
/// same secret always give byte-identical output; any difference in
/// either gives an unrelated key.
pub fn derive_session_key(master: &MasterSecret, matrix: &BitMatrix) -> SessionKey {
    let hk = Hkdf::<Sha256>::new(Some(SESSION_SALT), master.as_slice());
    let mut okm = [0u8; SESSION_KEY_LEN];
    hk.expand(&matrix.to_bytes(), &mut okm)
        .expect("32 bytes is a valid hkdf output length");
    SessionKey(okm)
}

/// MAC over the exact public-layer bytes.
pub fn sign_payload(key: &SessionKey, payload: &[u8]) -> Vec<u8> {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(key.as_slice()).expect("hmac accepts any key length");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Constant-time MAC verification. Length mismatch compares unequal
/// without branching on content.
pub fn verify_payload(key: &SessionKey, payload: &[u8], mac: &[u8]) -> bool {
    sign_payload(key, payload).ct_eq(mac).into()
}

/// Seal a secret message under the session key.
///
/// AES-256-GCM with a random 96-bit nonce prepended to the ciphertext.
/// The public payload rides along as associated data, tying the secret to
/// its barcode.
pub fn seal_secret(
    key: &SessionKey,
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_slice()));
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CryptoError::SealFailed)?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Open a sealed secret. Fails for any key, pattern or payload other than
/// the ones used at sealing time.
pub fn open_secret(key: &SessionKey, sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < SEAL_OVERHEAD {
        return Err(CryptoError::TruncatedCiphertext);
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_slice()));
    cipher
        .decrypt(
            Nonce::from_slice(nonce_bytes),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::OpenFailed)
}

/// Deterministic ECDSA P-256 signature over `payload ++ mac`, proving the
/// record was issued by the holder of the private half.
pub fn sign_provenance(key: &SigningKey, payload: &[u8], mac: &[u8]) -> Vec<u8> {
    let signature: Signature = key.sign(&provenance_message(payload, mac));
    signature.to_vec()
}

/// Check a provenance signature; malformed encodings verify as false.
pub fn verify_provenance(
    key: &VerifyingKey,
    payload: &[u8],
    mac: &[u8],
    signature: &[u8],
) -> bool {
    match Signature::from_slice(signature) {
        Ok(sig) => key
            .verify(&provenance_message(payload, mac), &sig)
            .is_ok(),
        Err(_) => false,
    }
}

fn provenance_message(payload: &[u8], mac: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(payload.len() + mac.len());
    message.extend_from_slice(payload);
    message.extend_from_slice(mac);
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qr::{self, EcLevel};

    fn test_master() -> MasterSecret {
        MasterSecret::from_bytes(&[7u8; 32]).unwrap()
    }

    #[test]
    fn derivation_is_deterministic() {
        let matrix = qr::encode(b"derivation test", 3, EcLevel::M).unwrap();
        let a = derive_session_key(&test_master(), &matrix);
        let b = derive_session_key(&test_master(), &matrix);
        assert_eq!(a.as_slice(), b.as_slice());
    }

    #[test]
    fn single_flipped_module_changes_the_key() {
        let matrix = qr::encode(b"avalanche test", 3, EcLevel::M).unwrap();
        let mut flipped = matrix.clone();
        flipped.toggle(10, 12);

        let a = derive_session_key(&test_master(), &matrix);
        let b = derive_session_key(&test_master(), &flipped);
        assert_ne!(a.as_slice(), b.as_slice());
    }

    #[test]
    fn different_master_changes_the_key() {
        let matrix = qr::encode(b"two masters", 3, EcLevel::M).unwrap();
        let other = MasterSecret::from_bytes(&[8u8; 32]).unwrap();
        let a = derive_session_key(&test_master(), &matrix);
        let b = derive_session_key(&other, &matrix);
        assert_ne!(a.as_slice(), b.as_slice());
    }

    #[test]
    fn mac_round_trip() {
        let matrix = qr::encode(b"mac test", 3, EcLevel::M).unwrap();
        let key = derive_session_key(&test_master(), &matrix);
        let mac = sign_payload(&key, b"payload bytes");
        assert_eq!(mac.len(), MAC_LEN);
        assert!(verify_payload(&key, b"payload bytes", &mac));
        assert!(!verify_payload(&key, b"payload byteZ", &mac));
        assert!(!verify_payload(&key, b"payload bytes", &mac[..31]));
    }

    #[test]
    fn seal_open_round_trip() {
        let matrix = qr::encode(b"seal test", 3, EcLevel::M).unwrap();
        let key = derive_session_key(&test_master(), &matrix);

        let sealed = seal_secret(&key, b"SecretFabricData", b"aad").unwrap();
        assert_eq!(sealed.len(), b"SecretFabricData".len() + SEAL_OVERHEAD);
        let opened = open_secret(&key, &sealed, b"aad").unwrap();
        assert_eq!(opened, b"SecretFabricData");
    }

    #[test]
    fn wrong_key_or_aad_fails_to_open() {
        let matrix = qr::encode(b"seal test", 3, EcLevel::M).unwrap();
        let key = derive_session_key(&test_master(), &matrix);
        let sealed = seal_secret(&key, b"secret", b"aad").unwrap();

        let other = MasterSecret::from_bytes(&[9u8; 32]).unwrap();
        let wrong_key = derive_session_key(&other, &matrix);
        assert!(matches!(
            open_secret(&wrong_key, &sealed, b"aad"),
            Err(CryptoError::OpenFailed)
        ));
        assert!(matches!(
            open_secret(&key, &sealed, b"bad"),
            Err(CryptoError::OpenFailed)
        ));
        assert!(matches!(
            open_secret(&key, &sealed[..10], b"aad"),
            Err(CryptoError::TruncatedCiphertext)
        ));
    }

    #[test]
    fn provenance_round_trip() {
        let signing = SigningKey::random(&mut OsRng);
        let verifying = *signing.verifying_key();

        let sig = sign_provenance(&signing, b"payload", b"mac");
        assert_eq!(sig.len(), PROVENANCE_LEN);
        assert!(verify_provenance(&verifying, b"payload", b"mac", &sig));
        assert!(!verify_provenance(&verifying, b"payloaX", b"mac", &sig));
        assert!(!verify_provenance(&verifying, b"payload", b"mac", &sig[..40]));

        let other = SigningKey::random(&mut OsRng);
        assert!(!verify_provenance(
            other.verifying_key(),
            b"payload",
            b"mac",
            &sig
        ));
    }
}
