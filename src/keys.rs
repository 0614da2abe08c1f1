//! Key material: P-256 keypair, master secret and PEM persistence.
//!
//! The generator loads the private half, verifiers load the public half,
//! and both must end up with the same master secret. That shared secret is
//! derived from the compressed public key via HKDF-SHA256, so it is
//! reachable from either half of the pair; distributing the public key
//! hands a verifier exactly the derivation capability the protocol needs.
//! Deployments that distribute a separate 32-byte seed out of band can
//! override the derived secret instead.

use std::path::Path;

use hkdf::Hkdf;
use p256::{
    ecdsa::{SigningKey, VerifyingKey},
    elliptic_curve::sec1::ToEncodedPoint,
    pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding},
    PublicKey, SecretKey,
};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Master secret length in bytes.
pub const MASTER_SECRET_LEN: usize = 32;

/// Private key file name used by the directory helpers.
pub const PRIVATE_KEY_FILE: &str = "private.pem";
/// Public key file name used by the directory helpers.
pub const PUBLIC_KEY_FILE: &str = "public.pem";

/// Domain-separation salt for master-secret derivation.
const MASTER_SALT: &[u8] = b"qrseal/master-secret/v1";

/// Malformed or unusable key material. Surfaced before any barcode
/// processing begins.
#[derive(Debug, Error)]
pub enum KeyFormatError {
    /// Input was not a PEM-encoded P-256 key of either kind.
    #[error("not a valid PEM-encoded P-256 key: {0}")]
    Pem(String),

    /// A raw master-secret seed had the wrong length.
    #[error("master secret must be {MASTER_SECRET_LEN} bytes, got {0}")]
    SecretLength(usize),

    /// Key file could not be read or written.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Symmetric seed for session-key derivation; zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterSecret([u8; MASTER_SECRET_LEN]);

impl MasterSecret {
    /// Wrap a raw 32-byte seed distributed out of band.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyFormatError> {
        if bytes.len() != MASTER_SECRET_LEN {
            return Err(KeyFormatError::SecretLength(bytes.len()));
        }
        let mut secret = [0u8; MASTER_SECRET_LEN];
        secret.copy_from_slice(bytes);
        Ok(Self(secret))
    }

    /// Fresh random seed.
    pub fn generate() -> Self {
        let mut secret = [0u8; MASTER_SECRET_LEN];
        OsRng.fill_bytes(&mut secret);
        Self(secret)
    }

    /// Derive the seed from the compressed SEC1 encoding of a public key.
    /// Both halves of a keypair reach the same seed through this path.
    pub fn from_public_key(public: &PublicKey) -> Self {
        let point = public.to_encoded_point(true);
        let hk = Hkdf::<Sha256>::new(Some(MASTER_SALT), point.as_bytes());
        let mut okm = [0u8; MASTER_SECRET_LEN];
        hk.expand(b"master", &mut okm)
            .expect("32 bytes is a valid hkdf output length");
        Self(okm)
    }

    /// Borrow the raw seed bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

/// Loaded key material for one side of the protocol.
///
/// Holds the ECDSA private half only when generation capability was
/// loaded; the verifying half and the master secret are always present.
#[derive(Clone)]
pub struct Keyring {
    signing: Option<SigningKey>,
    verifying: VerifyingKey,
    master: MasterSecret,
}

impl Keyring {
    /// Generate a fresh P-256 keypair.
    pub fn generate() -> Self {
        Self::from_secret_key(SecretKey::random(&mut OsRng))
    }

    fn from_secret_key(secret: SecretKey) -> Self {
        let public = secret.public_key();
        Keyring {
            signing: Some(SigningKey::from(&secret)),
            verifying: VerifyingKey::from(&public),
            master: MasterSecret::from_public_key(&public),
        }
    }

    /// Load the generator side from a PKCS#8 PEM private key.
    pub fn from_private_pem(pem: &str) -> Result<Self, KeyFormatError> {
        let secret =
            SecretKey::from_pkcs8_pem(pem).map_err(|e| KeyFormatError::Pem(e.to_string()))?;
        Ok(Self::from_secret_key(secret))
    }

    /// Load the verifier side from an SPKI PEM public key.
    pub fn from_public_pem(pem: &str) -> Result<Self, KeyFormatError> {
        let public =
            PublicKey::from_public_key_pem(pem).map_err(|e| KeyFormatError::Pem(e.to_string()))?;
        Ok(Keyring {
            signing: None,
            verifying: VerifyingKey::from(&public),
            master: MasterSecret::from_public_key(&public),
        })
    }

    /// Load from a PEM file holding either half, trying the private
    /// encoding first.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, KeyFormatError> {
        let pem = std::fs::read_to_string(path.as_ref())?;
        if let Ok(keyring) = Self::from_private_pem(&pem) {
            info!(fingerprint = %keyring.fingerprint(), "loaded private key");
            return Ok(keyring);
        }
        let keyring = Self::from_public_pem(&pem)?;
        info!(fingerprint = %keyring.fingerprint(), "loaded public key");
        Ok(keyring)
    }

    /// Replace the derived master secret with a seed distributed out of
    /// band.
    #[must_use]
    pub fn with_master_secret(mut self, master: MasterSecret) -> Self {
        self.master = master;
        self
    }

    /// True when the private half is loaded and records will carry a
    /// provenance signature.
    pub fn can_sign(&self) -> bool {
        self.signing.is_some()
    }

    /// Short hex fingerprint of the public half, for logs and key
    /// inventory. Identical on the generator and verifier sides of the
    /// same pair.
    pub fn fingerprint(&self) -> String {
        let point = PublicKey::from(&self.verifying).to_encoded_point(true);
        let digest = Sha256::digest(point.as_bytes());
        hex::encode(&digest[..8])
    }

    /// Export the public half as SPKI PEM for distribution to verifiers.
    pub fn public_key_pem(&self) -> Result<String, KeyFormatError> {
        PublicKey::from(&self.verifying)
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| KeyFormatError::Pem(e.to_string()))
    }

    /// Write `private.pem` (when loaded) and `public.pem` into `dir`.
    pub fn save_to_dir(&self, dir: impl AsRef<Path>) -> Result<(), KeyFormatError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        if let Some(signing) = &self.signing {
            let pem = SecretKey::from(*signing.as_nonzero_scalar())
                .to_pkcs8_pem(LineEnding::LF)
                .map_err(|e| KeyFormatError::Pem(e.to_string()))?;
            std::fs::write(dir.join(PRIVATE_KEY_FILE), pem.as_bytes())?;
        }
        std::fs::write(dir.join(PUBLIC_KEY_FILE), self.public_key_pem()?)?;
        Ok(())
    }

    /// Load the private key from `dir`, generating and saving a fresh
    /// keypair when none exists yet.
    pub fn load_or_generate(dir: impl AsRef<Path>) -> Result<Self, KeyFormatError> {
        let private_path = dir.as_ref().join(PRIVATE_KEY_FILE);
        if private_path.exists() {
            info!(path = %private_path.display(), "loading existing keypair");
            return Self::load_from_file(private_path);
        }
        info!(dir = %dir.as_ref().display(), "generating new keypair");
        let keyring = Self::generate();
        keyring.save_to_dir(dir)?;
        Ok(keyring)
    }

    pub(crate) fn signing_key(&self) -> Option<&SigningKey> {
        self.signing.as_ref()
    }

    pub(crate) fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying
    }

    pub(crate) fn master(&self) -> &MasterSecret {
        &self.master
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn master_secret_reachable_from_both_halves() {
        let generator = Keyring::generate();
        let verifier = Keyring::from_public_pem(&generator.public_key_pem().unwrap()).unwrap();

        assert!(generator.can_sign());
        assert!(!verifier.can_sign());
        assert_eq!(generator.master().as_slice(), verifier.master().as_slice());
        assert_eq!(generator.fingerprint(), verifier.fingerprint());
    }

    #[test]
    fn distinct_keypairs_have_distinct_masters() {
        let a = Keyring::generate();
        let b = Keyring::generate();
        assert_ne!(a.master().as_slice(), b.master().as_slice());
    }

    #[test]
    fn malformed_pem_is_rejected() {
        assert!(matches!(
            Keyring::from_private_pem("not a key"),
            Err(KeyFormatError::Pem(_))
        ));
        assert!(matches!(
            Keyring::from_public_pem("-----BEGIN PUBLIC KEY-----\ngarbage\n-----END PUBLIC KEY-----\n"),
            Err(KeyFormatError::Pem(_))
        ));
    }

    #[test]
    fn master_secret_length_is_checked() {
        assert!(matches!(
            MasterSecret::from_bytes(&[0u8; 16]),
            Err(KeyFormatError::SecretLength(16))
        ));
        assert!(MasterSecret::from_bytes(&[0u8; 32]).is_ok());
    }

    #[test]
    fn save_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let keyring = Keyring::generate();
        keyring.save_to_dir(dir.path()).unwrap();

        let private = Keyring::load_from_file(dir.path().join(PRIVATE_KEY_FILE)).unwrap();
        let public = Keyring::load_from_file(dir.path().join(PUBLIC_KEY_FILE)).unwrap();

        assert!(private.can_sign());
        assert!(!public.can_sign());
        assert_eq!(keyring.master().as_slice(), private.master().as_slice());
        assert_eq!(keyring.master().as_slice(), public.master().as_slice());
    }

    #[test]
    fn load_or_generate_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let first = Keyring::load_or_generate(dir.path()).unwrap();
        let second = Keyring::load_or_generate(dir.path()).unwrap();
        assert_eq!(first.master().as_slice(), second.master().as_slice());
    }

    #[test]
    fn external_seed_overrides_derivation() {
        let seed = MasterSecret::from_bytes(&[3u8; 32]).unwrap();
        let keyring = Keyring::generate().with_master_secret(seed);
        assert_eq!(keyring.master().as_slice(), &[3u8; 32]);
    }
}
