//! Generation and verification pipelines.
//!
//! Every call is a pure pipeline over its own inputs: the engine holds
//! only read-only key material and codec configuration, so any number of
//! generate/verify calls may run in parallel.
//!
//! Verification never trusts the decomposed public matrix as the binding
//! input. It re-encodes the canonical matrix from the decoded bytes and
//! derives the session key from that, so an image hand-crafted to decode
//! to genuine bytes through a different pixel pattern gains nothing.

use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tracing::{debug, info};

use crate::composite::{CompositeCodec, CompositeImage};
use crate::crypto::{self, SessionKey};
use crate::error::QrSealError;
use crate::keys::Keyring;
use crate::qr::{self, DecodeError, EcLevel};
use crate::record::{BarcodeParams, BarcodeRecord, PayloadEnvelope, SignaturePayload};

/// Knobs for barcode generation.
#[derive(Debug, Clone, Copy)]
pub struct GenerateOptions {
    /// Error-correction level for both layers.
    pub ec_level: EcLevel,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            ec_level: EcLevel::M,
        }
    }
}

/// Outcome of the provenance check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvenanceStatus {
    /// ECDSA signature present and valid for the loaded public key.
    Verified,
    /// Signature present but invalid.
    Invalid,
    /// Record carries no provenance signature.
    Absent,
}

/// Result of verifying one record.
///
/// `authentic` is the MAC comparison and nothing else; provenance is an
/// additional ownership signal reported alongside. The session key is
/// retained only for authentic records, where it unlocks
/// [`AuthEngine::extract_secret`].
pub struct AuthReport {
    /// MAC over the canonical matrix matched the recorded MAC.
    pub authentic: bool,
    /// Outcome of the ECDSA ownership check.
    pub provenance: ProvenanceStatus,
    session: Option<SessionKey>,
}

impl AuthReport {
    pub(crate) fn session_key(&self) -> Option<&SessionKey> {
        self.session.as_ref()
    }
}

impl std::fmt::Debug for AuthReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthReport")
            .field("authentic", &self.authentic)
            .field("provenance", &self.provenance)
            .finish_non_exhaustive()
    }
}

/// Orchestrates generation and verification of dual-layer barcodes.
#[derive(Clone)]
pub struct AuthEngine {
    keyring: Keyring,
    codec: CompositeCodec,
}

impl AuthEngine {
    /// Engine with the default codec configuration.
    pub fn new(keyring: Keyring) -> Self {
        Self {
            keyring,
            codec: CompositeCodec::default(),
        }
    }

    /// Engine with an explicit codec (custom block scale).
    pub fn with_codec(keyring: Keyring, codec: CompositeCodec) -> Self {
        Self { keyring, codec }
    }

    /// The loaded key material.
    pub fn keyring(&self) -> &Keyring {
        &self.keyring
    }

    /// Generate an authenticated composite barcode.
    ///
    /// Builds the public matrix, derives the pattern-bound session key,
    /// MACs the payload, seals the optional secret, signs provenance when
    /// the private half is loaded, and fuses both layers into one raster.
    pub fn generate(
        &self,
        public_data: &str,
        secret_message: Option<&[u8]>,
        options: &GenerateOptions,
    ) -> Result<(BarcodeRecord, CompositeImage), QrSealError> {
        let ec_level = options.ec_level;
        let envelope = PayloadEnvelope::new(public_data, ec_level);
        let payload = envelope.to_json();

        // Both layers must share one grid size. The signature payload
        // length is fully determined by the secret length, so its version
        // requirement is known before any cryptography runs; the dummy is
        // all-lowercase to stay in the same (byte) encoding mode as the
        // real base64 frame.
        let with_provenance = self.keyring.can_sign();
        let sig_len =
            SignaturePayload::encoded_len(secret_message.map(<[u8]>::len), with_provenance);
        let sig_probe = vec![b'a'; sig_len];
        let data_version = qr::fit_version(payload.as_bytes(), ec_level)?;
        let sig_version = qr::fit_version(&sig_probe, ec_level)?;
        let version = data_version.max(sig_version);

        let public_matrix = qr::encode(payload.as_bytes(), version, ec_level)?;

        // Scan the freshly built matrix: recovers the mask the encoder
        // settled on and proves the payload round-trips before anything
        // is signed.
        let scan = qr::scan(&public_matrix)?;
        if scan.text != payload {
            return Err(DecodeError::Malformed {
                what: "public layer",
                detail: "encoded payload did not scan back to itself".to_owned(),
            }
            .into());
        }
        let params = BarcodeParams {
            version,
            ec_level,
            mask: scan.mask,
        };

        let session = crypto::derive_session_key(self.keyring.master(), &public_matrix);
        let mac = crypto::sign_payload(&session, payload.as_bytes());
        let ciphertext = match secret_message {
            Some(secret) => crypto::seal_secret(&session, secret, payload.as_bytes())?,
            None => Vec::new(),
        };
        let provenance = self
            .keyring
            .signing_key()
            .map(|key| crypto::sign_provenance(key, payload.as_bytes(), &mac));

        let frame = SignaturePayload {
            mac: mac.clone(),
            ciphertext: ciphertext.clone(),
            provenance: provenance.clone(),
        };
        let signature_matrix = qr::encode(frame.to_base64().as_bytes(), version, ec_level)?;
        let image = self.codec.compose(&public_matrix, &signature_matrix)?;

        let record = BarcodeRecord {
            payload,
            mac: BASE64.encode(&mac),
            secret_ciphertext: if ciphertext.is_empty() {
                String::new()
            } else {
                BASE64.encode(&ciphertext)
            },
            provenance: provenance.map(|p| BASE64.encode(p)),
            params,
        };
        info!(
            version,
            sealed = secret_message.is_some(),
            "generated composite barcode"
        );
        Ok((record, image))
    }

    /// Rebuild the record carried by a composite image.
    ///
    /// Separates the layers, scans each as a standard code and splits the
    /// hidden frame. Structural failures abort this item only.
    pub fn read_composite(&self, image: &CompositeImage) -> Result<BarcodeRecord, QrSealError> {
        let (public_matrix, signature_matrix) = self.codec.decompose(image)?;

        let public_scan = qr::scan(&public_matrix)?;
        let signature_scan = qr::scan(&signature_matrix)?;
        let frame = SignaturePayload::from_base64(&signature_scan.text)?;
        let envelope = PayloadEnvelope::parse(&public_scan.text)?;

        debug!(version = public_scan.version, "read composite barcode");
        Ok(BarcodeRecord {
            payload: public_scan.text,
            mac: BASE64.encode(&frame.mac),
            secret_ciphertext: if frame.ciphertext.is_empty() {
                String::new()
            } else {
                BASE64.encode(&frame.ciphertext)
            },
            provenance: frame.provenance.map(|p| BASE64.encode(p)),
            params: BarcodeParams {
                version: public_scan.version,
                ec_level: envelope.ec_level,
                mask: public_scan.mask,
            },
        })
    }

    /// Verify a record against the loaded key material.
    ///
    /// Recomputes the canonical matrix from the recorded payload bytes,
    /// re-derives the session key and compares MACs in constant time. A
    /// mismatch is a negative result, not an error.
    pub fn verify(&self, record: &BarcodeRecord) -> Result<AuthReport, QrSealError> {
        record.params.validate()?;
        let mac = record.mac_bytes()?;

        let expected_matrix = qr::encode(
            record.payload.as_bytes(),
            record.params.version,
            record.params.ec_level,
        )?;
        let session = crypto::derive_session_key(self.keyring.master(), &expected_matrix);
        let authentic = crypto::verify_payload(&session, record.payload.as_bytes(), &mac);

        let provenance = match record.provenance_bytes()? {
            None => ProvenanceStatus::Absent,
            Some(signature) => {
                if crypto::verify_provenance(
                    self.keyring.verifying_key(),
                    record.payload.as_bytes(),
                    &mac,
                    &signature,
                ) {
                    ProvenanceStatus::Verified
                } else {
                    ProvenanceStatus::Invalid
                }
            }
        };

        info!(authentic, ?provenance, "verified barcode record");
        Ok(AuthReport {
            authentic,
            provenance,
            session: authentic.then_some(session),
        })
    }

    /// Read and verify a composite image in one step.
    pub fn verify_image(
        &self,
        image: &CompositeImage,
    ) -> Result<(BarcodeRecord, AuthReport), QrSealError> {
        let record = self.read_composite(image)?;
        let report = self.verify(&record)?;
        Ok((record, report))
    }

    /// Convenience: load a PNG from disk, read and verify it.
    pub fn verify_file(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<(BarcodeRecord, AuthReport), QrSealError> {
        let image = CompositeImage::load_png(path)?;
        self.verify_image(&image)
    }

    /// Recover the sealed secret message.
    ///
    /// Fails closed: without an authentic report the ciphertext is not
    /// even handed to the cipher. Returns `Ok(None)` for records that
    /// carry no secret.
    pub fn extract_secret(
        &self,
        record: &BarcodeRecord,
        report: &AuthReport,
    ) -> Result<Option<Vec<u8>>, QrSealError> {
        if !report.authentic {
            return Err(QrSealError::SecretUnavailable);
        }
        if !record.has_secret() {
            return Ok(None);
        }
        let session = report.session_key().ok_or(QrSealError::SecretUnavailable)?;
        let ciphertext = record.ciphertext_bytes()?;
        let secret = crypto::open_secret(session, &ciphertext, record.payload.as_bytes())?;
        Ok(Some(secret))
    }
}
