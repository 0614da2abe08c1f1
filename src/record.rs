//! Record and wire formats.
//!
//! The public layer carries a minified JSON envelope; the hidden layer
//! carries a magic-prefixed, length-delimited frame holding the MAC, the
//! sealed secret and the provenance signature, base64-encoded so the
//! signature QR stays text-clean. The envelope string inside a
//! [`BarcodeRecord`] is byte-exact: verification consumes it verbatim and
//! never re-serializes it.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::{MAC_LEN, PROVENANCE_LEN, SEAL_OVERHEAD};
use crate::qr::{DecodeError, EcLevel, MAX_VERSION, MIN_VERSION};

/// Magic prefix of the hidden-layer frame.
pub const SIGNATURE_MAGIC: &[u8; 4] = b"QSL1";

/// Parameters pinning the canonical matrix of a barcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarcodeParams {
    /// QR version, 1..=40. Both layers share it.
    pub version: u8,
    /// Error-correction level; drives canonical re-encoding.
    pub ec_level: EcLevel,
    /// Mask pattern the deterministic encoder settled on, 0..=7.
    /// Recorded metadata; never forced back onto the encoder.
    pub mask: u8,
}

impl BarcodeParams {
    /// Reject out-of-range parameter values.
    pub fn validate(&self) -> Result<(), DecodeError> {
        if !(MIN_VERSION..=MAX_VERSION).contains(&self.version) {
            return Err(DecodeError::Version(self.version));
        }
        if self.mask > 7 {
            return Err(DecodeError::Malformed {
                what: "barcode params",
                detail: format!("mask {} out of range", self.mask),
            });
        }
        Ok(())
    }
}

/// Structured content of the public layer.
///
/// Serialized as minified JSON with single-letter keys to keep the QR
/// version down. The UUID makes every issued barcode unique and the
/// embedded EC level makes the params recoverable from the image alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadEnvelope {
    /// Application data.
    #[serde(rename = "d")]
    pub data: String,
    /// Error-correction level both layers were encoded at.
    #[serde(rename = "e")]
    pub ec_level: EcLevel,
    /// Issuance time, RFC 3339 UTC.
    #[serde(rename = "t")]
    pub issued_at: String,
    /// Per-barcode UUID.
    #[serde(rename = "u")]
    pub uid: String,
}

impl PayloadEnvelope {
    /// Envelope for fresh generation: stamps the current time and a new
    /// UUID.
    pub fn new(data: &str, ec_level: EcLevel) -> Self {
        Self {
            data: data.to_owned(),
            ec_level,
            issued_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            uid: Uuid::new_v4().to_string(),
        }
    }

    /// Exact bytes placed in the public layer.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("envelope serialization cannot fail")
    }

    /// Parse a decoded public layer.
    pub fn parse(text: &str) -> Result<Self, DecodeError> {
        serde_json::from_str(text).map_err(|e| DecodeError::Malformed {
            what: "payload envelope",
            detail: e.to_string(),
        })
    }
}

/// Hidden-layer content: MAC, sealed secret and provenance signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignaturePayload {
    /// HMAC over the public payload.
    pub mac: Vec<u8>,
    /// Sealed secret message; empty when none was attached.
    pub ciphertext: Vec<u8>,
    /// ECDSA provenance signature; absent for unsigned generators.
    pub provenance: Option<Vec<u8>>,
}

impl SignaturePayload {
    /// Frame as magic + three `u16` big-endian length-prefixed fields.
    pub fn to_bytes(&self) -> Vec<u8> {
        let provenance = self.provenance.as_deref().unwrap_or_default();
        let mut out = Vec::with_capacity(
            SIGNATURE_MAGIC.len() + 6 + self.mac.len() + self.ciphertext.len() + provenance.len(),
        );
        out.extend_from_slice(SIGNATURE_MAGIC);
        for field in [self.mac.as_slice(), self.ciphertext.as_slice(), provenance] {
            out.extend_from_slice(&(field.len() as u16).to_be_bytes());
            out.extend_from_slice(field);
        }
        out
    }

    /// Parse a frame; unknown magic or truncation is a `DecodeError`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let rest = bytes
            .strip_prefix(SIGNATURE_MAGIC.as_slice())
            .ok_or(DecodeError::Malformed {
                what: "signature payload",
                detail: "missing magic prefix".to_owned(),
            })?;

        let (mac, rest) = read_field(rest)?;
        let (ciphertext, rest) = read_field(rest)?;
        let (provenance, rest) = read_field(rest)?;
        if !rest.is_empty() {
            return Err(DecodeError::Malformed {
                what: "signature payload",
                detail: format!("{} trailing bytes", rest.len()),
            });
        }
        Ok(Self {
            mac,
            ciphertext,
            provenance: if provenance.is_empty() {
                None
            } else {
                Some(provenance)
            },
        })
    }

    /// Base64 text carried by the signature QR.
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_bytes())
    }

    /// Parse the text decoded from a signature QR.
    pub fn from_base64(text: &str) -> Result<Self, DecodeError> {
        let bytes = BASE64.decode(text).map_err(|e| DecodeError::Malformed {
            what: "signature payload",
            detail: e.to_string(),
        })?;
        Self::from_bytes(&bytes)
    }

    /// Exact base64 length of a frame for a secret of `secret_len` bytes,
    /// known before any cryptography runs; generation uses it to pick a
    /// QR version that fits both layers.
    pub fn encoded_len(secret_len: Option<usize>, with_provenance: bool) -> usize {
        let ciphertext_len = secret_len.map(|n| n + SEAL_OVERHEAD).unwrap_or(0);
        let provenance_len = if with_provenance { PROVENANCE_LEN } else { 0 };
        let raw = SIGNATURE_MAGIC.len() + 6 + MAC_LEN + ciphertext_len + provenance_len;
        (raw + 2) / 3 * 4
    }
}

fn read_field(bytes: &[u8]) -> Result<(Vec<u8>, &[u8]), DecodeError> {
    if bytes.len() < 2 {
        return Err(truncated());
    }
    let len = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
    let rest = &bytes[2..];
    if rest.len() < len {
        return Err(truncated());
    }
    Ok((rest[..len].to_vec(), &rest[len..]))
}

fn truncated() -> DecodeError {
    DecodeError::Malformed {
        what: "signature payload",
        detail: "truncated frame".to_owned(),
    }
}

/// One authenticated barcode, as produced by generation and reconstructed
/// from a scanned composite. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarcodeRecord {
    /// Exact public-layer bytes (serialized [`PayloadEnvelope`]).
    pub payload: String,
    /// Base64 MAC over `payload`.
    pub mac: String,
    /// Base64 sealed secret; empty when none was attached.
    pub secret_ciphertext: String,
    /// Base64 provenance signature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<String>,
    /// Canonical-matrix parameters.
    pub params: BarcodeParams,
}

impl BarcodeRecord {
    /// Parse the public payload back into its envelope.
    pub fn envelope(&self) -> Result<PayloadEnvelope, DecodeError> {
        PayloadEnvelope::parse(&self.payload)
    }

    /// Application data carried by the public layer.
    pub fn public_data(&self) -> Result<String, DecodeError> {
        self.envelope().map(|e| e.data)
    }

    /// True when a sealed secret rides in the hidden layer.
    pub fn has_secret(&self) -> bool {
        !self.secret_ciphertext.is_empty()
    }

    pub(crate) fn mac_bytes(&self) -> Result<Vec<u8>, DecodeError> {
        decode_b64("mac", &self.mac)
    }

    pub(crate) fn ciphertext_bytes(&self) -> Result<Vec<u8>, DecodeError> {
        decode_b64("secret ciphertext", &self.secret_ciphertext)
    }

    pub(crate) fn provenance_bytes(&self) -> Result<Option<Vec<u8>>, DecodeError> {
        self.provenance
            .as_deref()
            .map(|p| decode_b64("provenance signature", p))
            .transpose()
    }

    /// Serialize for sidecar storage.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).expect("record serialization cannot fail")
    }

    /// Parse a stored record.
    pub fn from_json(json: &str) -> Result<Self, DecodeError> {
        serde_json::from_str(json).map_err(|e| DecodeError::Malformed {
            what: "barcode record",
            detail: e.to_string(),
        })
    }
}

fn decode_b64(what: &'static str, text: &str) -> Result<Vec<u8>, DecodeError> {
    BASE64.decode(text).map_err(|e| DecodeError::Malformed {
        what,
        detail: e.to_string(),
    })
}
