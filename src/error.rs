//! Unified error type for the public API.
//!
//! Internal modules keep their domain-specific errors for precise
//! handling; this type consolidates them for callers. An authentication
//! mismatch is deliberately *not* an error: it is a successfully computed
//! [`AuthReport`](crate::engine::AuthReport) with `authentic = false`.

use thiserror::Error;

use crate::composite::LayerSeparationError;
use crate::crypto::CryptoError;
use crate::keys::KeyFormatError;
use crate::qr::DecodeError;

/// Unified error for all qrseal operations.
#[derive(Debug, Error)]
pub enum QrSealError {
    /// A matrix could not be encoded or scanned, or a decoded payload was
    /// structurally invalid.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// A composite image could not be fused or separated.
    #[error("layer separation error: {0}")]
    LayerSeparation(#[from] LayerSeparationError),

    /// Malformed key material.
    #[error("key error: {0}")]
    Key(#[from] KeyFormatError),

    /// Sealing or opening a secret failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Raster file I/O failed.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// Secret extraction was attempted without an authentic report; the
    /// secret stays sealed.
    #[error("record is not authentic; secret extraction refused")]
    SecretUnavailable,
}

impl QrSealError {
    /// True for scan/parse failures of either layer.
    pub fn is_decode_error(&self) -> bool {
        matches!(self, Self::Decode(_))
    }

    /// True when the image was rejected as corrupted or foreign.
    pub fn is_layer_separation_error(&self) -> bool {
        matches!(self, Self::LayerSeparation(_))
    }

    /// True for key-material problems.
    pub fn is_key_error(&self) -> bool {
        matches!(self, Self::Key(_))
    }

    /// True for cryptographic failures (not authentication mismatches,
    /// which are reported, not raised).
    pub fn is_crypto_error(&self) -> bool {
        matches!(self, Self::Crypto(_))
    }
}
