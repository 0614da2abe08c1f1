//! Dual-layer pattern-bound barcode authentication.
//!
//! A composite barcode fuses two matrices into one 4-level grayscale
//! raster: a standard-scannable public layer and a hidden signature layer
//! carrying a MAC and an optional sealed secret. The MAC key is derived
//! from a master secret and the exact bits of the public matrix, so the
//! signature is bound to the visual pattern, not just the data: cloning
//! the bytes without reproducing the canonical pattern buys an attacker
//! nothing.
//!
//! # Example
//!
//! ```no_run
//! use qrseal::{AuthEngine, GenerateOptions, Keyring};
//!
//! # fn main() -> Result<(), qrseal::QrSealError> {
//! let engine = AuthEngine::new(Keyring::generate());
//! let (record, image) = engine.generate(
//!     "Product-123",
//!     Some(b"SecretFabricData"),
//!     &GenerateOptions::default(),
//! )?;
//! image.save_png("product-123.png")?;
//!
//! let (scanned, report) = engine.verify_file("product-123.png")?;
//! assert!(report.authentic);
//! assert_eq!(
//!     engine.extract_secret(&scanned, &report)?.as_deref(),
//!     Some(&b"SecretFabricData"[..]),
//! );
//! # let _ = record;
//! # Ok(())
//! # }
//! ```

pub mod batch;
mod composite;
mod crypto;
mod engine;
mod error;
mod keys;
mod matrix;
mod qr;
mod record;

pub mod prelude;

pub use composite::{
    CompositeCodec, CompositeImage, LayerSeparationError, DEFAULT_SCALE, INTENSITY_LEVELS,
    MIN_SCALE,
};
pub use crypto::{
    derive_session_key, open_secret, seal_secret, sign_payload, verify_payload, CryptoError,
    SessionKey, MAC_LEN, SESSION_KEY_LEN,
};
pub use engine::{AuthEngine, AuthReport, GenerateOptions, ProvenanceStatus};
pub use error::QrSealError;
pub use keys::{KeyFormatError, Keyring, MasterSecret, PRIVATE_KEY_FILE, PUBLIC_KEY_FILE};
pub use matrix::BitMatrix;
pub use qr::{DecodeError, EcLevel};
pub use record::{BarcodeParams, BarcodeRecord, PayloadEnvelope, SignaturePayload};
