//! Convenient single-line import of the common API surface.
//!
//! ```
//! use qrseal::prelude::*;
//! ```

pub use crate::batch::{self, GenerateRequest};
pub use crate::{
    AuthEngine, AuthReport, BarcodeParams, BarcodeRecord, CompositeCodec, CompositeImage,
    EcLevel, GenerateOptions, Keyring, MasterSecret, ProvenanceStatus, QrSealError,
};
